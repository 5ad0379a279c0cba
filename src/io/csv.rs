/*!
# Saving posterior draws to CSV

Enable via the `csv` feature.
*/

use std::fmt::Display;
use std::fs::File;
use std::path::Path;

use csv::Writer;
use ndarray::{Array, Axis, Dimension};

use crate::error::{PosteriorError, Result};

/**
Saves posterior draws as a CSV file.

`data` is what [`Posterior::sample`](crate::posterior::Posterior::sample)
returns: any number of leading sample axes followed by the parameter axis.
The leading axes are flattened in row-major order, so the file has a header
`sample,dim_0,dim_1,...` and one row per draw.

# Examples

```rust
use leaky_posterior::io::csv::save_csv;
use ndarray::arr3;

// A 2 x 2 sample shape of 3-dimensional draws.
let data = arr3(&[[[1, 2, 3], [4, 5, 6]], [[7, 8, 9], [10, 11, 12]]]);
let path = std::env::temp_dir().join("leaky_posterior_doc.csv");
save_csv(&data, &path).unwrap();
```
*/
pub fn save_csv<T, D, Q>(data: &Array<T, D>, filename: Q) -> Result<()>
where
    T: Display + Clone,
    D: Dimension,
    Q: AsRef<Path>,
{
    let shape = data.shape();
    let n_dims = match shape.last() {
        Some(&d) => d,
        None => {
            return Err(PosteriorError::Validation(
                "cannot save a zero-dimensional array as draws".to_string(),
            ))
        }
    };
    let n_draws = if n_dims == 0 { 0 } else { data.len() / n_dims };
    let rows = data.to_shape((n_draws, n_dims))?;

    let mut wtr = Writer::from_writer(File::create(filename)?);
    let mut header: Vec<String> = vec!["sample".to_string()];
    header.extend((0..n_dims).map(|i| format!("dim_{}", i)));
    wtr.write_record(&header)?;

    for (sample_idx, draw) in rows.axis_iter(Axis(0)).enumerate() {
        let mut row = vec![sample_idx.to_string()];
        row.extend(draw.iter().map(|v| v.to_string()));
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, arr3, Array2};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_save_csv_flattens_sample_axes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("draws.csv");
        let data = arr3(&[[[0.5, 1.5]], [[2.5, 3.5]]]);
        save_csv(&data, &path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "sample,dim_0,dim_1\n0,0.5,1.5\n1,2.5,3.5\n");
    }

    #[test]
    fn test_save_csv_empty_draws_writes_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        let data: Array2<f64> = Array2::zeros((0, 1));
        save_csv(&data, &path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "sample,dim_0\n");
    }

    #[test]
    fn test_save_csv_bad_path() {
        let data = arr2(&[[1.0]]);
        let result = save_csv(&data, "/nonexistent/dir/draws.csv");
        assert!(matches!(result, Err(PosteriorError::Io(_))));
    }
}
