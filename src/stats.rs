//! Convergence diagnostics for multi-chain MCMC output.

use ndarray::prelude::*;
use ndarray_stats::QuantileExt;

/// Potential scale reduction factor (R-hat) per parameter, see the
/// [Stan Reference Manual][1].
///
/// `chains` holds one `n_draws x dim` matrix per chain. Returns `None` when
/// there are fewer than two chains, fewer than two draws per chain or the
/// chains differ in shape.
///
/// [1]: https://mc-stan.org/docs/2_18/reference-manual/notation-for-samples-chains-and-draws.html
pub fn potential_scale_reduction(chains: &[Array2<f64>]) -> Option<Array1<f64>> {
    let first = chains.first()?;
    let (n, dim) = first.dim();
    if chains.len() < 2 || n < 2 || chains.iter().any(|c| c.dim() != (n, dim)) {
        return None;
    }

    let means: Vec<Array1<f64>> = chains.iter().map(|c| c.mean_axis(Axis(0))).collect::<Option<_>>()?;
    let means_views: Vec<ArrayView1<f64>> = means.iter().map(|m| m.view()).collect();
    let means = ndarray::stack(Axis(0), &means_views).ok()?; // n_chains x dim

    let vars: Vec<Array1<f64>> = chains.iter().map(|c| c.var_axis(Axis(0), 1.0)).collect();
    let vars_views: Vec<ArrayView1<f64>> = vars.iter().map(|v| v.view()).collect();
    let within = ndarray::stack(Axis(0), &vars_views).ok()?.mean_axis(Axis(0))?;

    let between_over_n = means.var_axis(Axis(0), 1.0);
    let n = n as f64;
    let var_hat = &within * ((n - 1.0) / n) + between_over_n;
    Some((var_hat / within).mapv(f64::sqrt))
}

/// Largest R-hat over all parameters, ignoring NaNs from constant chains.
pub fn max_rhat(chains: &[Array2<f64>]) -> Option<f64> {
    let rhat = potential_scale_reduction(chains)?;
    Some(*rhat.max_skipnan())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_identical_chains() {
        let chain = arr2(&[[0.0, 1.0], [1.0, 3.0], [2.0, 2.0], [3.0, 0.0]]);
        let rhat = potential_scale_reduction(&[chain.clone(), chain.clone(), chain]).unwrap();
        // Identical chains: B = 0 so R-hat = sqrt((n - 1) / n).
        let expected = (3.0_f64 / 4.0).sqrt();
        assert_abs_diff_eq!(rhat, arr1(&[expected, expected]), epsilon = 1e-12);
    }

    #[test]
    fn test_separated_chains_have_large_rhat() {
        let a = arr2(&[[0.0], [0.1], [-0.1], [0.05]]);
        let b = arr2(&[[10.0], [10.1], [9.9], [10.05]]);
        assert!(max_rhat(&[a, b]).unwrap() > 10.0);
    }

    #[test]
    fn test_hand_computed_values() {
        // Two chains, two draws, one parameter:
        // means 0.5 and 2.5, within-chain variances 0.5 and 0.5.
        let a = arr2(&[[0.0], [1.0]]);
        let b = arr2(&[[2.0], [3.0]]);
        let rhat = potential_scale_reduction(&[a, b]).unwrap();
        // var_hat = 0.5 * 0.5 + 2.0 = 2.25, R-hat = sqrt(2.25 / 0.5)
        assert_abs_diff_eq!(rhat[0], (4.5_f64).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(potential_scale_reduction(&[]).is_none());
        assert!(potential_scale_reduction(&[arr2(&[[1.0], [2.0]])]).is_none());
        assert!(potential_scale_reduction(&[arr2(&[[1.0]]), arr2(&[[2.0]])]).is_none());
        assert!(
            potential_scale_reduction(&[arr2(&[[1.0], [2.0]]), arr2(&[[1.0], [2.0], [3.0]])])
                .is_none()
        );
    }
}
