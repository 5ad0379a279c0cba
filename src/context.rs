/*!
Conditioning contexts and the store holding the posterior's default context.

A [`Context`] is an observation batch of shape `(batch, features)`. It is cheap
to clone (the data sits behind an [`Arc`]) so the posterior can hand the very
same allocation back to callers, which lets [`ContextStore::is_default`] skip the
element-wise comparison when a caller re-passes the default.

# Examples

```rust
use leaky_posterior::context::{Context, ContextStore};
use ndarray::arr1;

let mut store = ContextStore::new(2);
let x_o = Context::from(arr1(&[0.5, 0.5]));
store.set_default(x_o.clone()).unwrap();

assert!(store.is_default(&x_o));
assert!(store.is_default(&Context::from(arr1(&[0.5, 0.5]))));
assert!(!store.is_default(&Context::from(arr1(&[0.5, 0.25]))));
```
*/

use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{PosteriorError, Result};

/// An immutable observation batch `x` conditioning the posterior `p(theta | x)`.
#[derive(Debug, Clone)]
pub struct Context {
    data: Arc<Array2<f64>>,
}

impl Context {
    /// Wraps a batch of observations, one row per observation.
    pub fn new(batch: Array2<f64>) -> Self {
        Self {
            data: Arc::new(batch),
        }
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    /// Number of observations in the batch.
    pub fn batch_size(&self) -> usize {
        self.data.nrows()
    }

    /// Number of features of a single observation.
    pub fn num_features(&self) -> usize {
        self.data.ncols()
    }

    /// The `i`-th observation of the batch.
    pub fn row(&self, i: usize) -> ArrayView1<'_, f64> {
        self.data.row(i)
    }

    /// A batch of one holding the first observation. Returns `self` unchanged
    /// (same allocation) when the batch already has a single row.
    pub fn first_of_batch(&self) -> Context {
        if self.batch_size() <= 1 {
            return self.clone();
        }
        Context::new(self.data.slice_axis(Axis(0), (0..1).into()).to_owned())
    }

    /// True if both contexts share the same allocation.
    pub fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Element-wise equality, false for differing shapes.
    pub fn value_eq(&self, other: &Context) -> bool {
        self.data.shape() == other.data.shape() && *self.data == *other.data
    }
}

impl From<Array2<f64>> for Context {
    fn from(batch: Array2<f64>) -> Self {
        Context::new(batch)
    }
}

impl From<Array1<f64>> for Context {
    /// Promotes a single observation to a batch of one.
    fn from(x: Array1<f64>) -> Self {
        Context::new(x.insert_axis(Axis(0)))
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.value_eq(other)
    }
}

/// Holds the default context `x_o` and resolves the context of each call.
#[derive(Debug, Clone)]
pub struct ContextStore {
    num_features: usize,
    default: Option<Context>,
    generation: u64,
}

impl ContextStore {
    /// Creates an empty store for observations with `num_features` features.
    pub fn new(num_features: usize) -> Self {
        Self {
            num_features,
            default: None,
            generation: 0,
        }
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn default_context(&self) -> Option<&Context> {
        self.default.as_ref()
    }

    /// Incremented every time a new default context is stored.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stores `context` as the default. Fails without touching the store if it
    /// is a batch or its feature count does not match the declared shape.
    pub fn set_default(&mut self, context: Context) -> Result<()> {
        if context.batch_size() != 1 {
            return Err(PosteriorError::Validation(format!(
                "default context must be a single observation, got a batch of {}",
                context.batch_size()
            )));
        }
        self.check_features(&context)?;
        self.default = Some(context);
        self.generation += 1;
        Ok(())
    }

    /// Returns the explicit context if given, the default otherwise.
    pub fn resolve(&self, explicit: Option<&Context>) -> Result<Context> {
        match (explicit, &self.default) {
            (Some(x), _) => Ok(x.clone()),
            (None, Some(x_o)) => Ok(x_o.clone()),
            (None, None) => Err(PosteriorError::Configuration(
                "no context given and no default context set; pass `x` or call `set_default_x`"
                    .to_string(),
            )),
        }
    }

    /// True iff `context` is the default, by reference or by value.
    pub fn is_default(&self, context: &Context) -> bool {
        match &self.default {
            Some(x_o) => context.ptr_eq(x_o) || context.value_eq(x_o),
            None => false,
        }
    }

    /// Validates the feature count of `context` against the declared shape
    /// and, if set, against the default context.
    pub fn check_features(&self, context: &Context) -> Result<()> {
        if context.num_features() != self.num_features {
            return Err(PosteriorError::Validation(format!(
                "context has {} features, posterior expects {}",
                context.num_features(),
                self.num_features
            )));
        }
        if let Some(x_o) = &self.default {
            if x_o.num_features() != context.num_features() {
                return Err(PosteriorError::Validation(format!(
                    "context has {} features, default context has {}",
                    context.num_features(),
                    x_o.num_features()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn test_resolve_prefers_explicit() {
        let mut store = ContextStore::new(2);
        let x_o = Context::from(arr1(&[1.0, 2.0]));
        store.set_default(x_o.clone()).unwrap();

        let x = Context::from(arr1(&[3.0, 4.0]));
        let resolved = store.resolve(Some(&x)).unwrap();
        assert!(resolved.ptr_eq(&x));

        let resolved = store.resolve(None).unwrap();
        assert!(resolved.ptr_eq(&x_o));
    }

    #[test]
    fn test_resolve_without_default_fails() {
        let store = ContextStore::new(2);
        let err = store.resolve(None).unwrap_err();
        assert!(matches!(err, PosteriorError::Configuration(_)));
    }

    #[test]
    fn test_is_default_by_reference_and_value() {
        let mut store = ContextStore::new(3);
        assert!(!store.is_default(&Context::from(arr1(&[0.0, 0.0, 0.0]))));

        let x_o = Context::from(arr1(&[0.1, 0.2, 0.3]));
        store.set_default(x_o.clone()).unwrap();
        assert!(store.is_default(&x_o));
        assert!(store.is_default(&Context::from(arr1(&[0.1, 0.2, 0.3]))));
        assert!(!store.is_default(&Context::from(arr1(&[0.1, 0.2, 0.4]))));
        // Same values repeated in a larger batch is not the default.
        assert!(!store.is_default(&Context::from(arr2(&[
            [0.1, 0.2, 0.3],
            [0.1, 0.2, 0.3]
        ]))));
    }

    #[test]
    fn test_set_default_rejects_wrong_shape() {
        let mut store = ContextStore::new(2);
        let err = store
            .set_default(Context::from(arr1(&[1.0, 2.0, 3.0])))
            .unwrap_err();
        assert!(matches!(err, PosteriorError::Validation(_)));
        assert!(store.default_context().is_none());
        assert_eq!(store.generation(), 0);
    }

    #[test]
    fn test_first_of_batch() {
        let single = Context::from(arr1(&[1.0, 2.0]));
        assert!(single.first_of_batch().ptr_eq(&single));

        let batch = Context::from(arr2(&[[1.0, 2.0], [3.0, 4.0]]));
        let first = batch.first_of_batch();
        assert_eq!(first.batch_size(), 1);
        assert_eq!(first.row(0), arr1(&[1.0, 2.0]));
    }
}
