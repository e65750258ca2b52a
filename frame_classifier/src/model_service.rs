use crate::{error::InferenceError, preprocess::InputShape};
use ndarray::ArrayView4;

/// A loaded classification model.
///
/// Implementations must serialize access to any non-reentrant runtime state;
/// `infer` is called from blocking worker threads for concurrent connections.
pub trait ModelService: Send + Sync + 'static {
    fn input_shape(&self) -> InputShape;

    /// Length of the score vector when the model declares it statically.
    fn output_len(&self) -> Option<usize> {
        None
    }

    fn infer(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, InferenceError>;
}
