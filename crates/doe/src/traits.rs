use crate::errors::Result;
use linfa::Float;
use ndarray::Array2;

/// Sampling method allowing to generate a DoE in a given sample space
///
/// The sample space is defined by `[lower_bound_xi, upper_bound_xi]^nx`
/// within `R^nx` where `nx` is the dimension of the sample space.
pub trait SamplingMethod<F: Float> {
    /// Returns the bounds of the sample space as a (nx, 2) matrix where
    /// the ith row is the interval of the ith component of a sample.
    fn sampling_space(&self) -> &Array2<F>;

    /// Generates an array of samples belonging to `[0., 1.]^nx`.
    ///
    /// The number of rows may exceed `ns` when the method appends
    /// deterministic points (e.g. design space vertices).
    fn normalized_sample(&self, ns: usize) -> Result<Array2<F>>;

    /// Generates samples belonging to `[lower_bound_xi, upper_bound_xi]^nx`
    /// where bounds are the values returned by `sampling_space`.
    fn sample(&self, ns: usize) -> Result<Array2<F>> {
        let xlimits = self.sampling_space();
        let lower = xlimits.column(0);
        let scaler = &xlimits.column(1) - &lower;
        Ok(self.normalized_sample(ns)? * scaler + lower)
    }
}
