/*!
Kriging surrogate modeling with derivative predictions.

This crate trains anisotropic Gaussian process interpolators of scalar
process outputs sampled over a design of experiments. Models are built
through the [linfa](https://github.com/rust-ml/linfa) `Fit` trait:

```no_run
use socbox_gp::{Kriging, RegrPoly};
use linfa::prelude::*;
use ndarray::{arr2, array};

let xt = arr2(&[[0.0], [1.0], [2.0], [3.0], [4.0]]);
let yt = array![0.0, 0.8, 0.9, 0.1, -0.8];
let gp = Kriging::params(RegrPoly::Poly0)
    .fit(&Dataset::new(xt, yt))
    .expect("Kriging fitted");
let y = gp.predict(&arr2(&[[1.5]])).expect("prediction");
let dy = gp.predict_jacobian(&array![1.5]).expect("gradient");
```

Kernel widths are estimated by a multistart pattern search maximizing the
reduced likelihood; the trend polynomial degree is selected at runtime with
[RegrPoly]. Besides values and variances, trained models expose analytic
gradients and Hessians of the mean response which feed gain and curvature
estimations downstream. Model quality is assessed with the k-fold and
holdout helpers of the [validation] module.
*/
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod algorithm;
mod correlation;
mod errors;
mod mean_models;
mod optimization;
mod parameters;
mod utils;
/// Cross-validation of surrogate configurations
pub mod validation;

pub use algorithm::*;
pub use correlation::*;
pub use errors::*;
pub use mean_models::*;
pub use parameters::*;
pub use utils::{pairwise_differences, DiffMatrix};
