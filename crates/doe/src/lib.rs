/*!
Design of Experiments for surrogate-driven process studies.

The main entry point is the [Lhs] sampler which builds maximin
[Latin Hypercube](https://en.wikipedia.org/wiki/Latin_hypercube_sampling) designs,
optionally augmented with the `2^d` vertices of the design space so that the
surrogates trained downstream never extrapolate at the box corners.

The design space is defined as a 2D ndarray `(nx, 2)`, specifying lower bound and
upper bound of each of the `nx` components of the samples `x`.

Example:
```
use socbox_doe::{Lhs, SamplingMethod};
use ndarray::arr2;
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;

// Design space is defined as [5., 10.] x [0., 1.], samples are 2-dimensional.
let xlimits = arr2(&[[5., 10.], [0., 1.]]);
let samples = Lhs::new(&xlimits)
    .unwrap()
    .with_rng(Xoshiro256Plus::seed_from_u64(42))
    .sample(5)
    .unwrap();
assert_eq!(samples.dim(), (5, 2));
```
*/
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod errors;
mod lhs;
mod traits;
mod utils;

pub use errors::*;
pub use lhs::*;
pub use traits::*;
pub use utils::{min_pdist, unit_vertices};
