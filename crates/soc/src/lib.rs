//! Self-optimizing control structure selection.
//!
//! Starting from trained surrogate models of a process, this crate extracts
//! the local gradient and Hessian blocks around the nominal optimum
//! ([`extract_differentials`]), guards the objective Hessian with the GMW81
//! modified Cholesky factorization ([`modified_cholesky`]) and ranks
//! measurement subsets by their steady-state economic loss under
//! disturbances and measurement noise ([`SocEngine`]).
//!
//! The loss of a single subset follows the exact local method: the optimal
//! selection matrix `H` is computed in closed form and the worst-case and
//! average losses are read off the singular values of the loss matrix
//! (see [`subset_loss`]). The engine then enumerates subsets of each
//! requested size with a branch-and-bound that prunes on a superset loss
//! bound.
//!
//! ```no_run
//! use ndarray::array;
//! use socbox_soc::{SocEngine, SocProblem};
//!
//! let problem = SocProblem {
//!     gy: array![[1.], [1.], [1.]],
//!     gyd: array![[1.], [0.], [0.]],
//!     juu: array![[1.]],
//!     jud: array![[1.]],
//!     wd: array![1.],
//!     wny: array![0.1, 0.1, 0.1],
//! };
//! let engine = SocEngine::new(problem)?;
//! let rankings = engine.rank_subsets(&[1, 2], 3)?;
//! for ranking in &rankings {
//!     println!(
//!         "best subset of size {}: {:?}",
//!         ranking.size, ranking.best[0].indices
//!     );
//! }
//! # Ok::<(), socbox_soc::SocError>(())
//! ```
#![warn(missing_docs)]

mod bnb;
mod differentials;
mod errors;
mod gmw;
mod helm;

pub use bnb::{SizeRanking, SocEngine};
pub use differentials::{extract_differentials, Differentials};
pub use errors::{Result, SocError};
pub use gmw::{modified_cholesky, GmwFactorization};
pub use helm::{subset_loss, SocProblem, SubsetLoss};
