/*!
Simulator driving and sampling sweeps for process studies.

Three concerns live here:
* the [Expr] evaluator for user-defined algebraic formulas over variable
  aliases,
* the [ProcessSimulator] contract a steady-state simulator binding must
  fulfill, together with the in-process [AnalyticSimulator] reference
  implementation,
* the [run_sweep] orchestrator that drives a simulator over a design
  matrix and assembles a [SampledTable] with cooperative cancellation.

```
use socbox_sim::{run_sweep, AnalyticSimulator, Expr};
use ndarray::arr2;
use std::sync::atomic::AtomicBool;

let mut sim = AnalyticSimulator::new()
    .input("u")
    .output("y", "u * u").unwrap();
let design = arr2(&[[1.0], [2.0], [3.0]]);
let cancel = AtomicBool::new(false);
let table = run_sweep(
    &mut sim,
    &design,
    &["u".to_string()],
    &["y".to_string()],
    &[("j".to_string(), Expr::parse("y - u").unwrap())],
    &cancel,
    |_case, _row| {},
).unwrap();
assert_eq!(table.n_rows(), 3);
```
*/
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod driver;
mod errors;
mod expr;
mod sampler;
mod table;

pub use driver::*;
pub use errors::*;
pub use expr::*;
pub use sampler::*;
pub use table::*;
