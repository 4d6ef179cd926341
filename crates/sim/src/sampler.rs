use crate::driver::{ProcessSimulator, SimStatus};
use crate::errors::{Result, SimError};
use crate::expr::Expr;
use crate::table::{RowStatus, SampledTable};
use log::{debug, info};
use ndarray::{ArrayBase, Data, Ix2};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Drives the simulator over every row of a design matrix and assembles
/// the sampled table.
///
/// Per row: inputs are written, the simulator runs, outputs are read (or
/// set to NaN on a failed run), then expressions are evaluated over the
/// merged input/output map in declaration order so later expressions may
/// reference earlier ones. A `Domain` or `UnboundAlias` failure inside an
/// expression degrades that cell to NaN with a warning, never the row.
///
/// Rows complete strictly in design order. The cancellation flag is
/// checked between rows; when set, the partial table is returned, which
/// is not an error.
pub fn run_sweep<S: ProcessSimulator + ?Sized>(
    sim: &mut S,
    design: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    input_aliases: &[String],
    output_aliases: &[String],
    expressions: &[(String, Expr)],
    cancel: &AtomicBool,
    mut on_row: impl FnMut(usize, &HashMap<String, f64>),
) -> Result<SampledTable> {
    if design.ncols() != input_aliases.len() {
        return Err(SimError::InvalidValue(format!(
            "design has {} columns for {} input aliases",
            design.ncols(),
            input_aliases.len()
        )));
    }

    let mut columns: Vec<String> = input_aliases.to_vec();
    columns.extend_from_slice(output_aliases);
    columns.extend(expressions.iter().map(|(a, _)| a.clone()));
    let mut table = SampledTable::new(&columns);

    info!("sampling sweep over {} cases", design.nrows());
    for (i, point) in design.outer_iter().enumerate() {
        let case = i + 1;
        let inputs: HashMap<String, f64> = input_aliases
            .iter()
            .cloned()
            .zip(point.iter().copied())
            .collect();
        sim.set_inputs(&inputs)?;
        let status = sim.run()?;

        let mut env = inputs;
        let row_status = match status {
            SimStatus::Converged => {
                let outputs = sim.read_outputs(output_aliases)?;
                env.extend(outputs);
                RowStatus::Ok
            }
            SimStatus::Failed => {
                debug!("case {case}: simulator did not converge");
                for alias in output_aliases {
                    env.insert(alias.clone(), f64::NAN);
                }
                RowStatus::Error
            }
        };

        for (alias, expr) in expressions {
            let value = match expr.eval(&env) {
                Ok(v) => v,
                Err(e @ (SimError::Domain(_) | SimError::UnboundAlias(_))) => {
                    table.push_warning(case, alias, e.to_string());
                    f64::NAN
                }
                Err(e) => return Err(e),
            };
            env.insert(alias.clone(), value);
        }

        table.push_row(row_status, &env);
        on_row(case, &env);

        if cancel.load(Ordering::Relaxed) {
            info!("sweep cancelled after case {case}");
            break;
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::AnalyticSimulator;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;

    fn aliases(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn sim() -> AnalyticSimulator {
        AnalyticSimulator::new()
            .input("u")
            .output("y", "sqrt(u)")
            .unwrap()
            .fail_when("0 - u")
            .unwrap()
    }

    #[test]
    fn test_sweep_ordering_and_statuses() {
        let design = arr2(&[[4.], [-1.], [9.]]);
        let exprs = vec![
            ("cost".to_string(), Expr::parse("2 * y + u").unwrap()),
            ("u_half".to_string(), Expr::parse("u / 2").unwrap()),
        ];
        let cancel = AtomicBool::new(false);
        let mut seen = Vec::new();
        let table = run_sweep(
            &mut sim(),
            &design,
            &aliases(&["u"]),
            &aliases(&["y"]),
            &exprs,
            &cancel,
            |case, _| seen.push(case),
        )
        .expect("sweep");

        assert_eq!(table.case(), &[1, 2, 3]);
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(table.status()[1], RowStatus::Error);

        // failed row: outputs and dependent expressions are NaN
        assert!(table.column("y").unwrap()[1].is_nan());
        assert!(table.column("cost").unwrap()[1].is_nan());
        // expressions over inputs only stay finite
        assert_abs_diff_eq!(table.column("u_half").unwrap()[1], -0.5);
        // converged rows are fully populated
        assert_abs_diff_eq!(table.column("cost").unwrap()[0], 8.);
        assert_abs_diff_eq!(table.column("cost").unwrap()[2], 15.);
        // degraded cell carries a warning
        assert_eq!(table.warnings().len(), 1);
        assert_eq!(table.warnings()[0].case, 2);
        assert_eq!(table.warnings()[0].alias, "cost");
    }

    #[test]
    fn test_cancellation_returns_partial_table() {
        let design = arr2(&[[1.], [2.], [3.], [4.]]);
        let cancel = AtomicBool::new(false);
        let table = run_sweep(
            &mut sim(),
            &design,
            &aliases(&["u"]),
            &aliases(&["y"]),
            &[],
            &cancel,
            |case, _| {
                if case == 2 {
                    cancel.store(true, Ordering::Relaxed);
                }
            },
        )
        .expect("sweep");
        assert_eq!(table.n_rows(), 2);
        assert_eq!(table.case(), &[1, 2]);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let design = arr2(&[[1., 2.]]);
        let cancel = AtomicBool::new(false);
        let res = run_sweep(
            &mut sim(),
            &design,
            &aliases(&["u"]),
            &aliases(&["y"]),
            &[],
            &cancel,
            |_, _| {},
        );
        assert!(matches!(res, Err(SimError::InvalidValue(_))));
    }
}
