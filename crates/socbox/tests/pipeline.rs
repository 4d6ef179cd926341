use approx::assert_abs_diff_eq;
use socbox::{
    ExpressionDef, Pipeline, PipelineEvent, ProjectFile, Stage, VarType, Variable,
};
use socbox_opt::SlsqpSolver;
use socbox_sim::AnalyticSimulator;
use std::sync::atomic::{AtomicBool, Ordering};

fn var(alias: &str, var_type: VarType) -> Variable {
    Variable {
        alias: alias.to_string(),
        var_type,
        path: None,
    }
}

/// A small distillation-flavored study: one manipulated reboiler duty,
/// one disturbed feed, two temperature candidates, one purity constraint.
fn demo_project() -> ProjectFile {
    let mut project = ProjectFile::default();
    project.simulation_info.variables = vec![
        var("qr", VarType::Manipulated),
        var("feed", VarType::Disturbance),
        var("t_top", VarType::Candidate),
        var("t_bot", VarType::Candidate),
        var("g1", VarType::Constraint),
        var("profit", VarType::Objective),
    ];
    project.simulation_info.expressions = vec![ExpressionDef {
        alias: "margin".to_string(),
        formula: "0 - profit".to_string(),
        var_type: VarType::Auxiliary,
    }];

    project.doe_info.settings.n_samples = 25;
    project.doe_info.settings.n_iter = 3;
    project.doe_info.settings.seed = Some(42);
    project.doe_info.bounds.insert("qr".to_string(), [0., 1.]);
    project.doe_info.bounds.insert("feed".to_string(), [0., 1.]);

    project.metamodel_info.regrpoly = socbox_gp::RegrPoly::Poly1;
    project.metamodel_info.kfold = 5;

    project.reducedspace_info.caballero.maxfunevals = 60;
    project.reducedspace_info.caballero.n_init = 10;
    project.reducedspace_info.caballero.regrpoly = socbox_gp::RegrPoly::Poly1;

    project
        .differentials_info
        .wd
        .insert("feed".to_string(), 0.1);
    project
        .differentials_info
        .wny
        .insert("t_top".to_string(), 0.01);
    project
        .differentials_info
        .wny
        .insert("t_bot".to_string(), 0.01);

    project.soc_info.subset_sizes = vec![1];
    project.soc_info.bests_per_size = 2;
    project
}

fn demo_simulator() -> AnalyticSimulator {
    AnalyticSimulator::new()
        .input("qr")
        .input("feed")
        .output("t_top", "qr + 2*feed")
        .unwrap()
        .output("t_bot", "3*qr - feed")
        .unwrap()
        .output("g1", "qr + feed - 0.9")
        .unwrap()
        .output("profit", "(qr - 0.3)^2 + qr*feed")
        .unwrap()
}

#[test]
fn test_full_study() {
    let mut sim = demo_simulator();
    let solver = SlsqpSolver::new();
    let cancel = AtomicBool::new(false);
    let mut stages = Vec::new();
    let mut rows = 0usize;

    let pipeline = Pipeline::new(demo_project()).unwrap();
    let filled = pipeline
        .run(&mut sim, &solver, &cancel, |event| match event {
            PipelineEvent::StageStarted(stage) => stages.push(stage),
            PipelineEvent::RowSampled { .. } => rows += 1,
            PipelineEvent::StageFinished(_) => {}
        })
        .unwrap();

    assert_eq!(
        stages,
        vec![
            Stage::Sampling,
            Stage::Validation,
            Stage::Optimization,
            Stage::Differentials,
            Stage::Ranking,
        ]
    );
    assert_eq!(rows, 25);

    // sampling
    let table = filled.doe_info.sampled_table.as_ref().unwrap();
    assert_eq!(table.n_rows(), 25);
    assert!(table.case().windows(2).all(|w| w[1] == w[0] + 1));
    // the auxiliary expression column is materialized
    assert!(table.column("margin").is_some());

    // validation: smooth functions over 25 points cross-validate well
    let validation = filled.metamodel_info.validation.as_ref().unwrap();
    for alias in ["t_top", "t_bot", "g1", "profit"] {
        let cv = &validation[alias];
        assert!(cv.mean.r2 > 0.8, "{alias}: r2 = {}", cv.mean.r2);
    }

    // optimization: true minimum is qr = 0.05 at the nominal feed 0.5
    let report = filled.reducedspace_info.report.as_ref().unwrap();
    assert!(report.feasible);
    assert!(report.constraints[0] <= 1e-4 + 1e-12);
    assert!(report.objective < 0.2, "objective {}", report.objective);

    // differentials: gains of the analytic model
    let bundle = filled.differentials_info.bundle.as_ref().unwrap();
    assert_eq!(bundle.y_aliases, vec!["t_top", "t_bot"]);
    assert_abs_diff_eq!(bundle.gy[[0, 0]], 1., epsilon = 0.1);
    assert_abs_diff_eq!(bundle.gyd[[0, 0]], 2., epsilon = 0.1);
    assert_abs_diff_eq!(bundle.gy[[1, 0]], 3., epsilon = 0.1);
    assert_abs_diff_eq!(bundle.gyd[[1, 0]], -1., epsilon = 0.1);
    assert_abs_diff_eq!(bundle.juu[[0, 0]], 2., epsilon = 0.5);
    assert_abs_diff_eq!(bundle.jud[[0, 0]], 1., epsilon = 0.5);

    // ranking: the bottom temperature has the larger scaled gain and wins
    let rankings = filled.soc_info.rankings.as_ref().unwrap();
    assert_eq!(rankings.len(), 1);
    assert_eq!(rankings[0].size, 1);
    assert_eq!(rankings[0].best.len(), 2);
    assert_eq!(rankings[0].best[0].indices, vec![1]);
    for subset in &rankings[0].best {
        assert!(subset.average <= subset.worst_case);
        assert!(subset.worst_case.is_finite() && subset.worst_case < 1.);
    }
}

#[test]
fn test_cancellation_keeps_partial_results() {
    let mut sim = demo_simulator();
    let solver = SlsqpSolver::new();
    let cancel = AtomicBool::new(false);

    let pipeline = Pipeline::new(demo_project()).unwrap();
    let filled = pipeline
        .run(&mut sim, &solver, &cancel, |event| {
            if let PipelineEvent::RowSampled { case } = event {
                if case == 5 {
                    cancel.store(true, Ordering::Relaxed);
                }
            }
        })
        .unwrap();

    let table = filled.doe_info.sampled_table.as_ref().unwrap();
    assert_eq!(table.n_rows(), 5);
    assert!(filled.metamodel_info.validation.is_none());
    assert!(filled.reducedspace_info.report.is_none());
    assert!(filled.soc_info.rankings.is_none());
}

#[test]
fn test_missing_bounds_rejected() {
    let mut project = demo_project();
    project.doe_info.bounds.remove("feed");
    let mut sim = demo_simulator();
    let solver = SlsqpSolver::new();
    let cancel = AtomicBool::new(false);
    let pipeline = Pipeline::new(project).unwrap();
    assert!(pipeline.run(&mut sim, &solver, &cancel, |_| {}).is_err());
}

#[test]
fn test_two_objectives_rejected() {
    let mut project = demo_project();
    project
        .simulation_info
        .variables
        .push(var("profit2", VarType::Objective));
    assert!(Pipeline::new(project).is_err());
}
