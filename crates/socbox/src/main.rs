use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::info;
use socbox::{Pipeline, PipelineEvent, ProjectFile};
use socbox_opt::{IpoptHttpClient, NlpSolver, SlsqpSolver};
use socbox_sim::AnalyticSimulator;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "socbox", version, about = "Self-optimizing control structure selection")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a whole study from a project file
    Run {
        /// Project file to run
        project: PathBuf,
        /// Where to write the filled project; defaults to in-place
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Check that the configured NLP endpoint answers
    ProbeNlp {
        /// Endpoint URL
        endpoint: String,
    },
}

fn build_simulator(project: &ProjectFile) -> anyhow::Result<AnalyticSimulator> {
    let info = &project.simulation_info;
    if info.model_formulas.is_empty() {
        bail!("the project carries no analytic model formulas");
    }
    let mut sim = AnalyticSimulator::new();
    for variable in &info.variables {
        use socbox::VarType::*;
        match variable.var_type {
            Manipulated | Disturbance => sim = sim.input(&variable.alias),
            _ => {
                let formula = info.model_formulas.get(&variable.alias).with_context(|| {
                    format!("no model formula for output '{}'", variable.alias)
                })?;
                sim = sim.output(&variable.alias, formula)?;
            }
        }
    }
    if let Some(formula) = &info.fail_when {
        sim = sim.fail_when(formula)?;
    }
    Ok(sim)
}

fn run_project(path: &PathBuf, output: Option<PathBuf>) -> anyhow::Result<()> {
    let project = ProjectFile::load(path)
        .with_context(|| format!("loading {}", path.display()))?;
    let mut sim = build_simulator(&project)?;
    let endpoint = project.reducedspace_info.nlp_endpoint.clone();
    let pipeline = Pipeline::new(project)?;

    // the CLI has no interactive cancellation; embedding applications
    // share this flag with their own UI
    let cancel = Arc::new(AtomicBool::new(false));

    let on_event = |event: PipelineEvent| match event {
        PipelineEvent::StageStarted(stage) => info!("{stage:?} started"),
        PipelineEvent::StageFinished(stage) => info!("{stage:?} finished"),
        PipelineEvent::RowSampled { case } => {
            if case % 10 == 0 {
                info!("sampled case {case}");
            }
        }
    };
    let filled = match endpoint {
        Some(url) => {
            let solver = IpoptHttpClient::new(url);
            pipeline.run(&mut sim, &solver, &cancel, on_event)?
        }
        None => {
            let solver = SlsqpSolver::new();
            pipeline.run(&mut sim, &solver, &cancel, on_event)?
        }
    };

    if let Some(rankings) = &filled.soc_info.rankings {
        for ranking in rankings {
            if let Some(best) = ranking.best.first() {
                println!(
                    "size {}: best subset {:?} with worst-case loss {:.6e}",
                    ranking.size, best.indices, best.worst_case
                );
            }
        }
    } else if let Some(report) = &filled.reducedspace_info.report {
        println!(
            "stopped at {:?}: objective {:.6e} at {}",
            report.status, report.objective, report.x_opt
        );
    }

    let target = output.unwrap_or_else(|| path.clone());
    filled.save(&target)?;
    info!("project written to {}", target.display());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Run { project, output } => run_project(&project, output),
        Command::ProbeNlp { endpoint } => {
            let client = IpoptHttpClient::new(endpoint.clone());
            client.probe()?;
            println!("{endpoint} is alive");
            Ok(())
        }
    }
}
