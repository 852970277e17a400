//! The `forgeweave` CLI.
//!
//! `forgeweave build` loads a project file, builds the step graph, and runs
//! it. The process exit code is 0 only if every node succeeded.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use forgeweave::exec::{Concurrency, Scheduler};
use forgeweave::graph::GraphBuilder;
use forgeweave::plugins::PluginRegistry;
use forgeweave::project::Project;

#[derive(Parser)]
#[command(name = "forgeweave", version, about = "Graph-driven build orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load the project, build the step graph, and run it.
    Build {
        /// Print the dependency graph before running.
        #[arg(long)]
        graph: bool,
        /// Project file location.
        #[arg(long, default_value = "./project.json")]
        path: PathBuf,
        /// Named configuration overlay to apply.
        #[arg(long)]
        conf: Option<String>,
        /// Concurrency bound; 1 forces deterministic sequential execution.
        #[arg(long, short = 'j')]
        jobs: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(report) => {
            eprintln!("{report:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> miette::Result<bool> {
    match cli.command {
        Command::Build {
            graph,
            path,
            conf,
            jobs,
        } => {
            let mut registry = PluginRegistry::with_builtins();
            let project = Project::from_file(&path, &mut registry, conf.as_deref()).await?;

            let step_graph = GraphBuilder::new(&project).build()?;
            if graph {
                print!("{}", step_graph.render());
            }

            let scheduler = match jobs {
                Some(n) => Scheduler::new(Concurrency::Bounded(n)),
                None => Scheduler::unbounded(),
            };
            let report = scheduler.run(step_graph).await?;
            println!("{report}");
            Ok(report.success())
        }
    }
}
