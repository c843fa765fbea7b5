use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use tracing_subscriber::{fmt, EnvFilter};

use stampede_core::{EngineConfig, EnvOverrides, ScenarioDocument};
use stampede_engine::{JsonLinesSink, MetricsSink, Runner, WorkloadRegistry};

mod workloads;

/// Exit code for configuration errors: the run never started.
const EXIT_CONFIG: i32 = 2;
/// Exit code for threshold breaches: the run completed but failed.
const EXIT_THRESHOLD: i32 = 3;

#[derive(Parser, Debug)]
#[command(name = "stampede")]
#[command(about = "Scenario-driven load generation engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a scenario document and evaluate its thresholds
    Run {
        /// Scenario document (.yaml, .yml or .json)
        scenario: PathBuf,

        /// Write final metric rows to a JSON-lines file
        #[arg(long, env = "STAMPEDE_OUT")]
        out: Option<PathBuf>,

        /// Seed for reproducible workload branching and pool sampling
        #[arg(long, env = "STAMPEDE_SEED")]
        seed: Option<u64>,

        /// Suppress the progress spinner
        #[arg(long)]
        quiet: bool,
    },
}

#[tokio::main]
async fn main() {
    init_logging();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run {
            scenario,
            out,
            seed,
            quiet,
        } => run_command(scenario, out, seed, quiet).await,
    };

    std::process::exit(code);
}

async fn run_command(
    scenario: PathBuf,
    out: Option<PathBuf>,
    seed: Option<u64>,
    quiet: bool,
) -> i32 {
    let config = match EngineConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ configuration error: {e}");
            return EXIT_CONFIG;
        }
    };

    tracing::info!(path = %scenario.display(), "loading scenario document");
    let mut document = match ScenarioDocument::from_path(&scenario) {
        Ok(document) => document,
        Err(e) => {
            eprintln!("❌ failed to load {}: {e}", scenario.display());
            return EXIT_CONFIG;
        }
    };

    let overrides = match EnvOverrides::from_env() {
        Ok(overrides) => overrides,
        Err(e) => {
            eprintln!("❌ {e}");
            return EXIT_CONFIG;
        }
    };
    document.apply_overrides(&overrides);

    let mut registry = WorkloadRegistry::new();
    workloads::register_builtins(&mut registry);

    let mut runner = Runner::new(config, registry);
    if let Some(seed) = seed {
        runner = runner.with_seed(seed);
    }

    println!("🐂 stampede run: {}", scenario.display());

    let progress = (!quiet).then(|| {
        let pb = ProgressBar::new_spinner();
        pb.set_message("running scenarios (ctrl-c stops admission)...");
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    });

    let summary = match runner.run(&document).await {
        Ok(summary) => summary,
        Err(e) => {
            if let Some(pb) = progress {
                pb.finish_and_clear();
            }
            eprintln!("❌ {e}");
            return if e.is_config() { EXIT_CONFIG } else { 1 };
        }
    };
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    println!();
    print!("{}", summary.render_text());
    println!();

    if let Some(path) = out {
        match JsonLinesSink::create(&path) {
            Ok(mut sink) => match sink.emit(&summary.export_rows()) {
                Ok(()) => println!("📤 metrics written to {}", path.display()),
                Err(e) => eprintln!("⚠️  failed to export metrics: {e}"),
            },
            Err(e) => eprintln!("⚠️  failed to create {}: {e}", path.display()),
        }
    }

    if summary.passed {
        println!("✅ all thresholds passed");
        0
    } else {
        println!("❌ run failed: threshold breached");
        EXIT_THRESHOLD
    }
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).with_target(false).init();
}
