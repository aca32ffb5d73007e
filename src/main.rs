use ans_pipeline::config::Config;
use ans_pipeline::constants::{METRICS_FILE, RUN_REPORT_FILE};
use ans_pipeline::infra::http_client::ReqwestHttp;
use ans_pipeline::observability::{init_logging, metrics};
use ans_pipeline::pipeline::{PipelineOrchestrator, RunReport};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "ans_pipeline")]
#[command(about = "ANS quarterly expense consolidation pipeline")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to a TOML config file (defaults to ./pipeline.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Number of most recent quarters to retrieve
    #[arg(long, global = true)]
    periods: Option<usize>,

    /// Directory receiving every output artifact
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the most recent quarters available upstream
    Discover,
    /// Download, extract and consolidate the latest quarters
    Ingest,
    /// Validate, enrich and aggregate an existing consolidated file
    Transform,
    /// Run ingest and transform sequentially
    Run,
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(periods) = cli.periods {
        config.processing.periods = periods;
    }
    if let Some(dir) = &cli.output_dir {
        config.paths.output_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn finish_run(config: &Config, report: &mut RunReport) {
    report.finish();
    report.inconsistencies.log_summary();

    let report_path = config.paths.output_dir.join(RUN_REPORT_FILE);
    match report.write_json(&report_path) {
        Ok(()) => info!("Run report written to {}", report_path.display()),
        Err(e) => warn!("Could not write run report: {}", e),
    }
    match metrics::write_snapshot(&config.paths.output_dir.join(METRICS_FILE)) {
        Ok(Some(path)) => info!("Metrics written to {}", path.display()),
        Ok(None) => {}
        Err(e) => warn!("Could not write metrics snapshot: {}", e),
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    if let Err(e) = metrics::init() {
        warn!("Metrics disabled: {}", e);
    }
    let http = ReqwestHttp::new(&config.sources).context("building HTTP client")?;
    let orchestrator = PipelineOrchestrator::new(&config, &http);
    let mut report = RunReport::new();
    info!("Run {} started", report.run_id);

    let result = match cli.command {
        Commands::Discover => {
            println!("🔎 Discovering the latest {} quarters...", config.processing.periods);
            orchestrator.discover(&mut report).map(|ids| {
                for id in ids {
                    println!("   {}", id);
                }
            })
        }
        Commands::Ingest => {
            println!("📥 Running ingestion...");
            orchestrator.run_ingest(&mut report)
        }
        Commands::Transform => {
            println!("🔧 Running transformation...");
            orchestrator.run_transform(&mut report)
        }
        Commands::Run => {
            println!("🚀 Running full pipeline (ingest + transform)...");
            orchestrator.run_all(&mut report)
        }
    };

    if let Err(e) = std::fs::create_dir_all(&config.paths.output_dir) {
        warn!("Could not create {}: {}", config.paths.output_dir.display(), e);
    }
    finish_run(&config, &mut report);
    result.context("pipeline run failed")?;
    println!("✅ Done. Outputs in {}", config.paths.output_dir.display());
    Ok(())
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}
