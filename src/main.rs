//! Command-line interface for the metrics collector binary.
//!
//! The CLI loads a YAML run configuration, optionally reconciles the user
//! group roster, collects pull request metrics across the configured
//! repositories and either prints them to the console or uploads them to the
//! warehouse.

use std::{path::PathBuf, process};

use clap::{ArgAction, Parser};
use emic::{
    BigQueryWarehouse, Collector, Error, RunConfig, load_run_config, print_metrics, roster,
    sync_roster, upload_metrics
};
use octocrab::Octocrab;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Command line interface for collecting engineering velocity metrics.
#[derive(Debug, Parser)]
#[command(
    name = "emic",
    version,
    about = "Collect engineering velocity metrics for GitHub pull requests"
)]
struct Cli {
    /// Path to the YAML run configuration.
    #[arg(long = "config", value_name = "PATH", default_value = "emic.yaml")]
    config: PathBuf,

    /// Print metrics to the console instead of uploading them.
    #[arg(long = "print-only", action = ArgAction::SetTrue)]
    print_only: bool,

    /// Token used to authenticate GitHub API requests.
    #[arg(
        long = "github-token",
        value_name = "TOKEN",
        env = "GITHUB_TOKEN",
        hide_env_values = true
    )]
    github_token: String,

    /// OAuth token for warehouse requests. Required unless `--print-only`.
    #[arg(
        long = "warehouse-token",
        value_name = "TOKEN",
        env = "WAREHOUSE_TOKEN",
        hide_env_values = true
    )]
    warehouse_token: Option<String>
}

/// Entry point that reports errors and sets the appropriate exit status.
fn main() {
    if let Err(error) = run() {
        eprintln!("{}", error.to_display_string());
        process::exit(1);
    }
}

/// Executes a full run using parsed arguments.
///
/// # Errors
///
/// Propagates configuration, GitHub and warehouse failures.
#[tokio::main]
async fn run() -> Result<(), Error> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_run_config(&cli.config)?;

    let octocrab = Octocrab::builder()
        .personal_token(cli.github_token.clone())
        .build()
        .map_err(|e| Error::service(format!("failed to build GitHub client: {e}")))?;

    if config.roster.enabled {
        run_roster_phase(&cli, &octocrab, &config).await?;
    }

    let records = Collector::new(&octocrab, &config).collect_metrics().await?;

    if cli.print_only {
        print_metrics(&records);
        return Ok(());
    }

    let warehouse = build_warehouse(&cli, &config)?;
    upload_metrics(&warehouse, &config, &records).await
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("EMIC_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Runs the roster phase: a warehouse sync, or a validation pass with
/// console output in print-only mode.
async fn run_roster_phase(
    cli: &Cli,
    octocrab: &Octocrab,
    config: &RunConfig,
) -> Result<(), Error> {
    if cli.print_only {
        let Some(path) = config.roster.path.as_deref() else {
            return Err(Error::validation("roster.path is required when roster sync is enabled"));
        };
        let entries = roster::load_roster(path)?;
        let entries = roster::filter_known_logins(octocrab, entries).await?;
        info!(
            "Roster holds {} validated entries; skipping warehouse sync in print-only mode",
            entries.len()
        );
        for entry in &entries {
            println!("{entry}");
        }
        return Ok(());
    }

    let warehouse = build_warehouse(cli, config)?;
    sync_roster(octocrab, &warehouse, config).await?;
    Ok(())
}

fn build_warehouse(cli: &Cli, config: &RunConfig) -> Result<BigQueryWarehouse, Error> {
    let warehouse = config.require_warehouse()?;
    let Some(token) = cli.warehouse_token.as_deref() else {
        return Err(Error::validation("--warehouse-token is required unless --print-only is set"));
    };
    Ok(BigQueryWarehouse::new(warehouse, token)?)
}
