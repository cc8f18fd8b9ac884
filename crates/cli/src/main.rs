#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! `cachet-gate`: pipeline step that blocks until external services are up.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use cachet_gate_core::{GatingEngine, GatingReport, ResourceRegistry, SourceConfig, TracingLog};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "cachet-gate", version, about = "Gate builds on external service status")]
struct Cli {
    /// TOML configuration file. Defaults apply when it does not exist.
    #[arg(long, default_value = "cachet-gate.toml")]
    config: PathBuf,

    /// Extra status source base URL (repeatable), appended to configured sources.
    #[arg(long = "source")]
    sources: Vec<String>,

    /// Log level (env-filter syntax).
    #[arg(long, default_value = "info")]
    log: String,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print every known resource name, sorted.
    Names,
    /// Print the status of the given resources.
    Status {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Block until the required resources are operational.
    Gate {
        /// Required resource (repeatable). Overrides `gate.resources`.
        #[arg(long = "resource")]
        resources: Vec<String>,

        /// Give up after this many seconds. Overrides `gate.max_wait_secs`.
        #[arg(long)]
        max_wait_secs: Option<u64>,

        /// Seconds between status checks. Overrides `gate.poll_interval_secs`.
        #[arg(long)]
        poll_interval_secs: Option<u64>,

        /// Write the gating report (JSON) here.
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&cli.log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut cfg = Config::load_or_default(&cli.config)?;
    cfg.sources
        .extend(cli.sources.iter().cloned().map(SourceConfig::new));
    if cfg.sources.is_empty() {
        warn!("no status sources configured, every resource will be unknown");
    }

    let registry = Arc::new(
        ResourceRegistry::new(cfg.registry_config()).context("invalid source configuration")?,
    );
    let summary = registry.refresh().await;
    if summary.sources_failed > 0 {
        warn!(
            failed = summary.sources_failed,
            ok = summary.sources_ok,
            "some status sources could not be fetched"
        );
    }

    match cli.cmd {
        Cmd::Names => {
            for name in registry.resource_names() {
                println!("{name}");
            }
        }
        Cmd::Status { names } => {
            for (name, resource) in registry.get_resources(&names) {
                println!("{name}: {}", resource.status);
            }
        }
        Cmd::Gate {
            resources,
            max_wait_secs,
            poll_interval_secs,
            report,
        } => {
            if !resources.is_empty() {
                cfg.gate.resources = resources;
            }
            if let Some(secs) = max_wait_secs {
                cfg.gate.max_wait_secs = Some(secs);
            }
            if let Some(secs) = poll_interval_secs {
                cfg.gate.poll_interval_secs = secs;
            }
            run_gate(registry, &cfg, report).await?;
        }
    }

    Ok(())
}

async fn run_gate(
    registry: Arc<ResourceRegistry>,
    cfg: &Config,
    report_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let required = &cfg.gate.resources;
    if required.is_empty() {
        bail!("no resources to gate on (use --resource or gate.resources)");
    }

    if !cfg.gate.enabled {
        info!("gating disabled, reporting statuses only");
        for (name, resource) in registry.get_resources(required) {
            println!("{name}: {}", resource.status);
        }
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let refresher = registry.spawn_refresher(cancel.child_token());

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("abort requested");
                cancel.cancel();
            }
        });
    }

    let engine = GatingEngine::new(Arc::clone(&registry));
    let report = engine
        .gate(required, &cfg.gate_options(), &cancel, &TracingLog)
        .await;

    cancel.cancel();
    if let Err(e) = refresher.await {
        warn!(error = %e, "refresher task failed");
    }

    print_report(&report);
    if let Some(path) = report_path {
        write_report(&path, &report).await?;
    }

    report.check()?;
    Ok(())
}

fn print_report(report: &GatingReport) {
    println!("gate {} {}", report.gate_id(), report.outcome());
    for (name, m) in report.gating_metrics_map() {
        println!(
            "  {name}: {} -> {} after {}s{}",
            m.initial_status(),
            m.final_status(),
            m.gated_time_elapsed().as_secs(),
            if m.timed_out() { " (timed out)" } else { "" }
        );
    }
}

async fn write_report(path: &Path, report: &GatingReport) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(report)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("write {}", path.display()))?;
    info!(path = %path.display(), "gating report written");
    Ok(())
}
