use anyhow::Context;
use axum::{response::IntoResponse, routing::get, Router};
use clap::{Parser, Subcommand};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use uncpmu::common::pci::scan_devices;
use uncpmu::common::{HardwareAccess, MemoryRegisters, RegisterAccess, SysfsTopology, CPU_GENERATION};
use uncpmu::uncore::{pmu_name, resolve_event, UncoreBox};
use uncpmu::{EngineConfig, UncoreContext, UncoreMetricExporter, UncorePoller};
use uncpmu_raw::{Generation, UncoreType};

#[derive(Parser, Debug)]
#[command(name = "uncpmu")]
#[command(about = "Uncore performance monitoring for Intel Xeon processors")]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[arg(long, global = true, help = "Uncore generation (snbep, ivbep, hswep, bdx, knl, skx); detected when omitted")]
    generation: Option<String>,

    #[arg(long, global = true, help = "JSON configuration file")]
    config: Option<PathBuf>,

    #[arg(
        short,
        long,
        global = true,
        help = "Enable verbose logging (shows all MSR/PCI read/write operations)"
    )]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the unit types of the generation
    List {
        #[arg(long, help = "Print JSON instead of a table")]
        json: bool,
    },
    /// Check that a group of events can be scheduled together on one PMU
    Validate {
        #[arg(long, help = "PMU name such as uncore_cbox_0")]
        pmu: String,
        #[arg(long = "event", required = true, action = clap::ArgAction::Append)]
        events: Vec<String>,
    },
    /// Program the configured events and serve them on /metrics
    Monitor {
        #[arg(long, help = "Use in-memory registers instead of the hardware")]
        dry_run: bool,
        #[arg(long, default_value = "0.0.0.0:8080")]
        listen: SocketAddr,
    },
}

#[derive(Serialize)]
struct TypeSummary {
    name: &'static str,
    access: String,
    boxes: usize,
    counters: usize,
    counter_bits: u32,
    fixed_counter_bits: Option<u32>,
    formats: Vec<&'static str>,
    events: Vec<&'static str>,
}

impl TypeSummary {
    fn new(ty: &UncoreType) -> Self {
        Self {
            name: ty.name,
            access: format!("{:?}", ty.access),
            boxes: ty.num_boxes,
            counters: ty.num_counters,
            counter_bits: ty.perf_ctr_bits,
            fixed_counter_bits: ty.has_fixed().then_some(ty.fixed_ctr_bits),
            formats: ty.formats.iter().map(|f| f.name).collect(),
            events: ty.event_descs.iter().map(|d| d.name).collect(),
        }
    }
}

struct AppState {
    exporter: Arc<UncoreMetricExporter>,
}

async fn metrics_handler(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    uncpmu::encode_registries!(
        buffer,
        encoder,
        state.exporter.registry(),
        prometheus::default_registry()
    );

    let content_type = encoder.format_type().to_string();
    (
        [("Content-Type", content_type)],
        String::from_utf8(buffer).unwrap_or_default(),
    )
}

/// `RUST_LOG` directives when set and valid, else the `--verbose` level
fn log_filter(verbose: bool, directives: Option<String>) -> EnvFilter {
    let level = if verbose { "debug" } else { "info" };
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(level))
}

fn check_permissions() {
    let msr_path = "/dev/cpu/0/msr";
    if std::fs::metadata(msr_path).is_err() {
        eprintln!("\nERROR: Cannot access {msr_path}\n\nThe MSR kernel module may not be loaded.\nRun: sudo modprobe msr\n");
        std::process::exit(1);
    }

    if let Err(e) = std::fs::File::open(msr_path) {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            eprintln!("\nERROR: Permission denied accessing {msr_path}\n\nRun as root or use --dry-run\n");
            std::process::exit(1);
        }
    }
}

fn resolve_generation(name: Option<&str>) -> anyhow::Result<Generation> {
    match name {
        Some(name) => Generation::from_name(name)
            .with_context(|| format!("unknown generation {name}")),
        None => CPU_GENERATION
            .as_ref()
            .copied()
            .context("this processor has no supported uncore; pass --generation"),
    }
}

fn all_types(generation: Generation) -> impl Iterator<Item = &'static UncoreType> {
    generation
        .msr_uncores()
        .iter()
        .chain(generation.pci_uncores())
        .copied()
}

fn list(generation: Generation, json: bool) -> anyhow::Result<()> {
    let summaries: Vec<TypeSummary> = all_types(generation).map(TypeSummary::new).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    println!("{} uncore units", generation);
    println!("{:<10} {:<4} {:>5} {:>8} {:>5} {:>5}", "TYPE", "BUS", "BOXES", "COUNTERS", "BITS", "FIXED");
    for s in &summaries {
        println!(
            "{:<10} {:<4} {:>5} {:>8} {:>5} {:>5}",
            s.name,
            s.access,
            s.boxes,
            s.counters,
            s.counter_bits,
            s.fixed_counter_bits.map_or_else(|| "-".to_string(), |b| b.to_string())
        );
    }
    Ok(())
}

fn validate(generation: Generation, config: &EngineConfig, pmu: &str, specs: &[String]) -> anyhow::Result<()> {
    let (ty, idx) = all_types(generation)
        .flat_map(|ty| (0..ty.num_boxes).map(move |i| (ty, i)))
        .find(|&(ty, i)| pmu_name(ty, i, ty.num_boxes) == pmu)
        .with_context(|| format!("{generation} has no PMU named {pmu}"))?;

    let scratch = UncoreBox::fake(ty, idx, config.ref_limit);
    let mut group = Vec::with_capacity(specs.len());
    for spec in specs {
        let (attr, _) = resolve_event(ty, spec).with_context(|| format!("event {spec}"))?;
        let event = scratch
            .event_init(idx, attr)
            .with_context(|| format!("event {spec}"))?;
        tracing::debug!("{} -> config {:#x} config1 {:#x} config2 {:#x}", spec, attr.config, attr.config1, attr.config2);
        group.push(event);
    }

    scratch.validate_group(&group)?;
    println!("{} events fit on {}", group.len(), pmu);
    Ok(())
}

async fn monitor(
    generation: Generation,
    config: EngineConfig,
    dry_run: bool,
    listen: SocketAddr,
) -> anyhow::Result<()> {
    let (access, devices): (Arc<dyn RegisterAccess>, _) = if dry_run {
        tracing::warn!("Dry run: registers are simulated in memory");
        (Arc::new(MemoryRegisters::new()), Vec::new())
    } else {
        check_permissions();
        let devices = scan_devices().unwrap_or_else(|e| {
            tracing::warn!("PCI scan failed: {}", e);
            Vec::new()
        });
        (Arc::new(HardwareAccess), devices)
    };

    let poll_interval = config.poll_interval();
    let context = Arc::new(UncoreContext::new(
        generation,
        config,
        access,
        Arc::new(SysfsTopology),
    ));
    context.init(&devices)?;

    let exporter = Arc::new(UncoreMetricExporter::new(&context)?);
    let cancel_token = CancellationToken::new();
    let poll_handle = UncorePoller::new(context.clone(), Some(exporter.clone()), poll_interval)
        .start(cancel_token.clone());

    let app_state = Arc::new(AppState {
        exporter: exporter.clone(),
    });
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(app_state);

    tracing::warn!("Starting HTTP server on {}", listen);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel_token))
        .await?;

    tracing::info!("Server shutdown complete, waiting for the poller to finish...");
    if let Err(e) = poll_handle.await {
        tracing::error!("Poller task failed: {}", e);
    }

    exporter.release();
    context.exit();
    tracing::info!("All boxes released, exiting");
    Ok(())
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::warn!("Shutdown triggered by Ctrl+C");
        },
        _ = terminate => {
            tracing::warn!("Shutdown triggered by SIGTERM");
        },
    }

    cancel_token.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = log_filter(args.verbose, std::env::var(EnvFilter::DEFAULT_ENV).ok());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let generation = resolve_generation(args.generation.as_deref())?;

    match args.command {
        Command::List { json } => list(generation, json),
        Command::Validate { pmu, events } => validate(generation, &config, &pmu, &events),
        Command::Monitor { dry_run, listen } => monitor(generation, config, dry_run, listen).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_prefers_environment() {
        let filter = log_filter(false, Some("uncpmu=trace".to_string()));
        assert_eq!(filter.to_string(), "uncpmu=trace");
    }

    #[test]
    fn test_log_filter_falls_back_to_verbosity() {
        assert_eq!(log_filter(true, None).to_string(), "debug");
        assert_eq!(log_filter(false, None).to_string(), "info");
    }
}
