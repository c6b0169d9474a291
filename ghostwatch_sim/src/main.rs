//! GhostWatch CLI
//!
//! Live map of a vehicle feed with ghost vehicles marked, or deterministic
//! pipeline scenarios for CI.

use clap::Parser;
use ghostwatch_core::{
    filter_channel, ConfigError, DisplayFilter, FleetRuntime, IngestError, RenderSurface, StreamIngestor,
    ViewerConfig,
};
use ghostwatch_env::{ChannelTransport, FeedError, FeedTransport, TokioContext, WebSocketTransport};
use ghostwatch_sim::{default_period, serve_city, CityPublisher, LogSurface, ScenarioId, ScenarioResult, ScenarioRunner};
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Frames buffered between the simulated city and the viewer.
const CITY_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Usage(String),
}

/// GhostWatch live ghost-vehicle map
#[derive(Parser, Debug)]
#[command(name = "ghostwatch")]
#[command(about = "Live transit map that marks each vehicle as real or ghost", long_about = None)]
struct Args {
    /// WebSocket endpoint of the vehicle feed (default: simulated city)
    #[arg(short, long)]
    url: Option<String>,

    /// Run a scenario instead of the viewer (baseline, malformed_payload,
    /// connection_loss, viewport_handoff, city, all)
    #[arg(short = 'S', long)]
    scenario: Option<String>,

    /// Seed for scenarios and the simulated city
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Simulated duration in seconds (city scenario)
    #[arg(short, long, default_value = "120")]
    duration: f64,

    /// JSON scenario summary for CI parsing
    #[arg(long)]
    json: bool,

    /// Write frame-by-frame scenario output to a JSON file
    #[arg(long)]
    export: Option<String>,

    /// Start with ghost vehicles hidden
    #[arg(long)]
    hide_ghosts: bool,

    /// JSON viewer config file
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Terminal map (requires the `dashboard` feature)
    #[arg(long)]
    dashboard: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    // The terminal map owns the screen; keep logs to errors unless asked
    let level = if args.verbose {
        Level::DEBUG
    } else if args.dashboard {
        Level::ERROR
    } else {
        Level::INFO
    };
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr);
    let installed = match EnvFilter::try_from_default_env() {
        Ok(filter) => tracing::subscriber::set_global_default(builder.with_env_filter(filter).finish()),
        Err(_) => tracing::subscriber::set_global_default(builder.finish()),
    };
    if let Err(e) = installed {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let outcome = match &args.scenario {
        Some(name) => run_scenarios(&args, name).await,
        None => run_viewer(&args).await.map(|()| true),
    };

    match outcome {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

/// Runs the requested scenarios. Ok(false) if any failed.
async fn run_scenarios(args: &Args, name: &str) -> Result<bool, CliError> {
    let scenarios: Vec<ScenarioId> = if name == "all" {
        ScenarioId::all()
    } else {
        vec![name.parse::<ScenarioId>().map_err(|e| {
            CliError::Usage(format!(
                "{e}. Available scenarios: baseline, malformed_payload, connection_loss, viewport_handoff, city, all"
            ))
        })?]
    };
    if args.export.is_some() && scenarios.len() > 1 {
        return Err(CliError::Usage("--export only supports a single scenario, not 'all'".to_string()));
    }

    if !args.json {
        info!("GhostWatch scenario runner v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let runner = ScenarioRunner::new(args.seed).with_duration(args.duration);
    let mut results: Vec<ScenarioResult> = Vec::new();

    for scenario in scenarios {
        let result = match &args.export {
            Some(path) => {
                let (result, export) = runner.run_with_export(scenario).await;
                export.write_to_file(path)?;
                info!("Exported {} frames to {}", export.frames.len(), path);
                result
            }
            None => runner.run(scenario).await,
        };

        if !args.json {
            if result.passed {
                info!("✓ {} (seed={}) PASSED", scenario.name(), result.seed);
            } else {
                error!(
                    "✗ {} (seed={}) FAILED: {}",
                    scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
        results.push(result);
    }

    let total = results.len();
    let failed = results.iter().filter(|r| !r.passed).count();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed,
            "failed": failed,
            "results": results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "ticks": r.total_ticks,
                    "time_secs": r.final_time_secs,
                    "vehicles": r.final_vehicle_count,
                    "failure_reason": r.failure_reason,
                    "metrics": r.metrics,
                })
            }).collect::<Vec<_>>(),
        });
        let text = serde_json::to_string_pretty(&summary)
            .map_err(|e| CliError::Usage(format!("failed to render summary: {e}")))?;
        println!("{}", text);
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed, total);
        }
    }

    Ok(failed == 0)
}

// ============================================================================
// VIEWER
// ============================================================================

/// Config file (if any) overlaid with CLI flags.
fn load_config(args: &Args) -> Result<ViewerConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => ViewerConfig::from_file(path)?,
        None => ViewerConfig::default(),
    };
    if let Some(url) = &args.url {
        config.url = Some(url.clone());
    }
    if args.hide_ghosts {
        config.hide_ghosts = true;
    }
    config.validate()?;
    Ok(config)
}

async fn run_viewer(args: &Args) -> Result<(), CliError> {
    let config = load_config(args)?;

    match config.websocket_config() {
        Some(ws) => {
            info!(url = %ws.url, "Connecting to vehicle feed");
            let transport = WebSocketTransport::connect(ws).await?;
            present(args, &config, transport).await
        }
        None => {
            info!(seed = args.seed, "No feed URL configured; showing the simulated Bangalore fleet");
            let (feed, transport) = ChannelTransport::pair("simulated-city", CITY_CHANNEL_CAPACITY);
            tokio::spawn(serve_city(
                CityPublisher::new(args.seed),
                feed,
                TokioContext::shared(),
                default_period(),
            ));
            present(args, &config, transport).await
        }
    }
}

/// Runs the pipeline until Ctrl-C (or `q` on the terminal map).
async fn present<T: FeedTransport>(args: &Args, config: &ViewerConfig, transport: T) -> Result<(), CliError> {
    let (filter_control, filter_rx) = filter_channel(config.initial_filter());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if args.dashboard {
        return present_dashboard(config, transport, filter_control, filter_rx, shutdown_tx, shutdown_rx).await;
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            shutdown_tx.send_replace(true);
        }
    });

    // Headless: no one toggles the filter, it stays as configured
    let _filter_control = filter_control;
    let mut runtime = FleetRuntime::new(TokioContext::shared(), LogSurface::new(), config.runtime_config());
    drive(&mut runtime, transport, filter_rx, shutdown_rx).await
}

async fn drive<T: FeedTransport, S: RenderSurface>(
    runtime: &mut FleetRuntime<TokioContext, S>,
    transport: T,
    filter_rx: watch::Receiver<DisplayFilter>,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<(), CliError> {
    let mut ingestor = StreamIngestor::new(transport);
    runtime.run(&mut ingestor, filter_rx, shutdown_rx).await?;
    let stats = runtime.stats();
    info!(
        vehicles = stats.total,
        ghosts = stats.ghosts,
        status = %runtime.status(),
        "Viewer closed"
    );
    Ok(())
}

#[cfg(feature = "dashboard")]
async fn present_dashboard<T: FeedTransport>(
    config: &ViewerConfig,
    transport: T,
    filter_control: ghostwatch_core::FilterControl,
    filter_rx: watch::Receiver<DisplayFilter>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<(), CliError> {
    use ghostwatch_core::{terminal_channel, MapDashboard};

    let (surface, ops) = terminal_channel();
    let mut runtime = FleetRuntime::new(TokioContext::shared(), surface, config.runtime_config());
    let status = runtime.status_receiver();

    let ui = std::thread::spawn(move || MapDashboard::new(ops, filter_control, status, shutdown_tx).run());

    let result = drive(&mut runtime, transport, filter_rx, shutdown_rx).await;
    // Dropping the surface tells the map to exit
    drop(runtime);

    match ui.join() {
        Ok(ui_result) => ui_result?,
        Err(_) => return Err(CliError::Usage("terminal map thread panicked".to_string())),
    }
    result
}

#[cfg(not(feature = "dashboard"))]
async fn present_dashboard<T: FeedTransport>(
    _config: &ViewerConfig,
    _transport: T,
    _filter_control: ghostwatch_core::FilterControl,
    _filter_rx: watch::Receiver<DisplayFilter>,
    _shutdown_tx: watch::Sender<bool>,
    _shutdown_rx: watch::Receiver<bool>,
) -> Result<(), CliError> {
    Err(CliError::Usage(
        "--dashboard requires building with `--features dashboard`".to_string(),
    ))
}
