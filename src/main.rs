//! # Telemetry Deriver
//!
//! Runs the VPS widget model against a simulated aircraft.
//!
//! This application publishes scripted telemetry onto an in-memory bus,
//! derives the VPS widget state from it, logs every transition and records
//! it to rotating JSONL files.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use telemetry_deriver::bus::InMemoryBus;
use telemetry_deriver::config::{Config, LoggingConfig, WidgetConfig};
use telemetry_deriver::deriver::DerivedState;
use telemetry_deriver::preferences::GlobalPreferences;
use telemetry_deriver::simulation::SimulatedAircraft;
use telemetry_deriver::telemetry::TransitionRecorder;
use telemetry_deriver::widgets::vps::{VpsState, VpsWidgetModel};

/// Configuration file used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// File name prefix of daily rotated log files
const LOG_FILE_PREFIX: &str = "telemetry-deriver.log";

/// Main entry point for the telemetry deriver
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (first argument, or `config/default.toml`)
///    - Set up logging with tracing subscriber
///    - Register simulated producers and set up the VPS widget model
///
/// 2. **Main Loop**
///    - Advance the simulated aircraft every `update_interval_ms`
///    - Log and record every VPS state transition
///    - Handle Ctrl+C for graceful shutdown
///
/// 3. **Graceful Shutdown**
///    - Tear down the widget model
///    - Log the number of recomputations
///
/// # Errors
///
/// Returns error if:
/// - The configuration file exists but is invalid
/// - The widget model cannot bind its signals
/// - The transition log directory cannot be created
///
/// # Examples
///
/// ```bash
/// cargo run --release -- config/default.toml
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&config_path)?;

    let _log_guard = init_logging(&config.logging);
    info!("Telemetry Deriver v{} starting...", env!("CARGO_PKG_VERSION"));

    let bus = Arc::new(InMemoryBus::new());
    let aircraft = SimulatedAircraft::register(&bus);
    let preferences = Arc::new(GlobalPreferences::new(config.widget.default_unit));

    let model = build_model(&bus, &preferences, &config.widget);
    model.setup().context("Failed to set up VPS widget model")?;

    let mut recorder = if config.recorder.enabled {
        Some(TransitionRecorder::new(
            &config.recorder.log_dir,
            config.recorder.max_records_per_file,
            config.recorder.max_files_to_keep,
        )?)
    } else {
        None
    };

    let mut states = model.subscribe();
    report(&states.borrow_and_update().clone(), recorder.as_mut());

    let mut tick = interval(Duration::from_millis(config.simulation.update_interval_ms));
    let mut step: u64 = 0;

    if config.simulation.enabled {
        info!(
            "Simulating aircraft telemetry every {}ms",
            config.simulation.update_interval_ms
        );
    }
    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            _ = tick.tick(), if config.simulation.enabled => {
                aircraft.step(step, &preferences);
                step += 1;
            }

            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                report(&state, recorder.as_mut());
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    model.teardown();
    info!("Total recomputations: {}", model.recomputations());

    Ok(())
}

/// Creates the VPS widget model following the shared unit preference
fn build_model(
    bus: &Arc<InMemoryBus>,
    preferences: &Arc<GlobalPreferences>,
    widget: &WidgetConfig,
) -> VpsWidgetModel<InMemoryBus> {
    VpsWidgetModel::new_vps(Arc::clone(bus))
        .with_preferences(preferences.clone())
        .with_required_signals(widget.required_signals.iter().cloned())
}

/// Loads the configuration file, falling back to defaults if it does not exist
fn load_config(path: &str) -> Result<Config> {
    if Path::new(path).exists() {
        Config::load(path).with_context(|| format!("Failed to load configuration from {}", path))
    } else {
        Ok(Config::default())
    }
}

/// Initializes the tracing subscriber
///
/// `RUST_LOG` overrides the configured level. The returned guard flushes
/// file output and must live until shutdown.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.file_dir.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(&config.file_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Some(guard)
}

/// Logs a VPS state transition and records it if a recorder is configured
fn report(state: &VpsState, recorder: Option<&mut TransitionRecorder>) {
    info!("VPS: {}", describe(state));

    if let Some(recorder) = recorder {
        if let Err(e) = recorder.record("vps", state) {
            warn!("Failed to record VPS transition: {}", e);
        }
    }
}

/// Human-readable form of a VPS state
fn describe(state: &VpsState) -> String {
    match state {
        DerivedState::Disconnected => "disconnected".to_string(),
        DerivedState::Disabled => "disabled".to_string(),
        DerivedState::Enabled(height) => format!("height {}", height),
    }
}
