use junction_flow::accident::{AccidentReporter, spawn_accident_thread};
use junction_flow::api::{self, GatewayState};
use junction_flow::config::{self, ActuatorKind, Config};
use junction_flow::error::{AppError, InitError};
use junction_flow::perception::replay::ReplaySource;
use junction_flow::perception::spawn_perception_thread;
use junction_flow::region::RegionMap;
use junction_flow::signal::SignalController;
#[cfg(target_os = "linux")]
use junction_flow::signal::actuator::LineActuator;
use junction_flow::signal::actuator::{LogActuator, SignalActuator};
use junction_flow::signal::runner::{ControllerLoop, spawn_controller_thread};
use junction_flow::signal::telemetry::{DensityLogger, spawn_density_thread};
use junction_flow::state::{AppState, Observation, SharedObservation};
use junction_flow::storage::Storage;
use junction_flow::storage::file::FileStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const DENSITY_POLL: Duration = Duration::from_secs(1);

fn init_tracing(level: &str) {
    let parsed = level.parse::<tracing::Level>().ok();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(parsed.unwrap_or(tracing::Level::INFO))
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
    if parsed.is_none() {
        tracing::warn!(level, "Unknown log level, using info");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_PATH));
    let config = match config::load_from_path(&config_path) {
        Ok(config) => config,
        Err(err) => {
            init_tracing("info");
            let err = InitError::from(err);
            tracing::error!(path = %config_path.display(), error = %err, "Startup failed");
            return ExitCode::from(err.exit_code());
        }
    };
    init_tracing(&config.logging.level);
    tracing::info!(
        config_path = %config_path.display(),
        name = %config.app.name,
        "junction-flow starting"
    );

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "Startup failed");
            ExitCode::from(err.exit_code())
        }
    }
}

async fn run(config: Config) -> Result<(), InitError> {
    let regions = Arc::new(RegionMap::load_from_path(config.regions_path())?);
    tracing::info!(
        path = %config.regions_path().display(),
        regions = ?regions.names().collect::<Vec<_>>(),
        "Region map loaded"
    );
    let timings = config.phase_timings()?;
    let policy = config.accident_policy()?;
    let location = config.location();

    let storage: Arc<dyn Storage> =
        Arc::new(FileStore::open(config.storage_path()).map_err(InitError::Storage)?);
    tracing::info!(path = %config.storage_path().display(), "Record store opened");

    let actuator = build_actuator(&config).map_err(InitError::Actuator)?;

    let observation = SharedObservation::new(Observation::empty(regions.names()));
    let state = Arc::new(RwLock::new(AppState::new()));
    let stop = Arc::new(AtomicBool::new(false));
    let mut workers: Vec<JoinHandle<()>> = Vec::new();

    let ring: Vec<String> = regions.names().map(str::to_string).collect();
    let controller = SignalController::new(ring, timings).map_err(InitError::Controller)?;
    let control = ControllerLoop::new(
        controller,
        actuator,
        observation.clone(),
        Arc::clone(&state),
    );
    tracing::info!(
        tick_ms = config.signal_tick().as_millis(),
        "Starting signal controller thread"
    );
    workers.push(spawn_controller_thread(
        control,
        config.signal_tick(),
        Arc::clone(&stop),
    ));

    let density = DensityLogger::new(
        Arc::clone(&storage),
        observation.clone(),
        location,
        config.density_interval(),
        Instant::now(),
    );
    workers.push(spawn_density_thread(
        density,
        DENSITY_POLL.min(config.density_interval()),
        Arc::clone(&stop),
    ));

    let reporter = AccidentReporter::new(
        policy,
        location,
        observation.clone(),
        Arc::clone(&storage),
        Arc::clone(&state),
    );
    workers.push(spawn_accident_thread(
        reporter,
        config.accident_poll(),
        Arc::clone(&stop),
    ));

    if let Some(path) = config.replay_path() {
        match ReplaySource::load(path) {
            Ok(source) => {
                tracing::info!(path = %path.display(), "Replaying recorded detections");
                workers.push(spawn_perception_thread(
                    source,
                    Arc::clone(&regions),
                    config.detection_labels(),
                    observation.clone(),
                    config.perception_interval(),
                    Arc::clone(&stop),
                ));
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Detection replay not started");
            }
        }
    }

    let app = api::router(GatewayState {
        observation,
        app: Arc::clone(&state),
        storage,
        regions,
        labels: Arc::new(config.detection_labels()),
        frame_interval: config.frame_interval(),
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port()));
    let served = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            tracing::info!(%addr, "Gateway listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
        }
        Err(err) => Err(err),
    };

    stop.store(true, Ordering::Relaxed);
    let panicked = join_workers(workers).await;
    if panicked > 0 {
        tracing::warn!(panicked, "Worker threads panicked during shutdown");
    }
    tracing::info!("junction-flow stopped");
    served.map_err(InitError::Server)
}

/// Join the control loop threads on the blocking pool. Returns how many panicked.
async fn join_workers(workers: Vec<JoinHandle<()>>) -> usize {
    let count = workers.len();
    let joined = tokio::task::spawn_blocking(move || {
        workers
            .into_iter()
            .map(JoinHandle::join)
            .filter(Result::is_err)
            .count()
    })
    .await;
    joined.unwrap_or_else(|err| {
        tracing::warn!(error = %err, "Worker join task failed");
        count
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

fn build_actuator(config: &Config) -> Result<Box<dyn SignalActuator>, AppError> {
    match config.actuator_kind() {
        ActuatorKind::Log => {
            tracing::warn!("No lamp hardware configured, logging lamp commands only");
            Ok(Box::new(LogActuator))
        }
        ActuatorKind::Serial => build_serial_actuator(config),
        ActuatorKind::Gpio => build_gpio_actuator(config),
    }
}

#[cfg(target_os = "linux")]
fn build_serial_actuator(config: &Config) -> Result<Box<dyn SignalActuator>, AppError> {
    let device = config.actuator_device().ok_or_else(|| {
        AppError::Actuator("actuator.device is required for serial".to_string())
    })?;
    let baud = config.actuator_baud();
    let actuator = LineActuator::open_serial(device, baud, config.actuator_line_delay())?;
    tracing::info!(device = %device.display(), baud, "Serial lamp controller opened");
    Ok(Box::new(actuator))
}

#[cfg(not(target_os = "linux"))]
fn build_serial_actuator(config: &Config) -> Result<Box<dyn SignalActuator>, AppError> {
    let _ = config;
    Err(AppError::Actuator(
        "serial lamp controller requires Linux".to_string(),
    ))
}

#[cfg(target_os = "linux")]
fn build_gpio_actuator(config: &Config) -> Result<Box<dyn SignalActuator>, AppError> {
    let pins = config.actuator_pins();
    let actuator = junction_flow::signal::actuator::GpioActuator::new(&pins)?;
    tracing::info!(regions = pins.len(), "GPIO lamp outputs configured");
    Ok(Box::new(actuator))
}

#[cfg(not(target_os = "linux"))]
fn build_gpio_actuator(config: &Config) -> Result<Box<dyn SignalActuator>, AppError> {
    let _ = config;
    Err(AppError::Gpio(
        "GPIO lamps require Linux/Raspberry Pi".to_string(),
    ))
}
