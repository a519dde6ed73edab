use crate::accident::AccidentPolicy;
use crate::perception::DetectionLabels;
use crate::signal::PhaseTimings;
use crate::signal::actuator::LampPins;
use crate::storage::records::GeoPoint;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_REGIONS_PATH: &str = "config/regions.json";
pub const DEFAULT_STORAGE_PATH: &str = "data";
pub const DEFAULT_SERVER_PORT: u16 = 8765;
pub const DEFAULT_TICK_MS: u64 = 100;
pub const DEFAULT_DENSITY_INTERVAL_SECS: u64 = 1800;
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 50;
pub const DEFAULT_LINE_DELAY_MS: u64 = 50;
pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_LOCATION: GeoPoint = GeoPoint {
    latitude: 12.312735,
    longitude: 76.583278,
};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub intersection: Option<IntersectionSection>,
    #[serde(default)]
    pub signal: Option<SignalSection>,
    #[serde(default)]
    pub telemetry: Option<TelemetrySection>,
    #[serde(default)]
    pub accident: Option<AccidentSection>,
    #[serde(default)]
    pub actuator: Option<ActuatorSection>,
    #[serde(default)]
    pub storage: Option<StorageSection>,
    #[serde(default)]
    pub perception: Option<PerceptionSection>,
    #[serde(default)]
    pub gateway: Option<GatewaySection>,
    #[serde(default)]
    pub server: Option<ServerSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IntersectionSection {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// JSON region map; declaration order is the signal ring order.
    pub regions_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SignalSection {
    pub green_low_secs: Option<f64>,
    pub green_high_secs: Option<f64>,
    pub green_threshold: Option<u32>,
    pub yellow_secs: Option<f64>,
    /// Evaluation period of the phase loop (default: 100ms)
    pub tick_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelemetrySection {
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AccidentSection {
    pub poll_ms: Option<u64>,
    pub major_count_threshold: Option<u32>,
    pub confidence_threshold: Option<f64>,
    pub min_gap_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorKind {
    #[default]
    Log,
    Serial,
    Gpio,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ActuatorSection {
    #[serde(default)]
    pub kind: ActuatorKind,
    /// Serial device path for the `serial` actuator.
    pub device: Option<PathBuf>,
    /// Serial line speed, 8N1 (default: 9600).
    pub baud: Option<u32>,
    pub line_delay_ms: Option<u64>,
    /// Lamp pins per region for the `gpio` actuator.
    #[serde(default)]
    pub pins: BTreeMap<String, LampPins>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSection {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PerceptionSection {
    /// JSON-lines detection replay; empty or missing means HTTP ingestion only.
    pub replay_path: Option<PathBuf>,
    pub interval_ms: Option<u64>,
    pub vehicle_label: Option<String>,
    pub accident_label: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewaySection {
    pub frame_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port to listen on (default: 8765)
    pub port: Option<u16>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

fn secs(value: Option<f64>, default: f64, field: &str) -> Result<Duration, ConfigError> {
    let value = value.unwrap_or(default);
    Duration::try_from_secs_f64(value)
        .map_err(|_| ConfigError::Invalid(format!("{field} must be a non-negative number, got {value}")))
}

fn non_empty(path: Option<&Path>) -> Option<&Path> {
    path.filter(|path| !path.as_os_str().is_empty())
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        self.phase_timings()?;
        self.accident_policy()?;
        if self.actuator_kind() == ActuatorKind::Serial && self.actuator_device().is_none() {
            return Err(ConfigError::Invalid(
                "actuator.device is required for the serial actuator".to_string(),
            ));
        }
        if self.actuator_baud() == 0 {
            return Err(ConfigError::Invalid(
                "actuator.baud must be greater than zero".to_string(),
            ));
        }
        if self.density_interval().is_zero() {
            return Err(ConfigError::Invalid(
                "telemetry.interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn location(&self) -> GeoPoint {
        let section = self.intersection.as_ref();
        GeoPoint {
            latitude: section
                .and_then(|s| s.latitude)
                .unwrap_or(DEFAULT_LOCATION.latitude),
            longitude: section
                .and_then(|s| s.longitude)
                .unwrap_or(DEFAULT_LOCATION.longitude),
        }
    }

    pub fn regions_path(&self) -> &Path {
        non_empty(
            self.intersection
                .as_ref()
                .and_then(|s| s.regions_path.as_deref()),
        )
        .unwrap_or(Path::new(DEFAULT_REGIONS_PATH))
    }

    pub fn phase_timings(&self) -> Result<PhaseTimings, ConfigError> {
        let section = self.signal.as_ref();
        let defaults = PhaseTimings::default();
        Ok(PhaseTimings {
            green_low: secs(
                section.and_then(|s| s.green_low_secs),
                defaults.green_low.as_secs_f64(),
                "signal.green_low_secs",
            )?,
            green_high: secs(
                section.and_then(|s| s.green_high_secs),
                defaults.green_high.as_secs_f64(),
                "signal.green_high_secs",
            )?,
            green_threshold: section
                .and_then(|s| s.green_threshold)
                .unwrap_or(defaults.green_threshold),
            yellow: secs(
                section.and_then(|s| s.yellow_secs),
                defaults.yellow.as_secs_f64(),
                "signal.yellow_secs",
            )?,
        })
    }

    /// Returns the phase evaluation period (default: 100ms)
    pub fn signal_tick(&self) -> Duration {
        let ms = self
            .signal
            .as_ref()
            .and_then(|s| s.tick_ms)
            .unwrap_or(DEFAULT_TICK_MS);
        Duration::from_millis(ms.max(1))
    }

    /// Returns the traffic density log interval (default: 1800 seconds)
    pub fn density_interval(&self) -> Duration {
        let secs = self
            .telemetry
            .as_ref()
            .and_then(|s| s.interval_secs)
            .unwrap_or(DEFAULT_DENSITY_INTERVAL_SECS);
        Duration::from_secs(secs)
    }

    pub fn accident_policy(&self) -> Result<AccidentPolicy, ConfigError> {
        let section = self.accident.as_ref();
        let defaults = AccidentPolicy::default();
        Ok(AccidentPolicy {
            major_count_threshold: section
                .and_then(|s| s.major_count_threshold)
                .unwrap_or(defaults.major_count_threshold),
            confidence_threshold: section
                .and_then(|s| s.confidence_threshold)
                .unwrap_or(defaults.confidence_threshold),
            min_gap: secs(
                section.and_then(|s| s.min_gap_secs),
                defaults.min_gap.as_secs_f64(),
                "accident.min_gap_secs",
            )?,
        })
    }

    /// Returns the accident poll period (default: 100ms)
    pub fn accident_poll(&self) -> Duration {
        let ms = self
            .accident
            .as_ref()
            .and_then(|s| s.poll_ms)
            .unwrap_or(DEFAULT_TICK_MS);
        Duration::from_millis(ms.max(1))
    }

    pub fn actuator_kind(&self) -> ActuatorKind {
        self.actuator
            .as_ref()
            .map(|s| s.kind)
            .unwrap_or_default()
    }

    pub fn actuator_device(&self) -> Option<&Path> {
        non_empty(self.actuator.as_ref().and_then(|s| s.device.as_deref()))
    }

    pub fn actuator_baud(&self) -> u32 {
        self.actuator
            .as_ref()
            .and_then(|s| s.baud)
            .unwrap_or(DEFAULT_BAUD_RATE)
    }

    pub fn actuator_line_delay(&self) -> Duration {
        let ms = self
            .actuator
            .as_ref()
            .and_then(|s| s.line_delay_ms)
            .unwrap_or(DEFAULT_LINE_DELAY_MS);
        Duration::from_millis(ms)
    }

    pub fn actuator_pins(&self) -> BTreeMap<String, LampPins> {
        self.actuator
            .as_ref()
            .map(|s| s.pins.clone())
            .unwrap_or_default()
    }

    pub fn storage_path(&self) -> &Path {
        non_empty(self.storage.as_ref().and_then(|s| s.path.as_deref()))
            .unwrap_or(Path::new(DEFAULT_STORAGE_PATH))
    }

    pub fn replay_path(&self) -> Option<&Path> {
        non_empty(self.perception.as_ref().and_then(|s| s.replay_path.as_deref()))
    }

    /// Returns the replay frame period (default: 100ms)
    pub fn perception_interval(&self) -> Duration {
        let ms = self
            .perception
            .as_ref()
            .and_then(|s| s.interval_ms)
            .unwrap_or(DEFAULT_TICK_MS);
        Duration::from_millis(ms.max(1))
    }

    pub fn detection_labels(&self) -> DetectionLabels {
        let defaults = DetectionLabels::default();
        let section = self.perception.as_ref();
        DetectionLabels {
            vehicle: section
                .and_then(|s| s.vehicle_label.clone())
                .unwrap_or(defaults.vehicle),
            accident: section
                .and_then(|s| s.accident_label.clone())
                .unwrap_or(defaults.accident),
        }
    }

    /// Returns the dashboard streaming period (default: 50ms)
    pub fn frame_interval(&self) -> Duration {
        let ms = self
            .gateway
            .as_ref()
            .and_then(|s| s.frame_interval_ms)
            .unwrap_or(DEFAULT_FRAME_INTERVAL_MS);
        Duration::from_millis(ms.max(1))
    }

    /// Returns the server port (default: 8765)
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }
}
