//! Configuration System using Figment
//!
//! Settings are assembled from, in order of precedence:
//! 1. Built-in defaults (the values the rig was commissioned with)
//! 2. A TOML file (default: `config/traverse.toml`, if present)
//! 3. Environment variables prefixed with `TRAVERSE_`, with `__` separating key paths
//!
//! CLI flags are applied on top by the binary.
//!
//! # Environment Variable Overrides
//!
//! ```text
//! TRAVERSE_TRAVERSE__TRAVEL_THRESHOLD=5000000
//! TRAVERSE_ACTUATOR__LOCATOR="usb:ix:1"
//! TRAVERSE_SAMPLER__READ_TIMEOUT=5s
//! ```
//!
//! # Example
//!
//! ```toml
//! [actuator]
//! speed = 1000000
//! position_timeout = "1s"
//!
//! [sampler]
//! physical_channel = "Dev1/ai1"
//! max_voltage = 5.0
//!
//! [traverse]
//! travel_threshold = 20000000
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppResult, DaqError};
use crate::measurement::ChannelId;

/// Location of the settings file when none is given explicitly.
pub const DEFAULT_CONFIG_PATH: &str = "config/traverse.toml";

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "TRAVERSE_";

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Logging and run identification.
    pub application: ApplicationConfig,
    /// Positioning controller and motion.
    pub actuator: ActuatorConfig,
    /// Analog acquisition.
    pub sampler: SamplerConfig,
    /// Stop condition.
    pub traverse: TraverseConfig,
    /// Log output.
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Positioning controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    /// Controller locator, e.g. `usb:ix:0`
    pub locator: String,
    /// Communication mode passed to the controller when opening it
    pub options: String,
    /// Channel that is driven and polled
    pub channel: ChannelId,
    /// Second axis; stopped and tuned alongside the driven one, never polled
    pub auxiliary_channel: ChannelId,
    /// Closed-loop move speed
    pub speed: u32,
    /// Closed-loop move acceleration
    pub acceleration: u32,
    /// Enable the controller's low-vibration operation mode
    pub low_vibration: bool,
    /// Absolute target for the long-travel move, in ticks
    pub home_target: i64,
    /// Hold time passed with the absolute move
    pub hold_time: u32,
    /// Receive timeout for one position response
    #[serde(with = "humantime_serde")]
    pub position_timeout: Duration,
    /// Readings to discard after the long-travel move is issued
    pub stale_readings: usize,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            locator: "usb:ix:0".to_string(),
            options: "async".to_string(),
            channel: ChannelId(0),
            auxiliary_channel: ChannelId(1),
            speed: 2_000_000,
            acceleration: 20_000,
            low_vibration: true,
            home_target: -1_000_000_000,
            hold_time: 1,
            position_timeout: Duration::from_secs(1),
            stale_readings: 3,
        }
    }
}

impl ActuatorConfig {
    /// Channels the controller must expose.
    pub fn required_channels(&self) -> u32 {
        self.channel.0.max(self.auxiliary_channel.0) + 1
    }

    /// Tuning applied to both channels at bring-up.
    pub fn motion_profile(&self) -> MotionProfile {
        MotionProfile {
            speed: self.speed,
            acceleration: self.acceleration,
            low_vibration: self.low_vibration,
        }
    }
}

/// Per-channel tuning applied during bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionProfile {
    /// Closed-loop speed
    pub speed: u32,
    /// Closed-loop acceleration
    pub acceleration: u32,
    /// Run the controller in its low-vibration mode
    pub low_vibration: bool,
}

/// Input terminal configuration of the analog channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalConfig {
    /// Referenced single-ended
    Rse,
    /// Non-referenced single-ended
    Nrse,
    /// Differential
    Differential,
}

/// Sample clock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleMode {
    /// Free-running clock
    Continuous,
    /// Fixed number of samples per channel
    Finite,
}

/// Linear scale applied by the acquisition device: `scaled = slope * raw + intercept`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearScale {
    /// Name registered with the driver
    pub name: String,
    /// Multiplier
    pub slope: f64,
    /// Offset added after the multiplier
    pub intercept: f64,
    /// Unit label of the scaled value
    pub units: String,
}

impl Default for LinearScale {
    fn default() -> Self {
        Self {
            name: "Scaling1".to_string(),
            slope: 1.0,
            intercept: 0.0,
            units: "Volts".to_string(),
        }
    }
}

impl LinearScale {
    /// Scale one raw reading.
    pub fn apply(&self, raw: f64) -> f64 {
        self.slope * raw + self.intercept
    }
}

/// Analog acquisition configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Task name registered with the driver
    pub task_name: String,
    /// Physical address, e.g. `Dev1/ai0`
    pub physical_channel: String,
    /// Name the driver reports for the channel
    pub channel_name: String,
    /// Input terminal configuration
    pub terminal: TerminalConfig,
    /// Lower bound of the expected input range
    pub min_voltage: f64,
    /// Upper bound of the expected input range
    pub max_voltage: f64,
    /// Scale applied to every reading
    pub scale: LinearScale,
    /// Sample clock rate in Hz
    pub sample_rate: f64,
    /// Continuous or finite acquisition
    pub sample_mode: SampleMode,
    /// Buffer size per channel
    pub samples_per_channel: u64,
    /// Timeout for one blocking scalar read
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
}

impl SamplerConfig {
    /// Time between samples at the configured clock rate.
    pub fn sample_period(&self) -> AppResult<Duration> {
        Duration::try_from_secs_f64(1.0 / self.sample_rate).map_err(|_| {
            DaqError::Configuration(format!(
                "sample_rate {} Hz gives no usable sample period",
                self.sample_rate
            ))
        })
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            task_name: "Task1".to_string(),
            physical_channel: "Dev1/ai0".to_string(),
            channel_name: "channel1".to_string(),
            terminal: TerminalConfig::Rse,
            min_voltage: 0.0,
            max_voltage: 9.0,
            scale: LinearScale::default(),
            sample_rate: 100.0,
            sample_mode: SampleMode::Continuous,
            samples_per_channel: 100,
            read_timeout: Duration::from_secs(10),
        }
    }
}

/// Traverse stopping condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraverseConfig {
    /// Stop once displacement reaches this many ticks
    pub travel_threshold: i64,
}

impl Default for TraverseConfig {
    fn default() -> Self {
        Self {
            travel_threshold: 20_000_000,
        }
    }
}

/// Log output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// CSV file written during the run
    pub output_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("voltages.csv"),
        }
    }
}

impl Settings {
    /// Load settings from defaults, the TOML file and the environment, then validate.
    ///
    /// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_PATH`] is used when
    /// present and silently skipped otherwise.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));

        match path {
            Some(path) if !path.exists() => {
                return Err(DaqError::Configuration(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            Some(path) => figment = figment.merge(Toml::file(path)),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    figment = figment.merge(Toml::file(default_path));
                }
            }
        }

        let settings: Settings = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that parse but cannot drive the rig.
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| Err(DaqError::Configuration(msg));

        if self.traverse.travel_threshold <= 0 {
            return invalid(format!(
                "travel_threshold must be positive, got {}",
                self.traverse.travel_threshold
            ));
        }
        if self.actuator.channel == self.actuator.auxiliary_channel {
            return invalid(format!(
                "driven and auxiliary channel must differ (both {})",
                self.actuator.channel
            ));
        }
        if self.actuator.position_timeout.is_zero() {
            return invalid("actuator.position_timeout must be non-zero".to_string());
        }
        if self.sampler.read_timeout.is_zero() {
            return invalid("sampler.read_timeout must be non-zero".to_string());
        }
        if self.sampler.min_voltage >= self.sampler.max_voltage {
            return invalid(format!(
                "voltage range is empty: {} .. {}",
                self.sampler.min_voltage, self.sampler.max_voltage
            ));
        }
        if !(self.sampler.sample_rate > 0.0) {
            return invalid(format!(
                "sample_rate must be positive, got {}",
                self.sampler.sample_rate
            ));
        }
        self.sampler.sample_period()?;
        if self.sampler.samples_per_channel == 0 {
            return invalid("samples_per_channel must be non-zero".to_string());
        }
        if self.sampler.scale.slope == 0.0 {
            return invalid(format!("scale '{}' has zero slope", self.sampler.scale.name));
        }
        if self.storage.output_path.as_os_str().is_empty() {
            return invalid("storage.output_path is empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn defaults_match_commissioned_rig() {
        let settings = Settings::default();
        assert_eq!(settings.actuator.locator, "usb:ix:0");
        assert_eq!(settings.actuator.options, "async");
        assert_eq!(settings.actuator.speed, 2_000_000);
        assert_eq!(settings.actuator.acceleration, 20_000);
        assert_eq!(settings.actuator.home_target, -1_000_000_000);
        assert_eq!(settings.actuator.stale_readings, 3);
        assert_eq!(settings.actuator.required_channels(), 2);
        assert_eq!(settings.sampler.read_timeout, Duration::from_secs(10));
        assert_eq!(settings.traverse.travel_threshold, 20_000_000);
        assert!(settings.validate().is_ok());
    }

    #[test]
    #[serial]
    fn toml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[actuator]
speed = 1000
position_timeout = "250ms"

[sampler]
terminal = "differential"
read_timeout = "2s"

[traverse]
travel_threshold = 42
"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.actuator.speed, 1000);
        assert_eq!(settings.actuator.position_timeout, Duration::from_millis(250));
        assert_eq!(settings.actuator.acceleration, 20_000);
        assert_eq!(settings.sampler.terminal, TerminalConfig::Differential);
        assert_eq!(settings.sampler.read_timeout, Duration::from_secs(2));
        assert_eq!(settings.traverse.travel_threshold, 42);
    }

    #[test]
    #[serial]
    fn environment_overrides_defaults() {
        std::env::set_var("TRAVERSE_TRAVERSE__TRAVEL_THRESHOLD", "1234");
        let result = Settings::load(None);
        std::env::remove_var("TRAVERSE_TRAVERSE__TRAVEL_THRESHOLD");

        assert_eq!(result.unwrap().traverse.travel_threshold, 1234);
    }

    #[test]
    #[serial]
    fn missing_explicit_file_is_an_error() {
        let err = Settings::load(Some(Path::new("/nonexistent/traverse.toml"))).unwrap_err();
        assert!(matches!(err, DaqError::Configuration(_)));
    }

    #[test]
    fn sample_period_follows_rate() {
        let mut sampler = SamplerConfig::default();
        sampler.sample_rate = 4.0;
        assert_eq!(sampler.sample_period().unwrap(), Duration::from_millis(250));

        sampler.sample_rate = 1e-20;
        assert!(matches!(
            sampler.sample_period(),
            Err(DaqError::Configuration(_))
        ));

        let mut settings = Settings::default();
        settings.sampler.sample_rate = 1e-20;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.traverse.travel_threshold = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.actuator.auxiliary_channel = settings.actuator.channel;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.sampler.min_voltage = 9.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.sampler.scale.slope = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn linear_scale_applies_slope_and_intercept() {
        let scale = LinearScale {
            slope: 0.5,
            intercept: 1.0,
            ..LinearScale::default()
        };
        assert_eq!(scale.apply(4.0), 3.0);
    }
}
