// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration struct for the control loop, PID gains, scheduler,
/// sensor probe and web API.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub pid: PidConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub web: WebConfig,
}

/// Control-loop configuration: temperature bounds and tick cadence.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlConfig {
    /// Lowest user-settable target (°C).
    #[serde(default = "default_temp_min")]
    pub temp_min: i32,
    /// Highest user-settable target (°C).
    #[serde(default = "default_temp_max")]
    pub temp_max: i32,
    /// Absolute safety ceiling (°C), strictly above temp_max. Reaching it
    /// forces power off unconditionally.
    #[serde(default = "default_hard_limit")]
    pub hard_limit: f64,
    #[serde(default = "default_target_temp")]
    pub default_target: i32,
    /// Control tick period (ms). The PID gains are tuned for this period.
    #[serde(default = "default_control_tick_ms")]
    pub tick_ms: u64,
    /// Duty (%) above which the plate counts as actively heating rather
    /// than holding temperature.
    #[serde(default = "default_heating_threshold")]
    pub heating_threshold: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            temp_min: default_temp_min(),
            temp_max: default_temp_max(),
            hard_limit: default_hard_limit(),
            default_target: default_target_temp(),
            tick_ms: default_control_tick_ms(),
            heating_threshold: default_heating_threshold(),
        }
    }
}

/// PID gains and clamps, tuned for the 500 ms control tick.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PidConfig {
    #[serde(default = "default_kp")]
    pub kp: f64,
    #[serde(default = "default_ki")]
    pub ki: f64,
    #[serde(default = "default_kd")]
    pub kd: f64,
    #[serde(default = "default_integral_max")]
    pub integral_max: f64,
    #[serde(default = "default_output_min")]
    pub output_min: f64,
    #[serde(default = "default_output_max")]
    pub output_max: f64,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: default_kp(),
            ki: default_ki(),
            kd: default_kd(),
            integral_max: default_integral_max(),
            output_min: default_output_min(),
            output_max: default_output_max(),
        }
    }
}

/// Countdown-timer and appointment configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_timer_minutes")]
    pub default_timer_minutes: u32,
    #[serde(default = "default_max_heating_minutes")]
    pub max_heating_minutes: u32,
    /// Minutes of preheat lead before an appointment time.
    #[serde(default = "default_preheat_minutes")]
    pub preheat_minutes: u32,
    #[serde(default = "default_scheduler_tick_ms")]
    pub tick_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_timer_minutes: default_timer_minutes(),
            max_heating_minutes: default_max_heating_minutes(),
            preheat_minutes: default_preheat_minutes(),
            tick_ms: default_scheduler_tick_ms(),
        }
    }
}

/// NTC thermistor divider parameters and the valid voltage band.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SensorConfig {
    #[serde(default = "default_ntc_beta")]
    pub ntc_beta: f64,
    /// Thermistor resistance at 25 °C (Ω).
    #[serde(default = "default_ntc_r25")]
    pub ntc_r25: f64,
    /// Series divider resistance (Ω).
    #[serde(default = "default_series_r")]
    pub series_r: f64,
    /// Divider reference voltage (mV).
    #[serde(default = "default_vref_mv")]
    pub vref_mv: f64,
    /// Readings outside [valid_min_mv, valid_max_mv] flag a sensor fault
    /// (disconnected or shorted probe).
    #[serde(default = "default_valid_min_mv")]
    pub valid_min_mv: f64,
    #[serde(default = "default_valid_max_mv")]
    pub valid_max_mv: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            ntc_beta: default_ntc_beta(),
            ntc_r25: default_ntc_r25(),
            series_r: default_series_r(),
            vref_mv: default_vref_mv(),
            valid_min_mv: default_valid_min_mv(),
            valid_max_mv: default_valid_max_mv(),
        }
    }
}

/// Web API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_temp_min() -> i32 { 30 }
fn default_temp_max() -> i32 { 90 }
fn default_hard_limit() -> f64 { 95.0 }
fn default_target_temp() -> i32 { 55 }
fn default_control_tick_ms() -> u64 { 500 }
fn default_heating_threshold() -> f64 { 5.0 }
fn default_kp() -> f64 { 2.0 }
fn default_ki() -> f64 { 0.1 }
fn default_kd() -> f64 { 0.5 }
fn default_integral_max() -> f64 { 50.0 }
fn default_output_min() -> f64 { 0.0 }
fn default_output_max() -> f64 { 100.0 }
fn default_timer_minutes() -> u32 { 60 }
fn default_max_heating_minutes() -> u32 { 240 }
fn default_preheat_minutes() -> u32 { 5 }
fn default_scheduler_tick_ms() -> u64 { 1000 }
fn default_ntc_beta() -> f64 { 3950.0 }
fn default_ntc_r25() -> f64 { 10_000.0 }
fn default_series_r() -> f64 { 10_000.0 }
fn default_vref_mv() -> f64 { 3300.0 }
fn default_valid_min_mv() -> f64 { 100.0 }
fn default_valid_max_mv() -> f64 { 3200.0 }
fn default_bind() -> String { "0.0.0.0:3000".to_string() }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            Err(ConfigError::Io(e))
        }
    }
}
