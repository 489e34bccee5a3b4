// src/hardware/mod.rs - Sensor/actuator collaborators for the control loop
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::config::SensorConfig;

/// A sensor reading rejected before it reaches the control law. Recoverable:
/// the loop retries every tick and clears the fault on the next good reading.
#[derive(Debug, Clone, Error)]
pub enum SensorFault {
    #[error("sensor voltage out of range: {0:.0} mV")]
    VoltageOutOfRange(f64),
    #[error("sensor read failed: {0}")]
    ReadFailed(String),
}

/// Temperature source polled once per control tick.
pub trait TemperatureSensor: Send {
    fn read_temperature(&mut self) -> Result<f64, SensorFault>;
}

/// Heater actuator driven once per control tick with a duty percentage.
pub trait Heater: Send {
    /// Drive the heater at `percent` of full power, clamped to 0..=100.
    fn set_output(&mut self, percent: f64);
}

/// Raw millivolt source behind an [`AdcSensor`], e.g. an ADC channel wired to
/// an NTC divider.
pub trait AdcReader: Send {
    fn read_millivolts(&mut self) -> Result<f64, SensorFault>;
}

/// NTC thermistor conversion: divider millivolts to Celsius via the beta
/// equation, with the out-of-band fault check for a disconnected or shorted
/// probe.
#[derive(Debug, Clone)]
pub struct NtcProbe {
    beta: f64,
    r25: f64,
    series_r: f64,
    vref_mv: f64,
    valid_min_mv: f64,
    valid_max_mv: f64,
}

const KELVIN_OFFSET: f64 = 273.15;

impl NtcProbe {
    pub fn new(cfg: &SensorConfig) -> Self {
        Self {
            beta: cfg.ntc_beta,
            r25: cfg.ntc_r25,
            series_r: cfg.series_r,
            vref_mv: cfg.vref_mv,
            valid_min_mv: cfg.valid_min_mv,
            valid_max_mv: cfg.valid_max_mv,
        }
    }

    /// Convert a divider voltage to Celsius.
    ///
    /// Divider: V_ntc = Vref * R_ntc / (R_series + R_ntc), so
    /// R_ntc = R_series * V_ntc / (Vref - V_ntc). Then the beta equation:
    /// 1/T = 1/T25 + (1/B) * ln(R/R25).
    pub fn temperature_from_millivolts(&self, millivolts: f64) -> Result<f64, SensorFault> {
        if millivolts < self.valid_min_mv || millivolts > self.valid_max_mv {
            return Err(SensorFault::VoltageOutOfRange(millivolts));
        }

        let r_ntc = self.series_r * millivolts / (self.vref_mv - millivolts);

        let t25_kelvin = 25.0 + KELVIN_OFFSET;
        let temp_kelvin = 1.0 / (1.0 / t25_kelvin + (1.0 / self.beta) * (r_ntc / self.r25).ln());
        Ok(temp_kelvin - KELVIN_OFFSET)
    }
}

/// Adapts any raw millivolt source into a [`TemperatureSensor`] through an
/// [`NtcProbe`] conversion.
pub struct AdcSensor<R: AdcReader> {
    reader: R,
    probe: NtcProbe,
}

impl<R: AdcReader> AdcSensor<R> {
    pub fn new(reader: R, probe: NtcProbe) -> Self {
        Self { reader, probe }
    }
}

impl<R: AdcReader> TemperatureSensor for AdcSensor<R> {
    fn read_temperature(&mut self) -> Result<f64, SensorFault> {
        let millivolts = self.reader.read_millivolts()?;
        self.probe.temperature_from_millivolts(millivolts)
    }
}

/// First-order thermal model of the heated plate, used when no hardware is
/// attached. The heater half stores the commanded duty; the sensor half
/// integrates the plate temperature and adds a little measurement noise.
pub struct SimulatedPlate;

const SIM_AMBIENT_C: f64 = 25.0;
/// Plate heating rate at 100% duty (°C/s).
const SIM_HEAT_RATE: f64 = 0.8;
/// Fractional cooling toward ambient (1/s).
const SIM_COOL_RATE: f64 = 0.01;

impl SimulatedPlate {
    /// Build a connected sensor/heater pair sharing one duty cell.
    pub fn pair() -> (SimulatedSensor, SimulatedHeater) {
        let duty = Arc::new(AtomicU64::new(0.0f64.to_bits()));
        let sensor = SimulatedSensor {
            duty: duty.clone(),
            plate_temp: SIM_AMBIENT_C,
            last_update: Instant::now(),
            rng: StdRng::from_os_rng(),
        };
        let heater = SimulatedHeater { duty };
        (sensor, heater)
    }
}

pub struct SimulatedSensor {
    duty: Arc<AtomicU64>,
    plate_temp: f64,
    last_update: Instant,
    rng: StdRng,
}

impl TemperatureSensor for SimulatedSensor {
    fn read_temperature(&mut self) -> Result<f64, SensorFault> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_update).as_secs_f64();
        self.last_update = now;

        let duty = f64::from_bits(self.duty.load(Ordering::Relaxed));
        self.plate_temp += (SIM_HEAT_RATE * duty / 100.0
            - SIM_COOL_RATE * (self.plate_temp - SIM_AMBIENT_C))
            * dt;

        let noise: f64 = self.rng.random_range(-0.05..0.05);
        Ok(self.plate_temp + noise)
    }
}

pub struct SimulatedHeater {
    duty: Arc<AtomicU64>,
}

impl Heater for SimulatedHeater {
    fn set_output(&mut self, percent: f64) {
        let duty = percent.clamp(0.0, 100.0);
        self.duty.store(duty.to_bits(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe() -> NtcProbe {
        NtcProbe::new(&SensorConfig::default())
    }

    struct FakeAdc(Vec<f64>);

    impl AdcReader for FakeAdc {
        fn read_millivolts(&mut self) -> Result<f64, SensorFault> {
            Ok(self.0.remove(0))
        }
    }

    #[test]
    fn test_ntc_midpoint_is_room_temperature() {
        // Equal divider resistances at 25 °C: the midpoint voltage must
        // convert back to 25 °C.
        let temp = probe().temperature_from_millivolts(1650.0).unwrap();
        assert!((temp - 25.0).abs() < 0.01, "got {temp}");
    }

    #[test]
    fn test_ntc_lower_voltage_is_hotter() {
        // NTC resistance falls with temperature, pulling the divider down.
        let probe = probe();
        let hot = probe.temperature_from_millivolts(800.0).unwrap();
        let cold = probe.temperature_from_millivolts(2400.0).unwrap();
        assert!(hot > 25.0);
        assert!(cold < 25.0);
    }

    #[test]
    fn test_ntc_out_of_band_is_fault() {
        let probe = probe();
        assert!(matches!(
            probe.temperature_from_millivolts(50.0),
            Err(SensorFault::VoltageOutOfRange(_))
        ));
        assert!(matches!(
            probe.temperature_from_millivolts(3250.0),
            Err(SensorFault::VoltageOutOfRange(_))
        ));
    }

    #[test]
    fn test_adc_sensor_converts_and_propagates_faults() {
        let mut sensor = AdcSensor::new(FakeAdc(vec![1650.0, 10.0]), probe());
        let temp = sensor.read_temperature().unwrap();
        assert!((temp - 25.0).abs() < 0.01);
        assert!(sensor.read_temperature().is_err());
    }

    #[test]
    fn test_simulated_plate_heats_under_duty() {
        let (mut sensor, mut heater) = SimulatedPlate::pair();
        let start = sensor.read_temperature().unwrap();

        heater.set_output(100.0);
        std::thread::sleep(std::time::Duration::from_millis(50));
        let warmer = sensor.read_temperature().unwrap();

        // 100% duty must move the plate upward even over a short window.
        assert!(warmer > start - 0.2);
        heater.set_output(0.0);
    }
}
