// src/control/mod.rs - PID control loop with hardware safety interlocks
pub mod pid;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, broadcast};
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::control::pid::Pid;
use crate::hardware::{Heater, SensorFault, TemperatureSensor};

/// Bounded wait for external accessor calls. Periodic ticks never wait at
/// all: they try-lock and skip.
const LOCK_WAIT: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ControlError {
    /// The state lock could not be acquired within the bound. Transient;
    /// the caller may retry, no state was touched.
    #[error("control state lock not acquired within {LOCK_WAIT:?}")]
    LockTimeout,
}

/// Control-loop mode as observed by display and remote callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// Power off, heater idle.
    Idle,
    /// Powered and actively driving toward target.
    Heating,
    /// Powered and holding at target.
    Keeping,
    /// Sensor fault; heater forced off until a good reading returns.
    Error,
}

/// Consistent point-in-time copy of the control state, taken under one lock
/// acquisition so readers never see a half-updated set of fields.
#[derive(Debug, Clone, Serialize)]
pub struct ControlSnapshot {
    pub power_on: bool,
    pub target_temp: i32,
    pub current_temp: f64,
    pub sensor_ok: bool,
    pub is_heating: bool,
    pub mode: ControlMode,
}

/// State owned exclusively by the control loop. All mutation happens in
/// [`ControlInner::tick`] or through the handle's setters.
struct ControlInner {
    pid: Pid,
    power_on: bool,
    target_temp: i32,
    /// Last good sensor reading; kept across transient faults.
    current_temp: f64,
    sensor_ok: bool,
    is_heating: bool,
    mode: ControlMode,

    temp_min: i32,
    temp_max: i32,
    hard_limit: f64,
    heating_threshold: f64,
}

impl ControlInner {
    fn new(config: &Config) -> Self {
        let mut pid = Pid::new(config.pid.kp, config.pid.ki, config.pid.kd);
        pid.set_output_limits(config.pid.output_min, config.pid.output_max);
        pid.set_integral_limit(config.pid.integral_max);

        Self {
            pid,
            power_on: false,
            target_temp: config.control.default_target,
            current_temp: 25.0,
            sensor_ok: true,
            is_heating: false,
            mode: ControlMode::Idle,
            temp_min: config.control.temp_min,
            temp_max: config.control.temp_max,
            hard_limit: config.control.hard_limit,
            heating_threshold: config.control.heating_threshold,
        }
    }

    /// One control tick. Returns the heater duty to drive (%).
    ///
    /// Order matters: sensor fault first (no PID, power untouched), then the
    /// hard-limit interlock (unconditional power-off, re-checked every tick),
    /// then the normal PID/idle paths.
    fn tick(&mut self, reading: Result<f64, SensorFault>) -> f64 {
        match reading {
            Err(fault) => {
                if self.sensor_ok {
                    tracing::error!("SAFETY: sensor fault, stopping heater: {}", fault);
                }
                self.sensor_ok = false;
                self.is_heating = false;
                self.mode = ControlMode::Error;
                return 0.0;
            }
            Ok(temp) => {
                self.sensor_ok = true;
                self.current_temp = temp;
            }
        }

        if self.current_temp >= self.hard_limit {
            if self.power_on {
                tracing::warn!(
                    "SAFETY: temperature {:.1} >= {:.1}, emergency shutoff",
                    self.current_temp,
                    self.hard_limit
                );
            }
            self.power_on = false;
            self.is_heating = false;
            self.mode = ControlMode::Idle;
            return 0.0;
        }

        if self.power_on {
            self.pid.set_setpoint(self.target_temp as f64);
            let output = self.pid.compute(self.current_temp);

            self.is_heating = output > self.heating_threshold;
            self.mode = if self.is_heating {
                ControlMode::Heating
            } else {
                ControlMode::Keeping
            };

            tracing::debug!(
                "Temp: {:.1} -> {}, PID output: {:.1}%",
                self.current_temp,
                self.target_temp,
                output
            );
            output
        } else {
            self.is_heating = false;
            self.mode = ControlMode::Idle;
            self.pid.reset();
            0.0
        }
    }

    fn snapshot(&self) -> ControlSnapshot {
        ControlSnapshot {
            power_on: self.power_on,
            target_temp: self.target_temp,
            current_temp: self.current_temp,
            sensor_ok: self.sensor_ok,
            is_heating: self.is_heating,
            mode: self.mode,
        }
    }
}

/// The periodic control task. Owns the sensor and heater; everything else
/// talks to it through a [`ControlHandle`].
pub struct ControlLoop {
    inner: Arc<Mutex<ControlInner>>,
    sensor: Box<dyn TemperatureSensor>,
    heater: Box<dyn Heater>,
    period: Duration,
}

impl ControlLoop {
    pub fn new(
        config: &Config,
        sensor: Box<dyn TemperatureSensor>,
        heater: Box<dyn Heater>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ControlInner::new(config))),
            sensor,
            heater,
            period: Duration::from_millis(config.control.tick_ms),
        }
    }

    pub fn handle(&self) -> ControlHandle {
        ControlHandle {
            inner: self.inner.clone(),
        }
    }

    /// Run the fixed-cadence control loop until shutdown.
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        let ControlLoop {
            inner,
            mut sensor,
            mut heater,
            period,
        } = self;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::info!("Control loop shutting down");
                        heater.set_output(0.0);
                        break;
                    }
                    _ = interval.tick() => {
                        let reading = sensor.read_temperature();
                        // Skip the tick on contention rather than stalling
                        // the cadence; the next sample is 500 ms away.
                        let duty = match inner.try_lock() {
                            Ok(mut state) => state.tick(reading),
                            Err(_) => continue,
                        };
                        heater.set_output(duty);
                    }
                }
            }
        })
    }
}

/// Thread-safe accessor surface over the control state. Reads return the most
/// recent tick's snapshot; writes take effect on the next tick.
#[derive(Clone)]
pub struct ControlHandle {
    inner: Arc<Mutex<ControlInner>>,
}

impl ControlHandle {
    async fn guard(&self) -> Result<MutexGuard<'_, ControlInner>, ControlError> {
        tokio::time::timeout(LOCK_WAIT, self.inner.lock())
            .await
            .map_err(|_| ControlError::LockTimeout)
    }

    pub async fn power(&self) -> Result<bool, ControlError> {
        Ok(self.guard().await?.power_on)
    }

    /// Non-blocking power read for periodic callers; fails instead of
    /// waiting when the control task holds the lock.
    pub fn try_power(&self) -> Result<bool, ControlError> {
        self.inner
            .try_lock()
            .map(|state| state.power_on)
            .map_err(|_| ControlError::LockTimeout)
    }

    /// Request power on/off. Applied by the next control tick; the hard-limit
    /// interlock still overrides a power-on request.
    pub async fn set_power(&self, on: bool) -> Result<(), ControlError> {
        self.guard().await?.power_on = on;
        tracing::info!("Power {}", if on { "ON" } else { "OFF" });
        Ok(())
    }

    pub async fn target_temp(&self) -> Result<i32, ControlError> {
        Ok(self.guard().await?.target_temp)
    }

    /// Set the target temperature, clamped into the configured user range.
    pub async fn set_target_temp(&self, temp: i32) -> Result<i32, ControlError> {
        let mut state = self.guard().await?;
        let clamped = temp.clamp(state.temp_min, state.temp_max);
        state.target_temp = clamped;
        drop(state);
        tracing::info!("Target temp set to {}", clamped);
        Ok(clamped)
    }

    pub async fn current_temp(&self) -> Result<f64, ControlError> {
        Ok(self.guard().await?.current_temp)
    }

    pub async fn is_heating(&self) -> Result<bool, ControlError> {
        Ok(self.guard().await?.is_heating)
    }

    pub async fn mode(&self) -> Result<ControlMode, ControlError> {
        Ok(self.guard().await?.mode)
    }

    pub async fn sensor_ok(&self) -> Result<bool, ControlError> {
        Ok(self.guard().await?.sensor_ok)
    }

    pub async fn snapshot(&self) -> Result<ControlSnapshot, ControlError> {
        Ok(self.guard().await?.snapshot())
    }

    /// Run one tick against an explicit reading. Test seam; the periodic
    /// task does exactly this under its try-lock.
    #[cfg(test)]
    pub(crate) async fn tick_with(&self, reading: Result<f64, SensorFault>) -> f64 {
        self.inner.lock().await.tick(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn inner() -> ControlInner {
        ControlInner::new(&Config::default())
    }

    #[test]
    fn test_startup_state() {
        let state = inner();
        assert!(!state.power_on);
        assert_eq!(state.target_temp, 55);
        assert_eq!(state.mode, ControlMode::Idle);
        assert!(state.sensor_ok);
    }

    #[test]
    fn test_power_off_drives_zero_and_resets_pid() {
        let mut state = inner();
        state.power_on = true;
        // Wind up the integral while heating.
        for _ in 0..10 {
            state.tick(Ok(30.0));
        }
        assert!(state.pid.integral() > 0.0);

        state.power_on = false;
        let duty = state.tick(Ok(30.0));
        assert_eq!(duty, 0.0);
        assert_eq!(state.mode, ControlMode::Idle);
        assert!(!state.is_heating);
        assert_eq!(state.pid.integral(), 0.0);
    }

    #[test]
    fn test_heating_and_keeping_modes() {
        let mut state = inner();
        state.power_on = true;

        // Far below target: full drive, HEATING.
        let duty = state.tick(Ok(30.0));
        assert!(duty > state.heating_threshold);
        assert_eq!(state.mode, ControlMode::Heating);
        assert!(state.is_heating);

        // At/above target: output collapses under the threshold, KEEPING.
        let mut state = inner();
        state.power_on = true;
        let duty = state.tick(Ok(56.0));
        assert!(duty <= state.heating_threshold);
        assert_eq!(state.mode, ControlMode::Keeping);
        assert!(!state.is_heating);
    }

    #[test]
    fn test_hard_limit_forces_power_off_from_any_prior_state() {
        for power_was_on in [true, false] {
            let mut state = inner();
            state.power_on = power_was_on;
            let duty = state.tick(Ok(95.0));
            assert_eq!(duty, 0.0);
            assert!(!state.power_on, "prior power_on={power_was_on}");
            assert_eq!(state.mode, ControlMode::Idle);
            assert!(!state.is_heating);
        }
    }

    #[test]
    fn test_hard_limit_is_rechecked_every_tick() {
        let mut state = inner();
        state.power_on = true;
        state.tick(Ok(96.0));
        assert!(!state.power_on);

        // Re-requesting power while still over the limit is overridden again.
        state.power_on = true;
        let duty = state.tick(Ok(95.5));
        assert_eq!(duty, 0.0);
        assert!(!state.power_on);

        // Once the temperature drops back under the limit, a new request
        // sticks.
        state.power_on = true;
        let duty = state.tick(Ok(40.0));
        assert!(state.power_on);
        assert!(duty > 0.0);
    }

    #[test]
    fn test_sensor_fault_stops_heater_but_keeps_power_request() {
        let mut state = inner();
        state.power_on = true;
        state.tick(Ok(40.0));

        let duty = state.tick(Err(SensorFault::VoltageOutOfRange(50.0)));
        assert_eq!(duty, 0.0);
        assert!(!state.sensor_ok);
        assert_eq!(state.mode, ControlMode::Error);
        assert!(!state.is_heating);
        // Power request survives the fault; heating resumes on recovery.
        assert!(state.power_on);
        // Last good reading is retained.
        assert_eq!(state.current_temp, 40.0);
    }

    #[test]
    fn test_sensor_recovers_on_next_good_reading() {
        let mut state = inner();
        state.power_on = true;
        state.tick(Err(SensorFault::VoltageOutOfRange(3300.0)));
        assert_eq!(state.mode, ControlMode::Error);

        // No manual reset: the next valid reading clears the fault.
        let duty = state.tick(Ok(40.0));
        assert!(state.sensor_ok);
        assert_eq!(state.mode, ControlMode::Heating);
        assert!(duty > 0.0);
    }

    #[test]
    fn test_fault_does_not_run_pid() {
        let mut state = inner();
        state.power_on = true;
        for _ in 0..50 {
            state.tick(Err(SensorFault::ReadFailed("adc".into())));
        }
        // The integral never accumulated while faulted.
        assert_eq!(state.pid.integral(), 0.0);
    }

    #[tokio::test]
    async fn test_handle_clamps_target_writes() {
        let config = Config::default();
        let (sensor, heater) = crate::hardware::SimulatedPlate::pair();
        let ctrl = ControlLoop::new(&config, Box::new(sensor), Box::new(heater));
        let handle = ctrl.handle();

        assert_eq!(handle.set_target_temp(1000).await.unwrap(), 90);
        assert_eq!(handle.target_temp().await.unwrap(), 90);
        assert_eq!(handle.set_target_temp(-40).await.unwrap(), 30);
        assert_eq!(handle.target_temp().await.unwrap(), 30);
        assert_eq!(handle.set_target_temp(65).await.unwrap(), 65);
    }

    #[tokio::test]
    async fn test_snapshot_is_internally_consistent() {
        let config = Config::default();
        let (sensor, heater) = crate::hardware::SimulatedPlate::pair();
        let ctrl = ControlLoop::new(&config, Box::new(sensor), Box::new(heater));
        let handle = ctrl.handle();

        handle.set_power(true).await.unwrap();
        handle.tick_with(Ok(40.0)).await;

        let snap = handle.snapshot().await.unwrap();
        assert!(snap.power_on);
        assert_eq!(snap.current_temp, 40.0);
        assert_eq!(snap.mode, ControlMode::Heating);
        assert_eq!(snap.is_heating, matches!(snap.mode, ControlMode::Heating));
    }
}
