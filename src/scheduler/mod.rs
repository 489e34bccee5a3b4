// src/scheduler/mod.rs - Countdown timer and appointment state machine
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, broadcast};
use tokio::time::MissedTickBehavior;

use crate::clock::{Clock, TimeOfDay};
use crate::config::Config;
use crate::control::{ControlError, ControlHandle};

const LOCK_WAIT: Duration = Duration::from_millis(100);
const MINUTES_PER_DAY: i32 = 24 * 60;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid schedule time '{0}', expected HH:MM")]
    InvalidFormat(String),
    #[error("invalid timer duration: {0} minutes")]
    InvalidDuration(u32),
    #[error("scheduler state lock not acquired within {LOCK_WAIT:?}")]
    LockTimeout,
}

impl From<ControlError> for ScheduleError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::LockTimeout => ScheduleError::LockTimeout,
        }
    }
}

/// Scheduler mode as observed by display and remote callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerMode {
    /// Nothing pending.
    Idle,
    /// Countdown active (possibly paused while power is off).
    TimerRunning,
    /// Appointment armed.
    Scheduled,
    /// Countdown just expired.
    Timeout,
}

/// A validated "HH:MM" appointment time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTime {
    hour: u8,
    minute: u8,
}

impl ScheduleTime {
    pub fn minutes_of_day(self) -> u32 {
        self.hour as u32 * 60 + self.minute as u32
    }
}

impl FromStr for ScheduleTime {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScheduleError::InvalidFormat(s.to_string());
        let (h, m) = s.split_once(':').ok_or_else(invalid)?;
        let hour: u8 = h.trim().parse().map_err(|_| invalid())?;
        let minute: u8 = m.trim().parse().map_err(|_| invalid())?;
        if hour > 23 || minute > 59 {
            return Err(invalid());
        }
        Ok(Self { hour, minute })
    }
}

impl fmt::Display for ScheduleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Emitted on the expiry channel when a countdown reaches zero. At most one
/// event per expiry.
#[derive(Debug, Clone, Copy)]
pub struct TimerExpired;

/// Cross-component action decided by a tick, applied by the task *after* the
/// scheduler guard is dropped so this lock is never held while waiting on the
/// control loop's lock.
#[derive(Debug, PartialEq, Eq)]
enum TickEvent {
    /// Countdown expired: request power off and notify once.
    TimerExpired,
    /// Appointment reached its preheat start: request power on.
    ScheduleTriggered,
}

/// Point-in-time copy of the scheduler state for display/API readers.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub mode: SchedulerMode,
    pub timer_duration: u32,
    pub timer_remaining: u32,
    pub schedule_time: Option<String>,
}

/// State owned exclusively by the scheduler.
struct SchedulerInner {
    timer_duration_minutes: u32,
    /// Internal countdown in seconds; remaining minutes are derived as a
    /// ceiling for display.
    timer_seconds: i64,
    timer_running: bool,
    /// Armed appointment; `None` means inactive. One-shot: cleared on
    /// trigger.
    schedule: Option<ScheduleTime>,
    state: SchedulerMode,

    max_heating_minutes: u32,
    preheat_minutes: u32,
}

impl SchedulerInner {
    fn new(config: &Config) -> Self {
        Self {
            timer_duration_minutes: config.scheduler.default_timer_minutes,
            timer_seconds: 0,
            timer_running: false,
            schedule: None,
            state: SchedulerMode::Idle,
            max_heating_minutes: config.scheduler.max_heating_minutes,
            preheat_minutes: config.scheduler.preheat_minutes,
        }
    }

    /// One 1 Hz tick: countdown first, then the appointment check.
    ///
    /// The countdown is power-gated: with power off it pauses rather than
    /// resetting. The appointment fires only on exact minute equality with
    /// the preheat-adjusted start, so a stalled clock skips that day's
    /// trigger rather than firing late.
    fn tick(&mut self, power_on: bool, now: TimeOfDay) -> Option<TickEvent> {
        if self.timer_running && power_on {
            self.timer_seconds -= 1;
            if self.timer_seconds <= 0 {
                self.timer_running = false;
                self.timer_seconds = 0;
                self.state = SchedulerMode::Timeout;
                tracing::info!("Timer expired, turning off heater");
                return Some(TickEvent::TimerExpired);
            }
        }

        if let Some(schedule) = self.schedule
            && !power_on
        {
            let mut start_minutes = schedule.minutes_of_day() as i32 - self.preheat_minutes as i32;
            if start_minutes < 0 {
                start_minutes += MINUTES_PER_DAY;
            }

            if now.minutes_of_day() as i32 == start_minutes {
                tracing::info!(
                    "Schedule triggered, starting heater (preheat {} min before {})",
                    self.preheat_minutes,
                    schedule
                );
                self.schedule = None;
                self.start_countdown();
                return Some(TickEvent::ScheduleTriggered);
            }
        }

        None
    }

    fn start_countdown(&mut self) {
        self.timer_running = true;
        self.timer_seconds = self.timer_duration_minutes as i64 * 60;
        self.state = SchedulerMode::TimerRunning;
    }

    /// Ceiling of the remaining seconds, in minutes.
    fn timer_remaining_minutes(&self) -> u32 {
        ((self.timer_seconds + 59) / 60) as u32
    }

    fn set_timer_duration(&mut self, minutes: u32, power_on: bool) -> Result<u32, ScheduleError> {
        if minutes == 0 {
            return Err(ScheduleError::InvalidDuration(minutes));
        }
        let clamped = minutes.min(self.max_heating_minutes);
        self.timer_duration_minutes = clamped;

        // A live countdown restarts from the new duration immediately.
        if power_on {
            self.start_countdown();
        }
        Ok(clamped)
    }

    fn set_schedule(&mut self, time: ScheduleTime) {
        self.schedule = Some(time);
        self.state = SchedulerMode::Scheduled;
    }

    fn cancel_schedule(&mut self) {
        self.schedule = None;
        if self.state == SchedulerMode::Scheduled {
            self.state = SchedulerMode::Idle;
        }
    }

    fn stop_timer(&mut self) {
        self.timer_running = false;
        self.timer_seconds = 0;
        if matches!(
            self.state,
            SchedulerMode::TimerRunning | SchedulerMode::Timeout
        ) {
            self.state = SchedulerMode::Idle;
        }
    }

    fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            mode: self.state,
            timer_duration: self.timer_duration_minutes,
            timer_remaining: self.timer_remaining_minutes(),
            schedule_time: self.schedule.map(|s| s.to_string()),
        }
    }
}

/// The 1 Hz scheduler task. Holds the clock and a narrow power capability on
/// the control loop; everything else talks to it through a
/// [`SchedulerHandle`].
pub struct Scheduler {
    inner: Arc<Mutex<SchedulerInner>>,
    control: ControlHandle,
    clock: Arc<dyn Clock>,
    period: Duration,
    expiry_tx: broadcast::Sender<TimerExpired>,
}

impl Scheduler {
    pub fn new(config: &Config, control: ControlHandle, clock: Arc<dyn Clock>) -> Self {
        let (expiry_tx, _) = broadcast::channel(4);
        Self {
            inner: Arc::new(Mutex::new(SchedulerInner::new(config))),
            control,
            clock,
            period: Duration::from_millis(config.scheduler.tick_ms),
            expiry_tx,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            inner: self.inner.clone(),
            control: self.control.clone(),
            expiry_tx: self.expiry_tx.clone(),
        }
    }

    /// Run the fixed-cadence scheduler tick until shutdown.
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        let Scheduler {
            inner,
            control,
            clock,
            period,
            expiry_tx,
        } = self;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::info!("Scheduler shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        // Power flag and clock are read before taking our own
                        // lock; both our lock attempts are non-blocking.
                        let Ok(power_on) = control.try_power() else {
                            continue;
                        };
                        let now = clock.now().await;
                        let event = match inner.try_lock() {
                            Ok(mut state) => state.tick(power_on, now),
                            Err(_) => continue,
                        };
                        // Guard dropped: power requests go through the
                        // control handle's own (bounded) lock.
                        match event {
                            Some(TickEvent::TimerExpired) => {
                                if let Err(e) = control.set_power(false).await {
                                    tracing::error!("Timer expiry power-off failed: {}", e);
                                }
                                let _ = expiry_tx.send(TimerExpired);
                            }
                            Some(TickEvent::ScheduleTriggered) => {
                                if let Err(e) = control.set_power(true).await {
                                    tracing::error!("Scheduled power-on failed: {}", e);
                                }
                            }
                            None => {}
                        }
                    }
                }
            }
        })
    }
}

/// Thread-safe accessor surface over the scheduler state.
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Arc<Mutex<SchedulerInner>>,
    control: ControlHandle,
    expiry_tx: broadcast::Sender<TimerExpired>,
}

impl SchedulerHandle {
    async fn guard(&self) -> Result<MutexGuard<'_, SchedulerInner>, ScheduleError> {
        tokio::time::timeout(LOCK_WAIT, self.inner.lock())
            .await
            .map_err(|_| ScheduleError::LockTimeout)
    }

    /// Set the heating duration. Zero is rejected; anything above the
    /// configured maximum clamps down. If heating is currently powered the
    /// live countdown restarts from the new duration at once.
    pub async fn set_timer_duration(&self, minutes: u32) -> Result<u32, ScheduleError> {
        // Read the power flag before taking our own lock (lock-order rule).
        let power_on = self.control.power().await?;
        let clamped = self.guard().await?.set_timer_duration(minutes, power_on)?;
        tracing::info!("Timer duration set to {} minutes", clamped);
        Ok(clamped)
    }

    pub async fn timer_duration(&self) -> Result<u32, ScheduleError> {
        Ok(self.guard().await?.timer_duration_minutes)
    }

    /// Remaining countdown, in ceiling minutes.
    pub async fn timer_remaining(&self) -> Result<u32, ScheduleError> {
        Ok(self.guard().await?.timer_remaining_minutes())
    }

    /// Arm the one-shot appointment. Invalid input is rejected and leaves
    /// the prior schedule untouched.
    pub async fn set_schedule_time(&self, time_str: &str) -> Result<(), ScheduleError> {
        let time: ScheduleTime = match time_str.parse() {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("Invalid schedule time format: {}", time_str);
                return Err(e);
            }
        };
        self.guard().await?.set_schedule(time);
        tracing::info!("Schedule set: {}", time);
        Ok(())
    }

    pub async fn schedule_time(&self) -> Result<Option<String>, ScheduleError> {
        Ok(self.guard().await?.schedule.map(|s| s.to_string()))
    }

    /// Disarm the appointment. An active countdown is left untouched.
    pub async fn cancel_schedule(&self) -> Result<(), ScheduleError> {
        self.guard().await?.cancel_schedule();
        tracing::info!("Schedule cancelled");
        Ok(())
    }

    /// Manually start the countdown with the configured duration.
    pub async fn start_timer(&self) -> Result<(), ScheduleError> {
        let mut state = self.guard().await?;
        state.start_countdown();
        let duration = state.timer_duration_minutes;
        drop(state);
        tracing::info!("Timer started: {} minutes", duration);
        Ok(())
    }

    /// Manually stop the countdown.
    pub async fn stop_timer(&self) -> Result<(), ScheduleError> {
        self.guard().await?.stop_timer();
        tracing::info!("Timer stopped");
        Ok(())
    }

    pub async fn mode(&self) -> Result<SchedulerMode, ScheduleError> {
        Ok(self.guard().await?.state)
    }

    pub async fn snapshot(&self) -> Result<SchedulerSnapshot, ScheduleError> {
        Ok(self.guard().await?.snapshot())
    }

    /// Subscribe to countdown-expiry events (at most one per expiry).
    pub fn subscribe_expiry(&self) -> broadcast::Receiver<TimerExpired> {
        self.expiry_tx.subscribe()
    }
}
