// src/clock.rs - Wall-clock collaborator: trait + software RTC
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;

const LOCK_WAIT: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ClockError {
    #[error("invalid calendar time")]
    InvalidTime,
    #[error("clock lock not acquired within {LOCK_WAIT:?}")]
    LockTimeout,
}

/// Time of day at the minute resolution the scheduler needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    pub fn minutes_of_day(self) -> u32 {
        self.hour as u32 * 60 + self.minute as u32
    }
}

/// Wall-clock source consulted once per scheduler tick.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn now(&self) -> TimeOfDay;
}

/// Full calendar time kept by the software RTC. Weekday is 1=Monday through
/// 7=Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcDateTime {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub weekday: u32,
}

impl RtcDateTime {
    fn is_valid(&self) -> bool {
        (1..=12).contains(&self.month)
            && self.day >= 1
            && self.day <= days_in_month(self.year, self.month)
            && self.hour < 24
            && self.minute < 60
            && self.second < 60
            && (1..=7).contains(&self.weekday)
    }

    /// Advance by one second with full calendar carry.
    fn advance_second(&mut self) {
        self.second += 1;
        if self.second < 60 {
            return;
        }
        self.second = 0;
        self.minute += 1;
        if self.minute < 60 {
            return;
        }
        self.minute = 0;
        self.hour += 1;
        if self.hour < 24 {
            return;
        }
        self.hour = 0;
        self.day += 1;
        self.weekday += 1;
        if self.weekday > 7 {
            self.weekday = 1;
        }
        if self.day > days_in_month(self.year, self.month) {
            self.day = 1;
            self.month += 1;
            if self.month > 12 {
                self.month = 1;
                self.year += 1;
            }
        }
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i32, month: u32) -> u32 {
    const DAYS: [u32; 13] = [0, 31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    if month == 2 && is_leap_year(year) {
        29
    } else {
        DAYS[month as usize]
    }
}

/// Software RTC: shared calendar time advanced by a 1 Hz tokio task. Set once
/// at startup (or over the API) and free-running from there.
#[derive(Clone)]
pub struct SoftRtc {
    time: Arc<Mutex<RtcDateTime>>,
}

impl SoftRtc {
    pub fn new(initial: RtcDateTime) -> Result<Self, ClockError> {
        if !initial.is_valid() {
            return Err(ClockError::InvalidTime);
        }
        Ok(Self {
            time: Arc::new(Mutex::new(initial)),
        })
    }

    /// Seed from the host's local time.
    pub fn from_system_time() -> Self {
        let now = chrono::Local::now();
        let initial = RtcDateTime {
            year: now.year(),
            month: now.month(),
            day: now.day(),
            hour: now.hour(),
            minute: now.minute(),
            second: now.second(),
            weekday: now.weekday().number_from_monday(),
        };
        Self {
            time: Arc::new(Mutex::new(initial)),
        }
    }

    /// Run the 1 Hz tick until shutdown.
    pub fn spawn(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let time = self.time.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::info!("Soft RTC shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        // Skip the tick on contention; losing one second to a
                        // concurrent set_time is fine.
                        if let Ok(mut t) = time.try_lock() {
                            t.advance_second();
                        }
                    }
                }
            }
        })
    }

    pub async fn set_time(&self, new_time: RtcDateTime) -> Result<(), ClockError> {
        if !new_time.is_valid() {
            return Err(ClockError::InvalidTime);
        }
        let mut guard = tokio::time::timeout(LOCK_WAIT, self.time.lock())
            .await
            .map_err(|_| ClockError::LockTimeout)?;
        *guard = new_time;
        drop(guard);
        tracing::info!(
            "Time set: {:04}-{:02}-{:02} {:02}:{:02}:{:02} (weekday={})",
            new_time.year,
            new_time.month,
            new_time.day,
            new_time.hour,
            new_time.minute,
            new_time.second,
            new_time.weekday
        );
        Ok(())
    }

    pub async fn date_time(&self) -> Result<RtcDateTime, ClockError> {
        let guard = tokio::time::timeout(LOCK_WAIT, self.time.lock())
            .await
            .map_err(|_| ClockError::LockTimeout)?;
        Ok(*guard)
    }

    /// Formatted "HH:MM" string for display and API responses.
    pub async fn time_string(&self) -> Result<String, ClockError> {
        let t = self.date_time().await?;
        Ok(format!("{:02}:{:02}", t.hour, t.minute))
    }
}

#[async_trait]
impl Clock for SoftRtc {
    async fn now(&self) -> TimeOfDay {
        let t = *self.time.lock().await;
        TimeOfDay {
            hour: t.hour as u8,
            minute: t.minute as u8,
        }
    }
}
