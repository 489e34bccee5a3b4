//! Request/response bodies for the JSON API.

use serde::{Deserialize, Serialize};

use crate::control::ControlMode;
use crate::scheduler::SchedulerMode;

/// Everything a display or remote client needs, assembled from one control
/// snapshot and one scheduler snapshot.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub power: bool,
    pub current_temp: f64,
    pub target_temp: i32,
    pub is_heating: bool,
    pub sensor_ok: bool,
    pub control_mode: ControlMode,
    pub timer_duration: u32,
    pub timer_remaining: u32,
    pub schedule_time: Option<String>,
    pub scheduler_mode: SchedulerMode,
    /// Device wall-clock, "HH:MM".
    pub time: String,
    /// 1 = Monday .. 7 = Sunday.
    pub weekday: u32,
}

/// Control command. Every field is optional; present fields are applied in
/// declaration order.
#[derive(Debug, Default, Deserialize)]
pub struct ControlRequest {
    pub power: Option<bool>,
    pub set_temp: Option<i32>,
    pub timer_duration: Option<u32>,
    pub schedule_time: Option<String>,
    pub cancel_schedule: Option<bool>,
    /// "start" or "stop".
    pub timer: Option<String>,
}

/// Time synchronization request: "YYYY-MM-DD HH:MM:SS" plus weekday.
#[derive(Debug, Deserialize)]
pub struct SyncTimeRequest {
    pub time: String,
    /// 1 = Monday .. 7 = Sunday.
    pub weekday: u32,
}

#[derive(Debug, Serialize)]
pub struct ResultResponse {
    pub result: &'static str,
}

impl ResultResponse {
    pub fn ok() -> Self {
        Self { result: "ok" }
    }
}
