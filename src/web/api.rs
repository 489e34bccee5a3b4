//! Axum API routes and handlers.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};

use crate::clock::{ClockError, RtcDateTime, SoftRtc};
use crate::control::{ControlError, ControlHandle};
use crate::scheduler::{ScheduleError, SchedulerHandle};
use crate::web::models::{ControlRequest, ResultResponse, StatusResponse, SyncTimeRequest};

/// Handles shared with every request handler.
#[derive(Clone)]
pub struct AppState {
    pub control: ControlHandle,
    pub scheduler: SchedulerHandle,
    pub rtc: SoftRtc,
}

/// Creates the Axum router with all the API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/control", post(post_control))
        .route("/api/v1/sync_time", post(post_sync_time))
        .with_state(state)
}

fn control_error(e: ControlError) -> StatusCode {
    match e {
        // Transient: the caller may retry, nothing was applied.
        ControlError::LockTimeout => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn schedule_error(e: ScheduleError) -> StatusCode {
    match e {
        ScheduleError::InvalidFormat(_) | ScheduleError::InvalidDuration(_) => {
            StatusCode::BAD_REQUEST
        }
        ScheduleError::LockTimeout => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn clock_error(e: ClockError) -> StatusCode {
    match e {
        ClockError::InvalidTime => StatusCode::BAD_REQUEST,
        ClockError::LockTimeout => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn build_status(state: &AppState) -> Result<StatusResponse, StatusCode> {
    let control = state.control.snapshot().await.map_err(control_error)?;
    let scheduler = state.scheduler.snapshot().await.map_err(schedule_error)?;
    let now = state.rtc.date_time().await.map_err(clock_error)?;

    Ok(StatusResponse {
        power: control.power_on,
        current_temp: control.current_temp,
        target_temp: control.target_temp,
        is_heating: control.is_heating,
        sensor_ok: control.sensor_ok,
        control_mode: control.mode,
        timer_duration: scheduler.timer_duration,
        timer_remaining: scheduler.timer_remaining,
        schedule_time: scheduler.schedule_time,
        scheduler_mode: scheduler.mode,
        time: format!("{:02}:{:02}", now.hour, now.minute),
        weekday: now.weekday,
    })
}

/// Handler for `GET /api/v1/status`.
async fn get_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, StatusCode> {
    let status = build_status(&state).await?;
    Ok(Json(status))
}

/// Handler for `POST /api/v1/control`. Applies whichever setters the request
/// names and replies with the refreshed status.
async fn post_control(
    State(state): State<AppState>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<StatusResponse>, StatusCode> {
    tracing::info!("POST /api/v1/control: {:?}", request);

    if let Some(power) = request.power {
        state.control.set_power(power).await.map_err(control_error)?;
    }
    if let Some(temp) = request.set_temp {
        state
            .control
            .set_target_temp(temp)
            .await
            .map_err(control_error)?;
    }
    if let Some(minutes) = request.timer_duration {
        state
            .scheduler
            .set_timer_duration(minutes)
            .await
            .map_err(schedule_error)?;
    }
    if let Some(ref time_str) = request.schedule_time {
        state
            .scheduler
            .set_schedule_time(time_str)
            .await
            .map_err(schedule_error)?;
    }
    if request.cancel_schedule == Some(true) {
        state.scheduler.cancel_schedule().await.map_err(schedule_error)?;
    }
    if let Some(ref timer) = request.timer {
        match timer.as_str() {
            "start" => state.scheduler.start_timer().await.map_err(schedule_error)?,
            "stop" => state.scheduler.stop_timer().await.map_err(schedule_error)?,
            other => {
                tracing::warn!("Unknown timer command: {}", other);
                return Err(StatusCode::BAD_REQUEST);
            }
        }
    }

    let status = build_status(&state).await?;
    Ok(Json(status))
}

/// Handler for `POST /api/v1/sync_time`. Accepts "YYYY-MM-DD HH:MM:SS".
async fn post_sync_time(
    State(state): State<AppState>,
    Json(request): Json<SyncTimeRequest>,
) -> Result<Json<ResultResponse>, StatusCode> {
    tracing::info!("POST /api/v1/sync_time: {:?}", request);

    let time = parse_datetime(&request.time, request.weekday).ok_or(StatusCode::BAD_REQUEST)?;
    state.rtc.set_time(time).await.map_err(clock_error)?;
    Ok(Json(ResultResponse::ok()))
}

fn parse_datetime(s: &str, weekday: u32) -> Option<RtcDateTime> {
    let (date, clock) = s.trim().split_once(' ')?;

    let mut date_parts = date.splitn(3, '-');
    let year: i32 = date_parts.next()?.parse().ok()?;
    let month: u32 = date_parts.next()?.parse().ok()?;
    let day: u32 = date_parts.next()?.parse().ok()?;

    let mut clock_parts = clock.splitn(3, ':');
    let hour: u32 = clock_parts.next()?.parse().ok()?;
    let minute: u32 = clock_parts.next()?.parse().ok()?;
    let second: u32 = clock_parts.next()?.parse().ok()?;

    Some(RtcDateTime {
        year,
        month,
        day,
        hour,
        minute,
        second,
        weekday,
    })
}
