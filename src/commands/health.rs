use crate::refresh::types::{ClockState, RefreshClockStatusSnapshot};
use crate::{error::AppError, state::AppState};
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_ms: u128,
    pub refresh_clock: ClockState,
    pub tick: u64,
}

pub fn build_health_response(
    started_at: Instant,
    refresh_status: &RefreshClockStatusSnapshot,
) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_ms: started_at.elapsed().as_millis(),
        refresh_clock: refresh_status.state,
        tick: refresh_status.tick,
    }
}

pub fn health(state: &AppState) -> Result<HealthResponse, AppError> {
    let refresh_status = state.gate.status();
    Ok(build_health_response(state.started_at, &refresh_status))
}
