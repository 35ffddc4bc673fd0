use crate::error::AppError;
use crate::refresh::bus::BusEvent;
use crate::refresh::types::{RefreshClockStatusSnapshot, SessionIdentity, Visibility};
use crate::state::AppState;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSessionArgs {
    pub user_id: Option<String>,
    pub token: Option<String>,
}

impl UpdateSessionArgs {
    pub fn normalize(self) -> Option<SessionIdentity> {
        let user_id = self
            .user_id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())?;
        let token = self
            .token
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Some(SessionIdentity { user_id, token })
    }
}

pub fn refresh_clock_status(state: &AppState) -> Result<RefreshClockStatusSnapshot, AppError> {
    Ok(state.gate.status())
}

pub fn update_session(
    state: &AppState,
    args: Option<UpdateSessionArgs>,
) -> Result<RefreshClockStatusSnapshot, AppError> {
    let session = args.unwrap_or_default().normalize();
    state
        .quote_client
        .set_bearer_token(session.as_ref().and_then(|identity| identity.token.clone()));
    Ok(state.gate.set_session(session))
}

pub fn update_visibility(
    state: &AppState,
    visibility: Visibility,
) -> Result<RefreshClockStatusSnapshot, AppError> {
    Ok(state.gate.set_visibility(visibility))
}

pub fn pause_refresh_clock(state: &AppState) -> Result<RefreshClockStatusSnapshot, AppError> {
    state.bus.publish(BusEvent::GlobalPause, 0);
    refresh_clock_status(state)
}

pub fn resume_refresh_clock(state: &AppState) -> Result<RefreshClockStatusSnapshot, AppError> {
    state.bus.publish(BusEvent::GlobalResume, 0);
    refresh_clock_status(state)
}
