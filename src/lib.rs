pub mod commands;
pub mod config;
pub mod error;
pub mod refresh;
pub mod state;

use commands::refresh_clock::{update_session, update_visibility, UpdateSessionArgs};
use config::AppConfig;
use error::AppError;
use refresh::clock::LocalIntervalTimer;
use refresh::rows::MemoryRowStore;
use refresh::subscription::RefreshOptions;
use refresh::surface::mount_surface_refresh;
use refresh::types::{Visibility, WatchRow};
use refresh::CADENCE_WATCHLIST_TICKS;
use state::AppState;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info";
const WATCHLIST_SURFACE: &str = "watchlist";

pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub fn run() -> Result<(), AppError> {
    init_tracing();
    let config = config::load_from_env()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config))
}

async fn serve(config: AppConfig) -> Result<(), AppError> {
    let state = AppState::new(config.refresh)?;

    let rows = config
        .watch_codes
        .iter()
        .map(|code| WatchRow::new(code.as_str(), code.as_str()))
        .collect();
    let watchlist = Arc::new(MemoryRowStore::with_rows(WATCHLIST_SURFACE, rows));
    let mounted = mount_surface_refresh(
        &state.bus,
        watchlist,
        state.quote_client.clone(),
        state.revert_delay(),
        RefreshOptions::every(CADENCE_WATCHLIST_TICKS).immediately(),
    )?;

    let clock = Arc::clone(state.gate.clock());
    let countdown = LocalIntervalTimer::new(
        state.local_timer_period(),
        Arc::new(move || tracing::trace!(tick = clock.tick(), "countdown")),
        true,
    );
    state.gate.attach_local_timer(countdown.clone())?;

    let session = config.session.map(|identity| UpdateSessionArgs {
        user_id: Some(identity.user_id),
        token: identity.token,
    });
    update_session(&state, session)?;
    let status = update_visibility(&state, Visibility::Visible)?;
    tracing::info!(
        surface = mounted.surface_name(),
        codes = config.watch_codes.len(),
        endpoint = state.quote_client.endpoint(),
        clock = ?status.state,
        "watchlist refresh started"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");

    mounted.deactivate();
    countdown.deactivate();
    update_session(&state, None)?;
    Ok(())
}
