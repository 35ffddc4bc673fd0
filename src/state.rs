use crate::error::AppError;
use crate::refresh::bus::EventBus;
use crate::refresh::clock::RefreshClock;
use crate::refresh::gate::RefreshGate;
use crate::refresh::quotes::RealtimeQuoteClient;
use crate::refresh::types::{RefreshClockStatusSnapshot, RefreshConfig};
use parking_lot::RwLock;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};

const QUOTE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct AppState {
    pub started_at: Instant,
    pub config: RefreshConfig,
    pub bus: Arc<EventBus>,
    pub gate: Arc<RefreshGate>,
    pub refresh_status: Arc<RwLock<RefreshClockStatusSnapshot>>,
    pub quote_client: Arc<RealtimeQuoteClient>,
}

impl AppState {
    pub fn new(config: RefreshConfig) -> Result<Self, AppError> {
        let client = Client::builder().timeout(QUOTE_REQUEST_TIMEOUT).build()?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: RefreshConfig, client: Client) -> Self {
        let bus = Arc::new(EventBus::new());
        let clock = RefreshClock::new(
            Arc::clone(&bus),
            Duration::from_millis(config.tick_period_ms),
            config.trading_window,
        );
        let refresh_status = Arc::new(RwLock::new(RefreshClockStatusSnapshot::paused(Some(
            "clock idle".to_string(),
        ))));
        let gate = RefreshGate::new(Arc::clone(&bus), clock, Arc::clone(&refresh_status));
        let quote_client = Arc::new(RealtimeQuoteClient::new(client, &config.api_base_url));

        Self {
            started_at: Instant::now(),
            config,
            bus,
            gate,
            refresh_status,
            quote_client,
        }
    }

    pub fn revert_delay(&self) -> Duration {
        Duration::from_millis(self.config.changed_revert_ms)
    }

    pub fn local_timer_period(&self) -> Duration {
        Duration::from_millis(self.config.local_timer_period_ms)
    }
}
