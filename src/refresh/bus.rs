use crate::error::AppError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BusEvent {
    #[serde(rename = "global-refresh")]
    GlobalRefresh,
    #[serde(rename = "active-refresh")]
    ActiveRefresh,
    #[serde(rename = "global-pause")]
    GlobalPause,
    #[serde(rename = "global-resume")]
    GlobalResume,
}

impl BusEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GlobalRefresh => "global-refresh",
            Self::ActiveRefresh => "active-refresh",
            Self::GlobalPause => "global-pause",
            Self::GlobalResume => "global-resume",
        }
    }

    pub fn parse_str(value: &str) -> Result<Self, AppError> {
        match value {
            "global-refresh" => Ok(Self::GlobalRefresh),
            "active-refresh" => Ok(Self::ActiveRefresh),
            "global-pause" => Ok(Self::GlobalPause),
            "global-resume" => Ok(Self::GlobalResume),
            other => Err(AppError::InvalidArgument(format!(
                "unknown bus event '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

// Handlers receive the tick counter for refresh events and 0 for pause/resume.
pub type BusHandler = Arc<dyn Fn(u64) -> Result<(), AppError> + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
struct BusRegistry {
    next_id: u64,
    handlers: HashMap<BusEvent, Vec<(HandlerId, BusHandler)>>,
}

#[derive(Default)]
pub struct EventBus {
    registry: Mutex<BusRegistry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, event: BusEvent, handler: BusHandler) -> HandlerId {
        let mut registry = self.registry.lock();
        registry.next_id = registry.next_id.saturating_add(1);
        let id = HandlerId(registry.next_id);
        registry
            .handlers
            .entry(event)
            .or_default()
            .push((id, handler));
        id
    }

    pub fn unsubscribe(&self, event: BusEvent, id: HandlerId) -> bool {
        let mut registry = self.registry.lock();
        let Some(handlers) = registry.handlers.get_mut(&event) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        before != handlers.len()
    }

    pub fn handler_count(&self, event: BusEvent) -> usize {
        self.registry
            .lock()
            .handlers
            .get(&event)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn publish(&self, event: BusEvent, tick: u64) -> DispatchReport {
        // Handlers may touch the registry, so dispatch runs on a snapshot.
        let snapshot: Vec<(HandlerId, BusHandler)> = {
            let registry = self.registry.lock();
            registry.handlers.get(&event).cloned().unwrap_or_default()
        };

        let mut report = DispatchReport::default();
        for (id, handler) in snapshot {
            match handler(tick) {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    report.failed += 1;
                    tracing::warn!(
                        event = event.as_str(),
                        handler = id.0,
                        "bus handler failed: {error}"
                    );
                }
            }
        }
        report
    }
}
