use crate::error::AppError;
use crate::refresh::bus::{BusEvent, BusHandler, EventBus, HandlerId};
use crate::refresh::types::{DEFAULT_CADENCE_TICKS, MAX_CADENCE_TICKS, MIN_CADENCE_TICKS};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshCause {
    Tick(u64),
    Immediate,
}

pub type RefreshCallback = Arc<dyn Fn(RefreshCause) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOptions {
    pub event: BusEvent,
    pub cadence_ticks: u32,
    pub run_immediately: bool,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            event: BusEvent::GlobalRefresh,
            cadence_ticks: DEFAULT_CADENCE_TICKS,
            run_immediately: false,
        }
    }
}

impl RefreshOptions {
    pub fn every(cadence_ticks: u32) -> Self {
        Self {
            cadence_ticks,
            ..Self::default()
        }
    }

    pub fn immediately(mut self) -> Self {
        self.run_immediately = true;
        self
    }

    pub fn normalize(self) -> Result<Self, AppError> {
        if matches!(self.event, BusEvent::GlobalPause | BusEvent::GlobalResume) {
            return Err(AppError::InvalidArgument(format!(
                "'{}' is a control event and cannot drive refreshes",
                self.event.as_str()
            )));
        }
        if !(MIN_CADENCE_TICKS..=MAX_CADENCE_TICKS).contains(&self.cadence_ticks) {
            return Err(AppError::InvalidArgument(format!(
                "cadenceTicks must be between {MIN_CADENCE_TICKS} and {MAX_CADENCE_TICKS}"
            )));
        }
        Ok(self)
    }
}

pub fn is_due(tick: u64, cadence_ticks: u32) -> bool {
    cadence_ticks <= 1 || tick % u64::from(cadence_ticks) == 0
}

pub struct RefreshSubscription {
    bus: Arc<EventBus>,
    options: RefreshOptions,
    callback: RefreshCallback,
    handler_id: Mutex<Option<HandlerId>>,
}

impl RefreshSubscription {
    pub fn options(&self) -> RefreshOptions {
        self.options
    }

    pub fn is_active(&self) -> bool {
        self.handler_id.lock().is_some()
    }

    pub fn activate(&self) -> bool {
        let mut slot = self.handler_id.lock();
        if slot.is_some() {
            return false;
        }

        let cadence_ticks = self.options.cadence_ticks;
        let callback = Arc::clone(&self.callback);
        let handler: BusHandler = Arc::new(move |tick: u64| -> Result<(), AppError> {
            if is_due(tick, cadence_ticks) {
                callback(RefreshCause::Tick(tick));
            }
            Ok(())
        });
        *slot = Some(self.bus.subscribe(self.options.event, handler));
        true
    }

    pub fn deactivate(&self) -> bool {
        match self.handler_id.lock().take() {
            Some(id) => self.bus.unsubscribe(self.options.event, id),
            None => false,
        }
    }

    pub fn cancel(&self) -> bool {
        self.deactivate()
    }

    pub fn pause(&self) {
        self.bus.publish(BusEvent::GlobalPause, 0);
    }

    pub fn resume(&self) {
        self.bus.publish(BusEvent::GlobalResume, 0);
    }

    pub fn refresh_now(&self) {
        (self.callback)(RefreshCause::Immediate);
    }
}

impl Drop for RefreshSubscription {
    fn drop(&mut self) {
        if let Some(id) = self.handler_id.get_mut().take() {
            self.bus.unsubscribe(self.options.event, id);
        }
    }
}

pub fn register_refresh(
    bus: &Arc<EventBus>,
    callback: RefreshCallback,
    options: RefreshOptions,
) -> Result<RefreshSubscription, AppError> {
    let options = options.normalize()?;
    let subscription = RefreshSubscription {
        bus: Arc::clone(bus),
        options,
        callback,
        handler_id: Mutex::new(None),
    };
    subscription.activate();

    if options.run_immediately {
        let callback = Arc::clone(&subscription.callback);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    callback(RefreshCause::Immediate);
                });
            }
            Err(_) => callback(RefreshCause::Immediate),
        }
    }

    tracing::debug!(
        event = options.event.as_str(),
        cadence_ticks = options.cadence_ticks,
        "refresh subscription registered"
    );
    Ok(subscription)
}
