use crate::error::AppError;
use crate::refresh::bus::{BusEvent, BusHandler, EventBus, HandlerId};
use crate::refresh::clock::{GatedTimer, RefreshClock};
use crate::refresh::types::{
    ClockState, RefreshClockStatusSnapshot, SessionIdentity, Visibility,
};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};

#[derive(Debug, Clone)]
struct GateConditions {
    session: Option<SessionIdentity>,
    visibility: Visibility,
    held: bool,
}

impl GateConditions {
    fn timers_open(&self) -> bool {
        self.session.is_some() && self.visibility.is_visible()
    }

    fn clock_open(&self) -> bool {
        self.timers_open() && !self.held
    }
}

pub struct RefreshGate {
    bus: Arc<EventBus>,
    clock: Arc<RefreshClock>,
    local_timers: Mutex<Vec<Weak<dyn GatedTimer>>>,
    conditions: Mutex<GateConditions>,
    status_store: Arc<RwLock<RefreshClockStatusSnapshot>>,
    bus_handlers: Mutex<Vec<(BusEvent, HandlerId)>>,
}

impl RefreshGate {
    pub fn new(
        bus: Arc<EventBus>,
        clock: Arc<RefreshClock>,
        status_store: Arc<RwLock<RefreshClockStatusSnapshot>>,
    ) -> Arc<Self> {
        let gate = Arc::new(Self {
            bus: Arc::clone(&bus),
            clock,
            local_timers: Mutex::new(Vec::new()),
            conditions: Mutex::new(GateConditions {
                session: None,
                visibility: Visibility::Visible,
                held: false,
            }),
            status_store,
            bus_handlers: Mutex::new(Vec::new()),
        });

        let pause_handler = hold_handler(Arc::downgrade(&gate), true);
        let resume_handler = hold_handler(Arc::downgrade(&gate), false);
        let pause_id = bus.subscribe(BusEvent::GlobalPause, pause_handler);
        let resume_id = bus.subscribe(BusEvent::GlobalResume, resume_handler);
        gate.bus_handlers.lock().extend([
            (BusEvent::GlobalPause, pause_id),
            (BusEvent::GlobalResume, resume_id),
        ]);

        gate.apply(Some("gate initialized".to_string()));
        gate
    }

    pub fn clock(&self) -> &Arc<RefreshClock> {
        &self.clock
    }

    pub fn session(&self) -> Option<SessionIdentity> {
        self.conditions.lock().session.clone()
    }

    pub fn visibility(&self) -> Visibility {
        self.conditions.lock().visibility
    }

    pub fn set_session(&self, session: Option<SessionIdentity>) -> RefreshClockStatusSnapshot {
        let reason = if session.is_some() {
            "session established"
        } else {
            "session cleared"
        };
        self.conditions.lock().session = session;
        self.apply(Some(reason.to_string()))
    }

    pub fn set_visibility(&self, visibility: Visibility) -> RefreshClockStatusSnapshot {
        self.conditions.lock().visibility = visibility;
        let reason = match visibility {
            Visibility::Visible => "window visible",
            Visibility::Hidden => "window hidden",
        };
        self.apply(Some(reason.to_string()))
    }

    pub fn set_hold(&self, held: bool) -> RefreshClockStatusSnapshot {
        self.conditions.lock().held = held;
        let reason = if held {
            "global pause requested"
        } else {
            "global resume requested"
        };
        self.apply(Some(reason.to_string()))
    }

    pub fn attach_local_timer(&self, timer: Arc<dyn GatedTimer>) -> Result<(), AppError> {
        let open = self.conditions.lock().timers_open();
        if open {
            timer.resume()?;
        } else {
            timer.pause();
        }
        self.local_timers.lock().push(Arc::downgrade(&timer));
        Ok(())
    }

    pub fn status(&self) -> RefreshClockStatusSnapshot {
        let mut snapshot = self.status_store.read().clone();
        snapshot.tick = self.clock.tick();
        snapshot
    }

    fn apply(&self, reason: Option<String>) -> RefreshClockStatusSnapshot {
        let conditions = self.conditions.lock().clone();

        let mut reason = reason;
        if conditions.clock_open() {
            match self.clock.resume() {
                Ok(true) => tracing::info!(tick = self.clock.tick(), "refresh clock resumed"),
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!("refresh clock could not resume: {error}");
                    reason = Some(format!("refresh clock could not resume: {error}"));
                }
            }
        } else if self.clock.pause() {
            tracing::info!(tick = self.clock.tick(), "refresh clock paused");
        }

        let timers_open = conditions.timers_open();
        self.local_timers.lock().retain(|timer| {
            let Some(timer) = timer.upgrade() else {
                return false;
            };
            if timers_open {
                if let Err(error) = timer.resume() {
                    tracing::warn!("local timer could not resume: {error}");
                }
            } else {
                timer.pause();
            }
            true
        });

        let snapshot = RefreshClockStatusSnapshot {
            state: if self.clock.is_running() {
                ClockState::Running
            } else {
                ClockState::Paused
            },
            tick: self.clock.tick(),
            session_active: conditions.session.is_some(),
            visibility: conditions.visibility,
            held: conditions.held,
            reason,
        };
        *self.status_store.write() = snapshot.clone();
        snapshot
    }
}

fn hold_handler(gate: Weak<RefreshGate>, held: bool) -> BusHandler {
    Arc::new(move |_tick: u64| -> Result<(), AppError> {
        if let Some(gate) = gate.upgrade() {
            gate.set_hold(held);
        }
        Ok(())
    })
}

impl Drop for RefreshGate {
    fn drop(&mut self) {
        for (event, id) in self.bus_handlers.get_mut().drain(..) {
            self.bus.unsubscribe(event, id);
        }
    }
}
