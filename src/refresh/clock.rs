use crate::error::AppError;
use crate::refresh::bus::{BusEvent, EventBus};
use crate::refresh::types::TradingWindow;
use chrono::Timelike;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub type MinuteSource = Arc<dyn Fn() -> u32 + Send + Sync>;
pub type LocalTimerCallback = Arc<dyn Fn() + Send + Sync>;

pub fn local_minute_of_day() -> u32 {
    let now = chrono::Local::now();
    now.hour() * 60 + now.minute()
}

pub trait GatedTimer: Send + Sync {
    fn resume(&self) -> Result<bool, AppError>;
    fn pause(&self) -> bool;
    fn is_running(&self) -> bool;
}

struct PeriodicDriver {
    cancellation_token: CancellationToken,
    join_handle: JoinHandle<()>,
}

impl PeriodicDriver {
    fn spawn<F>(period: Duration, on_tick: F) -> Result<Self, AppError>
    where
        F: Fn() -> bool + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|error| AppError::Runtime(error.to_string()))?;
        let cancellation_token = CancellationToken::new();
        let task_token = cancellation_token.clone();

        let join_handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !on_tick() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(Self {
            cancellation_token,
            join_handle,
        })
    }

    fn stop(self) {
        self.cancellation_token.cancel();
        drop(self.join_handle);
    }
}

pub struct RefreshClock {
    bus: Arc<EventBus>,
    period: Duration,
    trading_window: Option<TradingWindow>,
    minute_source: MinuteSource,
    counter: AtomicU64,
    driver: Mutex<Option<PeriodicDriver>>,
    weak_self: Weak<RefreshClock>,
}

impl RefreshClock {
    pub fn new(
        bus: Arc<EventBus>,
        period: Duration,
        trading_window: Option<TradingWindow>,
    ) -> Arc<Self> {
        Self::with_minute_source(bus, period, trading_window, Arc::new(local_minute_of_day))
    }

    pub fn with_minute_source(
        bus: Arc<EventBus>,
        period: Duration,
        trading_window: Option<TradingWindow>,
        minute_source: MinuteSource,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            bus,
            period,
            trading_window,
            minute_source,
            counter: AtomicU64::new(0),
            driver: Mutex::new(None),
            weak_self: weak_self.clone(),
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn tick(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    // One clock firing. Outside the trading window the firing is dropped without
    // advancing the counter.
    pub fn fire(&self) -> Option<u64> {
        if let Some(window) = self.trading_window {
            let minute = (self.minute_source)();
            if !window.contains_minute(minute) {
                tracing::debug!(minute, "clock firing outside trading window skipped");
                return None;
            }
        }

        let tick = self.counter.fetch_add(1, Ordering::AcqRel) + 1;
        let report = self.bus.publish(BusEvent::GlobalRefresh, tick);
        tracing::debug!(
            tick,
            delivered = report.delivered,
            failed = report.failed,
            "refresh tick published"
        );
        Some(tick)
    }
}

impl GatedTimer for RefreshClock {
    fn resume(&self) -> Result<bool, AppError> {
        let mut driver = self.driver.lock();
        if driver.is_some() {
            return Ok(false);
        }

        let clock = self.weak_self.clone();
        *driver = Some(PeriodicDriver::spawn(self.period, move || {
            match clock.upgrade() {
                Some(clock) => {
                    clock.fire();
                    true
                }
                None => false,
            }
        })?);
        Ok(true)
    }

    fn pause(&self) -> bool {
        match self.driver.lock().take() {
            Some(driver) => {
                driver.stop();
                true
            }
            None => false,
        }
    }

    fn is_running(&self) -> bool {
        self.driver.lock().is_some()
    }
}

impl Drop for RefreshClock {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            driver.stop();
        }
    }
}

pub struct LocalIntervalTimer {
    period: Duration,
    callback: LocalTimerCallback,
    active: AtomicBool,
    gate_open: AtomicBool,
    driver: Mutex<Option<PeriodicDriver>>,
    weak_self: Weak<LocalIntervalTimer>,
}

impl LocalIntervalTimer {
    pub fn new(period: Duration, callback: LocalTimerCallback, immediate: bool) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            period,
            callback,
            active: AtomicBool::new(immediate),
            gate_open: AtomicBool::new(false),
            driver: Mutex::new(None),
            weak_self: weak_self.clone(),
        })
    }

    pub fn activate(&self) -> Result<bool, AppError> {
        self.active.store(true, Ordering::Release);
        self.sync()
    }

    pub fn deactivate(&self) -> bool {
        self.active.store(false, Ordering::Release);
        self.stop_driver()
    }

    fn sync(&self) -> Result<bool, AppError> {
        if self.active.load(Ordering::Acquire) && self.gate_open.load(Ordering::Acquire) {
            self.start_driver()
        } else {
            Ok(self.stop_driver())
        }
    }

    fn start_driver(&self) -> Result<bool, AppError> {
        let mut driver = self.driver.lock();
        if driver.is_some() {
            return Ok(false);
        }

        let timer = self.weak_self.clone();
        *driver = Some(PeriodicDriver::spawn(self.period, move || {
            match timer.upgrade() {
                Some(timer) => {
                    (timer.callback)();
                    true
                }
                None => false,
            }
        })?);
        Ok(true)
    }

    fn stop_driver(&self) -> bool {
        match self.driver.lock().take() {
            Some(driver) => {
                driver.stop();
                true
            }
            None => false,
        }
    }
}

impl GatedTimer for LocalIntervalTimer {
    fn resume(&self) -> Result<bool, AppError> {
        self.gate_open.store(true, Ordering::Release);
        self.sync()
    }

    fn pause(&self) -> bool {
        self.gate_open.store(false, Ordering::Release);
        self.stop_driver()
    }

    fn is_running(&self) -> bool {
        self.driver.lock().is_some()
    }
}

impl Drop for LocalIntervalTimer {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            driver.stop();
        }
    }
}
