use crate::error::AppError;
use crate::refresh::bus::EventBus;
use crate::refresh::quotes::QuoteFetcher;
use crate::refresh::reconcile::{CodeSelection, ReconcileOutcome, Reconciler};
use crate::refresh::rows::RowSurface;
use crate::refresh::subscription::{
    register_refresh, RefreshCallback, RefreshCause, RefreshOptions, RefreshSubscription,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct SurfaceRunner {
    surface: Arc<dyn RowSurface>,
    fetcher: Arc<dyn QuoteFetcher>,
    reconciler: Reconciler,
    known_row_count: AtomicUsize,
}

impl SurfaceRunner {
    fn selection_for(&self, cause: RefreshCause) -> CodeSelection {
        let row_count = self.surface.row_codes().len();
        let previous = self.known_row_count.swap(row_count, Ordering::AcqRel);
        match cause {
            RefreshCause::Immediate => CodeSelection::Full,
            RefreshCause::Tick(_) if previous != row_count => CodeSelection::Full,
            RefreshCause::Tick(_) => CodeSelection::Auto,
        }
    }

    async fn run(&self, selection: CodeSelection) -> ReconcileOutcome {
        self.reconciler
            .reconcile(&self.surface, self.fetcher.as_ref(), selection)
            .await
    }

    fn spawn(self: &Arc<Self>, selection: CodeSelection) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                surface = self.surface.surface_name(),
                "no runtime available; refresh skipped"
            );
            return;
        };

        let runner = Arc::clone(self);
        runtime.spawn(async move {
            runner.run(selection).await;
        });
    }
}

pub struct SurfaceRefresh {
    runner: Arc<SurfaceRunner>,
    subscription: RefreshSubscription,
}

impl SurfaceRefresh {
    pub fn surface_name(&self) -> &str {
        self.runner.surface.surface_name()
    }

    pub fn subscription(&self) -> &RefreshSubscription {
        &self.subscription
    }

    pub fn activate(&self) -> bool {
        self.subscription.activate()
    }

    pub fn deactivate(&self) -> bool {
        self.subscription.deactivate()
    }

    pub fn rows_changed(&self) {
        self.runner
            .known_row_count
            .store(self.runner.surface.row_codes().len(), Ordering::Release);
        self.runner.spawn(CodeSelection::Full);
    }

    pub async fn refresh(&self, selection: CodeSelection) -> ReconcileOutcome {
        self.runner.run(selection).await
    }
}

pub fn mount_surface_refresh(
    bus: &Arc<EventBus>,
    surface: Arc<dyn RowSurface>,
    fetcher: Arc<dyn QuoteFetcher>,
    revert_delay: Duration,
    options: RefreshOptions,
) -> Result<SurfaceRefresh, AppError> {
    let runner = Arc::new(SurfaceRunner {
        known_row_count: AtomicUsize::new(surface.row_codes().len()),
        surface,
        fetcher,
        reconciler: Reconciler::new(revert_delay),
    });

    let callback_runner = Arc::downgrade(&runner);
    let callback: RefreshCallback = Arc::new(move |cause: RefreshCause| {
        if let Some(runner) = callback_runner.upgrade() {
            let selection = runner.selection_for(cause);
            runner.spawn(selection);
        }
    });
    let subscription = register_refresh(bus, callback, options)?;

    tracing::info!(
        surface = runner.surface.surface_name(),
        cadence_ticks = options.cadence_ticks,
        "surface refresh mounted"
    );
    Ok(SurfaceRefresh {
        runner,
        subscription,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::bus::BusEvent;
    use crate::refresh::quotes::QuoteFuture;
    use crate::refresh::rows::MemoryRowStore;
    use crate::refresh::types::{QuoteBatch, QuoteSnapshot, WatchRow};
    use futures_util::FutureExt;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingFetcher {
        requests: Mutex<Vec<Vec<String>>>,
    }

    impl QuoteFetcher for RecordingFetcher {
        fn fetch_quotes<'a>(&'a self, codes: &'a [String]) -> QuoteFuture<'a> {
            self.requests.lock().push(codes.to_vec());
            let batch: QuoteBatch = codes
                .iter()
                .map(|code| {
                    let quote = QuoteSnapshot {
                        last_price: 42.0,
                        prior_close: Some(40.0),
                        change_amount: 2.0,
                        change_percent: 5.0,
                        volume: 1_000.0,
                        open: 41.0,
                    };
                    (code.clone(), quote)
                })
                .collect();
            async move { Ok(batch) }.boxed()
        }
    }

    fn watchlist() -> Arc<MemoryRowStore> {
        Arc::new(MemoryRowStore::with_rows(
            "watchlist",
            vec![
                WatchRow::new("A", "Alpha").with_price(40.0),
                WatchRow::new("B", "Beta").with_price(40.0),
                WatchRow::new("C", "Gamma").with_price(40.0),
            ],
        ))
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn due_tick_reconciles_viewport_codes() {
        let bus = Arc::new(EventBus::new());
        let store = watchlist();
        store.set_viewport(Some(0..2));
        let fetcher = Arc::new(RecordingFetcher::default());
        let _mounted = mount_surface_refresh(
            &bus,
            store.clone(),
            fetcher.clone(),
            Duration::from_millis(2_000),
            RefreshOptions::every(5),
        )
        .expect("valid options");

        bus.publish(BusEvent::GlobalRefresh, 4);
        settle().await;
        assert!(fetcher.requests.lock().is_empty());

        bus.publish(BusEvent::GlobalRefresh, 5);
        settle().await;
        assert_eq!(
            *fetcher.requests.lock(),
            vec![vec!["A".to_string(), "B".to_string()]]
        );
        assert_eq!(store.row("A").and_then(|row| row.last_price), Some(42.0));
        assert_eq!(store.row("C").and_then(|row| row.last_price), Some(40.0));
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_mount_refreshes_every_row() {
        let bus = Arc::new(EventBus::new());
        let store = watchlist();
        store.set_viewport(Some(0..1));
        let fetcher = Arc::new(RecordingFetcher::default());
        let _mounted = mount_surface_refresh(
            &bus,
            store.clone(),
            fetcher.clone(),
            Duration::from_millis(2_000),
            RefreshOptions::every(60).immediately(),
        )
        .expect("valid options");

        settle().await;
        assert_eq!(fetcher.requests.lock()[0].len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn row_count_change_forces_full_refresh() {
        let bus = Arc::new(EventBus::new());
        let store = watchlist();
        store.set_viewport(Some(0..1));
        let fetcher = Arc::new(RecordingFetcher::default());
        let _mounted = mount_surface_refresh(
            &bus,
            store.clone(),
            fetcher.clone(),
            Duration::from_millis(2_000),
            RefreshOptions::every(1),
        )
        .expect("valid options");

        store.remove_row("C");
        bus.publish(BusEvent::GlobalRefresh, 1);
        settle().await;
        bus.publish(BusEvent::GlobalRefresh, 2);
        settle().await;

        let requests = fetcher.requests.lock().clone();
        assert_eq!(requests[0], vec!["A".to_string(), "B".to_string()]);
        assert_eq!(requests[1], vec!["A".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn deactivated_surface_ignores_ticks() {
        let bus = Arc::new(EventBus::new());
        let store = watchlist();
        let fetcher = Arc::new(RecordingFetcher::default());
        let mounted = mount_surface_refresh(
            &bus,
            store,
            fetcher.clone(),
            Duration::from_millis(2_000),
            RefreshOptions::every(1),
        )
        .expect("valid options");

        assert!(mounted.deactivate());
        bus.publish(BusEvent::GlobalRefresh, 1);
        settle().await;
        assert!(fetcher.requests.lock().is_empty());

        assert!(mounted.activate());
        bus.publish(BusEvent::GlobalRefresh, 2);
        settle().await;
        assert_eq!(fetcher.requests.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_refresh_reports_outcome() {
        let bus = Arc::new(EventBus::new());
        let store = watchlist();
        let fetcher = Arc::new(RecordingFetcher::default());
        let mounted = mount_surface_refresh(
            &bus,
            store,
            fetcher,
            Duration::from_millis(2_000),
            RefreshOptions::every(3),
        )
        .expect("valid options");

        let outcome = mounted.refresh(CodeSelection::Full).await;
        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                sequence: 1,
                updated: 3,
                untouched: 0
            }
        );
        assert_eq!(mounted.surface_name(), "watchlist");
    }
}
