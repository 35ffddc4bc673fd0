use crate::error::AppError;
use crate::refresh::quotes::QuoteFetcher;
use crate::refresh::rows::RowSurface;
use crate::refresh::types::{QuoteBatch, DEFAULT_CHANGED_REVERT_MS};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeSelection {
    Auto,
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Skipped,
    Applied {
        sequence: u64,
        updated: usize,
        untouched: usize,
    },
    Stale {
        sequence: u64,
        last_applied: u64,
    },
    Failed {
        sequence: u64,
    },
}

// Merges quote batches into one surface's rows. Every reconcile takes a sequence
// number; a batch that completes after a newer one has been applied is dropped.
pub struct Reconciler {
    revert_delay: Duration,
    issued: AtomicU64,
    last_applied: AtomicU64,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_CHANGED_REVERT_MS))
    }
}

impl Reconciler {
    pub fn new(revert_delay: Duration) -> Self {
        Self {
            revert_delay,
            issued: AtomicU64::new(0),
            last_applied: AtomicU64::new(0),
        }
    }

    pub fn revert_delay(&self) -> Duration {
        self.revert_delay
    }

    pub async fn reconcile<S, F>(
        &self,
        surface: &Arc<S>,
        fetcher: &F,
        selection: CodeSelection,
    ) -> ReconcileOutcome
    where
        S: RowSurface + ?Sized + 'static,
        F: QuoteFetcher + ?Sized,
    {
        let codes = select_codes(surface.as_ref(), selection);
        if codes.is_empty() {
            return ReconcileOutcome::Skipped;
        }

        let sequence = self.issued.fetch_add(1, Ordering::AcqRel) + 1;
        let batch = match fetcher.fetch_quotes(&codes).await {
            Ok(batch) => batch,
            Err(error) => {
                tracing::debug!(
                    surface = surface.surface_name(),
                    sequence,
                    "quote fetch failed: {error}"
                );
                return ReconcileOutcome::Failed { sequence };
            }
        };

        let last_applied = self.last_applied.fetch_max(sequence, Ordering::AcqRel);
        if last_applied > sequence {
            tracing::debug!(
                surface = surface.surface_name(),
                sequence,
                last_applied,
                "stale quote batch discarded"
            );
            return ReconcileOutcome::Stale {
                sequence,
                last_applied,
            };
        }

        let (updated, untouched) = merge_batch(surface.as_ref(), &batch);
        self.arm_revert(surface);

        tracing::debug!(
            surface = surface.surface_name(),
            sequence,
            requested = codes.len(),
            updated,
            untouched,
            "quote batch reconciled"
        );
        ReconcileOutcome::Applied {
            sequence,
            updated,
            untouched,
        }
    }

    fn arm_revert<S>(&self, surface: &Arc<S>)
    where
        S: RowSurface + ?Sized + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                surface = surface.surface_name(),
                "no runtime to clear change markers; clearing now"
            );
            surface.clear_changed();
            return;
        };

        let surface = Arc::clone(surface);
        let delay = self.revert_delay;
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            surface.clear_changed();
        });
    }
}

pub fn select_codes<S>(surface: &S, selection: CodeSelection) -> Vec<String>
where
    S: RowSurface + ?Sized,
{
    let candidates = match selection {
        CodeSelection::Auto => surface
            .visible_codes()
            .filter(|codes| !codes.is_empty())
            .unwrap_or_else(|| surface.row_codes()),
        CodeSelection::Full => surface.row_codes(),
    };

    let mut seen = HashSet::with_capacity(candidates.len());
    candidates
        .into_iter()
        .map(|code| code.trim().to_string())
        .filter(|code| !code.is_empty() && seen.insert(code.clone()))
        .collect()
}

pub fn merge_batch<S>(surface: &S, batch: &QuoteBatch) -> (usize, usize)
where
    S: RowSurface + ?Sized,
{
    let mut updated = 0;
    let mut untouched = 0;

    for row in surface.rows_snapshot() {
        let Some(quote) = batch.get(row.code.trim()) else {
            untouched += 1;
            continue;
        };

        match surface.apply_row(row.merged_with(quote)) {
            Ok(()) => updated += 1,
            Err(AppError::SurfaceGone(gone)) => {
                tracing::debug!(row = gone.as_str(), "row update skipped");
                untouched += 1;
            }
            Err(error) => {
                tracing::warn!(code = row.code.as_str(), "row update failed: {error}");
                untouched += 1;
            }
        }
    }

    (updated, untouched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::quotes::QuoteFuture;
    use crate::refresh::rows::MemoryRowStore;
    use crate::refresh::types::{PriceMove, QuoteSnapshot, ReferencePrices, WatchRow};
    use futures_util::FutureExt;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::sync::oneshot;

    fn quote(last_price: f64) -> QuoteSnapshot {
        QuoteSnapshot {
            last_price,
            prior_close: Some(10.0),
            change_amount: last_price - 10.0,
            change_percent: (last_price - 10.0) * 10.0,
            volume: 500.0,
            open: 10.0,
        }
    }

    fn batch(entries: &[(&str, f64)]) -> QuoteBatch {
        entries
            .iter()
            .map(|(code, price)| (code.to_string(), quote(*price)))
            .collect()
    }

    struct ScriptedFetcher {
        responses: Mutex<VecDeque<Result<QuoteBatch, AppError>>>,
        requests: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedFetcher {
        fn new(responses: Vec<Result<QuoteBatch, AppError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl QuoteFetcher for ScriptedFetcher {
        fn fetch_quotes<'a>(&'a self, codes: &'a [String]) -> QuoteFuture<'a> {
            self.requests.lock().push(codes.to_vec());
            let response = self
                .responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(AppError::Business("no scripted response".to_string())));
            async move { response }.boxed()
        }
    }

    struct GatedFetcher {
        pending: Mutex<VecDeque<oneshot::Receiver<QuoteBatch>>>,
    }

    impl QuoteFetcher for GatedFetcher {
        fn fetch_quotes<'a>(&'a self, _codes: &'a [String]) -> QuoteFuture<'a> {
            let receiver = self.pending.lock().pop_front();
            async move {
                match receiver {
                    Some(receiver) => receiver
                        .await
                        .map_err(|error| AppError::Runtime(error.to_string())),
                    None => Err(AppError::Business("unexpected call".to_string())),
                }
            }
            .boxed()
        }
    }

    fn priced_store() -> Arc<MemoryRowStore> {
        Arc::new(MemoryRowStore::with_rows(
            "watchlist",
            vec![
                WatchRow::new("A", "Alpha").with_price(10.0),
                WatchRow::new("B", "Beta").with_price(20.0),
                WatchRow::new("C", "Gamma").with_price(30.0),
            ],
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn missing_quotes_leave_rows_untouched() {
        let store = priced_store();
        let before = store.row("B").expect("row B exists");
        let fetcher = ScriptedFetcher::new(vec![Ok(batch(&[("A", 11.0), ("C", 29.0)]))]);

        let outcome = Reconciler::default()
            .reconcile(&store, &fetcher, CodeSelection::Auto)
            .await;

        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                sequence: 1,
                updated: 2,
                untouched: 1
            }
        );
        assert_eq!(store.row("B"), Some(before));
        assert_eq!(store.row("A").and_then(|row| row.last_price), Some(11.0));
    }

    #[tokio::test(start_paused = true)]
    async fn sets_direction_flag_from_price_move() {
        for (next, expected) in [
            (10.5, PriceMove::Up),
            (9.5, PriceMove::Down),
            (10.0, PriceMove::None),
        ] {
            let store = Arc::new(MemoryRowStore::with_rows(
                "watchlist",
                vec![WatchRow::new("A", "Alpha").with_price(10.0)],
            ));
            let fetcher = ScriptedFetcher::new(vec![Ok(batch(&[("A", next)]))]);

            Reconciler::default()
                .reconcile(&store, &fetcher, CodeSelection::Auto)
                .await;

            assert_eq!(store.row("A").map(|row| row.changed), Some(expected));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_quote_for_unpriced_row_has_no_direction() {
        let store = Arc::new(MemoryRowStore::with_rows(
            "watchlist",
            vec![WatchRow::new("A", "Alpha")],
        ));
        let fetcher = ScriptedFetcher::new(vec![Ok(batch(&[("A", 12.0)]))]);

        Reconciler::default()
            .reconcile(&store, &fetcher, CodeSelection::Auto)
            .await;

        let row = store.row("A").expect("row exists");
        assert_eq!(row.changed, PriceMove::None);
        assert_eq!(row.last_price, Some(12.0));
    }

    #[tokio::test(start_paused = true)]
    async fn change_flags_revert_within_delay() {
        let store = priced_store();
        let fetcher = ScriptedFetcher::new(vec![Ok(batch(&[("A", 11.0), ("B", 19.0)]))]);

        Reconciler::default()
            .reconcile(&store, &fetcher, CodeSelection::Auto)
            .await;
        assert_eq!(store.row("A").map(|row| row.changed), Some(PriceMove::Up));
        assert_eq!(store.row("B").map(|row| row.changed), Some(PriceMove::Down));

        tokio::time::sleep(Duration::from_millis(1_999)).await;
        assert_eq!(store.row("A").map(|row| row.changed), Some(PriceMove::Up));

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(store
            .rows_snapshot()
            .iter()
            .all(|row| row.changed == PriceMove::None));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_basis_yields_blank_percentage() {
        let store = Arc::new(MemoryRowStore::with_rows(
            "watchlist",
            vec![WatchRow::new("A", "Alpha")
                .with_price(10.0)
                .with_references(ReferencePrices {
                    build_high: Some(0.0),
                    target_price: Some(8.0),
                    ..ReferencePrices::default()
                })],
        ));
        let fetcher = ScriptedFetcher::new(vec![Ok(batch(&[("A", 10.0)]))]);

        Reconciler::default()
            .reconcile(&store, &fetcher, CodeSelection::Auto)
            .await;

        let derived = store.row("A").expect("row exists").derived;
        assert_eq!(derived.build_high, None);
        assert_eq!(derived.weekly_close_avg, None);
        assert_eq!(derived.target_price, Some(125.0));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_is_silent_and_keeps_flags() {
        let store = priced_store();
        let fetcher = ScriptedFetcher::new(vec![
            Ok(batch(&[("A", 11.0)])),
            Err(AppError::Business("rate limited".to_string())),
        ]);
        let reconciler = Reconciler::default();

        reconciler
            .reconcile(&store, &fetcher, CodeSelection::Auto)
            .await;
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        let before = store.rows_snapshot();

        let outcome = reconciler
            .reconcile(&store, &fetcher, CodeSelection::Auto)
            .await;

        assert_eq!(outcome, ReconcileOutcome::Failed { sequence: 2 });
        assert_eq!(store.rows_snapshot(), before);
        assert_eq!(store.row("A").map(|row| row.changed), Some(PriceMove::Up));
    }

    #[tokio::test]
    async fn empty_code_set_skips_fetch() {
        let store = Arc::new(MemoryRowStore::with_rows(
            "watchlist",
            vec![WatchRow::new("  ", "Blank")],
        ));
        let fetcher = ScriptedFetcher::new(Vec::new());

        let outcome = Reconciler::default()
            .reconcile(&store, &fetcher, CodeSelection::Auto)
            .await;

        assert_eq!(outcome, ReconcileOutcome::Skipped);
        assert!(fetcher.requests.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn queries_viewport_codes_when_available() {
        let store = priced_store();
        store.set_viewport(Some(1..2));
        let fetcher = ScriptedFetcher::new(vec![
            Ok(batch(&[("B", 21.0)])),
            Ok(batch(&[("B", 21.0)])),
        ]);
        let reconciler = Reconciler::default();

        reconciler
            .reconcile(&store, &fetcher, CodeSelection::Auto)
            .await;
        reconciler
            .reconcile(&store, &fetcher, CodeSelection::Full)
            .await;

        let requests = fetcher.requests.lock().clone();
        assert_eq!(requests[0], vec!["B".to_string()]);
        assert_eq!(
            requests[1],
            vec!["A".to_string(), "B".to_string(), "C".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_viewport_falls_back_to_all_codes() {
        let store = priced_store();
        store.set_viewport(Some(5..9));

        let codes = select_codes(store.as_ref(), CodeSelection::Auto);
        assert_eq!(codes, vec!["A".to_string(), "B".to_string(), "C".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn older_batch_arriving_late_is_discarded() {
        let store = priced_store();
        let (first_tx, first_rx) = oneshot::channel();
        let (second_tx, second_rx) = oneshot::channel();
        let fetcher = GatedFetcher {
            pending: Mutex::new(VecDeque::from([first_rx, second_rx])),
        };
        let reconciler = Reconciler::default();

        let first = reconciler.reconcile(&store, &fetcher, CodeSelection::Auto);
        let second = reconciler.reconcile(&store, &fetcher, CodeSelection::Auto);
        tokio::pin!(first);
        tokio::pin!(second);

        assert!(futures_util::poll!(first.as_mut()).is_pending());
        assert!(futures_util::poll!(second.as_mut()).is_pending());

        let _ = second_tx.send(batch(&[("A", 12.0)]));
        let second_outcome = second.await;
        let _ = first_tx.send(batch(&[("A", 11.0)]));
        let first_outcome = first.await;

        assert_eq!(
            first_outcome,
            ReconcileOutcome::Stale {
                sequence: 1,
                last_applied: 2
            }
        );
        assert!(matches!(
            second_outcome,
            ReconcileOutcome::Applied { sequence: 2, .. }
        ));
        assert_eq!(store.row("A").and_then(|row| row.last_price), Some(12.0));
    }

    #[tokio::test(start_paused = true)]
    async fn flags_clear_even_if_surface_was_unmounted_at_deadline() {
        let store = priced_store();
        let fetcher = ScriptedFetcher::new(vec![Ok(batch(&[("A", 11.0)]))]);

        Reconciler::default()
            .reconcile(&store, &fetcher, CodeSelection::Auto)
            .await;
        assert_eq!(store.row("A").map(|row| row.changed), Some(PriceMove::Up));

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        store.unmount();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        store.mount();

        assert_eq!(store.row("A").map(|row| row.changed), Some(PriceMove::None));
    }

    #[tokio::test(start_paused = true)]
    async fn unmounted_surface_is_left_alone() {
        let store = priced_store();
        store.unmount();
        let fetcher = ScriptedFetcher::new(vec![Ok(batch(&[("A", 11.0)]))]);

        let outcome = Reconciler::default()
            .reconcile(&store, &fetcher, CodeSelection::Auto)
            .await;

        assert!(matches!(
            outcome,
            ReconcileOutcome::Applied { updated: 0, .. }
        ));
        assert_eq!(store.row("A").and_then(|row| row.last_price), Some(10.0));
    }
}
