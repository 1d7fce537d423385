//! Subscription lifecycle for streamed views.
//!
//! A [`Subscription`] runs at most one ingestion task. Replacing it cancels
//! the running task and bumps a generation counter; a task only publishes
//! while its generation is current, so late events from a superseded stream
//! never overwrite the new one.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::aggregate::{SampleAggregator, SampleView};
use crate::client::{MasterSource, SampleRequest};
use crate::error::Result;
use crate::filters::VisualizationFilters;
use crate::metric_names::{MetricNamesAggregator, MetricNamesView};
use crate::stream::read_stream;

#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionState<V> {
    /// Nothing subscribed yet, or cancelled.
    Idle,
    /// Subscribed, no event received yet.
    Loading,
    Ready(V),
    /// The stream failed. Distinct from a stream that has sent no data.
    Failed(String),
}

impl<V> SubscriptionState<V> {
    pub fn value(&self) -> Option<&V> {
        match self {
            SubscriptionState::Ready(v) => Some(v),
            _ => None,
        }
    }
}

/// Handle given to an ingestion task for publishing results.
pub struct Publisher<V> {
    generation: u64,
    current: Arc<AtomicU64>,
    cancel: CancellationToken,
    tx: watch::Sender<SubscriptionState<V>>,
}

impl<V> Publisher<V> {
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Publish a value. Returns false, without touching the shared state,
    /// when this task has been superseded.
    pub fn publish(&self, value: V) -> bool {
        self.set(SubscriptionState::Ready(value))
    }

    fn set(&self, state: SubscriptionState<V>) -> bool {
        // The generation is checked under the watch lock so a concurrent
        // `replace` cannot interleave between the check and the write.
        let mut state = Some(state);
        self.tx.send_if_modified(|slot| {
            if !self.is_current() || self.cancel.is_cancelled() {
                return false;
            }
            if let Some(next) = state.take() {
                *slot = next;
            }
            true
        })
    }
}

pub struct Subscription<V> {
    current: Arc<AtomicU64>,
    cancel: CancellationToken,
    tx: watch::Sender<SubscriptionState<V>>,
}

impl<V: Send + Sync + 'static> Default for Subscription<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Send + Sync + 'static> Subscription<V> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SubscriptionState::Idle);
        let cancel = CancellationToken::new();
        cancel.cancel();
        Self {
            current: Arc::new(AtomicU64::new(0)),
            cancel,
            tx,
        }
    }

    pub fn watch(&self) -> watch::Receiver<SubscriptionState<V>> {
        self.tx.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Cancel the running task, if any, and start `run` in its place.
    /// Returns the new generation.
    pub fn replace<F, Fut>(&mut self, run: F) -> u64
    where
        F: FnOnce(Publisher<V>) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        let generation = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.tx.send_replace(SubscriptionState::Loading);

        let publisher = Publisher {
            generation,
            current: Arc::clone(&self.current),
            cancel: self.cancel.clone(),
            tx: self.tx.clone(),
        };
        let failure = Publisher {
            generation,
            current: Arc::clone(&self.current),
            cancel: self.cancel.clone(),
            tx: self.tx.clone(),
        };

        let task = run(publisher);
        tokio::spawn(async move {
            match task.await {
                Ok(()) => debug!(generation, "subscription stream finished"),
                Err(e) if e.is_aborted() => debug!(generation, "subscription cancelled"),
                Err(e) => {
                    warn!(generation, error = %e, "subscription failed");
                    failure.set(SubscriptionState::Failed(e.to_string()));
                }
            }
        });

        debug!(generation, "subscription replaced");
        generation
    }

    /// Stop the running task and return to `Idle`.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.current.fetch_add(1, Ordering::SeqCst);
        self.tx.send_replace(SubscriptionState::Idle);
    }
}

impl<V> Drop for Subscription<V> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ─── Stream-backed views ─────────────────────────────────────────────────────

/// (Re)subscribe `sub` to the trials-sample stream. Aggregation state is
/// created fresh for every subscription.
pub fn subscribe_samples(
    sub: &mut Subscription<SampleView>,
    source: Arc<dyn MasterSource>,
    request: SampleRequest,
) -> u64 {
    let events = source.experiments_sample(request);
    sub.replace(move |publisher| async move {
        let mut aggregator = SampleAggregator::new();
        let cancel = publisher.cancel_token().clone();
        read_stream(events, &cancel, |event| {
            if event.trials.is_empty() {
                return;
            }
            let view = aggregator.ingest(&event).clone();
            publisher.publish(view);
        })
        .await
        .map(|_| ())
    })
}

/// (Re)subscribe `sub` to the metric-names stream of `trial_ids`.
pub fn subscribe_metric_names(
    sub: &mut Subscription<MetricNamesView>,
    source: Arc<dyn MasterSource>,
    trial_ids: Vec<i64>,
) -> u64 {
    let events = source.trials_metric_names(trial_ids);
    sub.replace(move |publisher| async move {
        let mut aggregator = MetricNamesAggregator::new();
        let cancel = publisher.cancel_token().clone();
        read_stream(events, &cancel, |event| {
            aggregator.ingest(&event);
            publisher.publish(aggregator.view());
        })
        .await
        .map(|_| ())
    })
}

/// A comparison of a fixed set of experiments driven by
/// [`VisualizationFilters`].
///
/// The sample subscription is only replaced when the filters'
/// [`subscription_key`](VisualizationFilters::subscription_key) changes, so
/// render-only edits such as the batch or scale keep the running stream.
pub struct CompareSession {
    source: Arc<dyn MasterSource>,
    experiment_ids: Vec<i64>,
    filters: VisualizationFilters,
    key: Option<SampleRequest>,
    sub: Subscription<SampleView>,
}

impl CompareSession {
    pub fn new(
        source: Arc<dyn MasterSource>,
        experiment_ids: Vec<i64>,
        filters: VisualizationFilters,
    ) -> Self {
        Self {
            source,
            experiment_ids,
            filters,
            key: None,
            sub: Subscription::new(),
        }
    }

    pub fn filters(&self) -> &VisualizationFilters {
        &self.filters
    }

    pub fn watch(&self) -> watch::Receiver<SubscriptionState<SampleView>> {
        self.sub.watch()
    }

    pub fn generation(&self) -> u64 {
        self.sub.generation()
    }

    /// Subscribe if the current filters select a different sample request
    /// than the running one. Returns whether a new subscription started.
    pub fn sync(&mut self) -> bool {
        let key = self.filters.subscription_key(&self.experiment_ids);
        if self.key.as_ref() == Some(&key) {
            return false;
        }
        debug!(?key, "compare filters changed, resubscribing");
        subscribe_samples(&mut self.sub, Arc::clone(&self.source), key.clone());
        self.key = Some(key);
        true
    }

    /// Swap in new filters and resubscribe when needed.
    pub fn set_filters(&mut self, filters: VisualizationFilters) -> bool {
        self.filters = filters;
        self.sync()
    }

    /// Fill in data-driven defaults from a received view: the first batch,
    /// and the default metric when none is selected. Returns whether the
    /// filters changed.
    pub fn apply_view_defaults(&mut self, view: &SampleView) -> bool {
        let metric = self.filters.ensure_metric(!view.trial_ids.is_empty());
        if metric {
            self.sync();
        }
        let batch = self.filters.apply_default_batch(&view.batches);
        metric || batch
    }

    pub fn cancel(&mut self) {
        self.sub.cancel();
        self.key = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use futures_util::future::{self, BoxFuture};
    use futures_util::stream::{self, StreamExt};

    use crate::client::EventStream;
    use crate::error::ScopeError;
    use crate::filters::{Scale, DEFAULT_METRIC};
    use crate::models::{
        GetExperimentResponse, MetricName, MetricNamesEvent, MetricType, ModelItem, ModelList,
        ModelPatch, TrialsSampleEvent, User, ValidationHistory,
    };
    use crate::registry::ModelListQuery;

    #[tokio::test]
    async fn test_replace_rejects_stale_publisher() {
        let mut sub = Subscription::<u32>::new();
        let slot: Arc<Mutex<Option<Publisher<u32>>>> = Arc::new(Mutex::new(None));

        let stash = Arc::clone(&slot);
        let first = sub.replace(move |p| {
            *stash.lock().unwrap() = Some(p);
            future::pending::<Result<()>>()
        });
        let old = slot.lock().unwrap().take().unwrap();
        assert!(old.publish(1));
        assert_eq!(*sub.watch().borrow(), SubscriptionState::Ready(1));

        let stash = Arc::clone(&slot);
        let second = sub.replace(move |p| {
            *stash.lock().unwrap() = Some(p);
            future::pending::<Result<()>>()
        });
        assert_eq!(second, first + 1);
        assert!(old.cancel_token().is_cancelled());
        assert!(!old.is_current());
        assert!(!old.publish(99));
        assert_eq!(*sub.watch().borrow(), SubscriptionState::Loading);

        let new = slot.lock().unwrap().take().unwrap();
        assert!(new.publish(2));
        assert_eq!(sub.watch().borrow().value(), Some(&2));
    }

    #[tokio::test]
    async fn test_failure_is_published() {
        let mut sub = Subscription::<u32>::new();
        let mut rx = sub.watch();
        sub.replace(|_| async { Err(ScopeError::StreamAborted("reset".into())) });
        rx.wait_for(|s| matches!(s, SubscriptionState::Failed(_)))
            .await
            .unwrap();
    }

    /// Records sample requests; every stream stays open without data.
    #[derive(Default)]
    struct CountingSource {
        requests: Mutex<Vec<SampleRequest>>,
    }

    impl MasterSource for CountingSource {
        fn experiments_sample(&self, request: SampleRequest) -> EventStream<TrialsSampleEvent> {
            self.requests.lock().unwrap().push(request);
            stream::pending().boxed()
        }

        fn trials_metric_names(&self, _: Vec<i64>) -> EventStream<MetricNamesEvent> {
            stream::pending().boxed()
        }

        fn experiment(&self, id: i64) -> BoxFuture<'_, Result<GetExperimentResponse>> {
            Box::pin(async move { Err(ScopeError::ExperimentNotFound(id)) })
        }

        fn validation_history(&self, id: i64) -> BoxFuture<'_, Result<Vec<ValidationHistory>>> {
            Box::pin(async move { Err(ScopeError::ExperimentNotFound(id)) })
        }

        fn models(&self, _: ModelListQuery) -> BoxFuture<'_, Result<ModelList>> {
            Box::pin(async { Ok(ModelList::default()) })
        }

        fn model(&self, name: &str) -> BoxFuture<'_, Result<ModelItem>> {
            let name = name.to_string();
            Box::pin(async move { Err(ScopeError::ModelNotFound(name)) })
        }

        fn model_labels(&self) -> BoxFuture<'_, Result<Vec<String>>> {
            Box::pin(async { Ok(vec![]) })
        }

        fn current_user(&self) -> BoxFuture<'_, Result<User>> {
            Box::pin(async { Err(ScopeError::Other("no session".into())) })
        }

        fn archive_model(&self, _: &str) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn unarchive_model(&self, _: &str) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn delete_model(&self, _: &str) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn patch_model(&self, name: &str, _: ModelPatch) -> BoxFuture<'_, Result<ModelItem>> {
            let name = name.to_string();
            Box::pin(async move { Err(ScopeError::ModelNotFound(name)) })
        }
    }

    #[tokio::test]
    async fn test_compare_session_resubscribes_only_on_key_change() {
        let source = Arc::new(CountingSource::default());
        let mut session =
            CompareSession::new(source.clone(), vec![3, 4], VisualizationFilters::default());
        assert!(session.sync());
        assert!(!session.sync());
        let first = session.generation();

        let mut filters = session.filters().clone();
        filters.batch = 50;
        filters.scale = Scale::Log;
        assert!(!session.set_filters(filters.clone()));
        assert_eq!(session.generation(), first);

        filters.max_trial = 10;
        assert!(session.set_filters(filters));
        assert!(session.generation() > first);

        let requests = source.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].experiment_ids, vec![3, 4]);
        assert_eq!(requests[1].max_trials, 10);
    }

    #[tokio::test]
    async fn test_compare_session_view_defaults() {
        let source = Arc::new(CountingSource::default());
        let filters = VisualizationFilters {
            metric: MetricName::new("", MetricType::Training),
            ..Default::default()
        };
        let mut session = CompareSession::new(source.clone(), vec![1], filters);
        session.sync();
        let first = session.generation();

        let view = SampleView {
            trial_ids: vec![8],
            batches: vec![100, 200],
            ..Default::default()
        };
        assert!(session.apply_view_defaults(&view));
        assert_eq!(session.filters().metric.name, DEFAULT_METRIC);
        assert_eq!(session.filters().batch, 100);
        assert!(session.generation() > first);

        assert!(!session.apply_view_defaults(&view));
        assert_eq!(source.requests.lock().unwrap().len(), 2);
        assert_eq!(
            source.requests.lock().unwrap()[1].metric,
            MetricName::new(DEFAULT_METRIC, MetricType::Validation)
        );
    }

    #[tokio::test]
    async fn test_cancel_returns_to_idle() {
        let mut sub = Subscription::<u32>::new();
        assert_eq!(*sub.watch().borrow(), SubscriptionState::Idle);
        sub.replace(|_| future::pending::<Result<()>>());
        assert_eq!(*sub.watch().borrow(), SubscriptionState::Loading);
        sub.cancel();
        assert_eq!(*sub.watch().borrow(), SubscriptionState::Idle);
    }
}
