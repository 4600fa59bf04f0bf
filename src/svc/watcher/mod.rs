//! # Watcher module
//!
//! A pull-based control loop, as an alternative to a push-based
//! `Watcher<T>::watch` driven by a `kube::runtime::Controller` event stream:
//! on a fixed cadence it asks the [`ResourceStore`] for every record,
//! classifies each one, reconciles it against the [`BackendAdapter`], and
//! writes the result back. A resource kind that still wants push-based
//! cluster events would add its own `Controller`-driven watcher; this loop
//! is the one every resource kind backed by [`ManagedResource`] shares.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

#[cfg(feature = "metrics")]
use std::sync::LazyLock;

#[cfg(feature = "metrics")]
use prometheus::{opts, register_int_counter_vec, IntCounterVec};
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use crate::svc::{
    backend::BackendAdapter,
    resource::ManagedResource,
    store::{Classified, ResourceStore, StoreError},
};

/// pace at which the control loop polls the store: roughly once a second.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(thiserror::Error, Debug)]
pub enum WatcherError {
    #[error("watcher for '{0}' is already running")]
    AlreadyRunning(&'static str),
}

/// releases a [`Watcher`]'s single-active flag when the control loop returns,
/// including on an early return through `?` or a panic unwind.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(feature = "metrics")]
static RECONCILIATION_SUCCESS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        opts!(
            "provisioning_operator_reconciliation_success",
            "number of successful reconciliations"
        ),
        &["kind"]
    )
    .expect("metrics 'provisioning_operator_reconciliation_success' to not be already initialized")
});

#[cfg(feature = "metrics")]
static RECONCILIATION_FAILED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        opts!(
            "provisioning_operator_reconciliation_failed",
            "number of failed reconciliations"
        ),
        &["kind"]
    )
    .expect("metrics 'provisioning_operator_reconciliation_failed' to not be already initialized")
});

#[cfg(feature = "metrics")]
static RECONCILIATION_TICK_DURATION: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        opts!(
            "provisioning_operator_reconciliation_tick_duration_us",
            "cumulative microseconds spent in reconciliation ticks"
        ),
        &["kind"]
    )
    .expect(
        "metrics 'provisioning_operator_reconciliation_tick_duration_us' to not be already initialized",
    )
});

/// single-threaded, cooperative control loop over one resource kind.
///
/// a `tokio::sync::RwLock` guards each in-flight reconciliation and a
/// `tokio::sync::watch<bool>` carries cooperative cancellation; there is
/// deliberately no dependency on `tokio_util`'s `CancellationToken` here
/// since nothing else in this stack needs it.
pub struct Watcher<R, S, B>
where
    R: ManagedResource + 'static,
    S: ResourceStore<R>,
    B: BackendAdapter + ?Sized,
{
    store: Arc<S>,
    backend: Arc<B>,
    kind: &'static str,
    running: AtomicBool,
    _marker: std::marker::PhantomData<R>,
}

impl<R, S, B> Watcher<R, S, B>
where
    R: ManagedResource + 'static,
    S: ResourceStore<R>,
    B: BackendAdapter + ?Sized,
{
    pub fn new(store: Arc<S>, backend: Arc<B>, kind: &'static str) -> Self {
        Self {
            store,
            backend,
            kind,
            running: AtomicBool::new(false),
            _marker: std::marker::PhantomData,
        }
    }

    /// runs the control loop until `shutdown` reports `true`.
    ///
    /// fails immediately if this watcher is already running: `running` is a
    /// single-active flag acquired for the lifetime of the loop, not the
    /// per-tick `guard` below, which only covers one already-started loop
    /// overrunning its own interval.
    pub async fn watch(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), WatcherError> {
        if self.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return Err(WatcherError::AlreadyRunning(self.kind));
        }

        let _release = RunningGuard(&self.running);

        let guard = RwLock::new(());
        let mut interval = tokio::time::interval(TICK_INTERVAL);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(kind = self.kind, "watcher received shutdown signal, stopping");
                        return Ok(());
                    }
                }
            }

            // a single permit: if a tick is still draining the previous
            // one (slow backend, large list), skip rather than pile up
            // concurrent passes over the same store.
            let Ok(_permit) = guard.try_write() else {
                debug!(kind = self.kind, "skipping tick, previous tick still in flight");
                continue;
            };

            self.tick().await;
        }
    }

    async fn tick(&self) {
        let started = std::time::Instant::now();

        let records = match self.store.reconcile_list().await {
            Ok(records) => records,
            Err(err) => {
                error!(kind = self.kind, error = %err, "failed to list records from store");
                return;
            }
        };

        for classified in records {
            let outcome = match classified {
                Classified::New(mut record) | Classified::Current(mut record) | Classified::Deleting(mut record) => {
                    record.reconcile(self.backend.as_ref()).await;
                    self.persist(record).await
                }
            };

            match outcome {
                Ok(()) => {
                    #[cfg(feature = "metrics")]
                    RECONCILIATION_SUCCESS.with_label_values(&[self.kind]).inc();
                }
                Err(err) => {
                    warn!(kind = self.kind, error = %err, "failed to persist reconciliation outcome");

                    #[cfg(feature = "metrics")]
                    RECONCILIATION_FAILED.with_label_values(&[self.kind]).inc();
                }
            }
        }

        #[cfg(feature = "metrics")]
        RECONCILIATION_TICK_DURATION
            .with_label_values(&[self.kind])
            .inc_by(started.elapsed().as_micros() as u64);
        #[cfg(not(feature = "metrics"))]
        let _ = started;
    }

    async fn persist(&self, record: R) -> Result<(), StoreError> {
        if record.is_deleted() {
            return self.store.evict(&record).await;
        }

        self.store.update_status(&record).await
    }
}
