//! Accrual poller
//!
//! Every interval the scheduler reads all NEW/PROCESSING orders and feeds
//! them through a bounded queue to a fixed pool of workers. Each worker asks
//! the provider about one order at a time, so at most `workers` provider
//! requests are ever in flight. Results land through the conditional update
//! of [`OrderStore::apply_accrual`], which makes re-checking an order that
//! already settled a no-op.
//!
//! A 429 from the provider pauses all provider calls until its
//! `Retry-After` elapses. Other provider and storage failures are logged and
//! the order is simply picked up again on the next tick.

use crate::config::PollerConfig;
use crate::metrics::Metrics;
use crate::provider::AccrualProvider;
use crate::storage::OrderStore;
use crate::types::{AccrualReport, OrderNumber, OrderStatus};
use crate::{Error, Result};
use dashmap::DashSet;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Result of reconciling one order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Stored status moved forward
    Updated(OrderStatus),
    /// Provider answered but nothing changed locally
    Unchanged,
    /// Provider does not know the order yet
    NotRegistered,
    /// Provider calls are paused after throttling
    Deferred,
    /// Provider or storage failure; retried next tick
    Failed,
}

impl ReconcileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Updated(_) => "updated",
            ReconcileOutcome::Unchanged => "unchanged",
            ReconcileOutcome::NotRegistered => "not_registered",
            ReconcileOutcome::Deferred => "deferred",
            ReconcileOutcome::Failed => "failed",
        }
    }
}

/// Summary of one polling pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Orders handed to workers
    pub dispatched: usize,
    pub updated: usize,
    /// Includes orders the provider does not know yet
    pub unchanged: usize,
    pub deferred: usize,
    pub failed: usize,
    /// Pending orders not dispatched (already queued, or the poller is stopping)
    pub skipped: usize,
}

impl TickReport {
    fn record(&mut self, outcome: ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Updated(_) => self.updated += 1,
            ReconcileOutcome::Unchanged | ReconcileOutcome::NotRegistered => self.unchanged += 1,
            ReconcileOutcome::Deferred => self.deferred += 1,
            ReconcileOutcome::Failed => self.failed += 1,
        }
    }
}

/// Fetches the provider's view of an order and applies it locally
pub struct Reconciler {
    orders: Arc<dyn OrderStore>,
    provider: Arc<dyn AccrualProvider>,
    metrics: Metrics,
    request_timeout: Option<Duration>,
    paused_until: Mutex<Option<Instant>>,
}

impl Reconciler {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        provider: Arc<dyn AccrualProvider>,
        metrics: Metrics,
    ) -> Self {
        Self {
            orders,
            provider,
            metrics,
            request_timeout: None,
            paused_until: Mutex::new(None),
        }
    }

    /// Upper bound on a single provider call
    pub fn with_request_timeout(mut self, limit: Duration) -> Self {
        self.request_timeout = Some(limit);
        self
    }

    /// Time left before provider calls resume, if paused
    pub fn paused_for(&self) -> Option<Duration> {
        let until = (*self.paused_until.lock())?;
        let now = Instant::now();
        (until > now).then(|| until - now)
    }

    /// Suspend provider calls for `delay`; never shortens an existing pause.
    pub fn pause(&self, delay: Duration) {
        let until = Instant::now() + delay;
        let mut paused = self.paused_until.lock();
        if (*paused).map_or(true, |current| current < until) {
            *paused = Some(until);
        }
    }

    pub async fn reconcile(&self, number: &OrderNumber) -> ReconcileOutcome {
        let outcome = self.reconcile_inner(number).await;
        self.metrics.record_reconciliation(outcome.label());
        outcome
    }

    async fn reconcile_inner(&self, number: &OrderNumber) -> ReconcileOutcome {
        if self.paused_for().is_some() {
            return ReconcileOutcome::Deferred;
        }

        let report = match self.fetch(number).await {
            Ok(Some(report)) => report,
            Ok(None) => return ReconcileOutcome::NotRegistered,
            Err(Error::ProviderThrottled { retry_after }) => {
                self.pause(retry_after);
                warn!(
                    order = %number,
                    retry_after_secs = retry_after.as_secs(),
                    "Provider calls paused"
                );
                return ReconcileOutcome::Deferred;
            }
            Err(e) => {
                warn!(order = %number, error = %e, "Accrual lookup failed");
                return ReconcileOutcome::Failed;
            }
        };

        let status = OrderStatus::from(report.status);
        match self.orders.apply_accrual(number, status, report.accrual).await {
            Ok(true) => {
                info!(order = %number, status = %status, accrual = ?report.accrual, "Order status updated");
                ReconcileOutcome::Updated(status)
            }
            Ok(false) => ReconcileOutcome::Unchanged,
            Err(e) => {
                error!(order = %number, error = %e, "Failed to store accrual");
                ReconcileOutcome::Failed
            }
        }
    }

    async fn fetch(&self, number: &OrderNumber) -> Result<Option<AccrualReport>> {
        match self.request_timeout {
            Some(limit) => timeout(limit, self.provider.fetch_accrual(number))
                .await
                .map_err(|_| Error::ProviderTimeout(limit))?,
            None => self.provider.fetch_accrual(number).await,
        }
    }
}

struct Job {
    number: OrderNumber,
    done: Option<oneshot::Sender<ReconcileOutcome>>,
}

/// Handle for submitting orders to the worker pool
///
/// An order that is already queued or being reconciled is not queued twice.
#[derive(Clone)]
pub struct ReconcileQueue {
    sender: async_channel::Sender<Job>,
    in_flight: Arc<DashSet<OrderNumber>>,
}

impl ReconcileQueue {
    /// Queue `number` without waiting; returns whether it was accepted.
    pub fn submit(&self, number: OrderNumber) -> bool {
        if !self.in_flight.insert(number.clone()) {
            return false;
        }

        let job = Job {
            number: number.clone(),
            done: None,
        };
        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(e) => {
                self.in_flight.remove(&number);
                debug!(order = %number, error = %e, "Reconciliation not queued");
                false
            }
        }
    }

    /// Queue `number`, waiting for capacity, and hand back its completion.
    async fn dispatch(&self, number: OrderNumber) -> Option<oneshot::Receiver<ReconcileOutcome>> {
        if !self.in_flight.insert(number.clone()) {
            return None;
        }

        let (done, receiver) = oneshot::channel();
        let job = Job {
            number: number.clone(),
            done: Some(done),
        };
        if self.sender.send(job).await.is_err() {
            self.in_flight.remove(&number);
            return None;
        }
        Some(receiver)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    fn close(&self) {
        self.sender.close();
    }
}

async fn run_worker(
    id: usize,
    reconciler: Arc<Reconciler>,
    jobs: async_channel::Receiver<Job>,
    in_flight: Arc<DashSet<OrderNumber>>,
    cancel: CancellationToken,
) {
    debug!(worker = id, "Accrual worker started");

    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = jobs.recv() => match job {
                Ok(job) => job,
                // Closed and drained
                Err(_) => break,
            },
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                in_flight.remove(&job.number);
                break;
            }
            outcome = reconciler.reconcile(&job.number) => outcome,
        };

        in_flight.remove(&job.number);
        if let Some(done) = job.done {
            let _ = done.send(outcome);
        }
    }

    debug!(worker = id, "Accrual worker stopped");
}

/// Worker pool plus the pass that feeds it
pub struct AccrualPoller {
    orders: Arc<dyn OrderStore>,
    reconciler: Arc<Reconciler>,
    queue: ReconcileQueue,
    metrics: Metrics,
    config: PollerConfig,
    workers: TaskTracker,
    cancel: CancellationToken,
}

impl AccrualPoller {
    /// Spawn `config.workers` workers on the current runtime.
    pub fn start(
        orders: Arc<dyn OrderStore>,
        reconciler: Arc<Reconciler>,
        metrics: Metrics,
        config: PollerConfig,
    ) -> Self {
        let (sender, receiver) = async_channel::bounded(config.queue_capacity.max(1));
        let in_flight = Arc::new(DashSet::new());
        let workers = TaskTracker::new();
        let cancel = CancellationToken::new();

        for id in 0..config.workers.max(1) {
            workers.spawn(run_worker(
                id,
                reconciler.clone(),
                receiver.clone(),
                in_flight.clone(),
                cancel.clone(),
            ));
        }

        info!(
            workers = config.workers,
            interval_ms = config.interval_ms,
            "Accrual poller started"
        );

        Self {
            orders,
            reconciler,
            queue: ReconcileQueue { sender, in_flight },
            metrics,
            config,
            workers,
            cancel,
        }
    }

    pub fn queue(&self) -> ReconcileQueue {
        self.queue.clone()
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Reconcile every pending order once and wait for the results.
    pub async fn poll_once(&self) -> Result<TickReport> {
        let mut report = TickReport::default();

        if let Some(left) = self.reconciler.paused_for() {
            debug!(resume_in_ms = left.as_millis() as u64, "Provider paused, skipping tick");
            return Ok(report);
        }

        let pending = self.orders.pending_orders().await?;

        let mut receivers = Vec::with_capacity(pending.len());
        for order in pending {
            match self.queue.dispatch(order.number).await {
                Some(receiver) => receivers.push(receiver),
                None => report.skipped += 1,
            }
        }
        report.dispatched = receivers.len();

        for result in join_all(receivers).await {
            match result {
                Ok(outcome) => report.record(outcome),
                // Worker cancelled mid-job
                Err(_) => report.skipped += 1,
            }
        }

        self.metrics.record_tick();
        if report.dispatched > 0 {
            debug!(?report, "Accrual poll tick finished");
        }
        Ok(report)
    }

    /// Stop the worker pool.
    ///
    /// With `drain`, queued jobs get up to that long to finish before the
    /// workers are cancelled; without it they are cancelled right away.
    pub async fn shutdown(&self, drain: Option<Duration>) {
        self.queue.close();
        self.workers.close();

        if let Some(limit) = drain {
            if timeout(limit, self.workers.wait()).await.is_ok() {
                info!("Accrual workers drained");
                return;
            }
            warn!(drain_ms = limit.as_millis() as u64, "Drain timed out, cancelling workers");
        }

        self.cancel.cancel();
        self.workers.wait().await;
        info!("Accrual workers stopped");
    }

    /// Run `poll_once` every `config.interval` until shut down.
    pub fn spawn(self) -> PollerHandle {
        let poller = Arc::new(self);
        let cancel = CancellationToken::new();
        let scheduler = tokio::spawn(run_scheduler(poller.clone(), cancel.clone()));

        PollerHandle {
            poller,
            cancel,
            scheduler,
        }
    }
}

async fn run_scheduler(poller: Arc<AccrualPoller>, cancel: CancellationToken) {
    let mut ticker = interval(poller.config.interval());
    // A slow pass pushes the next one back instead of bursting
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = poller.poll_once() => {
                if let Err(e) = result {
                    error!(error = %e, "Accrual poll failed");
                }
            }
        }
    }

    info!("Accrual scheduler stopped");
}

/// Running poller
pub struct PollerHandle {
    poller: Arc<AccrualPoller>,
    cancel: CancellationToken,
    scheduler: JoinHandle<()>,
}

impl PollerHandle {
    pub fn queue(&self) -> ReconcileQueue {
        self.poller.queue()
    }

    pub fn poller(&self) -> &AccrualPoller {
        &self.poller
    }

    /// Stop scheduling, then stop the workers (see [`AccrualPoller::shutdown`]).
    pub async fn shutdown(self, drain: Option<Duration>) {
        self.cancel.cancel();
        if let Err(e) = self.scheduler.await {
            error!(error = %e, "Accrual scheduler task failed");
        }
        self.poller.shutdown(drain).await;
    }
}
