//! Per-kind worker pool.
//!
//! A [`Controller`] owns `parallelism` workers, each draining its own queue.
//! Requests are routed to a worker by hashing their id, which keeps all work
//! for one resource on one worker. With the default parallelism of 1 every
//! request of the kind is handled serially.
//!
//! Each worker keeps at most one scheduled retry per id. A retry directive
//! for an id that already has one pending is dropped, so repeated events for
//! a resource that is waiting on something external do not start parallel
//! retry chains.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use crate::{
    BackoffPolicy, Directive, ReconcileError, Request, DEFAULT_PARALLELISM,
    DEFAULT_RECONCILE_TIMEOUT,
};

/// Handles reconcile requests for one resource kind.
#[async_trait]
pub trait Reconciler<Id>: Send + Sync + 'static {
    async fn reconcile(&self, request: Request<Id>) -> Directive;
}

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Number of workers.
    pub parallelism: usize,

    /// Upper bound on a single reconcile call.
    pub timeout: Duration,

    /// Queue capacity per worker.
    pub queue_capacity: usize,

    /// Backoff applied when a reconcile call times out.
    pub backoff: BackoffPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            timeout: DEFAULT_RECONCILE_TIMEOUT,
            queue_capacity: 1024,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Worker pool dispatching requests to a [`Reconciler`].
pub struct Controller<Id> {
    name: String,
    partitions: Vec<mpsc::Sender<Request<Id>>>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<Id> Controller<Id>
where
    Id: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    /// Spawn the workers. Must be called from within a Tokio runtime.
    pub fn spawn<R: Reconciler<Id>>(
        name: impl Into<String>,
        reconciler: Arc<R>,
        config: ControllerConfig,
    ) -> Self {
        let name = name.into();
        let parallelism = config.parallelism.max(1);
        let (shutdown_tx, _) = watch::channel(false);

        let mut partitions = Vec::with_capacity(parallelism);
        let mut workers = Vec::with_capacity(parallelism);

        for index in 0..parallelism {
            let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
            let worker = Worker {
                controller: name.clone(),
                index,
                reconciler: Arc::clone(&reconciler),
                requeue: tx.clone(),
                timeout: config.timeout,
                backoff: config.backoff,
                shutdown: shutdown_tx.subscribe(),
                pending_retries: Mutex::new(HashSet::new()),
            };
            workers.push(tokio::spawn(worker.run(rx)));
            partitions.push(tx);
        }

        debug!(controller = %name, parallelism, "Controller started");

        Self {
            name,
            partitions,
            shutdown_tx,
            workers: Mutex::new(workers),
        }
    }

    /// Controller name, used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a reconcile request for `id`.
    pub async fn reconcile(&self, id: Id) -> Result<(), ReconcileError> {
        if *self.shutdown_tx.borrow() {
            return Err(ReconcileError::Stopped(self.name.clone()));
        }

        let sender = &self.partitions[self.partition(&id)];
        sender
            .send(Request::new(id))
            .await
            .map_err(|_| ReconcileError::Stopped(self.name.clone()))
    }

    fn partition(&self, id: &Id) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() % self.partitions.len() as u64) as usize
    }

    /// Stop accepting work and wait for the workers to finish their current request.
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for handle in workers {
            if let Err(e) = handle.await {
                error!(controller = %self.name, error = %e, "Worker task panicked");
            }
        }

        debug!(controller = %self.name, "Controller stopped");
    }
}

// =============================================================================
// Worker
// =============================================================================

struct Worker<Id, R> {
    controller: String,
    index: usize,
    reconciler: Arc<R>,
    requeue: mpsc::Sender<Request<Id>>,
    timeout: Duration,
    backoff: BackoffPolicy,
    shutdown: watch::Receiver<bool>,
    /// Ids with a retry sleeping or queued.
    pending_retries: Mutex<HashSet<Id>>,
}

impl<Id, R> Worker<Id, R>
where
    Id: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static,
    R: Reconciler<Id>,
{
    async fn run(mut self, mut rx: mpsc::Receiver<Request<Id>>) {
        loop {
            let request = tokio::select! {
                biased;

                _ = self.shutdown.changed() => break,
                request = rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            self.process(request).await;
        }

        debug!(controller = %self.controller, worker = self.index, "Worker exiting");
    }

    #[instrument(skip(self, request), fields(controller = %self.controller, id = %request.id, attempt = request.attempt()))]
    async fn process(&self, request: Request<Id>) {
        let started = Instant::now();

        if request.attempt() > 0 {
            self.pending_retries.lock().await.remove(&request.id);
        }

        let directive =
            match tokio::time::timeout(self.timeout, self.reconciler.reconcile(request.clone()))
                .await
            {
                Ok(directive) => directive,
                Err(_) => {
                    let error = ReconcileError::Timeout {
                        resource: request.id.to_string(),
                        elapsed: started.elapsed(),
                    };
                    warn!(error = %error, "Reconcile call timed out");
                    request.retry_with_backoff(error, &self.backoff)
                }
            };

        match directive {
            Directive::Ack => {
                debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Reconciled");
            }
            Directive::Retry { error, after } => {
                debug!(error = %error, retry_in_ms = after.as_millis() as u64, "Reconcile will be retried");
                self.schedule_retry(request.next_attempt(), after).await;
            }
            Directive::Fail { error } => {
                error!(error = %error, "Reconcile failed permanently");
            }
        }
    }

    async fn schedule_retry(&self, request: Request<Id>, after: Duration) {
        if !self.pending_retries.lock().await.insert(request.id.clone()) {
            debug!("Retry already pending");
            return;
        }

        let requeue = self.requeue.clone();
        let mut shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(after) => {
                    if requeue.send(request).await.is_err() {
                        debug!("Worker gone, dropping retry");
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Records every attempt and how many calls overlapped.
    #[derive(Default)]
    struct RecordingReconciler {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
        attempts: Mutex<Vec<u32>>,
        delay: Duration,
        retry_first: bool,
    }

    #[async_trait]
    impl Reconciler<String> for RecordingReconciler {
        async fn reconcile(&self, request: Request<String>) -> Directive {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.attempts.lock().await.push(request.attempt());

            tokio::time::sleep(self.delay).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);

            if self.retry_first && request.attempt() == 0 {
                return request.retry(anyhow::anyhow!("not yet"), Duration::from_millis(10));
            }
            request.ack()
        }
    }

    async fn wait_for_calls(reconciler: &RecordingReconciler, expected: usize) {
        for _ in 0..400 {
            if reconciler.calls.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("reconciler was not called {expected} times");
    }

    #[tokio::test]
    async fn test_same_id_never_runs_concurrently() {
        let reconciler = Arc::new(RecordingReconciler {
            delay: Duration::from_millis(10),
            ..Default::default()
        });
        let controller = Controller::spawn(
            "test",
            Arc::clone(&reconciler),
            ControllerConfig::default(),
        );

        for _ in 0..5 {
            controller.reconcile("inst-1".to_string()).await.unwrap();
        }

        wait_for_calls(&reconciler, 5).await;
        assert_eq!(reconciler.max_in_flight.load(Ordering::SeqCst), 1);

        controller.stop().await;
    }

    #[tokio::test]
    async fn test_retry_is_rescheduled() {
        let reconciler = Arc::new(RecordingReconciler {
            retry_first: true,
            ..Default::default()
        });
        let controller = Controller::spawn(
            "test",
            Arc::clone(&reconciler),
            ControllerConfig::default(),
        );

        controller.reconcile("inst-1".to_string()).await.unwrap();

        wait_for_calls(&reconciler, 2).await;
        assert_eq!(*reconciler.attempts.lock().await, vec![0, 1]);

        controller.stop().await;
    }

    #[tokio::test]
    async fn test_repeated_requests_share_one_retry_chain() {
        /// Never converges.
        #[derive(Default)]
        struct AlwaysRetry {
            attempts: Mutex<Vec<u32>>,
        }

        #[async_trait]
        impl Reconciler<String> for AlwaysRetry {
            async fn reconcile(&self, request: Request<String>) -> Directive {
                self.attempts.lock().await.push(request.attempt());
                request.retry(anyhow::anyhow!("in progress"), Duration::from_millis(50))
            }
        }

        let reconciler = Arc::new(AlwaysRetry::default());
        let controller = Controller::spawn(
            "test",
            Arc::clone(&reconciler),
            ControllerConfig::default(),
        );

        for _ in 0..5 {
            controller.reconcile("inst-1".to_string()).await.unwrap();
        }

        for _ in 0..400 {
            if reconciler.attempts.lock().await.iter().any(|&a| a >= 4) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        controller.stop().await;

        let attempts = reconciler.attempts.lock().await.clone();
        assert_eq!(attempts.iter().filter(|&&a| a == 0).count(), 5);
        assert!(attempts.iter().any(|&a| a >= 4));
        // One chain: every retry attempt number shows up once.
        for n in 1..=4 {
            assert_eq!(attempts.iter().filter(|&&a| a == n).count(), 1, "attempt {n}");
        }
    }

    #[tokio::test]
    async fn test_timeout_becomes_retry() {
        struct SlowOnce {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl Reconciler<String> for SlowOnce {
            async fn reconcile(&self, request: Request<String>) -> Directive {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if request.attempt() == 0 {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
                request.ack()
            }
        }

        let reconciler = Arc::new(SlowOnce {
            calls: AtomicUsize::new(0),
        });
        let config = ControllerConfig {
            timeout: Duration::from_millis(20),
            backoff: BackoffPolicy {
                base: Duration::from_millis(5),
                max: Duration::from_millis(5),
            },
            ..Default::default()
        };
        let controller = Controller::spawn("slow", Arc::clone(&reconciler), config);

        controller.reconcile("inst-1".to_string()).await.unwrap();

        for _ in 0..400 {
            if reconciler.calls.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(reconciler.calls.load(Ordering::SeqCst), 2);

        controller.stop().await;
    }

    #[tokio::test]
    async fn test_stopped_controller_rejects_requests() {
        let reconciler = Arc::new(RecordingReconciler::default());
        let controller = Controller::spawn("test", reconciler, ControllerConfig::default());

        controller.stop().await;

        let result = controller.reconcile("inst-1".to_string()).await;
        assert!(matches!(result, Err(ReconcileError::Stopped(_))));
    }
}
