//! Job dispatcher
//!
//! A fixed set of tokio worker tasks pulls [`EvaluationJob`]s from a shared
//! bounded backlog and pushes completions into an unbounded channel. The
//! owner drains that channel with [`JobDispatcher::poll`] (non-blocking) or
//! [`JobDispatcher::wait`] (parks until at least one result is ready).
//!
//! Cancellation is best-effort: queued jobs are removed outright, running
//! jobs get their token flagged and their eventual result is dropped on
//! collection.
//!
//! A panicking evaluator is reported as a failed evaluation and its worker
//! keeps running. This needs the `unwind` panic strategy; under
//! `panic = "abort"` the process exits instead.

use crate::error::{DispatchError, EvaluationError, ModelError};
use crate::job::{CancelToken, Completed, EvaluationJob, EvaluationResult, JobHandle};
use crate::model::ModelEvaluator;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use pmlda_tree::{Level, NodeId, State};
use std::collections::{BTreeMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// Dispatcher configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Number of concurrent worker tasks
    pub num_workers: usize,
    /// Maximum number of queued (not yet started) jobs
    pub backlog_limit: usize,
}

impl DispatcherConfig {
    /// Create a configuration
    #[inline]
    #[must_use]
    pub fn new(num_workers: usize, backlog_limit: usize) -> Self {
        Self {
            num_workers,
            backlog_limit,
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// [`DispatchError::InvalidConfig`] if either bound is zero.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.num_workers == 0 {
            return Err(DispatchError::InvalidConfig(
                "num_workers must be at least 1".to_string(),
            ));
        }
        if self.backlog_limit == 0 {
            return Err(DispatchError::InvalidConfig(
                "backlog_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::new(4, 256)
    }
}

/// Dispatcher counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Jobs accepted by `submit`
    pub submitted: u64,
    /// Accepted jobs per level
    pub submitted_per_level: BTreeMap<Level, u64>,
    /// Successful results handed to the caller
    pub completed: u64,
    /// Failed results handed to the caller
    pub failed: u64,
    /// Jobs cancelled before their result was collected
    pub cancelled: u64,
    /// Results of cancelled jobs dropped on collection
    pub discarded_late: u64,
    /// Submissions refused because the backlog was full
    pub rejected_full: u64,
}

impl DispatcherStats {
    /// Accepted jobs for one level
    #[inline]
    #[must_use]
    pub fn submitted_at(&self, level: Level) -> u64 {
        self.submitted_per_level.get(&level).copied().unwrap_or(0)
    }
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<VecDeque<EvaluationJob>>,
    notify: Notify,
    closed: AtomicBool,
}

#[derive(Debug, Clone)]
struct Registered {
    sequence: u64,
    level: Level,
    token: CancelToken,
}

/// Dispatches evaluation jobs to worker tasks
///
/// Must be created inside a tokio runtime.
#[derive(Debug)]
pub struct JobDispatcher {
    config: DispatcherConfig,
    num_levels: usize,
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    results: mpsc::UnboundedReceiver<Completed>,
    registry: DashMap<NodeId, Vec<Registered>>,
    in_flight: AtomicUsize,
    next_sequence: AtomicU64,
    stats: Mutex<DispatcherStats>,
}

impl JobDispatcher {
    /// Start the worker tasks
    ///
    /// # Errors
    /// - [`DispatchError::InvalidConfig`] for a zero bound or when called
    ///   outside a tokio runtime
    pub fn new(
        evaluator: Arc<dyn ModelEvaluator>,
        config: DispatcherConfig,
    ) -> Result<Self, DispatchError> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| DispatchError::InvalidConfig(format!("no tokio runtime: {e}")))?;

        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(config.backlog_limit)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });
        let (tx, rx) = mpsc::unbounded_channel();

        let workers = (0..config.num_workers)
            .map(|worker| {
                runtime.spawn(worker_loop(
                    worker,
                    Arc::clone(&shared),
                    Arc::clone(&evaluator),
                    tx.clone(),
                ))
            })
            .collect();

        tracing::debug!(
            workers = config.num_workers,
            backlog = config.backlog_limit,
            "Job dispatcher started"
        );

        Ok(Self {
            config,
            num_levels: evaluator.num_levels(),
            shared,
            workers,
            results: rx,
            registry: DashMap::new(),
            in_flight: AtomicUsize::new(0),
            next_sequence: AtomicU64::new(0),
            stats: Mutex::new(DispatcherStats::default()),
        })
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> DispatcherConfig {
        self.config
    }

    /// Number of levels the evaluator provides
    #[inline]
    #[must_use]
    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    /// Queue an evaluation of `state` at `level` on behalf of `node`
    ///
    /// Never blocks on evaluation.
    ///
    /// # Errors
    /// - [`DispatchError::QueueFull`] if the backlog is at its bound
    /// - [`DispatchError::ShutDown`] after [`shutdown`](Self::shutdown)
    pub fn submit(
        &self,
        node: NodeId,
        level: Level,
        state: State,
    ) -> Result<JobHandle, DispatchError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(DispatchError::ShutDown);
        }

        let token = CancelToken::new();
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        {
            let mut queue = self.shared.queue.lock();
            if queue.len() >= self.config.backlog_limit {
                self.stats.lock().rejected_full += 1;
                return Err(DispatchError::QueueFull {
                    limit: self.config.backlog_limit,
                });
            }
            self.registry.entry(node).or_default().push(Registered {
                sequence,
                level,
                token: token.clone(),
            });
            self.in_flight.fetch_add(1, Ordering::AcqRel);
            queue.push_back(EvaluationJob {
                node,
                level,
                state,
                sequence,
                token: token.clone(),
            });
        }
        self.shared.notify.notify_one();

        {
            let mut stats = self.stats.lock();
            stats.submitted += 1;
            *stats.submitted_per_level.entry(level).or_insert(0) += 1;
        }
        tracing::trace!(%node, %level, sequence, "Job submitted");

        Ok(JobHandle::new(node, level, sequence, token))
    }

    /// Collect every result that is ready, without blocking
    pub fn poll(&mut self) -> Vec<EvaluationResult> {
        let mut ready = Vec::new();
        while let Ok(done) = self.results.try_recv() {
            if let Some(result) = self.collect(done) {
                ready.push(result);
            }
        }
        ready
    }

    /// Wait until at least one result is ready, then collect all ready results
    ///
    /// Returns immediately with an empty batch when nothing is in flight.
    pub async fn wait(&mut self) -> Vec<EvaluationResult> {
        let mut ready = self.poll();
        while ready.is_empty() && self.in_flight() > 0 {
            match self.results.recv().await {
                Some(done) => {
                    if let Some(result) = self.collect(done) {
                        ready.push(result);
                    }
                }
                None => break,
            }
        }
        ready.extend(self.poll());
        ready
    }

    /// Cancel every outstanding job for `node`
    ///
    /// Idempotent; unknown or finished nodes are a no-op. Returns the number
    /// of jobs newly cancelled.
    pub fn cancel(&self, node: NodeId) -> usize {
        let Some(entries) = self.registry.get(&node).map(|e| e.value().clone()) else {
            return 0;
        };

        let removed: Vec<u64> = {
            let mut queue = self.shared.queue.lock();
            let mut removed = Vec::new();
            queue.retain(|job| {
                if job.node == node {
                    removed.push(job.sequence);
                    false
                } else {
                    true
                }
            });
            removed
        };

        let mut newly = 0;
        for entry in &entries {
            if removed.contains(&entry.sequence) {
                entry.token.cancel();
                self.unregister(node, entry.sequence);
                self.release_slot();
                newly += 1;
            } else if !entry.token.is_cancelled() {
                entry.token.cancel();
                newly += 1;
            }
        }

        if newly > 0 {
            self.stats.lock().cancelled += newly as u64;
            tracing::debug!(%node, jobs = newly, "Jobs cancelled");
        }
        newly
    }

    /// Jobs submitted whose result has not been collected or discarded
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Jobs waiting for a worker
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Check whether a live job for `(node, level)` is outstanding
    #[must_use]
    pub fn is_outstanding(&self, node: NodeId, level: Level) -> bool {
        self.registry.get(&node).is_some_and(|entries| {
            entries
                .iter()
                .any(|e| e.level == level && !e.token.is_cancelled())
        })
    }

    /// Snapshot of the counters
    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        self.stats.lock().clone()
    }

    /// Stop the workers and drop every queued job
    pub fn shutdown(&mut self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = {
            let mut queue = self.shared.queue.lock();
            let dropped = queue.len();
            queue.clear();
            dropped
        };
        self.shared.notify.notify_waiters();
        for worker in &self.workers {
            worker.abort();
        }
        self.results.close();
        while self.results.try_recv().is_ok() {}
        self.registry.clear();
        self.in_flight.store(0, Ordering::Release);
        tracing::debug!(dropped, "Job dispatcher shut down");
    }

    fn collect(&mut self, done: Completed) -> Option<EvaluationResult> {
        let node = done.result.node;
        self.unregister(node, done.sequence);
        self.release_slot();

        let mut stats = self.stats.lock();
        if done.token.is_cancelled() {
            stats.discarded_late += 1;
            tracing::trace!(%node, sequence = done.sequence, "Late result discarded");
            return None;
        }
        if done.result.is_error() {
            stats.failed += 1;
        } else {
            stats.completed += 1;
        }
        Some(done.result)
    }

    fn release_slot(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn unregister(&self, node: NodeId, sequence: u64) {
        let now_empty = match self.registry.get_mut(&node) {
            Some(mut entries) => {
                entries.retain(|e| e.sequence != sequence);
                entries.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.registry.remove_if(&node, |_, entries| entries.is_empty());
        }
    }
}

impl Drop for JobDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn worker_loop(
    worker: usize,
    shared: Arc<Shared>,
    evaluator: Arc<dyn ModelEvaluator>,
    results: mpsc::UnboundedSender<Completed>,
) {
    loop {
        let job = loop {
            let notified = shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if shared.closed.load(Ordering::Acquire) {
                return;
            }
            let next = shared.queue.lock().pop_front();
            if let Some(job) = next {
                break job;
            }
            notified.await;
        };

        let outcome = if job.token.is_cancelled() {
            Err(EvaluationError::new(job.node, job.level, "cancelled"))
        } else {
            evaluate(evaluator.as_ref(), &job).await
        };

        if let Err(e) = &outcome {
            tracing::debug!(worker, error = %e, "Evaluation failed");
        }

        let completed = Completed {
            sequence: job.sequence,
            token: job.token,
            result: EvaluationResult {
                node: job.node,
                level: job.level,
                outcome,
            },
        };
        if results.send(completed).is_err() {
            return;
        }
    }
}

async fn evaluate(
    evaluator: &dyn ModelEvaluator,
    job: &EvaluationJob,
) -> Result<f64, EvaluationError> {
    let tag = |message: String| EvaluationError::new(job.node, job.level, message);

    if job.level.index() >= evaluator.num_levels() {
        return Err(tag(
            ModelError::LevelOutOfRange {
                level: job.level,
                num_levels: evaluator.num_levels(),
            }
            .to_string(),
        ));
    }

    match AssertUnwindSafe(evaluator.evaluate(job.level, &job.state))
        .catch_unwind()
        .await
    {
        Ok(Ok(value)) if value.is_nan() => Err(tag(ModelError::NotANumber.to_string())),
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(tag(e.to_string())),
        Err(panic) => Err(tag(format!("evaluator panicked: {}", panic_message(&*panic)))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_rejects_zero_bounds() {
        assert!(DispatcherConfig::new(0, 4).validate().is_err());
        assert!(DispatcherConfig::new(2, 0).validate().is_err());
        assert!(DispatcherConfig::default().validate().is_ok());
    }

    #[test]
    fn new_outside_runtime_is_an_error() {
        let model = crate::model::ModelHierarchy::new();
        let result = JobDispatcher::new(Arc::new(model), DispatcherConfig::default());
        assert!(matches!(result, Err(DispatchError::InvalidConfig(_))));
    }

    #[test]
    fn panic_message_extracts_strings() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*boxed), "bang");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7_u32);
        assert_eq!(panic_message(&*boxed), "unknown panic");
    }
}
