//! Background job queue and runner
//!
//! Each pipeline stage hands the next stage off through a queue instead
//! of calling it inline, so one slow or failing message never stalls a
//! sync burst. The queue contract is at-least-once: handlers are
//! idempotent (duplicate inserts are swallowed, unsubscribe attempts
//! overwrite wholesale).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use log::{error, warn};

pub type JobId = u64;

/// A unit of deferred work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Fetch and store the history delta behind a push notification
    SyncHistory { account_id: i64, history_id: String },
    /// Run downstream enrichment on a stored message
    ProcessMessage { message_id: i64 },
    /// Attempt to unsubscribe from a stored message's sender
    Unsubscribe { message_id: i64 },
}

impl Job {
    /// Attempt ceiling, after which the job is dropped with an error log.
    /// Unsubscribe gets exactly one retry: hammering a third-party page
    /// that failed twice is more likely to annoy than to succeed.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Job::Unsubscribe { .. } => 2,
            _ => 3,
        }
    }
}

/// A job with its queue bookkeeping
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: JobId,
    pub job: Job,
    pub attempts: u32,
}

/// Queue seam between pipeline stages
pub trait JobQueue: Send + Sync {
    /// Add a job, returning its id
    fn enqueue(&self, job: Job) -> Result<JobId>;

    /// Take the next job, or None when the queue is empty
    fn dequeue(&self) -> Option<QueuedJob>;

    /// Put a failed job back for another attempt
    fn requeue(&self, job: QueuedJob);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// FIFO queue backed by a mutex-protected deque
#[derive(Default)]
pub struct InMemoryJobQueue {
    jobs: Mutex<VecDeque<QueuedJob>>,
    next_id: Mutex<JobId>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobQueue for InMemoryJobQueue {
    fn enqueue(&self, job: Job) -> Result<JobId> {
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };
        self.jobs.lock().unwrap().push_back(QueuedJob {
            id,
            job,
            attempts: 0,
        });
        Ok(id)
    }

    fn dequeue(&self) -> Option<QueuedJob> {
        self.jobs.lock().unwrap().pop_front()
    }

    fn requeue(&self, job: QueuedJob) {
        self.jobs.lock().unwrap().push_back(job);
    }

    fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

/// What a runner does with one job
pub trait JobHandler: Send + Sync {
    fn handle(&self, job: &Job) -> Result<()>;
}

/// Outcome of one [`JobRunner::run_pending`] drain
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    pub succeeded: usize,
    pub retried: usize,
    pub dropped: usize,
}

/// Drains the queue through a handler with per-job retry accounting
pub struct JobRunner {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
}

impl JobRunner {
    pub fn new(queue: Arc<dyn JobQueue>, handler: Arc<dyn JobHandler>) -> Self {
        Self { queue, handler }
    }

    /// Process every job currently queued. Failures below the attempt
    /// ceiling are requeued; requeued jobs are not retried within the
    /// same drain, so a persistently failing job cannot spin the loop.
    pub fn run_pending(&self) -> RunStats {
        let mut stats = RunStats::default();
        let snapshot = self.queue.len();

        for _ in 0..snapshot {
            let Some(mut queued) = self.queue.dequeue() else {
                break;
            };

            queued.attempts += 1;
            match self.handler.handle(&queued.job) {
                Ok(()) => stats.succeeded += 1,
                Err(e) if queued.attempts < queued.job.max_attempts() => {
                    warn!(
                        "Job {} failed (attempt {}), requeued: {:#}",
                        queued.id, queued.attempts, e
                    );
                    self.queue.requeue(queued);
                    stats.retried += 1;
                }
                Err(e) => {
                    error!(
                        "Job {} dropped after {} attempts: {:#}",
                        queued.id, queued.attempts, e
                    );
                    stats.dropped += 1;
                }
            }
        }

        stats
    }

    /// Keep draining until the queue is empty, including retries
    pub fn run_to_completion(&self) -> RunStats {
        let mut total = RunStats::default();
        while !self.queue.is_empty() {
            let stats = self.run_pending();
            total.succeeded += stats.succeeded;
            total.retried += stats.retried;
            total.dropped += stats.dropped;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyHandler {
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl FlakyHandler {
        fn failing_first(n: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first: n,
            }
        }
    }

    impl JobHandler for FlakyHandler {
        fn handle(&self, _job: &Job) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                anyhow::bail!("transient failure");
            }
            Ok(())
        }
    }

    #[test]
    fn test_fifo_order_and_ids() {
        let queue = InMemoryJobQueue::new();
        let first = queue.enqueue(Job::ProcessMessage { message_id: 1 }).unwrap();
        let second = queue.enqueue(Job::Unsubscribe { message_id: 1 }).unwrap();
        assert!(second > first);

        assert_eq!(
            queue.dequeue().unwrap().job,
            Job::ProcessMessage { message_id: 1 }
        );
        assert_eq!(
            queue.dequeue().unwrap().job,
            Job::Unsubscribe { message_id: 1 }
        );
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_transient_failure_is_retried() {
        let queue = Arc::new(InMemoryJobQueue::new());
        queue.enqueue(Job::ProcessMessage { message_id: 1 }).unwrap();

        let runner = JobRunner::new(queue, Arc::new(FlakyHandler::failing_first(1)));
        let stats = runner.run_to_completion();
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.dropped, 0);
    }

    #[test]
    fn test_unsubscribe_is_dropped_after_two_attempts() {
        let queue = Arc::new(InMemoryJobQueue::new());
        queue.enqueue(Job::Unsubscribe { message_id: 1 }).unwrap();

        let handler = Arc::new(FlakyHandler::failing_first(usize::MAX));
        let runner = JobRunner::new(queue.clone(), handler.clone());
        let stats = runner.run_to_completion();

        assert_eq!(stats.dropped, 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_requeued_job_waits_for_next_drain() {
        let queue = Arc::new(InMemoryJobQueue::new());
        queue.enqueue(Job::SyncHistory {
            account_id: 1,
            history_id: "5".to_string(),
        })
        .unwrap();

        let runner = JobRunner::new(queue.clone(), Arc::new(FlakyHandler::failing_first(1)));
        let stats = runner.run_pending();
        assert_eq!(stats, RunStats { succeeded: 0, retried: 1, dropped: 0 });
        assert_eq!(queue.len(), 1);

        let stats = runner.run_pending();
        assert_eq!(stats.succeeded, 1);
    }
}
