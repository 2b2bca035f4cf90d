use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CrawlError, FetchError, TaskError};
use crate::model::Stage;

/// Completed-task counter, optionally mirrored to a terminal progress bar.
#[derive(Clone)]
pub struct Progress {
    completed: Arc<AtomicUsize>,
    bar: ProgressBar,
}

impl Progress {
    pub fn hidden() -> Self {
        Progress {
            completed: Arc::new(AtomicUsize::new(0)),
            bar: ProgressBar::hidden(),
        }
    }

    pub fn bar(label: &str, len: u64) -> Self {
        let bar = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{msg:>8} [{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_message(label.to_string());
        Progress {
            completed: Arc::new(AtomicUsize::new(0)),
            bar,
        }
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    fn advance(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.bar.inc(1);
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    pub fn is_finished(&self) -> bool {
        self.bar.is_finished()
    }
}

/// What came back from one executor run.
#[derive(Debug)]
pub struct RunOutcome<R> {
    /// Results of the tasks that succeeded, in completion order.
    pub results: Vec<R>,
    /// Tasks dispatched to a worker.
    pub attempted: usize,
    pub failed: usize,
    /// Tasks never dispatched because the run was cancelled.
    pub skipped: usize,
}

impl<R> RunOutcome<R> {
    pub fn all_failed(&self) -> bool {
        self.attempted > 0 && self.failed == self.attempted
    }

    pub fn was_cancelled(&self) -> bool {
        self.skipped > 0
    }

    /// Escalate only when every dispatched task failed.
    pub fn require_any(self, stage: Stage) -> Result<Self, CrawlError> {
        if self.all_failed() {
            return Err(CrawlError::StageFailed {
                stage,
                attempted: self.attempted,
            });
        }
        Ok(self)
    }
}

struct TaskReport<R> {
    worker: usize,
    index: usize,
    outcome: Result<R, TaskError>,
}

/// Fixed pool of workers draining a shared task queue.
#[derive(Clone)]
pub struct BoundedExecutor {
    workers: usize,
    timeout: Duration,
    cancel: CancellationToken,
}

impl BoundedExecutor {
    pub fn new(workers: usize, timeout: Duration, cancel: CancellationToken) -> Self {
        BoundedExecutor {
            workers: workers.max(1),
            timeout,
            cancel,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `operation` over `tasks` with at most `workers` in flight.
    ///
    /// A failed or timed-out task is logged and dropped. Cancellation stops
    /// dispatch; tasks already running are allowed to finish.
    pub async fn run<T, R, F, Fut>(&self, tasks: Vec<T>, progress: &Progress, operation: F) -> RunOutcome<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, TaskError>> + Send + 'static,
    {
        let total = tasks.len();
        let queue: Arc<Mutex<VecDeque<(usize, T)>>> =
            Arc::new(Mutex::new(tasks.into_iter().enumerate().collect()));
        let operation = Arc::new(operation);

        // Workers send reports, this loop collects them
        let (tx, mut rx) = mpsc::channel::<TaskReport<R>>(self.workers * 2);
        let mut pool = JoinSet::new();

        for worker in 0..self.workers.min(total) {
            let queue = Arc::clone(&queue);
            let operation = Arc::clone(&operation);
            let tx = tx.clone();
            let cancel = self.cancel.clone();
            let timeout = self.timeout;

            pool.spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let Some((index, task)) = queue.lock().await.pop_front() else {
                        break;
                    };
                    let outcome = match tokio::time::timeout(timeout, (*operation)(task)).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(FetchError::Timeout(timeout).into()),
                    };
                    if tx.send(TaskReport { worker, index, outcome }).await.is_err() {
                        break;
                    }
                }
            });
        }

        // Drop our copy of tx so rx closes when all workers finish
        drop(tx);

        let mut results = Vec::new();
        let mut attempted = 0usize;
        let mut failed = 0usize;

        while let Some(report) = rx.recv().await {
            attempted += 1;
            progress.advance();
            match report.outcome {
                Ok(result) => results.push(result),
                Err(e) => {
                    failed += 1;
                    warn!(task = report.index, worker = report.worker, "Task dropped: {}", e);
                }
            }
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                warn!("Fetch worker aborted: {}", e);
            }
        }

        let skipped = queue.lock().await.len();
        if skipped > 0 {
            warn!("Run cancelled with {} of {} tasks not dispatched", skipped, total);
        }
        debug!(total, attempted, failed, skipped, "Executor run finished");

        RunOutcome {
            results,
            attempted,
            failed,
            skipped,
        }
    }
}
