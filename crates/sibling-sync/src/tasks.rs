//! # Debounced Task Queue
//!
//! Runs expensive follow-up work (reflection, learning) off the request path.
//! Jobs accumulate while requests keep arriving and run together once things
//! go quiet, or at once if too many pile up.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │            add_task                      add_task (len ≤ max)           │
//! │   Empty ─────────────► Accumulating ◄──────────────┐                    │
//! │     ▲                    │      │                  │                    │
//! │     │                    │      └──────────────────┘                    │
//! │     │      quiet for `delay`    len > max_queue_size                    │
//! │     │                    │      │                                       │
//! │     │                    ▼      ▼                                       │
//! │     └──────────────── Flushing (swap batch, run in order)               │
//! │                                                                         │
//! │  TIMER: one per burst. It sleeps until last_activity + delay; if more   │
//! │  jobs arrived meanwhile it sleeps again for the rest of the window.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Jobs are best-effort and live only in memory. Every accepted job runs
//! exactly once; an error or panic in one job is logged and does not affect
//! the others.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::config::SyncConfig;
use crate::error::SyncError;

/// Future returned by a job; `Err` carries a description for the log.
pub type TaskFuture = BoxFuture<'static, Result<(), String>>;

type Job = Box<dyn FnOnce() -> TaskFuture + Send>;

struct QueuedJob {
    job: Job,
    enqueued_at: Instant,
}

struct TaskState {
    pending: Vec<QueuedJob>,
    last_activity: Instant,
    timer_armed: bool,
}

struct TaskInner {
    delay: Duration,
    max_queue_size: usize,
    state: Mutex<TaskState>,
}

impl TaskInner {
    fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Debounced, size-capped batch runner. Clones share one queue.
#[derive(Clone)]
pub struct DebouncedTaskQueue {
    inner: Arc<TaskInner>,
}

impl DebouncedTaskQueue {
    pub fn new(delay: Duration, max_queue_size: usize) -> Self {
        DebouncedTaskQueue {
            inner: Arc::new(TaskInner {
                delay,
                max_queue_size,
                state: Mutex::new(TaskState {
                    pending: Vec::new(),
                    last_activity: Instant::now(),
                    timer_armed: false,
                }),
            }),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.task_delay(), config.tasks.max_queue_size)
    }

    /// Queues a job.
    ///
    /// If the queue now holds more than `max_queue_size` jobs, the whole
    /// batch runs before this returns.
    pub async fn add_task<F, Fut>(&self, job: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let queued = QueuedJob {
            job: Box::new(move || job().boxed()),
            enqueued_at: Instant::now(),
        };

        let overflow = {
            let mut state = self.inner.lock();
            state.pending.push(queued);

            if state.pending.len() > self.inner.max_queue_size {
                true
            } else {
                state.last_activity = Instant::now();
                if !state.timer_armed {
                    state.timer_armed = true;
                    tokio::spawn(run_timer(self.inner.clone()));
                }
                false
            }
        };

        if overflow {
            debug!(max = self.inner.max_queue_size, "Task queue full, flushing now");
            self.flush().await;
        }
    }

    /// Runs every pending job now. Returns how many ran.
    pub async fn flush(&self) -> usize {
        let batch = std::mem::take(&mut self.inner.lock().pending);
        run_batch(batch).await
    }

    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

enum TimerStep {
    Flush(Vec<QueuedJob>),
    Wait(Instant),
}

async fn run_timer(inner: Arc<TaskInner>) {
    loop {
        // Window check and batch swap share one lock, so a job added in
        // between always gets its full quiet period
        let step = {
            let mut state = inner.lock();
            if state.pending.is_empty() {
                state.timer_armed = false;
                return;
            }

            let deadline = state.last_activity + inner.delay;
            if Instant::now() >= deadline {
                state.timer_armed = false;
                TimerStep::Flush(std::mem::take(&mut state.pending))
            } else {
                TimerStep::Wait(deadline)
            }
        };

        match step {
            TimerStep::Flush(batch) => {
                run_batch(batch).await;
                return;
            }
            TimerStep::Wait(deadline) => tokio::time::sleep_until(deadline).await,
        }
    }
}

async fn run_batch(batch: Vec<QueuedJob>) -> usize {
    if batch.is_empty() {
        return 0;
    }

    let count = batch.len();
    info!(jobs = count, "Running background tasks");

    for (index, queued) in batch.into_iter().enumerate() {
        let waited = queued.enqueued_at.elapsed();
        let job = queued.job;

        let failure = match AssertUnwindSafe(async move { job().await })
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {
                debug!(index, ?waited, "Background task finished");
                continue;
            }
            Ok(Err(reason)) => SyncError::TaskFailed(reason),
            Err(payload) => SyncError::TaskFailed(panic_message(payload.as_ref())),
        };
        error!(index, error = %failure, "Background task failed");
    }
    count
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}
