use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use adrules_rules::{AlertSink, OperationalAlert};
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::guard::LockTable;
use crate::scheduler::EvaluationQueue;
use crate::task::{CycleOutcome, EvaluationTask, RuntimeStats};

#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, task: EvaluationTask) -> CycleOutcome;
}

/// Cloneable handle used by the dispatcher and the API to feed the workers.
#[derive(Clone)]
pub struct EngineHandle {
    queue: EvaluationQueue,
    locks: LockTable,
    stats: Arc<RwLock<RuntimeStats>>,
    notify: Arc<Notify>,
    shutting_down: Arc<AtomicBool>,
    workers: usize,
}

impl EngineHandle {
    /// Queues a task. `Ok(false)` means the rule was already waiting.
    pub fn submit(&self, task: EvaluationTask) -> Result<bool, EngineError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(EngineError::ShuttingDown);
        }

        let rule_id = task.rule_id;
        let accepted = self.queue.enqueue(task);
        if accepted {
            self.notify.notify_one();
        } else {
            debug!(%rule_id, "rule already queued, skipping");
        }
        Ok(accepted)
    }

    /// Whether a new evaluation of the rule would be redundant.
    pub fn is_pending_or_running(&self, rule_id: &uuid::Uuid) -> bool {
        self.queue.contains(rule_id) || self.locks.is_busy(rule_id)
    }

    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    pub fn in_flight(&self) -> usize {
        self.locks.in_flight()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn stats(&self) -> RuntimeStats {
        self.stats.read().clone()
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }
}

/// Worker pool pulling evaluation tasks off the shared queue.
pub struct ExecutionRuntime {
    queue: EvaluationQueue,
    locks: LockTable,
    alerts: Arc<dyn AlertSink>,
    stats: Arc<RwLock<RuntimeStats>>,
    notify: Arc<Notify>,
    shutting_down: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    worker_count: usize,
}

impl ExecutionRuntime {
    pub fn new(locks: LockTable, alerts: Arc<dyn AlertSink>) -> Self {
        Self {
            queue: EvaluationQueue::new(),
            locks,
            alerts,
            stats: Arc::new(RwLock::new(RuntimeStats::default())),
            notify: Arc::new(Notify::new()),
            shutting_down: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            worker_count: 0,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            queue: self.queue.clone(),
            locks: self.locks.clone(),
            stats: self.stats.clone(),
            notify: self.notify.clone(),
            shutting_down: self.shutting_down.clone(),
            workers: self.worker_count,
        }
    }

    pub fn start<H>(&mut self, handler: Arc<H>, worker_count: usize)
    where
        H: TaskHandler,
    {
        let worker_count = worker_count.max(1);
        for worker_index in 0..worker_count {
            let queue = self.queue.clone();
            let stats = self.stats.clone();
            let notify = self.notify.clone();
            let shutting_down = self.shutting_down.clone();
            let alerts = self.alerts.clone();
            let handler = handler.clone();

            let handle = tokio::spawn(async move {
                let worker = Worker {
                    index: worker_index,
                    queue,
                    stats,
                    notify,
                    shutting_down,
                    alerts,
                };
                worker.run(handler).await;
            });

            self.workers.push(handle);
        }
        self.worker_count += worker_count;
        info!(workers = self.worker_count, "execution runtime started");
    }

    /// Stops accepting tasks and waits for in-flight cycles to finish.
    pub async fn shutdown(self) {
        self.shutting_down.store(true, Ordering::Release);
        self.notify.notify_waiters();
        for handle in self.workers {
            if let Err(err) = handle.await {
                error!("worker crashed: {:?}", err);
            }
        }
        let dropped = self.queue.pending();
        if dropped > 0 {
            warn!(dropped, "queued evaluations discarded at shutdown");
        }
    }
}

struct Worker {
    index: usize,
    queue: EvaluationQueue,
    stats: Arc<RwLock<RuntimeStats>>,
    notify: Arc<Notify>,
    shutting_down: Arc<AtomicBool>,
    alerts: Arc<dyn AlertSink>,
}

impl Worker {
    async fn run<H>(self, handler: Arc<H>)
    where
        H: TaskHandler,
    {
        while let Some(task) = self.next_task().await {
            let rule_id = task.rule_id;
            debug!(worker = self.index, %rule_id, trigger = ?task.trigger, "evaluating rule");

            // The lease is dropped while unwinding, so a panicking cycle
            // leaves the rule free for its next evaluation.
            let outcome = match AssertUnwindSafe(handler.handle(task)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(worker = self.index, %rule_id, %message, "evaluation cycle panicked");
                    self.alerts.raise(OperationalAlert::CyclePanicked {
                        rule_id,
                        message: message.clone(),
                    });
                    CycleOutcome::Crashed(message)
                }
            };
            self.stats.write().record(&outcome);

            debug!(worker = self.index, %rule_id, outcome = outcome.label(), "cycle finished");
        }
    }

    /// Waits for the next task; `None` once shutdown has begun.
    async fn next_task(&self) -> Option<EvaluationTask> {
        loop {
            // Register interest before checking, so a wake-up between the
            // check and the await is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shutting_down.load(Ordering::Acquire) {
                return None;
            }
            if let Some(task) = self.queue.next_task() {
                return Some(task);
            }

            notified.await;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
