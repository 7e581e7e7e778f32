//! Bounded worker pool.
//!
//! Fixed number of worker slots, one task per idle worker. Results are
//! published asynchronously to a central map and fetched with
//! [`WorkerPool::get_result`].

mod worker;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::{ExecutorError, PoolError};
use crate::executor::Executor;
use crate::task::Task;

use worker::{Job, WorkerMessage, run_collector, run_worker};

struct Slot {
    busy: bool,
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

struct RunningJob {
    worker: usize,
    /// Set by the worker once the job task is spawned.
    abort: Option<AbortHandle>,
}

/// State shared between the pool, its workers and its collectors.
#[derive(Default)]
pub(crate) struct PoolState {
    slots: Vec<Slot>,
    running: HashMap<String, RunningJob>,
    /// Cancelled ids whose results must be dropped.
    discarded: HashSet<String>,
    results: HashMap<String, Result<Value, ExecutorError>>,
}

enum Lifecycle {
    Idle,
    Started(Vec<JoinHandle<()>>),
    Stopped,
}

/// Point-in-time pool status.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub workers: usize,
    pub busy: usize,
    pub idle: usize,
    pub running: Vec<String>,
    pub pending_results: usize,
    pub accepting: bool,
}

pub struct WorkerPool {
    size: usize,
    poll_interval: Duration,
    state: Arc<Mutex<PoolState>>,
    accepting: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
}

impl WorkerPool {
    pub fn new(config: &PoolConfig) -> Self {
        Self::with_workers(config.resolved_worker_count(), config.result_poll_interval)
    }

    pub fn with_workers(size: usize, poll_interval: Duration) -> Self {
        Self {
            size,
            poll_interval,
            state: Arc::new(Mutex::new(PoolState::default())),
            accepting: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Spawn the workers and one result collector per worker.
    pub async fn start(&self) -> Result<(), PoolError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match *lifecycle {
            Lifecycle::Started(_) => return Err(PoolError::AlreadyStarted),
            Lifecycle::Stopped => return Err(PoolError::Stopped),
            Lifecycle::Idle => {}
        }
        if self.size == 0 {
            return Err(PoolError::NoWorkers);
        }

        let mut handles = Vec::with_capacity(self.size * 2);
        {
            let mut state = self.state.lock().await;
            for index in 0..self.size {
                let (tx, inbound) = mpsc::unbounded_channel();
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                state.slots.push(Slot { busy: false, tx });

                handles.push(tokio::spawn(run_worker(
                    index,
                    inbound,
                    outbound_tx,
                    Arc::clone(&self.state),
                )));
                handles.push(tokio::spawn(run_collector(
                    outbound_rx,
                    Arc::clone(&self.state),
                )));
            }
        }

        *lifecycle = Lifecycle::Started(handles);
        self.accepting.store(true, Ordering::SeqCst);
        info!(workers = self.size, "Worker pool started");
        Ok(())
    }

    /// Hand a task to the first idle worker. Returns false if every worker
    /// is busy, the id is already running, or the pool is not accepting.
    pub async fn submit(&self, task: Task, executor: Arc<dyn Executor>) -> bool {
        if !self.accepting.load(Ordering::SeqCst) {
            return false;
        }

        let mut state = self.state.lock().await;
        if state.running.contains_key(&task.id) {
            warn!(task_id = %task.id, "Task already running in pool");
            return false;
        }
        let Some(index) = state.slots.iter().position(|slot| !slot.busy) else {
            return false;
        };

        let task_id = task.id.clone();
        let message = WorkerMessage::Run(Job { task, executor });
        if state.slots[index].tx.send(message).is_err() {
            warn!(worker = index, "Worker channel closed");
            return false;
        }

        state.slots[index].busy = true;
        state.discarded.remove(&task_id);
        state.results.remove(&task_id);
        state.running.insert(
            task_id.clone(),
            RunningJob {
                worker: index,
                abort: None,
            },
        );
        debug!(task_id = %task_id, worker = index, "Task submitted to worker");
        true
    }

    /// Wait for a task's result, polling the results map.
    ///
    /// The entry is removed on retrieval. Returns `None` on timeout, or when
    /// the id is neither running nor holding a result (unknown, already
    /// retrieved, or cancelled).
    pub async fn get_result(
        &self,
        id: &str,
        timeout: Option<Duration>,
    ) -> Option<Result<Value, ExecutorError>> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(result) = state.results.remove(id) {
                    return Some(result);
                }
                if !state.running.contains_key(id) {
                    return None;
                }
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                return None;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Submit as soon as a worker frees up, then wait for the result.
    pub async fn run(
        &self,
        task: Task,
        executor: Arc<dyn Executor>,
    ) -> Result<Value, ExecutorError> {
        let id = task.id.clone();
        loop {
            if !self.accepting.load(Ordering::SeqCst) {
                return Err(ExecutorError::PoolStopped);
            }
            if self.submit(task.clone(), Arc::clone(&executor)).await {
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        match self.get_result(&id, None).await {
            Some(result) => result,
            None if !self.accepting.load(Ordering::SeqCst) => Err(ExecutorError::PoolStopped),
            None => Err(ExecutorError::Cancelled),
        }
    }

    /// Abort a running job and drop its result. Returns true if the job was
    /// running or had an unclaimed result.
    pub async fn cancel(&self, id: &str) -> bool {
        let mut state = self.state.lock().await;
        if let Some(job) = state.running.get(id) {
            if let Some(abort) = &job.abort {
                abort.abort();
            }
            let worker = job.worker;
            state.discarded.insert(id.to_string());
            info!(task_id = %id, worker, "Cancelled job in pool");
            return true;
        }
        state.results.remove(id).is_some()
    }

    pub async fn has_idle_worker(&self) -> bool {
        if !self.accepting.load(Ordering::SeqCst) {
            return false;
        }
        self.state.lock().await.slots.iter().any(|slot| !slot.busy)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> PoolStatus {
        let state = self.state.lock().await;
        let busy = state.slots.iter().filter(|slot| slot.busy).count();
        let mut running: Vec<String> = state.running.keys().cloned().collect();
        running.sort();

        PoolStatus {
            workers: state.slots.len(),
            busy,
            idle: state.slots.len() - busy,
            running,
            pending_results: state.results.len(),
            accepting: self.accepting.load(Ordering::SeqCst),
        }
    }

    /// Stop accepting work, signal every worker, abort running jobs and
    /// wait for the workers and collectors to exit.
    pub async fn stop(&self) {
        self.accepting.store(false, Ordering::SeqCst);

        let handles = {
            let mut lifecycle = self.lifecycle.lock().await;
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
                Lifecycle::Started(handles) => handles,
                Lifecycle::Idle | Lifecycle::Stopped => return,
            }
        };

        {
            let mut state = self.state.lock().await;
            for slot in &state.slots {
                let _ = slot.tx.send(WorkerMessage::Stop);
            }
            let ids: Vec<String> = state.running.keys().cloned().collect();
            for id in ids {
                if let Some(abort) = state.running.get(&id).and_then(|job| job.abort.as_ref()) {
                    abort.abort();
                }
                state.discarded.insert(id);
            }
        }

        for joined in join_all(handles).await {
            if let Err(e) = joined
                && e.is_panic()
            {
                warn!(error = %e, "Worker task panicked during shutdown");
            }
        }
        info!("Worker pool stopped");
    }
}
