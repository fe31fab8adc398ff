//! Request worker pool.
//!
//! # Responsibilities
//! - Own the runtime that runs request handlers
//! - Account for queued, active and completed tasks
//! - Track live and peak thread counts
//! - Produce point-in-time snapshots for monitoring
//!
//! # Thread Model
//! ```text
//! min_spare_threads  → core async workers, always alive
//! max_threads        → cap on all threads (core + blocking pool)
//! max_idle_time_ms   → blocking threads above the core exit after this idle time
//! ```
//!
//! The pool is owned by the lifecycle controller. The connector only holds
//! an [`ExecutorHandle`], a weak reference that stops accepting work once the
//! pool is dropped or stopped.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

use crate::config::ExecutorConfig;

/// Errors raised by the worker pool.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("executor {0} is already started")]
    AlreadyStarted(String),

    #[error("failed to build executor {name}: {source}")]
    Build {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("executor is not running, task rejected")]
    Rejected,
}

/// Point-in-time view of the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutorState {
    pub max_idle_time_ms: u64,
    pub max_threads: usize,
    pub min_spare_threads: usize,
    /// Tasks currently being polled.
    pub active_count: usize,
    pub completed_task_count: u64,
    pub core_pool_size: usize,
    /// Peak number of live threads since start.
    pub largest_pool_size: usize,
    /// Live threads right now.
    pub pool_size: usize,
    /// Submitted tasks that have not been polled yet.
    pub queue_size: usize,
}

#[derive(Debug, Default)]
struct ExecutorStats {
    queued: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicU64,
    pool_size: AtomicUsize,
    largest_pool_size: AtomicUsize,
}

#[derive(Debug, Default)]
struct Shared {
    stats: ExecutorStats,
    handle: RwLock<Option<Handle>>,
}

/// Worker pool backed by a dedicated multi-thread tokio runtime.
pub struct ThreadExecutor {
    config: ExecutorConfig,
    shared: Arc<Shared>,
    runtime: Mutex<Option<Runtime>>,
}

impl ThreadExecutor {
    /// Create a stopped pool from configuration.
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::default()),
            runtime: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Spawn the worker threads.
    pub fn start(&self) -> Result<(), ExecutorError> {
        let mut runtime = self.runtime.lock().unwrap_or_else(|e| e.into_inner());
        if runtime.is_some() {
            return Err(ExecutorError::AlreadyStarted(self.config.name.clone()));
        }

        let core = self.core_threads();
        let blocking = self.config.max_threads.saturating_sub(core).max(1);
        let idle = Duration::from_millis(self.config.max_idle_time_ms);

        let prefix = self.config.name_prefix.clone();
        let sequence = Arc::new(AtomicUsize::new(0));
        let on_start = Arc::clone(&self.shared);
        let on_stop = Arc::clone(&self.shared);

        let built = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(core)
            .max_blocking_threads(blocking)
            .thread_keep_alive(idle)
            .thread_name_fn(move || {
                format!("{}{}", prefix, sequence.fetch_add(1, Ordering::Relaxed) + 1)
            })
            .on_thread_start(move || {
                let live = on_start.stats.pool_size.fetch_add(1, Ordering::SeqCst) + 1;
                on_start.stats.largest_pool_size.fetch_max(live, Ordering::SeqCst);
            })
            .on_thread_stop(move || {
                on_stop.stats.pool_size.fetch_sub(1, Ordering::SeqCst);
            })
            .enable_all()
            .build()
            .map_err(|source| ExecutorError::Build {
                name: self.config.name.clone(),
                source,
            })?;

        if self.config.thread_priority != ExecutorConfig::default().thread_priority {
            tracing::debug!(
                executor = %self.config.name,
                priority = self.config.thread_priority,
                "Thread priority is not applied on this platform"
            );
        }

        *self.shared.handle.write().unwrap_or_else(|e| e.into_inner()) = Some(built.handle().clone());
        *runtime = Some(built);

        tracing::info!(
            executor = %self.config.name,
            core_threads = core,
            max_threads = self.config.max_threads,
            max_idle_ms = self.config.max_idle_time_ms,
            "Executor started"
        );
        Ok(())
    }

    /// Stop the worker threads. Safe to call on a stopped pool.
    ///
    /// Daemon pools are abandoned immediately; others wait up to the idle
    /// time for running tasks. Must not be called from inside an async task.
    pub fn stop(&self) {
        self.shared.handle.write().unwrap_or_else(|e| e.into_inner()).take();
        let runtime = self.runtime.lock().unwrap_or_else(|e| e.into_inner()).take();

        if let Some(runtime) = runtime {
            if self.config.daemon {
                runtime.shutdown_background();
            } else {
                runtime.shutdown_timeout(Duration::from_millis(self.config.max_idle_time_ms));
            }
            tracing::info!(executor = %self.config.name, "Executor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.handle.read().map(|h| h.is_some()).unwrap_or(false)
    }

    /// Non-owning handle for components that submit work.
    pub fn handle(&self) -> ExecutorHandle {
        ExecutorHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Snapshot of the pool counters.
    pub fn state(&self) -> ExecutorState {
        let stats = &self.shared.stats;
        ExecutorState {
            max_idle_time_ms: self.config.max_idle_time_ms,
            max_threads: self.config.max_threads,
            min_spare_threads: self.config.min_spare_threads,
            active_count: stats.active.load(Ordering::SeqCst),
            completed_task_count: stats.completed.load(Ordering::SeqCst),
            core_pool_size: self.core_threads(),
            largest_pool_size: stats.largest_pool_size.load(Ordering::SeqCst),
            pool_size: stats.pool_size.load(Ordering::SeqCst),
            queue_size: stats.queued.load(Ordering::SeqCst),
        }
    }

    fn core_threads(&self) -> usize {
        self.config.min_spare_threads.max(1)
    }
}

impl std::fmt::Debug for ThreadExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadExecutor")
            .field("name", &self.config.name)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Weak handle used to submit work to a [`ThreadExecutor`].
#[derive(Debug, Clone)]
pub struct ExecutorHandle {
    shared: Weak<Shared>,
}

impl ExecutorHandle {
    /// Submit a future to the pool.
    pub fn spawn<F>(&self, future: F) -> Result<JoinHandle<F::Output>, ExecutorError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let shared = self.shared.upgrade().ok_or(ExecutorError::Rejected)?;
        let handle = shared
            .handle
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(ExecutorError::Rejected)?;

        shared.stats.queued.fetch_add(1, Ordering::SeqCst);
        Ok(handle.spawn(async move {
            let _task = TaskGuard::begin(shared);
            future.await
        }))
    }

    /// True while the owning pool is alive and started.
    pub fn is_available(&self) -> bool {
        self.shared
            .upgrade()
            .map(|s| s.handle.read().map(|h| h.is_some()).unwrap_or(false))
            .unwrap_or(false)
    }
}

/// Moves a task from queued to active, and to completed when dropped.
struct TaskGuard {
    shared: Arc<Shared>,
}

impl TaskGuard {
    fn begin(shared: Arc<Shared>) -> Self {
        shared.stats.queued.fetch_sub(1, Ordering::SeqCst);
        shared.stats.active.fetch_add(1, Ordering::SeqCst);
        Self { shared }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.shared.stats.active.fetch_sub(1, Ordering::SeqCst);
        self.shared.stats.completed.fetch_add(1, Ordering::SeqCst);
    }
}
