//! Background task pool
//!
//! Mode transitions and archive compression run off the caller's thread.
//! Callers never wait for them, but `wait_idle` lets tests and shutdown
//! paths block until everything submitted so far (and anything those tasks
//! submitted in turn) has finished.

use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Pool of fire-and-forget blocking tasks on a tokio runtime
pub struct TaskPool {
    handle: Handle,
    outstanding: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl TaskPool {
    /// Create a pool that spawns onto the given runtime
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            outstanding: Mutex::new(Vec::new()),
        }
    }

    /// Create a pool on the runtime of the calling context
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current().context("No tokio runtime available for task pool")?;
        Ok(Self::new(handle))
    }

    /// Submit a blocking task; returns immediately
    pub fn spawn<F>(&self, label: &'static str, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let join = self.handle.spawn_blocking(task);
        let mut outstanding = self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        outstanding.retain(|(_, j)| !j.is_finished());
        outstanding.push((label, join));
    }

    /// Number of submitted tasks that have not finished yet
    pub fn pending(&self) -> usize {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, j)| !j.is_finished())
            .count()
    }

    /// Wait until every submitted task, including ones spawned meanwhile, is done
    pub async fn wait_idle(&self) {
        loop {
            let batch = std::mem::take(
                &mut *self
                    .outstanding
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            if batch.is_empty() {
                return;
            }
            debug!(tasks = batch.len(), "Waiting for background tasks");
            for (label, join) in batch {
                if let Err(e) = join.await {
                    error!(task = label, "Background task failed: {}", e);
                }
            }
        }
    }
}
