//! Owned background notification tasks.
//!
//! Notifications that must not delay the caller run here instead of in
//! detached `tokio::spawn` calls. Finished tasks are reaped on the next
//! spawn and their failures logged; `wait_idle` joins whatever is still
//! running.

use std::future::{poll_fn, Future};
use std::sync::Mutex;
use std::task::Poll;

use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

use crate::Result;

type TaskOutput = (String, Result<()>);

/// A set of notification tasks owned by a dispatcher or consensus instance.
///
/// Dropping the set aborts tasks that are still running.
#[derive(Default)]
pub struct NotificationTasks {
    set: Mutex<JoinSet<TaskOutput>>,
}

impl NotificationTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` in the background. `label` identifies it in logs.
    pub fn spawn<F>(&self, label: impl Into<String>, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let label = label.into();
        let Ok(mut set) = self.set.lock() else {
            warn!(task = %label, "Notification task set poisoned, dropping task");
            return;
        };
        while let Some(finished) = set.try_join_next() {
            log_outcome(finished);
        }
        set.spawn(async move { (label, task.await) });
    }

    /// Number of tasks not yet reaped.
    pub fn len(&self) -> usize {
        self.set.lock().map(|set| set.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until every spawned task, including ones spawned meanwhile, has finished.
    ///
    /// Tasks are joined in place, so abandoning the wait leaves them running
    /// and owned by the set.
    pub async fn wait_idle(&self) {
        loop {
            let next = poll_fn(|cx| match self.set.lock() {
                Ok(mut set) => set.poll_join_next(cx),
                Err(_) => Poll::Ready(None),
            })
            .await;
            match next {
                Some(finished) => log_outcome(finished),
                None => return,
            }
        }
    }

    /// Abort everything still running.
    pub fn shutdown(&self) {
        if let Ok(mut set) = self.set.lock() {
            set.abort_all();
        }
    }
}

fn log_outcome(finished: std::result::Result<TaskOutput, JoinError>) {
    match finished {
        Ok((label, Ok(()))) => debug!(task = %label, "Notification sent"),
        Ok((label, Err(e))) if e.is_no_recipients() => {
            debug!(task = %label, error = %e, "Notification skipped")
        }
        Ok((label, Err(e))) => warn!(task = %label, error = %e, "Notification failed"),
        Err(e) if e.is_cancelled() => debug!("Notification task cancelled"),
        Err(e) => warn!(error = %e, "Notification task panicked"),
    }
}
