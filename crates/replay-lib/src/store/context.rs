//! Per-request cancellation and deadline handling
//!
//! Every backend call made by the store runs under a [`RequestContext`]. When
//! the caller cancels the token or the deadline passes, the in-flight call is
//! dropped and the operation returns [`ReplayError::Cancelled`].

use crate::error::{BackendError, CancelReason, ReplayError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Caller-supplied cancellation token and optional deadline
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// Set a deadline relative to now. A timeout too large to represent
    /// leaves the context without one.
    pub fn timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.deadline_at(deadline),
            None => self,
        }
    }

    /// Set an absolute deadline, keeping the earlier one if already set
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and every clone of it
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Fail fast if the context is already done
    pub fn check(&self, operation: &'static str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(cancelled(operation, CancelReason::Cancelled));
        }
        if matches!(self.deadline, Some(d) if Instant::now() >= d) {
            return Err(cancelled(operation, CancelReason::DeadlineExceeded));
        }
        Ok(())
    }

    /// Run a backend call, aborting it on cancellation or deadline.
    ///
    /// Backend failures become [`ReplayError::Store`] tagged with the
    /// operation and entity.
    pub(crate) async fn run<T, F>(&self, operation: &'static str, entity: &str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, BackendError>>,
    {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(cancelled(operation, CancelReason::Cancelled)),
            _ = deadline => Err(cancelled(operation, CancelReason::DeadlineExceeded)),
            result = call => result.map_err(|e| ReplayError::store(operation, entity, e)),
        }
    }
}

fn cancelled(operation: &'static str, reason: CancelReason) -> ReplayError {
    ReplayError::Cancelled { operation, reason }
}
