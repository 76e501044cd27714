//! Caller deadlines and cancellation.
//!
//! Every blocking step (slot acquisition, statement execution, commit) runs
//! through [`Context::run`], which abandons the operation as soon as the
//! deadline passes or the caller cancels.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{GraphError, Result};

#[derive(Clone)]
struct CancelSignal {
    rx: watch::Receiver<bool>,
    parent: Option<Box<CancelSignal>>,
}

impl CancelSignal {
    fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.parent.as_ref().map_or(false, |parent| parent.is_cancelled())
    }

    fn cancelled(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let mut rx = self.rx.clone();
            let own = async move {
                let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
                if closed {
                    // Handle dropped without cancelling: this level never fires.
                    std::future::pending::<()>().await;
                }
            };

            match &self.parent {
                Some(parent) => tokio::select! {
                    _ = own => {}
                    _ = parent.cancelled() => {}
                },
                None => own.await,
            }
        })
    }
}

/// Cancels every [`Context`] derived from the one that created it.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal cancellation.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Deadline and cancellation scope for a call.
#[derive(Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: Option<CancelSignal>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.deadline)
            .field("cancelled", &self.cancel.as_ref().map(CancelSignal::is_cancelled))
            .finish()
    }
}

impl Context {
    /// A context that never expires.
    pub fn background() -> Self {
        Self::default()
    }

    /// Child context expiring after `timeout` (or earlier if the parent expires first).
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Child context expiring at `deadline` (or earlier if the parent expires first).
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };

        Self {
            deadline: Some(deadline),
            cancel: self.cancel.clone(),
        }
    }

    /// Child context plus the handle that cancels it.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let signal = CancelSignal {
            rx,
            parent: self.cancel.clone().map(Box::new),
        };

        (
            Self {
                deadline: self.deadline,
                cancel: Some(signal),
            },
            CancelHandle { tx },
        )
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// The error this context has already failed with, if any.
    pub fn err(&self) -> Option<GraphError> {
        if self.cancel.as_ref().map_or(false, CancelSignal::is_cancelled) {
            Some(GraphError::Cancelled)
        } else if self.deadline.map_or(false, |deadline| Instant::now() >= deadline) {
            Some(GraphError::Timeout)
        } else {
            None
        }
    }

    /// Resolves once the context is cancelled or expired.
    pub async fn done(&self) -> GraphError {
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        let cancelled = async {
            match &self.cancel {
                Some(signal) => signal.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancelled => GraphError::Cancelled,
            _ = expired => GraphError::Timeout,
        }
    }

    /// Run `operation`, abandoning it if the context finishes first.
    pub async fn run<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }

        tokio::select! {
            biased;
            err = self.done() => Err(err),
            result = operation => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_interrupts_operation() {
        let ctx = Context::background().with_timeout(Duration::from_millis(20));
        let result: Result<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(GraphError::Timeout)));
    }

    #[tokio::test]
    async fn test_parent_cancel_reaches_child() {
        let (parent, handle) = Context::background().with_cancel();
        let (child, _child_handle) = parent.with_cancel();

        handle.cancel();

        assert!(matches!(child.err(), Some(GraphError::Cancelled)));
        assert!(matches!(child.done().await, GraphError::Cancelled));
    }

    #[tokio::test]
    async fn test_child_deadline_never_extends_parent() {
        let parent = Context::background().with_timeout(Duration::from_millis(10));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test]
    async fn test_completed_operation_wins() {
        let ctx = Context::background().with_timeout(Duration::from_secs(5));
        assert_eq!(ctx.run(async { Ok(7) }).await.unwrap(), 7);
    }
}
