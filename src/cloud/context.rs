//! Cancellation and deadline handle carried by every remote call.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{CloudError, CloudResult};

/// Cancellation/deadline handle passed to every port operation.
///
/// Cloning is cheap and clones share the same cancellation token.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Cancellation token.
    cancel: CancellationToken,
    /// Absolute deadline, if any.
    deadline: Option<Instant>,
}

impl CallContext {
    /// Creates a context with no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context bound to an existing token.
    #[must_use]
    pub const fn with_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Returns a copy with a deadline `timeout` from now.
    ///
    /// An existing earlier deadline is kept.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Returns a copy with the given deadline, keeping an earlier one.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            cancel: self.cancel.clone(),
            deadline: Some(deadline),
        }
    }

    /// Derives a child context; cancelling the parent cancels the child.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancels this context and every child.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes once the context is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails fast if the context is already cancelled or past its deadline.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` or `DeadlineExceeded`.
    pub fn check(&self, operation: &str) -> CloudResult<()> {
        if self.is_cancelled() {
            return Err(CloudError::cancelled(operation));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(CloudError::deadline_exceeded(operation));
        }
        Ok(())
    }

    /// Runs `fut`, aborting it on cancellation or when the deadline passes.
    ///
    /// # Errors
    ///
    /// Returns the future's error, `Cancelled`, or `DeadlineExceeded`.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> CloudResult<T>
    where
        F: Future<Output = CloudResult<T>>,
    {
        self.check(operation)?;

        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(CloudError::cancelled(operation)),
            () = deadline => Err(CloudError::deadline_exceeded(operation)),
            result = fut => result,
        }
    }

    /// Sleeps for `duration` unless cancelled or the deadline passes first.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` or `DeadlineExceeded`.
    pub async fn sleep(&self, operation: &str, duration: Duration) -> CloudResult<()> {
        self.run(operation, async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CloudErrorKind;

    #[tokio::test]
    async fn test_run_passes_result_through() {
        let ctx = CallContext::new();
        let value = ctx.run("Op", async { Ok::<_, CloudError>(7) }).await;
        assert_eq!(value, Ok(7));
    }

    #[tokio::test]
    async fn test_cancelled_context_fails_fast() {
        let ctx = CallContext::new();
        ctx.cancel();
        let err = ctx
            .run("DescribeStacks", async { Ok::<_, CloudError>(()) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), CloudErrorKind::Cancelled);
        assert_eq!(err.operation(), "DescribeStacks");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_sleep() {
        let ctx = CallContext::new().with_timeout(Duration::from_secs(1));
        let err = ctx
            .sleep("Backoff", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), CloudErrorKind::DeadlineExceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_propagates_to_child() {
        let parent = CallContext::new();
        let child = parent.child();

        let waiter = tokio::spawn(async move {
            child.sleep("Poll", Duration::from_secs(3600)).await
        });
        parent.cancel();

        let result = waiter.await.unwrap();
        assert_eq!(result.unwrap_err().kind(), CloudErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = CallContext::new().with_deadline(now + Duration::from_secs(5));
        let later = ctx.with_deadline(now + Duration::from_secs(50));
        assert_eq!(later.deadline(), Some(now + Duration::from_secs(5)));
    }
}
