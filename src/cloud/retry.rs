//! Throttle retry and cancellation for every port call.
//!
//! A throttled call sleeps for the configured pause and is retried exactly
//! once. A second throttle, or any other error, is returned to the caller.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::CloudResult;

use super::context::CallContext;
use super::port::{CloudFormationApi, op};
use super::types::{
    ChangeSetPage, ChangeSetRef, CreateChangeSetRequest, CreatedChangeSet,
    DescribeChangeSetRequest, DescribeEventsRequest, DescribeStacksRequest, ListImportsRequest,
    Page, StackEvent, StackResource, StackSnapshot,
};

/// Default pause before retrying a throttled call.
pub const DEFAULT_THROTTLE_PAUSE: Duration = Duration::from_secs(5);

/// Retry policy for throttled calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause before the single retry.
    pub throttle_pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            throttle_pause: DEFAULT_THROTTLE_PAUSE,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given pause.
    #[must_use]
    pub const fn new(throttle_pause: Duration) -> Self {
        Self { throttle_pause }
    }

    /// Runs `call`, retrying once after a pause if it is throttled.
    ///
    /// Each attempt is raced against the context's cancellation and deadline.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt, or a cancellation error.
    pub async fn call<T, F, Fut>(&self, ctx: &CallContext, operation: &str, mut call: F) -> CloudResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CloudResult<T>>,
    {
        debug!("{operation}");
        match ctx.run(operation, call()).await {
            Err(err) if err.is_throttled() => {
                warn!(
                    "{operation} throttled, retrying once in {}s",
                    self.throttle_pause.as_secs_f32()
                );
                ctx.sleep(operation, self.throttle_pause).await?;
                ctx.run(operation, call()).await
            }
            other => other,
        }
    }
}

/// Port decorator applying [`RetryPolicy`] and cancellation to every call.
#[derive(Debug)]
pub struct GuardedCloud<C> {
    /// Wrapped port.
    inner: C,
    /// Retry policy.
    policy: RetryPolicy,
}

impl<C: CloudFormationApi> GuardedCloud<C> {
    /// Wraps a port.
    #[must_use]
    pub const fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Returns the wrapped port.
    #[must_use]
    pub const fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: CloudFormationApi> CloudFormationApi for GuardedCloud<C> {
    async fn describe_stacks(
        &self,
        ctx: &CallContext,
        request: &DescribeStacksRequest,
    ) -> CloudResult<Page<StackSnapshot>> {
        self.policy
            .call(ctx, op::DESCRIBE_STACKS, || self.inner.describe_stacks(ctx, request))
            .await
    }

    async fn describe_stack_resources(
        &self,
        ctx: &CallContext,
        stack_name: &str,
    ) -> CloudResult<Vec<StackResource>> {
        self.policy
            .call(ctx, op::DESCRIBE_STACK_RESOURCES, || {
                self.inner.describe_stack_resources(ctx, stack_name)
            })
            .await
    }

    async fn describe_stack_events(
        &self,
        ctx: &CallContext,
        request: &DescribeEventsRequest,
    ) -> CloudResult<Page<StackEvent>> {
        self.policy
            .call(ctx, op::DESCRIBE_STACK_EVENTS, || {
                self.inner.describe_stack_events(ctx, request)
            })
            .await
    }

    async fn create_change_set(
        &self,
        ctx: &CallContext,
        request: &CreateChangeSetRequest,
    ) -> CloudResult<CreatedChangeSet> {
        self.policy
            .call(ctx, op::CREATE_CHANGE_SET, || {
                self.inner.create_change_set(ctx, request)
            })
            .await
    }

    async fn describe_change_set(
        &self,
        ctx: &CallContext,
        request: &DescribeChangeSetRequest,
    ) -> CloudResult<ChangeSetPage> {
        self.policy
            .call(ctx, op::DESCRIBE_CHANGE_SET, || {
                self.inner.describe_change_set(ctx, request)
            })
            .await
    }

    async fn execute_change_set(
        &self,
        ctx: &CallContext,
        change_set: &ChangeSetRef,
    ) -> CloudResult<()> {
        self.policy
            .call(ctx, op::EXECUTE_CHANGE_SET, || {
                self.inner.execute_change_set(ctx, change_set)
            })
            .await
    }

    async fn delete_change_set(
        &self,
        ctx: &CallContext,
        change_set: &ChangeSetRef,
    ) -> CloudResult<()> {
        self.policy
            .call(ctx, op::DELETE_CHANGE_SET, || {
                self.inner.delete_change_set(ctx, change_set)
            })
            .await
    }

    async fn delete_stack(&self, ctx: &CallContext, stack_name: &str) -> CloudResult<()> {
        self.policy
            .call(ctx, op::DELETE_STACK, || self.inner.delete_stack(ctx, stack_name))
            .await
    }

    async fn list_imports(
        &self,
        ctx: &CallContext,
        request: &ListImportsRequest,
    ) -> CloudResult<Page<String>> {
        self.policy
            .call(ctx, op::LIST_IMPORTS, || self.inner.list_imports(ctx, request))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::port::MockCloudFormationApi;
    use crate::error::{CloudError, CloudErrorKind};
    use tokio_test::{assert_err, assert_ok};

    fn guarded(mock: MockCloudFormationApi) -> GuardedCloud<MockCloudFormationApi> {
        GuardedCloud::new(mock, RetryPolicy::new(Duration::ZERO))
    }

    #[tokio::test]
    async fn test_throttle_retried_once_then_succeeds() {
        let mut mock = MockCloudFormationApi::new();
        let mut calls = 0;
        mock.expect_delete_stack().times(2).returning(move |_, _| {
            calls += 1;
            if calls == 1 {
                Err(CloudError::throttled(op::DELETE_STACK))
            } else {
                Ok(())
            }
        });

        let cloud = guarded(mock);
        assert_ok!(cloud.delete_stack(&CallContext::new(), "s").await);
    }

    #[tokio::test]
    async fn test_second_throttle_is_fatal() {
        let mut mock = MockCloudFormationApi::new();
        mock.expect_list_imports()
            .times(2)
            .returning(|_, _| Err(CloudError::throttled(op::LIST_IMPORTS)));

        let cloud = guarded(mock);
        let request = ListImportsRequest {
            export_name: String::from("vpc-id"),
            next_token: None,
        };
        let err = cloud
            .list_imports(&CallContext::new(), &request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), CloudErrorKind::Throttled);
    }

    #[tokio::test]
    async fn test_other_errors_not_retried() {
        let mut mock = MockCloudFormationApi::new();
        mock.expect_describe_stack_resources()
            .times(1)
            .returning(|_, _| Err(CloudError::generic(op::DESCRIBE_STACK_RESOURCES, "boom")));

        let cloud = guarded(mock);
        assert_err!(
            cloud
                .describe_stack_resources(&CallContext::new(), "s")
                .await
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_for_pause() {
        let mut mock = MockCloudFormationApi::new();
        let mut calls = 0;
        mock.expect_delete_stack().times(2).returning(move |_, _| {
            calls += 1;
            if calls == 1 {
                Err(CloudError::throttled(op::DELETE_STACK))
            } else {
                Ok(())
            }
        });

        let cloud = GuardedCloud::new(mock, RetryPolicy::default());
        let started = tokio::time::Instant::now();
        assert_ok!(cloud.delete_stack(&CallContext::new(), "s").await);
        assert!(started.elapsed() >= DEFAULT_THROTTLE_PAUSE);
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let mut mock = MockCloudFormationApi::new();
        mock.expect_delete_stack().times(0);

        let ctx = CallContext::new();
        ctx.cancel();
        let err = guarded(mock).delete_stack(&ctx, "s").await.unwrap_err();
        assert_eq!(err.kind(), CloudErrorKind::Cancelled);
    }
}
