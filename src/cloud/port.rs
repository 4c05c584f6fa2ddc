//! The CloudFormation port.
//!
//! This module defines the minimum set of provider capabilities the core
//! needs. The AWS SDK adapter, the throttle-retry decorator and the
//! in-memory fake all implement it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CloudResult;

use super::context::CallContext;
use super::types::{
    ChangeSetPage, ChangeSetRef, CreateChangeSetRequest, CreatedChangeSet,
    DescribeChangeSetRequest, DescribeEventsRequest, DescribeStacksRequest, ListImportsRequest,
    Page, StackEvent, StackResource, StackSnapshot,
};

/// Port names, used in logs and errors.
pub mod op {
    /// `DescribeStacks`.
    pub const DESCRIBE_STACKS: &str = "DescribeStacks";
    /// `DescribeStackResources`.
    pub const DESCRIBE_STACK_RESOURCES: &str = "DescribeStackResources";
    /// `DescribeStackEvents`.
    pub const DESCRIBE_STACK_EVENTS: &str = "DescribeStackEvents";
    /// `CreateChangeSet`.
    pub const CREATE_CHANGE_SET: &str = "CreateChangeSet";
    /// `DescribeChangeSet`.
    pub const DESCRIBE_CHANGE_SET: &str = "DescribeChangeSet";
    /// `ExecuteChangeSet`.
    pub const EXECUTE_CHANGE_SET: &str = "ExecuteChangeSet";
    /// `DeleteChangeSet`.
    pub const DELETE_CHANGE_SET: &str = "DeleteChangeSet";
    /// `DeleteStack`.
    pub const DELETE_STACK: &str = "DeleteStack";
    /// `ListImports`.
    pub const LIST_IMPORTS: &str = "ListImports";
}

/// Abstract façade over the CloudFormation API.
///
/// Implementations must be safe for concurrent use; the core shares one
/// instance across tasks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CloudFormationApi: Send + Sync {
    /// Describes one stack, or every stack when no name is given.
    async fn describe_stacks(
        &self,
        ctx: &CallContext,
        request: &DescribeStacksRequest,
    ) -> CloudResult<Page<StackSnapshot>>;

    /// Lists the resources of a stack.
    async fn describe_stack_resources(
        &self,
        ctx: &CallContext,
        stack_name: &str,
    ) -> CloudResult<Vec<StackResource>>;

    /// Fetches one page of stack events, newest first.
    async fn describe_stack_events(
        &self,
        ctx: &CallContext,
        request: &DescribeEventsRequest,
    ) -> CloudResult<Page<StackEvent>>;

    /// Creates a change-set.
    async fn create_change_set(
        &self,
        ctx: &CallContext,
        request: &CreateChangeSetRequest,
    ) -> CloudResult<CreatedChangeSet>;

    /// Fetches one page of a change-set description.
    async fn describe_change_set(
        &self,
        ctx: &CallContext,
        request: &DescribeChangeSetRequest,
    ) -> CloudResult<ChangeSetPage>;

    /// Executes a change-set.
    async fn execute_change_set(&self, ctx: &CallContext, change_set: &ChangeSetRef)
    -> CloudResult<()>;

    /// Deletes a change-set.
    async fn delete_change_set(&self, ctx: &CallContext, change_set: &ChangeSetRef)
    -> CloudResult<()>;

    /// Deletes a stack.
    async fn delete_stack(&self, ctx: &CallContext, stack_name: &str) -> CloudResult<()>;

    /// Fetches one page of the stacks importing an export.
    async fn list_imports(
        &self,
        ctx: &CallContext,
        request: &ListImportsRequest,
    ) -> CloudResult<Page<String>>;
}

/// Shared handle to a port implementation.
pub type SharedCloud = Arc<dyn CloudFormationApi>;
