//! Access to the CloudFormation API.
//!
//! The core talks to the provider only through [`CloudFormationApi`]:
//! - `aws`: adapter over the AWS SDK
//! - `retry`: throttle-retry and cancellation decorator
//! - `memory`: in-memory implementation for tests and local runs

mod aws;
mod context;
mod memory;
mod port;
mod retry;
mod types;

pub use aws::AwsCloudFormation;
pub use context::CallContext;
pub use memory::MemoryCloudFormation;
#[cfg(test)]
pub use port::MockCloudFormationApi;
pub use port::{CloudFormationApi, SharedCloud, op};
pub use retry::{DEFAULT_THROTTLE_PAUSE, GuardedCloud, RetryPolicy};
pub use types::{
    Bindings, ChangeAction, ChangeDetail, ChangeSetPage, ChangeSetRef, ChangeSetTemplate,
    ChangeSetType, CreateChangeSetRequest, CreatedChangeSet, DescribeChangeSetRequest,
    DescribeEventsRequest, DescribeStacksRequest, DriftInfo, Evaluation, ListImportsRequest, Page,
    Replacement, RequiresRecreation, ResourceChange, StackEvent, StackOutput, StackResource,
    StackSnapshot,
};
