//! Stack readiness classification.

use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::cloud::{CallContext, DescribeStacksRequest, SharedCloud, StackSnapshot};
use crate::error::{DeployError, Result};

/// Statuses from which a stack accepts an update.
const READY_STATUSES: &[&str] = &[
    "CREATE_COMPLETE",
    "UPDATE_COMPLETE",
    "UPDATE_ROLLBACK_COMPLETE",
    "ROLLBACK_COMPLETE",
    "IMPORT_COMPLETE",
    "IMPORT_ROLLBACK_COMPLETE",
];

/// Terminal statuses that mean the last operation succeeded.
const SUCCESS_STATUSES: &[&str] = &[
    "CREATE_COMPLETE",
    "UPDATE_COMPLETE",
    "IMPORT_COMPLETE",
    "DELETE_COMPLETE",
];

/// Status of a stack created by a change-set that was never executed.
pub const REVIEW_IN_PROGRESS: &str = "REVIEW_IN_PROGRESS";

/// Readiness class of a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    /// Stack does not exist, or only as a change-set placeholder.
    New,
    /// Stack accepts an update.
    Ready,
    /// An operation is in progress.
    Busy,
    /// Stack is in a state that does not accept updates.
    Failed,
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Classifies a raw stack status.
///
/// Every input maps to exactly one class. The empty string stands for a
/// stack that does not exist.
#[must_use]
pub fn classify_status(status: &str) -> Readiness {
    if status.is_empty() || status == REVIEW_IN_PROGRESS {
        Readiness::New
    } else if READY_STATUSES.contains(&status) {
        Readiness::Ready
    } else if status.ends_with("_IN_PROGRESS") {
        Readiness::Busy
    } else {
        Readiness::Failed
    }
}

/// Returns true for a terminal status that reports success.
#[must_use]
pub fn is_successful_terminal(status: &str) -> bool {
    SUCCESS_STATUSES.contains(&status)
}

/// Returns true while the provider is still working on the stack.
#[must_use]
pub fn is_in_progress(status: &str) -> bool {
    status.ends_with("_IN_PROGRESS") && status != REVIEW_IN_PROGRESS
}

/// Result of probing a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackProbe {
    /// Whether the provider knows the stack.
    pub exists: bool,
    /// Readiness class.
    pub readiness: Readiness,
    /// Raw status, empty when the stack does not exist.
    pub status: String,
    /// Snapshot, when the stack exists.
    pub stack: Option<StackSnapshot>,
}

impl StackProbe {
    /// Probe result for a stack that does not exist.
    #[must_use]
    pub const fn missing() -> Self {
        Self {
            exists: false,
            readiness: Readiness::New,
            status: String::new(),
            stack: None,
        }
    }

    /// Probe result for an existing stack.
    #[must_use]
    pub fn found(stack: StackSnapshot) -> Self {
        Self {
            exists: true,
            readiness: classify_status(&stack.status),
            status: stack.status.clone(),
            stack: Some(stack),
        }
    }

    /// Stack ARN, when known.
    #[must_use]
    pub fn stack_id(&self) -> Option<&str> {
        self.stack.as_ref().map(|s| s.stack_id.as_str())
    }
}

/// Looks stacks up and classifies them.
#[derive(Clone)]
pub struct ReadinessClassifier {
    /// Cloud port.
    cloud: SharedCloud,
}

impl ReadinessClassifier {
    /// Creates a classifier.
    #[must_use]
    pub fn new(cloud: SharedCloud) -> Self {
        Self { cloud }
    }

    /// Probes a stack, preferring its ARN when known.
    ///
    /// A missing stack is not an error; it is reported as new.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails for any other reason, or if a
    /// name lookup matches more than one stack.
    pub async fn probe(
        &self,
        ctx: &CallContext,
        name: &str,
        stack_id: Option<&str>,
    ) -> Result<StackProbe> {
        let key = stack_id.filter(|id| !id.is_empty()).unwrap_or(name);
        debug!("Probing stack {key}");

        let request = DescribeStacksRequest {
            stack_name: Some(key.to_string()),
            next_token: None,
        };
        let page = match self.cloud.describe_stacks(ctx, &request).await {
            Ok(page) => page,
            Err(err) if err.is_not_found() => return Ok(StackProbe::missing()),
            Err(err) => return Err(err.into()),
        };

        let mut stacks = page.items;
        match stacks.len() {
            0 => Ok(StackProbe::missing()),
            1 => Ok(stacks
                .pop()
                .map_or_else(StackProbe::missing, StackProbe::found)),
            count => Err(DeployError::AmbiguousStack {
                name: key.to_string(),
                count,
            }
            .into()),
        }
    }
}
