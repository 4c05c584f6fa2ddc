//! Deployment state machine states.

use std::fmt;

use serde::Serialize;

/// Final state of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalState {
    /// The stack reached a successful status, or a dry-run preview completed.
    #[serde(rename = "DONE_SUCCESS")]
    Success,
    /// The template and parameters produced no changes.
    #[serde(rename = "DONE_NO_CHANGES")]
    NoChanges,
    /// The change-set or the stack operation failed.
    #[serde(rename = "DONE_FAILED")]
    Failed,
    /// The deployment was not attempted or not approved.
    Refused,
}

impl TerminalState {
    /// True for the two success states.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success | Self::NoChanges)
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "DONE_SUCCESS",
            Self::NoChanges => "DONE_NO_CHANGES",
            Self::Failed => "DONE_FAILED",
            Self::Refused => "REFUSED",
        };
        f.write_str(name)
    }
}

/// State of a running deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeployState {
    /// Deployment accepted.
    Init,
    /// Running precheck commands.
    Prechecks,
    /// Looking the stack up.
    Classify,
    /// Building a `CREATE` change-set.
    BuildCreateChangeSet,
    /// Building an `UPDATE` change-set.
    BuildUpdateChangeSet,
    /// Waiting for the change-set to be computed.
    PollChangeSet,
    /// Waiting for approval.
    AwaitApproval,
    /// Executing the change-set or deleting the stack.
    Execute,
    /// Following stack events.
    TailEvents,
    /// Removing a change-set or placeholder stack.
    Cleanup,
    /// Finished.
    Done(TerminalState),
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Prechecks => "PRECHECKS",
            Self::Classify => "CLASSIFY",
            Self::BuildCreateChangeSet => "BUILD_CREATE_CS",
            Self::BuildUpdateChangeSet => "BUILD_UPDATE_CS",
            Self::PollChangeSet => "POLL_CS",
            Self::AwaitApproval => "AWAIT_APPROVAL",
            Self::Execute => "EXECUTE",
            Self::TailEvents => "TAIL_EVENTS",
            Self::Cleanup => "CLEANUP",
            Self::Done(terminal) => return terminal.fmt(f),
        };
        f.write_str(name)
    }
}
