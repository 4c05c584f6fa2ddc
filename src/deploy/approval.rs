//! Approval and progress reporting seams.

use async_trait::async_trait;

use crate::changeset::ChangeSet;
use crate::cloud::StackEvent;
use crate::exports::Export;

use super::state::DeployState;

/// Decides whether a change-set or a deletion may go ahead.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Approver: Send + Sync {
    /// Returns true to execute `changeset`.
    async fn approve(&self, changeset: &ChangeSet) -> bool;

    /// Returns true to delete a change-set that was not approved.
    async fn discard_rejected(&self, changeset: &ChangeSet) -> bool;

    /// Returns true to delete `stack`, whose exports are listed.
    async fn approve_deletion(&self, stack: &str, exports: &[Export]) -> bool;
}

/// Approves everything without asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl Approver for AutoApprove {
    async fn approve(&self, _changeset: &ChangeSet) -> bool {
        true
    }

    async fn discard_rejected(&self, _changeset: &ChangeSet) -> bool {
        false
    }

    async fn approve_deletion(&self, _stack: &str, _exports: &[Export]) -> bool {
        true
    }
}

/// Receives progress while a deployment runs.
pub trait DeployReporter: Send + Sync {
    /// Called on every state transition.
    fn on_state(&self, _stack: &str, _state: DeployState) {}

    /// Called once the change-set has been computed.
    fn on_changeset(&self, _changeset: &ChangeSet) {}

    /// Called for every new stack event while tailing.
    fn on_event(&self, _event: &StackEvent) {}
}

/// Reporter that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl DeployReporter for NoopReporter {}
