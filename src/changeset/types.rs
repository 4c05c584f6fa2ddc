//! In-memory change-set.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cloud::{ChangeAction, ChangeSetPage, ChangeSetRef, ResourceChange};

use super::danger::is_dangerous;

/// Provider-computed preview of a stack update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    /// Change-set ARN.
    pub id: String,
    /// Change-set name.
    pub name: String,
    /// Stack ARN.
    pub stack_id: String,
    /// Stack name.
    pub stack_name: String,
    /// Creation time.
    pub creation_time: Option<DateTime<Utc>>,
    /// Status.
    pub status: String,
    /// Reason attached to the status.
    pub status_reason: Option<String>,
    /// Execution status.
    pub execution_status: Option<String>,
    /// True once a change from a nested module was added.
    has_module: bool,
    /// Changes in provider order.
    changes: Vec<ResourceChange>,
}

impl ChangeSet {
    /// Creates an empty change-set from the header of a description page.
    #[must_use]
    pub fn from_page_header(page: &ChangeSetPage) -> Self {
        Self {
            id: page.id.clone(),
            name: page.name.clone(),
            stack_id: page.stack_id.clone(),
            stack_name: page.stack_name.clone(),
            creation_time: page.creation_time,
            status: page.status.clone(),
            status_reason: page.status_reason.clone(),
            execution_status: page.execution_status.clone(),
            has_module: false,
            changes: Vec::new(),
        }
    }

    /// Appends a change.
    pub fn add_change(&mut self, change: ResourceChange) {
        if !change.module_path.is_empty() {
            self.has_module = true;
        }
        self.changes.push(change);
    }

    /// Changes in provider order.
    #[must_use]
    pub fn changes(&self) -> &[ResourceChange] {
        &self.changes
    }

    /// True if any change originates in a nested module.
    #[must_use]
    pub const fn has_module(&self) -> bool {
        self.has_module
    }

    /// True if the change-set contains no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of changes with the given action.
    #[must_use]
    pub fn count(&self, action: ChangeAction) -> usize {
        self.changes.iter().filter(|c| c.action == action).count()
    }

    /// Changes that may recreate a resource.
    pub fn dangerous_changes(&self) -> impl Iterator<Item = &ResourceChange> {
        self.changes.iter().filter(|c| is_dangerous(c))
    }

    /// Address of this change-set.
    #[must_use]
    pub fn reference(&self) -> ChangeSetRef {
        if self.id.is_empty() {
            ChangeSetRef::by_name(&self.stack_name, &self.name)
        } else {
            ChangeSetRef::by_id(&self.id)
        }
    }
}
