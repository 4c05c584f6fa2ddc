//! Change-set lifecycle: create, poll, page, execute, delete.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cloud::{
    CallContext, ChangeSetPage, ChangeSetRef, CreateChangeSetRequest, CreatedChangeSet,
    DescribeChangeSetRequest, SharedCloud,
};
use crate::error::{ChangeSetError, Result};

use super::danger::is_no_changes_reason;
use super::types::ChangeSet;

/// Status of a change-set that has been computed.
const STATUS_CREATE_COMPLETE: &str = "CREATE_COMPLETE";
/// Status of a change-set the provider could not compute.
const STATUS_FAILED: &str = "FAILED";
/// Status of a change-set deleted behind our back.
const STATUS_DELETE_COMPLETE: &str = "DELETE_COMPLETE";
/// Status of a change-set the provider could not delete.
const STATUS_DELETE_FAILED: &str = "DELETE_FAILED";

/// Polling bounds for [`ChangeSetManager::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// First delay between polls.
    pub initial: Duration,
    /// Upper bound for the delay.
    pub max: Duration,
    /// Total time to wait for a terminal status.
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            max: Duration::from_secs(30),
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Terminal outcome of a change-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Computed with changes; ready to execute.
    Ready(ChangeSet),
    /// Computed without changes; should be deleted.
    Empty(ChangeSet),
    /// The provider could not compute it.
    Failed(ChangeSet),
    /// Deleted by someone else while we were waiting.
    DeletedExternally(ChangeSet),
}

impl PollOutcome {
    /// The polled change-set.
    #[must_use]
    pub const fn changeset(&self) -> &ChangeSet {
        match self {
            Self::Ready(cs) | Self::Empty(cs) | Self::Failed(cs) | Self::DeletedExternally(cs) => {
                cs
            }
        }
    }

    /// Consumes the outcome, returning the change-set.
    #[must_use]
    pub fn into_changeset(self) -> ChangeSet {
        match self {
            Self::Ready(cs) | Self::Empty(cs) | Self::Failed(cs) | Self::DeletedExternally(cs) => {
                cs
            }
        }
    }
}

/// Classifies a page's status; `None` while the provider is still working.
fn terminal_outcome(page: &ChangeSetPage) -> Option<fn(ChangeSet) -> PollOutcome> {
    match page.status.as_str() {
        STATUS_CREATE_COMPLETE => Some(PollOutcome::Ready),
        STATUS_FAILED
            if page
                .status_reason
                .as_deref()
                .is_some_and(is_no_changes_reason) =>
        {
            Some(PollOutcome::Empty)
        }
        STATUS_FAILED | STATUS_DELETE_FAILED => Some(PollOutcome::Failed),
        STATUS_DELETE_COMPLETE => Some(PollOutcome::DeletedExternally),
        _ => None,
    }
}

/// Drives change-sets through their lifecycle.
#[derive(Clone)]
pub struct ChangeSetManager {
    /// Cloud port.
    cloud: SharedCloud,
    /// Polling bounds.
    settings: PollSettings,
}

impl ChangeSetManager {
    /// Creates a manager.
    #[must_use]
    pub fn new(cloud: SharedCloud, settings: PollSettings) -> Self {
        Self { cloud, settings }
    }

    /// Returns the polling settings.
    #[must_use]
    pub const fn settings(&self) -> &PollSettings {
        &self.settings
    }

    /// Creates a change-set.
    ///
    /// # Errors
    ///
    /// Returns the port error, or `CreationFailed` if the provider did not
    /// return an identifier.
    pub async fn create(
        &self,
        ctx: &CallContext,
        request: &CreateChangeSetRequest,
    ) -> Result<CreatedChangeSet> {
        info!(
            "Creating {} change set {} for stack {}",
            request.change_set_type, request.change_set_name, request.stack_name
        );
        let created = self.cloud.create_change_set(ctx, request).await?;
        if created.id.is_empty() {
            return Err(ChangeSetError::CreationFailed {
                name: request.change_set_name.clone(),
                message: String::from("provider returned no change set id"),
            }
            .into());
        }
        debug!("Created change set {}", created.id);
        Ok(created)
    }

    /// Fetches a change-set once, following every continuation token.
    ///
    /// # Errors
    ///
    /// Returns the first port error; partial results are discarded.
    pub async fn describe(&self, ctx: &CallContext, reference: &ChangeSetRef) -> Result<ChangeSet> {
        let first = self.fetch_page(ctx, reference, None).await?;
        self.collect(ctx, reference, first).await
    }

    /// Polls a change-set until it reaches a terminal status.
    ///
    /// The delay between polls starts at `initial` and doubles up to `max`.
    /// Once terminal, every page of the change list is collected.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if no terminal status is seen within `timeout`, or
    /// the first port error.
    pub async fn wait(&self, ctx: &CallContext, reference: &ChangeSetRef) -> Result<PollOutcome> {
        let started = Instant::now();
        let deadline = started + self.settings.timeout;
        let mut delay = self.settings.initial;

        loop {
            let page = self.fetch_page(ctx, reference, None).await?;
            if let Some(outcome) = terminal_outcome(&page) {
                debug!("Change set {} is {}", page.name, page.status);
                let changeset = self.collect(ctx, reference, page).await?;
                return Ok(outcome(changeset));
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ChangeSetError::Timeout {
                    name: reference.change_set.clone(),
                    status: page.status,
                    waited_secs: now.duration_since(started).as_secs(),
                }
                .into());
            }

            debug!(
                "Change set {} is {}, polling again in {}ms",
                page.name,
                page.status,
                delay.as_millis()
            );
            ctx.sleep("ChangeSetPoll", delay.min(deadline - now)).await?;
            delay = (delay * 2).min(self.settings.max);
        }
    }

    /// Executes a change-set. The stack operation continues remotely.
    ///
    /// # Errors
    ///
    /// Returns the port error.
    pub async fn execute(&self, ctx: &CallContext, reference: &ChangeSetRef) -> Result<()> {
        info!("Executing change set {}", reference.change_set);
        self.cloud.execute_change_set(ctx, reference).await?;
        Ok(())
    }

    /// Deletes a change-set, returning whether the provider accepted it.
    pub async fn delete(&self, ctx: &CallContext, reference: &ChangeSetRef) -> bool {
        match self.cloud.delete_change_set(ctx, reference).await {
            Ok(()) => {
                info!("Deleted change set {}", reference.change_set);
                true
            }
            Err(err) => {
                warn!("Could not delete change set {}: {err}", reference.change_set);
                false
            }
        }
    }

    async fn fetch_page(
        &self,
        ctx: &CallContext,
        reference: &ChangeSetRef,
        next_token: Option<String>,
    ) -> Result<ChangeSetPage> {
        let request = DescribeChangeSetRequest {
            change_set: reference.clone(),
            next_token,
        };
        Ok(self.cloud.describe_change_set(ctx, &request).await?)
    }

    /// Builds a change-set from `first` and every following page.
    async fn collect(
        &self,
        ctx: &CallContext,
        reference: &ChangeSetRef,
        first: ChangeSetPage,
    ) -> Result<ChangeSet> {
        let mut changeset = ChangeSet::from_page_header(&first);
        let mut next_token = first.next_token;
        for change in first.changes {
            changeset.add_change(change);
        }

        while let Some(token) = next_token.take() {
            debug!("Fetching next change set page");
            let page = self.fetch_page(ctx, reference, Some(token)).await?;
            for change in page.changes {
                changeset.add_change(change);
            }
            next_token = page.next_token;
        }
        Ok(changeset)
    }
}
