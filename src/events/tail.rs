//! Live event tailing while a stack operation runs.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::cloud::{CallContext, DescribeStacksRequest, SharedCloud, StackEvent, StackSnapshot};
use crate::error::Result;
use crate::stack::{REVIEW_IN_PROGRESS, is_in_progress, is_successful_terminal};

use super::correlator::collect_events;

/// Default interval between polls.
pub const DEFAULT_TAIL_INTERVAL: Duration = Duration::from_secs(5);

/// Resource type of the events a stack reports about itself.
const STACK_RESOURCE_TYPE: &str = "AWS::CloudFormation::Stack";

/// Terminal status of a deleted stack.
const DELETE_COMPLETE: &str = "DELETE_COMPLETE";

/// How a tailed stack operation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TailOutcome {
    /// Final stack status; `DELETE_COMPLETE` if the stack disappeared.
    pub status: String,
    /// Final snapshot, unless the stack disappeared.
    pub stack: Option<StackSnapshot>,
    /// Every event seen, oldest first.
    pub events: Vec<StackEvent>,
}

impl TailOutcome {
    /// True if the final status reports success.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        is_successful_terminal(&self.status)
    }
}

/// Follows a stack's events until its status settles.
#[derive(Clone)]
pub struct EventTailer {
    /// Cloud port.
    cloud: SharedCloud,
    /// Poll interval.
    interval: Duration,
}

impl EventTailer {
    /// Creates a tailer.
    #[must_use]
    pub fn new(cloud: SharedCloud, interval: Duration) -> Self {
        Self { cloud, interval }
    }

    /// Polls events newer than `watermark` and the stack status until the
    /// status no longer ends in `_IN_PROGRESS`.
    ///
    /// A terminal status only counts once the operation has visibly begun:
    /// the status was in progress, or the stack logged an in-progress event
    /// after `watermark`. Until then, and while the stack is still in
    /// `REVIEW_IN_PROGRESS`, polling goes on. A deleted stack ends the tail
    /// at once.
    ///
    /// `on_event` sees each new event once, oldest first. Address the stack
    /// by ARN so a deleted stack can still be described.
    ///
    /// # Errors
    ///
    /// Returns the first port error or a cancellation error.
    pub async fn tail<F>(
        &self,
        ctx: &CallContext,
        stack: &str,
        watermark: DateTime<Utc>,
        mut on_event: F,
    ) -> Result<TailOutcome>
    where
        F: FnMut(&StackEvent) + Send,
    {
        let mut seen = HashSet::new();
        let mut all = Vec::new();
        let mut began = false;

        loop {
            let snapshot = self.describe(ctx, stack).await?;
            let status = snapshot
                .as_ref()
                .map_or_else(|| String::from(DELETE_COMPLETE), |s| s.status.clone());

            let gone = snapshot.is_none();
            let mut fresh = match collect_events(&self.cloud, ctx, stack, watermark).await {
                Ok(events) => events,
                Err(_) if gone => Vec::new(),
                Err(err) => return Err(err),
            };
            fresh.retain(|e| seen.insert(e.event_id.clone()));
            began = began
                || is_in_progress(&status)
                || fresh
                    .iter()
                    .any(|e| e.resource_type == STACK_RESOURCE_TYPE && is_in_progress(&e.status));
            for event in fresh.into_iter().rev() {
                on_event(&event);
                all.push(event);
            }

            let settled = status == DELETE_COMPLETE
                || (began && !is_in_progress(&status) && status != REVIEW_IN_PROGRESS);
            if settled {
                info!("Stack {stack} reached {status}");
                return Ok(TailOutcome {
                    status,
                    stack: snapshot,
                    events: all,
                });
            }

            if began {
                debug!("Stack {stack} is {status}");
            } else {
                debug!("Stack {stack} is {status}; waiting for the operation to start");
            }
            ctx.sleep("TailEvents", self.interval).await?;
        }
    }

    async fn describe(&self, ctx: &CallContext, stack: &str) -> Result<Option<StackSnapshot>> {
        let request = DescribeStacksRequest {
            stack_name: Some(stack.to_string()),
            next_token: None,
        };
        match self.cloud.describe_stacks(ctx, &request).await {
            Ok(page) => Ok(page.items.into_iter().next()),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
