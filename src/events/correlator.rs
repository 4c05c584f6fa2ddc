//! Watermark-bounded event collection and per-resource correlation.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::cloud::{CallContext, DescribeEventsRequest, SharedCloud, StackEvent};
use crate::error::Result;

/// First-seen time of each status, per resource key.
pub type ResourceTimeline = BTreeMap<String, BTreeMap<String, DateTime<Utc>>>;

/// Key of a resource in a [`ResourceTimeline`].
#[must_use]
pub fn resource_key(resource_type: &str, logical_id: &str) -> String {
    format!("{resource_type} ({logical_id})")
}

/// Builds a timeline from events in arrival order (newest first).
///
/// Events older than `watermark` are dropped. For each resource and status
/// the first sighting wins.
#[must_use]
pub fn correlate(events: &[StackEvent], watermark: DateTime<Utc>) -> ResourceTimeline {
    let mut timeline = ResourceTimeline::new();
    for event in events.iter().filter(|e| e.timestamp >= watermark) {
        timeline
            .entry(resource_key(&event.resource_type, &event.logical_id))
            .or_default()
            .entry(event.status.clone())
            .or_insert(event.timestamp);
    }
    timeline
}

/// Time one resource spent in one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceDuration {
    /// Resource key.
    pub key: String,
    /// Operation, e.g. `CREATE` or `UPDATE_ROLLBACK`.
    pub operation: String,
    /// When the operation started.
    pub started: DateTime<Utc>,
    /// When it reached a terminal status, if it did.
    pub finished: Option<DateTime<Utc>>,
    /// Terminal status, or the in-progress status if unfinished.
    pub status: String,
    /// Elapsed time, if finished.
    pub duration: Option<Duration>,
}

/// Pairs every `<OP>_IN_PROGRESS` status with `<OP>_COMPLETE` or `<OP>_FAILED`.
///
/// The result is ordered by start time, then key.
#[must_use]
pub fn durations(timeline: &ResourceTimeline) -> Vec<ResourceDuration> {
    let mut out = Vec::new();
    for (key, statuses) in timeline {
        for (status, started) in statuses {
            let Some(operation) = status.strip_suffix("_IN_PROGRESS") else {
                continue;
            };
            let terminal = [format!("{operation}_COMPLETE"), format!("{operation}_FAILED")]
                .into_iter()
                .find_map(|s| statuses.get(&s).map(|at| (s, *at)))
                .filter(|(_, at)| at >= started);

            let (status, finished) = match terminal {
                Some((s, at)) => (s, Some(at)),
                None => (status.clone(), None),
            };
            out.push(ResourceDuration {
                key: key.clone(),
                operation: operation.to_string(),
                started: *started,
                finished,
                status,
                duration: finished.and_then(|f| (f - *started).to_std().ok()),
            });
        }
    }
    out.sort_by(|a, b| a.started.cmp(&b.started).then_with(|| a.key.cmp(&b.key)));
    out
}

/// Fetches a stack's events newer than `watermark`, newest first.
///
/// Paging stops at the first event older than the watermark.
///
/// # Errors
///
/// Returns the first page error; partial results are discarded.
pub async fn collect_events(
    cloud: &SharedCloud,
    ctx: &CallContext,
    stack: &str,
    watermark: DateTime<Utc>,
) -> Result<Vec<StackEvent>> {
    let mut events = Vec::new();
    let mut next_token = None;

    loop {
        let request = DescribeEventsRequest {
            stack_name: stack.to_string(),
            next_token,
        };
        let page = cloud.describe_stack_events(ctx, &request).await?;

        let mut reached_watermark = false;
        for event in page.items {
            if event.timestamp < watermark {
                reached_watermark = true;
                break;
            }
            events.push(event);
        }

        match page.next_token {
            Some(token) if !reached_watermark => next_token = Some(token),
            _ => break,
        }
    }

    debug!("Collected {} events for {stack} since {watermark}", events.len());
    Ok(events)
}

/// Builds event timelines for a stack.
#[derive(Clone)]
pub struct EventCorrelator {
    /// Cloud port.
    cloud: SharedCloud,
}

impl EventCorrelator {
    /// Creates a correlator.
    #[must_use]
    pub fn new(cloud: SharedCloud) -> Self {
        Self { cloud }
    }

    /// Builds the timeline of a stack since `watermark`.
    ///
    /// # Errors
    ///
    /// Returns the first page error.
    pub async fn timeline(
        &self,
        ctx: &CallContext,
        stack: &str,
        watermark: DateTime<Utc>,
    ) -> Result<ResourceTimeline> {
        let events = collect_events(&self.cloud, ctx, stack, watermark).await?;
        Ok(correlate(&events, watermark))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{MemoryCloudFormation, op};
    use crate::error::CloudError;
    use chrono::TimeDelta;
    use std::sync::Arc;

    fn event(
        id: &str,
        resource_type: &str,
        logical_id: &str,
        status: &str,
        at: DateTime<Utc>,
    ) -> StackEvent {
        StackEvent {
            event_id: id.to_string(),
            stack_name: String::from("s"),
            logical_id: logical_id.to_string(),
            resource_type: resource_type.to_string(),
            status: status.to_string(),
            status_reason: None,
            timestamp: at,
        }
    }

    fn scenario(w: DateTime<Utc>) -> Vec<StackEvent> {
        let min = TimeDelta::minutes;
        let sec = TimeDelta::seconds;
        vec![
            event("5", "AWS::IAM::Role", "MyRole", "CREATE_COMPLETE", w + sec(8)),
            event("4", "AWS::S3::Bucket", "MyBucket", "CREATE_COMPLETE", w + sec(7)),
            event("3", "AWS::IAM::Role", "MyRole", "CREATE_IN_PROGRESS", w + sec(6)),
            event("2", "AWS::S3::Bucket", "MyBucket", "CREATE_IN_PROGRESS", w + sec(5)),
            event("1", "AWS::S3::Bucket", "MyBucket", "DELETE_COMPLETE", w - min(5)),
        ]
    }

    #[test]
    fn test_correlation_respects_watermark() {
        let w = Utc::now() - TimeDelta::minutes(10);
        let timeline = correlate(&scenario(w), w);

        assert_eq!(timeline.len(), 2);
        let bucket = &timeline["AWS::S3::Bucket (MyBucket)"];
        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket["CREATE_IN_PROGRESS"], w + TimeDelta::seconds(5));
        assert_eq!(bucket["CREATE_COMPLETE"], w + TimeDelta::seconds(7));
        assert!(!bucket.contains_key("DELETE_COMPLETE"));

        let role = &timeline["AWS::IAM::Role (MyRole)"];
        assert_eq!(role["CREATE_IN_PROGRESS"], w + TimeDelta::seconds(6));
        assert_eq!(role["CREATE_COMPLETE"], w + TimeDelta::seconds(8));

        for statuses in timeline.values() {
            assert!(statuses.values().all(|at| *at >= w));
        }
    }

    #[test]
    fn test_first_seen_wins() {
        let w = Utc::now() - TimeDelta::minutes(10);
        let events = vec![
            event("2", "AWS::SQS::Queue", "Q", "UPDATE_IN_PROGRESS", w + TimeDelta::seconds(9)),
            event("1", "AWS::SQS::Queue", "Q", "UPDATE_IN_PROGRESS", w + TimeDelta::seconds(3)),
        ];
        let timeline = correlate(&events, w);
        assert_eq!(
            timeline["AWS::SQS::Queue (Q)"]["UPDATE_IN_PROGRESS"],
            w + TimeDelta::seconds(9)
        );
    }

    #[test]
    fn test_durations_pair_operations() {
        let w = Utc::now() - TimeDelta::minutes(10);
        let mut events = scenario(w);
        events.insert(
            0,
            event("6", "AWS::Lambda::Function", "Fn", "UPDATE_IN_PROGRESS", w + TimeDelta::seconds(9)),
        );
        let result = durations(&correlate(&events, w));

        assert_eq!(result.len(), 3);
        assert_eq!(result[0].key, "AWS::S3::Bucket (MyBucket)");
        assert_eq!(result[0].operation, "CREATE");
        assert_eq!(result[0].status, "CREATE_COMPLETE");
        assert_eq!(result[0].duration, Some(Duration::from_secs(2)));
        assert_eq!(result[1].key, "AWS::IAM::Role (MyRole)");

        let unfinished = &result[2];
        assert_eq!(unfinished.operation, "UPDATE");
        assert_eq!(unfinished.finished, None);
        assert_eq!(unfinished.duration, None);
    }

    #[tokio::test]
    async fn test_collect_stops_paging_at_watermark() {
        let w = Utc::now() - TimeDelta::minutes(10);
        let cloud = Arc::new(MemoryCloudFormation::new());
        cloud.add_stack("s", "CREATE_COMPLETE");
        cloud.set_events_page_size(2);
        let mut events = scenario(w);
        events.push(event("0", "AWS::S3::Bucket", "MyBucket", "DELETE_IN_PROGRESS", w - TimeDelta::minutes(6)));
        cloud.push_events("s", events);

        let shared: SharedCloud = cloud.clone();
        let collected = collect_events(&shared, &CallContext::new(), "s", w).await.unwrap();
        assert_eq!(collected.len(), 4);
        assert_eq!(cloud.call_count(op::DESCRIBE_STACK_EVENTS), 3);
    }

    #[tokio::test]
    async fn test_page_error_aborts() {
        let w = Utc::now() - TimeDelta::minutes(10);
        let cloud = Arc::new(MemoryCloudFormation::new());
        cloud.add_stack("s", "CREATE_COMPLETE");
        cloud.set_events_page_size(1);
        cloud.push_events("s", scenario(w));
        cloud.fail_next(
            op::DESCRIBE_STACK_EVENTS,
            CloudError::generic(op::DESCRIBE_STACK_EVENTS, "boom"),
        );

        let correlator = EventCorrelator::new(cloud);
        assert!(correlator.timeline(&CallContext::new(), "s", w).await.is_err());
    }
}
