//! The deployment state machine.
//!
//! The orchestrator classifies the stack, builds and polls a change-set,
//! asks for approval, executes it, and tails stack events until the stack
//! settles. It also deletes stacks after checking that none of their
//! exports are imported elsewhere.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::changeset::{
    ChangeSet, ChangeSetManager, PollOutcome, PollSettings, build_request, console_url,
};
use crate::cloud::{CallContext, ChangeSetRef, SharedCloud, StackSnapshot, op};
use crate::error::{CirrusError, CloudErrorKind, ConfigError, DeployError, Result};
use crate::events::{
    DEFAULT_TAIL_INTERVAL, EventTailer, ResourceDuration, ResourceTimeline, correlate, durations,
};
use crate::exports::{DEFAULT_CONCURRENCY, Export, ExportResolver};
use crate::stack::{Readiness, ReadinessClassifier};

use super::approval::{Approver, AutoApprove, DeployReporter, NoopReporter};
use super::deployment::Deployment;
use super::prechecks::{PrecheckResult, run_prechecks};
use super::state::{DeployState, TerminalState};

/// Change-set status from which execution is possible.
const EXECUTABLE_STATUS: &str = "CREATE_COMPLETE";

/// Tunables of the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Change-set polling bounds.
    pub poll: PollSettings,
    /// Interval between event polls while tailing.
    pub tail_interval: Duration,
    /// Maximum concurrent `ListImports` calls.
    pub export_concurrency: usize,
    /// Region, used for console links.
    pub region: Option<String>,
    /// Precheck commands.
    pub prechecks: Vec<String>,
    /// Refuse the deployment when a precheck fails.
    pub stop_on_precheck_failure: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll: PollSettings::default(),
            tail_interval: DEFAULT_TAIL_INTERVAL,
            export_concurrency: DEFAULT_CONCURRENCY,
            region: None,
            prechecks: Vec::new(),
            stop_on_precheck_failure: false,
        }
    }
}

/// What happened during a deployment or deletion.
#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    /// Final state.
    pub state: TerminalState,
    /// Stack name.
    pub stack_name: String,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// The change-set, once computed.
    pub changeset: Option<ChangeSet>,
    /// Last observed stack.
    pub stack: Option<StackSnapshot>,
    /// First-seen time of each resource status.
    pub timeline: ResourceTimeline,
    /// Per-resource operation durations.
    pub durations: Vec<ResourceDuration>,
    /// Console link to the change-set.
    pub console_url: Option<String>,
    /// Error or refusal reason.
    pub error: Option<String>,
    /// Precheck results.
    pub prechecks: Vec<PrecheckResult>,
    /// Exports of a stack being deleted.
    pub exports: Vec<Export>,
}

impl DeployReport {
    fn new(stack_name: &str, dry_run: bool) -> Self {
        Self {
            state: TerminalState::Failed,
            stack_name: stack_name.to_string(),
            dry_run,
            changeset: None,
            stack: None,
            timeline: ResourceTimeline::new(),
            durations: Vec::new(),
            console_url: None,
            error: None,
            prechecks: Vec::new(),
            exports: Vec::new(),
        }
    }
}

/// Terminal state plus the reason for anything but success.
type Settled = (TerminalState, Option<String>);

/// Drives deployments through the change-set lifecycle.
pub struct Orchestrator {
    cloud: SharedCloud,
    classifier: ReadinessClassifier,
    changesets: ChangeSetManager,
    tailer: EventTailer,
    exports: ExportResolver,
    settings: OrchestratorSettings,
    approver: Arc<dyn Approver>,
    reporter: Arc<dyn DeployReporter>,
}

impl Orchestrator {
    /// Creates an orchestrator that approves everything and reports nothing.
    #[must_use]
    pub fn new(cloud: SharedCloud, settings: OrchestratorSettings) -> Self {
        Self {
            classifier: ReadinessClassifier::new(Arc::clone(&cloud)),
            changesets: ChangeSetManager::new(Arc::clone(&cloud), settings.poll),
            tailer: EventTailer::new(Arc::clone(&cloud), settings.tail_interval),
            exports: ExportResolver::new(Arc::clone(&cloud), settings.export_concurrency),
            cloud,
            settings,
            approver: Arc::new(AutoApprove),
            reporter: Arc::new(NoopReporter),
        }
    }

    /// Sets the approver.
    #[must_use]
    pub fn with_approver(mut self, approver: Arc<dyn Approver>) -> Self {
        self.approver = approver;
        self
    }

    /// Sets the progress reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn DeployReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Stack classifier.
    #[must_use]
    pub const fn classifier(&self) -> &ReadinessClassifier {
        &self.classifier
    }

    /// Change-set manager.
    #[must_use]
    pub const fn changesets(&self) -> &ChangeSetManager {
        &self.changesets
    }

    /// Export resolver.
    #[must_use]
    pub const fn exports(&self) -> &ExportResolver {
        &self.exports
    }

    /// Deploys a template to a stack.
    ///
    /// Failures the provider reports end in a report with state
    /// `DONE_FAILED` or `REFUSED` and the provider message.
    ///
    /// # Errors
    ///
    /// Returns an error for configuration problems, on cancellation, and if
    /// cancelled after the provider accepted the execution.
    pub async fn deploy(&self, ctx: &CallContext, mut deployment: Deployment) -> Result<DeployReport> {
        let mut report = DeployReport::new(&deployment.stack_name, deployment.dry_run);
        let settled = match self.run_deploy(ctx, &mut deployment, &mut report).await {
            Ok(settled) => settled,
            Err(err) => settle_error(err)?,
        };

        report.changeset = deployment.changeset.take();
        if report.stack.is_none() {
            report.stack = deployment.stack.take();
        }
        Ok(self.finish(report, settled))
    }

    /// Executes an existing change-set and tails the stack.
    ///
    /// # Errors
    ///
    /// Same as [`Orchestrator::deploy`].
    pub async fn execute_existing(
        &self,
        ctx: &CallContext,
        reference: &ChangeSetRef,
    ) -> Result<DeployReport> {
        let mut report = DeployReport::new(reference.stack_name.as_deref().unwrap_or_default(), false);
        let settled = match self.run_execute_existing(ctx, reference, &mut report).await {
            Ok(settled) => settled,
            Err(err) => settle_error(err)?,
        };
        Ok(self.finish(report, settled))
    }

    /// Deletes a stack unless another stack imports one of its exports.
    ///
    /// # Errors
    ///
    /// Same as [`Orchestrator::deploy`].
    pub async fn destroy(&self, ctx: &CallContext, stack_name: &str) -> Result<DeployReport> {
        let mut report = DeployReport::new(stack_name, false);
        let settled = match self.run_destroy(ctx, stack_name, &mut report).await {
            Ok(settled) => settled,
            Err(err) => settle_error(err)?,
        };
        Ok(self.finish(report, settled))
    }

    fn transition(&self, stack: &str, state: DeployState) {
        info!("{stack}: {state}");
        self.reporter.on_state(stack, state);
    }

    fn finish(&self, mut report: DeployReport, (state, error): Settled) -> DeployReport {
        if let Some(message) = &error {
            warn!("{}: {state}: {message}", report.stack_name);
        }
        self.transition(&report.stack_name, DeployState::Done(state));
        report.state = state;
        report.error = error;
        report
    }

    async fn run_deploy(
        &self,
        ctx: &CallContext,
        deployment: &mut Deployment,
        report: &mut DeployReport,
    ) -> Result<Settled> {
        let stack = deployment.stack_name.clone();
        self.transition(&stack, DeployState::Init);
        if !deployment.template.is_some() {
            return Err(ConfigError::MissingTemplate { stack }.into());
        }

        if !self.settings.prechecks.is_empty() {
            self.transition(&stack, DeployState::Prechecks);
            report.prechecks = run_prechecks(
                ctx,
                &self.settings.prechecks,
                deployment.template_path.as_deref(),
            )
            .await?;
            deployment.prechecks_failed = report.prechecks.iter().any(|r| !r.success);
            if deployment.prechecks_failed && self.settings.stop_on_precheck_failure {
                return Ok((
                    TerminalState::Refused,
                    Some(String::from("One or more prechecks failed")),
                ));
            }
        }

        self.transition(&stack, DeployState::Classify);
        let probe = self
            .classifier
            .probe(ctx, &stack, deployment.stack_id.as_deref())
            .await?;
        deployment.stack_id = probe.stack_id().map(str::to_string);
        deployment.stack = probe.stack.clone();
        match probe.readiness {
            Readiness::Busy => {
                return Ok((
                    TerminalState::Refused,
                    Some(format!("Stack {stack} is busy ({})", probe.status)),
                ));
            }
            Readiness::Failed => {
                return Ok((
                    TerminalState::Refused,
                    Some(format!(
                        "Stack {stack} is in state {} and cannot be updated",
                        probe.status
                    )),
                ));
            }
            Readiness::New => deployment.is_new = true,
            Readiness::Ready => deployment.is_new = false,
        }
        let creates_placeholder = !probe.exists;

        self.transition(
            &stack,
            if deployment.is_new {
                DeployState::BuildCreateChangeSet
            } else {
                DeployState::BuildUpdateChangeSet
            },
        );
        let request = build_request(deployment)?;
        let started = Utc::now();
        let created = self.changesets.create(ctx, &request).await?;
        deployment.stack_id = Some(created.stack_id.clone());
        report.console_url = self
            .settings
            .region
            .as_deref()
            .map(|region| console_url(region, &created.stack_id, &created.id));
        let reference = ChangeSetRef::by_id(&created.id);

        self.transition(&stack, DeployState::PollChangeSet);
        let changeset = match self.changesets.wait(ctx, &reference).await? {
            PollOutcome::Ready(changeset) => changeset,
            PollOutcome::Empty(changeset) => {
                deployment.changeset = Some(changeset);
                self.transition(&stack, DeployState::Cleanup);
                self.changesets.delete(ctx, &reference).await;
                if creates_placeholder {
                    self.remove_placeholder(ctx, &created.stack_id).await;
                }
                return Ok((TerminalState::NoChanges, None));
            }
            PollOutcome::Failed(changeset) => {
                let reason = changeset
                    .status_reason
                    .clone()
                    .unwrap_or_else(|| changeset.status.clone());
                let message = format!("Change set {} failed: {reason}", changeset.name);
                deployment.changeset = Some(changeset);
                return Ok((TerminalState::Failed, Some(message)));
            }
            PollOutcome::DeletedExternally(changeset) => {
                let message = format!(
                    "Change set {} was deleted before it could be executed",
                    changeset.name
                );
                deployment.changeset = Some(changeset);
                return Ok((TerminalState::Failed, Some(message)));
            }
        };
        self.reporter.on_changeset(&changeset);

        if deployment.dry_run {
            deployment.changeset = Some(changeset);
            self.transition(&stack, DeployState::Cleanup);
            self.changesets.delete(ctx, &reference).await;
            if creates_placeholder {
                self.remove_placeholder(ctx, &created.stack_id).await;
            }
            return Ok((TerminalState::Success, None));
        }

        self.transition(&stack, DeployState::AwaitApproval);
        if !self.approver.approve(&changeset).await {
            if self.approver.discard_rejected(&changeset).await {
                self.transition(&stack, DeployState::Cleanup);
                self.changesets.delete(ctx, &reference).await;
                if creates_placeholder {
                    self.remove_placeholder(ctx, &created.stack_id).await;
                }
            }
            deployment.changeset = Some(changeset);
            return Ok((
                TerminalState::Refused,
                Some(String::from("Change set was not approved")),
            ));
        }

        let watermark = changeset.creation_time.unwrap_or(started);
        let changeset_name = changeset.name.clone();
        deployment.changeset = Some(changeset);

        self.transition(&stack, DeployState::Execute);
        self.execute(ctx, &stack, &reference, &changeset_name).await?;
        self.follow(
            ctx,
            &stack,
            &created.stack_id,
            watermark,
            Some(&changeset_name),
            report,
        )
        .await
    }

    async fn run_execute_existing(
        &self,
        ctx: &CallContext,
        reference: &ChangeSetRef,
        report: &mut DeployReport,
    ) -> Result<Settled> {
        let changeset = self.changesets.describe(ctx, reference).await?;
        let stack = changeset.stack_name.clone();
        report.stack_name.clone_from(&stack);
        report.console_url = self
            .settings
            .region
            .as_deref()
            .map(|region| console_url(region, &changeset.stack_id, &changeset.id));
        report.changeset = Some(changeset.clone());

        if changeset.status != EXECUTABLE_STATUS
            || changeset
                .execution_status
                .as_deref()
                .is_some_and(|s| s != "AVAILABLE")
        {
            return Ok((
                TerminalState::Refused,
                Some(format!(
                    "Change set {} is {} and cannot be executed",
                    changeset.name,
                    changeset.execution_status.as_deref().unwrap_or(&changeset.status)
                )),
            ));
        }
        self.reporter.on_changeset(&changeset);

        self.transition(&stack, DeployState::AwaitApproval);
        if !self.approver.approve(&changeset).await {
            if self.approver.discard_rejected(&changeset).await {
                self.transition(&stack, DeployState::Cleanup);
                self.changesets.delete(ctx, &changeset.reference()).await;
            }
            return Ok((
                TerminalState::Refused,
                Some(String::from("Change set was not approved")),
            ));
        }

        self.transition(&stack, DeployState::Execute);
        let watermark = Utc::now();
        self.execute(ctx, &stack, &changeset.reference(), &changeset.name).await?;
        self.follow(
            ctx,
            &stack,
            &changeset.stack_id,
            watermark,
            Some(&changeset.name),
            report,
        )
        .await
    }

    async fn run_destroy(
        &self,
        ctx: &CallContext,
        stack: &str,
        report: &mut DeployReport,
    ) -> Result<Settled> {
        self.transition(stack, DeployState::Init);
        self.transition(stack, DeployState::Classify);
        let probe = self.classifier.probe(ctx, stack, None).await?;
        if !probe.exists {
            info!("Stack {stack} does not exist");
            return Ok((TerminalState::NoChanges, None));
        }
        if probe.readiness == Readiness::Busy {
            return Ok((
                TerminalState::Refused,
                Some(format!("Stack {stack} is busy ({})", probe.status)),
            ));
        }
        let stack_id = probe.stack_id().unwrap_or(stack).to_string();
        report.stack = probe.stack;

        report.exports = self.exports.resolve(ctx, Some(stack), None).await?;
        let blast_radius: Vec<String> = report
            .exports
            .iter()
            .filter_map(|export| {
                if export.imported {
                    Some(format!(
                        "{} is imported by {}",
                        export.name,
                        export.importers.join(", ")
                    ))
                } else {
                    export.import_error.as_ref().map(|err| {
                        format!("importers of {} could not be listed: {err}", export.name)
                    })
                }
            })
            .collect();
        if !blast_radius.is_empty() {
            return Ok((
                TerminalState::Refused,
                Some(format!(
                    "Stack {stack} cannot be deleted: {}",
                    blast_radius.join("; ")
                )),
            ));
        }

        self.transition(stack, DeployState::AwaitApproval);
        if !self.approver.approve_deletion(stack, &report.exports).await {
            return Ok((
                TerminalState::Refused,
                Some(String::from("Deletion was not approved")),
            ));
        }

        self.transition(stack, DeployState::Execute);
        let watermark = Utc::now();
        self.cloud.delete_stack(ctx, &stack_id).await?;
        self.follow(ctx, stack, &stack_id, watermark, None, report)
            .await
    }

    /// Sends the execution request. A cancellation while it is in flight
    /// surfaces as [`DeployError::CancelledAfterExecute`].
    async fn execute(
        &self,
        ctx: &CallContext,
        stack: &str,
        reference: &ChangeSetRef,
        changeset: &str,
    ) -> Result<()> {
        ctx.check(op::EXECUTE_CHANGE_SET)?;
        match self.changesets.execute(ctx, reference).await {
            Err(err) if err.is_cancellation() => {
                warn!("Cancelled while executing {changeset} on {stack}; it may still run");
                Err(DeployError::CancelledAfterExecute {
                    stack: stack.to_string(),
                    changeset: changeset.to_string(),
                }
                .into())
            }
            other => other,
        }
    }

    /// Tails events after a change-set execution or stack deletion.
    async fn follow(
        &self,
        ctx: &CallContext,
        stack: &str,
        stack_id: &str,
        watermark: DateTime<Utc>,
        changeset: Option<&str>,
        report: &mut DeployReport,
    ) -> Result<Settled> {
        self.transition(stack, DeployState::TailEvents);
        let outcome = match self
            .tailer
            .tail(ctx, stack_id, watermark, |event| self.reporter.on_event(event))
            .await
        {
            Ok(outcome) => outcome,
            Err(err) if err.is_cancellation() => {
                warn!("Stopped following {stack}; the stack operation continues remotely");
                return Err(match changeset {
                    Some(changeset) => DeployError::CancelledAfterExecute {
                        stack: stack.to_string(),
                        changeset: changeset.to_string(),
                    }
                    .into(),
                    None => err,
                });
            }
            Err(err) => return Err(err),
        };

        let newest_first: Vec<_> = outcome.events.iter().rev().cloned().collect();
        report.timeline = correlate(&newest_first, watermark);
        report.durations = durations(&report.timeline);
        if outcome.stack.is_some() {
            report.stack.clone_from(&outcome.stack);
        }

        if outcome.succeeded() {
            return Ok((TerminalState::Success, None));
        }
        let reason = outcome
            .stack
            .as_ref()
            .and_then(|s| s.status_reason.as_deref())
            .map(|r| format!(": {r}"))
            .unwrap_or_default();
        Ok((
            TerminalState::Failed,
            Some(format!("Stack {stack} ended in {}{reason}", outcome.status)),
        ))
    }

    async fn remove_placeholder(&self, ctx: &CallContext, stack_id: &str) {
        match self.cloud.delete_stack(ctx, stack_id).await {
            Ok(()) => info!("Deleted placeholder stack {stack_id}"),
            Err(err) => warn!("Could not delete placeholder stack {stack_id}: {err}"),
        }
    }
}

/// Turns an error into a terminal state, or passes it through.
///
/// Configuration errors and cancellation are returned to the caller; a
/// conflicting operation is a refusal; anything else is a failure.
fn settle_error(err: CirrusError) -> Result<Settled> {
    if err.is_cancellation()
        || matches!(
            err,
            CirrusError::Config(_) | CirrusError::Deploy(DeployError::CancelledAfterExecute { .. })
        )
    {
        return Err(err);
    }
    let state = if err.cloud_kind() == Some(CloudErrorKind::Conflict) {
        TerminalState::Refused
    } else {
        TerminalState::Failed
    };
    Ok((state, Some(err.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{
        ChangeAction, ChangeSetPage, CloudFormationApi, CreateChangeSetRequest, CreatedChangeSet,
        DescribeChangeSetRequest, DescribeEventsRequest, DescribeStacksRequest, GuardedCloud,
        ListImportsRequest, MemoryCloudFormation, Page, Replacement, ResourceChange, RetryPolicy,
        StackEvent, StackOutput, StackResource,
    };
    use crate::error::CloudResult;
    use async_trait::async_trait;
    use crate::deploy::approval::MockApprover;
    use crate::deploy::TemplateSource;
    use crate::error::CloudError;
    use chrono::TimeDelta;
    use std::sync::Mutex;

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings {
            poll: PollSettings {
                initial: Duration::from_secs(1),
                max: Duration::from_secs(4),
                timeout: Duration::from_secs(120),
            },
            tail_interval: Duration::from_secs(5),
            region: Some(String::from("us-east-1")),
            ..OrchestratorSettings::default()
        }
    }

    fn deployment(stack: &str) -> Deployment {
        Deployment::new(stack, "cs-1")
            .with_template(TemplateSource::Body(String::from("Resources: {}")))
    }

    fn page(status: &str, reason: Option<&str>, changes: usize) -> ChangeSetPage {
        ChangeSetPage {
            id: String::new(),
            name: String::from("cs-1"),
            stack_id: String::new(),
            stack_name: String::from("web"),
            creation_time: None,
            status: status.to_string(),
            status_reason: reason.map(str::to_string),
            execution_status: Some(String::from("AVAILABLE")),
            changes: (0..changes)
                .map(|i| ResourceChange {
                    action: ChangeAction::Add,
                    logical_id: format!("Queue{i}"),
                    replacement: Some(Replacement::False),
                    resource_type: String::from("AWS::SQS::Queue"),
                    physical_id: None,
                    module_path: String::new(),
                    details: Vec::new(),
                })
                .collect(),
            next_token: None,
        }
    }

    fn event(id: &str, logical_id: &str, resource_type: &str, status: &str, secs: i64) -> StackEvent {
        StackEvent {
            event_id: id.to_string(),
            stack_name: String::from("web"),
            logical_id: logical_id.to_string(),
            resource_type: resource_type.to_string(),
            status: status.to_string(),
            status_reason: None,
            timestamp: Utc::now() + TimeDelta::seconds(secs),
        }
    }

    #[derive(Default)]
    struct Recorder {
        states: Mutex<Vec<DeployState>>,
        events: Mutex<Vec<String>>,
    }

    impl DeployReporter for Recorder {
        fn on_state(&self, _stack: &str, state: DeployState) {
            if let Ok(mut states) = self.states.lock() {
                states.push(state);
            }
        }

        fn on_event(&self, event: &StackEvent) {
            if let Ok(mut events) = self.events.lock() {
                events.push(event.event_id.clone());
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_stack_deploys() {
        let cloud = Arc::new(MemoryCloudFormation::new());
        cloud.script_change_set(vec![page("CREATE_PENDING", None, 0), page("CREATE_COMPLETE", None, 2)], Vec::new());
        cloud.script_execution(
            &["CREATE_IN_PROGRESS", "CREATE_COMPLETE"],
            vec![
                event("1", "web", "AWS::CloudFormation::Stack", "CREATE_IN_PROGRESS", 1),
                event("2", "Queue0", "AWS::SQS::Queue", "CREATE_IN_PROGRESS", 2),
                event("3", "Queue0", "AWS::SQS::Queue", "CREATE_COMPLETE", 4),
                event("4", "web", "AWS::CloudFormation::Stack", "CREATE_COMPLETE", 6),
            ],
        );
        let recorder = Arc::new(Recorder::default());
        let orchestrator = Orchestrator::new(cloud.clone(), settings()).with_reporter(recorder.clone());

        let report = orchestrator
            .deploy(&CallContext::new(), deployment("web"))
            .await
            .unwrap();

        assert_eq!(report.state, TerminalState::Success, "{:?}", report.error);
        assert_eq!(report.changeset.as_ref().map(|c| c.changes().len()), Some(2));
        assert_eq!(report.stack.as_ref().map(|s| s.status.as_str()), Some("CREATE_COMPLETE"));
        assert!(report.console_url.as_deref().is_some_and(|u| u.contains("region=us-east-1")));
        assert_eq!(report.durations.len(), 2);
        assert_eq!(report.timeline.len(), 2);

        let created = cloud.created_change_sets();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].change_set_type.as_str(), "CREATE");
        assert_eq!(cloud.call_count(op::EXECUTE_CHANGE_SET), 1);

        let states = recorder.states.lock().unwrap().clone();
        assert_eq!(states.first(), Some(&DeployState::Init));
        assert!(states.contains(&DeployState::BuildCreateChangeSet));
        assert!(states.contains(&DeployState::TailEvents));
        assert_eq!(states.last(), Some(&DeployState::Done(TerminalState::Success)));
        assert_eq!(recorder.events.lock().unwrap().clone(), vec!["1", "2", "3", "4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_that_rolls_back_fails() {
        let cloud = Arc::new(MemoryCloudFormation::new());
        cloud.add_stack("web", "UPDATE_COMPLETE");
        cloud.script_change_set(vec![page("CREATE_COMPLETE", None, 1)], Vec::new());
        cloud.script_execution(
            &["UPDATE_IN_PROGRESS", "UPDATE_ROLLBACK_IN_PROGRESS", "UPDATE_ROLLBACK_COMPLETE"],
            Vec::new(),
        );
        let orchestrator = Orchestrator::new(cloud.clone(), settings());

        let report = orchestrator
            .deploy(&CallContext::new(), deployment("web"))
            .await
            .unwrap();
        assert_eq!(report.state, TerminalState::Failed);
        assert!(report.error.unwrap().contains("UPDATE_ROLLBACK_COMPLETE"));
        assert_eq!(cloud.created_change_sets()[0].change_set_type.as_str(), "UPDATE");
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_stack_waits_out_review() {
        let cloud = Arc::new(MemoryCloudFormation::new());
        cloud.script_change_set(vec![page("CREATE_COMPLETE", None, 1)], Vec::new());
        cloud.script_execution(
            &["REVIEW_IN_PROGRESS", "CREATE_IN_PROGRESS", "CREATE_COMPLETE"],
            vec![
                event("1", "web", "AWS::CloudFormation::Stack", "CREATE_IN_PROGRESS", 1),
                event("2", "web", "AWS::CloudFormation::Stack", "CREATE_COMPLETE", 8),
            ],
        );
        let orchestrator = Orchestrator::new(cloud.clone(), settings());

        let report = orchestrator
            .deploy(&CallContext::new(), deployment("web"))
            .await
            .unwrap();
        assert_eq!(report.state, TerminalState::Success, "{:?}", report.error);
        assert_eq!(report.stack.unwrap().status, "CREATE_COMPLETE");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_status_is_not_the_outcome() {
        let cloud = Arc::new(MemoryCloudFormation::new());
        cloud.add_stack("web", "UPDATE_COMPLETE");
        cloud.script_change_set(vec![page("CREATE_COMPLETE", None, 1)], Vec::new());
        cloud.script_execution(
            &["UPDATE_COMPLETE", "UPDATE_IN_PROGRESS", "UPDATE_ROLLBACK_COMPLETE"],
            Vec::new(),
        );
        let orchestrator = Orchestrator::new(cloud.clone(), settings());

        let report = orchestrator
            .deploy(&CallContext::new(), deployment("web"))
            .await
            .unwrap();
        assert_eq!(report.state, TerminalState::Failed);
        assert!(report.error.unwrap().contains("UPDATE_ROLLBACK_COMPLETE"));
    }

    #[tokio::test]
    async fn test_busy_stack_is_refused() {
        let cloud = Arc::new(MemoryCloudFormation::new());
        cloud.add_stack("web", "UPDATE_IN_PROGRESS");
        let orchestrator = Orchestrator::new(cloud.clone(), settings());

        let report = orchestrator
            .deploy(&CallContext::new(), deployment("web"))
            .await
            .unwrap();
        assert_eq!(report.state, TerminalState::Refused);
        assert_eq!(cloud.call_count(op::CREATE_CHANGE_SET), 0);
    }

    #[tokio::test]
    async fn test_failed_stack_is_refused() {
        let cloud = Arc::new(MemoryCloudFormation::new());
        cloud.add_stack("web", "UPDATE_ROLLBACK_FAILED");
        let orchestrator = Orchestrator::new(cloud.clone(), settings());

        let report = orchestrator
            .deploy(&CallContext::new(), deployment("web"))
            .await
            .unwrap();
        assert_eq!(report.state, TerminalState::Refused);
        assert!(report.error.unwrap().contains("UPDATE_ROLLBACK_FAILED"));
    }

    #[tokio::test]
    async fn test_missing_template_makes_no_calls() {
        let cloud = Arc::new(MemoryCloudFormation::new());
        let orchestrator = Orchestrator::new(cloud.clone(), settings());

        let err = orchestrator
            .deploy(&CallContext::new(), Deployment::new("web", "cs-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, CirrusError::Config(ConfigError::MissingTemplate { .. })));
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_previous_template_needs_existing_stack() {
        let cloud = Arc::new(MemoryCloudFormation::new());
        let orchestrator = Orchestrator::new(cloud.clone(), settings());

        let d = Deployment::new("web", "cs-1").with_template(TemplateSource::UsePrevious);
        let err = orchestrator.deploy(&CallContext::new(), d).await.unwrap_err();
        assert!(matches!(err, CirrusError::Config(ConfigError::NoPreviousTemplate { .. })));
        assert_eq!(cloud.call_count(op::CREATE_CHANGE_SET), 0);
    }

    #[tokio::test]
    async fn test_empty_changeset_on_new_stack_cleans_up() {
        let cloud = Arc::new(MemoryCloudFormation::new());
        cloud.script_change_set(
            vec![page("FAILED", Some("No updates are to be performed."), 0)],
            Vec::new(),
        );
        let orchestrator = Orchestrator::new(cloud.clone(), settings());

        let report = orchestrator
            .deploy(&CallContext::new(), deployment("web"))
            .await
            .unwrap();
        assert_eq!(report.state, TerminalState::NoChanges);
        assert_eq!(cloud.call_count(op::DELETE_CHANGE_SET), 1);
        assert_eq!(cloud.call_count(op::DELETE_STACK), 1);
        assert!(cloud.stack("web").is_some_and(|s| s.status == "DELETE_COMPLETE"));
    }

    #[tokio::test]
    async fn test_empty_changeset_keeps_existing_stack() {
        let cloud = Arc::new(MemoryCloudFormation::new());
        cloud.add_stack("web", "CREATE_COMPLETE");
        cloud.script_change_set(
            vec![page("FAILED", Some("The submitted information didn't contain changes."), 0)],
            Vec::new(),
        );
        let orchestrator = Orchestrator::new(cloud.clone(), settings());

        let report = orchestrator
            .deploy(&CallContext::new(), deployment("web"))
            .await
            .unwrap();
        assert_eq!(report.state, TerminalState::NoChanges);
        assert_eq!(cloud.call_count(op::DELETE_STACK), 0);
    }

    #[tokio::test]
    async fn test_dry_run_previews_and_deletes() {
        let cloud = Arc::new(MemoryCloudFormation::new());
        cloud.add_stack("web", "CREATE_COMPLETE");
        cloud.script_change_set(vec![page("CREATE_COMPLETE", None, 3)], Vec::new());
        let orchestrator = Orchestrator::new(cloud.clone(), settings());

        let report = orchestrator
            .deploy(&CallContext::new(), deployment("web").with_dry_run(true))
            .await
            .unwrap();
        assert_eq!(report.state, TerminalState::Success);
        assert!(report.dry_run);
        assert_eq!(report.changeset.map(|c| c.changes().len()), Some(3));
        assert_eq!(cloud.call_count(op::EXECUTE_CHANGE_SET), 0);
        assert_eq!(cloud.call_count(op::DELETE_CHANGE_SET), 1);
        assert_eq!(cloud.call_count(op::DELETE_STACK), 0);
    }

    #[tokio::test]
    async fn test_failed_changeset_is_kept() {
        let cloud = Arc::new(MemoryCloudFormation::new());
        cloud.add_stack("web", "CREATE_COMPLETE");
        cloud.script_change_set(
            vec![page("FAILED", Some("Template format error: unresolved resource"), 0)],
            Vec::new(),
        );
        let orchestrator = Orchestrator::new(cloud.clone(), settings());

        let report = orchestrator
            .deploy(&CallContext::new(), deployment("web"))
            .await
            .unwrap();
        assert_eq!(report.state, TerminalState::Failed);
        assert!(report.error.unwrap().contains("Template format error"));
        assert_eq!(cloud.call_count(op::DELETE_CHANGE_SET), 0);
    }

    #[tokio::test]
    async fn test_validation_error_is_preserved() {
        let cloud = Arc::new(MemoryCloudFormation::new());
        cloud.add_stack("web", "CREATE_COMPLETE");
        cloud.fail_next(
            op::CREATE_CHANGE_SET,
            CloudError::new(
                CloudErrorKind::Validation,
                op::CREATE_CHANGE_SET,
                "Requires capabilities : [CAPABILITY_IAM]",
            ),
        );
        let orchestrator = Orchestrator::new(cloud.clone(), settings());

        let report = orchestrator
            .deploy(&CallContext::new(), deployment("web"))
            .await
            .unwrap();
        assert_eq!(report.state, TerminalState::Failed);
        assert!(report.error.unwrap().contains("Requires capabilities : [CAPABILITY_IAM]"));
    }

    #[tokio::test]
    async fn test_conflict_is_refused() {
        let cloud = Arc::new(MemoryCloudFormation::new());
        cloud.add_stack("web", "CREATE_COMPLETE");
        cloud.fail_next(
            op::CREATE_CHANGE_SET,
            CloudError::new(CloudErrorKind::Conflict, op::CREATE_CHANGE_SET, "in progress"),
        );
        let orchestrator = Orchestrator::new(cloud, settings());

        let report = orchestrator
            .deploy(&CallContext::new(), deployment("web"))
            .await
            .unwrap();
        assert_eq!(report.state, TerminalState::Refused);
    }

    #[tokio::test]
    async fn test_throttled_create_is_retried() {
        let memory = MemoryCloudFormation::new();
        memory.add_stack("web", "CREATE_COMPLETE");
        memory.script_change_set(vec![page("CREATE_COMPLETE", None, 1)], Vec::new());
        memory.fail_next(op::CREATE_CHANGE_SET, CloudError::throttled(op::CREATE_CHANGE_SET));
        let guarded = Arc::new(GuardedCloud::new(memory, RetryPolicy::new(Duration::ZERO)));
        let orchestrator = Orchestrator::new(guarded.clone(), settings());

        let report = orchestrator
            .deploy(&CallContext::new(), deployment("web").with_dry_run(true))
            .await
            .unwrap();
        assert_eq!(report.state, TerminalState::Success);
        assert_eq!(guarded.inner().call_count(op::CREATE_CHANGE_SET), 2);
    }

    #[tokio::test]
    async fn test_rejected_changeset() {
        let cloud = Arc::new(MemoryCloudFormation::new());
        cloud.add_stack("web", "CREATE_COMPLETE");
        cloud.script_change_set(vec![page("CREATE_COMPLETE", None, 1)], Vec::new());

        let mut approver = MockApprover::new();
        approver.expect_approve().times(1).returning(|_| false);
        approver.expect_discard_rejected().times(1).returning(|_| true);
        let orchestrator =
            Orchestrator::new(cloud.clone(), settings()).with_approver(Arc::new(approver));

        let report = orchestrator
            .deploy(&CallContext::new(), deployment("web"))
            .await
            .unwrap();
        assert_eq!(report.state, TerminalState::Refused);
        assert_eq!(cloud.call_count(op::EXECUTE_CHANGE_SET), 0);
        assert_eq!(cloud.call_count(op::DELETE_CHANGE_SET), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_execute_is_reported() {
        let cloud = Arc::new(MemoryCloudFormation::new());
        cloud.add_stack("web", "CREATE_COMPLETE");
        cloud.script_change_set(vec![page("CREATE_COMPLETE", None, 1)], Vec::new());
        cloud.script_execution(&["UPDATE_IN_PROGRESS"], Vec::new());
        let orchestrator = Orchestrator::new(cloud.clone(), settings());

        let ctx = CallContext::new().with_timeout(Duration::from_secs(60));
        let err = orchestrator
            .deploy(&ctx, deployment("web"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CirrusError::Deploy(DeployError::CancelledAfterExecute { .. })
        ));
        assert_eq!(cloud.call_count(op::EXECUTE_CHANGE_SET), 1);
    }

    /// Memory port whose execution call lingers after the provider took it.
    struct SlowExecution(MemoryCloudFormation);

    #[async_trait]
    impl CloudFormationApi for SlowExecution {
        async fn describe_stacks(
            &self,
            ctx: &CallContext,
            request: &DescribeStacksRequest,
        ) -> CloudResult<Page<StackSnapshot>> {
            self.0.describe_stacks(ctx, request).await
        }

        async fn describe_stack_resources(
            &self,
            ctx: &CallContext,
            stack_name: &str,
        ) -> CloudResult<Vec<StackResource>> {
            self.0.describe_stack_resources(ctx, stack_name).await
        }

        async fn describe_stack_events(
            &self,
            ctx: &CallContext,
            request: &DescribeEventsRequest,
        ) -> CloudResult<Page<StackEvent>> {
            self.0.describe_stack_events(ctx, request).await
        }

        async fn create_change_set(
            &self,
            ctx: &CallContext,
            request: &CreateChangeSetRequest,
        ) -> CloudResult<CreatedChangeSet> {
            self.0.create_change_set(ctx, request).await
        }

        async fn describe_change_set(
            &self,
            ctx: &CallContext,
            request: &DescribeChangeSetRequest,
        ) -> CloudResult<ChangeSetPage> {
            self.0.describe_change_set(ctx, request).await
        }

        async fn execute_change_set(
            &self,
            ctx: &CallContext,
            change_set: &ChangeSetRef,
        ) -> CloudResult<()> {
            self.0.execute_change_set(ctx, change_set).await?;
            tokio::time::sleep(Duration::from_secs(300)).await;
            Ok(())
        }

        async fn delete_change_set(
            &self,
            ctx: &CallContext,
            change_set: &ChangeSetRef,
        ) -> CloudResult<()> {
            self.0.delete_change_set(ctx, change_set).await
        }

        async fn delete_stack(&self, ctx: &CallContext, stack_name: &str) -> CloudResult<()> {
            self.0.delete_stack(ctx, stack_name).await
        }

        async fn list_imports(
            &self,
            ctx: &CallContext,
            request: &ListImportsRequest,
        ) -> CloudResult<Page<String>> {
            self.0.list_imports(ctx, request).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_execute_call_is_reported() {
        let memory = MemoryCloudFormation::new();
        memory.add_stack("web", "CREATE_COMPLETE");
        memory.script_change_set(vec![page("CREATE_COMPLETE", None, 1)], Vec::new());
        let guarded = Arc::new(GuardedCloud::new(
            SlowExecution(memory),
            RetryPolicy::new(Duration::ZERO),
        ));
        let orchestrator = Orchestrator::new(guarded.clone(), settings());

        let ctx = CallContext::new().with_timeout(Duration::from_secs(20));
        let err = orchestrator
            .deploy(&ctx, deployment("web"))
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            CirrusError::Deploy(DeployError::CancelledAfterExecute { stack, changeset })
                if stack == "web" && changeset == "cs-1"
        ));
        assert!(err.to_string().contains("may have been executed"));
        assert_eq!(guarded.inner().0.call_count(op::EXECUTE_CHANGE_SET), 1);
        assert_eq!(guarded.inner().0.call_count(op::DESCRIBE_STACK_EVENTS), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_execute_is_plain() {
        let cloud = Arc::new(MemoryCloudFormation::new());
        cloud.add_stack("web", "CREATE_COMPLETE");
        cloud.script_change_set(vec![page("CREATE_COMPLETE", None, 1)], Vec::new());
        let ctx = CallContext::new();
        let mut approver = MockApprover::new();
        let cancel = ctx.clone();
        approver.expect_approve().returning(move |_| {
            cancel.cancel();
            true
        });
        let orchestrator =
            Orchestrator::new(cloud.clone(), settings()).with_approver(Arc::new(approver));

        let err = orchestrator
            .deploy(&ctx, deployment("web"))
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(cloud.call_count(op::EXECUTE_CHANGE_SET), 0);
    }

    #[tokio::test]
    async fn test_execute_existing_refuses_unavailable() {
        let cloud = Arc::new(MemoryCloudFormation::new());
        cloud.add_stack("web", "CREATE_COMPLETE");
        cloud.script_change_set(vec![page("FAILED", Some("boom"), 0)], Vec::new());
        let orchestrator = Orchestrator::new(cloud.clone(), settings());
        let created = orchestrator
            .changesets()
            .create(
                &CallContext::new(),
                &build_request(&deployment("web")).unwrap(),
            )
            .await
            .unwrap();

        let report = orchestrator
            .execute_existing(&CallContext::new(), &ChangeSetRef::by_id(&created.id))
            .await
            .unwrap();
        assert_eq!(report.state, TerminalState::Refused);
        assert_eq!(report.stack_name, "web");
        assert_eq!(cloud.call_count(op::EXECUTE_CHANGE_SET), 0);
    }

    fn exporting_stack(cloud: &MemoryCloudFormation) {
        let mut stack = StackSnapshot::new(
            &MemoryCloudFormation::stack_arn("network"),
            "network",
            "CREATE_COMPLETE",
        );
        stack.outputs.push(StackOutput {
            key: String::from("VpcId"),
            value: String::from("vpc-1"),
            description: None,
            export_name: Some(String::from("network-vpc")),
        });
        cloud.put_stack(stack);
    }

    #[tokio::test]
    async fn test_destroy_refuses_imported_exports() {
        let cloud = Arc::new(MemoryCloudFormation::new());
        exporting_stack(&cloud);
        cloud.put_imports("network-vpc", &["web"]);
        let orchestrator = Orchestrator::new(cloud.clone(), settings());

        let report = orchestrator
            .destroy(&CallContext::new(), "network")
            .await
            .unwrap();
        assert_eq!(report.state, TerminalState::Refused);
        assert!(report.error.unwrap().contains("network-vpc is imported by web"));
        assert_eq!(report.exports.len(), 1);
        assert_eq!(cloud.call_count(op::DELETE_STACK), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_unused_stack() {
        let cloud = Arc::new(MemoryCloudFormation::new());
        exporting_stack(&cloud);
        cloud.script_execution(&["DELETE_IN_PROGRESS", "DELETE_COMPLETE"], Vec::new());
        let orchestrator = Orchestrator::new(cloud.clone(), settings());

        let report = orchestrator
            .destroy(&CallContext::new(), "network")
            .await
            .unwrap();
        assert_eq!(report.state, TerminalState::Success, "{:?}", report.error);
        assert_eq!(cloud.call_count(op::DELETE_STACK), 1);
    }

    #[tokio::test]
    async fn test_destroy_missing_stack() {
        let cloud = Arc::new(MemoryCloudFormation::new());
        let orchestrator = Orchestrator::new(cloud.clone(), settings());

        let report = orchestrator
            .destroy(&CallContext::new(), "ghost")
            .await
            .unwrap();
        assert_eq!(report.state, TerminalState::NoChanges);
        assert_eq!(cloud.call_count(op::DELETE_STACK), 0);
    }
}
