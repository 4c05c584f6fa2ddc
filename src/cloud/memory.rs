//! In-memory implementation of the CloudFormation port.
//!
//! The fake keeps stacks, events, scripted change-set responses and
//! imports in memory, records every call, and can be told to fail the
//! next call of a given operation. It mirrors the provider's observable
//! behaviour closely enough to drive the deployment engine end to end.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{CloudError, CloudErrorKind, CloudResult};

use super::context::CallContext;
use super::port::{CloudFormationApi, op};
use super::types::{
    ChangeSetPage, ChangeSetRef, ChangeSetType, CreateChangeSetRequest, CreatedChangeSet,
    DescribeChangeSetRequest, DescribeEventsRequest, DescribeStacksRequest, ListImportsRequest,
    Page, StackEvent, StackResource, StackSnapshot,
};

/// Account id used in fabricated ARNs.
const ACCOUNT: &str = "123456789012";

/// Region used in fabricated ARNs.
const REGION: &str = "us-east-1";

/// Scripted responses for one change-set.
#[derive(Debug, Clone, Default)]
struct ChangeSetScript {
    /// First pages returned by successive polls; the last one repeats.
    polls: VecDeque<ChangeSetPage>,
    /// Continuation pages by token.
    continuations: HashMap<String, ChangeSetPage>,
}

/// Mutable state of the fake.
#[derive(Debug, Default)]
struct MemoryState {
    stacks: Vec<StackSnapshot>,
    resources: HashMap<String, Vec<StackResource>>,
    events: HashMap<String, Vec<StackEvent>>,
    events_page_size: usize,
    stacks_page_size: usize,
    pending_script: Option<ChangeSetScript>,
    change_sets: HashMap<String, ChangeSetScript>,
    change_set_ids: HashMap<String, String>,
    change_set_stacks: HashMap<String, String>,
    execution_statuses: VecDeque<String>,
    execution_events: Vec<StackEvent>,
    executing: Option<String>,
    imports: HashMap<String, Vec<String>>,
    failures: HashMap<String, VecDeque<CloudError>>,
    calls: Vec<String>,
    created: Vec<CreateChangeSetRequest>,
    counter: u64,
}

/// In-memory CloudFormation.
#[derive(Debug)]
pub struct MemoryCloudFormation {
    /// Shared state.
    state: Mutex<MemoryState>,
}

impl Default for MemoryCloudFormation {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCloudFormation {
    /// Creates an empty fake.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                events_page_size: 100,
                stacks_page_size: 100,
                ..MemoryState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A poisoned lock only means another test thread panicked; the data is still usable.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Fabricates a stack ARN for a name.
    #[must_use]
    pub fn stack_arn(name: &str) -> String {
        format!("arn:aws:cloudformation:{REGION}:{ACCOUNT}:stack/{name}/00000000-0000-0000-0000-000000000000")
    }

    /// Adds or replaces a stack.
    pub fn put_stack(&self, stack: StackSnapshot) {
        let mut state = self.lock();
        state.stacks.retain(|s| s.stack_name != stack.stack_name);
        state.stacks.push(stack);
    }

    /// Adds a stack with the given status and a fabricated ARN.
    pub fn add_stack(&self, name: &str, status: &str) {
        self.put_stack(StackSnapshot::new(&Self::stack_arn(name), name, status));
    }

    /// Sets the resources of a stack.
    pub fn put_resources(&self, stack: &str, resources: Vec<StackResource>) {
        self.lock().resources.insert(stack.to_string(), resources);
    }

    /// Adds events to a stack. Events are stored newest first.
    pub fn push_events(&self, stack: &str, events: Vec<StackEvent>) {
        let mut state = self.lock();
        let log = state.events.entry(stack.to_string()).or_default();
        log.extend(events);
        log.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    }

    /// Sets how many events one `DescribeStackEvents` page holds.
    pub fn set_events_page_size(&self, size: usize) {
        self.lock().events_page_size = size.max(1);
    }

    /// Sets how many stacks one `DescribeStacks` page holds.
    pub fn set_stacks_page_size(&self, size: usize) {
        self.lock().stacks_page_size = size.max(1);
    }

    /// Scripts the responses for the next created change-set.
    ///
    /// Each poll returns the next entry of `polls`; the last entry repeats.
    /// Pages carrying a `next_token` continue with the page registered
    /// under that token in `continuations`.
    pub fn script_change_set(
        &self,
        polls: Vec<ChangeSetPage>,
        continuations: Vec<(String, ChangeSetPage)>,
    ) {
        self.lock().pending_script = Some(ChangeSetScript {
            polls: polls.into(),
            continuations: continuations.into_iter().collect(),
        });
    }

    /// Scripts what happens when a change-set is executed: the stack walks
    /// through `statuses` (one per `DescribeStacks` call) and `events` are
    /// appended to its log.
    pub fn script_execution(&self, statuses: &[&str], events: Vec<StackEvent>) {
        let mut state = self.lock();
        state.execution_statuses = statuses.iter().map(|s| (*s).to_string()).collect();
        state.execution_events = events;
    }

    /// Registers the importers of an export.
    pub fn put_imports(&self, export: &str, importers: &[&str]) {
        self.lock().imports.insert(
            export.to_string(),
            importers.iter().map(|s| (*s).to_string()).collect(),
        );
    }

    /// Makes the next call of `operation` fail with `error`.
    pub fn fail_next(&self, operation: &str, error: CloudError) {
        self.lock()
            .failures
            .entry(operation.to_string())
            .or_default()
            .push_back(error);
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of calls made to `operation`.
    #[must_use]
    pub fn call_count(&self, operation: &str) -> usize {
        self.lock().calls.iter().filter(|c| *c == operation).count()
    }

    /// Every `CreateChangeSet` request received.
    #[must_use]
    pub fn created_change_sets(&self) -> Vec<CreateChangeSetRequest> {
        self.lock().created.clone()
    }

    /// Current copy of a stack, looked up by name.
    #[must_use]
    pub fn stack(&self, name: &str) -> Option<StackSnapshot> {
        self.lock()
            .stacks
            .iter()
            .find(|s| s.stack_name == name)
            .cloned()
    }

    /// Records a call and returns a scripted failure, if any.
    fn enter(&self, operation: &str) -> CloudResult<MutexGuard<'_, MemoryState>> {
        let mut state = self.lock();
        state.calls.push(operation.to_string());
        if let Some(err) = state
            .failures
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        Ok(state)
    }
}

impl MemoryState {
    fn resolve_change_set(&self, change_set: &str) -> Option<String> {
        if self.change_sets.contains_key(change_set) {
            return Some(change_set.to_string());
        }
        self.change_set_ids.get(change_set).cloned()
    }

    fn find_stack_mut(&mut self, name_or_id: &str) -> Option<&mut StackSnapshot> {
        self.stacks
            .iter_mut()
            .find(|s| s.stack_name == name_or_id || s.stack_id == name_or_id)
    }
}

fn parse_offset(token: Option<&String>) -> usize {
    token.and_then(|t| t.parse().ok()).unwrap_or(0)
}

#[async_trait]
impl CloudFormationApi for MemoryCloudFormation {
    async fn describe_stacks(
        &self,
        _ctx: &CallContext,
        request: &DescribeStacksRequest,
    ) -> CloudResult<Page<StackSnapshot>> {
        let mut state = self.enter(op::DESCRIBE_STACKS)?;

        if let Some(name) = &request.stack_name {
            let by_arn = name.starts_with("arn:");
            let Some(index) = state.stacks.iter().position(|s| {
                if by_arn {
                    s.stack_id == *name
                } else {
                    s.stack_name == *name && s.status != "DELETE_COMPLETE"
                }
            }) else {
                return Err(CloudError::new(
                    CloudErrorKind::NotFound,
                    op::DESCRIBE_STACKS,
                    format!("Stack with id {name} does not exist"),
                ));
            };
            if state.executing.as_deref() == Some(state.stacks[index].stack_name.as_str()) {
                if let Some(status) = state.execution_statuses.pop_front() {
                    state.stacks[index].status = status;
                }
            }
            return Ok(Page::last(vec![state.stacks[index].clone()]));
        }

        let offset = parse_offset(request.next_token.as_ref());
        let live: Vec<StackSnapshot> = state
            .stacks
            .iter()
            .filter(|s| s.status != "DELETE_COMPLETE")
            .cloned()
            .collect();
        let end = (offset + state.stacks_page_size).min(live.len());
        let items = live.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_token = (end < live.len()).then(|| end.to_string());
        Ok(Page { items, next_token })
    }

    async fn describe_stack_resources(
        &self,
        _ctx: &CallContext,
        stack_name: &str,
    ) -> CloudResult<Vec<StackResource>> {
        let state = self.enter(op::DESCRIBE_STACK_RESOURCES)?;
        if !state.stacks.iter().any(|s| s.stack_name == stack_name || s.stack_id == stack_name) {
            return Err(CloudError::not_found(
                op::DESCRIBE_STACK_RESOURCES,
                format!("Stack with id {stack_name} does not exist"),
            ));
        }
        Ok(state.resources.get(stack_name).cloned().unwrap_or_default())
    }

    async fn describe_stack_events(
        &self,
        _ctx: &CallContext,
        request: &DescribeEventsRequest,
    ) -> CloudResult<Page<StackEvent>> {
        let state = self.enter(op::DESCRIBE_STACK_EVENTS)?;
        let name = state
            .stacks
            .iter()
            .find(|s| s.stack_name == request.stack_name || s.stack_id == request.stack_name)
            .map(|s| s.stack_name.clone())
            .ok_or_else(|| {
                CloudError::not_found(
                    op::DESCRIBE_STACK_EVENTS,
                    format!("Stack [{}] does not exist", request.stack_name),
                )
            })?;

        let log = state.events.get(&name).cloned().unwrap_or_default();
        let offset = parse_offset(request.next_token.as_ref());
        let end = (offset + state.events_page_size).min(log.len());
        let items = log.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_token = (end < log.len()).then(|| end.to_string());
        Ok(Page { items, next_token })
    }

    async fn create_change_set(
        &self,
        _ctx: &CallContext,
        request: &CreateChangeSetRequest,
    ) -> CloudResult<CreatedChangeSet> {
        let mut state = self.enter(op::CREATE_CHANGE_SET)?;

        if state.change_sets.contains_key(&request.change_set_name) {
            return Err(CloudError::new(
                CloudErrorKind::AlreadyExists,
                op::CREATE_CHANGE_SET,
                format!("ChangeSet {} already exists", request.change_set_name),
            ));
        }

        let stack_id = match state.find_stack_mut(&request.stack_name) {
            Some(stack) if stack.status != "DELETE_COMPLETE" => stack.stack_id.clone(),
            _ if request.change_set_type == ChangeSetType::Create => {
                let mut stack = StackSnapshot::new(
                    &Self::stack_arn(&request.stack_name),
                    &request.stack_name,
                    "REVIEW_IN_PROGRESS",
                );
                stack.creation_time = Some(Utc::now());
                let id = stack.stack_id.clone();
                state.stacks.retain(|s| s.stack_name != request.stack_name);
                state.stacks.push(stack);
                id
            }
            _ => {
                return Err(CloudError::new(
                    CloudErrorKind::Validation,
                    op::CREATE_CHANGE_SET,
                    format!("Stack [{}] does not exist", request.stack_name),
                ));
            }
        };

        state.counter += 1;
        let id = format!(
            "arn:aws:cloudformation:{REGION}:{ACCOUNT}:changeSet/{}/{:08}",
            request.change_set_name, state.counter
        );

        let mut script = state.pending_script.take().unwrap_or_default();
        if script.polls.is_empty() {
            script.polls.push_back(ChangeSetPage {
                id: id.clone(),
                name: request.change_set_name.clone(),
                stack_id: stack_id.clone(),
                stack_name: request.stack_name.clone(),
                creation_time: Some(Utc::now()),
                status: String::from("CREATE_COMPLETE"),
                status_reason: None,
                execution_status: Some(String::from("AVAILABLE")),
                changes: Vec::new(),
                next_token: None,
            });
        }

        state
            .change_sets
            .insert(request.change_set_name.clone(), script);
        state
            .change_set_ids
            .insert(id.clone(), request.change_set_name.clone());
        state
            .change_set_stacks
            .insert(request.change_set_name.clone(), request.stack_name.clone());
        state.created.push(request.clone());

        Ok(CreatedChangeSet { id, stack_id })
    }

    async fn describe_change_set(
        &self,
        _ctx: &CallContext,
        request: &DescribeChangeSetRequest,
    ) -> CloudResult<ChangeSetPage> {
        let mut state = self.enter(op::DESCRIBE_CHANGE_SET)?;
        let not_found = || {
            CloudError::new(
                CloudErrorKind::NotFound,
                op::DESCRIBE_CHANGE_SET,
                format!("ChangeSet [{}] does not exist", request.change_set.change_set),
            )
        };

        let name = state
            .resolve_change_set(&request.change_set.change_set)
            .ok_or_else(not_found)?;
        let script = state.change_sets.get_mut(&name).ok_or_else(not_found)?;

        if let Some(token) = &request.next_token {
            return script.continuations.get(token).cloned().ok_or_else(|| {
                CloudError::new(
                    CloudErrorKind::Validation,
                    op::DESCRIBE_CHANGE_SET,
                    format!("invalid next token {token}"),
                )
            });
        }

        let page = if script.polls.len() > 1 {
            script.polls.pop_front()
        } else {
            script.polls.front().cloned()
        };
        page.ok_or_else(not_found)
    }

    async fn execute_change_set(
        &self,
        _ctx: &CallContext,
        change_set: &ChangeSetRef,
    ) -> CloudResult<()> {
        let mut state = self.enter(op::EXECUTE_CHANGE_SET)?;
        let name = state
            .resolve_change_set(&change_set.change_set)
            .ok_or_else(|| {
                CloudError::new(
                    CloudErrorKind::NotFound,
                    op::EXECUTE_CHANGE_SET,
                    format!("ChangeSet [{}] does not exist", change_set.change_set),
                )
            })?;

        state.change_sets.remove(&name);
        state.change_set_ids.retain(|_, v| *v != name);
        let stack_name = state.change_set_stacks.remove(&name).unwrap_or_default();
        state.executing = Some(stack_name.clone());

        let events = std::mem::take(&mut state.execution_events);
        state
            .events
            .entry(stack_name)
            .or_default()
            .extend(events);
        for log in state.events.values_mut() {
            log.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        }
        Ok(())
    }

    async fn delete_change_set(
        &self,
        _ctx: &CallContext,
        change_set: &ChangeSetRef,
    ) -> CloudResult<()> {
        let mut state = self.enter(op::DELETE_CHANGE_SET)?;
        let name = state
            .resolve_change_set(&change_set.change_set)
            .ok_or_else(|| {
                CloudError::not_found(
                    op::DELETE_CHANGE_SET,
                    format!("ChangeSet [{}] does not exist", change_set.change_set),
                )
            })?;
        state.change_sets.remove(&name);
        state.change_set_ids.retain(|_, v| *v != name);
        state.change_set_stacks.remove(&name);
        Ok(())
    }

    async fn delete_stack(&self, _ctx: &CallContext, stack_name: &str) -> CloudResult<()> {
        let mut state = self.enter(op::DELETE_STACK)?;
        let scripted = !state.execution_statuses.is_empty();
        let events = std::mem::take(&mut state.execution_events);
        if let Some(stack) = state.find_stack_mut(stack_name) {
            if !scripted {
                stack.status = String::from("DELETE_COMPLETE");
            }
            let name = stack.stack_name.clone();
            if scripted {
                state.executing = Some(name.clone());
            }
            let log = state.events.entry(name).or_default();
            log.extend(events);
            log.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        }
        Ok(())
    }

    async fn list_imports(
        &self,
        _ctx: &CallContext,
        request: &ListImportsRequest,
    ) -> CloudResult<Page<String>> {
        let state = self.enter(op::LIST_IMPORTS)?;
        match state.imports.get(&request.export_name) {
            Some(importers) if !importers.is_empty() => Ok(Page::last(importers.clone())),
            _ => Err(CloudError::not_found(
                op::LIST_IMPORTS,
                format!(
                    "Export '{}' is not imported by any stack.",
                    request.export_name
                ),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_stack_is_not_found() {
        let cloud = MemoryCloudFormation::new();
        let err = cloud
            .describe_stacks(
                &CallContext::new(),
                &DescribeStacksRequest {
                    stack_name: Some(String::from("nope")),
                    next_token: None,
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_fail_next_consumed_once() {
        let cloud = MemoryCloudFormation::new();
        cloud.add_stack("s", "CREATE_COMPLETE");
        cloud.fail_next(op::DELETE_STACK, CloudError::throttled(op::DELETE_STACK));

        let ctx = CallContext::new();
        assert!(cloud.delete_stack(&ctx, "s").await.is_err());
        assert!(cloud.delete_stack(&ctx, "s").await.is_ok());
        assert_eq!(cloud.call_count(op::DELETE_STACK), 2);
    }

    #[tokio::test]
    async fn test_stack_listing_pages() {
        let cloud = MemoryCloudFormation::new();
        cloud.set_stacks_page_size(2);
        for name in ["a", "b", "c"] {
            cloud.add_stack(name, "CREATE_COMPLETE");
        }
        let ctx = CallContext::new();
        let first = cloud
            .describe_stacks(&ctx, &DescribeStacksRequest::default())
            .await
            .unwrap();
        assert_eq!(first.items.len(), 2);
        let second = cloud
            .describe_stacks(
                &ctx,
                &DescribeStacksRequest {
                    stack_name: None,
                    next_token: first.next_token,
                },
            )
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(second.next_token.is_none());
    }
}
