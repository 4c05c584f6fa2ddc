//! AWS SDK implementation of the CloudFormation port.
//!
//! This module translates between `aws-sdk-cloudformation` shapes and the
//! port's value types, and maps provider errors onto [`CloudError`].

use async_trait::async_trait;
use aws_sdk_cloudformation::Client;
use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudformation::primitives::DateTime as SdkDateTime;
use aws_sdk_cloudformation::types as sdk;
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::error::{CloudError, CloudResult, classify_provider_error};

use super::context::CallContext;
use super::port::{CloudFormationApi, op};
use super::types::{
    Bindings, ChangeAction, ChangeDetail, ChangeSetPage, ChangeSetRef, ChangeSetTemplate,
    CreateChangeSetRequest, CreatedChangeSet, DescribeChangeSetRequest, DescribeEventsRequest,
    DescribeStacksRequest, DriftInfo, Evaluation, ListImportsRequest, Page, Replacement,
    RequiresRecreation, ResourceChange, StackEvent, StackOutput, StackResource, StackSnapshot,
};

/// CloudFormation port backed by the AWS SDK.
#[derive(Debug, Clone)]
pub struct AwsCloudFormation {
    /// SDK client.
    client: Client,
    /// Region the client talks to.
    region: Option<String>,
}

impl AwsCloudFormation {
    /// Creates a port from the ambient AWS configuration.
    ///
    /// `region` and `profile` override the SDK's defaults when given.
    pub async fn new(region: Option<&str>, profile: Option<&str>) -> Self {
        let mut loader = aws_config::from_env();
        if let Some(region_str) = region {
            loader = loader.region(aws_config::Region::new(region_str.to_string()));
        }
        if let Some(profile_name) = profile {
            loader = loader.profile_name(profile_name);
        }
        let config = loader.load().await;

        let region = config.region().map(ToString::to_string);
        debug!("CloudFormation client configured for region {region:?}");

        Self {
            client: Client::new(&config),
            region,
        }
    }

    /// Creates a port with an existing client.
    #[must_use]
    pub const fn with_client(client: Client, region: Option<String>) -> Self {
        Self { client, region }
    }

    /// Region of the underlying client, if known.
    #[must_use]
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }
}

#[async_trait]
impl CloudFormationApi for AwsCloudFormation {
    async fn describe_stacks(
        &self,
        _ctx: &CallContext,
        request: &DescribeStacksRequest,
    ) -> CloudResult<Page<StackSnapshot>> {
        let output = self
            .client
            .describe_stacks()
            .set_stack_name(request.stack_name.clone())
            .set_next_token(request.next_token.clone())
            .send()
            .await
            .map_err(|e| map_sdk_error(op::DESCRIBE_STACKS, e))?;

        let items = output.stacks().iter().map(convert_stack).collect();
        Ok(Page {
            items,
            next_token: output.next_token().map(String::from),
        })
    }

    async fn describe_stack_resources(
        &self,
        _ctx: &CallContext,
        stack_name: &str,
    ) -> CloudResult<Vec<StackResource>> {
        let output = self
            .client
            .describe_stack_resources()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| map_sdk_error(op::DESCRIBE_STACK_RESOURCES, e))?;

        Ok(output
            .stack_resources()
            .iter()
            .map(|r| StackResource {
                logical_id: r.logical_resource_id().unwrap_or_default().to_string(),
                physical_id: r.physical_resource_id().map(String::from),
                resource_type: r.resource_type().unwrap_or_default().to_string(),
                status: r
                    .resource_status()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_default(),
                status_reason: r.resource_status_reason().map(String::from),
                timestamp: r.timestamp().and_then(to_chrono),
            })
            .collect())
    }

    async fn describe_stack_events(
        &self,
        _ctx: &CallContext,
        request: &DescribeEventsRequest,
    ) -> CloudResult<Page<StackEvent>> {
        let output = self
            .client
            .describe_stack_events()
            .stack_name(&request.stack_name)
            .set_next_token(request.next_token.clone())
            .send()
            .await
            .map_err(|e| map_sdk_error(op::DESCRIBE_STACK_EVENTS, e))?;

        let items = output
            .stack_events()
            .iter()
            .filter_map(|e| {
                // Events without a timestamp cannot be ordered; the provider always sets one.
                let timestamp = e.timestamp().and_then(to_chrono)?;
                Some(StackEvent {
                    event_id: e.event_id().unwrap_or_default().to_string(),
                    stack_name: e.stack_name().unwrap_or_default().to_string(),
                    logical_id: e.logical_resource_id().unwrap_or_default().to_string(),
                    resource_type: e.resource_type().unwrap_or_default().to_string(),
                    status: e
                        .resource_status()
                        .map(|s| s.as_str().to_string())
                        .unwrap_or_default(),
                    status_reason: e.resource_status_reason().map(String::from),
                    timestamp,
                })
            })
            .collect();

        Ok(Page {
            items,
            next_token: output.next_token().map(String::from),
        })
    }

    async fn create_change_set(
        &self,
        _ctx: &CallContext,
        request: &CreateChangeSetRequest,
    ) -> CloudResult<CreatedChangeSet> {
        let mut builder = self
            .client
            .create_change_set()
            .stack_name(&request.stack_name)
            .change_set_name(&request.change_set_name)
            .change_set_type(sdk::ChangeSetType::from(request.change_set_type.as_str()))
            .client_token(&request.client_token)
            .set_description(request.description.clone())
            .set_parameters(Some(convert_parameters(&request.parameters)))
            .set_tags(Some(convert_tags(&request.tags)))
            .set_capabilities(Some(
                request
                    .capabilities
                    .iter()
                    .map(|c| sdk::Capability::from(c.as_str()))
                    .collect(),
            ));

        builder = match &request.template {
            ChangeSetTemplate::Body(body) => builder.template_body(body),
            ChangeSetTemplate::Url(url) => builder.template_url(url),
            ChangeSetTemplate::UsePrevious => builder.use_previous_template(true),
        };

        trace!("CreateChangeSet {} for {}", request.change_set_name, request.stack_name);
        let output = builder
            .send()
            .await
            .map_err(|e| map_sdk_error(op::CREATE_CHANGE_SET, e))?;

        Ok(CreatedChangeSet {
            id: output.id().unwrap_or_default().to_string(),
            stack_id: output.stack_id().unwrap_or_default().to_string(),
        })
    }

    async fn describe_change_set(
        &self,
        _ctx: &CallContext,
        request: &DescribeChangeSetRequest,
    ) -> CloudResult<ChangeSetPage> {
        let output = self
            .client
            .describe_change_set()
            .change_set_name(&request.change_set.change_set)
            .set_stack_name(request.change_set.stack_name.clone())
            .set_next_token(request.next_token.clone())
            .send()
            .await
            .map_err(|e| map_sdk_error(op::DESCRIBE_CHANGE_SET, e))?;

        let mut changes = Vec::new();
        for change in output.changes() {
            if let Some(resource_change) = change.resource_change() {
                changes.push(convert_resource_change(resource_change)?);
            }
        }

        Ok(ChangeSetPage {
            id: output.change_set_id().unwrap_or_default().to_string(),
            name: output.change_set_name().unwrap_or_default().to_string(),
            stack_id: output.stack_id().unwrap_or_default().to_string(),
            stack_name: output.stack_name().unwrap_or_default().to_string(),
            creation_time: output.creation_time().and_then(to_chrono),
            status: output
                .status()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            status_reason: output.status_reason().map(String::from),
            execution_status: output.execution_status().map(|s| s.as_str().to_string()),
            changes,
            next_token: output.next_token().map(String::from),
        })
    }

    async fn execute_change_set(
        &self,
        _ctx: &CallContext,
        change_set: &ChangeSetRef,
    ) -> CloudResult<()> {
        self.client
            .execute_change_set()
            .change_set_name(&change_set.change_set)
            .set_stack_name(change_set.stack_name.clone())
            .send()
            .await
            .map_err(|e| map_sdk_error(op::EXECUTE_CHANGE_SET, e))?;
        Ok(())
    }

    async fn delete_change_set(
        &self,
        _ctx: &CallContext,
        change_set: &ChangeSetRef,
    ) -> CloudResult<()> {
        self.client
            .delete_change_set()
            .change_set_name(&change_set.change_set)
            .set_stack_name(change_set.stack_name.clone())
            .send()
            .await
            .map_err(|e| map_sdk_error(op::DELETE_CHANGE_SET, e))?;
        Ok(())
    }

    async fn delete_stack(&self, _ctx: &CallContext, stack_name: &str) -> CloudResult<()> {
        self.client
            .delete_stack()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| map_sdk_error(op::DELETE_STACK, e))?;
        Ok(())
    }

    async fn list_imports(
        &self,
        _ctx: &CallContext,
        request: &ListImportsRequest,
    ) -> CloudResult<Page<String>> {
        let output = self
            .client
            .list_imports()
            .export_name(&request.export_name)
            .set_next_token(request.next_token.clone())
            .send()
            .await
            .map_err(|e| map_sdk_error(op::LIST_IMPORTS, e))?;

        Ok(Page {
            items: output.imports().to_vec(),
            next_token: output.next_token().map(String::from),
        })
    }
}

// ============================================================================
// Conversions
// ============================================================================

/// Maps an SDK error onto the port's tagged error.
fn map_sdk_error<E, R>(operation: &str, err: SdkError<E, R>) -> CloudError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    if let Some(service_err) = err.as_service_error() {
        let message = service_err.message().unwrap_or_default().to_string();
        let kind = classify_provider_error(service_err.code(), &message);
        debug!(
            "{operation} failed: code={:?} kind={kind:?} message={message}",
            service_err.code()
        );
        return CloudError::new(kind, operation, message);
    }
    CloudError::generic(operation, DisplayErrorContext(&err).to_string())
}

/// Converts an SDK timestamp.
fn to_chrono(value: &SdkDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}

fn convert_stack(stack: &sdk::Stack) -> StackSnapshot {
    let parameters = stack
        .parameters()
        .iter()
        .filter_map(|p| {
            Some((
                p.parameter_key()?.to_string(),
                p.parameter_value().unwrap_or_default().to_string(),
            ))
        })
        .collect::<Bindings>();

    let tags = stack
        .tags()
        .iter()
        .map(|t| {
            (
                t.key().unwrap_or_default().to_string(),
                t.value().unwrap_or_default().to_string(),
            )
        })
        .collect::<Bindings>();

    let outputs = stack
        .outputs()
        .iter()
        .map(|o| StackOutput {
            key: o.output_key().unwrap_or_default().to_string(),
            value: o.output_value().unwrap_or_default().to_string(),
            description: o.description().map(String::from),
            export_name: o.export_name().map(String::from),
        })
        .collect();

    let drift = stack.drift_information().map(|d| DriftInfo {
        status: d
            .stack_drift_status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
        last_checked: d.last_check_timestamp().and_then(to_chrono),
    });

    StackSnapshot {
        stack_id: stack.stack_id().unwrap_or_default().to_string(),
        stack_name: stack.stack_name().unwrap_or_default().to_string(),
        status: stack
            .stack_status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
        status_reason: stack.stack_status_reason().map(String::from),
        creation_time: stack.creation_time().and_then(to_chrono),
        last_updated_time: stack.last_updated_time().and_then(to_chrono),
        parameters,
        outputs,
        tags,
        drift,
    }
}

fn convert_parameters(parameters: &Bindings) -> Vec<sdk::Parameter> {
    parameters
        .iter()
        .map(|(key, value)| {
            sdk::Parameter::builder()
                .parameter_key(key)
                .parameter_value(value)
                .build()
        })
        .collect()
}

fn convert_tags(tags: &Bindings) -> Vec<sdk::Tag> {
    tags.iter()
        .map(|(key, value)| sdk::Tag::builder().key(key).value(value).build())
        .collect()
}

fn convert_resource_change(change: &sdk::ResourceChange) -> CloudResult<ResourceChange> {
    let malformed = |message: String| CloudError::generic(op::DESCRIBE_CHANGE_SET, message);

    let action = change
        .action()
        .map(|a| a.as_str().parse::<ChangeAction>())
        .transpose()
        .map_err(malformed)?
        .ok_or_else(|| malformed(String::from("resource change without action")))?;

    let replacement = change
        .replacement()
        .map(|r| r.as_str().parse::<Replacement>())
        .transpose()
        .map_err(malformed)?;

    let module_path = change
        .module_info()
        .and_then(|m| m.logical_id_hierarchy())
        .unwrap_or_default()
        .to_string();

    let mut details = Vec::new();
    for detail in change.details() {
        let target = detail.target();
        let attribute = target
            .and_then(|t| t.attribute())
            .map(|a| a.as_str().to_string())
            .unwrap_or_default();
        let target_attribute = match target.and_then(|t| t.name()) {
            Some(name) if !name.is_empty() => format!("{attribute}.{name}"),
            _ => attribute,
        };
        let requires_recreation = target
            .and_then(|t| t.requires_recreation())
            .map(|r| r.as_str().parse::<RequiresRecreation>())
            .transpose()
            .map_err(malformed)?
            .unwrap_or(RequiresRecreation::Never);
        let evaluation = detail
            .evaluation()
            .map(|e| e.as_str().parse::<Evaluation>())
            .transpose()
            .map_err(malformed)?
            .unwrap_or(Evaluation::Static);

        details.push(ChangeDetail {
            evaluation,
            target_attribute,
            requires_recreation,
            causing_entity: detail.causing_entity().map(String::from),
        });
    }

    Ok(ResourceChange {
        action,
        logical_id: change.logical_resource_id().unwrap_or_default().to_string(),
        replacement,
        resource_type: change.resource_type().unwrap_or_default().to_string(),
        physical_id: change.physical_resource_id().map(String::from),
        module_path,
        details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_chrono() {
        let value = SdkDateTime::from_secs(1_700_000_000);
        let converted = to_chrono(&value).unwrap();
        assert_eq!(converted.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_convert_resource_change_joins_target() {
        let change = sdk::ResourceChange::builder()
            .action(sdk::ChangeAction::Modify)
            .logical_resource_id("MyBucket")
            .resource_type("AWS::S3::Bucket")
            .replacement(sdk::Replacement::True)
            .details(
                sdk::ResourceChangeDetail::builder()
                    .evaluation(sdk::EvaluationType::Static)
                    .causing_entity("BucketName")
                    .target(
                        sdk::ResourceTargetDefinition::builder()
                            .attribute(sdk::ResourceAttribute::Properties)
                            .name("BucketName")
                            .requires_recreation(sdk::RequiresRecreation::Always)
                            .build(),
                    )
                    .build(),
            )
            .build();

        let converted = convert_resource_change(&change).unwrap();
        assert_eq!(converted.action, ChangeAction::Modify);
        assert_eq!(converted.replacement, Some(Replacement::True));
        assert_eq!(converted.module_path, "");
        assert_eq!(converted.details[0].target_attribute, "Properties.BucketName");
        assert_eq!(
            converted.details[0].requires_recreation,
            RequiresRecreation::Always
        );
    }

    #[test]
    fn test_convert_stack_with_sparse_fields() {
        let stack = sdk::Stack::builder()
            .stack_name("web")
            .stack_status(sdk::StackStatus::UpdateRollbackComplete)
            .creation_time(SdkDateTime::from_secs(1_700_000_000))
            .tags(sdk::Tag::builder().key("team").value("core").build())
            .outputs(
                sdk::Output::builder()
                    .output_key("Url")
                    .output_value("https://example.com")
                    .export_name("web-url")
                    .build(),
            )
            .build();

        let snapshot = convert_stack(&stack);
        assert_eq!(snapshot.stack_name, "web");
        assert_eq!(snapshot.stack_id, "");
        assert_eq!(snapshot.status, "UPDATE_ROLLBACK_COMPLETE");
        assert_eq!(snapshot.tags.get("team"), Some("core"));
        assert_eq!(snapshot.outputs[0].export_name.as_deref(), Some("web-url"));
        assert!(snapshot.last_updated_time.is_none());
        assert!(snapshot.drift.is_none());
    }

    #[test]
    fn test_convert_tags() {
        let mut bindings = Bindings::new();
        bindings.insert("team", "core");
        let tags = convert_tags(&bindings);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].key(), Some("team"));
        assert_eq!(tags[0].value(), Some("core"));
    }

    #[test]
    fn test_convert_parameters_keep_order() {
        let mut bindings = Bindings::new();
        bindings.insert("B", "2");
        bindings.insert("A", "1");
        let params = convert_parameters(&bindings);
        assert_eq!(params[0].parameter_key(), Some("B"));
        assert_eq!(params[1].parameter_value(), Some("1"));
    }
}
