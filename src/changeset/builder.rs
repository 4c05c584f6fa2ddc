//! Change-set request building.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::cloud::{ChangeSetTemplate, ChangeSetType, CreateChangeSetRequest};
use crate::deploy::{Deployment, TemplateSource};
use crate::error::{ConfigError, Result};

/// Default chrono format for change-set names.
pub const DEFAULT_NAME_FORMAT: &str = "cirrus-%Y-%m-%dT%H-%M-%S";

/// Description attached to every change-set.
pub const CHANGESET_DESCRIPTION: &str = "Created by cirrus";

/// Longest change-set name the provider accepts.
const MAX_NAME_LEN: usize = 128;

/// Renders a time-stamped change-set name.
///
/// # Errors
///
/// Returns an error if `format` is not a valid chrono format string.
pub fn changeset_name(format: &str, now: DateTime<Utc>) -> Result<String> {
    let mut name = String::new();
    write!(name, "{}", now.format(format)).map_err(|_| {
        ConfigError::validation(
            format!("invalid change set name format '{format}'"),
            "changeset.name_format",
        )
    })?;
    Ok(name)
}

/// True if `name` is a valid change-set (or stack) name.
///
/// Names start with a letter, contain only letters, digits and hyphens,
/// and are at most 128 characters long.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_NAME_LEN
        && first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Builds the `CreateChangeSet` request for a deployment.
///
/// # Errors
///
/// Returns a configuration error if no template was supplied, or if the
/// previous template is requested for a new stack.
pub fn build_request(deployment: &Deployment) -> Result<CreateChangeSetRequest> {
    let stack = &deployment.stack_name;
    let template = match &deployment.template {
        TemplateSource::Body(body) => ChangeSetTemplate::Body(body.clone()),
        TemplateSource::Url(url) => ChangeSetTemplate::Url(url.clone()),
        TemplateSource::UsePrevious if deployment.is_new => {
            return Err(ConfigError::NoPreviousTemplate {
                stack: stack.clone(),
            }
            .into());
        }
        TemplateSource::UsePrevious => ChangeSetTemplate::UsePrevious,
        TemplateSource::None => {
            return Err(ConfigError::MissingTemplate {
                stack: stack.clone(),
            }
            .into());
        }
    };

    let change_set_type = if deployment.is_new {
        ChangeSetType::Create
    } else {
        ChangeSetType::Update
    };

    Ok(CreateChangeSetRequest {
        stack_name: stack.clone(),
        change_set_name: deployment.changeset_name.clone(),
        change_set_type,
        template,
        parameters: deployment.parameters.clone(),
        tags: deployment.tags.clone(),
        capabilities: deployment.capabilities.clone(),
        client_token: Uuid::new_v4().to_string(),
        description: Some(CHANGESET_DESCRIPTION.to_string()),
    })
}
