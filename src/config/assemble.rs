//! Assembling a [`Deployment`] from settings, a deployment file and flags.
//!
//! Command-line values override the deployment file. Parameters and tags
//! merge in order: deployment file, binding files, then `KEY=VALUE`
//! flags. Default tags from the settings only fill keys nobody set.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::changeset::{changeset_name, is_valid_name};
use crate::cloud::Bindings;
use crate::deploy::{Deployment, TemplateSource};
use crate::error::{ConfigError, Result};
use crate::stack::canonical_stack_name;

use super::bindings::{
    load_parameter_files, load_tag_files, parameters_from_value, parse_assignments,
    tags_from_value,
};
use super::parser::{ConfigParser, resolve_binding_file, resolve_template};
use super::settings::{CirrusConfig, DeploymentFile};
use super::validator::{ConfigValidator, check_stack_name, template_sources};

/// Raw deployment inputs, as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct DeploymentInput {
    /// Stack name.
    pub stack: Option<String>,
    /// Template name or path.
    pub template: Option<String>,
    /// Template URL.
    pub template_url: Option<String>,
    /// Reuse the stack's current template.
    pub use_previous_template: bool,
    /// Parameter file names or paths.
    pub parameter_files: Vec<String>,
    /// Tag file names or paths.
    pub tag_files: Vec<String>,
    /// `KEY=VALUE` parameters.
    pub params: Vec<String>,
    /// `KEY=VALUE` tags.
    pub tags: Vec<String>,
    /// Capabilities.
    pub capabilities: Vec<String>,
    /// Explicit change-set name.
    pub changeset_name: Option<String>,
    /// Deployment file.
    pub deployment_file: Option<PathBuf>,
    /// Stop after previewing the change-set.
    pub dry_run: bool,
}

impl DeploymentInput {
    /// Builds the deployment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid stack or change-set
    /// name, a missing or ambiguous template source, or an unreadable
    /// template, parameter or tag file.
    pub fn assemble(&self, config: &CirrusConfig, now: DateTime<Utc>) -> Result<Deployment> {
        let file = match &self.deployment_file {
            Some(path) => {
                let file = ConfigParser::new().load_deployment(path)?;
                ConfigValidator::new().validate_deployment(&file)?;
                Some(file)
            }
            None => None,
        };

        let stack = self
            .stack
            .clone()
            .or_else(|| file.as_ref().map(|f| f.stack.clone()))
            .map(|stack| canonical_stack_name(&stack).to_string())
            .ok_or_else(|| ConfigError::validation("A stack name is required", "stack"))?;
        check_stack_name(&stack).map_err(|message| ConfigError::validation(message, "stack"))?;

        let (template, template_path) = self.template_source(config, &stack, file.as_ref())?;

        let changeset = match self
            .changeset_name
            .clone()
            .or_else(|| file.as_ref().and_then(|f| f.changeset_name.clone()))
        {
            Some(name) => name,
            None => changeset_name(&config.changeset.name_format, now)?,
        };
        if !is_valid_name(&changeset) {
            return Err(ConfigError::validation(
                format!("Change set name '{changeset}' is invalid"),
                "changeset_name",
            )
            .into());
        }

        let capabilities = if self.capabilities.is_empty() {
            file.as_ref().map(|f| f.capabilities.clone()).unwrap_or_default()
        } else {
            self.capabilities.clone()
        };

        let mut deployment = Deployment::new(stack, changeset)
            .with_template(template)
            .with_parameters(self.parameters(config, file.as_ref())?)
            .with_tags(self.tags(config, file.as_ref())?)
            .with_capabilities(capabilities)
            .with_dry_run(self.dry_run);
        deployment.template_path = template_path;
        debug!(
            "Assembled deployment of {} with {} parameters and {} tags",
            deployment.stack_name,
            deployment.parameters.len(),
            deployment.tags.len()
        );
        Ok(deployment)
    }

    fn template_source(
        &self,
        config: &CirrusConfig,
        stack: &str,
        file: Option<&DeploymentFile>,
    ) -> Result<(TemplateSource, Option<PathBuf>)> {
        let flags = template_sources(
            self.template.is_some(),
            self.template_url.is_some(),
            self.use_previous_template,
        );
        let (template, url, previous) = if flags.is_empty() {
            file.map_or((None, None, false), |f| {
                (f.template.clone(), f.template_url.clone(), f.use_previous_template)
            })
        } else {
            (
                self.template.clone(),
                self.template_url.clone(),
                self.use_previous_template,
            )
        };

        let sources = template_sources(template.is_some(), url.is_some(), previous);
        if sources.len() > 1 {
            return Err(ConfigError::ConflictingTemplates {
                stack: stack.to_string(),
                sources: sources.join(", "),
            }
            .into());
        }

        if let Some(name) = template {
            let path = resolve_template(
                &name,
                &config.templates.directory,
                &config.templates.extensions,
            )?;
            let body = std::fs::read_to_string(&path)?;
            return Ok((TemplateSource::Body(body), Some(path)));
        }
        if let Some(url) = url {
            return Ok((TemplateSource::Url(url), None));
        }
        if previous {
            return Ok((TemplateSource::UsePrevious, None));
        }
        Err(ConfigError::MissingTemplate {
            stack: stack.to_string(),
        }
        .into())
    }

    fn parameters(&self, config: &CirrusConfig, file: Option<&DeploymentFile>) -> Result<Bindings> {
        let mut parameters = match file.and_then(|f| f.parameters.as_ref()) {
            Some(value) => parameters_from_value(value, "deployment file parameters")?,
            None => Bindings::new(),
        };
        let paths = self
            .parameter_files
            .iter()
            .map(|name| resolve_binding_file(name, &config.parameters.directory))
            .collect::<Result<Vec<_>>>()?;
        parameters.merge(&load_parameter_files(&paths)?);
        parameters.merge(&parse_assignments(&self.params)?);
        Ok(parameters)
    }

    fn tags(&self, config: &CirrusConfig, file: Option<&DeploymentFile>) -> Result<Bindings> {
        let mut tags = match file.and_then(|f| f.tags.as_ref()) {
            Some(value) => tags_from_value(value, "deployment file tags")?,
            None => Bindings::new(),
        };
        let paths = self
            .tag_files
            .iter()
            .map(|name| resolve_binding_file(name, &config.tags.directory))
            .collect::<Result<Vec<_>>>()?;
        tags.merge(&load_tag_files(&paths)?);
        tags.merge(&parse_assignments(&self.tags)?);
        for (key, value) in &config.tags.default {
            tags.insert_missing(key.as_str(), value.as_str());
        }
        Ok(tags)
    }
}
