//! One in-flight deployment.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::changeset::ChangeSet;
use crate::cloud::{Bindings, StackSnapshot};

/// Where the template of a deployment comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TemplateSource {
    /// Inline template body.
    Body(String),
    /// Template stored at a URL.
    Url(String),
    /// Reuse the template the stack was last deployed with.
    UsePrevious,
    /// No template supplied.
    #[default]
    None,
}

impl TemplateSource {
    /// True unless no template was supplied.
    #[must_use]
    pub const fn is_some(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for TemplateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Body(body) => write!(f, "inline body ({} bytes)", body.len()),
            Self::Url(url) => write!(f, "{url}"),
            Self::UsePrevious => f.write_str("previous template"),
            Self::None => f.write_str("none"),
        }
    }
}

/// A user's request to bring a stack to a template.
#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
    /// Stack name.
    pub stack_name: String,
    /// Stack ARN, once known.
    pub stack_id: Option<String>,
    /// Change-set name.
    pub changeset_name: String,
    /// Template source.
    #[serde(skip)]
    pub template: TemplateSource,
    /// Local template file, used by prechecks.
    pub template_path: Option<PathBuf>,
    /// Parameters.
    pub parameters: Bindings,
    /// Tags.
    pub tags: Bindings,
    /// Capabilities, forwarded verbatim.
    pub capabilities: Vec<String>,
    /// Stop after previewing the change-set.
    pub dry_run: bool,
    /// Whether the stack is new; set by the orchestrator.
    pub is_new: bool,
    /// Whether a precheck command failed.
    pub prechecks_failed: bool,
    /// Current change-set.
    pub changeset: Option<ChangeSet>,
    /// Last observed stack.
    pub stack: Option<StackSnapshot>,
}

impl Deployment {
    /// Creates a deployment with no template, bindings or flags.
    #[must_use]
    pub fn new(stack_name: impl Into<String>, changeset_name: impl Into<String>) -> Self {
        Self {
            stack_name: stack_name.into(),
            stack_id: None,
            changeset_name: changeset_name.into(),
            template: TemplateSource::None,
            template_path: None,
            parameters: Bindings::new(),
            tags: Bindings::new(),
            capabilities: Vec::new(),
            dry_run: false,
            is_new: false,
            prechecks_failed: false,
            changeset: None,
            stack: None,
        }
    }

    /// Sets the template source.
    #[must_use]
    pub fn with_template(mut self, template: TemplateSource) -> Self {
        self.template = template;
        self
    }

    /// Sets the parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Bindings) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sets the tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Bindings) -> Self {
        self.tags = tags;
        self
    }

    /// Sets the capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sets the dry-run flag.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}
