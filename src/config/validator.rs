//! Settings and deployment validation.
//!
//! Validation collects every problem it finds and reports the first one as
//! the error, keeping the rest available for display.

use crate::changeset::{changeset_name, is_valid_name};
use crate::error::{ConfigError, Result};
use chrono::Utc;
use tracing::debug;

use super::settings::{CirrusConfig, DeploymentFile};

/// Validator for settings and deployment files.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates settings.
    ///
    /// # Errors
    ///
    /// Returns the first validation error.
    pub fn validate(&self, config: &CirrusConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_changeset(config, &mut result);
        Self::validate_intervals(config, &mut result);

        if config.exports.concurrency == 0 {
            result.errors.push(ValidationError {
                field: String::from("exports.concurrency"),
                message: String::from("Export concurrency must be at least 1"),
            });
        }

        if config.templates.extensions.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("templates.extensions"),
                message: String::from("At least one template extension is required"),
            });
        }

        result.into_result()
    }

    /// Validates a deployment file.
    ///
    /// # Errors
    ///
    /// Returns the first validation error.
    pub fn validate_deployment(&self, file: &DeploymentFile) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        if let Err(message) = check_stack_name(&file.stack) {
            result.errors.push(ValidationError {
                field: String::from("stack"),
                message,
            });
        }

        let sources = template_sources(
            file.template.is_some(),
            file.template_url.is_some(),
            file.use_previous_template,
        );
        if sources.len() > 1 {
            result.errors.push(ValidationError {
                field: String::from("template"),
                message: format!("Only one template source allowed, got {}", sources.join(", ")),
            });
        }

        if let Some(name) = &file.changeset_name
            && !is_valid_name(name)
        {
            result.errors.push(ValidationError {
                field: String::from("changeset_name"),
                message: format!("Change set name '{name}' is invalid"),
            });
        }

        for (i, capability) in file.capabilities.iter().enumerate() {
            if !capability.starts_with("CAPABILITY_") {
                result.warnings.push(format!(
                    "capabilities[{i}]: '{capability}' is not a known capability"
                ));
            }
        }

        result.into_result()
    }

    fn validate_changeset(config: &CirrusConfig, result: &mut ValidationResult) {
        let format = &config.changeset.name_format;
        match changeset_name(format, Utc::now()) {
            Ok(sample) if is_valid_name(&sample) => {}
            Ok(sample) => result.errors.push(ValidationError {
                field: String::from("changeset.name_format"),
                message: format!(
                    "Format '{format}' renders '{sample}', which is not a valid change set name"
                ),
            }),
            Err(err) => result.errors.push(ValidationError {
                field: String::from("changeset.name_format"),
                message: err.to_string(),
            }),
        }
    }

    fn validate_intervals(config: &CirrusConfig, result: &mut ValidationResult) {
        let changeset = &config.changeset;
        if changeset.timeout_secs == 0 {
            result.errors.push(ValidationError {
                field: String::from("changeset.timeout_secs"),
                message: String::from("Change set timeout must be positive"),
            });
        }
        if changeset.poll_initial_ms == 0 || changeset.poll_max_ms == 0 {
            result.errors.push(ValidationError {
                field: String::from("changeset.poll_initial_ms"),
                message: String::from("Poll intervals must be positive"),
            });
        }
        if changeset.poll_initial_ms > changeset.poll_max_ms {
            result.warnings.push(format!(
                "changeset.poll_initial_ms ({}) exceeds poll_max_ms ({}); the maximum applies",
                changeset.poll_initial_ms, changeset.poll_max_ms
            ));
        }
        if config.events.poll_interval_ms == 0 {
            result.errors.push(ValidationError {
                field: String::from("events.poll_interval_ms"),
                message: String::from("Event poll interval must be positive"),
            });
        }
    }
}

/// Checks a stack name.
///
/// Stack names start with a letter, contain only letters, digits and
/// hyphens, and are at most 128 characters long.
///
/// # Errors
///
/// Returns a description of the problem.
pub fn check_stack_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err(String::from("Stack name cannot be empty"));
    }
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(format!(
            "Stack name '{name}' is invalid. Must start with a letter and contain only letters, digits and hyphens (max 128)."
        ))
    }
}

/// Names the template sources that are set.
#[must_use]
pub fn template_sources(template: bool, url: bool, previous: bool) -> Vec<&'static str> {
    [
        (template, "template"),
        (url, "template_url"),
        (previous, "use_previous_template"),
    ]
    .into_iter()
    .filter_map(|(set, name)| set.then_some(name))
    .collect()
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    fn into_result(self) -> Result<Self> {
        match self.errors.first() {
            None => {
                debug!("Validation passed with {} warnings", self.warnings.len());
                Ok(self)
            }
            Some(first) => Err(ConfigError::ValidationError {
                message: first.message.clone(),
                field: Some(first.field.clone()),
            }
            .into()),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
