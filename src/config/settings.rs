//! Settings types for the Cirrus deployment tool.
//!
//! This module defines the structs that map to `cirrus.yaml` and to
//! deployment files. Every setting is optional and falls back to the
//! defaults below.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::changeset::{DEFAULT_NAME_FORMAT, PollSettings};
use crate::cloud::RetryPolicy;
use crate::deploy::OrchestratorSettings;

/// The root settings structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CirrusConfig {
    /// AWS connection settings.
    pub aws: AwsSettings,
    /// Change-set naming and polling.
    pub changeset: ChangeSetSettings,
    /// Event tailing.
    pub events: EventSettings,
    /// Export resolution.
    pub exports: ExportSettings,
    /// Throttle retry.
    pub retry: RetrySettings,
    /// Template lookup.
    pub templates: TemplateSettings,
    /// Parameter file lookup.
    pub parameters: ParameterSettings,
    /// Tag file lookup and default tags.
    pub tags: TagSettings,
    /// Precheck commands.
    pub prechecks: PrecheckSettings,
}

/// AWS connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AwsSettings {
    /// Region; the SDK default chain applies when unset.
    pub region: Option<String>,
    /// Named profile; the SDK default chain applies when unset.
    pub profile: Option<String>,
}

/// Change-set naming and polling settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ChangeSetSettings {
    /// chrono format used to name change-sets.
    #[serde(default = "default_name_format")]
    pub name_format: String,
    /// Maximum time to wait for a change-set, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// First poll delay, in milliseconds.
    #[serde(default = "default_poll_initial_ms")]
    pub poll_initial_ms: u64,
    /// Maximum poll delay, in milliseconds.
    #[serde(default = "default_poll_max_ms")]
    pub poll_max_ms: u64,
}

impl Default for ChangeSetSettings {
    fn default() -> Self {
        Self {
            name_format: default_name_format(),
            timeout_secs: default_timeout_secs(),
            poll_initial_ms: default_poll_initial_ms(),
            poll_max_ms: default_poll_max_ms(),
        }
    }
}

impl ChangeSetSettings {
    /// Polling bounds.
    #[must_use]
    pub const fn poll_settings(&self) -> PollSettings {
        PollSettings {
            initial: Duration::from_millis(self.poll_initial_ms),
            max: Duration::from_millis(self.poll_max_ms),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// Event tailing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EventSettings {
    /// Interval between event polls, in milliseconds.
    #[serde(default = "default_event_poll_ms")]
    pub poll_interval_ms: u64,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_event_poll_ms(),
        }
    }
}

/// Export resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExportSettings {
    /// Maximum concurrent `ListImports` calls.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

/// Throttle retry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    /// Pause before the single retry of a throttled call, in milliseconds.
    #[serde(default = "default_throttle_pause_ms")]
    pub throttle_pause_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            throttle_pause_ms: default_throttle_pause_ms(),
        }
    }
}

impl RetrySettings {
    /// The retry policy these settings describe.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(self.throttle_pause_ms))
    }
}

/// Template lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TemplateSettings {
    /// Directory searched for template names.
    #[serde(default = "default_template_dir")]
    pub directory: PathBuf,
    /// Extensions tried, in order, when looking a name up.
    #[serde(default = "default_template_extensions")]
    pub extensions: Vec<String>,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            directory: default_template_dir(),
            extensions: default_template_extensions(),
        }
    }
}

/// Parameter file lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ParameterSettings {
    /// Directory searched for parameter file names.
    #[serde(default = "default_parameter_dir")]
    pub directory: PathBuf,
}

impl Default for ParameterSettings {
    fn default() -> Self {
        Self {
            directory: default_parameter_dir(),
        }
    }
}

/// Tag settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TagSettings {
    /// Directory searched for tag file names.
    #[serde(default = "default_tag_dir")]
    pub directory: PathBuf,
    /// Tags added to every deployment unless the deployment sets them.
    #[serde(default)]
    pub default: BTreeMap<String, String>,
}

impl Default for TagSettings {
    fn default() -> Self {
        Self {
            directory: default_tag_dir(),
            default: BTreeMap::new(),
        }
    }
}

/// Precheck settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PrecheckSettings {
    /// Commands run through `sh -c`; `$TEMPLATEPATH` is substituted.
    pub commands: Vec<String>,
    /// Refuse the deployment when a command fails.
    pub stop_on_failure: bool,
}

impl CirrusConfig {
    /// Orchestrator tunables derived from these settings.
    #[must_use]
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            poll: self.changeset.poll_settings(),
            tail_interval: Duration::from_millis(self.events.poll_interval_ms),
            export_concurrency: self.exports.concurrency,
            region: self.aws.region.clone(),
            prechecks: self.prechecks.commands.clone(),
            stop_on_precheck_failure: self.prechecks.stop_on_failure,
        }
    }
}

/// One stack deployment described in a YAML file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DeploymentFile {
    /// Stack name.
    pub stack: String,
    /// Template name or path.
    #[serde(default)]
    pub template: Option<String>,
    /// Template URL.
    #[serde(default)]
    pub template_url: Option<String>,
    /// Reuse the stack's current template.
    #[serde(default)]
    pub use_previous_template: bool,
    /// Parameters, as a map or a list.
    #[serde(default)]
    pub parameters: Option<serde_yaml::Value>,
    /// Tags, as a map or a list.
    #[serde(default)]
    pub tags: Option<serde_yaml::Value>,
    /// Capabilities.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Explicit change-set name.
    #[serde(default)]
    pub changeset_name: Option<String>,
}

// Default value functions

fn default_name_format() -> String {
    String::from(DEFAULT_NAME_FORMAT)
}

const fn default_timeout_secs() -> u64 {
    1800
}

const fn default_poll_initial_ms() -> u64 {
    2000
}

const fn default_poll_max_ms() -> u64 {
    30_000
}

const fn default_event_poll_ms() -> u64 {
    5000
}

const fn default_concurrency() -> usize {
    8
}

const fn default_throttle_pause_ms() -> u64 {
    5000
}

fn default_template_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_template_extensions() -> Vec<String> {
    ["", ".yaml", ".yml", ".json", ".template"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

fn default_parameter_dir() -> PathBuf {
    PathBuf::from("parameters")
}

fn default_tag_dir() -> PathBuf {
    PathBuf::from("tags")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: CirrusConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, CirrusConfig::default());
        assert_eq!(config.changeset.timeout_secs, 1800);
        assert_eq!(config.exports.concurrency, 8);
        assert_eq!(config.templates.extensions.len(), 5);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let yaml = r"
changeset:
  poll_max_ms: 10000
tags:
  default:
    Team: platform
";
        let config: CirrusConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.changeset.poll_max_ms, 10_000);
        assert_eq!(config.changeset.poll_initial_ms, 2000);
        assert_eq!(config.tags.directory, PathBuf::from("tags"));
        assert_eq!(config.tags.default.get("Team").map(String::as_str), Some("platform"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result: Result<CirrusConfig, _> = serde_yaml::from_str("changeset:\n  polls: 3\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_orchestrator_settings() {
        let mut config = CirrusConfig::default();
        config.aws.region = Some(String::from("eu-west-1"));
        config.prechecks.commands = vec![String::from("cfn-lint $TEMPLATEPATH")];
        let settings = config.orchestrator_settings();
        assert_eq!(settings.poll.initial, Duration::from_secs(2));
        assert_eq!(settings.poll.timeout, Duration::from_secs(1800));
        assert_eq!(settings.tail_interval, Duration::from_secs(5));
        assert_eq!(settings.region.as_deref(), Some("eu-west-1"));
        assert_eq!(settings.prechecks.len(), 1);
    }
}
