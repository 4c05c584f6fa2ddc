//! Configuration module for the Cirrus deployment tool.
//!
//! This module handles all configuration-related functionality:
//! - Finding and parsing `cirrus.yaml`, with environment overrides
//! - Deployment files, parameter files and tag files
//! - Validation of settings and deployments
//! - Assembling a deployment from files and command-line flags

mod assemble;
mod bindings;
mod parser;
mod settings;
mod validator;

pub use assemble::DeploymentInput;
pub use bindings::{
    load_parameter_files, load_tag_files, parameters_from_value, parse_assignments,
    tags_from_value,
};
pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, apply_env_overrides, find_config_file, load_dotenv,
    resolve_binding_file, resolve_template,
};
pub use settings::{
    AwsSettings, ChangeSetSettings, CirrusConfig, DeploymentFile, EventSettings, ExportSettings,
    ParameterSettings, PrecheckSettings, RetrySettings, TagSettings, TemplateSettings,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult, check_stack_name};
