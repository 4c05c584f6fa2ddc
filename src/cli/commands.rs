//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::changeset::parse_console_url;
use crate::cloud::ChangeSetRef;
use crate::config::DeploymentInput;
use crate::error::{ConfigError, Result};

/// Cirrus - safe, observable `CloudFormation` deployments.
#[derive(Parser, Debug)]
#[command(name = "cirrus")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the settings file.
    #[arg(short, long, global = true, env = "CIRRUS_CONFIG")]
    pub config: Option<PathBuf>,

    /// AWS region.
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// AWS profile.
    #[arg(long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy a template to a stack through a change-set.
    Deploy(DeployArgs),

    /// Show a stack's status, parameters, outputs and tags.
    Status {
        /// Stack name or ARN.
        stack: String,
    },

    /// List a stack's resources.
    Resources {
        /// Stack name or ARN.
        stack: String,
    },

    /// Show the event timeline of a stack.
    Report {
        /// Stack name or ARN.
        stack: String,

        /// How far back to look, in minutes.
        #[arg(long, default_value = "60")]
        since: u32,
    },

    /// List exports and the stacks importing them.
    Exports {
        /// Stack name or glob pattern.
        #[arg(long)]
        stack: Option<String>,

        /// Export name.
        #[arg(long)]
        export: Option<String>,
    },

    /// Delete a stack unless its exports are in use.
    Delete {
        /// Stack name.
        stack: String,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Inspect or act on an existing change-set.
    Changeset {
        /// Change-set subcommand.
        #[command(subcommand)]
        command: ChangeSetCommands,
    },

    /// Validate the settings and, optionally, a deployment file.
    Validate {
        /// Deployment file to validate.
        #[arg(short = 'f', long)]
        deployment_file: Option<PathBuf>,

        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },
}

/// Arguments of `cirrus deploy`.
#[derive(Args, Debug, Default)]
pub struct DeployArgs {
    /// Stack name.
    #[arg(short, long)]
    pub stack: Option<String>,

    /// Template name (looked up in the template directory) or path.
    #[arg(short, long, group = "template_source")]
    pub template: Option<String>,

    /// Template URL.
    #[arg(long, group = "template_source")]
    pub template_url: Option<String>,

    /// Reuse the stack's current template.
    #[arg(long, group = "template_source")]
    pub use_previous_template: bool,

    /// Parameter files, merged in order.
    #[arg(long = "parameters", num_args = 1..)]
    pub parameter_files: Vec<String>,

    /// Tag files, merged in order.
    #[arg(long = "tags", num_args = 1..)]
    pub tag_files: Vec<String>,

    /// Parameter as KEY=VALUE; may be repeated.
    #[arg(long = "param")]
    pub params: Vec<String>,

    /// Tag as KEY=VALUE; may be repeated.
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Capabilities, e.g. `CAPABILITY_IAM`.
    #[arg(long, num_args = 1..)]
    pub capabilities: Vec<String>,

    /// Change-set name.
    #[arg(long)]
    pub changeset_name: Option<String>,

    /// Deployment file.
    #[arg(short = 'f', long)]
    pub deployment_file: Option<PathBuf>,

    /// Preview the change-set, then delete it.
    #[arg(long)]
    pub dry_run: bool,

    /// Skip confirmation prompt.
    #[arg(short, long)]
    pub yes: bool,

    /// Give up after this many seconds.
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl DeployArgs {
    /// Deployment inputs carried by these arguments.
    #[must_use]
    pub fn input(&self) -> DeploymentInput {
        DeploymentInput {
            stack: self.stack.clone(),
            template: self.template.clone(),
            template_url: self.template_url.clone(),
            use_previous_template: self.use_previous_template,
            parameter_files: self.parameter_files.clone(),
            tag_files: self.tag_files.clone(),
            params: self.params.clone(),
            tags: self.tags.clone(),
            capabilities: self.capabilities.clone(),
            changeset_name: self.changeset_name.clone(),
            deployment_file: self.deployment_file.clone(),
            dry_run: self.dry_run,
        }
    }
}

/// Change-set subcommands.
#[derive(Subcommand, Debug)]
pub enum ChangeSetCommands {
    /// Show a change-set.
    Show(ChangeSetTarget),

    /// Execute a change-set and follow the stack.
    Execute {
        /// Change-set to execute.
        #[command(flatten)]
        target: ChangeSetTarget,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Delete a change-set.
    Delete(ChangeSetTarget),

    /// Print the console link of a change-set, using the global region.
    Url {
        /// Stack ARN.
        #[arg(long)]
        stack_id: String,

        /// Change-set ARN.
        #[arg(long)]
        changeset_id: String,
    },
}

/// Address of a change-set: a console link, or stack plus name.
#[derive(Args, Debug, Clone, Default)]
pub struct ChangeSetTarget {
    /// Console link to the change-set.
    #[arg(long, conflicts_with_all = ["stack", "name"])]
    pub url: Option<String>,

    /// Stack name or ARN.
    #[arg(long, requires = "name")]
    pub stack: Option<String>,

    /// Change-set name or ARN.
    #[arg(long)]
    pub name: Option<String>,
}

impl ChangeSetTarget {
    /// Resolves the change-set address, and the region a console link
    /// carries.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed link, or if neither a link nor a
    /// name was given.
    pub fn reference(&self) -> Result<(ChangeSetRef, Option<String>)> {
        if let Some(url) = &self.url {
            let location = parse_console_url(url)?;
            let reference = ChangeSetRef {
                change_set: location.change_set_id,
                stack_name: Some(location.stack_id),
            };
            return Ok((reference, location.region));
        }
        match (&self.stack, &self.name) {
            (Some(stack), Some(name)) => Ok((ChangeSetRef::by_name(stack, name), None)),
            (None, Some(name)) if name.starts_with("arn:") => Ok((ChangeSetRef::by_id(name), None)),
            _ => Err(ConfigError::validation_general(
                "Identify the change set with --url, or with --stack and --name",
            )
            .into()),
        }
    }
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::console_url;
    use clap::CommandFactory;

    #[test]
    fn test_command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_deploy_arguments() {
        let cli = Cli::try_parse_from([
            "cirrus", "deploy", "--stack", "web", "--template", "web", "--param", "Env=prod",
            "--param", "Size=2", "--capabilities", "CAPABILITY_IAM", "CAPABILITY_NAMED_IAM",
            "--dry-run", "--output", "json",
        ])
        .unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        let Commands::Deploy(args) = cli.command else {
            panic!("expected deploy");
        };
        let input = args.input();
        assert_eq!(input.stack.as_deref(), Some("web"));
        assert_eq!(input.params, vec!["Env=prod", "Size=2"]);
        assert_eq!(input.capabilities.len(), 2);
        assert!(input.dry_run);
    }

    #[test]
    fn test_template_sources_conflict() {
        let result = Cli::try_parse_from([
            "cirrus", "deploy", "--stack", "web", "--template", "web", "--use-previous-template",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_target_from_console_url() {
        let stack_id = "arn:aws:cloudformation:eu-west-1:1:stack/web/abc";
        let cs_id = "arn:aws:cloudformation:eu-west-1:1:changeSet/cs-1/def";
        let target = ChangeSetTarget {
            url: Some(console_url("eu-west-1", stack_id, cs_id)),
            ..ChangeSetTarget::default()
        };
        let (reference, region) = target.reference().unwrap();
        assert_eq!(reference.change_set, cs_id);
        assert_eq!(reference.stack_name.as_deref(), Some(stack_id));
        assert_eq!(region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn test_target_needs_an_address() {
        let target = ChangeSetTarget {
            name: Some(String::from("cs-1")),
            ..ChangeSetTarget::default()
        };
        assert!(target.reference().is_err());

        let target = ChangeSetTarget {
            stack: Some(String::from("web")),
            name: Some(String::from("cs-1")),
            ..ChangeSetTarget::default()
        };
        let (reference, _) = target.reference().unwrap();
        assert_eq!(reference, ChangeSetRef::by_name("web", "cs-1"));
    }
}
