//! CLI module for the Cirrus deployment tool.
//!
//! This module provides the command-line interface: argument parsing,
//! output formatting, terminal prompts and live progress.

mod commands;
mod output;
mod prompt;
mod reporter;

pub use commands::{ChangeSetCommands, ChangeSetTarget, Cli, Commands, DeployArgs, OutputFormat};
pub use output::OutputFormatter;
pub use prompt::{PromptApprover, is_affirmative};
pub use reporter::ConsoleReporter;
