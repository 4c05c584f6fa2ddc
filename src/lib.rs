// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is reported
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![allow(clippy::print_stderr)]       // Prompts and progress go to stderr
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Cirrus
//!
//! Safe, observable `CloudFormation` deployments driven through change-sets.
//!
//! ## Overview
//!
//! Cirrus never updates a stack directly. Every deployment:
//!
//! - Classifies the target stack as new, ready, busy or failed
//! - Creates a change-set and waits for the provider to compute it
//! - Flags changes that may recreate resources, then asks for approval
//! - Executes the change-set and follows stack events until the stack settles
//! - Reports per-resource durations from the correlated event timeline
//!
//! Deleting a stack is refused while another stack imports one of its exports.
//!
//! ## Modules
//!
//! - [`cloud`]: the `CloudFormation` port, its AWS adapter and retry decorator
//! - [`stack`]: stack lookup and readiness classification
//! - [`changeset`]: change-set requests, polling and replacement detection
//! - [`events`]: event tailing and timeline correlation
//! - [`exports`]: exports and the stacks importing them
//! - [`deploy`]: the deployment state machine
//! - [`config`]: settings, deployment files, parameters and tags
//! - [`cli`]: command-line interface
//!
//! ## Example
//!
//! ```yaml
//! # cirrus.yaml
//! aws:
//!   region: eu-west-1
//! changeset:
//!   name_format: "release-%Y%m%d-%H%M%S"
//! tags:
//!   default:
//!     Team: platform
//! prechecks:
//!   commands:
//!     - cfn-lint $TEMPLATEPATH
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod changeset;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod deploy;
pub mod error;
pub mod events;
pub mod exports;
pub mod stack;

// ============================================================================
// Re-exports
// ============================================================================

pub use changeset::{ChangeSet, ChangeSetManager};
pub use cli::{Cli, Commands, OutputFormatter};
pub use cloud::{AwsCloudFormation, CallContext, CloudFormationApi, GuardedCloud, SharedCloud};
pub use config::{CirrusConfig, ConfigParser, ConfigValidator};
pub use deploy::{DeployReport, Deployment, Orchestrator, TerminalState};
pub use error::{CirrusError, Result};
pub use events::{EventCorrelator, EventTailer};
pub use exports::{Export, ExportResolver};
pub use stack::{Readiness, ReadinessClassifier};
