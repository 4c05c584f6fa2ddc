//! Deployment orchestration.
//!
//! This module contains:
//! - The deployment request ([`Deployment`])
//! - The state machine driving a deployment ([`Orchestrator`])
//! - Approval and reporting seams ([`Approver`], [`DeployReporter`])
//! - Precheck command execution

mod approval;
mod deployment;
mod orchestrator;
mod prechecks;
mod state;

pub use approval::{Approver, AutoApprove, DeployReporter, NoopReporter};
pub use deployment::{Deployment, TemplateSource};
pub use orchestrator::{DeployReport, Orchestrator, OrchestratorSettings};
pub use prechecks::{PrecheckResult, TEMPLATE_PLACEHOLDER, run_prechecks};
pub use state::{DeployState, TerminalState};
