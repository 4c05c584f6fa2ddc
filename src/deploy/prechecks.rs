//! External precheck commands run against the template.

use std::path::Path;
use std::process::Stdio;

use serde::Serialize;
use tokio::process::Command;
use tracing::{info, warn};

use crate::cloud::CallContext;
use crate::error::{CloudError, DeployError, Result};

/// Placeholder replaced by the template path in precheck commands.
pub const TEMPLATE_PLACEHOLDER: &str = "$TEMPLATEPATH";

/// Outcome of one precheck command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrecheckResult {
    /// Command as run, after substitution.
    pub command: String,
    /// True if the command exited with status zero.
    pub success: bool,
    /// Exit code, if the command exited normally.
    pub exit_code: Option<i32>,
    /// Combined stdout and stderr.
    pub output: String,
}

/// Runs every command through `sh -c`, in order.
///
/// # Errors
///
/// Returns an error if a command cannot be started, or on cancellation.
pub async fn run_prechecks(
    ctx: &CallContext,
    commands: &[String],
    template_path: Option<&Path>,
) -> Result<Vec<PrecheckResult>> {
    let template = template_path
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    let mut results = Vec::with_capacity(commands.len());
    for raw in commands {
        let command = raw.replace(TEMPLATE_PLACEHOLDER, &template);
        info!("Running precheck: {command}");

        let mut shell = Command::new("sh");
        shell
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        let child = shell.output();

        let output = tokio::select! {
            biased;
            () = ctx.cancelled() => return Err(CloudError::cancelled("Precheck").into()),
            output = child => output.map_err(|e| DeployError::PrecheckFailed {
                command: command.clone(),
                message: e.to_string(),
            })?,
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let success = output.status.success();
        if !success {
            warn!("Precheck failed ({}): {command}", output.status);
        }
        results.push(PrecheckResult {
            command,
            success,
            exit_code: output.status.code(),
            output: text,
        });
    }
    Ok(results)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_exit_status_recorded() {
        let commands = vec![String::from("true"), String::from("exit 3")];
        let results = run_prechecks(&CallContext::new(), &commands, None)
            .await
            .unwrap();
        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(results[1].exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_template_path_substituted() {
        let commands = vec![String::from("echo checking $TEMPLATEPATH")];
        let path = PathBuf::from("templates/web.yaml");
        let results = run_prechecks(&CallContext::new(), &commands, Some(&path))
            .await
            .unwrap();
        assert_eq!(results[0].command, "echo checking templates/web.yaml");
        assert_eq!(results[0].output.trim(), "checking templates/web.yaml");
    }

    #[tokio::test]
    async fn test_cancelled_before_run() {
        let ctx = CallContext::new();
        ctx.cancel();
        let commands = vec![String::from("sleep 30")];
        let err = run_prechecks(&ctx, &commands, None).await.unwrap_err();
        assert!(err.is_cancellation());
    }
}
