//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use std::time::Duration;
use tabled::{Table, Tabled};

use crate::changeset::{ChangeSet, danger_details};
use crate::cloud::{ChangeAction, StackEvent, StackResource};
use crate::deploy::{DeployReport, TerminalState};
use crate::events::{ResourceDuration, ResourceTimeline};
use crate::exports::Export;
use crate::stack::{Readiness, StackProbe};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Resource change row for table display.
#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Logical ID")]
    logical_id: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Replacement")]
    replacement: String,
}

/// Stack resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Logical ID")]
    logical_id: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Physical ID")]
    physical_id: String,
}

/// Export row for table display.
#[derive(Tabled)]
struct ExportRow {
    #[tabled(rename = "Export")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Stack")]
    stack: String,
    #[tabled(rename = "Imported by")]
    importers: String,
}

/// Operation duration row for table display.
#[derive(Tabled)]
struct DurationRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Operation")]
    operation: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Duration")]
    duration: String,
}

/// Key/value row for parameters, outputs and tags.
#[derive(Tabled)]
struct PairRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns the output format.
    #[must_use]
    pub const fn format(&self) -> OutputFormat {
        self.format
    }

    /// Formats the outcome of a deploy, execute or delete.
    #[must_use]
    pub fn format_report(&self, report: &DeployReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    fn format_report_text(report: &DeployReport) -> String {
        let mut output = String::new();

        if !report.durations.is_empty() {
            output.push_str(&Self::durations_table(&report.durations));
            output.push('\n');
        }

        let state = match report.state {
            TerminalState::Success => report.state.to_string().green(),
            TerminalState::NoChanges => report.state.to_string().cyan(),
            TerminalState::Failed => report.state.to_string().red(),
            TerminalState::Refused => report.state.to_string().yellow(),
        };
        let mode = if report.dry_run { " (dry run)" } else { "" };
        let _ = writeln!(output, "\nStack {}: {state}{mode}", report.stack_name.bold());

        if let Some(status) = report.stack.as_ref().map(|s| s.status.as_str()) {
            let _ = writeln!(output, "   Status: {}", Self::format_status_value(status));
        }
        if let Some(error) = &report.error {
            let _ = writeln!(output, "   {} {error}", "✗".red());
        }
        for check in report.prechecks.iter().filter(|c| !c.success) {
            let _ = writeln!(output, "   {} precheck failed: {}", "✗".red(), check.command);
        }
        if let Some(url) = &report.console_url {
            let _ = writeln!(output, "   Console: {url}");
        }
        output
    }

    /// Formats a change-set, flagging changes that may recreate resources.
    #[must_use]
    pub fn format_changeset(&self, changeset: &ChangeSet, console_url: Option<&str>) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&ChangeSetJson::new(
                changeset,
                console_url,
            ))
            .unwrap_or_default(),
            OutputFormat::Text => Self::format_changeset_text(changeset, console_url),
        }
    }

    fn format_changeset_text(changeset: &ChangeSet, console_url: Option<&str>) -> String {
        let mut output = String::new();

        let _ = writeln!(
            output,
            "\nChange set {} for {} ({})",
            changeset.name.bold(),
            changeset.stack_name,
            Self::format_status_value(&changeset.status)
        );
        if let Some(reason) = &changeset.status_reason {
            let _ = writeln!(output, "   {}", reason.dimmed());
        }

        if changeset.is_empty() {
            output.push_str("   No changes.\n");
        } else {
            let rows: Vec<ChangeRow> = changeset
                .changes()
                .iter()
                .map(|c| ChangeRow {
                    action: Self::format_action(c.action),
                    logical_id: c.logical_id.clone(),
                    resource_type: c.resource_type.clone(),
                    replacement: c
                        .replacement
                        .map(|r| r.to_string())
                        .unwrap_or_default(),
                })
                .collect();
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');

            let _ = writeln!(
                output,
                "\nChanges: {} to add, {} to modify, {} to remove",
                changeset.count(ChangeAction::Add).to_string().green(),
                changeset.count(ChangeAction::Modify).to_string().yellow(),
                changeset.count(ChangeAction::Remove).to_string().red()
            );
        }

        let dangerous: Vec<_> = changeset.dangerous_changes().collect();
        if !dangerous.is_empty() {
            let _ = writeln!(
                output,
                "\n{} Changes that may recreate resources:",
                "⚠".yellow()
            );
            for change in dangerous {
                let _ = writeln!(output, "   {} ({})", change.logical_id, change.resource_type);
                for detail in danger_details(change) {
                    let _ = writeln!(output, "     - {detail}");
                }
            }
        }
        if changeset.has_module() {
            let _ = writeln!(
                output,
                "\n{} Some changes come from nested modules.",
                "ℹ".cyan()
            );
        }

        if let Some(url) = console_url {
            let _ = writeln!(output, "\nConsole: {url}");
        }
        output
    }

    /// Formats a stack's status, parameters, outputs and tags.
    #[must_use]
    pub fn format_status(&self, probe: &StackProbe) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(probe).unwrap_or_default(),
            OutputFormat::Text => Self::format_status_text(probe),
        }
    }

    fn format_status_text(probe: &StackProbe) -> String {
        let Some(stack) = &probe.stack else {
            return String::from("   Stack does not exist.\n");
        };
        let mut output = String::new();

        let readiness = match probe.readiness {
            Readiness::Ready => "ready".green(),
            Readiness::New => "new".cyan(),
            Readiness::Busy => "busy".yellow(),
            Readiness::Failed => "failed".red(),
        };
        let _ = writeln!(
            output,
            "\nStack {}: {} ({readiness})",
            stack.stack_name.bold(),
            Self::format_status_value(&stack.status)
        );
        if let Some(reason) = &stack.status_reason {
            let _ = writeln!(output, "   {}", reason.dimmed());
        }
        let _ = writeln!(output, "   ID: {}", stack.stack_id);
        if let Some(updated) = stack.last_updated_time.or(stack.creation_time) {
            let _ = writeln!(output, "   Updated: {}", updated.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        if let Some(drift) = &stack.drift {
            let _ = writeln!(output, "   Drift: {}", drift.status);
        }

        let sections = [
            (
                "Parameters",
                stack
                    .parameters
                    .iter()
                    .map(|(k, v)| PairRow {
                        key: k.to_string(),
                        value: v.to_string(),
                    })
                    .collect::<Vec<_>>(),
            ),
            (
                "Outputs",
                stack
                    .outputs
                    .iter()
                    .map(|o| PairRow {
                        key: o.key.clone(),
                        value: o.value.clone(),
                    })
                    .collect(),
            ),
            (
                "Tags",
                stack
                    .tags
                    .iter()
                    .map(|(k, v)| PairRow {
                        key: k.to_string(),
                        value: v.to_string(),
                    })
                    .collect(),
            ),
        ];
        for (title, rows) in sections {
            if rows.is_empty() {
                continue;
            }
            let _ = writeln!(output, "\n{title}:");
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }
        output
    }

    /// Formats a stack's resources.
    #[must_use]
    pub fn format_resources(&self, resources: &[StackResource]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(resources).unwrap_or_default(),
            OutputFormat::Text => {
                if resources.is_empty() {
                    return String::from("   No resources.\n");
                }
                let rows: Vec<ResourceRow> = resources
                    .iter()
                    .map(|r| ResourceRow {
                        logical_id: r.logical_id.clone(),
                        resource_type: r.resource_type.clone(),
                        status: Self::format_status_value(&r.status),
                        physical_id: Self::truncate(r.physical_id.as_deref().unwrap_or("-"), 48),
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats exports and their importers.
    #[must_use]
    pub fn format_exports(&self, exports: &[Export]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(exports).unwrap_or_default(),
            OutputFormat::Text => {
                if exports.is_empty() {
                    return String::from("   No exports found.\n");
                }
                let rows: Vec<ExportRow> = exports
                    .iter()
                    .map(|e| ExportRow {
                        name: e.name.clone(),
                        value: Self::truncate(&e.value, 40),
                        stack: e.stack_name.clone(),
                        importers: match &e.import_error {
                            Some(error) => format!("{} {error}", "?".yellow()),
                            None if e.importers.is_empty() => "-".dimmed().to_string(),
                            None => e.importers.join(", "),
                        },
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                let imported = exports.iter().filter(|e| e.imported).count();
                let _ = write!(
                    output,
                    "\n\n{} exports, {imported} imported\n",
                    exports.len()
                );
                output
            }
        }
    }

    /// Formats an event timeline and the durations derived from it.
    #[must_use]
    pub fn format_timeline(
        &self,
        timeline: &ResourceTimeline,
        durations: &[ResourceDuration],
    ) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "timeline": timeline,
                "durations": durations,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                if durations.is_empty() {
                    return String::from("   No events in this period.\n");
                }
                let mut output = Self::durations_table(durations);
                output.push('\n');
                output
            }
        }
    }

    /// Formats one stack event as a single line.
    #[must_use]
    pub fn format_event(event: &StackEvent) -> String {
        let mut line = format!(
            "{}  {:<44} {} {}",
            event.timestamp.format("%H:%M:%S").to_string().dimmed(),
            Self::format_status_value(&event.status),
            event.resource_type,
            event.logical_id
        );
        if let Some(reason) = &event.status_reason {
            let _ = write!(line, "  {}", reason.dimmed());
        }
        line
    }

    fn durations_table(durations: &[ResourceDuration]) -> String {
        let rows: Vec<DurationRow> = durations
            .iter()
            .map(|d| DurationRow {
                resource: d.key.clone(),
                operation: d.operation.clone(),
                status: Self::format_status_value(&d.status),
                duration: d
                    .duration
                    .map_or_else(|| "-".to_string(), Self::format_duration),
            })
            .collect();
        Table::new(rows).to_string()
    }

    /// Formats a change action with color.
    fn format_action(action: ChangeAction) -> String {
        match action {
            ChangeAction::Add => "+add".green().to_string(),
            ChangeAction::Modify => "~modify".yellow().to_string(),
            ChangeAction::Remove => "-remove".red().to_string(),
            ChangeAction::Import => "import".cyan().to_string(),
            ChangeAction::Dynamic => "dynamic".dimmed().to_string(),
        }
    }

    /// Formats a provider status with color.
    fn format_status_value(status: &str) -> String {
        if status.contains("FAILED") || status.contains("ROLLBACK") {
            status.red().to_string()
        } else if status.ends_with("IN_PROGRESS") || status.ends_with("PENDING") {
            status.yellow().to_string()
        } else if status.ends_with("COMPLETE") {
            status.green().to_string()
        } else {
            status.to_string()
        }
    }

    /// Formats a duration as minutes and seconds.
    fn format_duration(duration: Duration) -> String {
        let secs = duration.as_secs();
        if secs < 60 {
            format!("{secs}s")
        } else {
            format!("{}m {:02}s", secs / 60, secs % 60)
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }

    /// Prints a success message.
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Json => Self::print_json("success", message),
            OutputFormat::Text => eprintln!("{} {message}", "✓".green()),
        }
    }

    /// Prints an error message.
    pub fn error(&self, message: &str) {
        match self.format {
            OutputFormat::Json => Self::print_json("error", message),
            OutputFormat::Text => eprintln!("{} {message}", "✗".red()),
        }
    }

    /// Prints a warning message.
    pub fn warning(&self, message: &str) {
        match self.format {
            OutputFormat::Json => Self::print_json("warning", message),
            OutputFormat::Text => eprintln!("{} {message}", "⚠".yellow()),
        }
    }

    fn print_json(status: &str, message: &str) {
        let json = serde_json::json!({ "status": status, "message": message });
        eprintln!("{}", serde_json::to_string(&json).unwrap_or_default());
    }
}

// JSON serialization helpers

#[derive(serde::Serialize)]
struct ChangeSetJson<'a> {
    #[serde(flatten)]
    changeset: &'a ChangeSet,
    dangerous: Vec<DangerJson<'a>>,
    console_url: Option<&'a str>,
}

#[derive(serde::Serialize)]
struct DangerJson<'a> {
    logical_id: &'a str,
    details: Vec<String>,
}

impl<'a> ChangeSetJson<'a> {
    fn new(changeset: &'a ChangeSet, console_url: Option<&'a str>) -> Self {
        Self {
            changeset,
            dangerous: changeset
                .dangerous_changes()
                .map(|c| DangerJson {
                    logical_id: &c.logical_id,
                    details: danger_details(c),
                })
                .collect(),
            console_url,
        }
    }
}
