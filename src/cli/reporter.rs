//! Live progress on the terminal.

use colored::Colorize;

use crate::changeset::ChangeSet;
use crate::cloud::StackEvent;
use crate::deploy::{DeployReporter, DeployState};

use super::commands::OutputFormat;
use super::output::OutputFormatter;

/// Prints the change-set and stack events to stderr as they arrive.
///
/// In JSON mode nothing is printed; the final report carries everything.
#[derive(Debug)]
pub struct ConsoleReporter {
    /// Formatter for the change-set preview.
    formatter: OutputFormatter,
    /// Region used for console links.
    region: Option<String>,
}

impl ConsoleReporter {
    /// Creates a reporter.
    #[must_use]
    pub const fn new(format: OutputFormat, region: Option<String>) -> Self {
        Self {
            formatter: OutputFormatter::new(format),
            region,
        }
    }

    fn quiet(&self) -> bool {
        self.formatter.format() == OutputFormat::Json
    }
}

impl DeployReporter for ConsoleReporter {
    fn on_state(&self, stack: &str, state: DeployState) {
        if self.quiet() {
            return;
        }
        match state {
            DeployState::PollChangeSet => {
                eprintln!("{} Waiting for the change set of {stack}...", "⏳".cyan());
            }
            DeployState::TailEvents => {
                eprintln!("{} Following events of {stack}...", "⏳".cyan());
            }
            _ => {}
        }
    }

    fn on_changeset(&self, changeset: &ChangeSet) {
        if self.quiet() {
            return;
        }
        let url = self.region.as_deref().map(|region| {
            crate::changeset::console_url(region, &changeset.stack_id, &changeset.id)
        });
        eprint!("{}", self.formatter.format_changeset(changeset, url.as_deref()));
    }

    fn on_event(&self, event: &StackEvent) {
        if self.quiet() {
            return;
        }
        eprintln!("{}", OutputFormatter::format_event(event));
    }
}
