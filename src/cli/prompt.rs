//! Interactive confirmation on the terminal.

use std::io::{BufRead, Write};

use async_trait::async_trait;
use colored::Colorize;
use tracing::debug;

use crate::changeset::ChangeSet;
use crate::deploy::Approver;
use crate::exports::Export;

/// Asks on stderr and reads the answer from stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptApprover {
    /// Answer yes without asking.
    assume_yes: bool,
}

impl PromptApprover {
    /// Creates an approver. With `assume_yes`, every question is answered yes.
    #[must_use]
    pub const fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }

    /// Prints `question` and reads one line. End of input reads as empty.
    async fn ask(question: String) -> String {
        let answer = tokio::task::spawn_blocking(move || {
            eprint!("{question} ");
            let _ = std::io::stderr().flush();
            let mut line = String::new();
            match std::io::stdin().lock().read_line(&mut line) {
                Ok(_) => line,
                Err(err) => {
                    debug!("Failed to read answer: {err}");
                    String::new()
                }
            }
        })
        .await;
        answer.unwrap_or_default().trim().to_string()
    }
}

/// True for `y` or `yes`, in any case.
#[must_use]
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[async_trait]
impl Approver for PromptApprover {
    async fn approve(&self, changeset: &ChangeSet) -> bool {
        if self.assume_yes {
            return true;
        }
        let question = format!(
            "Execute change set {} on {}? [y/N]",
            changeset.name.bold(),
            changeset.stack_name.bold()
        );
        is_affirmative(&Self::ask(question).await)
    }

    async fn discard_rejected(&self, changeset: &ChangeSet) -> bool {
        if self.assume_yes {
            return false;
        }
        let question = format!("Delete change set {}? [y/N]", changeset.name);
        is_affirmative(&Self::ask(question).await)
    }

    async fn approve_deletion(&self, stack: &str, exports: &[Export]) -> bool {
        if self.assume_yes {
            return true;
        }
        if !exports.is_empty() {
            eprintln!(
                "{} {stack} exports {} value(s) that no stack imports.",
                "⚠".yellow(),
                exports.len()
            );
        }
        let question = format!("Type the stack name ({}) to delete it:", stack.bold());
        Self::ask(question).await == stack
    }
}
