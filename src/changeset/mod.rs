//! Change-set building, polling and inspection.
//!
//! A change-set is the provider's preview of a stack update. This module
//! builds the request, waits for the provider to compute the preview,
//! flags replacement-forcing changes, and executes or deletes it.

mod builder;
mod console;
mod danger;
mod inspector;
mod types;

pub use builder::{
    CHANGESET_DESCRIPTION, DEFAULT_NAME_FORMAT, build_request, changeset_name, is_valid_name,
};
pub use console::{ConsoleLocation, console_url, parse_console_url};
pub use danger::{danger_details, is_dangerous, is_no_changes_reason};
pub use inspector::{ChangeSetManager, PollOutcome, PollSettings};
pub use types::ChangeSet;
