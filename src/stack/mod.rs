//! Stack lookup and readiness.
//!
//! Decides whether a stack is new, ready for an update, busy, or failed.

mod names;
mod readiness;

pub use names::{canonical_stack_name, glob_to_regex, is_glob};
pub use readiness::{
    REVIEW_IN_PROGRESS, Readiness, ReadinessClassifier, StackProbe, classify_status,
    is_in_progress, is_successful_terminal,
};
