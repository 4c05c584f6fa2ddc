//! Replacement-forcing change detection and the "no changes" predicate.

use crate::cloud::{RequiresRecreation, ResourceChange};

/// Status-reason fragments the provider uses for a change-set without changes.
const NO_CHANGES_REASONS: &[&str] = &["didn't contain changes", "No updates"];

/// Describes every detail of `change` that may recreate the resource.
///
/// Each entry reads `"<evaluation>: <attribute> - <causingEntity>"`.
#[must_use]
pub fn danger_details(change: &ResourceChange) -> Vec<String> {
    change
        .details
        .iter()
        .filter(|d| d.requires_recreation != RequiresRecreation::Never)
        .map(|d| {
            format!(
                "{}: {} - {}",
                d.evaluation,
                d.target_attribute,
                d.causing_entity.as_deref().unwrap_or_default()
            )
        })
        .collect()
}

/// True if any detail of `change` may recreate the resource.
#[must_use]
pub fn is_dangerous(change: &ResourceChange) -> bool {
    change
        .details
        .iter()
        .any(|d| d.requires_recreation != RequiresRecreation::Never)
}

/// True if a `FAILED` change-set's reason means it simply had no changes.
#[must_use]
pub fn is_no_changes_reason(reason: &str) -> bool {
    NO_CHANGES_REASONS.iter().any(|r| reason.contains(r))
}
