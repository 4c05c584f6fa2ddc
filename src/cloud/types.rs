//! Value types exchanged with the CloudFormation port.
//!
//! Everything here is an immutable copy of provider data or a request
//! built by the core. None of these types hold a connection.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// One page of a paged listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Continuation token for the next page, if any.
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    /// Creates a final page.
    #[must_use]
    pub const fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_token: None,
        }
    }
}

/// Ordered key/value bindings with unique keys.
///
/// Used for stack parameters and tags. Re-inserting a key replaces the
/// value in place, so the first insertion decides the position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings(Vec<(String, String)>);

impl Bindings {
    /// Creates empty bindings.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Inserts or replaces a binding.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    /// Inserts a binding only if the key is not present yet.
    pub fn insert_missing(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if self.get(&key).is_none() {
            self.0.push((key, value.into()));
        }
    }

    /// Merges `other` into `self`; values from `other` win.
    pub fn merge(&mut self, other: &Self) {
        for (key, value) in other.iter() {
            self.insert(key, value);
        }
    }

    /// Looks up a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterates over the bindings in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no bindings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses a `KEY=VALUE` assignment. The value may itself contain `=`.
    #[must_use]
    pub fn parse_assignment(input: &str) -> Option<(String, String)> {
        let (key, value) = input.split_once('=')?;
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        Some((key.to_string(), value.to_string()))
    }
}

impl FromIterator<(String, String)> for Bindings {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut bindings = Self::new();
        for (key, value) in iter {
            bindings.insert(key, value);
        }
        bindings
    }
}

impl Serialize for Bindings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// One stack output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackOutput {
    /// Output key.
    pub key: String,
    /// Output value.
    pub value: String,
    /// Optional description.
    pub description: Option<String>,
    /// Export name, if the output is exported.
    pub export_name: Option<String>,
}

/// Last known drift information of a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftInfo {
    /// Drift status (`DRIFTED`, `IN_SYNC`, `NOT_CHECKED`, `UNKNOWN`).
    pub status: String,
    /// When drift was last checked.
    pub last_checked: Option<DateTime<Utc>>,
}

/// Point-in-time copy of a stack description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackSnapshot {
    /// Stack ARN.
    pub stack_id: String,
    /// Stack name.
    pub stack_name: String,
    /// Raw stack status.
    pub status: String,
    /// Reason attached to the status.
    pub status_reason: Option<String>,
    /// Creation time.
    pub creation_time: Option<DateTime<Utc>>,
    /// Last update time.
    pub last_updated_time: Option<DateTime<Utc>>,
    /// Parameters.
    pub parameters: Bindings,
    /// Outputs.
    pub outputs: Vec<StackOutput>,
    /// Tags.
    pub tags: Bindings,
    /// Drift information.
    pub drift: Option<DriftInfo>,
}

impl StackSnapshot {
    /// Creates a minimal snapshot, mostly useful for fakes.
    #[must_use]
    pub fn new(stack_id: &str, stack_name: &str, status: &str) -> Self {
        Self {
            stack_id: stack_id.to_string(),
            stack_name: stack_name.to_string(),
            status: status.to_string(),
            status_reason: None,
            creation_time: None,
            last_updated_time: None,
            parameters: Bindings::new(),
            outputs: Vec::new(),
            tags: Bindings::new(),
            drift: None,
        }
    }

    /// Outputs that carry a non-empty export name.
    pub fn exported_outputs(&self) -> impl Iterator<Item = &StackOutput> {
        self.outputs
            .iter()
            .filter(|o| o.export_name.as_deref().is_some_and(|n| !n.is_empty()))
    }
}

/// One entry of a stack's event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackEvent {
    /// Unique event id.
    pub event_id: String,
    /// Stack name.
    pub stack_name: String,
    /// Logical resource id.
    pub logical_id: String,
    /// Resource type (e.g. `AWS::S3::Bucket`).
    pub resource_type: String,
    /// Resource status (e.g. `CREATE_IN_PROGRESS`).
    pub status: String,
    /// Optional reason.
    pub status_reason: Option<String>,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
}

/// One resource of a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackResource {
    /// Logical resource id.
    pub logical_id: String,
    /// Physical resource id.
    pub physical_id: Option<String>,
    /// Resource type.
    pub resource_type: String,
    /// Resource status.
    pub status: String,
    /// Reason attached to the status.
    pub status_reason: Option<String>,
    /// Last status change.
    pub timestamp: Option<DateTime<Utc>>,
}

macro_rules! provider_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Provider spelling of this value.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} value '{other}'", stringify!($name))),
                }
            }
        }
    };
}

provider_enum! {
    /// What a change does to a resource.
    ChangeAction {
        /// Resource is added.
        Add => "Add",
        /// Resource is modified.
        Modify => "Modify",
        /// Resource is removed.
        Remove => "Remove",
        /// Resource is imported.
        Import => "Import",
        /// Change depends on values only known at execution time.
        Dynamic => "Dynamic",
    }
}

provider_enum! {
    /// Whether the provider will replace the resource.
    Replacement {
        /// Resource is replaced.
        True => "True",
        /// Resource is updated in place.
        False => "False",
        /// Replacement depends on runtime values.
        Conditional => "Conditional",
        /// Resource is never replaced.
        Never => "Never",
    }
}

provider_enum! {
    /// Whether a property change forces recreation.
    RequiresRecreation {
        /// Never recreates.
        Never => "Never",
        /// Recreates depending on runtime values.
        Conditionally => "Conditionally",
        /// Always recreates.
        Always => "Always",
    }
}

provider_enum! {
    /// When the provider evaluated a change detail.
    Evaluation {
        /// Known before execution.
        Static => "Static",
        /// Only known during execution.
        Dynamic => "Dynamic",
    }
}

provider_enum! {
    /// Change-set operation type.
    ChangeSetType {
        /// Change-set creates a new stack.
        Create => "CREATE",
        /// Change-set updates an existing stack.
        Update => "UPDATE",
    }
}

/// Property-level record of a resource change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeDetail {
    /// When the change was evaluated.
    pub evaluation: Evaluation,
    /// Target attribute, e.g. `Properties.BucketName`.
    pub target_attribute: String,
    /// Whether the change forces recreation.
    pub requires_recreation: RequiresRecreation,
    /// Entity that caused the change.
    pub causing_entity: Option<String>,
}

/// One row of a change-set preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceChange {
    /// What happens to the resource.
    pub action: ChangeAction,
    /// Logical resource id.
    pub logical_id: String,
    /// Replacement policy.
    pub replacement: Option<Replacement>,
    /// Resource type.
    pub resource_type: String,
    /// Physical id for existing resources.
    pub physical_id: Option<String>,
    /// Nested module path; empty when the resource is declared directly.
    pub module_path: String,
    /// Property-level details.
    pub details: Vec<ChangeDetail>,
}

/// Template source of a change-set request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSetTemplate {
    /// Inline template body.
    Body(String),
    /// Template stored at a URL (typically S3).
    Url(String),
    /// Reuse the template the stack was last deployed with.
    UsePrevious,
}

/// `CreateChangeSet` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateChangeSetRequest {
    /// Stack name.
    pub stack_name: String,
    /// Change-set name.
    pub change_set_name: String,
    /// Operation type.
    pub change_set_type: ChangeSetType,
    /// Template source.
    pub template: ChangeSetTemplate,
    /// Parameters.
    pub parameters: Bindings,
    /// Tags.
    pub tags: Bindings,
    /// Capabilities, forwarded verbatim.
    pub capabilities: Vec<String>,
    /// Idempotency token.
    pub client_token: String,
    /// Optional description.
    pub description: Option<String>,
}

/// Identifiers returned by `CreateChangeSet`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedChangeSet {
    /// Change-set ARN.
    pub id: String,
    /// Stack ARN.
    pub stack_id: String,
}

/// Address of an existing change-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetRef {
    /// Change-set name or ARN.
    pub change_set: String,
    /// Stack name or ARN; required when `change_set` is a bare name.
    pub stack_name: Option<String>,
}

impl ChangeSetRef {
    /// Addresses a change-set by ARN.
    #[must_use]
    pub fn by_id(id: &str) -> Self {
        Self {
            change_set: id.to_string(),
            stack_name: None,
        }
    }

    /// Addresses a change-set by name within a stack.
    #[must_use]
    pub fn by_name(stack: &str, name: &str) -> Self {
        Self {
            change_set: name.to_string(),
            stack_name: Some(stack.to_string()),
        }
    }
}

/// `DescribeChangeSet` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescribeChangeSetRequest {
    /// Change-set address.
    pub change_set: ChangeSetRef,
    /// Continuation token.
    pub next_token: Option<String>,
}

/// One page of a `DescribeChangeSet` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetPage {
    /// Change-set ARN.
    pub id: String,
    /// Change-set name.
    pub name: String,
    /// Stack ARN.
    pub stack_id: String,
    /// Stack name.
    pub stack_name: String,
    /// Creation time.
    pub creation_time: Option<DateTime<Utc>>,
    /// Change-set status.
    pub status: String,
    /// Reason attached to the status.
    pub status_reason: Option<String>,
    /// Execution status.
    pub execution_status: Option<String>,
    /// Changes on this page.
    pub changes: Vec<ResourceChange>,
    /// Continuation token.
    pub next_token: Option<String>,
}

/// `DescribeStacks` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescribeStacksRequest {
    /// Stack name or ARN; `None` lists every stack.
    pub stack_name: Option<String>,
    /// Continuation token.
    pub next_token: Option<String>,
}

/// `DescribeStackEvents` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescribeEventsRequest {
    /// Stack name or ARN.
    pub stack_name: String,
    /// Continuation token.
    pub next_token: Option<String>,
}

/// `ListImports` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListImportsRequest {
    /// Export name.
    pub export_name: String,
    /// Continuation token.
    pub next_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bindings_keep_first_position() {
        let mut bindings = Bindings::new();
        bindings.insert("Env", "dev");
        bindings.insert("Owner", "ops");
        bindings.insert("Env", "prod");

        let pairs: Vec<_> = bindings.iter().collect();
        assert_eq!(pairs, vec![("Env", "prod"), ("Owner", "ops")]);
    }

    #[test]
    fn test_insert_missing_does_not_override() {
        let mut bindings = Bindings::new();
        bindings.insert("Env", "prod");
        bindings.insert_missing("Env", "dev");
        bindings.insert_missing("Team", "core");
        assert_eq!(bindings.get("Env"), Some("prod"));
        assert_eq!(bindings.get("Team"), Some("core"));
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            Bindings::parse_assignment("Url=https://a?b=c"),
            Some((String::from("Url"), String::from("https://a?b=c")))
        );
        assert_eq!(Bindings::parse_assignment("=x"), None);
        assert_eq!(Bindings::parse_assignment("novalue"), None);
    }

    #[test]
    fn test_bindings_serialize_as_ordered_map() {
        let bindings: Bindings = vec![
            (String::from("b"), String::from("1")),
            (String::from("a"), String::from("2")),
        ]
        .into_iter()
        .collect();
        let json = serde_json::to_string(&bindings).unwrap();
        assert_eq!(json, r#"{"b":"1","a":"2"}"#);
    }

    #[test]
    fn test_provider_enum_round_trip() {
        assert_eq!("Modify".parse::<ChangeAction>(), Ok(ChangeAction::Modify));
        assert_eq!(RequiresRecreation::Always.to_string(), "Always");
        assert!("Sometimes".parse::<RequiresRecreation>().is_err());
        assert_eq!(ChangeSetType::Create.as_str(), "CREATE");
    }

    #[test]
    fn test_exported_outputs_skip_empty_names() {
        let mut stack = StackSnapshot::new("arn:stack/s/1", "s", "CREATE_COMPLETE");
        stack.outputs = vec![
            StackOutput {
                key: String::from("A"),
                value: String::from("1"),
                description: None,
                export_name: Some(String::from("s-A")),
            },
            StackOutput {
                key: String::from("B"),
                value: String::from("2"),
                description: None,
                export_name: Some(String::new()),
            },
            StackOutput {
                key: String::from("C"),
                value: String::from("3"),
                description: None,
                export_name: None,
            },
        ];
        let keys: Vec<_> = stack.exported_outputs().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["A"]);
    }
}
