//! Error types for the Cirrus deployment tool.
//!
//! This module provides the error hierarchy for every stage of a
//! deployment: configuration, the cloud API port, change-set handling,
//! and the deployment orchestrator.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for Cirrus.
#[derive(Debug, Error)]
pub enum CirrusError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Errors returned by the cloud API port.
    #[error("CloudFormation error: {0}")]
    Cloud(#[from] CloudError),

    /// Change-set lifecycle errors.
    #[error("Change set error: {0}")]
    ChangeSet(#[from] ChangeSetError),

    /// Deployment orchestration errors.
    #[error("Deployment error: {0}")]
    Deploy(#[from] DeployError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Fieldless discriminant of a [`CloudError`], used for policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudErrorKind {
    /// The addressed stack, change-set or export does not exist.
    NotFound,
    /// The provider rate limit was hit.
    Throttled,
    /// The request was rejected as invalid (e.g. missing capability).
    Validation,
    /// The resource already exists.
    AlreadyExists,
    /// The caller is not allowed to perform the operation.
    Unauthorized,
    /// Another operation is in progress on the resource.
    Conflict,
    /// The call was cancelled locally.
    Cancelled,
    /// The call's deadline passed.
    DeadlineExceeded,
    /// Anything else.
    Generic,
}

/// Tagged error returned by every cloud API port operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CloudError {
    /// The addressed resource does not exist.
    #[error("{operation}: not found: {message}")]
    NotFound {
        /// Port operation that failed.
        operation: String,
        /// Provider message.
        message: String,
    },

    /// Rate limited by the provider.
    #[error("{operation}: throttled: {message}")]
    Throttled {
        /// Port operation that failed.
        operation: String,
        /// Provider message.
        message: String,
    },

    /// Request rejected as invalid.
    #[error("{operation}: {message}")]
    Validation {
        /// Port operation that failed.
        operation: String,
        /// Provider message, preserved verbatim.
        message: String,
    },

    /// Resource already exists.
    #[error("{operation}: already exists: {message}")]
    AlreadyExists {
        /// Port operation that failed.
        operation: String,
        /// Provider message.
        message: String,
    },

    /// Not authorized.
    #[error("{operation}: unauthorized: {message}")]
    Unauthorized {
        /// Port operation that failed.
        operation: String,
        /// Provider message.
        message: String,
    },

    /// Operation in progress on the same resource.
    #[error("{operation}: conflicting operation in progress: {message}")]
    Conflict {
        /// Port operation that failed.
        operation: String,
        /// Provider message.
        message: String,
    },

    /// Cancelled locally.
    #[error("{operation}: cancelled")]
    Cancelled {
        /// Port operation that was cancelled.
        operation: String,
    },

    /// Deadline passed before the call finished.
    #[error("{operation}: deadline exceeded")]
    DeadlineExceeded {
        /// Port operation that timed out.
        operation: String,
    },

    /// Any other provider or transport error.
    #[error("{operation}: {message}")]
    Generic {
        /// Port operation that failed.
        operation: String,
        /// Provider message, preserved verbatim.
        message: String,
    },
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A referenced file was not found.
    #[error("File not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// A file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// No template source was supplied.
    #[error("No template source for stack {stack}: supply a template body, a template URL, or reuse the previous template")]
    MissingTemplate {
        /// Stack being deployed.
        stack: String,
    },

    /// More than one template source was supplied.
    #[error("Conflicting template sources for stack {stack}: {sources}")]
    ConflictingTemplates {
        /// Stack being deployed.
        stack: String,
        /// The sources that were supplied.
        sources: String,
    },

    /// `UsePreviousTemplate` was requested for a stack that does not exist yet.
    #[error("Stack {stack} does not exist yet, so there is no previous template to reuse")]
    NoPreviousTemplate {
        /// Stack being deployed.
        stack: String,
    },

    /// A `KEY=VALUE` binding could not be parsed.
    #[error("Invalid binding '{input}': expected KEY=VALUE")]
    InvalidBinding {
        /// Raw input.
        input: String,
    },

    /// The same key appears twice in one parameter or tag list.
    #[error("Duplicate key '{key}' in {location}")]
    DuplicateBinding {
        /// Repeated key.
        key: String,
        /// File or section containing the list.
        location: String,
    },
}

/// Change-set lifecycle errors.
#[derive(Debug, Error)]
pub enum ChangeSetError {
    /// The provider did not return an identifier for the new change-set.
    #[error("Change set {name} was not created: {message}")]
    CreationFailed {
        /// Change-set name.
        name: String,
        /// Description of the failure.
        message: String,
    },

    /// The change-set did not reach a terminal status in time.
    #[error("Timed out after {waited_secs}s waiting for change set {name} (last status {status})")]
    Timeout {
        /// Change-set name.
        name: String,
        /// Last observed status.
        status: String,
        /// Seconds waited.
        waited_secs: u64,
    },

    /// The provider returned a value this tool does not understand.
    #[error("Unexpected change set data: {message}")]
    Malformed {
        /// Description of the problem.
        message: String,
    },
}

/// Deployment orchestration errors.
#[derive(Debug, Error)]
pub enum DeployError {
    /// A stack lookup by name matched several stacks.
    #[error("Lookup of stack {name} returned {count} stacks")]
    AmbiguousStack {
        /// Name that was looked up.
        name: String,
        /// Number of stacks returned.
        count: usize,
    },

    /// The deployment was cancelled once the execution request had been sent.
    #[error("Cancelled after change set {changeset} was submitted for stack {stack}; it may have been executed and the stack operation may continue remotely")]
    CancelledAfterExecute {
        /// Stack being deployed.
        stack: String,
        /// Submitted change-set.
        changeset: String,
    },

    /// A precheck command could not be started.
    #[error("Precheck '{command}' could not be run: {message}")]
    PrecheckFailed {
        /// Command that failed.
        command: String,
        /// Description of the failure.
        message: String,
    },
}

/// Result type alias for Cirrus operations.
pub type Result<T> = std::result::Result<T, CirrusError>;

/// Result type alias for cloud API port operations.
pub type CloudResult<T> = std::result::Result<T, CloudError>;

impl CirrusError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the cloud error kind if this error came from the port.
    #[must_use]
    pub const fn cloud_kind(&self) -> Option<CloudErrorKind> {
        match self {
            Self::Cloud(err) => Some(err.kind()),
            _ => None,
        }
    }

    /// Returns true if the operation was cancelled or ran out of time.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(
            self.cloud_kind(),
            Some(CloudErrorKind::Cancelled | CloudErrorKind::DeadlineExceeded)
        )
    }
}

impl CloudError {
    /// Returns the fieldless kind of this error.
    #[must_use]
    pub const fn kind(&self) -> CloudErrorKind {
        match self {
            Self::NotFound { .. } => CloudErrorKind::NotFound,
            Self::Throttled { .. } => CloudErrorKind::Throttled,
            Self::Validation { .. } => CloudErrorKind::Validation,
            Self::AlreadyExists { .. } => CloudErrorKind::AlreadyExists,
            Self::Unauthorized { .. } => CloudErrorKind::Unauthorized,
            Self::Conflict { .. } => CloudErrorKind::Conflict,
            Self::Cancelled { .. } => CloudErrorKind::Cancelled,
            Self::DeadlineExceeded { .. } => CloudErrorKind::DeadlineExceeded,
            Self::Generic { .. } => CloudErrorKind::Generic,
        }
    }

    /// Builds an error of the given kind.
    #[must_use]
    pub fn new(kind: CloudErrorKind, operation: &str, message: impl Into<String>) -> Self {
        let operation = operation.to_string();
        let message = message.into();
        match kind {
            CloudErrorKind::NotFound => Self::NotFound { operation, message },
            CloudErrorKind::Throttled => Self::Throttled { operation, message },
            CloudErrorKind::Validation => Self::Validation { operation, message },
            CloudErrorKind::AlreadyExists => Self::AlreadyExists { operation, message },
            CloudErrorKind::Unauthorized => Self::Unauthorized { operation, message },
            CloudErrorKind::Conflict => Self::Conflict { operation, message },
            CloudErrorKind::Cancelled => Self::Cancelled { operation },
            CloudErrorKind::DeadlineExceeded => Self::DeadlineExceeded { operation },
            CloudErrorKind::Generic => Self::Generic { operation, message },
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(operation: &str, message: impl Into<String>) -> Self {
        Self::new(CloudErrorKind::NotFound, operation, message)
    }

    /// Creates a throttling error.
    #[must_use]
    pub fn throttled(operation: &str) -> Self {
        Self::new(CloudErrorKind::Throttled, operation, "Rate exceeded")
    }

    /// Creates a generic error.
    #[must_use]
    pub fn generic(operation: &str, message: impl Into<String>) -> Self {
        Self::new(CloudErrorKind::Generic, operation, message)
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(operation: &str) -> Self {
        Self::new(CloudErrorKind::Cancelled, operation, "")
    }

    /// Creates a deadline error.
    #[must_use]
    pub fn deadline_exceeded(operation: &str) -> Self {
        Self::new(CloudErrorKind::DeadlineExceeded, operation, "")
    }

    /// Returns the port operation this error came from.
    #[must_use]
    pub fn operation(&self) -> &str {
        match self {
            Self::NotFound { operation, .. }
            | Self::Throttled { operation, .. }
            | Self::Validation { operation, .. }
            | Self::AlreadyExists { operation, .. }
            | Self::Unauthorized { operation, .. }
            | Self::Conflict { operation, .. }
            | Self::Cancelled { operation }
            | Self::DeadlineExceeded { operation }
            | Self::Generic { operation, .. } => operation,
        }
    }

    /// Returns the provider message, empty for local cancellation.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound { message, .. }
            | Self::Throttled { message, .. }
            | Self::Validation { message, .. }
            | Self::AlreadyExists { message, .. }
            | Self::Unauthorized { message, .. }
            | Self::Conflict { message, .. }
            | Self::Generic { message, .. } => message,
            Self::Cancelled { .. } | Self::DeadlineExceeded { .. } => "",
        }
    }

    /// Returns true for throttling errors.
    #[must_use]
    pub const fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }

    /// Returns true for not-found errors.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Maps a provider error code and message onto a [`CloudErrorKind`].
///
/// This is the only place that interprets provider error codes.
#[must_use]
pub fn classify_provider_error(code: Option<&str>, message: &str) -> CloudErrorKind {
    let code = code.unwrap_or_default();
    match code {
        "Throttling" | "ThrottlingException" | "RequestLimitExceeded"
        | "TooManyRequestsException" => return CloudErrorKind::Throttled,
        "ChangeSetNotFound" | "ChangeSetNotFoundException" | "StackNotFoundException" => {
            return CloudErrorKind::NotFound;
        }
        "AlreadyExistsException" | "NameAlreadyExistsException" => {
            return CloudErrorKind::AlreadyExists;
        }
        "AccessDenied" | "AccessDeniedException" | "UnauthorizedOperation" | "ExpiredToken"
        | "InvalidClientTokenId" | "UnrecognizedClientException" => {
            return CloudErrorKind::Unauthorized;
        }
        "OperationInProgressException"
        | "TokenAlreadyExistsException"
        | "InvalidChangeSetStatus"
        | "InvalidChangeSetStatusException" => return CloudErrorKind::Conflict,
        _ => {}
    }

    if message.contains("does not exist")
        || message.contains("not found")
        || message.contains("is not imported by any stack")
    {
        return CloudErrorKind::NotFound;
    }
    if message.contains("is in") && message.contains("_IN_PROGRESS state") {
        return CloudErrorKind::Conflict;
    }

    match code {
        "ValidationError" | "InsufficientCapabilitiesException" => CloudErrorKind::Validation,
        _ => CloudErrorKind::Generic,
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }

    /// Creates a parse error for a file.
    #[must_use]
    pub fn parse(message: impl Into<String>, location: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
            location: Some(location.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_missing_is_not_found() {
        let kind = classify_provider_error(
            Some("ValidationError"),
            "Stack with id my-stack does not exist",
        );
        assert_eq!(kind, CloudErrorKind::NotFound);
    }

    #[test]
    fn test_missing_capability_is_validation() {
        let kind = classify_provider_error(
            Some("InsufficientCapabilitiesException"),
            "Requires capabilities : [CAPABILITY_IAM]",
        );
        assert_eq!(kind, CloudErrorKind::Validation);
    }

    #[test]
    fn test_throttling_codes() {
        assert_eq!(
            classify_provider_error(Some("Throttling"), "Rate exceeded"),
            CloudErrorKind::Throttled
        );
        assert_eq!(
            classify_provider_error(Some("RequestLimitExceeded"), ""),
            CloudErrorKind::Throttled
        );
    }

    #[test]
    fn test_in_progress_message_is_conflict() {
        let kind = classify_provider_error(
            Some("ValidationError"),
            "Stack:arn:aws:cloudformation:eu-west-1:1:stack/s/1 is in UPDATE_IN_PROGRESS state and can not be updated.",
        );
        assert_eq!(kind, CloudErrorKind::Conflict);
    }

    #[test]
    fn test_unimported_export_is_not_found() {
        let kind = classify_provider_error(
            Some("ValidationError"),
            "Export 'vpc-id' is not imported by any stack.",
        );
        assert_eq!(kind, CloudErrorKind::NotFound);
    }

    #[test]
    fn test_unknown_is_generic() {
        assert_eq!(
            classify_provider_error(None, "connection reset"),
            CloudErrorKind::Generic
        );
    }

    #[test]
    fn test_message_preserved() {
        let err = CloudError::new(CloudErrorKind::Validation, "CreateChangeSet", "Requires CAPABILITY_IAM");
        assert_eq!(err.message(), "Requires CAPABILITY_IAM");
        assert_eq!(err.operation(), "CreateChangeSet");
        assert_eq!(err.to_string(), "CreateChangeSet: Requires CAPABILITY_IAM");
    }

    #[test]
    fn test_cancellation_detection() {
        let err = CirrusError::from(CloudError::cancelled("DescribeStacks"));
        assert!(err.is_cancellation());
        let err = CirrusError::internal("boom");
        assert!(!err.is_cancellation());
    }
}
