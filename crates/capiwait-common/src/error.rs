//! Error types for capiwait
//!
//! Errors are structured with fields so callers can branch on the failure
//! category (not-found, permanent failure, stalled rollout, ...) while the
//! rendered message stays readable enough to print verbatim from a CLI.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for capiwait operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The requested object does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Resource kind
        kind: String,
        /// Object name
        name: String,
        /// Object namespace
        namespace: String,
    },

    /// The object exists but has not reached the desired state yet
    #[error("{message}")]
    NotReady {
        /// What is still missing
        message: String,
    },

    /// One or more reads failed while building a cluster snapshot
    #[error(transparent)]
    Retrieval(#[from] AggregateError),

    /// The remote side reported a failure that more polling cannot fix
    #[error("{operation} failed, reason:'{reason}', message:'{message}'")]
    PermanentFailure {
        /// Operation that failed (e.g. "cluster creation")
        operation: String,
        /// Condition reason reported by the controller
        reason: String,
        /// Condition message reported by the controller
        message: String,
    },

    /// Zero or several objects matched where exactly one was expected
    #[error("zero or multiple {kind} objects found for cluster {namespace}/{cluster} (found {count})")]
    AmbiguousTopology {
        /// Resource kind expected to be singular
        kind: String,
        /// Cluster the lookup was scoped to
        cluster: String,
        /// Namespace the lookup was scoped to
        namespace: String,
        /// Number of matches
        count: usize,
    },

    /// No observable progress for longer than the operation timeout
    #[error("timed out waiting for {operation} to complete, no progress observed for {stalled_for:?}: {source}")]
    Stalled {
        /// Operation being waited on
        operation: String,
        /// How long the state stayed unchanged
        stalled_for: Duration,
        /// Last error observed before giving up
        source: Box<Error>,
    },

    /// Hard ceiling reached even though the state kept changing
    #[error("timed out waiting for {operation} to complete, state kept changing for {elapsed:?}: {source}")]
    MaxTimeout {
        /// Operation being waited on
        operation: String,
        /// Total time spent waiting
        elapsed: Duration,
        /// Last error observed before giving up
        source: Box<Error>,
    },

    /// A bounded poll ran out of time
    #[error("{message}: {source}")]
    Timeout {
        /// What was being waited for
        message: String,
        /// Last error returned by the probe
        source: Box<Error>,
    },

    /// An error with one sentence of context about what was being attempted
    #[error("{context}: {source}")]
    Context {
        /// What was being attempted
        context: String,
        /// The underlying error
        source: Box<Error>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being (de)serialized, if known
        kind: Option<String>,
    },

    /// Invalid input supplied by the caller
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred
        context: String,
    },
}

impl Error {
    /// Create a not-found error for the given object
    pub fn not_found(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Create a transient "not there yet" error
    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady {
            message: msg.into(),
        }
    }

    /// Create a permanent failure error from a condition's reason and message
    pub fn permanent_failure(
        operation: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::PermanentFailure {
            operation: operation.into(),
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Create an ambiguous topology error
    pub fn ambiguous_topology(
        kind: impl Into<String>,
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        count: usize,
    ) -> Self {
        Self::AmbiguousTopology {
            kind: kind.into(),
            cluster: cluster.into(),
            namespace: namespace.into(),
            count,
        }
    }

    /// Wrap the last probe error into a poll timeout
    pub fn timeout(msg: impl Into<String>, last: Error) -> Self {
        Self::Timeout {
            message: msg.into(),
            source: Box::new(last),
        }
    }

    /// Wrap this error with context about what was being attempted
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether this error means the object does not exist
    ///
    /// Also recognises raw 404 responses that were not mapped by the backend.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            Self::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Whether waiting longer cannot change the outcome
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::PermanentFailure { .. }
            | Self::AmbiguousTopology { .. }
            | Self::Validation { .. } => true,
            Self::Context { source, .. } => source.is_permanent(),
            _ => false,
        }
    }

    /// Whether this error is one of the timeout flavours
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Stalled { .. } | Self::MaxTimeout { .. }
        )
    }
}

/// A collection of errors gathered without short-circuiting
///
/// Every original error stays inspectable through [`AggregateError::errors`].
/// A single error renders as its own message, several as `[a, b]`.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<Error>,
}

impl AggregateError {
    /// Create an empty aggregate
    pub fn new() -> Self {
        Self::default()
    }

    /// Record another error
    pub fn push(&mut self, err: Error) {
        self.errors.push(err);
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of recorded errors
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// The recorded errors, in the order they were pushed
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Consume the aggregate, returning the recorded errors
    pub fn into_errors(self) -> Vec<Error> {
        self.errors
    }

    /// `None` when empty, otherwise the aggregate itself
    pub fn into_option(self) -> Option<Self> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }

    /// `Ok(())` when empty, otherwise an [`Error::Retrieval`]
    pub fn into_result(self) -> Result<(), Error> {
        match self.into_option() {
            None => Ok(()),
            Some(agg) => Err(Error::Retrieval(agg)),
        }
    }
}

impl FromIterator<Error> for AggregateError {
    fn from_iter<I: IntoIterator<Item = Error>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => Ok(()),
            [only] => write!(f, "{}", only),
            many => {
                write!(f, "[")?;
                for (i, err) in many.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl std::error::Error for AggregateError {}
