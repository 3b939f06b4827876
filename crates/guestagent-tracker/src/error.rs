//! Error types for port tracking.
//!
//! A single expose or unexpose call fails with an [`ApiError`]. Batch
//! operations never stop at the first failure; they collect every
//! [`BindingFailure`] into a [`FailureList`] and surface it once, wrapped in
//! [`TrackerError::Expose`] or [`TrackerError::Unexpose`].

use std::collections::HashMap;
use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

use crate::portmap::PortBinding;

/// Result type for tracker operations.
pub type TrackerResult<T> = Result<T, TrackerError>;

/// A failed interaction with the host switch or the port forwarder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[error("API error: {message}")]
pub struct ApiError {
    /// Message reported by the remote side or the transport.
    pub message: String,
}

impl ApiError {
    /// Create an API error carrying `message` verbatim.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Which call a binding failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Publishing a binding on the host.
    Expose,
    /// Withdrawing a binding from the host.
    Unexpose,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expose => f.write_str("exposing"),
            Self::Unexpose => f.write_str("unexposing"),
        }
    }
}

/// One binding that could not be exposed or unexposed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingFailure {
    /// The call that failed.
    pub operation: Operation,
    /// Batch the failure happened in, when it is not a plain add/remove.
    pub context: Option<&'static str>,
    /// The binding the call was made for.
    pub binding: PortBinding,
    /// What went wrong.
    pub source: ApiError,
}

impl BindingFailure {
    /// Context used for failures collected by `remove_all`.
    pub const REMOVE_ALL: &'static str = "remove all";

    /// Create a failure without batch context.
    #[must_use]
    pub fn new(operation: Operation, binding: PortBinding, source: ApiError) -> Self {
        Self {
            operation,
            context: None,
            binding,
            source,
        }
    }

    /// Attach batch context to the failure.
    #[must_use]
    pub fn with_context(mut self, context: &'static str) -> Self {
        self.context = Some(context);
        self
    }
}

impl fmt::Display for BindingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(context) = self.context {
            write!(f, "{context} ")?;
        }
        write!(
            f,
            "{} {} failed: {}",
            self.operation, self.binding, self.source
        )
    }
}

impl std::error::Error for BindingFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Failures collected over one batch, in the order they were attempted.
///
/// Equality ignores order: two lists are equal when they hold the same
/// failures the same number of times. Port keys are visited in whatever
/// order the batch walks them, so only the order within one key is
/// meaningful to callers.
#[derive(Debug, Clone, Default)]
pub struct FailureList(Vec<BindingFailure>);

impl FailureList {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure.
    pub fn push(&mut self, failure: BindingFailure) {
        self.0.push(failure);
    }

    /// Number of failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in the order failures were recorded.
    pub fn iter(&self) -> std::slice::Iter<'_, BindingFailure> {
        self.0.iter()
    }

    fn counts(&self) -> HashMap<&BindingFailure, usize> {
        let mut counts = HashMap::with_capacity(self.0.len());
        for failure in &self.0 {
            *counts.entry(failure).or_insert(0) += 1;
        }
        counts
    }
}

impl PartialEq for FailureList {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.counts() == other.counts()
    }
}

impl Eq for FailureList {}

impl From<Vec<BindingFailure>> for FailureList {
    fn from(failures: Vec<BindingFailure>) -> Self {
        Self(failures)
    }
}

impl FromIterator<BindingFailure> for FailureList {
    fn from_iter<I: IntoIterator<Item = BindingFailure>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a FailureList {
    type Item = &'a BindingFailure;
    type IntoIter = std::slice::Iter<'a, BindingFailure>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for FailureList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{failure}")?;
        }
        f.write_str("]")
    }
}

/// Errors from port tracking operations.
#[derive(Debug, Error, Diagnostic)]
pub enum TrackerError {
    /// One or more bindings could not be exposed.
    #[error("expose API failed: {0}")]
    #[diagnostic(
        code(guestagent::tracker::expose),
        help("Bindings that failed are not tracked; the rest stay exposed")
    )]
    Expose(FailureList),

    /// One or more bindings could not be unexposed.
    #[error("unexpose API failed: {0}")]
    #[diagnostic(
        code(guestagent::tracker::unexpose),
        help("The container is no longer tracked; failed bindings may linger on the host")
    )]
    Unexpose(FailureList),

    /// The host switch endpoint is not a usable URL.
    #[error("invalid host switch endpoint '{endpoint}': {reason}")]
    #[diagnostic(code(guestagent::tracker::invalid_endpoint))]
    InvalidEndpoint {
        /// The configured endpoint.
        endpoint: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Unprivileged installs need a forwarder to reach host interfaces.
    #[error("a port forwarder is required when not running as an admin install")]
    #[diagnostic(
        code(guestagent::tracker::missing_forwarder),
        help("Configure a forwarder address or enable the admin install")
    )]
    MissingForwarder,

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    #[diagnostic(code(guestagent::tracker::client))]
    Client(#[from] reqwest::Error),
}

impl TrackerError {
    /// The per-binding failures, if this is a batch error.
    #[must_use]
    pub fn failures(&self) -> Option<&FailureList> {
        match self {
            Self::Expose(failures) | Self::Unexpose(failures) => Some(failures),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn failure(ip: &str, message: &str) -> BindingFailure {
        BindingFailure::new(
            Operation::Expose,
            PortBinding::new(ip, 80),
            ApiError::new(message),
        )
    }

    #[test]
    fn test_api_error_display() {
        let err = ApiError::new("Bad API error");
        assert_eq!(err.to_string(), "API error: Bad API error");
    }

    #[test]
    fn test_binding_failure_display() {
        let err = failure("127.0.0.2", "Bad API error");
        insta::assert_snapshot!(err, @"exposing 127.0.0.2:80 failed: API error: Bad API error");

        let err = BindingFailure::new(
            Operation::Unexpose,
            PortBinding::new("127.0.0.2", 443),
            ApiError::new("timeout"),
        )
        .with_context(BindingFailure::REMOVE_ALL);
        insta::assert_snapshot!(err, @"remove all unexposing 127.0.0.2:443 failed: API error: timeout");
    }

    #[test]
    fn test_tracker_error_display() {
        let err = TrackerError::Expose(vec![failure("127.0.0.2", "a"), failure("127.0.0.3", "b")].into());
        insta::assert_snapshot!(err, @"expose API failed: [exposing 127.0.0.2:80 failed: API error: a, exposing 127.0.0.3:80 failed: API error: b]");
        assert_eq!(err.failures().map(FailureList::len), Some(2));

        assert!(TrackerError::MissingForwarder.failures().is_none());
    }

    #[test]
    fn test_failure_list_counts_duplicates() {
        let a = failure("127.0.0.2", "a");
        let b = failure("127.0.0.3", "b");

        let left = FailureList::from(vec![a.clone(), a.clone(), b.clone()]);
        let right = FailureList::from(vec![a.clone(), b.clone(), b.clone()]);
        assert_ne!(left, right);

        let right = FailureList::from(vec![b, a.clone(), a]);
        assert_eq!(left, right);
    }

    proptest! {
        #[test]
        fn failure_list_equality_ignores_order(
            ips in proptest::collection::vec("127\\.0\\.0\\.[0-9]", 0..8),
            seed in any::<u64>(),
        ) {
            let failures: Vec<_> = ips.iter().map(|ip| failure(ip, "boom")).collect();
            let mut shuffled = failures.clone();
            let len = shuffled.len();
            if len > 1 {
                shuffled.rotate_left((seed as usize) % len);
                shuffled.swap(0, len - 1);
            }
            prop_assert_eq!(FailureList::from(failures), FailureList::from(shuffled));
        }
    }
}
