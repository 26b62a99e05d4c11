//! Error types for the scope engine.
//!
//! Two layers of errors exist:
//!
//! - [`ScopeError`] - everything the engine itself can report: configuration
//!   errors caught at scope construction, usage errors (double save, disposal
//!   out of order), and collaborator failures it propagates.
//! - [`ContextError`] - the error type persistence-context implementations
//!   report from their own operations (construction, commit, transaction
//!   control). The engine never inspects these; it forwards them unchanged.

use thiserror::Error;

/// An error reported by a persistence-context collaborator.
///
/// Adapters construct these from whatever their underlying store surfaces.
/// The engine treats them as opaque and propagates them to the caller
/// without retrying.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ContextError {
    message: String,
    #[source]
    source: Option<Box<dyn core::error::Error + Send + Sync>>,
}

impl ContextError {
    /// Creates a context error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a context error wrapping an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn core::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Errors reported by scopes, collections and the factory.
#[derive(Debug, Error)]
pub enum ScopeError {
    /// An explicit isolation level was combined with `ScopeOption::JoinExisting`.
    ///
    /// An explicit isolation level implies a standalone transaction, which is
    /// incompatible with inheriting a parent scope's context collection.
    #[error(
        "cannot join the ambient scope when an explicit transaction isolation level is required; \
         request a new scope instead (ScopeOption::ForceCreateNew)"
    )]
    IsolationRequiresOwnScope,

    /// A read/write scope attempted to join a read-only parent scope.
    #[error("cannot open a read/write scope within a read-only scope")]
    ReadWriteWithinReadOnly,

    /// No constructor has been registered for the requested context type.
    #[error("no constructor registered for persistence context type `{0}`")]
    UnregisteredContext(&'static str),

    /// `save_changes` was called a second time on the same scope.
    ///
    /// A scope encapsulates one business transaction: create it at the start,
    /// save exactly once at the end.
    #[error("save_changes may only be called once per scope")]
    AlreadyCompleted,

    /// The scope has already been disposed.
    #[error("scope has already been disposed")]
    ScopeDisposed,

    /// The context collection has already been disposed.
    #[error("context collection has already been disposed")]
    CollectionDisposed,

    /// Scopes were disposed out of creation order.
    ///
    /// A scope may only be disposed while it is the ambient one, i.e. in
    /// exact reverse order of construction within a logical flow.
    #[error("scopes must be disposed in the reverse order in which they were created")]
    OutOfOrderDisposal,

    /// The commit was cancelled before it completed.
    ///
    /// The scope is left not-completed; disposing it rolls back as usual.
    #[error("commit was cancelled before completion")]
    Cancelled,

    /// A persistence context reported a failure.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// One or more contexts failed to roll back.
    ///
    /// Every context gets a rollback attempt before this is reported; the
    /// individual failures are collected rather than surfacing only the first.
    #[error("rollback failed for {} of the scope's contexts", .0.len())]
    Rollback(Vec<ContextError>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_error_display() {
        let err = ContextError::new("store unavailable");
        assert_eq!(err.to_string(), "store unavailable");
    }

    #[test]
    fn context_error_exposes_source() {
        let io = std::io::Error::other("disk full");
        let err = ContextError::with_source("flush failed", io);
        assert_eq!(err.to_string(), "flush failed");
        assert!(core::error::Error::source(&err).is_some());
    }

    #[test]
    fn rollback_error_counts_failures() {
        let err = ScopeError::Rollback(vec![
            ContextError::new("a"),
            ContextError::new("b"),
        ]);
        assert!(err.to_string().contains('2'));
    }
}
