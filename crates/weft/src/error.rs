// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Error types for the weft runtime
//!
//! Every failure surfaced by the resolver, the pod layer, or the flow engine
//! is one of four structured kinds: schema, factory, dependency, or system.
//! All of them carry an [`ErrorContext`] with a machine-readable [`ErrorCode`],
//! the descriptor the failure is attributed to, and the dependency chain that
//! was being walked when the failure occurred.
//!
//! Errors are cheaply cloneable: a rejected cache cell stores the enhanced
//! error once and every subsequent resolve of that cell rethrows a clone.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Boxed error type accepted from user factories and flow handlers.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shared cause stored inside [`Error::Factory`].
pub type SharedCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for weft operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error category, one per [`Error`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// A value failed schema validation.
    Schema,
    /// A factory failed while producing a value.
    Factory,
    /// A dependency could not be realized.
    Dependency,
    /// Internal runtime failure.
    System,
}

/// Machine-readable error code carried by every error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorCode {
    /// A value did not pass its schema.
    SchemaViolation,
    /// The factory returned an error.
    FactoryFailed,
    /// The descriptor graph contains a cycle.
    DependencyCycle,
    /// A dependency value could not be produced.
    MissingDependency,
    /// A reactive dependency was encountered inside a pod.
    ReactiveInPod,
    /// `release` was called for a descriptor that is not cached.
    ReleaseUnresolved,
    /// The scope has been disposed and rejects all operations.
    ScopeDisposed,
    /// An extension violated the wrap protocol.
    ExtensionProtocol,
    /// A cached value had an unexpected concrete type.
    TypeMismatch,
    /// A required meta attribute or context entry was absent.
    MissingAttribute,
    /// Unclassified internal failure.
    Internal,
}

/// One schema validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    /// Path into the validated value, when known (e.g. `items[2].name`).
    pub path: Option<String>,
    /// Human-readable description of the failure.
    pub message: String,
}

impl Issue {
    /// Issue with no path.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            path: None,
            message: message.into(),
        }
    }

    /// Issue at a specific path.
    pub fn at(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{path}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Attribution attached to every error: code, owning descriptor, and the
/// dependency chain that was in progress when the failure occurred.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Debug name of the descriptor the failure is attributed to.
    pub executor: Option<Arc<str>>,
    /// Resolution chain, outermost first.
    pub chain: Vec<Arc<str>>,
}

impl ErrorContext {
    /// Context with no attribution.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            executor: None,
            chain: Vec::new(),
        }
    }

    /// Context attributed to a named descriptor.
    pub fn for_executor(code: ErrorCode, executor: Arc<str>) -> Self {
        Self {
            code,
            executor: Some(executor),
            chain: Vec::new(),
        }
    }

    /// Attach the resolution chain (outermost first).
    #[must_use]
    pub fn with_chain(mut self, chain: Vec<Arc<str>>) -> Self {
        self.chain = chain;
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.executor {
            Some(name) => write!(f, "`{name}`")?,
            None => f.write_str("`<anonymous>`")?,
        }
        if !self.chain.is_empty() {
            let rendered: Vec<&str> = self.chain.iter().map(|s| s.as_ref()).collect();
            write!(f, " (chain: {})", rendered.join(" -> "))?;
        }
        Ok(())
    }
}

fn render_issues(issues: &[Issue]) -> String {
    if issues.is_empty() {
        return "no issues reported".to_string();
    }
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error type for weft operations
#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A value failed schema validation; carries the individual issues.
    #[error("schema validation failed for {context}: {}", render_issues(.issues))]
    Schema {
        /// Attribution for the failure.
        context: ErrorContext,
        /// The individual validation failures.
        issues: Vec<Issue>,
    },

    /// A factory returned an error while producing a value.
    #[error("factory for {context} failed: {cause}")]
    Factory {
        /// Attribution for the failure.
        context: ErrorContext,
        /// The underlying error returned by the factory.
        cause: SharedCause,
    },

    /// A dependency was missing, cyclic, or otherwise unrealizable.
    #[error("dependency resolution failed for {context}: {reason}")]
    Dependency {
        /// Attribution for the failure.
        context: ErrorContext,
        /// Why the dependency could not be realized.
        reason: String,
    },

    /// Internal post-factory failure (event dispatch, extension protocol, ...).
    #[error("system error for {context}: {message}")]
    System {
        /// Attribution for the failure.
        context: ErrorContext,
        /// Description of the failure.
        message: String,
    },
}

impl Error {
    /// Schema failure attributed to `executor`.
    pub fn schema(executor: Option<Arc<str>>, issues: Vec<Issue>) -> Self {
        Self::Schema {
            context: ErrorContext {
                code: ErrorCode::SchemaViolation,
                executor,
                chain: Vec::new(),
            },
            issues,
        }
    }

    /// Factory failure with the user error as cause.
    pub fn factory(executor: Option<Arc<str>>, cause: BoxedError) -> Self {
        Self::Factory {
            context: ErrorContext {
                code: ErrorCode::FactoryFailed,
                executor,
                chain: Vec::new(),
            },
            cause: Arc::from(cause),
        }
    }

    /// Dependency failure with a specific code.
    pub fn dependency(
        code: ErrorCode,
        executor: Option<Arc<str>>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Dependency {
            context: ErrorContext {
                code,
                executor,
                chain: Vec::new(),
            },
            reason: reason.into(),
        }
    }

    /// System failure with a specific code.
    pub fn system(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::System {
            context: ErrorContext {
                code,
                executor: None,
                chain: Vec::new(),
            },
            message: message.into(),
        }
    }

    /// Unclassified failure, for user code that has no better home.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::system(ErrorCode::Internal, message)
    }

    /// The scope-disposed rejection.
    pub(crate) fn disposed() -> Self {
        Self::system(ErrorCode::ScopeDisposed, "scope has been disposed")
    }

    /// Shared context of any variant.
    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::Schema { context, .. }
            | Self::Factory { context, .. }
            | Self::Dependency { context, .. }
            | Self::System { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::Schema { context, .. }
            | Self::Factory { context, .. }
            | Self::Dependency { context, .. }
            | Self::System { context, .. } => context,
        }
    }

    /// Machine-readable code.
    pub fn code(&self) -> ErrorCode {
        self.context().code
    }

    /// Coarse category, one per variant.
    pub fn category(&self) -> Category {
        match self {
            Self::Schema { .. } => Category::Schema,
            Self::Factory { .. } => Category::Factory,
            Self::Dependency { .. } => Category::Dependency,
            Self::System { .. } => Category::System,
        }
    }

    /// Debug name of the descriptor the failure is attributed to.
    pub fn executor_name(&self) -> Option<&str> {
        self.context().executor.as_deref()
    }

    /// Resolution chain in progress when the failure occurred, outermost first.
    pub fn dependency_chain(&self) -> &[Arc<str>] {
        &self.context().chain
    }

    /// Validation issues, for schema errors.
    pub fn issues(&self) -> Option<&[Issue]> {
        match self {
            Self::Schema { issues, .. } => Some(issues),
            _ => None,
        }
    }

    /// Underlying cause, for factory errors.
    pub fn cause(&self) -> Option<&SharedCause> {
        match self {
            Self::Factory { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// True when the error is the scope-disposed rejection.
    pub fn is_disposed(&self) -> bool {
        self.code() == ErrorCode::ScopeDisposed
    }

    /// Attribute the error to `executor` if it has no attribution yet.
    #[must_use]
    pub(crate) fn attributed_to(mut self, executor: Arc<str>) -> Self {
        let context = self.context_mut();
        if context.executor.is_none() {
            context.executor = Some(executor);
        }
        self
    }

    /// Attach the resolution chain if none was recorded yet.
    #[must_use]
    pub(crate) fn with_chain(mut self, chain: Vec<Arc<str>>) -> Self {
        let context = self.context_mut();
        if context.chain.is_empty() {
            context.chain = chain;
        }
        self
    }
}

impl From<BoxedError> for Error {
    fn from(cause: BoxedError) -> Self {
        match cause.downcast::<Error>() {
            Ok(err) => *err,
            Err(other) => Error::factory(None, other),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_display() {
        let err = Error::schema(
            Some(Arc::from("config")),
            vec![Issue::at("port", "must be positive"), Issue::new("too large")],
        );
        assert_eq!(
            err.to_string(),
            "schema validation failed for `config`: port: must be positive; too large"
        );
    }

    #[test]
    fn test_schema_error_without_issues() {
        let err = Error::schema(None, vec![]);
        assert!(err.to_string().contains("no issues reported"));
        assert!(err.to_string().contains("<anonymous>"));
    }

    #[test]
    fn test_factory_error_carries_cause() {
        let io = std::io::Error::other("disk on fire");
        let err = Error::factory(Some(Arc::from("db")), Box::new(io));
        assert_eq!(err.category(), Category::Factory);
        assert_eq!(err.code(), ErrorCode::FactoryFailed);
        assert!(err.to_string().contains("disk on fire"));
        assert!(err.cause().is_some());
    }

    #[test]
    fn test_dependency_error_chain_rendering() {
        let err = Error::dependency(ErrorCode::DependencyCycle, Some(Arc::from("a")), "cycle")
            .with_chain(vec![Arc::from("a"), Arc::from("b"), Arc::from("a")]);
        assert!(err.to_string().contains("chain: a -> b -> a"));
        assert_eq!(err.dependency_chain().len(), 3);
    }

    #[test]
    fn test_category_mapping() {
        assert_eq!(
            Error::schema(None, vec![]).category(),
            Category::Schema
        );
        assert_eq!(
            Error::dependency(ErrorCode::MissingDependency, None, "x").category(),
            Category::Dependency
        );
        assert_eq!(
            Error::system(ErrorCode::Internal, "x").category(),
            Category::System
        );
    }

    #[test]
    fn test_attribution_does_not_overwrite() {
        let err = Error::schema(Some(Arc::from("first")), vec![]);
        let err = err.attributed_to(Arc::from("second"));
        assert_eq!(err.executor_name(), Some("first"));
    }

    #[test]
    fn test_attribution_fills_anonymous() {
        let err = Error::custom("boom").attributed_to(Arc::from("svc"));
        assert_eq!(err.executor_name(), Some("svc"));
    }

    #[test]
    fn test_disposed_predicate() {
        assert!(Error::disposed().is_disposed());
        assert!(!Error::custom("x").is_disposed());
    }

    #[test]
    fn test_boxed_error_roundtrip_preserves_weft_error() {
        let original = Error::dependency(ErrorCode::ReactiveInPod, Some(Arc::from("r")), "no");
        let boxed: BoxedError = Box::new(original.clone());
        let back: Error = boxed.into();
        assert_eq!(back.code(), ErrorCode::ReactiveInPod);
    }

    #[test]
    fn test_foreign_boxed_error_becomes_factory() {
        let boxed: BoxedError = Box::new(std::io::Error::other("nope"));
        let err: Error = boxed.into();
        assert_eq!(err.category(), Category::Factory);
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn test_error_is_cheaply_cloneable() {
        let err = Error::factory(None, Box::new(std::io::Error::other("once")));
        let clone = err.clone();
        assert_eq!(err.to_string(), clone.to_string());
    }
}
