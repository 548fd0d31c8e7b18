//! Severity classification shared by formkit error types
//!
//! Each crate defines its own `thiserror` enum and implements [`Severity`] so
//! embedders can pick a log level or presentation without matching on every
//! variant of every crate.

/// Severity levels for error classification
///
/// - **Warning**: Recoverable and local, e.g. a field failing validation.
/// - **Error**: An operation failed but the form stays usable, e.g. a save
///   rejected by the backend.
/// - **Critical**: A programmer error such as data that does not match the
///   declared entity shape.
///
/// ```rust
/// use formkit_common::ErrorSeverity;
///
/// let rejected_save = ErrorSeverity::Error;
/// assert!(rejected_save > ErrorSeverity::Warning);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Potential issue, the operation can proceed
    Warning,

    /// Operation failed, the system continues
    Error,

    /// Broken invariant, requires a code fix
    Critical,
}

impl ErrorSeverity {
    /// Emit `message` through tracing at the level matching this severity.
    pub fn log(self, message: &str) {
        match self {
            ErrorSeverity::Warning => tracing::warn!("{message}"),
            ErrorSeverity::Error | ErrorSeverity::Critical => tracing::error!("{message}"),
        }
    }
}

/// Trait for error types that have severity levels
///
/// ```rust
/// use formkit_common::{ErrorSeverity, Severity};
///
/// #[derive(Debug)]
/// enum MyError {
///     ShapeMismatch,
///     Rejected,
/// }
///
/// impl Severity for MyError {
///     fn severity(&self) -> ErrorSeverity {
///         match self {
///             MyError::ShapeMismatch => ErrorSeverity::Critical,
///             MyError::Rejected => ErrorSeverity::Error,
///         }
///     }
/// }
///
/// assert_eq!(MyError::ShapeMismatch.severity(), ErrorSeverity::Critical);
/// ```
pub trait Severity {
    /// Get the severity level of this error
    fn severity(&self) -> ErrorSeverity;
}
