use miette::Diagnostic;
use thiserror::Error;

/// Core error type for Perch operations
#[derive(Error, Debug, Diagnostic)]
pub enum CoreError {
    /// Invalid resource quantity
    #[error("Invalid {kind} quantity '{value}': {reason}")]
    #[diagnostic(
        code(perch::invalid_quantity),
        help("Use Kubernetes quantity notation, e.g. '500m' or '0.5' for CPU, '128Mi' or '1Gi' for memory")
    )]
    InvalidQuantity {
        kind: &'static str,
        value: String,
        reason: String,
    },

    /// Invalid resource name
    #[error("Invalid resource name: {name}")]
    #[diagnostic(
        code(perch::invalid_name),
        help("Names must be DNS-1123 subdomains: lowercase alphanumeric, '-' or '.'")
    )]
    InvalidName { name: String },
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create an InvalidQuantity error
    pub fn invalid_quantity(
        kind: &'static str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidQuantity {
            kind,
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidName error
    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidName { name: name.into() }
    }
}
