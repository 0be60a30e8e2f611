use thiserror::Error;

/// Recoverable failures surfaced by construction, conversion and backend support.
///
/// Broken internal invariants (an unbound argument, an evaluator reaching a shape
/// it cannot handle) are not represented here: they panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A construction-time contract violation: wrong operand shape, unknown field,
    /// foreign expression handle, out-of-range literal.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The selected backend cannot represent the requested shape or operation.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Wrong number of arguments passed to a function.
    #[error("expected {expected} arguments, found {found}")]
    Arity { expected: usize, found: usize },

    /// A host value could not be converted to or from the requested type.
    #[error("conversion failed: {0}")]
    Conversion(String),
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn invalid<T>(message: impl Into<String>) -> Result<T> {
    Err(Error::InvalidArgument(message.into()))
}

pub(crate) fn unsupported<T>(message: impl Into<String>) -> Result<T> {
    Err(Error::Unsupported(message.into()))
}
