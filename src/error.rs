use miette::Diagnostic;
use thiserror::Error;

/// Result type for graph construction
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal errors raised while loading input or building a graph.
///
/// Problems in the *input program* (a misplaced rethrow, an undefined label, ...) are not
/// errors of this kind; they are reported through [`crate::diagnostics::Diagnostics`] and
/// the builder still produces a graph. `Internal` means the builder broke one of its own
/// invariants.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum Error {
    #[error("I/O error: {0}")]
    #[diagnostic(code(opflow::io_error))]
    Io(String),

    #[error("Malformed operation tree: {message}")]
    #[diagnostic(code(opflow::json_error))]
    Json { message: String },

    #[error("Invalid input: {message}")]
    #[diagnostic(code(opflow::invalid_input))]
    InvalidInput { message: String },

    #[error("No body named `{name}` in the input")]
    #[diagnostic(code(opflow::body_not_found))]
    BodyNotFound { name: String },

    #[error("Internal error: {message}")]
    #[diagnostic(
        code(opflow::internal_error),
        help("this is a defect in the graph builder, not in the input program")
    )]
    Internal { message: String },
}

impl Error {
    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json {
            message: err.to_string(),
        }
    }
}
