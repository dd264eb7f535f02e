use std::borrow::Cow;
use std::fmt::{self, Display};

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The input provided to the tool was invalid.
    InvalidInput,
    /// Error occurred while executing the tool.
    ExecutionError,
    /// A program or service the tool relies on is not available.
    MissingDependency,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidInput => write!(f, "Invalid input"),
            ErrorKind::ExecutionError => write!(f, "Execution error"),
            ErrorKind::MissingDependency => write!(f, "Missing dependency"),
        }
    }
}

/// Describes a tool call error.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Error {
    kind: ErrorKind,
    reason: Option<String>,
}

impl Error {
    /// Creates a new error with the `InvalidInput` kind.
    #[inline]
    pub fn invalid_input() -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            reason: None,
        }
    }

    /// Creates a new error with the `ExecutionError` kind.
    ///
    /// The reason should read as the continuation of "Failed to", for
    /// example `generate diagram: syntax error`.
    #[inline]
    pub fn execution_error() -> Self {
        Self {
            kind: ErrorKind::ExecutionError,
            reason: None,
        }
    }

    /// Creates a new error with the `MissingDependency` kind.
    #[inline]
    pub fn missing_dependency() -> Self {
        Self {
            kind: ErrorKind::MissingDependency,
            reason: None,
        }
    }

    /// Attaches a reason to the error.
    #[inline]
    pub fn with_reason<S: Into<String>>(self, reason: S) -> Self {
        Self {
            kind: self.kind,
            reason: Some(reason.into()),
        }
    }

    /// Returns the kind of the error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the reason for the error.
    #[inline]
    pub fn reason(&self) -> Cow<'_, str> {
        match self.reason.as_deref() {
            Some(reason) => Cow::Borrowed(reason),
            None => Cow::Owned(format!("{}", self.kind)),
        }
    }

    /// Renders the error as an observation for the tool named `name`.
    pub(crate) fn to_observation(&self, name: &str) -> String {
        match (self.kind, self.reason.as_deref()) {
            (ErrorKind::InvalidInput, _) => {
                format!("Invalid arguments for {name}: {}", self.reason())
            }
            (ErrorKind::MissingDependency, Some(reason)) => reason.to_owned(),
            (ErrorKind::MissingDependency, None) => {
                format!("Failed to run {name}: missing dependency")
            }
            (ErrorKind::ExecutionError, Some(reason)) => {
                format!("Failed to {reason}")
            }
            (ErrorKind::ExecutionError, None) => format!("Failed to run {name}"),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason())
    }
}
