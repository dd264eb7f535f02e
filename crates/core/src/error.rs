use thoughtloop_model::{ErrorKind, ModelProviderError};

/// Errors that stop an agent run or a turn entirely.
///
/// Tool failures, unparsable model output and exhausted budgets are not
/// errors, they are reported as ordinary text.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The model provider failed to serve a request.
    #[error("gateway error: {0}")]
    Gateway(Box<dyn ModelProviderError>),
    /// The system is misconfigured, e.g. credentials are missing.
    #[error("configuration error: {0}")]
    Config(String),
    /// A filesystem operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A document could not be encoded or decoded.
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    /// A tool with the same name is already registered.
    #[error("tool `{0}` is already registered")]
    DuplicateTool(String),
}

impl Error {
    /// Converts a provider error, separating configuration problems from
    /// transport failures.
    pub fn from_gateway(err: Box<dyn ModelProviderError>) -> Self {
        if err.kind() == ErrorKind::Configuration {
            return Error::Config(err.to_string());
        }
        Error::Gateway(err)
    }
}
