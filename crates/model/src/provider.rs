use std::error::Error;

use crate::error::ErrorKind;
use crate::request::ModelRequest;
use crate::response::ModelResponse;

/// An error reported by a completion gateway.
///
/// Callers only branch on [`ErrorKind`]; the rest is for display.
pub trait ModelProviderError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;
}

/// A completion gateway: takes an ordered message list plus tool
/// definitions and streams back text fragments, tool-call fragments and a
/// finish reason.
///
/// Providers are shared between agents and tasks, so every request must be
/// self-contained. The returned future owns everything it needs and may
/// outlive the borrow of `self`.
pub trait ModelProvider: Send + Sync {
    /// The error reported by this gateway.
    type Error: ModelProviderError;

    /// The event stream of one completion.
    type Response: ModelResponse<Error = Self::Error>;

    /// Returns the identifier of the model completions are sampled from,
    /// as recorded in conversation exports.
    fn model_id(&self) -> &str;

    /// Starts a completion. Resolves once the gateway has accepted the
    /// request, before any event has been received.
    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;
}
