use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;

use thoughtloop_model::{
    Message, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent, ModelTool, ToolCallDelta,
    Usage,
};
use tracing::Instrument;

use crate::Error;

type SendRequestResult =
    Result<ModelClientResponse, Box<dyn ModelProviderError>>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
type TextCallback = Box<dyn FnMut(String) + Send + 'static>;
#[rustfmt::skip]
type HandlerFn = Arc<
    dyn Fn(ModelRequest, TextCallback) -> BoxedSendRequestFuture + Send + Sync
>;

/// A wrapper around a model provider that provides a type-erased interface
/// for the agents and the assembler.
///
/// Cloning is cheap, all clones share the same provider.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
    model_id: Arc<str>,
    temperature: Option<f32>,
}

impl ModelClient {
    /// Creates a client over `provider`.
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        Self::with_token_price(provider, 0.0)
    }

    /// Creates a client that logs the estimated cost of every request,
    /// computed as `total_tokens * token_price`.
    pub fn with_token_price<P: ModelProvider + 'static>(
        provider: P,
        token_price: f64,
    ) -> Self {
        let model_id: Arc<str> = Arc::from(provider.model_id());
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let handler_fn: HandlerFn = Arc::new(move |req, on_text| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("got a request: {:?}", req);
                    let resp_or_err = fut.await;
                    handle_response::<P>(resp_or_err, on_text, token_price)
                        .await
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self {
            handler_fn,
            model_id,
            temperature: None,
        }
    }

    /// Sets the sampling temperature used by [`complete`](Self::complete).
    #[inline]
    pub fn set_temperature(&mut self, temperature: Option<f32>) {
        self.temperature = temperature;
    }

    /// Returns the identifier of the underlying model.
    #[inline]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Sends a request and returns the fully received response.
    ///
    /// `on_text` is invoked with every text fragment as soon as it arrives.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    #[inline]
    pub async fn send_request(
        &self,
        req: ModelRequest,
        on_text: impl FnMut(String) + Send + 'static,
    ) -> Result<ModelClientResponse, Box<dyn ModelProviderError>> {
        (self.handler_fn)(req, Box::new(on_text)).await
    }

    /// Sends `messages` with the given tools and the configured temperature.
    pub async fn stream_messages(
        &self,
        messages: Vec<Message>,
        tools: Vec<ModelTool>,
        on_text: impl FnMut(String) + Send + 'static,
    ) -> Result<ModelClientResponse, Error> {
        let req = ModelRequest {
            messages,
            tools,
            temperature: self.temperature,
        };
        self.send_request(req, on_text)
            .await
            .map_err(Error::from_gateway)
    }

    /// Sends a single user prompt and returns the whole completion text.
    pub async fn complete<S: Into<String>>(
        &self,
        prompt: S,
    ) -> Result<String, Error> {
        let resp = self
            .stream_messages(vec![Message::user(prompt.into())], vec![], |_| {})
            .await?;
        Ok(resp.text)
    }
}

/// A completely received response from the model client.
#[derive(Clone, Debug, Default)]
pub struct ModelClientResponse {
    /// The concatenated text fragments.
    pub text: String,
    /// Tool call fragments in arrival order, not assembled.
    pub tool_call_deltas: Vec<ToolCallDelta>,
    /// The reason the model finished generating.
    pub finish_reason: Option<ModelFinishReason>,
    /// Token usage, if reported.
    pub usage: Option<Usage>,
}

async fn handle_response<P: ModelProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
    mut on_text: TextCallback,
    token_price: f64,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            error!("got an error: {err:?}");
            return Err(Box::new(err));
        }
    };

    let mut result = ModelClientResponse::default();

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(event) => event,
            Err(err) => {
                error!("got an error: {err:?}");
                return Err(Box::new(err));
            }
        };

        let Some(event) = event else {
            break;
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(msg) => {
                result.text.push_str(&msg);
                on_text(msg);
            }
            ModelResponseEvent::ToolCallDelta(delta) => {
                result.tool_call_deltas.push(delta);
            }
            ModelResponseEvent::Completed(reason) => {
                result.finish_reason = Some(reason);
            }
            ModelResponseEvent::Usage(usage) => {
                let cost = usage.total_tokens as f64 * token_price;
                info!(
                    "tokens used: {} | cost: ${cost:.4}",
                    usage.total_tokens
                );
                result.usage = Some(usage);
            }
        }
    }

    trace!("finished a request");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use thoughtloop_model::ErrorKind;
    use thoughtloop_test_model::{
        PresetEvent, PresetResponse, TestModelProvider,
    };

    use super::*;

    #[tokio::test]
    async fn test_send_request() {
        let mut model_provider = TestModelProvider::default();
        for _ in 0..3 {
            model_provider.add_response(PresetResponse::with_events([
                PresetEvent::MessageDelta("How ".to_owned()),
                PresetEvent::MessageDelta("are ".to_owned()),
                PresetEvent::MessageDelta("you?".to_owned()),
                PresetEvent::Usage(Usage {
                    prompt_tokens: 3,
                    completion_tokens: 3,
                    total_tokens: 6,
                }),
            ]));
        }

        let model_client = ModelClient::with_token_price(model_provider, 0.5);
        assert_eq!(model_client.model_id(), "test-model");

        for _ in 0..3 {
            let fragments = Arc::new(Mutex::new(vec![]));
            let resp = model_client
                .send_request(ModelRequest::with_prompt("Hi"), {
                    let fragments = Arc::clone(&fragments);
                    move |text| fragments.lock().unwrap().push(text)
                })
                .await
                .unwrap();
            assert_eq!(resp.text, "How are you?");
            assert_eq!(resp.finish_reason, Some(ModelFinishReason::Stop));
            assert_eq!(resp.usage.map(|u| u.total_tokens), Some(6));
            assert_eq!(fragments.lock().unwrap().len(), 3);
        }
    }

    #[tokio::test]
    async fn test_tool_call_fragments_are_kept_raw() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_response(PresetResponse::tool_call(
            "call_1",
            "echo",
            r#"{"url": "http://x"}"#,
        ));
        let model_client = ModelClient::new(model_provider);
        let resp = model_client
            .stream_messages(vec![Message::user("go")], vec![], |_| {})
            .await
            .unwrap();
        assert!(resp.text.is_empty());
        assert_eq!(resp.tool_call_deltas.len(), 2);
        assert_eq!(resp.finish_reason, Some(ModelFinishReason::ToolCalls));
    }

    #[tokio::test]
    async fn test_error_handling() {
        let model_provider = TestModelProvider::default();
        let model_client = ModelClient::new(model_provider);
        let err = model_client
            .send_request(ModelRequest::with_prompt("Hi"), |_| {})
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);

        let err = model_client.complete("Hi").await.err().unwrap();
        assert!(matches!(err, Error::Gateway(_)));
    }
}
