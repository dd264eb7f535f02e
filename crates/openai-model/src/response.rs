use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use pin_project_lite::pin_project;
use thoughtloop_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    ToolCallDelta, Usage,
};

use crate::Error;
use crate::io::Sse;
use crate::proto::ChatCompletionChunk;

struct PartialState {
    sse: Sse,
    id: Option<String>,
    // Events decoded from one chunk may be more than one. They are handed
    // out one by one before the next chunk is read.
    pending_events: VecDeque<ModelResponseEvent>,
    done: bool,
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    pub struct OpenAIResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            id: None,
            pending_events: Default::default(),
            done: false,
        };
        let next_event_fut = async move { next_event(partial_state).await };
        Self {
            next_event_fut: Some(Box::pin(next_event_fut)),
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, _)) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        let next_event_fut = async move { next_event(partial_state).await };
        *this.next_event_fut = Some(Box::pin(next_event_fut));

        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(
    mut partial_state: PartialState,
) -> Result<(Option<ModelResponseEvent>, PartialState), Error> {
    loop {
        if let Some(event) = partial_state.pending_events.pop_front() {
            return Ok((Some(event), partial_state));
        }
        if partial_state.done {
            return Ok((None, partial_state));
        }

        let sse_event = match partial_state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                partial_state.done = true;
                continue;
            }
            Err(err) => {
                return Err(Error::new(format!("{err:?}"), ErrorKind::Other));
            }
        };
        trace!("got sse event: {sse_event}");
        if sse_event == "[DONE]" {
            partial_state.done = true;
            continue;
        }

        let chunk = serde_json::from_str::<ChatCompletionChunk>(&sse_event)
            .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
        if partial_state.id.get_or_insert_with(|| chunk.id.clone()) != &chunk.id
        {
            return Err(Error::new("chunk id mismatch", ErrorKind::Other));
        };
        decode_chunk(chunk, &mut partial_state.pending_events);
    }
}

/// Decodes one chunk into events.
///
/// The order of events is important. Always emit the message delta first,
/// then the tool call fragments, and finally the finish reason if any.
fn decode_chunk(
    chunk: ChatCompletionChunk,
    events: &mut VecDeque<ModelResponseEvent>,
) {
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                events.push_back(ModelResponseEvent::MessageDelta(content));
            }
        }
        for tool_call in choice.delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match tool_call.function {
                Some(function) => (function.name, function.arguments),
                None => (None, None),
            };
            events.push_back(ModelResponseEvent::ToolCallDelta(ToolCallDelta {
                index: tool_call.index.unwrap_or(0),
                id: tool_call.id,
                name,
                arguments,
            }));
        }
        if let Some(finish_reason) = choice.finish_reason {
            let finish_reason = if finish_reason == "tool_calls" {
                ModelFinishReason::ToolCalls
            } else {
                ModelFinishReason::Stop
            };
            events.push_back(ModelResponseEvent::Completed(finish_reason));
        }
    }
    if let Some(usage) = chunk.usage {
        events.push_back(ModelResponseEvent::Usage(Usage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }));
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use super::*;
    use crate::io::Chunks;

    const FIXTURE: &[u8] = br#"data: {"id":"c1","choices":[{"delta":{"role":"assistant","content":"Let me "},"finish_reason":null}]}

data: {"id":"c1","choices":[{"delta":{"content":"check."},"finish_reason":null}]}

data: {"id":"c1","choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","type":"function","function":{"name":"web_scraper","arguments":""}}]},"finish_reason":null}]}

data: {"id":"c1","choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"url\": "}}]},"finish_reason":null}]}

data: {"id":"c1","choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"http://x\"}"}}]},"finish_reason":null}]}

data: {"id":"c1","choices":[{"delta":{},"finish_reason":"tool_calls"}]}

data: {"id":"c1","choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}

data: [DONE]

"#;

    #[tokio::test]
    async fn test_simple_events() {
        let sse = Sse::new(Chunks::from_static(&[FIXTURE]));
        let mut resp = pin!(OpenAIResponse::from_sse(sse));
        let mut events = vec![];
        while let Some(event) =
            poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await.unwrap()
        {
            events.push(event);
        }

        assert_eq!(
            events[0],
            ModelResponseEvent::MessageDelta("Let me ".to_owned())
        );
        assert_eq!(
            events[1],
            ModelResponseEvent::MessageDelta("check.".to_owned())
        );
        let arguments: String = events
            .iter()
            .filter_map(|event| match event {
                ModelResponseEvent::ToolCallDelta(delta) => {
                    delta.arguments.clone()
                }
                _ => None,
            })
            .collect();
        assert_eq!(arguments, r#"{"url": "http://x"}"#);
        assert_eq!(
            events[events.len() - 2],
            ModelResponseEvent::Completed(ModelFinishReason::ToolCalls)
        );
        assert_eq!(
            events[events.len() - 1],
            ModelResponseEvent::Usage(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            })
        );
    }

    #[tokio::test]
    async fn test_chunk_id_mismatch() {
        let sse = Sse::new(Chunks::from_static(&[
            br#"data: {"id":"a","choices":[{"delta":{"content":"x"},"finish_reason":null}]}

data: {"id":"b","choices":[{"delta":{"content":"y"},"finish_reason":null}]}

"#,
        ]));
        let mut resp = pin!(OpenAIResponse::from_sse(sse));
        let first = poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await;
        assert!(matches!(first, Ok(Some(_))));
        let second = poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await;
        assert!(second.is_err());
        let after = poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await;
        assert!(matches!(after, Ok(None)));
    }
}
