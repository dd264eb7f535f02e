use serde::{Deserialize, Serialize};
use thoughtloop_model::{ModelFinishReason, ToolCallDelta, Usage};

/// The events in a preset response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    #[serde(rename = "message_delta")]
    MessageDelta(String),
    #[serde(rename = "tool_call_delta")]
    ToolCallDelta(ToolCallDelta),
    #[serde(rename = "usage")]
    Usage(Usage),
    /// Breaks the stream with an error at this point.
    #[serde(rename = "error")]
    Error,
}

/// The preset response for one request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    /// The finish reason reported at the end of the stream. When unset, it
    /// is inferred from the events: `ToolCalls` if any tool call fragment is
    /// present, `Stop` otherwise.
    pub finish_reason: Option<ModelFinishReason>,
    /// If set, the request will fail in the first `failures` attempts.
    /// `Some(0)` means the request will fail infinitely.
    pub failures: Option<u64>,
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            finish_reason: None,
            failures: None,
        }
    }

    /// Creates a `PresetResponse` that streams `text` in one fragment.
    #[inline]
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self::with_events([PresetEvent::MessageDelta(text.into())])
    }

    /// Creates a `PresetResponse` that streams a single complete tool call,
    /// with its argument text split into two fragments.
    pub fn tool_call(id: &str, name: &str, arguments: &str) -> Self {
        let split = arguments.len() / 2;
        let split = (split..=arguments.len())
            .find(|idx| arguments.is_char_boundary(*idx))
            .unwrap_or(arguments.len());
        let (head, tail) = arguments.split_at(split);
        Self::with_events([
            PresetEvent::ToolCallDelta(ToolCallDelta {
                index: 0,
                id: Some(id.to_owned()),
                name: Some(name.to_owned()),
                arguments: Some(head.to_owned()),
            }),
            PresetEvent::ToolCallDelta(ToolCallDelta {
                index: 0,
                id: None,
                name: None,
                arguments: Some(tail.to_owned()),
            }),
        ])
    }

    /// Overrides the finish reason.
    #[inline]
    pub fn with_finish_reason(mut self, reason: ModelFinishReason) -> Self {
        self.finish_reason = Some(reason);
        self
    }

    /// Sets failure times before a successful response. `0` means the
    /// response will always be a failure.
    #[inline]
    pub fn with_failures(mut self, failures: u64) -> Self {
        self.failures = Some(failures);
        self
    }

    pub(crate) fn inferred_finish_reason(&self) -> ModelFinishReason {
        if let Some(reason) = self.finish_reason {
            return reason;
        }
        let has_tool_call = self
            .events
            .iter()
            .any(|event| matches!(event, PresetEvent::ToolCallDelta(_)));
        if has_tool_call {
            ModelFinishReason::ToolCalls
        } else {
            ModelFinishReason::Stop
        }
    }
}
