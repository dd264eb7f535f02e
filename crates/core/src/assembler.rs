//! The streaming turn assembler and the background plumbing around it.
//!
//! A turn runs on its own task and reports to the consumer through an
//! unbounded channel of [`StreamItem`]s, in the exact order they are
//! produced. [`StreamItem::Persist`] is always the last item of a turn that
//! completed; a failed turn ends with [`StreamItem::Failed`] instead.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use futures_util::StreamExt;
use regex::Regex;
use thoughtloop_model::{Message, ModelFinishReason, ToolCall, ToolCallDelta};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::agent::{Agent, MAX_TURNS_REACHED};
use crate::tool::Registry;
use crate::{Error, ModelClient};

/// The text sent before anything else in a turn.
pub const ASSISTANT_PREFIX: &str = "🤖 Assistant: ";

static ARTIFACT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(/[^\s]+\.png)").expect("valid artifact regex"));

/// An item delivered to the consumer of a turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamItem {
    /// Text to display as is.
    Text(String),
    /// A generated file is available at this path.
    Artifact(PathBuf),
    /// The conversation should be persisted now.
    Persist,
    /// The turn could not proceed, e.g. the gateway is unreachable.
    Failed(String),
}

/// Settings of [`TurnAssembler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AssemblerConfig {
    /// Maximum number of tool dispatch rounds within one turn.
    pub max_tool_rounds: usize,
}

impl AssemblerConfig {
    /// Creates a config allowing `max_tool_rounds` dispatch rounds.
    #[inline]
    pub fn new(max_tool_rounds: usize) -> Self {
        Self { max_tool_rounds }
    }
}

/// Drives one conversational turn: streams the model's reply, runs the tool
/// calls it requests and asks again until a plain answer is produced.
#[derive(Clone)]
pub struct TurnAssembler {
    client: ModelClient,
    tools: Registry,
    config: AssemblerConfig,
}

impl TurnAssembler {
    /// Creates an assembler.
    pub fn new(client: ModelClient, tools: Registry, config: AssemblerConfig) -> Self {
        Self {
            client,
            tools,
            config,
        }
    }

    /// Returns the model client.
    #[inline]
    pub fn client(&self) -> &ModelClient {
        &self.client
    }

    /// Runs a turn over `messages`, appending the assistant and tool
    /// messages it produces, and relays items to `tx`.
    ///
    /// Returns an error only when the gateway fails. Items already sent stay
    /// sent, and no [`StreamItem::Persist`] is emitted in that case.
    pub async fn run_turn(
        &self,
        messages: &mut Vec<Message>,
        tx: &UnboundedSender<StreamItem>,
    ) -> Result<(), Error> {
        send(tx, StreamItem::Text(ASSISTANT_PREFIX.to_owned()));

        let mut rounds = 0;
        loop {
            let text_tx = tx.clone();
            let resp = self
                .client
                .stream_messages(messages.clone(), self.tools.definitions(), move |text| {
                    send(&text_tx, StreamItem::Text(text));
                })
                .await?;
            send(tx, StreamItem::Text("\n".to_owned()));

            let mut pending = PendingCalls::default();
            for delta in &resp.tool_call_deltas {
                pending.push(delta);
            }
            let calls = pending.finish();
            let wants_tools = !calls.is_empty()
                && resp.finish_reason == Some(ModelFinishReason::ToolCalls);

            if wants_tools && rounds < self.config.max_tool_rounds {
                rounds += 1;
                debug!("tool round {rounds}: {} calls", calls.len());
                messages.push(
                    Message::assistant(resp.text).with_tool_calls(calls.clone()),
                );
                for call in calls {
                    let result = self
                        .tools
                        .execute(&call.function.name, &call.function.arguments)
                        .await;
                    messages.push(Message::tool_result(call.id, result));
                }
                continue;
            }

            if wants_tools {
                warn!("giving up after {rounds} tool rounds");
            }
            let artifact = find_artifact(&resp.text);
            messages.push(Message::assistant(resp.text));
            if wants_tools {
                send(tx, StreamItem::Text(format!("{MAX_TURNS_REACHED}\n")));
            }
            if let Some(path) = artifact {
                send(tx, StreamItem::Artifact(path));
            }
            send(tx, StreamItem::Persist);
            return Ok(());
        }
    }

    /// Runs a turn on a new task. The task yields the updated messages.
    pub fn spawn_turn(
        &self,
        mut messages: Vec<Message>,
    ) -> (JoinHandle<Vec<Message>>, UnboundedReceiver<StreamItem>) {
        let (tx, rx) = unbounded_channel();
        let assembler = self.clone();
        let handle = tokio::spawn(
            async move {
                if let Err(err) = assembler.run_turn(&mut messages, &tx).await {
                    error!("turn failed: {err}");
                    send(&tx, StreamItem::Failed(err.to_string()));
                }
                messages
            }
            .instrument(debug_span!("turn")),
        );
        (handle, rx)
    }
}

/// The result of an agent run spawned with [`spawn_agent`].
pub struct AgentRun {
    /// The agent, handed back for the next question.
    pub agent: Box<dyn Agent>,
    /// All steps, each followed by a newline. `None` if the run failed.
    pub transcript: Option<String>,
}

/// Runs `agent` on a new task, relaying its steps like a turn.
pub fn spawn_agent(
    mut agent: Box<dyn Agent>,
    question: String,
) -> (JoinHandle<AgentRun>, UnboundedReceiver<StreamItem>) {
    let (tx, rx) = unbounded_channel();
    let handle = tokio::spawn(
        async move {
            send(&tx, StreamItem::Text(ASSISTANT_PREFIX.to_owned()));
            let mut transcript = String::new();
            let mut failure = None;
            {
                let mut steps = agent.run_iter(&question);
                while let Some(step) = steps.next().await {
                    match step {
                        Ok(step) => {
                            let line = format!("{step}\n");
                            transcript.push_str(&line);
                            send(&tx, StreamItem::Text(line));
                        }
                        Err(err) => {
                            failure = Some(err);
                            break;
                        }
                    }
                }
            }

            if let Some(err) = failure {
                error!("agent run failed: {err}");
                send(&tx, StreamItem::Failed(err.to_string()));
                return AgentRun {
                    agent,
                    transcript: None,
                };
            }
            if let Some(path) = find_artifact(&transcript) {
                send(&tx, StreamItem::Artifact(path));
            }
            send(&tx, StreamItem::Persist);
            AgentRun {
                agent,
                transcript: Some(transcript),
            }
        }
        .instrument(debug_span!("agent run")),
    );
    (handle, rx)
}

fn send(tx: &UnboundedSender<StreamItem>, item: StreamItem) {
    if tx.send(item).is_err() {
        trace!("consumer has gone, dropping item");
    }
}

/// Returns the first `.png` path mentioned in `text` if the file exists.
fn find_artifact(text: &str) -> Option<PathBuf> {
    let path = Path::new(ARTIFACT_RE.captures(text)?.get(1)?.as_str());
    path.is_file().then(|| path.to_path_buf())
}

/// Tool calls being assembled from fragments during one model turn.
#[derive(Default)]
struct PendingCalls {
    calls: Vec<PendingCall>,
    // Stream index to the call that last used it.
    by_index: HashMap<u32, usize>,
}

struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl PendingCalls {
    fn push(&mut self, delta: &ToolCallDelta) {
        let id = delta.id.as_deref().filter(|id| !id.is_empty());
        let slot = match id {
            Some(id) => match self.calls.iter().position(|call| call.id == id) {
                Some(slot) => slot,
                None => self.open(id.to_owned()),
            },
            None => match self.by_index.get(&delta.index) {
                Some(slot) => *slot,
                None => self.open(format!("call_{}", delta.index)),
            },
        };
        self.by_index.insert(delta.index, slot);

        let call = &mut self.calls[slot];
        if let Some(name) = delta.name.as_deref().filter(|name| !name.is_empty()) {
            call.name = name.to_owned();
        }
        if let Some(arguments) = &delta.arguments {
            call.arguments.push_str(arguments);
        }
    }

    fn open(&mut self, id: String) -> usize {
        self.calls.push(PendingCall {
            id,
            name: String::new(),
            arguments: String::new(),
        });
        self.calls.len() - 1
    }

    fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .map(|call| ToolCall::new(call.id, call.name, call.arguments))
            .collect()
    }
}
