use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thoughtloop_model::Message;

use super::parser::{MarkerParser, OutputParser, Step};
use super::{Agent, MAX_TURNS_REACHED, NO_ACTION_IDENTIFIED};
use crate::memory::Memory;
use crate::tool::Registry;
use crate::{Error, ModelClient};

/// Settings of [`ReActAgent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReActConfig {
    /// Maximum number of model calls in one run.
    pub max_turns: usize,
    /// Whether raw outputs and observations are written to memory, besides
    /// the question and the final answer.
    pub record_steps: bool,
    /// Number of messages recalled from memory and prefixed to the prompt.
    /// `0` disables history.
    pub history_limit: usize,
}

impl Default for ReActConfig {
    fn default() -> Self {
        Self {
            max_turns: 5,
            record_steps: true,
            history_limit: 0,
        }
    }
}

/// An agent alternating between reasoning and acting.
///
/// Each turn sends a single prompt made of the instruction, the tool
/// catalog, the question and the scratchpad of previous turns. The output is
/// then either an answer, an action whose observation extends the
/// scratchpad, or unrecognizable, which ends the run.
pub struct ReActAgent {
    client: ModelClient,
    tools: Registry,
    memory: Option<Box<dyn Memory>>,
    parser: Box<dyn OutputParser>,
    config: ReActConfig,
}

impl ReActAgent {
    /// Creates an agent using the line-marker grammar.
    pub fn new(client: ModelClient, tools: Registry, config: ReActConfig) -> Self {
        Self {
            client,
            tools,
            memory: None,
            parser: Box::new(MarkerParser),
            config,
        }
    }

    /// Attaches a memory the agent records its exchanges into.
    #[inline]
    pub fn with_memory(mut self, memory: Box<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Replaces the output grammar.
    #[inline]
    pub fn with_parser<P: OutputParser + 'static>(mut self, parser: P) -> Self {
        self.parser = Box::new(parser);
        self
    }

    fn history(&self, question: &str) -> String {
        let Some(memory) = &self.memory else {
            return String::new();
        };
        if self.config.history_limit == 0 {
            return String::new();
        }
        let recalled = memory.recall(question, self.config.history_limit);
        if recalled.is_empty() {
            return String::new();
        }
        let mut history = String::from("これまでの会話:\n");
        for message in recalled {
            history.push_str(&format!("{}: {}\n", message.role, message.text()));
        }
        history.push('\n');
        history
    }

    fn prompt(&self, history: &str, question: &str, scratchpad: &str) -> String {
        format!(
            "{history}あなたは質問に答えるアシスタントです。\n\
             利用可能な行動:\n{}\n\n\
             質問: {question}\n\
             {scratchpad}",
            self.tools.catalog()
        )
    }

    fn record(&mut self, message: Message) {
        if let Some(memory) = &mut self.memory {
            memory.push(message);
        }
    }
}

#[async_trait]
impl Agent for ReActAgent {
    fn run_iter<'a>(
        &'a mut self,
        question: &'a str,
    ) -> BoxStream<'a, Result<String, Error>> {
        Box::pin(try_stream! {
            let history = self.history(question);
            self.record(Message::user(question));

            let mut scratchpad = String::new();
            let mut answer = None;
            for turn in 0..self.config.max_turns {
                let prompt = self.prompt(&history, question, &scratchpad);
                let output = self.client.complete(prompt).await?;
                debug!("turn {turn} output: {output}");
                yield output.clone();

                match self.parser.parse(&output) {
                    Step::Final(final_answer) => {
                        self.record(Message::assistant(final_answer.as_str()));
                        answer = Some(final_answer);
                        break;
                    }
                    Step::Action { tool, input } => {
                        let observation =
                            self.tools.execute_text(&tool, &input).await;
                        debug!("observation from {tool}: {observation}");
                        if self.config.record_steps {
                            self.record(Message::assistant(output.as_str()));
                            self.record(Message::system(observation.as_str()));
                        }
                        scratchpad.push_str(&format!("{output}\n観察: {observation}\n"));
                        yield observation;
                    }
                    Step::Unrecognized => {
                        warn!("no action found in model output");
                        answer = Some(NO_ACTION_IDENTIFIED.to_owned());
                        break;
                    }
                }
            }

            yield answer.unwrap_or_else(|| {
                info!("gave up after {} turns", self.config.max_turns);
                MAX_TURNS_REACHED.to_owned()
            });
        })
    }

    fn memory(&self) -> Option<&dyn Memory> {
        self.memory.as_deref()
    }

    fn memory_mut(&mut self) -> Option<&mut dyn Memory> {
        self.memory.as_deref_mut().map(|memory| memory as &mut dyn Memory)
    }
}
