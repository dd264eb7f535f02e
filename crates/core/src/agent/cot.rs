use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thoughtloop_model::Message;

use super::parser::final_answer;
use super::{Agent, MAX_TURNS_REACHED};
use crate::memory::Memory;
use crate::{Error, ModelClient};

/// Settings of [`CotAgent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CotConfig {
    /// Maximum number of model calls in one run.
    pub max_steps: usize,
}

impl Default for CotConfig {
    fn default() -> Self {
        Self { max_steps: 5 }
    }
}

/// An agent that reasons step by step without tools.
pub struct CotAgent {
    client: ModelClient,
    memory: Option<Box<dyn Memory>>,
    config: CotConfig,
}

impl CotAgent {
    /// Creates a new agent.
    #[inline]
    pub fn new(client: ModelClient, config: CotConfig) -> Self {
        Self {
            client,
            memory: None,
            config,
        }
    }

    /// Attaches a memory receiving the question and the answer.
    #[inline]
    pub fn with_memory(mut self, memory: Box<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }
}

fn prompt(question: &str, thoughts: &str) -> String {
    format!(
        "質問に段階的に考えて答えてください。\
         各ステップは「思考:」で始め、答えが分かったら「最終的な答え:」で始まる行に書いてください。\n\n\
         質問: {question}\n{thoughts}"
    )
}

#[async_trait]
impl Agent for CotAgent {
    fn run_iter<'a>(
        &'a mut self,
        question: &'a str,
    ) -> BoxStream<'a, Result<String, Error>> {
        Box::pin(try_stream! {
            if let Some(memory) = &mut self.memory {
                memory.push(Message::user(question));
            }

            let mut thoughts = String::new();
            let mut answer = None;
            for _ in 0..self.config.max_steps {
                let output = self.client.complete(prompt(question, &thoughts)).await?;
                yield output.clone();
                if let Some(found) = final_answer(&output) {
                    answer = Some(found.trim().to_owned());
                    break;
                }
                thoughts.push_str(output.trim_end());
                thoughts.push('\n');
            }

            match answer {
                Some(answer) => {
                    if let Some(memory) = &mut self.memory {
                        memory.push(Message::assistant(answer.as_str()));
                    }
                    yield answer;
                }
                None => {
                    yield MAX_TURNS_REACHED.to_owned();
                }
            }
        })
    }

    fn memory(&self) -> Option<&dyn Memory> {
        self.memory.as_deref()
    }

    fn memory_mut(&mut self) -> Option<&mut dyn Memory> {
        self.memory.as_deref_mut().map(|memory| memory as &mut dyn Memory)
    }
}
