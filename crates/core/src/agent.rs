//! Reasoning agents.
//!
//! Every variant implements [`Agent`]: a lazy sequence of step strings that
//! ends with the answer, and a blocking `run` built on top of it.

mod cot;
mod factory;
pub mod parser;
mod react;
#[cfg(test)]
mod tests;
mod tot;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;

pub use cot::{CotAgent, CotConfig};
pub use factory::{AgentContext, AgentKind, build_agent};
pub use react::{ReActAgent, ReActConfig};
pub use tot::{Evaluator, ModelEvaluator, TotAgent, TotConfig};

use crate::Error;
use crate::memory::Memory;

/// Returned when a model output contains neither an action nor an answer.
pub const NO_ACTION_IDENTIFIED: &str = "エラー: 行動を特定できませんでした";

/// Returned when the turn budget runs out before an answer.
pub const MAX_TURNS_REACHED: &str = "エラー: 最大試行回数に達しました";

/// The capability shared by all agent variants.
#[async_trait]
pub trait Agent: Send {
    /// Runs the agent, yielding intermediate steps as they are produced.
    ///
    /// The last item is the answer, or a diagnostic when the run could not
    /// reach one. Errors are only yielded for failures that stop the run
    /// altogether, such as transport errors.
    fn run_iter<'a>(
        &'a mut self,
        question: &'a str,
    ) -> BoxStream<'a, Result<String, Error>>;

    /// Runs the agent to completion and returns the answer.
    async fn run(&mut self, question: &str) -> Result<String, Error> {
        let mut steps = self.run_iter(question);
        let mut last = String::new();
        while let Some(step) = steps.next().await {
            last = step?;
        }
        Ok(last)
    }

    /// Returns the memory the agent records into, if any.
    fn memory(&self) -> Option<&dyn Memory> {
        None
    }

    /// Returns the memory mutably, e.g. to clear it for a new conversation.
    fn memory_mut(&mut self) -> Option<&mut dyn Memory> {
        None
    }
}
