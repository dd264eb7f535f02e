use std::sync::LazyLock;

use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use regex::Regex;
use thoughtloop_model::Message;

use super::Agent;
use super::parser::final_answer;
use crate::memory::Memory;
use crate::{Error, ModelClient};

static THOUGHT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^-\s*(.+)").expect("valid thought regex"));
static SCORE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("valid score regex"));

/// Settings of [`TotAgent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TotConfig {
    /// Number of expansion rounds.
    pub max_depth: usize,
    /// Number of candidates kept after each round, and the number of
    /// proposals requested per node.
    pub breadth: usize,
}

impl Default for TotConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            breadth: 2,
        }
    }
}

/// Scores a reasoning history, higher is better.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Returns the score of `history`.
    async fn evaluate(&self, history: &str) -> Result<f64, Error>;
}

#[async_trait]
impl<F> Evaluator for F
where
    F: Fn(&str) -> f64 + Send + Sync,
{
    async fn evaluate(&self, history: &str) -> Result<f64, Error> {
        Ok(self(history))
    }
}

/// An evaluator asking the model to rate a history.
///
/// Replies without a number score `0.0`.
#[derive(Clone)]
pub struct ModelEvaluator {
    client: ModelClient,
}

impl ModelEvaluator {
    /// Creates an evaluator backed by `client`.
    #[inline]
    pub fn new(client: ModelClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Evaluator for ModelEvaluator {
    async fn evaluate(&self, history: &str) -> Result<f64, Error> {
        let prompt = format!(
            "次の思考過程が質問の解決にどれだけ有望かを0から1の数値で評価してください。\
             数値のみを答えてください。\n{history}"
        );
        let reply = self.client.complete(prompt).await?;
        Ok(parse_score(&reply))
    }
}

fn parse_score(reply: &str) -> f64 {
    let score = SCORE_RE
        .find(reply)
        .and_then(|m| m.as_str().parse::<f64>().ok());
    match score {
        Some(score) => score,
        None => {
            warn!("evaluator reply is not a number: {reply:?}");
            0.0
        }
    }
}

/// A candidate reasoning history and its score.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Node {
    pub history: String,
    pub score: f64,
}

/// An agent running a breadth-limited, depth-bounded search over thoughts.
pub struct TotAgent {
    client: ModelClient,
    evaluator: Box<dyn Evaluator>,
    memory: Option<Box<dyn Memory>>,
    config: TotConfig,
}

impl TotAgent {
    /// Creates an agent scoring candidates with `evaluator`.
    pub fn new<E: Evaluator + 'static>(
        client: ModelClient,
        evaluator: E,
        config: TotConfig,
    ) -> Self {
        Self {
            client,
            evaluator: Box::new(evaluator),
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

    async fn propose(
        &self,
        question: &str,
        history: &str,
    ) -> Result<Vec<String>, Error> {
        let prompt = format!(
            "質問: {question}\nこれまでの思考:\n{history}\n\
             {}個の次の思考候補を箇条書きで提案してください。",
            self.config.breadth
        );
        let output = self.client.complete(prompt).await?;
        Ok(THOUGHT_RE
            .captures_iter(&output)
            .map(|caps| caps[1].trim().to_owned())
            .filter(|thought| !thought.is_empty())
            .collect())
    }

    /// Runs one expansion round over `frontier`. Returns the candidates
    /// sorted by descending score and truncated to the breadth, or an empty
    /// list if nothing was proposed.
    pub(crate) async fn expand(
        &self,
        question: &str,
        frontier: &[Node],
    ) -> Result<Vec<Node>, Error> {
        let mut candidates = vec![];
        for node in frontier {
            for thought in self.propose(question, &node.history).await? {
                let history = if node.history.is_empty() {
                    thought
                } else {
                    format!("{}\n{thought}", node.history)
                };
                let score = self.evaluator.evaluate(&history).await?;
                trace!("scored {score}: {history:?}");
                candidates.push(Node { history, score });
            }
        }
        // Stable, so ties keep the proposal order.
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(self.config.breadth);
        Ok(candidates)
    }

    async fn conclude(&self, question: &str, history: &str) -> Result<String, Error> {
        let prompt = format!("質問: {question}\n思考過程:\n{history}\n最終的な答え:");
        let output = self.client.complete(prompt).await?;
        Ok(match final_answer(&output) {
            Some(answer) => answer.trim().to_owned(),
            None => output.trim().to_owned(),
        })
    }
}

#[async_trait]
impl Agent for TotAgent {
    /// Yields the best history after each round, then the answer.
    fn run_iter<'a>(
        &'a mut self,
        question: &'a str,
    ) -> BoxStream<'a, Result<String, Error>> {
        Box::pin(try_stream! {
            if let Some(memory) = &mut self.memory {
                memory.push(Message::user(question));
            }

            let mut frontier = vec![Node {
                history: String::new(),
                score: 0.0,
            }];
            for depth in 0..self.config.max_depth {
                let candidates = self.expand(question, &frontier).await?;
                let Some(best) = candidates.first() else {
                    debug!("no thought proposed at depth {depth}, stopping");
                    break;
                };
                yield best.history.clone();
                frontier = candidates;
            }

            let best_history = frontier
                .first()
                .map(|node| node.history.clone())
                .unwrap_or_default();
            let answer = self.conclude(question, &best_history).await?;
            if let Some(memory) = &mut self.memory {
                memory.push(Message::assistant(answer.as_str()));
            }
            yield answer;
        })
    }

    fn memory(&self) -> Option<&dyn Memory> {
        self.memory.as_deref()
    }

    fn memory_mut(&mut self) -> Option<&mut dyn Memory> {
        self.memory.as_deref_mut().map(|memory| memory as &mut dyn Memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("0.8"), 0.8);
        assert_eq!(parse_score("スコア: 7"), 7.0);
        assert_eq!(parse_score("very promising"), 0.0);
        assert_eq!(parse_score(""), 0.0);
    }
}
