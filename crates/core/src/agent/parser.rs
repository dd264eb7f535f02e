//! The text grammar reasoning loops use to read model output.

use std::sync::LazyLock;

use regex::Regex;

static ACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^行動:\s*(\w+):\s*(.*)$").expect("valid action regex")
});
static FINAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^最終的な答え:\s*(.*)$").expect("valid final regex")
});

/// What a model output asks the loop to do next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// The model produced its final answer.
    Final(String),
    /// The model wants to run `tool` with a free-form `input`.
    Action {
        /// Name of the tool.
        tool: String,
        /// The text following the tool name.
        input: String,
    },
    /// Neither an answer nor an action could be found.
    Unrecognized,
}

/// Interprets raw model output for the reasoning loops.
pub trait OutputParser: Send + Sync {
    /// Classifies `output`. A final answer takes priority over an action.
    fn parse(&self, output: &str) -> Step;
}

/// The line-marker grammar:
///
/// ```text
/// 行動: <tool_name>: <tool_input>
/// 最終的な答え: <answer>
/// ```
///
/// Markers must start a line. Only the first match of each is considered.
#[derive(Clone, Copy, Debug, Default)]
pub struct MarkerParser;

impl OutputParser for MarkerParser {
    fn parse(&self, output: &str) -> Step {
        if let Some(answer) = final_answer(output) {
            return Step::Final(answer.to_owned());
        }
        match ACTION_RE.captures(output) {
            Some(caps) => Step::Action {
                tool: caps[1].to_owned(),
                input: caps[2].trim_end().to_owned(),
            },
            None => Step::Unrecognized,
        }
    }
}

/// Extracts the text following the final-answer marker, if any.
pub fn final_answer(output: &str) -> Option<&str> {
    FINAL_RE
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end())
}
