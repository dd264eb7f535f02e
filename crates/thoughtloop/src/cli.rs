use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use thoughtloop::core::AgentKind;
use thoughtloop::core::memory::MemoryKind;

/// Answers questions by reasoning with a language model and a set of tools.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// How questions are answered
    #[arg(long, value_enum, default_value_t = AgentMode::Chat)]
    pub agent: AgentMode,

    /// Memory used by the reasoning agents
    #[arg(long, value_enum, default_value_t = MemoryMode::Conversation)]
    pub memory: MemoryMode,

    /// Memory file, loaded at start if present and saved at exit
    #[arg(long)]
    pub memory_file: Option<PathBuf>,

    /// Turn budget of the ReAct and CoT agents
    #[arg(long, default_value_t = 5)]
    pub max_turns: usize,

    /// Depth of the tree-of-thoughts search
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u64).range(1..))]
    pub depth: u64,

    /// Candidates kept per level of the tree-of-thoughts search
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u64).range(1..))]
    pub breadth: u64,

    /// Tool rounds a single chat turn may take
    #[arg(long, default_value_t = 8)]
    pub max_tool_rounds: usize,

    /// Seconds a single model request may take
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Print intermediate steps as they are produced
    #[arg(long)]
    pub stream: bool,

    /// Also write logs to this file
    #[arg(long, env = "AGENT_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// SQLite database queried by the sql_query tool
    #[arg(long, default_value = "data.db")]
    pub db: PathBuf,

    /// Directory conversations are exported to
    #[arg(long, default_value = "conversations")]
    pub conversations_dir: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum AgentMode {
    /// Plain chat with tool calling
    Chat,
    /// Reason and act
    React,
    /// Tree of thoughts
    Tot,
    /// Chain of thought
    Cot,
}

impl AgentMode {
    /// Returns the reasoning agent of this mode, `None` for plain chat.
    pub fn agent_kind(self) -> Option<AgentKind> {
        match self {
            AgentMode::Chat => None,
            AgentMode::React => Some(AgentKind::React),
            AgentMode::Tot => Some(AgentKind::Tot),
            AgentMode::Cot => Some(AgentKind::Cot),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum MemoryMode {
    /// Ordered message log
    Conversation,
    /// Message log searchable by similarity
    Vector,
}

impl From<MemoryMode> for MemoryKind {
    fn from(mode: MemoryMode) -> Self {
        match mode {
            MemoryMode::Conversation => MemoryKind::Conversation,
            MemoryMode::Vector => MemoryKind::Vector,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["thoughtloop"]).unwrap();
        assert_eq!(cli.agent, AgentMode::Chat);
        assert_eq!(cli.memory, MemoryMode::Conversation);
        assert_eq!(cli.max_turns, 5);
        assert_eq!((cli.depth, cli.breadth), (2, 2));
        assert_eq!(cli.max_tool_rounds, 8);
        assert_eq!(cli.timeout, 60);
        assert_eq!(cli.db, PathBuf::from("data.db"));
        assert!(!cli.stream);
        assert_eq!(cli.agent.agent_kind(), None);
    }

    #[test]
    fn test_agent_options() {
        let cli = Cli::try_parse_from([
            "thoughtloop",
            "--agent",
            "tot",
            "--memory",
            "vector",
            "--depth",
            "3",
            "--breadth",
            "1",
            "--temperature",
            "0.2",
            "--stream",
        ])
        .unwrap();
        assert_eq!(cli.agent.agent_kind(), Some(AgentKind::Tot));
        assert_eq!(MemoryKind::from(cli.memory), MemoryKind::Vector);
        assert_eq!((cli.depth, cli.breadth), (3, 1));
        assert_eq!(cli.temperature, Some(0.2));
        assert!(cli.stream);
    }

    #[test]
    fn test_rejects_empty_search() {
        for args in [
            ["thoughtloop", "--depth", "0"],
            ["thoughtloop", "--breadth", "0"],
            ["thoughtloop", "--depth", "-1"],
            ["thoughtloop", "--agent", "smart"],
            ["thoughtloop", "--timeout", "0"],
        ] {
            assert!(Cli::try_parse_from(args).is_err(), "{args:?}");
        }
    }
}
