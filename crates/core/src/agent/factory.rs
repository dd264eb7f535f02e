use std::fmt::{self, Display};
use std::str::FromStr;

use super::{
    Agent, CotAgent, CotConfig, ModelEvaluator, ReActAgent, ReActConfig,
    TotAgent, TotConfig,
};
use crate::memory::Memory;
use crate::tool::Registry;
use crate::{Error, ModelClient};

/// The agent variants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AgentKind {
    /// Reasoning interleaved with tool calls.
    #[default]
    React,
    /// Tree-of-thought search.
    Tot,
    /// Chain of thought, no tools.
    Cot,
}

impl Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentKind::React => write!(f, "react"),
            AgentKind::Tot => write!(f, "tot"),
            AgentKind::Cot => write!(f, "cot"),
        }
    }
}

impl FromStr for AgentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "react" => Ok(AgentKind::React),
            "tot" => Ok(AgentKind::Tot),
            "cot" => Ok(AgentKind::Cot),
            other => Err(Error::Config(format!("unknown agent: {other}"))),
        }
    }
}

/// Everything an agent may be built from.
pub struct AgentContext {
    /// The model client.
    pub client: ModelClient,
    /// Tools available to agents that act.
    pub tools: Registry,
    /// The memory to record into.
    pub memory: Option<Box<dyn Memory>>,
    /// Settings of the ReAct agent.
    pub react: ReActConfig,
    /// Settings of the tree-of-thought agent.
    pub tot: TotConfig,
    /// Settings of the chain-of-thought agent.
    pub cot: CotConfig,
}

impl AgentContext {
    /// Creates a context with no tool, no memory and default settings.
    pub fn new(client: ModelClient) -> Self {
        Self {
            client,
            tools: Registry::new(),
            memory: None,
            react: ReActConfig::default(),
            tot: TotConfig::default(),
            cot: CotConfig::default(),
        }
    }

    /// Sets the tools.
    #[inline]
    pub fn with_tools(mut self, tools: Registry) -> Self {
        self.tools = tools;
        self
    }

    /// Sets the memory.
    #[inline]
    pub fn with_memory(mut self, memory: Box<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }
}

/// Builds the agent of the given kind.
///
/// The tree-of-thought agent scores candidates with the model itself.
pub fn build_agent(kind: AgentKind, context: AgentContext) -> Box<dyn Agent> {
    let AgentContext {
        client,
        tools,
        memory,
        react,
        tot,
        cot,
    } = context;
    debug!("building {kind} agent");

    match kind {
        AgentKind::React => {
            let agent = ReActAgent::new(client, tools, react);
            match memory {
                Some(memory) => Box::new(agent.with_memory(memory)),
                None => Box::new(agent),
            }
        }
        AgentKind::Tot => {
            let evaluator = ModelEvaluator::new(client.clone());
            let agent = TotAgent::new(client, evaluator, tot);
            match memory {
                Some(memory) => Box::new(agent.with_memory(memory)),
                None => Box::new(agent),
            }
        }
        AgentKind::Cot => {
            let agent = CotAgent::new(client, cot);
            match memory {
                Some(memory) => Box::new(agent.with_memory(memory)),
                None => Box::new(agent),
            }
        }
    }
}
