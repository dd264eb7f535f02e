//! Core logic of the agents: model client, tool dispatching, memory, the
//! reasoning loops and the streaming turn assembler.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

pub mod agent;
mod assembler;
mod error;
pub mod export;
pub mod memory;
mod model_client;
pub mod tool;

pub use agent::{Agent, AgentContext, AgentKind, build_agent};
pub use assembler::{
    ASSISTANT_PREFIX, AgentRun, AssemblerConfig, StreamItem, TurnAssembler,
    spawn_agent,
};
pub use error::Error;
pub use memory::Memory;
pub use model_client::{ModelClient, ModelClientResponse};
pub use tool::{Registry, Tool, ToolResult};
