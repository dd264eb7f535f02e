//! The completion gateway contract.
//!
//! Agents never talk to a language-model service directly. They go through
//! the narrow protocol defined here: a provider accepts a [`ModelRequest`]
//! and answers with a [`ModelResponse`], which is a pollable sequence of
//! incremental events (text fragments, partial tool-call descriptors and a
//! finish reason).
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that gateway implementors should adhere to. Assembling the
//! fragments into complete answers and tool invocations is left to the
//! consumers.

#![deny(missing_docs)]

mod error;
mod message;
mod provider;
mod request;
mod response;

pub use error::*;
pub use message::*;
pub use provider::*;
pub use request::*;
pub use response::*;
