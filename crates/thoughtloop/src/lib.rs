//! An out-of-the-box agent that assembles the built-in tools, the reasoning
//! loops and a chat session.
//!
//! The crate includes a CLI tool for using in the terminal. And you can also
//! use it as a library to bring agent functionality into your own host apps.

#![deny(missing_docs)]

#[allow(unused_imports)]
#[macro_use]
extern crate tracing;

mod session;
pub mod tools;

pub use session::{Session, SessionBuilder};

/// Re-exports of [`thoughtloop_core`] crate.
pub mod core {
    pub use thoughtloop_core::*;
}
