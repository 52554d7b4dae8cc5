//! Core of a browser agent that books appointment slots through queue
//! sites, driven by a small local language model.
//!
//! Local models are cheap and private but sloppy about output format, and the
//! machines they run on are slow. This crate holds the parts that make that
//! combination workable:
//!
//! - **Completion normalization**: repairs the usual malformations of a model's
//!   JSON action before it is strictly parsed
//! - **Resilient invocation**: one OpenAI-compatible chat call per turn, with
//!   every failure folded into a closed error taxonomy
//! - **Control channel**: the browser WebSocket connection, opened with a
//!   keepalive policy long enough to survive multi-minute stalls
//! - **Configuration**: YAML settings with environment overrides

pub mod actions;
pub mod config;
pub mod core_types;
pub mod errors;
pub mod llm;
pub mod tokens;
pub mod transport;

pub use actions::{Action, ActionBatch, ElementIndex};
pub use config::*;
pub use core_types::{Completion, Message, Role, Usage};
pub use errors::{ChannelError, ConfigError, InvocationError};
pub use llm::{normalize, ChatModel, ChatModelExt, LocalChatClient, OutputFormat, OutputShape};
pub use tokens::estimate_tokens;
pub use transport::{ConnectParams, ControlClient, KeepalivePolicy};

#[cfg(test)]
pub mod test_utils;
