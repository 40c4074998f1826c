//! Tool-calling agent.
//!
//! [`AgentRun`] owns one conversation and yields [`AgentAction`]s for the
//! host to carry out.

pub mod agent_loop;
pub mod messages;

pub use agent_loop::{AgentAction, AgentConfig, AgentRun};
pub use messages::ChatMessage;
