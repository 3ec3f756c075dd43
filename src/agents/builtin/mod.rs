//! Built-in agents.

mod echo;

pub use echo::{EchoAgent, ECHO_AGENT_ID};
