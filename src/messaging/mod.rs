//! Event messaging between executions and their observers.
//!
//! Agents never talk to observers directly. Their output goes through a
//! [`MessageAdapter`] which stamps tab and agent identity and publishes to
//! the [`EventBus`]; UIs, loggers and history recorders subscribe there.
//!
//! ```text
//!     ┌──────────┐   ┌──────────┐   ┌──────────┐
//!     │ Renderer │   │ History  │   │  Logger  │
//!     └────▲─────┘   └────▲─────┘   └────▲─────┘
//!          └──────────────┼──────────────┘
//!                    ┌────┴─────┐
//!                    │ EventBus │  validate → exact type → wildcard
//!                    └────▲─────┘
//!                         │ emit
//!                 ┌───────┴────────┐
//!                 │ MessageAdapter │  AgentOutput → AgentEvent
//!                 └───────▲────────┘
//!                         │ sinks
//!                    ┌────┴────┐
//!                    │  Agent  │
//!                    └─────────┘
//! ```

mod adapter;
mod bus;
mod types;

pub use adapter::MessageAdapter;
pub use bus::{
    BusError, EventBus, EventError, EventHandler, EventReceiver, ListenerId, Subscription,
    WeakEventBus, DEFAULT_CHANNEL_CAPACITY,
};
pub use types::*;
