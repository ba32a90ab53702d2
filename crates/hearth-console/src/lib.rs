//! Console attachment multiplexer: one process's stdio fanned out to many
//! viewers, with history replay, echo control, serialized lifecycle
//! operations and a rate-limited webhook relay.

pub mod action_lock;
pub mod config;
pub mod control;
pub mod error;
pub mod hub;
pub mod launcher;
pub mod multiplexer;
mod registry;
pub mod ring_buffer;
pub mod session;
pub mod store;
pub mod viewer;
mod webhook;

#[cfg(test)]
mod testing;

pub use config::{ConsoleConfig, FanoutPolicy, WebhookConfig};
pub use control::ControlSignal;
pub use error::{ConsoleError, ConsoleResult};
pub use hub::ConsoleHub;
pub use launcher::ProcessLauncher;
pub use multiplexer::Multiplexer;
pub use ring_buffer::RingBuffer;
pub use session::ProcessSession;
pub use store::{MemoryStore, ResourceRecord, ResourceStore};
pub use viewer::{ConsoleLine, ViewerOptions, ViewerSession};
