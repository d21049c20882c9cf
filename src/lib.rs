//! tianji-engine: per-conversation chat-session orchestration for a
//! multi-agent assistant backend (metaphysics, stocks, health).
//!
//! The engine owns the lifecycle of one conversation turn: it serializes
//! turns per conversation behind an async lock, hydrates resident
//! transcripts from durable summaries and recent history, drives the model
//! through tool round-trips, polices search-class tool usage, streams typed
//! events to the caller, and recovers from malformed-tool-sequence gateway
//! rejections by rebuilding a minimal session and retrying once.
//!
//! Entry point is [`engine::ChatEngine`]; transports (HTTP, WebSocket, CLI)
//! sit above this crate and persistence sits below it, supplying
//! [`memory::StoredMessage`] history and storing the summaries the engine
//! produces.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod guard;
pub mod memory;
pub mod persona;
pub mod provider;
pub mod session;
pub mod tool;
pub mod transcript;

pub use engine::{ChatEngine, TurnOutcome, TurnRequest};
pub use error::{EngineError, GuardReason, UpstreamError, UpstreamErrorKind};
pub use events::{ToolInvocation, TurnEvent};
pub use persona::AgentKind;
