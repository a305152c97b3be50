//! Event streaming modules.
//!
//! - `client`: streaming poll engine, filter and lifecycle status.
//! - `listeners`: listener registration and fan-out.
//! - `proto`: event payloads and the tagged-event decoder.

/// Poll loop owner and stream lifecycle.
pub mod client;
/// Listener registry shared by the poll loop and callers.
pub mod listeners;
/// Event types and decoding.
pub mod proto;

pub use client::{StreamError, StreamFilter, StreamOptions, StreamStatus, StreamingClient};
pub use listeners::{EventListener, ListenerId};
pub use proto::{Event, EventType};
