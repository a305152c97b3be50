//! User-facing Rust SDK for the Foundation collaboration API.
//!
//! The crate is organized by surface:
//! - `client`: authenticating HTTP executor every other surface goes through.
//! - `auth`: credentials and the shared session token.
//! - `stream`: long-poll event streaming with listener fan-out.
//! - `collaboration`: channel, message and metadata calls.
//! - `retry`: back-off and cancellation helpers.

/// Credentials and session token storage.
pub mod auth;
/// Authenticating request executor and its error type.
pub mod client;
/// Channel, message and metadata wrappers.
pub mod collaboration;
/// Retry back-off helpers used by the poll loop.
pub mod retry;
/// Event streaming engine, listeners and event decoding.
pub mod stream;

pub use auth::Credentials;
pub use client::{ApiClient, ApiClientOptions, ApiError, ApiRequest};
