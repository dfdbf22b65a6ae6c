//! Klaude Protocol
//!
//! Shared types for communication between the wrapper instance, the CLI, and
//! the hook entry points. Requests and responses are serialized as
//! newline-delimited JSON over the instance's Unix socket.

pub mod client;
pub mod error;
pub mod events;
pub mod server;
pub mod types;

pub use client::{Action, Request};
pub use error::ErrorCode;
pub use server::{ErrorBody, Response};
pub use types::*;
