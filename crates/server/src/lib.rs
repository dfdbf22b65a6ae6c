//! klaude wrapper internals
//!
//! The per-project wrapper instance (store, socket server, TUI and runtime
//! lifecycles) plus the CLI client commands and hook entry points. The
//! `klaude` binary in `main.rs` is a thin dispatcher over this crate.

pub mod agents;
pub mod client;
pub mod cmd_install_hooks;
pub mod cmd_instances;
pub mod cmd_logs;
pub mod cmd_sessions;
pub mod config;
pub mod error;
pub mod events;
pub mod hooks;
pub mod logging;
pub mod orchestrator;
pub mod paths;
pub mod registry;
pub mod router;
pub mod runtime;
pub mod selector;
pub mod socket;
pub mod store;
pub mod tui;
pub mod updates;
