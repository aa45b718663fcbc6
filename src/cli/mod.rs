//! Command-line interface components
//!
//! CLI-specific code for the PataBima diagnostic binary: argument parsing
//! and command handlers.

pub mod args;
pub mod commands;

pub use args::{Cli, Commands, GlobalArgs, LoginArgs, RequestArgs};
pub use commands::{handle_login, handle_logout, handle_request, handle_status};
