//! Command-line argument parsing for the PataBima client
//!
//! Defines the CLI structure using clap derive macros. The binary is a
//! diagnostic surface over the client library: it can establish a session,
//! issue arbitrary requests (including candidate probing), and report
//! session state.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// PataBima client - backend diagnostics
#[derive(Parser, Debug)]
#[command(
    name = "patabima",
    version,
    about = "Issue authenticated requests against the PataBima backend",
    long_about = "Diagnostic client for the PataBima insurance backend.
Handles the two-step OTP login, automatic token refresh, endpoint candidate
probing and host failover."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Global arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in with phone number and password (two-step OTP flow)
    Login(LoginArgs),

    /// Issue a request against the backend
    Request(RequestArgs),

    /// Show session state and active host
    Status,

    /// Clear the stored session
    Logout,
}

/// Arguments for the login command
#[derive(Args, Debug, Clone)]
pub struct LoginArgs {
    /// Phone number (9 digits, without the leading zero)
    pub phonenumber: String,
}

/// Arguments for the request command
#[derive(Args, Debug, Clone)]
pub struct RequestArgs {
    /// Candidate path(s), probed in order until one succeeds
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// HTTP method
    #[arg(short, long, default_value = "GET")]
    pub method: String,

    /// JSON request body
    #[arg(short, long)]
    pub body: Option<String>,

    /// Per-request timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Issue without an Authorization header
    #[arg(long)]
    pub anonymous: bool,

    /// Abort probing on the first non-404-class failure
    #[arg(long)]
    pub strict: bool,

    /// Abort probing on 401/403 instead of trying further candidates
    #[arg(long)]
    pub break_on_unauthorized: bool,

    /// Trace key the winning candidate is recorded under
    #[arg(long, default_value = "cli_request")]
    pub trace_key: String,
}

impl RequestArgs {
    /// Validate argument combinations before any network activity
    pub fn validate(&self) -> Result<(), String> {
        let method = self.method.to_uppercase();
        if !matches!(method.as_str(), "GET" | "POST" | "PUT" | "PATCH" | "DELETE") {
            return Err(format!("unsupported method: {}", self.method));
        }
        if method == "GET" && self.body.is_some() {
            return Err("GET requests cannot carry a body".to_string());
        }
        if let Some(raw) = &self.body {
            serde_json::from_str::<serde_json::Value>(raw)
                .map_err(|e| format!("body is not valid JSON: {e}"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_args(method: &str, body: Option<&str>) -> RequestArgs {
        RequestArgs {
            paths: vec!["/api/v1/ping".to_string()],
            method: method.to_string(),
            body: body.map(str::to_string),
            timeout: None,
            anonymous: false,
            strict: false,
            break_on_unauthorized: false,
            trace_key: "cli_request".to_string(),
        }
    }

    #[test]
    fn verify_cli_structure() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn validates_method_and_body() {
        assert!(request_args("get", None).validate().is_ok());
        assert!(request_args("POST", Some(r#"{"a":1}"#)).validate().is_ok());
        assert!(request_args("TRACE", None).validate().is_err());
        assert!(request_args("GET", Some("{}")).validate().is_err());
        assert!(request_args("POST", Some("not json")).validate().is_err());
    }
}
