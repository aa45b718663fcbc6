//! Command handlers for the PataBima CLI
//!
//! Coordinates between CLI arguments and the client library: builds the
//! configured [`ApiClient`] over the file-backed credential store and runs
//! one command against it.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use tracing::info;

use crate::app::{ApiClient, EndpointCandidates, ProbePolicy, RequestDescriptor};
use crate::auth::FileCredentialStore;
use crate::cli::{LoginArgs, RequestArgs};
use crate::config::AppConfig;
use crate::errors::{AppError, Result};

/// Build the client from the configuration file and stored credentials
fn build_client(config_path: Option<PathBuf>) -> Result<ApiClient> {
    let app_config = match config_path {
        Some(path) => AppConfig::load(Some(path))?,
        None => AppConfig::initialize()?,
    };
    let client_config = app_config.to_client_config()?;
    let store = Arc::new(FileCredentialStore::new().map_err(AppError::from)?);
    ApiClient::new(client_config, store)
}

/// Handle the login command: password step, OTP prompt, verification
pub async fn handle_login(args: LoginArgs, config_path: Option<PathBuf>) -> Result<()> {
    let client = build_client(config_path)?;

    let password = rpassword::prompt_password("Password: ")
        .map_err(|e| AppError::generic(format!("failed to read password: {e}")))?;

    info!("Requesting OTP challenge");
    let challenge = client.login(&args.phonenumber, &password).await?;
    if let Some(detail) = challenge.get("detail").and_then(Value::as_str) {
        println!("{detail}");
    }

    print!("OTP code: ");
    io::stdout().flush()?;
    let mut code = String::new();
    io::stdin().read_line(&mut code)?;
    let code = code.trim();

    let outcome = client.verify_otp(&args.phonenumber, &password, code).await?;
    match outcome.get("access") {
        Some(_) => {
            println!("Logged in.");
            if let Some(role) = outcome.get("user_role").and_then(Value::as_str) {
                println!("Role: {role}");
            }
        }
        None => println!("Login did not return a session: {outcome}"),
    }
    Ok(())
}

/// Handle the request command: build a descriptor from the arguments and
/// probe the given candidate paths
pub async fn handle_request(args: RequestArgs, config_path: Option<PathBuf>) -> Result<()> {
    args.validate().map_err(AppError::generic)?;
    let client = build_client(config_path)?;

    let method: Method = args
        .method
        .to_uppercase()
        .parse()
        .map_err(|_| AppError::generic(format!("unsupported method: {}", args.method)))?;
    let body = args
        .body
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .map_err(|e| AppError::generic(format!("body is not valid JSON: {e}")))?;

    let mut template = RequestDescriptor::new(method, args.paths[0].as_str(), body);
    if let Some(seconds) = args.timeout {
        template = template.with_timeout(Duration::from_secs(seconds));
    }
    if args.anonymous {
        template = template.anonymous();
    }

    let mut policy = if args.strict {
        ProbePolicy::strict()
    } else {
        ProbePolicy::discovery()
    };
    if args.break_on_unauthorized {
        policy = policy.break_on_unauthorized();
    }

    let candidates = EndpointCandidates::new(args.trace_key.clone(), args.paths.clone());
    let response = client.resolve(&candidates, &policy, template).await?;

    if let Some(endpoint) = client.last_used_endpoint(&args.trace_key) {
        info!("Served by {endpoint}");
    }
    println!("{}", serde_json::to_string_pretty(&response.body)?);
    Ok(())
}

/// Handle the status command
pub async fn handle_status(config_path: Option<PathBuf>) -> Result<()> {
    let client = build_client(config_path)?;

    println!("Auth state:  {:?}", client.auth_state().await);
    println!("Active host: {}", client.active_host().await);
    if let Ok(path) = AppConfig::default_config_path() {
        println!("Config file: {}", path.display());
    }
    if let Ok(store) = FileCredentialStore::new() {
        println!("Credentials: {}", store.path().display());
    }
    Ok(())
}

/// Handle the logout command
pub async fn handle_logout(config_path: Option<PathBuf>) -> Result<()> {
    let client = build_client(config_path)?;
    client.logout().await;
    println!("Session cleared.");
    Ok(())
}

