//! Credential acquisition
//!
//! Resolves the bearer token the HTTP calls and the streaming upgrade
//! carry. Order: an explicitly supplied token wins; otherwise username and
//! password (flag, environment, or console prompt) are exchanged at the
//! platform's token endpoint for a short-lived bearer.

use std::io::{self, BufRead, Write};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::VigilError;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Resolve the bearer token for this invocation.
pub async fn resolve_token(
    login_url: &str,
    token: Option<String>,
    username: Option<String>,
    password: Option<String>,
) -> Result<String, VigilError> {
    if let Some(token) = token {
        debug!("using supplied bearer token");
        return Ok(token);
    }

    let username = match username {
        Some(u) => u,
        None => prompt("username: ")?,
    };
    let password = match password {
        Some(p) => p,
        None => prompt("password (input echoes): ")?,
    };

    login(login_url, &username, &password).await
}

/// Exchange username/password for a bearer token.
async fn login(login_url: &str, username: &str, password: &str) -> Result<String, VigilError> {
    let response = reqwest::Client::new()
        .post(login_url)
        .json(&serde_json::json!({"username": username, "password": password}))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(VigilError::Auth(format!(
            "login rejected with status {}",
            response.status()
        )));
    }

    let token: TokenResponse = response.json().await?;
    match token.expires_in {
        Some(secs) => info!(username = %username, expires_in_secs = secs, "authenticated"),
        None => info!(username = %username, "authenticated"),
    }
    Ok(token.access_token)
}

/// Read one line from the operator. Console I/O is an operator-visibility
/// side channel only, never part of the protocol contract.
fn prompt(label: &str) -> Result<String, VigilError> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(label.as_bytes())?;
    stdout.flush()?;

    let mut line = String::new();
    let read = io::stdin().lock().read_line(&mut line)?;
    if read == 0 {
        return Err(VigilError::Auth("no credentials provided on stdin".into()));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
