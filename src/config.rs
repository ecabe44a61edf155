//! Configuration for vigil
//!
//! CLI arguments and environment variable handling using clap. The
//! configuration is assembled once at startup, validated, and passed into
//! each component; missing or inconsistent values fail before anything
//! connects.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use url::Url;

use crate::error::VigilError;

/// vigil - trigger platform operations and await their lifecycle events
#[derive(Parser, Debug, Clone)]
#[command(name = "vigil")]
#[command(about = "Trigger platform operations and await their lifecycle events")]
pub struct Args {
    /// GraphQL endpoint of the platform API
    #[arg(long, env = "VIGIL_API_URL", default_value = "http://localhost:8080/graphql")]
    pub api_url: String,

    /// Streaming endpoint override; derived from the API URL when unset
    #[arg(long, env = "VIGIL_WS_URL")]
    pub ws_url: Option<String>,

    /// Bearer token; when unset, username/password are exchanged at the
    /// token endpoint
    #[arg(long, env = "VIGIL_TOKEN")]
    pub token: Option<String>,

    /// Username for the login exchange (prompted for when unset)
    #[arg(long, env = "VIGIL_USERNAME")]
    pub username: Option<String>,

    /// Password for the login exchange (prompted for when unset)
    #[arg(long, env = "VIGIL_PASSWORD")]
    pub password: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "VIGIL_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Deadline for the streaming handshake, in seconds
    #[arg(long, env = "VIGIL_HANDSHAKE_TIMEOUT_SECS", default_value = "15")]
    pub handshake_timeout_secs: u64,

    /// Overall deadline from trigger to terminal event, in seconds.
    /// Unset means wait indefinitely.
    #[arg(long, env = "VIGIL_RUN_TIMEOUT_SECS")]
    pub run_timeout_secs: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Trigger a run of a named operation and await its completion
    Run {
        /// Operation key identifying what to run
        key: String,

        /// Run variables as a JSON object
        #[arg(long)]
        variables: Option<String>,
    },

    /// Upload a file, trigger its processing run, and await completion
    Upload {
        /// File to upload
        file: PathBuf,

        /// Operation key for the processing run
        #[arg(long, env = "VIGIL_UPLOAD_KEY", default_value = "import")]
        key: String,
    },

    /// Listen on a shared subscription (events matched by name only).
    /// Correct only while at most one run is outstanding on the session.
    Listen {
        /// Optionally trigger this operation before listening
        #[arg(long)]
        key: Option<String>,
    },
}

impl Args {
    /// Effective streaming URL: explicit override, or the API URL with the
    /// scheme swapped to its WebSocket counterpart.
    pub fn ws_url(&self) -> Result<String, VigilError> {
        if let Some(ref ws) = self.ws_url {
            return Ok(ws.clone());
        }
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| VigilError::Config(format!("invalid API URL: {e}")))?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(VigilError::Config(format!(
                    "cannot derive a streaming URL from scheme {other}"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| VigilError::Config("cannot derive a streaming URL".to_string()))?;
        Ok(url.to_string())
    }

    /// Token endpoint, derived from the API URL origin.
    pub fn login_url(&self) -> Result<String, VigilError> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| VigilError::Config(format!("invalid API URL: {e}")))?;
        url.set_path("/auth/token");
        url.set_query(None);
        Ok(url.to_string())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        let api = Url::parse(&self.api_url).map_err(|e| format!("invalid API URL: {e}"))?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(format!("API URL must be http(s), got {}", api.scheme()));
        }

        if let Some(ref ws) = self.ws_url {
            let ws = Url::parse(ws).map_err(|e| format!("invalid streaming URL: {e}"))?;
            if !matches!(ws.scheme(), "ws" | "wss") {
                return Err(format!("streaming URL must be ws(s), got {}", ws.scheme()));
            }
        }

        if self.handshake_timeout_secs == 0 {
            return Err("handshake timeout must be at least one second".to_string());
        }

        if let Some(0) = self.run_timeout_secs {
            return Err("run timeout must be at least one second when set".to_string());
        }

        if let Command::Run { variables: Some(ref vars), .. } = self.command {
            let parsed: Result<serde_json::Value, _> = serde_json::from_str(vars);
            match parsed {
                Ok(serde_json::Value::Object(_)) => {}
                Ok(_) => return Err("run variables must be a JSON object".to_string()),
                Err(e) => return Err(format!("run variables are not valid JSON: {e}")),
            }
        }

        Ok(())
    }
}
