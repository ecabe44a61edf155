//! vigil - trigger platform operations and await their lifecycle events

use std::future::Future;
use std::pin::Pin;

use clap::Parser;
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vigil::api::ApiClient;
use vigil::config::{Args, Command};
use vigil::correlate::{CorrelationToken, Mode};
use vigil::error::VigilError;
use vigil::session::{self, SessionConfig};
use vigil::{auth, upload};

type TriggerFuture = Pin<Box<dyn Future<Output = Result<Option<CorrelationToken>, VigilError>> + Send>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("vigil={},info", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let ws_url = args.ws_url()?;
    let login_url = args.login_url()?;

    info!("======================================");
    info!("  vigil - operation event watcher");
    info!("======================================");
    info!("API endpoint: {}", args.api_url);
    info!("Streaming endpoint: {}", ws_url);
    info!("Handshake timeout: {}s", args.handshake_timeout_secs);
    match args.run_timeout_secs {
        Some(secs) => info!("Run deadline: {}s", secs),
        None => info!("Run deadline: none (wait indefinitely)"),
    }
    info!("======================================");

    let bearer = match auth::resolve_token(
        &login_url,
        args.token.clone(),
        args.username.clone(),
        args.password.clone(),
    )
    .await
    {
        Ok(token) => token,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let api = ApiClient::new(args.api_url.clone(), bearer.clone());

    let (mode, trigger): (Mode, Option<TriggerFuture>) = match args.command.clone() {
        Command::Run { key, variables } => {
            let vars = match variables {
                Some(raw) => serde_json::from_str(&raw)?,
                None => json!({}),
            };
            info!("Triggering run of operation '{}'", key);
            let api = api.clone();
            let action: TriggerFuture = Box::pin(async move {
                let receipt = api.trigger_run(&key, vars).await?;
                Ok(Some(receipt.run_id))
            });
            (Mode::PerRun, Some(action))
        }
        Command::Upload { file, key } => {
            info!("Uploading {} then triggering '{}'", file.display(), key);
            let api = api.clone();
            let action: TriggerFuture = Box::pin(async move {
                let report = upload::upload_file(&api, &file).await?;
                let receipt = api
                    .trigger_run(
                        &key,
                        json!({"uploadId": report.upload_id, "checksum": report.checksum}),
                    )
                    .await?;
                Ok(Some(receipt.run_id))
            });
            (Mode::PerRun, Some(action))
        }
        Command::Listen { key } => {
            let action = key.map(|key| {
                info!("Triggering '{}' on the shared subscription", key);
                let api = api.clone();
                let boxed: TriggerFuture = Box::pin(async move {
                    let receipt = api.trigger_run(&key, json!({})).await?;
                    Ok(Some(receipt.run_id))
                });
                boxed
            });
            (Mode::Shared, action)
        }
    };

    let session_cfg = SessionConfig {
        ws_url,
        bearer,
        handshake_timeout: args.handshake_timeout(),
        run_deadline: args.run_deadline(),
        mode,
    };

    match session::run_to_completion(session_cfg, trigger).await {
        Ok(outcome) if outcome.ok => {
            info!("Workflow finished successfully");
            Ok(())
        }
        Ok(_) => {
            error!("Run completed with a failure result");
            std::process::exit(1);
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}
