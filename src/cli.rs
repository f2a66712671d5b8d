use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::app::App;
use crate::constants::usage::DEFAULT_WINDOW_HOURS;
use crate::errors::IntegrationError;
use crate::services::logger::Logger;
use crate::services::settings::Settings;
use crate::services::url_guard::{SystemResolver, UrlGuard};
use crate::services::vault::Vault;
use crate::services::webhook::sign_webhook_payload;

#[derive(Debug, Parser)]
#[command(name = "callgate", version, about = "Operator tooling for outbound integration calls")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print a fresh 64-hex-character encryption key.
    GenKey,
    /// Encrypt a value with CALLGATE_ENCRYPTION_KEY.
    Encrypt { plaintext: String },
    /// Decrypt an `<iv>:<tag>:<data>` blob with CALLGATE_ENCRYPTION_KEY.
    Decrypt { blob: String },
    /// Run the outbound URL check without sending anything.
    CheckUrl {
        url: String,
        #[arg(long)]
        allow_private: bool,
    },
    /// Compute the webhook signature header value for a payload.
    Sign {
        #[arg(long)]
        secret: String,
        #[arg(long, conflicts_with = "file")]
        data: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Usage statistics from the configured database.
    Stats {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        configuration: Option<Uuid>,
        #[arg(long, default_value_t = DEFAULT_WINDOW_HOURS)]
        hours: u32,
    },
}

fn print_json(value: &Value) -> Result<(), IntegrationError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run(cli: Cli, settings: Settings) -> Result<(), IntegrationError> {
    match cli.command {
        Command::GenKey => {
            println!("{}", Vault::generate_key());
            Ok(())
        }
        Command::Encrypt { plaintext } => {
            let vault = Vault::new(settings.encryption_key);
            println!("{}", vault.encrypt(&plaintext)?);
            Ok(())
        }
        Command::Decrypt { blob } => {
            let vault = Vault::new(settings.encryption_key);
            println!("{}", vault.decrypt(blob.trim())?);
            Ok(())
        }
        Command::CheckUrl { url, allow_private } => {
            let guard = UrlGuard::new(Logger::new("callgate"), Arc::new(SystemResolver))
                .allow_private_networks(allow_private || settings.allow_private_networks);
            let target = guard.validate(&url).await?;
            print_json(&serde_json::json!({
                "allowed": true,
                "url": target.url.as_str(),
                "host": target.host,
                "addresses": target.addrs.iter().map(|a| a.ip().to_string()).collect::<Vec<_>>(),
            }))
        }
        Command::Sign { secret, data, file } => {
            let payload = match (data, file) {
                (Some(data), _) => data.into_bytes(),
                (None, Some(path)) => std::fs::read(path)?,
                (None, None) => {
                    return Err(IntegrationError::validation(
                        "Provide the payload with --data or --file",
                    ))
                }
            };
            println!("{}", sign_webhook_payload(&secret, &payload)?);
            Ok(())
        }
        Command::Stats {
            owner,
            configuration,
            hours,
        } => {
            if settings.database_path.is_none() {
                return Err(IntegrationError::misconfigured(
                    "Usage statistics need a database",
                )
                .with_hint("Set CALLGATE_DATABASE_PATH."));
            }
            let app = App::initialize(settings)?;
            let stats = app.get_usage_stats(&owner, configuration, hours).await?;
            print_json(&serde_json::to_value(stats)?)
        }
    }
}
