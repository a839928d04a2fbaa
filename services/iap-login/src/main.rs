//! iap-login
//!
//! Command-line companion for Google IAP-protected services:
//! 1. Installs the OAuth client descriptor (`configure`)
//! 2. Signs the user in through the browser with PKCE (`login`)
//! 3. Keeps the ID token fresh (`status`, `refresh`, `logout`)
//! 4. Calls the protected service with a bearer ID token (`request`)

mod callback;
mod commands;
mod config;
mod error;
mod login;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use iap_auth::InstallRequest;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::RequestArgs;
use crate::config::Config;
use crate::login::LoginOptions;

#[derive(Parser)]
#[command(name = "iap-login")]
#[command(version, about = "Sign in to Google IAP-protected services and call them with an ID token")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (defaults to <config dir>/iap-auth/iap-login.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// JSON output and JSON logs
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Install the OAuth client descriptor
    Configure {
        #[arg(long, env = "IAP_CLIENT_ID")]
        client_id: Option<String>,
        #[arg(long, env = "IAP_CLIENT_SECRET", hide_env_values = true)]
        client_secret: Option<String>,
        /// Copy a downloaded client_secrets.json instead
        #[arg(long, value_name = "PATH")]
        file: Option<PathBuf>,
        #[arg(long)]
        project_id: Option<String>,
    },
    /// Sign in through the browser
    Login {
        /// Paste the redirected URL instead of running a loopback listener
        #[arg(long)]
        manual: bool,
        /// Seconds to wait for the redirect (overrides [login] timeout_secs)
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },
    /// Show the stored tokens
    Status,
    /// Refresh the ID token now
    Refresh,
    /// Delete the stored tokens
    Logout,
    /// Send one authenticated request and print the response body
    Request {
        /// HTTP method (GET, POST, ...)
        method: String,
        /// Absolute URL, or a path joined to the base URL
        target: String,
        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
        /// Extra header, `Name: value` (repeatable)
        #[arg(short = 'H', long = "header", value_name = "HEADER")]
        headers: Vec<String>,
        /// Base URL for relative paths (overrides [http] base_url)
        #[arg(long)]
        base_url: Option<String>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = Config::resolve(cli.config.as_deref()).context("failed to load configuration")?;
    debug!(
        secrets_path = ?config.client.secrets_path,
        token_file = ?config.storage.token_file,
        base_url = ?config.http.base_url,
        "configuration loaded"
    );

    let mut stdout = std::io::stdout();

    match cli.command {
        Command::Configure {
            client_id,
            client_secret,
            file,
            project_id,
        } => {
            let request = InstallRequest {
                client_id,
                client_secret,
                source_path: file,
                project_id,
            };
            commands::configure(&config, &request, &mut stdout)?;
        }
        Command::Login { manual, timeout } => {
            let engine = commands::open_engine(&config).await?;
            let options = LoginOptions {
                timeout: timeout
                    .filter(|t| *t > 0)
                    .map(std::time::Duration::from_secs)
                    .unwrap_or_else(|| config.login_timeout()),
                manual,
            };
            info!(manual, timeout_secs = options.timeout.as_secs(), "starting sign-in");
            commands::login(&engine, &options, &mut stdout).await?;
        }
        Command::Status => {
            commands::status(&config, cli.json, &mut stdout).await?;
        }
        Command::Refresh => {
            let engine = commands::open_engine(&config).await?;
            commands::refresh(&engine, &mut stdout).await?;
        }
        Command::Logout => {
            commands::logout(&config, &mut stdout).await?;
        }
        Command::Request {
            method,
            target,
            data,
            headers,
            base_url,
        } => {
            // A token file alone is enough; the engine only adds refresh.
            let engine = match commands::open_engine(&config).await {
                Ok(engine) => Some(engine),
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "continuing without refresh support");
                    None
                }
            };
            let args = RequestArgs {
                method,
                target,
                data,
                headers,
                base_url,
            };
            commands::request(&config, engine, &args, &mut stdout).await?;
        }
    }

    Ok(())
}
