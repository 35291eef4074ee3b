mod callback_server;
mod config;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use authkit_http::HttpClientBuilder;
use authkit_oauth2::{AuthCodeClient, AuthError, FileTokenStore, UserId, auth_error};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use clap::{Parser, Subcommand};
use rand::Rng;
use tracing_subscriber::EnvFilter;

use crate::config::CliConfig;

/// authkit - OAuth2 authorization-code client
#[derive(Parser)]
#[command(name = "authkit")]
#[command(about = "Obtain, refresh and use OAuth2 authorization-code tokens")]
#[command(version)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Token slot to use (overrides `oauth2.user_id`)
    #[arg(short, long)]
    user: Option<String>,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the consent URL
    AuthUrl {
        /// Opaque value echoed back on the redirect
        #[arg(long)]
        state: Option<String>,
    },
    /// Open a local listener on the redirect URI and complete the flow
    Login,
    /// Exchange the query string of a redirect, e.g. "code=4/0Ab...&state=..."
    Exchange { query: String },
    /// Perform an authenticated GET and print the response body
    Get { url: String },
    /// Revoke the stored grant at the provider
    Revoke,
}

fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = CliConfig::load(cli.config.as_deref())?;
    let api_http = config.api_http_config();
    let store = Arc::new(FileTokenStore::new(&config.token_file));
    let auth = AuthCodeClient::new(config.oauth2, store).context("invalid oauth2 configuration")?;

    if let Some(user) = cli.user {
        auth.update_config(|c| c.user_id = Some(UserId::new(user)))?;
    }

    match cli.command {
        Commands::AuthUrl { state } => {
            println!("{}", auth.authorization_url(state.as_deref())?);
        }
        Commands::Login => login(&auth).await?,
        Commands::Exchange { query } => {
            let pair = auth.handle_callback(&query).await?;
            report_exchange(pair.refresh_token.is_some());
        }
        Commands::Get { url } => {
            let client = auth.api_client(HttpClientBuilder::with_config(api_http))?;
            let resp = match client.get(&url).send().await {
                Ok(resp) => resp,
                Err(e) => return Err(explain(&e).unwrap_or_else(|| e.into())),
            };
            let status = resp.status();
            let body = resp.bytes().await?;
            eprintln!("HTTP {status}");
            std::io::stdout().write_all(&body)?;
            if !status.is_success() {
                anyhow::bail!("request failed with HTTP {status}");
            }
        }
        Commands::Revoke => {
            if auth.revoke().await? {
                println!("grant revoked");
            } else {
                println!("no stored token to revoke");
            }
        }
    }

    Ok(())
}

async fn login(auth: &AuthCodeClient) -> Result<()> {
    let state = random_state();
    let (listener, path) = callback_server::bind(&auth.config().redirect_uri).await?;

    println!("Open this URL in a browser to authorize:\n\n{}\n", auth.authorization_url(Some(&state))?);

    let query = callback_server::receive_query(listener, &path).await?;
    let pair = auth
        .callback_handler()
        .handle_callback_with_state(&query, &state)
        .await?;
    report_exchange(pair.refresh_token.is_some());
    Ok(())
}

fn report_exchange(has_refresh: bool) {
    if has_refresh {
        println!("tokens stored (access + refresh)");
    } else {
        println!("access token stored (no refresh token returned)");
    }
}

/// Turn an auth failure carried by the HTTP client into an actionable message.
fn explain(err: &authkit_http::HttpError) -> Option<anyhow::Error> {
    let auth = auth_error(err)?;
    Some(match auth {
        AuthError::KeyExpired | AuthError::InvalidRefresh(_) => {
            anyhow::anyhow!("{auth}; run `authkit login` to authorize again")
        }
        other => anyhow::anyhow!("{other}"),
    })
}

/// 256-bit CSRF token for the `state` parameter.
fn random_state() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}
