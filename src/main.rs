//! mixi CLI - command-line front end for the mixi Graph API
//!
//! Reads the application config from the user config directory and keeps
//! credentials in a session file next to it.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Method;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mixi_cli::api::{ApiClient, ApiResponse, Form, FormValue};
use mixi_cli::auth::TokenManager;
use mixi_cli::config::{AppConfig, SessionFile};

#[derive(Parser)]
#[command(name = "mixi-cli")]
#[command(about = "Lightweight CLI client for the mixi Graph API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the authorization page URL to open in a browser
    LoginUrl {
        /// Opaque value echoed back on the redirect
        #[arg(short, long)]
        state: Option<String>,
    },

    /// Exchange an authorization code (or the full callback query) for tokens
    Authorize {
        /// Code, or a `code=...&state=...` query copied from the redirect
        code: String,
    },

    /// Refresh the access token
    Refresh {
        /// Hit the token endpoint even if a token was just obtained
        #[arg(short, long)]
        force: bool,
    },

    /// Show current authentication status
    Status {
        /// Scopes to check instead of the configured ones
        #[arg(short, long)]
        scope: Option<String>,
    },

    /// Show current user info (verify auth works)
    Whoami,

    /// Post a mixi Voice status
    Voice {
        /// Status text
        status: String,

        /// Photo to attach
        #[arg(short, long)]
        photo: Option<PathBuf>,
    },

    /// Call an arbitrary API endpoint
    Call {
        /// Endpoint path (e.g. /2/people/@me/@friends) or absolute URL
        endpoint: String,

        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Parameters as key=value (repeatable; `@path` attaches a file with --multipart)
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Send the body as multipart/form-data
        #[arg(long)]
        multipart: bool,
    },
}

fn open_tokens() -> Result<TokenManager<SessionFile>> {
    let config = AppConfig::load()?;
    let store = SessionFile::open_default()?;
    tracing::debug!("Session file: {}", store.path().display());
    TokenManager::new(config, store).context("Invalid endpoint configuration")
}

fn parse_params(raw: &[String]) -> Result<Form> {
    let mut form = Form::new();
    for pair in raw {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("Parameter '{}' is not key=value", pair);
        };
        form.set(key, FormValue::Text(value.to_string()));
    }
    Ok(form)
}

fn print_response(resp: ApiResponse) -> Result<()> {
    match resp {
        ApiResponse::Empty => println!("OK"),
        ApiResponse::Json(value) => println!("{}", serde_json::to_string_pretty(&value)?),
    }
    Ok(())
}

async fn status(scope: Option<String>) -> Result<()> {
    let tokens = open_tokens()?;
    let creds = tokens.credentials();

    println!("Session key:  {}", tokens.session_key());
    if creds.access_token.is_empty() {
        println!("Access token: none");
        println!("\nRun 'mixi-cli login-url' and then 'mixi-cli authorize <code>'.");
        return Ok(());
    }

    if tokens.is_authenticated() {
        println!("Access token: valid");
    } else {
        println!("Access token: expired");
    }
    println!("  expires_at: {}", creds.expires_at);
    if creds.refresh_token.is_empty() {
        println!("Refresh tok:  none");
    } else {
        println!("Refresh tok:  present");
    }
    println!("Granted:      {}", creds.granted_scope);

    let requested = scope.unwrap_or_else(|| tokens.config().scope.clone());
    let approved = tokens.is_approved(Some(&requested));
    println!(
        "Approved:     {} ({})",
        if approved { "yes" } else { "no" },
        requested
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::LoginUrl { state } => {
            let tokens = open_tokens()?;
            let extra: Vec<(&str, &str)> = state.iter().map(|s| ("state", s.as_str())).collect();
            println!("{}", tokens.login_url(&extra));
        }
        Commands::Authorize { code } => {
            let mut tokens = open_tokens()?;
            let ok = if code.contains("code=") {
                tokens.handle_callback(&code).await.unwrap_or(false)
            } else {
                tokens.exchange_authorization_code(&code).await
            };
            if !ok {
                bail!("Authorization failed. Request a new code via 'mixi-cli login-url'.");
            }
            println!("Login successful.");
        }
        Commands::Refresh { force } => {
            let mut tokens = open_tokens()?;
            if !tokens.refresh(force).await {
                bail!("Token refresh failed. Run 'mixi-cli login-url' to authorize again.");
            }
            println!("Token refreshed.");
        }
        Commands::Status { scope } => {
            status(scope).await?;
        }
        Commands::Whoami => {
            let mut client = ApiClient::new(open_tokens()?);
            let profile = client.current_user(false).await?;
            println!();
            println!(
                "Display Name: {}",
                profile.entry.display_name.as_deref().unwrap_or("(none)")
            );
            println!(
                "Thumbnail:    {}",
                profile.entry.thumbnail_url.as_deref().unwrap_or("(none)")
            );
            println!("ID:           {}", profile.entry.id);
        }
        Commands::Voice { status, photo } => {
            tracing::info!("Posting voice...");
            let mut form = Form::new().text("status", status);
            if let Some(path) = photo {
                form = form.file("photo", path);
            }
            let mut client = ApiClient::new(open_tokens()?);
            print_response(client.post_voice(form).await?)?;
        }
        Commands::Call {
            endpoint,
            method,
            params,
            multipart,
        } => {
            let method: Method = method
                .to_uppercase()
                .parse()
                .with_context(|| format!("Invalid HTTP method '{}'", method))?;
            let form = parse_params(&params)?;
            let mut client = ApiClient::new(open_tokens()?);
            let resp = client
                .call(&endpoint, method, form, true, multipart)
                .await?;
            print_response(resp)?;
        }
    }

    Ok(())
}
