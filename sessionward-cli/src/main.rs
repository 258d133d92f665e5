//! Sessionward CLI
//!
//! Drives the authenticated request pipeline against a live backend.
//!
//! # Usage
//!
//! ```bash
//! # Sign in (password from SESSIONWARD_PASSWORD or prompted)
//! sessionward login ada@example.com
//!
//! # Show whether a session exists and when it expires
//! sessionward status
//!
//! # Call a protected endpoint
//! sessionward request enrollments/my-enrollments/
//!
//! # Forget the session
//! sessionward logout
//! ```

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dialoguer::Password;
use sessionward_core::{
    ApiError, ApiRequest, Method, Navigator, PipelineConfig, Session, load_config,
    load_config_from,
};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "sessionward")]
#[command(about = "Authenticated request pipeline for the LMS backend")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Keep tokens in the data directory instead of the OS keyring
    #[arg(long, global = true)]
    no_keyring: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the session
    Login {
        /// Email or username
        identifier: String,

        /// Password (prompted for when omitted)
        #[arg(long, env = "SESSIONWARD_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Show the current session
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Exchange the refresh token for a new access token
    Refresh,

    /// Forget the stored session
    Logout,

    /// Send a request through the pipeline and print the response body
    Request {
        /// Path relative to the base URL, or an absolute URL
        target: String,

        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
    },
}

/// Prints the sign-in target instead of navigating.
struct StderrNavigator;

impl Navigator for StderrNavigator {
    fn navigate_to_sign_in(&self, path: &str) {
        eprintln!("Session ended. Sign in again ({}), e.g. `sessionward login <identifier>`", path);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    }
    .context("Failed to load configuration")?;
    init_logging(cli.verbose, &config.log_level);

    let session = Session::open(&config, !cli.no_keyring, Arc::new(StderrNavigator))
        .await
        .context("Failed to open session")?;

    match cli.command {
        Commands::Login { identifier, password } => login(&session, &identifier, password).await,
        Commands::Status { format } => status(&session, &config, &format),
        Commands::Refresh => refresh(&session).await,
        Commands::Logout => logout(&session).await,
        Commands::Request { target, method, data } => {
            request(&session, &target, &method, data.as_deref()).await
        }
    }
}

fn init_logging(verbose: bool, level: &str) {
    let default = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

async fn login(session: &Session, identifier: &str, password: Option<String>) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None => prompt_password(identifier)?,
    };

    let user = session
        .login(identifier, &password)
        .await
        .with_context(|| format!("Login failed for {}", identifier))?;

    println!("Logged in as {}", identifier);
    if let Some(user) = user {
        println!("{}", serde_json::to_string_pretty(&user)?);
    }
    Ok(())
}

fn prompt_password(identifier: &str) -> Result<String> {
    let password: String = Password::new()
        .with_prompt(format!("Password for {}", identifier))
        .interact()
        .context("Failed to read password")?;
    if password.is_empty() {
        bail!("Empty password");
    }
    Ok(password)
}

fn status(session: &Session, config: &PipelineConfig, format: &str) -> Result<()> {
    let pair = session.credentials().read();
    let authenticated = session.is_authenticated();
    let expires_at = pair.as_ref().map(|p| p.access_expires_at.to_rfc3339());
    let user = session.current_user();

    match format {
        "json" => {
            let output = serde_json::json!({
                "authenticated": authenticated,
                "base_url": config.base_url,
                "access_expires_at": expires_at,
                "user": user,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => {
            println!("Backend: {}", config.base_url);
            match expires_at {
                Some(expires_at) if authenticated => {
                    println!("Session: active (access token expires {})", expires_at);
                }
                Some(expires_at) => {
                    println!("Session: access token expired {} (refreshable)", expires_at);
                }
                None => println!("Session: none"),
            }
            if let Some(user) = user {
                println!("User: {}", user);
            }
        }
    }
    Ok(())
}

async fn refresh(session: &Session) -> Result<()> {
    match session.client().refresh().await {
        Some(_) => {
            let expires_at = session
                .credentials()
                .read()
                .map(|p| p.access_expires_at.to_rfc3339())
                .unwrap_or_default();
            println!("Access token refreshed (expires {})", expires_at);
            Ok(())
        }
        None => bail!("Refresh failed; sign in again with `sessionward login`"),
    }
}

async fn logout(session: &Session) -> Result<()> {
    session.logout().await.context("Failed to clear session")?;
    println!("Logged out");
    Ok(())
}

async fn request(session: &Session, target: &str, method: &str, data: Option<&str>) -> Result<()> {
    let method: Method = method
        .to_ascii_uppercase()
        .parse()
        .with_context(|| format!("Invalid HTTP method: {}", method))?;

    let mut request = ApiRequest::new(method, target);
    if let Some(data) = data {
        let body: serde_json::Value =
            serde_json::from_str(data).context("Request body is not valid JSON")?;
        request = request.json(body);
    }

    info!("Sending {} {}", request.method(), target);
    match session.client().send(request).await {
        Ok(response) => {
            match response.json::<serde_json::Value>() {
                Ok(body) => println!("{}", serde_json::to_string_pretty(&body)?),
                Err(_) => println!("{}", response.text()),
            }
            Ok(())
        }
        Err(ApiError::Http(response)) => {
            eprintln!("{}", response.body);
            bail!("Request failed with status {}", response.status)
        }
        Err(e) => Err(e).context("Request failed"),
    }
}
