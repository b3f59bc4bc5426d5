//! Session guard CLI.
//!
//! Drives the backend's auth endpoints, and arbitrary requests, through the
//! guarded client.
//!
//! ```text
//!   session-guard [--config] [--base-url] [--mode] [--cookie]... [--cookie-jar]
//!        │
//!        ▼
//!   config (file + env + saved cookies + flags) → validate → lifecycle::start
//!        │
//!        ▼
//!   AuthClient ── SessionGuard ── HyperTransport ──▶ backend
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use http::Method;
use serde_json::Value;

use session_guard::config::{
    apply_env_overrides, load_config, validate_config, ConfigError, GuardConfig, ModeSetting,
};
use session_guard::lifecycle::{self, GuardedClient};
use session_guard::observability::init_logging;
use session_guard::session::CookieJar;
use session_guard::{ApiError, HttpResponse, Session};

#[derive(Parser)]
#[command(name = "session-guard")]
#[command(about = "Authenticated client for session- or token-protected backends", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "SESSION_GUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Backend base URL (overrides api.base_url)
    #[arg(short, long, env = "SESSION_GUARD_BASE_URL")]
    base_url: Option<String>,

    /// Credential mode (overrides credentials.mode)
    #[arg(short, long, value_enum)]
    mode: Option<ModeArg>,

    /// Seed cookie as NAME=VALUE, repeatable
    #[arg(long = "cookie", value_name = "NAME=VALUE")]
    cookies: Vec<String>,

    /// Cookie file read before the command and rewritten after it, so the
    /// session survives between runs
    #[arg(long, value_name = "PATH", env = "SESSION_GUARD_COOKIE_JAR")]
    cookie_jar: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Session,
    Token,
    Auto,
}

impl From<ModeArg> for ModeSetting {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Session => ModeSetting::Session,
            ModeArg::Token => ModeSetting::Token,
            ModeArg::Auto => ModeSetting::Auto,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and print the session
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// Log out and clear the session
    Logout,
    /// Print the current identity
    Me,
    /// Print the backend's authentication type
    AuthType,
    /// Print the backend's SSO configuration
    SsoConfig,
    /// Change the current user's password
    Password {
        #[arg(long)]
        current: String,
        #[arg(long)]
        new: String,
    },
    /// Send an arbitrary request through the guard
    Request {
        method: String,
        path: String,
        /// JSON body
        #[arg(long)]
        body: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.observability);
    tracing::debug!(base_url = %config.api.base_url, "Configuration loaded");

    match run(cli.command, &config, cli.cookie_jar.as_deref()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(api) = e.downcast_ref::<ApiError>() {
                if api.is_session_expired() {
                    eprintln!("session expired, log in again");
                    return ExitCode::FAILURE;
                }
            }
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// File (or defaults), then environment, then saved cookies, then flags;
/// validated last.
fn build_config(cli: &Cli) -> Result<GuardConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => {
            let mut config = GuardConfig::default();
            apply_env_overrides(&mut config, |key| std::env::var(key).ok());
            config
        }
    };

    if let Some(url) = &cli.base_url {
        config.api.base_url = url.clone();
    }
    if let Some(mode) = cli.mode {
        config.credentials.mode = mode.into();
    }
    if let Some(path) = cli.cookie_jar.as_deref().filter(|path| path.exists()) {
        let saved = CookieJar::new();
        saved.load_file(path)?;
        config.credentials.cookies.extend(saved.cookie_string());
    }
    config.credentials.cookies.extend(cli.cookies.iter().cloned());

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

async fn run(
    command: Commands,
    config: &GuardConfig,
    cookie_jar: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let stack = lifecycle::start(config).await?;
    let is_login = matches!(command, Commands::Login { .. });

    let result = execute(command, &stack.client).await;

    match cookie_jar {
        Some(path) => {
            if let Err(e) = stack.jar.save_file(path) {
                eprintln!("Warning: could not save cookies to {}: {e}", path.display());
            }
        }
        None if is_login && result.is_ok() => {
            if let Some(cookies) = stack.jar.cookie_string() {
                eprintln!("Reuse this session with --cookie-jar PATH, or: --cookie '{cookies}'");
            }
        }
        None => {}
    }

    result
}

async fn execute(command: Commands, client: &GuardedClient) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Login { username, password } => {
            let session = client.login(&username, &password).await?;
            print_session(&session)?;
        }
        Commands::Logout => {
            client.logout().await?;
            println!("Logged out");
        }
        Commands::Me => {
            let session = client.me().await?;
            print_session(&session)?;
        }
        Commands::AuthType => {
            println!("{}", client.auth_type().await?);
        }
        Commands::SsoConfig => {
            let sso = client.sso_config().await?;
            println!("{}", serde_json::to_string_pretty(&sso)?);
        }
        Commands::Password { current, new } => {
            client.change_password(&current, &new).await?;
            println!("Password changed");
        }
        Commands::Request { method, path, body } => {
            let response = send_request(client, &method, &path, body.as_deref()).await?;
            print_response(&response)?;
        }
    }

    Ok(())
}

async fn send_request(
    client: &GuardedClient,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> Result<HttpResponse, Box<dyn std::error::Error>> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())?;
    let mut request = client.request(method, path)?;
    if let Some(body) = body {
        let json: Value = serde_json::from_str(body)?;
        request = request.with_json(&json)?;
    }
    Ok(client.send(request).await?)
}

fn print_session(session: &Session) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(session)?);
    Ok(())
}

fn print_response(response: &HttpResponse) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", response.status());
    match response.json::<Value>() {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => {
            let text = response.text();
            if !text.is_empty() {
                println!("{text}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_read_environment() {
        let command = Cli::command();
        let env_of = |id: &str| {
            command
                .get_arguments()
                .find(|arg| arg.get_id() == id)
                .and_then(|arg| arg.get_env())
                .map(|env| env.to_string_lossy().into_owned())
        };

        assert_eq!(env_of("config").as_deref(), Some("SESSION_GUARD_CONFIG"));
        assert_eq!(env_of("base_url").as_deref(), Some("SESSION_GUARD_BASE_URL"));
        assert_eq!(env_of("cookie_jar").as_deref(), Some("SESSION_GUARD_COOKIE_JAR"));
    }

    #[test]
    fn test_saved_cookies_seed_config() {
        let path = std::env::temp_dir().join(format!("session-guard-{}.cookies", uuid::Uuid::new_v4()));
        let saved = CookieJar::new();
        saved.insert("SESSION", "s1");
        saved.insert("csrf", "abc");
        saved.save_file(&path).unwrap();

        let cli = Cli::try_parse_from([
            "session-guard",
            "--cookie-jar",
            path.to_str().unwrap(),
            "--cookie",
            "theme=dark",
            "me",
        ])
        .unwrap();
        let config = build_config(&cli).unwrap();
        std::fs::remove_file(&path).ok();

        let jar = CookieJar::new();
        for cookie in &config.credentials.cookies {
            jar.seed(cookie);
        }
        assert_eq!(jar.get("SESSION").as_deref(), Some("s1"));
        assert_eq!(jar.get("csrf").as_deref(), Some("abc"));
        assert_eq!(jar.get("theme").as_deref(), Some("dark"));
    }

    #[test]
    fn test_missing_cookie_file_is_ignored() {
        let cli = Cli::try_parse_from([
            "session-guard",
            "--cookie-jar",
            "/nonexistent/session-guard.cookies",
            "logout",
        ])
        .unwrap();

        let config = build_config(&cli).unwrap();

        assert!(config.credentials.cookies.is_empty());
    }
}
