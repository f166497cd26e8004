//! FBAI CLI - command-line session client
//!
//! Logs in against the FBAI auth server and keeps the session in the
//! mirrored session files, so every `fbai` invocation (and any other
//! process watching those files) shares one login.

use anyhow::Context;
use clap::{Parser, Subcommand};
use fbai_core::{
    default_config_path, init_logging, ErrorContext, FbaiConfig, FbaiError, FbaiResult,
    LoggingConfig, SESSION_KEYS,
};
use fbai_session::{
    file_backed_manager, spawn_file_watcher, FileStore, Navigation, SessionEvent, SessionManager,
    StorageBus,
};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "fbai")]
#[command(about = "Session client for the FBAI auth server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Session(SessionCommand),

    /// Manage configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Initialize default configuration
        #[arg(long)]
        init: bool,

        /// Set a configuration value (key=value format)
        #[arg(long)]
        set: Option<String>,

        /// Get a configuration value
        #[arg(long)]
        get: Option<String>,

        /// Validate current configuration
        #[arg(long)]
        validate: bool,
    },
}

/// Commands that operate on the stored session
#[derive(Subcommand)]
enum SessionCommand {
    /// Log in and store the session
    Login {
        /// Account email
        #[arg(short, long)]
        email: String,

        /// Password; read from stdin when omitted
        #[arg(short, long, env = "FBAI_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// End the session here and on the server
    Logout,

    /// Show the stored session
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check the stored session against the server
    Validate {
        /// Attempts before giving up on transient failures
        #[arg(long)]
        attempts: Option<usize>,
    },

    /// Exchange the refresh token for a new access token
    Refresh,

    /// Keep the session alive and report changes made by other processes
    Watch {
        /// Poll interval for the session file, in milliseconds
        #[arg(long, default_value = "500")]
        poll_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&LoggingConfig::cli(cli.verbose))
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let config_path = cli.config.unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Config {
            show,
            init,
            set,
            get,
            validate,
        } => handle_config(&config_path, show, init, set.as_deref(), get.as_deref(), validate)
            .with_context(|| format!("Config command failed for {:?}", config_path)),
        Commands::Session(command) => Ok(run_session_command(command, &config_path).await?),
    }
}

async fn run_session_command(command: SessionCommand, config_path: &Path) -> FbaiResult<()> {
    let config = load_config(config_path)?;
    let bus = StorageBus::default();
    let manager = file_backed_manager(&config, bus.clone())?;

    match command {
        SessionCommand::Login { email, password } => {
            let password = match password {
                Some(password) => password,
                None => read_password()?,
            };
            handle_login(&manager, &config, &email, &password).await?;
        }
        SessionCommand::Logout => {
            let next = manager.logout().await;
            println!("Logged out. Next: {}", next.target());
        }
        SessionCommand::Status { json } => handle_status(&manager, json)?,
        SessionCommand::Validate { attempts } => {
            let attempts = attempts.unwrap_or(config.session.max_validation_attempts);
            if manager.validate(attempts).await {
                println!("Session is valid");
            } else {
                println!("Session is not valid; log in again");
                std::process::exit(1);
            }
        }
        SessionCommand::Refresh => {
            if manager.refresh_token().await {
                println!("Access token refreshed");
            } else {
                println!("Refresh failed; log in again");
                std::process::exit(1);
            }
        }
        SessionCommand::Watch { poll_ms } => handle_watch(&manager, &config, bus, poll_ms).await?,
    }

    manager.dispose();
    Ok(())
}

fn load_config(path: &Path) -> FbaiResult<FbaiConfig> {
    let config = FbaiConfig::load_or_default(path)?.apply_env_overrides()?;
    config.validate()?;
    info!("Using session files at {:?}", config.storage.primary_path);
    Ok(config)
}

fn read_password() -> FbaiResult<String> {
    eprint!("Password: ");
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn handle_login(
    manager: &SessionManager,
    config: &FbaiConfig,
    email: &str,
    password: &str,
) -> FbaiResult<()> {
    let credentials = fbai_core::Credentials::new(email, password);
    let user = manager.login(&credentials).await?;

    println!(
        "Logged in as {} ({} tier)",
        user.display_name(),
        user.subscription_tier
    );
    if let Some(posts) = user.posts_remaining {
        println!("Posts remaining: {}", posts);
    }

    let landing = Navigation::after_login(user.subscription_tier, &config.routes);
    println!("Next: {}", landing.target());
    Ok(())
}

fn handle_status(manager: &SessionManager, json: bool) -> FbaiResult<()> {
    let user = manager.current_user();

    if json {
        let features = user
            .as_ref()
            .map(|u| u.subscription_tier.features())
            .unwrap_or_default();
        let status = serde_json::json!({
            "authenticated": manager.is_authenticated(),
            "user": user,
            "features": features,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    match user {
        Some(user) if manager.is_authenticated() => {
            println!("Logged in as {} [{}]", user.display_name(), user.id);
            println!("Tier: {}", user.subscription_tier);
            let features: Vec<String> = user
                .subscription_tier
                .features()
                .iter()
                .map(ToString::to_string)
                .collect();
            println!("Features: {}", features.join(", "));
        }
        _ => println!("Not logged in"),
    }
    Ok(())
}

async fn handle_watch(
    manager: &SessionManager,
    config: &FbaiConfig,
    bus: StorageBus,
    poll_ms: u64,
) -> FbaiResult<()> {
    let keys = SESSION_KEYS.iter().map(|key| key.to_string()).collect();
    let mut watcher = spawn_file_watcher(
        FileStore::new("primary", &config.storage.primary_path),
        bus,
        keys,
        Duration::from_millis(poll_ms),
    );

    let mut events = manager.subscribe();
    manager.init();
    println!("Watching {:?} (Ctrl-C to stop)", config.storage.primary_path);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    println!("(missed {} events)", missed);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    watcher.cancel();
    Ok(())
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Authenticated { user_id } => println!("Logged in: {}", user_id),
        SessionEvent::TokenRefreshed => println!("Access token refreshed"),
        SessionEvent::Reloaded { authenticated } => {
            println!("Session changed elsewhere; authenticated = {}", authenticated)
        }
        SessionEvent::Restored => println!("Session restored after a wipe"),
        SessionEvent::Cleared { reason } => println!("Session cleared: {:?}", reason),
    }
}

fn handle_config(
    path: &Path,
    show: bool,
    init: bool,
    set: Option<&str>,
    get: Option<&str>,
    validate: bool,
) -> FbaiResult<()> {
    if init {
        FbaiConfig::default().save_to_file(path)?;
        println!("Configuration initialized at: {:?}", path);
    }

    if show {
        let config = FbaiConfig::load_or_default(path)?;
        let rendered = toml::to_string_pretty(&config).map_err(|e| FbaiError::Config {
            message: format!("Failed to render config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("cli").with_operation("show_config"),
        })?;
        println!("{}", rendered);
    }

    if validate {
        match FbaiConfig::load_or_default(path)?.validate() {
            Ok(()) => println!("Configuration is valid"),
            Err(e) => {
                println!("Configuration validation failed: {}", e);
                return Err(e);
            }
        }
    }

    if let Some(key_value) = set {
        let (key, value) = key_value.split_once('=').ok_or_else(|| FbaiError::Config {
            message: "Invalid format. Use key=value format".to_string(),
            source: None,
            context: ErrorContext::new("config_set")
                .with_suggestion("Example: --set api.base_url=http://127.0.0.1:3000"),
        })?;
        let mut config = FbaiConfig::load_or_default(path)?;
        set_config_value(&mut config, key, value)?;
        config.validate()?;
        config.save_to_file(path)?;
        println!("Set {} = {}", key, value);
    }

    if let Some(key) = get {
        let config = FbaiConfig::load_or_default(path)?;
        println!("{} = {}", key, get_config_value(&config, key)?);
    }

    Ok(())
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> FbaiResult<T> {
    value.parse().map_err(|_| FbaiError::Config {
        message: format!("Invalid value for {}: {}", key, value),
        source: None,
        context: ErrorContext::new("config_set"),
    })
}

fn unknown_key(key: &str) -> FbaiError {
    FbaiError::Config {
        message: format!("Unknown configuration key: {}", key),
        source: None,
        context: ErrorContext::new("config")
            .with_suggestion("Use --show to see available configuration keys"),
    }
}

fn set_config_value(config: &mut FbaiConfig, key: &str, value: &str) -> FbaiResult<()> {
    match key {
        "api.base_url" => config.api.base_url = value.to_string(),
        "api.request_timeout_ms" => config.api.request_timeout_ms = parse_value(key, value)?,
        "session.max_validation_attempts" => {
            config.session.max_validation_attempts = parse_value(key, value)?
        }
        "session.heartbeat_interval_secs" => {
            config.session.heartbeat_interval_secs = parse_value(key, value)?
        }
        "storage.primary_path" => config.storage.primary_path = PathBuf::from(value),
        "storage.backup_path" => config.storage.backup_path = PathBuf::from(value),
        _ => return Err(unknown_key(key)),
    }
    Ok(())
}

fn get_config_value(config: &FbaiConfig, key: &str) -> FbaiResult<String> {
    let value = match key {
        "api.base_url" => config.api.base_url.clone(),
        "api.request_timeout_ms" => config.api.request_timeout_ms.to_string(),
        "session.max_validation_attempts" => config.session.max_validation_attempts.to_string(),
        "session.heartbeat_interval_secs" => config.session.heartbeat_interval_secs.to_string(),
        "storage.primary_path" => config.storage.primary_path.display().to_string(),
        "storage.backup_path" => config.storage.backup_path.display().to_string(),
        _ => return Err(unknown_key(key)),
    };
    Ok(value)
}
