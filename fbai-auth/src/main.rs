//! FBAI Auth Server
//!
//! Issues and verifies subscription-tier JWTs for the FBAI session client.

use anyhow::Context;
use clap::Parser;
use fbai_auth::{serve, AuthServerConfig, AuthState};
use fbai_core::{init_logging, LoggingConfig};

/// FBAI Auth Server - subscription-gated JWT authentication
#[derive(Parser)]
#[command(name = "fbai-server")]
#[command(about = "Authentication server for the FBAI session client")]
#[command(version)]
struct Args {
    /// Server host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Server port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Seed a free and a premium demo account
    #[arg(long)]
    demo_users: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();

    let logging = LoggingConfig {
        level: args.log_level.clone(),
        filter_directives: vec![
            format!("fbai_auth={}", args.log_level),
            "tower_http=debug".to_string(),
        ],
        ..LoggingConfig::default()
    };
    init_logging(&logging).map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let mut config = AuthServerConfig::from_env();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config.seed_demo_users |= args.demo_users;

    let state = AuthState::new(&config);
    if config.seed_demo_users {
        state
            .seed_demo_accounts()
            .await
            .context("Failed to seed demo accounts")?;
    }

    let listener = tokio::net::TcpListener::bind(config.address())
        .await
        .with_context(|| format!("Failed to bind {}", config.address()))?;

    serve(listener, state).await.context("Server error")?;

    Ok(())
}
