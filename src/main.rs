// src/main.rs

//! The main entry point for the Riftline server application.

use anyhow::Result;
use async_trait::async_trait;
use riftline::config::Config;
use riftline::core::dispatcher::{Request, Router};
use riftline::server;
use std::env;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

/// Acknowledges every message of type 0 back to its sender.
struct AckRouter;

#[async_trait]
impl Router for AckRouter {
    async fn handle(&self, request: &Request) -> anyhow::Result<()> {
        let text = String::from_utf8_lossy(request.data()).into_owned();
        info!("Connection {} sent: {}", request.conn_id(), text);
        request
            .reply(0, format!("server received message: {text}"))
            .await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("Riftline version {VERSION}");
        return Ok(());
    }

    // Defaults to "config.toml" unless --config is given.
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("config.toml");

    let mut config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e:#}");
            std::process::exit(1);
        }
    };

    if let Some(port_index) = args.iter().position(|arg| arg == "--port") {
        match args.get(port_index + 1).map(|s| s.parse::<u16>()) {
            Some(Ok(port)) if port != 0 => config.port = port,
            Some(_) => {
                eprintln!("Invalid port number: {}", args[port_index + 1]);
                std::process::exit(1);
            }
            None => {
                eprintln!("--port flag requires a value");
                std::process::exit(1);
            }
        }
    }

    // RUST_LOG takes precedence over the configured level.
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();

    info!("Starting Riftline {}", VERSION);

    let result = server::run(config, |server| {
        server.add_router(0, AckRouter)?;
        server.set_on_conn_open(|conn| {
            info!("Connection {} opened by client.", conn.id());
            Ok(())
        });
        Ok(())
    })
    .await;

    if let Err(e) = &result {
        error!("Server runtime error: {:#}", e);
    }
    result
}
