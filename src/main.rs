//! MQTT request/response bridge - Main Entry Point
//!
//! `run` keeps a gateway connected until interrupted, `call` issues a single
//! request and prints the reply, `config` validates a configuration file.

use clap::{Parser, Subcommand};
use mqtt_rpc_bridge::config::GatewayConfig;
use mqtt_rpc_bridge::observability::{health::HealthServer, init_default_logging, metrics::metrics};
use mqtt_rpc_bridge::transport::mqtt::MqttClient;
use mqtt_rpc_bridge::Gateway;
use serde_json::Value;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::{
    signal,
    time::{sleep, Duration},
};
use tracing::{error, info};

/// Request/response calls over an MQTT broker
#[derive(Parser)]
#[command(name = "rpc-bridge")]
#[command(about = "Synchronous request/response calls over MQTT")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and serve until interrupted
    Run,
    /// Issue one call and print the reply
    Call {
        /// Operation name, the second topic level
        operation: String,
        /// Request payload as JSON
        #[arg(long, default_value = "{}")]
        payload: String,
        /// Call timeout; defaults to rpc.default_timeout_ms
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting rpc-bridge v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_gateway(config).await,
        Commands::Call {
            operation,
            payload,
            timeout_ms,
        } => run_call(config, &operation, &payload, timeout_ms).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<GatewayConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(GatewayConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["gateway.toml", "config/gateway.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(GatewayConfig::load_from_file(&path)?);
                }
            }

            Err("No configuration file found. Provide one with -c/--config or create gateway.toml".into())
        }
    }
}

async fn run_gateway(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Gateway starting with ID: {}", config.gateway.id);
    let collector = metrics();

    let mut gateway = Gateway::connect_mqtt(config.clone()).await?;
    gateway.start().await?;

    let health_task = if config.health.enabled {
        let health_server = Arc::new(
            HealthServer::new(config.gateway.id.clone(), config.health.port)
                .with_registry(gateway.registry().clone()),
        );
        Some(tokio::spawn(health_server.start()))
    } else {
        None
    };

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Gateway is running, waiting for calls");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
        _ = monitor_connection_health(&gateway) => {
            error!("MQTT connection permanently lost, shutting down gateway...");
        }
    }

    if let Some(task) = health_task {
        task.abort();
    }

    if let Err(e) = gateway.shutdown().await {
        error!("Error during shutdown: {}", e);
        collector.set_gateway_state("error");
        return Err(e.into());
    }

    info!("Application shutdown complete");
    Ok(())
}

async fn run_call(
    config: GatewayConfig,
    operation: &str,
    payload: &str,
    timeout_ms: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let request: Value = serde_json::from_str(payload)?;
    let timeout = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.rpc.default_timeout());

    let mut gateway = Gateway::connect_mqtt(config).await?;
    gateway.start().await?;

    let result = gateway
        .dispatcher()?
        .call::<_, Value>(operation, &request, timeout)
        .await;
    gateway.shutdown().await?;

    let reply = result?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

fn handle_config_command(
    config: GatewayConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}

/// Resolves once the transport has given up reconnecting
async fn monitor_connection_health(gateway: &Gateway<MqttClient>) {
    loop {
        if gateway.is_permanently_disconnected() {
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }
}
