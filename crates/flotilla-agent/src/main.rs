//! Flotilla agent binary
//!
//! # Usage
//!
//! ```bash
//! # Connect to a local broker with a generated agent id
//! flotilla-agent
//!
//! # Use a config file and override the broker
//! flotilla-agent --config agent.toml --broker-host broker.lab --broker-port 1883
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use flotilla_agent::{AgentConfig, AgentDescriptor, AgentSettings, FlotillaAgent, ProcessEngine};
use flotilla_bus::MqttHost;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Federated-learning compute agent
#[derive(Parser, Debug)]
#[command(name = "flotilla-agent")]
#[command(about = "Joins a flotilla session and executes training tasks")]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Agent id; overrides the config file
    #[arg(long)]
    agent_id: Option<String>,

    /// Broker host; overrides the config file
    #[arg(long)]
    broker_host: Option<String>,

    /// Broker port; overrides the config file
    #[arg(long)]
    broker_port: Option<u16>,

    /// Model cache root; overrides the config file
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(&self, config: &mut AgentConfig) {
        if let Some(id) = &self.agent_id {
            config.agent.id = Some(id.clone());
        }
        if let Some(host) = &self.broker_host {
            config.bus.host = host.clone();
        }
        if let Some(port) = self.broker_port {
            config.bus.port = port;
        }
        if let Some(dir) = &self.work_dir {
            config.agent.work_dir = Some(dir.clone());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };
    args.apply(&mut config);
    let config = config.finalize()?;

    let descriptor = AgentDescriptor::from_config(&config);
    tracing::info!(
        agent_id = %descriptor.id,
        name = %descriptor.display_name,
        address = %descriptor.network_address,
        broker = %format!("{}:{}", config.bus.host, config.bus.port),
        work_dir = %config.work_dir().display(),
        "Starting flotilla agent"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (host, handle, inbound) = MqttHost::connect(config.transport(), &config.mqtt_client_id());
    let host_task = tokio::spawn(host.run(shutdown_rx.clone()));

    let engine = Arc::new(ProcessEngine::from_config(&config.engine));
    let agent = FlotillaAgent::new(
        descriptor,
        AgentSettings::from_config(&config),
        Arc::new(handle),
        inbound,
        engine,
    );

    let run = agent.run(shutdown_rx);
    tokio::pin!(run);
    let outcome = tokio::select! {
        outcome = &mut run => outcome,
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    tracing::info!("Shutting down agent...");
                    let _ = shutdown_tx.send(true);
                }
                Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
            }
            run.await
        }
    };

    let _ = shutdown_tx.send(true);
    match host_task.await {
        Ok(Err(e)) => tracing::warn!(error = %e, "Bus host stopped with error"),
        Err(e) => tracing::warn!(error = %e, "Bus host task failed"),
        Ok(Ok(())) => {}
    }
    outcome?;
    Ok(())
}
