//! MQTT Agent - Main Entry Point
//!
//! Connects one broker connection, services it from the agent loop and runs
//! until interrupted.

use clap::{Parser, Subcommand};
use mqtt_agent::agent::{on_complete, AgentHandle, MqttAgent};
use mqtt_agent::config::AgentConfig;
use mqtt_agent::connection::{ConnectionHandle, PublishCallback};
use mqtt_agent::observability::{init_default_logging, metrics};
use mqtt_agent::protocol::{PublishInfo, QoS, SubscribeInfo, SystemClock};
use mqtt_agent::transport::connect_tcp;
use mqtt_agent::transport::mqtt::{
    connect_info_from_config, parse_broker_url, MqttContext, NetworkContext,
};
use mqtt_agent::AgentExit;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::signal;
use tracing::{error, info, warn};

const PRIMARY_CONNECTION: ConnectionHandle = ConnectionHandle::new(0);

/// MQTT agent serializing broker operations behind a command queue
#[derive(Parser)]
#[command(name = "mqtt-agent")]
#[command(about = "Single-task MQTT agent")]
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
    /// Connect to the broker and run the agent loop
    Run {
        /// Topic filter to subscribe to (repeatable)
        #[arg(long, value_name = "FILTER")]
        subscribe: Vec<String>,

        /// Message to publish once connected, as TOPIC=PAYLOAD (repeatable)
        #[arg(long, value_name = "TOPIC=PAYLOAD", value_parser = parse_publish_arg)]
        publish: Vec<(String, String)>,

        /// QoS for the requested subscriptions and publishes
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=2))]
        qos: u8,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

fn parse_publish_arg(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((topic, payload)) if !topic.is_empty() => {
            Ok((topic.to_string(), payload.to_string()))
        }
        _ => Err(format!("expected TOPIC=PAYLOAD, got '{arg}'")),
    }
}

fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting MQTT agent v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run {
            subscribe,
            publish,
            qos,
        } => run_agent(config, subscribe, publish, qos_from_level(qos)).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<AgentConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(AgentConfig::load_from_file(path)?)
        }
        None => {
            for path_str in ["agent.toml", "config/agent.toml"] {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(AgentConfig::load_from_file(&path)?);
                }
            }

            Err("No configuration file found. Provide one with -c/--config or create agent.toml".into())
        }
    }
}

async fn run_agent(
    config: AgentConfig,
    subscriptions: Vec<String>,
    publishes: Vec<(String, String)>,
    qos: QoS,
) -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = parse_broker_url(&config.mqtt.broker_url)?;
    let stream = connect_tcp(&endpoint).await?;

    let mut agent: MqttAgent<MqttContext<TcpStream>> = MqttAgent::new(&config.agent);
    let unmatched: PublishCallback = Arc::new(|publish: &PublishInfo| {
        info!(
            topic = %publish.topic,
            bytes = publish.payload.len(),
            "Publish received without a matching subscription"
        );
    });
    agent.initialize(
        PRIMARY_CONNECTION,
        NetworkContext::new(stream, config.mqtt.network_buffer_size),
        SystemClock::shared(),
        unmatched,
    )?;

    let connect_info = connect_info_from_config(&config)?;
    let session_present = agent
        .connect(
            PRIMARY_CONNECTION,
            &connect_info,
            None,
            config.mqtt.connect_timeout(),
        )
        .await?;
    info!(
        client_id = %connect_info.client_id,
        session_present,
        "Connected to broker"
    );

    let handle = agent.handle();
    tokio::spawn(submit_requests(handle.clone(), subscriptions, publishes, qos));
    tokio::spawn(shutdown_on_signal(handle));

    let exit = agent.run().await;
    match serde_json::to_string(&metrics().get_metrics()) {
        Ok(snapshot) => info!(metrics = %snapshot, "Final metrics"),
        Err(e) => warn!(error = %e, "Failed to serialize metrics"),
    }

    match exit {
        AgentExit::Terminated => Ok(()),
        AgentExit::Fatal { handle, status } => {
            Err(format!("connection {handle} lost: {status}").into())
        }
    }
}

/// Arm servicing, then issue the subscriptions and publishes from the command line
async fn submit_requests(
    handle: AgentHandle,
    subscriptions: Vec<String>,
    publishes: Vec<(String, String)>,
    qos: QoS,
) {
    if let Err(e) = handle.process_loop(PRIMARY_CONNECTION, None, None).await {
        error!(error = %e, "Failed to start servicing");
        return;
    }

    for filter in subscriptions {
        let on_publish: PublishCallback = Arc::new(|publish: &PublishInfo| {
            info!(
                topic = %publish.topic,
                payload = %String::from_utf8_lossy(&publish.payload),
                "Publish received"
            );
        });
        let label = filter.clone();
        let outcome = on_complete(move |result| match result {
            Ok(()) => info!(filter = %label, "Subscribed"),
            Err(e) => warn!(filter = %label, error = %e, "Subscribe failed"),
        });

        if let Err(e) = handle
            .subscribe(
                PRIMARY_CONNECTION,
                SubscribeInfo::new(filter, qos),
                on_publish,
                outcome,
            )
            .await
        {
            warn!(error = %e, "Subscribe not queued");
        }
    }

    for (topic, payload) in publishes {
        let label = topic.clone();
        let outcome = on_complete(move |result| match result {
            Ok(()) => info!(topic = %label, "Published"),
            Err(e) => warn!(topic = %label, error = %e, "Publish failed"),
        });

        if let Err(e) = handle
            .publish(
                PRIMARY_CONNECTION,
                PublishInfo::new(topic, qos, payload),
                outcome,
            )
            .await
        {
            warn!(error = %e, "Publish not queued");
        }
    }
}

/// Disconnect cleanly and stop the loop on SIGINT or SIGTERM
async fn shutdown_on_signal(handle: AgentHandle) {
    let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            return;
        }
    };

    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for SIGINT");
                return;
            }
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    if let Err(e) = handle.disconnect(PRIMARY_CONNECTION, None).await {
        warn!(error = %e, "Disconnect not queued");
    }
    if let Err(e) = handle.terminate().await {
        warn!(error = %e, "Terminate not queued");
    }
}

fn handle_config_command(
    config: &AgentConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    parse_broker_url(&config.mqtt.broker_url)?;
    info!("Configuration validation complete");
    Ok(())
}
