use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use futures::future::join_all;
use log::LevelFilter;
use serde::Serialize;
use wweb_gateway::broadcast::LogBroadcaster;
use wweb_gateway::collaborator::memory::MemoryClientFactory;
use wweb_gateway::{normalize, Gateway, GatewayConfig};

/// Demo front end driving the gateway against the in-memory client.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to a JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the session name.
    #[arg(long)]
    client_id: Option<String>,

    /// Choose a command to run.
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the canonical form of each handle.
    Normalize { handles: Vec<String> },
    /// Start a session and report its status.
    Status {
        /// Restore saved credentials instead of pairing.
        #[arg(long)]
        paired: bool,
    },
    /// Send a text message to one or more recipients.
    Send {
        #[arg(long = "to", required = true)]
        recipients: Vec<String>,
        /// Agent name appended as a signature.
        #[arg(long)]
        agent: Option<String>,
        message: String,
    },
    /// Log out a ready session and watch it re-initialize.
    Logout,
    /// Print the effective configuration.
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => GatewayConfig::from_json_file(path)?,
        None => GatewayConfig::default(),
    }
    .with_env_overrides();
    if let Some(client_id) = cli.client_id {
        config = config.with_client_id(client_id);
    }
    init_logging(&config);

    match cli.command {
        Commands::Normalize { handles } => {
            for handle in handles {
                let id = normalize(&handle);
                match id.clone().require_valid() {
                    Ok(_) => println!("{handle} -> {id}"),
                    Err(err) => eprintln!("{handle}: {err}"),
                }
            }
        }
        Commands::Status { paired } => {
            let factory = if paired {
                MemoryClientFactory::new().with_saved_session()
            } else {
                MemoryClientFactory::new()
            };
            let gateway = start(config, Arc::new(factory)).await;
            print_json(&gateway.status())?;
            print_json(&gateway.qr())?;
        }
        Commands::Send {
            recipients,
            agent,
            message,
        } => {
            let factory = Arc::new(MemoryClientFactory::new().with_saved_session());
            factory.with_world(|world| {
                for recipient in &recipients {
                    world.register(recipient);
                }
            });
            let gateway = start(config, factory).await;
            let sends = recipients
                .iter()
                .map(|to| gateway.send_text(to, &message, agent.as_deref()));
            for outcome in join_all(sends).await {
                print_json(&outcome)?;
            }
        }
        Commands::Logout => {
            let quiescence = config.quiescence_delay();
            let gateway = start(
                config,
                Arc::new(MemoryClientFactory::new().with_saved_session()),
            )
            .await;
            print_json(&gateway.status())?;
            print_json(&gateway.logout().await)?;
            print_json(&gateway.status())?;
            tokio::time::sleep(quiescence * 2).await;
            print_json(&gateway.qr())?;
        }
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn start(config: GatewayConfig, factory: Arc<MemoryClientFactory>) -> Gateway {
    let gateway = Gateway::new(config, factory);
    gateway.attach_broadcaster(Arc::new(LogBroadcaster));
    let started = gateway.start().await;
    if !started.success {
        log::error!("session did not start: {:?}", started.error);
    }
    // Let the client's startup signals reach the session.
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    gateway
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn init_logging(config: &GatewayConfig) {
    let level = level_filter(&config.log_level);
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init();
}

/// Parses a level name case-insensitively; unknown names fall back to `info`.
fn level_filter(name: &str) -> LevelFilter {
    name.trim().parse().unwrap_or(LevelFilter::Info)
}
