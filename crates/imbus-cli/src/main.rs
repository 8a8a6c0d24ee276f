//! imbus CLI: runs the broker daemon and talks to a running one.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use imbus_daemon::{setup, Config, Daemon, DaemonEvent};
use imbus_protocol::{BusClient, UnixTransport};
use imbus_types::{BrokerMethod, BusMethod, ReturnValue};

#[derive(Parser)]
#[command(
    name = "imbus",
    about = "Input-method bus broker",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Bus socket path (overrides IMBUS_ADDRESS and the config file).
    #[arg(short, long, global = true)]
    socket: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the broker daemon in the foreground.
    Daemon,

    /// Ask the running daemon to exit.
    Kill,

    /// List the names currently on the bus.
    ListNames,

    /// List registered engine factories.
    ListFactories,

    /// Print the socket path peers should connect to.
    Address,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = setup::load_config(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.daemon.log_level)),
        )
        .init();

    let socket = setup::socket_path(cli.socket.as_deref(), &config);

    match cli.command {
        Commands::Daemon => run_daemon(&config, socket, &setup::pid_file_path()).await?,
        Commands::Kill => {
            let mut bus = connect(&socket).await?;
            bus.call_broker(BrokerMethod::Kill).await?;
            println!("daemon stopping");
        }
        Commands::ListNames => {
            let mut bus = connect(&socket).await?;
            if let ReturnValue::Strings(names) = bus.call_bus(BusMethod::ListNames).await? {
                for name in names {
                    println!("{name}");
                }
            }
        }
        Commands::ListFactories => {
            let mut bus = connect(&socket).await?;
            if let ReturnValue::Factories(factories) =
                bus.call_broker(BrokerMethod::GetFactories).await?
            {
                for factory in factories {
                    match factory.info {
                        Some(info) => println!(
                            "{}\t{}\t{}\t{}",
                            factory.path, factory.owner, info.name, info.language
                        ),
                        None => println!("{}\t{}\t-\t-", factory.path, factory.owner),
                    }
                }
            }
        }
        Commands::Address => println!("{}", socket.display()),
    }

    Ok(())
}

async fn connect(socket: &Path) -> anyhow::Result<BusClient> {
    BusClient::connect(socket)
        .await
        .with_context(|| format!("is the daemon running on {}?", socket.display()))
}

async fn run_daemon(config: &Config, socket: PathBuf, pid_file: &Path) -> anyhow::Result<()> {
    setup::write_pid_file(pid_file)?;
    let result = serve(config, socket).await;
    setup::remove_pid_file(pid_file);
    result
}

async fn serve(config: &Config, socket: PathBuf) -> anyhow::Result<()> {
    let transport = UnixTransport::bind(&socket)?;
    let mut daemon = Daemon::new(config, transport)?;

    let events = daemon.event_sender();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted");
            let _ = events.send(DaemonEvent::Shutdown).await;
        }
    });

    daemon.run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pid_file_is_removed_when_bind_fails() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("bus");
        let pid_file = dir.path().join("imbus.pid");
        let _running = UnixTransport::bind(&socket).unwrap();

        assert!(run_daemon(&Config::default(), socket, &pid_file)
            .await
            .is_err());
        assert!(!pid_file.exists());
    }
}
