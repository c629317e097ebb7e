//! # Relay Entry Point
//!
//! ## Usage
//!
//! ```bash
//! chat-relay server                       # listen on an OS-assigned port
//! chat-relay server --config config/server.toml
//! chat-relay client 127.0.0.1 40123
//! ```

use clap::{Parser, Subcommand};
use log::info;
use tokio::io::BufReader;

use chat_relay::client::{ChatClient, ClientExit};
use chat_relay::common::config::ServerConfig;
use chat_relay::common::logging::init_logger;
use chat_relay::server::ChatServer;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the server
    Server {
        /// Path to the server configuration file (TOML format)
        #[arg(short, long)]
        config: Option<String>,

        /// Address to bind, overriding the configuration file
        #[arg(long)]
        address: Option<String>,

        /// Maximum simultaneous clients, overriding the configuration file
        #[arg(long)]
        max_clients: Option<usize>,
    },
    /// Start the client and connect to the server at IP and PORT
    Client { ip: String, port: u16 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();

    match args.command {
        Command::Server {
            config,
            address,
            max_clients,
        } => {
            let mut config = match config {
                Some(path) => ServerConfig::from_file(&path)?,
                None => ServerConfig::default(),
            };
            if let Some(address) = address {
                config.server.address = address;
            }
            if max_clients.is_some() {
                config.server.max_clients = max_clients;
            }
            config.validate()?;

            let server = ChatServer::new(config);

            let signal_handle = server.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl-C, shutting down");
                    signal_handle.shutdown();
                }
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received second Ctrl-C, exiting immediately");
                    std::process::exit(130);
                }
            });

            server.run().await?;
        }
        Command::Client { ip, port } => {
            let client = ChatClient::connect(&ip, port).await?;
            info!("Type a message and press Enter to send it, or 'exit' to quit");

            let input = BufReader::new(tokio::io::stdin());
            let exit = client.run(input, tokio::io::stdout()).await?;

            if exit == ClientExit::ServerClosed {
                // A pending stdin read cannot be cancelled and would hold the runtime open
                std::process::exit(0);
            }
        }
    }

    Ok(())
}
