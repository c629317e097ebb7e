//! # Chat Client
//!
//! A client runs two independent activities over one TCP connection:
//!
//! - the **receiver** ([`receive_messages`]) prints whatever the server sends
//! - the **send loop** reads local input lines and writes them to the server
//!
//! They share nothing but the socket, each owning one half of it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let client = ChatClient::connect("127.0.0.1", 40123).await?;
//! let input = tokio::io::BufReader::new(tokio::io::stdin());
//! client.run(input, tokio::io::stdout()).await?;
//! ```

use anyhow::{anyhow, Result};
use log::{info, warn};
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::common::config::DEFAULT_READ_BUFFER_SIZE;
use crate::error::RelayError;

/// Local input that closes the connection instead of being sent.
pub const EXIT_COMMAND: &str = "exit";

/// Why the send loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientExit {
    /// The user typed [`EXIT_COMMAND`].
    UserExit,
    /// Local input reached end of file.
    InputClosed,
    /// The server closed the connection or stopped accepting writes.
    ServerClosed,
}

enum ClientEvent {
    Line(Option<String>),
    ReceiverDone,
}

pub struct ChatClient {
    stream: TcpStream,
}

impl ChatClient {
    /// Connect to the relay server at `ip:port`.
    pub async fn connect(ip: &str, port: u16) -> Result<Self> {
        let ip: IpAddr = ip
            .parse()
            .map_err(|_| RelayError::InvalidAddress(ip.to_string()))?;
        let server_addr = SocketAddr::new(ip, port);

        let stream = TcpStream::connect(server_addr)
            .await
            .map_err(|e| anyhow!("Connection to {} failed: {}", server_addr, e))?;

        info!("🤝 Connected to the server at {}", server_addr);
        Ok(Self { stream })
    }

    /// Relay `input` lines to the server and server output to `output`
    /// until the user exits, input ends, or the server goes away.
    ///
    /// Lines are sent without their line ending; empty lines are skipped.
    pub async fn run<R, W>(self, input: R, output: W) -> Result<ClientExit>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, mut writer) = self.stream.into_split();
        let mut receiver: JoinHandle<std::io::Result<()>> =
            tokio::spawn(receive_messages(reader, output));
        let mut lines = input.lines();

        let exit = loop {
            let event = tokio::select! {
                line = lines.next_line() => ClientEvent::Line(line?),
                finished = &mut receiver => {
                    match finished {
                        Ok(Ok(())) => info!("🔌 Server closed the connection"),
                        Ok(Err(e)) => warn!("⚠️  Lost connection to server: {}", e),
                        Err(e) => warn!("⚠️  Receiver task failed: {}", e),
                    }
                    ClientEvent::ReceiverDone
                }
            };

            match event {
                ClientEvent::ReceiverDone => return Ok(ClientExit::ServerClosed),
                ClientEvent::Line(None) => break ClientExit::InputClosed,
                ClientEvent::Line(Some(line)) if line == EXIT_COMMAND => {
                    info!("Exiting...");
                    break ClientExit::UserExit;
                }
                ClientEvent::Line(Some(line)) if line.is_empty() => continue,
                ClientEvent::Line(Some(line)) => {
                    if let Err(e) = writer.write_all(line.as_bytes()).await {
                        warn!("⚠️  Failed to send message: {}", e);
                        receiver.abort();
                        return Ok(ClientExit::ServerClosed);
                    }
                }
            }
        };

        if let Err(e) = writer.shutdown().await {
            warn!("⚠️  Error closing connection: {}", e);
        }
        receiver.abort();
        Ok(exit)
    }
}

/// Copy everything the server sends to `output`, one line per received chunk,
/// until the server closes the connection.
pub async fn receive_messages<R, W>(mut reader: R, mut output: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; DEFAULT_READ_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            return Ok(());
        }
        output.write_all(&buffer[..n]).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
}
