//! Parses the command line and runs one end of a connection over UDP.
//!
//! Receive into a file:
//!
//! ```text
//! stcp server --bind 127.0.0.1:9000 --output received.bin
//! ```
//!
//! Send a file to it:
//!
//! ```text
//! stcp client --bind 127.0.0.1:0 --connect 127.0.0.1:9000 --input notes.txt
//! ```

use crate::{
    config::{DEFAULT_WINDOW, STCP_MSS},
    host::TransportError,
    logging::{self, LoggingError, LOG_DIR},
    socket::{StreamError, UdpLink},
    Config, StcpStream,
};
use clap::{ArgAction, Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use thiserror::Error as ThisError;
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
};
use tracing::info;

/// Stores the command line arguments.
#[derive(Debug, Parser)]
#[command(version, about = "A simple reliable transport over UDP")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
    #[command(flatten)]
    pub tuning: Tuning,
    /// Write JSON logs to a timestamped file under ./logs instead of stderr
    #[arg(short, long, global = true)]
    pub log: bool,
    /// More output per occurrence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Accept one connection and write everything received
    Server {
        /// Local address to listen on
        #[arg(short, long)]
        bind: SocketAddr,
        /// File to write to instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Connect and send a file or stdin
    Client {
        /// Local address to send from
        #[arg(short, long)]
        bind: SocketAddr,
        /// Address of the server
        #[arg(short, long)]
        connect: SocketAddr,
        /// File to send instead of stdin
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

/// Connection knobs shared by both ends
#[derive(Debug, clap::Args)]
pub struct Tuning {
    /// Window size in bytes
    #[arg(long, global = true, default_value_t = DEFAULT_WINDOW)]
    pub window: u16,
    /// Largest payload per segment
    #[arg(long, global = true, default_value_t = STCP_MSS)]
    pub mss: usize,
    #[arg(long, global = true, default_value_t = 1000)]
    pub handshake_timeout_ms: u64,
    #[arg(long, global = true, default_value_t = 1000)]
    pub event_timeout_ms: u64,
    /// Fixed initial sequence number, random when absent
    #[arg(long, global = true)]
    pub iss: Option<u32>,
}

impl Tuning {
    pub fn config(&self) -> Config {
        let config = Config::default()
            .window_size(self.window)
            .max_payload_len(self.mss)
            .handshake_timeout(Duration::from_millis(self.handshake_timeout_ms))
            .event_timeout(Duration::from_millis(self.event_timeout_ms));
        match self.iss {
            Some(iss) => config.fixed_iss(iss),
            None => config,
        }
    }
}

/// Parses the process arguments and runs the chosen command.
pub async fn initialize_from_arguments() -> Result<(), CliError> {
    run(Args::parse()).await
}

pub async fn run(args: Args) -> Result<(), CliError> {
    let level = logging::level_for(args.verbose);
    if args.log {
        let path = logging::init_file(LOG_DIR, level)?;
        eprintln!("Logging to {}", path.display());
    } else {
        logging::init_stderr(level)?;
    }

    let config = args.tuning.config();
    match args.command {
        Command::Server { bind, output } => serve(bind, output, config).await,
        Command::Client {
            bind,
            connect,
            input,
        } => send(bind, connect, input, config).await,
    }
}

async fn serve(bind: SocketAddr, output: Option<PathBuf>, config: Config) -> Result<(), CliError> {
    let link = UdpLink::listen(bind).await?;
    info!(addr = %link.local_addr()?, "Listening");
    let mut stream = StcpStream::accept(link, config).await?;

    let mut out: Box<dyn AsyncWrite + Unpin + Send> = match output {
        Some(path) => Box::new(File::create(path).await?),
        None => Box::new(tokio::io::stdout()),
    };
    let mut received = 0;
    while let Some(chunk) = stream.read().await {
        received += chunk.len();
        out.write_all(&chunk).await?;
    }
    out.flush().await?;
    info!(received, "Peer finished");

    stream.finish().await?;
    Ok(())
}

async fn send(
    bind: SocketAddr,
    connect: SocketAddr,
    input: Option<PathBuf>,
    config: Config,
) -> Result<(), CliError> {
    let link = UdpLink::connect(bind, connect).await?;
    let mut stream = StcpStream::connect(link, config).await?;

    let mut input: Box<dyn AsyncRead + Unpin + Send> = match input {
        Some(path) => Box::new(File::open(path).await?),
        None => Box::new(tokio::io::stdin()),
    };
    let mut buf = vec![0; 4096];
    let mut sent = 0;
    loop {
        let len = input.read(&mut buf).await?;
        if len == 0 {
            break;
        }
        stream.write(&buf[..len])?;
        sent += len;
    }
    stream.close()?;
    info!(sent, "Input exhausted");

    let reply = stream.read_to_end().await;
    if !reply.is_empty() {
        tokio::io::stdout().write_all(&reply).await?;
    }
    stream.finish().await?;
    Ok(())
}

#[derive(Debug, ThisError)]
pub enum CliError {
    #[error("{0}")]
    Logging(#[from] LoggingError),
    #[error("{0}")]
    Stream(#[from] StreamError),
    #[error("{0}")]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}
