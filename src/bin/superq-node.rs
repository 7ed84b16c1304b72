//! The superq network node process.
//!
//! Serves the node protocol over plain TCP and, when `--sslport` is
//! given, over TLS. The process datastore runs in public mode: every
//! forwarded operation executes locally. Logs go to stderr and the
//! `node.output` sidecar file.

use clap::Parser;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use superq::net::{NodeServer, DEFAULT_TCP_PORT, NODE_LOG_FILE};

#[derive(Parser)]
#[command(name = "superq-node", about = "Networked superq datastore node")]
struct Args {
    /// TCP port to listen on.
    #[arg(short = 't', long = "tcpport", default_value_t = DEFAULT_TCP_PORT)]
    tcpport: u16,

    /// Enable TLS and listen on this port.
    #[arg(short = 's', long = "sslport")]
    sslport: Option<u16>,

    /// TLS certificate file.
    #[arg(long, default_value = "server.pem")]
    cert: std::path::PathBuf,

    /// TLS private key file.
    #[arg(long, default_value = "server.key")]
    key: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(NODE_LOG_FILE)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_ansi(false)
        .with_writer(std::io::stderr.and(std::sync::Mutex::new(log_file)))
        .init();

    tracing::info!(
        tcp = args.tcpport,
        ssl = ?args.sslport,
        "starting superq public node"
    );

    let mut server = NodeServer::builder()
        .tcp_port(args.tcpport)
        .cert_files(args.cert, args.key)
        .shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to listen for ctrl-c");
            tracing::info!("ctrl-c received, shutting down");
        });
    if let Some(port) = args.sslport {
        server = server.tls(port);
    }
    server.serve().await?;

    Ok(())
}
