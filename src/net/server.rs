//! The node server: concurrent TCP (and optionally TLS) listeners that
//! decode framed requests, dispatch them against the public-mode
//! datastore, and write framed responses.
//!
//! Each accepted connection runs on its own task and may carry any
//! number of request/response exchanges. A malformed frame or a failed
//! handler logs the error and drops that connection; the server keeps
//! serving.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use crate::collection::{Elem, Superq};
use crate::error::{Result, SuperqError};
use crate::store;
use crate::types::Value;

use super::codec::{frame_bytes, FrameCodec};
use super::protocol::{NodeCmd, NodeRequest, NodeResponse, DEFAULT_TCP_PORT};
use super::{DEFAULT_CERT_FILE, DEFAULT_KEY_FILE};

/// Builder for the superq node server.
pub struct NodeServer {
    tcp_port: u16,
    ssl_port: Option<u16>,
    cert_path: PathBuf,
    key_path: PathBuf,
    shutdown: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
}

impl NodeServer {
    /// Start building a node server with default ports and certificate
    /// paths.
    #[must_use]
    pub fn builder() -> Self {
        Self {
            tcp_port: DEFAULT_TCP_PORT,
            ssl_port: None,
            cert_path: PathBuf::from(DEFAULT_CERT_FILE),
            key_path: PathBuf::from(DEFAULT_KEY_FILE),
            shutdown: None,
        }
    }

    /// Set the plain TCP port.
    #[must_use]
    pub fn tcp_port(mut self, port: u16) -> Self {
        self.tcp_port = port;
        self
    }

    /// Enable the TLS listener on the given port.
    #[must_use]
    pub fn tls(mut self, port: u16) -> Self {
        self.ssl_port = Some(port);
        self
    }

    /// Override the certificate and key file pair.
    #[must_use]
    pub fn cert_files(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.cert_path = cert.into();
        self.key_path = key.into();
        self
    }

    /// Set a shutdown signal. When the future completes, the listeners
    /// stop accepting and the server returns.
    #[must_use]
    pub fn shutdown(mut self, signal: impl Future<Output = ()> + Send + 'static) -> Self {
        self.shutdown = Some(Box::pin(signal));
        self
    }

    /// Flip the process datastore to public mode, bind the listeners,
    /// and serve until the shutdown signal fires.
    ///
    /// # Errors
    ///
    /// Returns an error if a listener fails to bind.
    pub async fn serve(self) -> Result<()> {
        store::datastore().set_public();

        let token = CancellationToken::new();
        if let Some(signal) = self.shutdown {
            let trigger = token.clone();
            tokio::spawn(async move {
                signal.await;
                trigger.cancel();
            });
        }

        let tcp = TcpListener::bind(("0.0.0.0", self.tcp_port)).await?;
        tracing::info!(port = self.tcp_port, "superq node listening");

        let mut tasks = vec![tokio::spawn(accept_plain(tcp, token.clone()))];

        if let Some(ssl_port) = self.ssl_port {
            match load_tls_acceptor(&self.cert_path, &self.key_path) {
                Ok(acceptor) => {
                    let listener = TcpListener::bind(("0.0.0.0", ssl_port)).await?;
                    tracing::info!(port = ssl_port, "superq node TLS listening");
                    tasks.push(tokio::spawn(accept_tls(listener, acceptor, token.clone())));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "TLS listener disabled");
                }
            }
        }

        for task in tasks {
            let _ = task.await;
        }
        tracing::info!("superq node stopped");
        Ok(())
    }

    /// Convenience entry point: serve with ctrl-c as the shutdown
    /// signal.
    ///
    /// # Panics
    ///
    /// Panics if the ctrl-c signal handler cannot be installed.
    ///
    /// # Errors
    ///
    /// Returns an error if a listener fails to bind.
    pub async fn start(tcp_port: u16, ssl_port: Option<u16>) -> Result<()> {
        let mut server = Self::builder().tcp_port(tcp_port).shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to listen for ctrl-c");
            tracing::info!("ctrl-c received, shutting down");
        });
        if let Some(port) = ssl_port {
            server = server.tls(port);
        }
        server.serve().await
    }
}

async fn accept_plain(listener: TcpListener, token: CancellationToken) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "connection accepted");
                    tokio::spawn(handle_connection(stream, peer.to_string()));
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
            () = token.cancelled() => break,
        }
    }
}

async fn accept_tls(listener: TcpListener, acceptor: TlsAcceptor, token: CancellationToken) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let acceptor = acceptor.clone();
                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(tls) => handle_connection(tls, peer.to_string()).await,
                            Err(e) => tracing::warn!(%peer, error = %e, "TLS handshake failed"),
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
            () = token.cancelled() => break,
        }
    }
}

/// Serve one connection: any number of serial request/response pairs
/// until the peer disconnects or an exchange fails.
async fn handle_connection<S>(stream: S, peer: String)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut frames = FramedRead::new(read_half, FrameCodec);

    while let Some(frame) = frames.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "dropping connection: bad frame");
                return;
            }
        };

        // collection operations block on locks and the engine, so they
        // run off the async workers
        let outcome = tokio::task::spawn_blocking(move || dispatch(&msg)).await;
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::warn!(%peer, error = %e, "request failed, closing connection");
                return;
            }
            Err(e) => {
                tracing::error!(%peer, error = %e, "dispatch task failed");
                return;
            }
        };

        let bytes = match frame_bytes(&response.to_string()) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(%peer, error = %e, "response framing failed");
                return;
            }
        };
        if let Err(e) = write_half.write_all(&bytes).await {
            tracing::warn!(%peer, error = %e, "write failed, closing connection");
            return;
        }
    }
}

/// Decode and execute one request against the public datastore.
fn dispatch(msg: &str) -> Result<NodeResponse> {
    let request = NodeRequest::parse(msg)?;
    let ds = store::datastore();
    let mut response = NodeResponse {
        msg_id: request.msg_id.clone(),
        ok: false,
        body: String::new(),
    };

    match request.cmd {
        NodeCmd::SuperqExists => {
            response.ok = ds.superq_exists(&request.args, None)?;
        }
        NodeCmd::SuperqCreate => {
            if !ds.superq_exists(&request.args, None)? {
                let sq = Superq::from_wire_str(&request.body)?;
                sq.attach()?;
                response.ok = true;
            }
        }
        NodeCmd::SuperqRead => {
            let sq = ds.superq_read(&request.args, None)?;
            response.body = sq.to_wire_string();
            response.ok = true;
        }
        NodeCmd::SuperqDelete => {
            let sq = ds.superq_read(&request.args, None)?;
            sq.delete()?;
            response.ok = true;
        }
        NodeCmd::SuperqQuery => {
            // existence check keys the error to the collection name
            let _sq = ds.superq_read(&request.args, None)?;
            let result = ds.superq_query_local(&request.body, None)?;
            response.body = result.to_wire_string();
            response.ok = true;
        }
        NodeCmd::SuperqelemExists => {
            let sq = ds.superq_read(&request.args, None)?;
            response.ok = sq.contains(Value::parse_lenient(&request.body));
        }
        NodeCmd::SuperqelemCreate => {
            let (sq_name, idx) = request
                .args
                .rsplit_once(',')
                .ok_or_else(|| SuperqError::MalformedRequest(request.args.clone()))?;
            let idx = idx.parse::<usize>().ok();
            let sq = ds.superq_read(sq_name, None)?;
            let elem = Elem::from_wire(&request.body)?;
            match idx {
                Some(idx) => sq.push_at(idx, elem)?,
                None => sq.push(elem)?,
            }
            response.ok = true;
        }
        NodeCmd::SuperqelemRead => {
            let sq = ds.superq_read(&request.args, None)?;
            let elem = sq.elem(Value::parse_lenient(&request.body))?;
            response.body = elem.to_wire();
            response.ok = true;
        }
        NodeCmd::SuperqelemUpdate => {
            let sq = ds.superq_read(&request.args, None)?;
            let elem = Elem::from_wire(&request.body)?;
            sq.update_elem(&elem)?;
            response.ok = true;
        }
        NodeCmd::SuperqelemDelete => {
            let sq = ds.superq_read(&request.args, None)?;
            sq.delete_elem(Value::parse_lenient(&request.body))?;
            response.ok = true;
        }
    }
    Ok(response)
}

fn load_tls_acceptor(cert: &Path, key: &Path) -> Result<TlsAcceptor> {
    let mut cert_reader = std::io::BufReader::new(std::fs::File::open(cert)?);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| SuperqError::Tls(e.to_string()))?;

    let mut key_reader = std::io::BufReader::new(std::fs::File::open(key)?);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| SuperqError::Tls(e.to_string()))?
        .ok_or_else(|| SuperqError::Tls(format!("no private key in {}", key.display())))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| SuperqError::Tls(e.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}
