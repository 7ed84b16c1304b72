//! Blocking network client: a socket pool per `(host, port)`, framed
//! request/response exchange, and auto-launch of a local node process
//! when nothing is listening on the default port.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Result, SuperqError};

use super::codec::{read_frame, write_frame};
use super::protocol::{
    resolve_host_tag, HostAddr, NodeCmd, NodeRequest, NodeResponse, DEFAULT_SSL_PORT,
    DEFAULT_TCP_PORT,
};
use super::{DEFAULT_CERT_FILE, NODE_PID_FILE};

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_BACKOFF: Duration = Duration::from_millis(200);

#[cfg(windows)]
const NODE_BIN_NAME: &str = "superq-node.exe";
#[cfg(not(windows))]
const NODE_BIN_NAME: &str = "superq-node";

/// A pooled connection: plain TCP or rustls over TCP.
enum ClientStream {
    Plain(TcpStream),
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

impl Read for ClientStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(s) => s.read(buf),
            Self::Tls(s) => s.read(buf),
        }
    }
}

impl Write for ClientStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(s) => s.write(buf),
            Self::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(s) => s.flush(),
            Self::Tls(s) => s.flush(),
        }
    }
}

/// Manages node connections and forwards datastore operations as framed
/// requests.
pub(crate) struct NetworkClientMgr {
    node_process: Mutex<Option<Child>>,
    pools: Mutex<HashMap<(String, u16), Vec<ClientStream>>>,
}

impl NetworkClientMgr {
    pub(crate) fn new() -> Self {
        Self {
            node_process: Mutex::new(None),
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Kill the auto-launched node, if any, and drop every pooled
    /// socket.
    pub(crate) fn shutdown(&self) {
        if let Some(mut child) = self.node_process.lock().take() {
            tracing::info!(pid = child.id(), "terminating auto-launched node");
            let _ = child.kill();
            let _ = child.wait();
        }
        self.pools.lock().clear();
    }

    fn checkout(&self, addr: &HostAddr) -> Result<(ClientStream, bool)> {
        let pooled = self
            .pools
            .lock()
            .get_mut(&(addr.host.clone(), addr.port))
            .and_then(Vec::pop);
        match pooled {
            Some(stream) => Ok((stream, true)),
            None => Ok((self.connect(addr)?, false)),
        }
    }

    fn checkin(&self, addr: &HostAddr, stream: ClientStream) {
        self.pools
            .lock()
            .entry((addr.host.clone(), addr.port))
            .or_default()
            .push(stream);
    }

    fn is_local_default(addr: &HostAddr) -> bool {
        (addr.host == "localhost" || addr.host == "127.0.0.1")
            && addr.port == DEFAULT_TCP_PORT
            && !addr.tls
    }

    fn connect(&self, addr: &HostAddr) -> Result<ClientStream> {
        match TcpStream::connect((addr.host.as_str(), addr.port)) {
            Ok(sock) => wrap_stream(addr, sock),
            Err(e)
                if e.kind() == std::io::ErrorKind::ConnectionRefused
                    && Self::is_local_default(addr) =>
            {
                self.launch_local_node()?;
                let mut last = e;
                for _ in 0..CONNECT_ATTEMPTS {
                    std::thread::sleep(CONNECT_BACKOFF);
                    match TcpStream::connect((addr.host.as_str(), addr.port)) {
                        Ok(sock) => return wrap_stream(addr, sock),
                        Err(e) => last = e,
                    }
                }
                Err(last.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Spawn the node process detached and record its pid in the
    /// sidecar file.
    fn launch_local_node(&self) -> Result<()> {
        let mut guard = self.node_process.lock();
        if guard.is_some() {
            return Ok(());
        }

        let mut command = Command::new(node_binary());
        command
            .arg("-t")
            .arg(DEFAULT_TCP_PORT.to_string())
            .arg("-s")
            .arg(DEFAULT_SSL_PORT.to_string());

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const DETACHED_PROCESS: u32 = 0x0000_0008;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        }

        let child = command.spawn()?;
        std::fs::write(NODE_PID_FILE, child.id().to_string())?;
        tracing::info!(pid = child.id(), "auto-launched local superq node");
        *guard = Some(child);
        Ok(())
    }

    fn exchange(&self, host_tag: &str, request: &NodeRequest) -> Result<NodeResponse> {
        let addr = resolve_host_tag(host_tag)?;
        let msg = request.to_string();

        let (mut stream, reused) = self.checkout(&addr)?;
        match round_trip(&mut stream, &msg) {
            Ok(response) => {
                self.checkin(&addr, stream);
                Ok(response)
            }
            // a pooled socket may have been closed by the peer; retry
            // once on a fresh connection
            Err(SuperqError::Io(e)) if reused => {
                tracing::debug!(error = %e, "pooled socket failed, retrying fresh");
                drop(stream);
                let mut fresh = self.connect(&addr)?;
                let response = round_trip(&mut fresh, &msg)?;
                self.checkin(&addr, fresh);
                Ok(response)
            }
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------
    // Forwarded operations
    // ------------------------------------------------------------------

    pub(crate) fn superq_exists(&self, public_name: &str, host: &str) -> Result<bool> {
        let request =
            NodeRequest::new(NodeCmd::SuperqExists, public_name.to_owned(), String::new());
        Ok(self.exchange(host, &request)?.ok)
    }

    pub(crate) fn superq_create(&self, host: &str, public_name: &str, wire: &str) -> Result<()> {
        let request = NodeRequest::new(
            NodeCmd::SuperqCreate,
            public_name.to_owned(),
            wire.to_owned(),
        );
        let response = self.exchange(host, &request)?;
        if response.ok {
            Ok(())
        } else {
            Err(SuperqError::remote("superq_create", response))
        }
    }

    pub(crate) fn superq_read(&self, public_name: &str, host: &str) -> Result<String> {
        let request =
            NodeRequest::new(NodeCmd::SuperqRead, public_name.to_owned(), String::new());
        let response = self.exchange(host, &request)?;
        if response.ok {
            Ok(response.body)
        } else {
            Err(SuperqError::remote("superq_read", response))
        }
    }

    pub(crate) fn superq_delete(&self, host: &str, public_name: &str) -> Result<()> {
        let request =
            NodeRequest::new(NodeCmd::SuperqDelete, public_name.to_owned(), String::new());
        let response = self.exchange(host, &request)?;
        if response.ok {
            Ok(())
        } else {
            Err(SuperqError::remote("superq_delete", response))
        }
    }

    pub(crate) fn superq_query(
        &self,
        host: &str,
        public_name: &str,
        query: &str,
    ) -> Result<String> {
        let request = NodeRequest::new(
            NodeCmd::SuperqQuery,
            public_name.to_owned(),
            query.to_owned(),
        );
        let response = self.exchange(host, &request)?;
        if response.ok {
            Ok(response.body)
        } else {
            Err(SuperqError::remote("superq_query", response))
        }
    }

    pub(crate) fn superqelem_exists(
        &self,
        host: &str,
        public_name: &str,
        elem_name: &str,
    ) -> Result<bool> {
        let request = NodeRequest::new(
            NodeCmd::SuperqelemExists,
            public_name.to_owned(),
            elem_name.to_owned(),
        );
        Ok(self.exchange(host, &request)?.ok)
    }

    pub(crate) fn superqelem_create(
        &self,
        host: &str,
        public_name: &str,
        idx: Option<usize>,
        elem_wire: &str,
    ) -> Result<()> {
        let idx = idx.map_or_else(|| "None".to_owned(), |i| i.to_string());
        let request = NodeRequest::new(
            NodeCmd::SuperqelemCreate,
            format!("{public_name},{idx}"),
            elem_wire.to_owned(),
        );
        let response = self.exchange(host, &request)?;
        if response.ok {
            Ok(())
        } else {
            Err(SuperqError::remote("superqelem_create", response))
        }
    }

    pub(crate) fn superqelem_read(
        &self,
        host: &str,
        public_name: &str,
        elem_name: &str,
    ) -> Result<String> {
        let request = NodeRequest::new(
            NodeCmd::SuperqelemRead,
            public_name.to_owned(),
            elem_name.to_owned(),
        );
        let response = self.exchange(host, &request)?;
        if response.ok {
            Ok(response.body)
        } else {
            Err(SuperqError::remote("superqelem_read", response))
        }
    }

    pub(crate) fn superqelem_update(
        &self,
        host: &str,
        public_name: &str,
        elem_wire: &str,
    ) -> Result<()> {
        let request = NodeRequest::new(
            NodeCmd::SuperqelemUpdate,
            public_name.to_owned(),
            elem_wire.to_owned(),
        );
        let response = self.exchange(host, &request)?;
        if response.ok {
            Ok(())
        } else {
            Err(SuperqError::remote("superqelem_update", response))
        }
    }

    pub(crate) fn superqelem_delete(
        &self,
        host: &str,
        public_name: &str,
        elem_name: &str,
    ) -> Result<()> {
        let request = NodeRequest::new(
            NodeCmd::SuperqelemDelete,
            public_name.to_owned(),
            elem_name.to_owned(),
        );
        let response = self.exchange(host, &request)?;
        if response.ok {
            Ok(())
        } else {
            Err(SuperqError::remote("superqelem_delete", response))
        }
    }
}

fn round_trip(stream: &mut ClientStream, msg: &str) -> Result<NodeResponse> {
    write_frame(stream, msg)?;
    let reply = read_frame(stream)?;
    NodeResponse::parse(&reply)
}

fn wrap_stream(addr: &HostAddr, sock: TcpStream) -> Result<ClientStream> {
    if !addr.tls {
        return Ok(ClientStream::Plain(sock));
    }

    let file = std::fs::File::open(DEFAULT_CERT_FILE).map_err(|e| {
        SuperqError::Tls(format!("cannot read {DEFAULT_CERT_FILE}: {e}"))
    })?;
    let mut reader = std::io::BufReader::new(file);
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| SuperqError::Tls(e.to_string()))?;
        roots
            .add(cert)
            .map_err(|e| SuperqError::Tls(e.to_string()))?;
    }

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let server_name = rustls::pki_types::ServerName::try_from(addr.host.clone())
        .map_err(|e| SuperqError::Tls(e.to_string()))?;
    let conn = rustls::ClientConnection::new(Arc::new(config), server_name)
        .map_err(|e| SuperqError::Tls(e.to_string()))?;
    Ok(ClientStream::Tls(Box::new(rustls::StreamOwned::new(
        conn, sock,
    ))))
}

/// Locate the node binary: next to the current executable, one
/// directory up (the cargo target layout), or on the search path.
fn node_binary() -> PathBuf {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join(NODE_BIN_NAME);
            if sibling.exists() {
                return sibling;
            }
            if let Some(parent) = dir.parent() {
                let above = parent.join(NODE_BIN_NAME);
                if above.exists() {
                    return above;
                }
            }
        }
    }
    PathBuf::from(NODE_BIN_NAME)
}
