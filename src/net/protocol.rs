//! Node protocol grammar: commands, requests, responses, and host tag
//! resolution.
//!
//! A request body reads `msg_id | cmd | args % body`; a response reads
//! `msg_id | result % body` with `result` the literal `True` or
//! `False`. Message ids come from a process-wide monotonic counter.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, SuperqError};

/// Default TCP port for node servers.
pub const DEFAULT_TCP_PORT: u16 = 9990;
/// Default TLS port for node servers.
pub const DEFAULT_SSL_PORT: u16 = 9991;

static NEXT_MSG_ID: AtomicU64 = AtomicU64::new(1);

/// The ten node commands, wire-coded by their 1-based position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCmd {
    /// Does a collection exist.
    SuperqExists = 1,
    /// Create and attach a serialized collection.
    SuperqCreate = 2,
    /// Read a collection's serialized form.
    SuperqRead = 3,
    /// Delete a collection.
    SuperqDelete = 4,
    /// Run a query and return the serialized result collection.
    SuperqQuery = 5,
    /// Does an element exist.
    SuperqelemExists = 6,
    /// Insert a serialized element.
    SuperqelemCreate = 7,
    /// Read an element's serialized form.
    SuperqelemRead = 8,
    /// Update an element from its serialized form.
    SuperqelemUpdate = 9,
    /// Delete an element by name.
    SuperqelemDelete = 10,
}

impl NodeCmd {
    /// The wire code.
    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Resolve a wire code.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::SuperqExists),
            2 => Some(Self::SuperqCreate),
            3 => Some(Self::SuperqRead),
            4 => Some(Self::SuperqDelete),
            5 => Some(Self::SuperqQuery),
            6 => Some(Self::SuperqelemExists),
            7 => Some(Self::SuperqelemCreate),
            8 => Some(Self::SuperqelemRead),
            9 => Some(Self::SuperqelemUpdate),
            10 => Some(Self::SuperqelemDelete),
            _ => None,
        }
    }
}

/// A decoded node request.
#[derive(Debug, Clone)]
pub struct NodeRequest {
    /// Client-minted message id, echoed in the response.
    pub msg_id: String,
    /// The command.
    pub cmd: NodeCmd,
    /// Command argument (usually a public name).
    pub args: String,
    /// Command body (serialized payload; may be empty).
    pub body: String,
}

impl NodeRequest {
    /// Build a request with a freshly minted message id.
    #[must_use]
    pub fn new(cmd: NodeCmd, args: String, body: String) -> Self {
        Self {
            msg_id: NEXT_MSG_ID.fetch_add(1, Ordering::SeqCst).to_string(),
            cmd,
            args,
            body,
        }
    }

    /// Parse a request body. Grammar violations fail with
    /// `MalformedRequest`.
    pub fn parse(s: &str) -> Result<Self> {
        let bad = || SuperqError::MalformedRequest(s.to_owned());

        let (header, body) = s.split_once('%').ok_or_else(bad)?;
        let fields: Vec<&str> = header.split('|').collect();
        let [msg_id, cmd, args] = fields.as_slice() else {
            return Err(bad());
        };
        let cmd = cmd
            .parse::<u8>()
            .ok()
            .and_then(NodeCmd::from_code)
            .ok_or_else(bad)?;
        Ok(Self {
            msg_id: (*msg_id).to_owned(),
            cmd,
            args: (*args).to_owned(),
            body: body.to_owned(),
        })
    }
}

impl fmt::Display for NodeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}%{}",
            self.msg_id,
            self.cmd.code(),
            self.args,
            self.body
        )
    }
}

/// A decoded node response.
#[derive(Debug, Clone)]
pub struct NodeResponse {
    /// Echo of the request's message id.
    pub msg_id: String,
    /// The boolean result.
    pub ok: bool,
    /// Response body (serialized payload; may be empty).
    pub body: String,
}

impl NodeResponse {
    /// Parse a response body. Grammar violations fail with
    /// `MalformedResponse`.
    pub fn parse(s: &str) -> Result<Self> {
        let bad = || SuperqError::MalformedResponse(s.to_owned());

        let (header, body) = s.split_once('%').ok_or_else(bad)?;
        let (msg_id, result) = header.split_once('|').ok_or_else(bad)?;
        if msg_id.contains('|') || result.contains('|') {
            return Err(bad());
        }
        let ok = match result {
            "True" => true,
            "False" => false,
            _ => return Err(bad()),
        };
        Ok(Self {
            msg_id: msg_id.to_owned(),
            ok,
            body: body.to_owned(),
        })
    }
}

impl fmt::Display for NodeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}%{}",
            self.msg_id,
            if self.ok { "True" } else { "False" },
            self.body
        )
    }
}

/// A resolved host tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddr {
    /// Hostname or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Whether to wrap the connection in TLS.
    pub tls: bool,
}

/// Resolve a host tag: `local` is shorthand for localhost on the
/// default TCP port; `ssl:host:port` selects TLS; `host[:port]` plain
/// TCP.
pub fn resolve_host_tag(tag: &str) -> Result<HostAddr> {
    if tag == "local" {
        return Ok(HostAddr {
            host: "localhost".to_owned(),
            port: DEFAULT_TCP_PORT,
            tls: false,
        });
    }

    if let Some(rest) = tag.strip_prefix("ssl:") {
        let (host, port) = rest.split_once(':').ok_or_else(|| {
            SuperqError::InvalidArgument(format!("bad ssl host tag: {tag}"))
        })?;
        let port = port.parse().map_err(|_| {
            SuperqError::InvalidArgument(format!("bad port in host tag: {tag}"))
        })?;
        return Ok(HostAddr {
            host: host.to_owned(),
            port,
            tls: true,
        });
    }

    match tag.split_once(':') {
        Some((host, port)) => {
            let port = port.parse().map_err(|_| {
                SuperqError::InvalidArgument(format!("bad port in host tag: {tag}"))
            })?;
            Ok(HostAddr {
                host: host.to_owned(),
                port,
                tls: false,
            })
        }
        None => Ok(HostAddr {
            host: tag.to_owned(),
            port: DEFAULT_TCP_PORT,
            tls: false,
        }),
    }
}
