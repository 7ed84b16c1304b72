//! Networking: the framed wire codec, the node protocol, the blocking
//! client pool, and the node server.

pub(crate) mod client;
mod codec;
pub mod protocol;
mod server;

pub use codec::FrameCodec;
pub use protocol::{
    resolve_host_tag, HostAddr, NodeCmd, NodeRequest, NodeResponse, DEFAULT_SSL_PORT,
    DEFAULT_TCP_PORT,
};
pub use server::NodeServer;

/// Default TLS certificate file, also used by clients as the trust
/// anchor for `ssl:` hosts.
pub const DEFAULT_CERT_FILE: &str = "server.pem";
/// Default TLS private key file.
pub const DEFAULT_KEY_FILE: &str = "server.key";
/// Sidecar file recording the auto-launched node's pid.
pub const NODE_PID_FILE: &str = "node.pid";
/// Sidecar file the node process logs into.
pub const NODE_LOG_FILE: &str = "node.output";
