//! Crate error types for superq collections.
//!
//! Errors are split by domain:
//! - Backing-engine errors (statement rejected; transient busy is retried
//!   internally and never surfaces)
//! - Network errors (wire framing, request/response grammar, transport)
//! - Capacity errors (non-blocking pop on empty, push on full)
//! - Lookup errors (unknown collections, keys, attributes)
//! - Type errors (scalar/structured mismatch, unsupported inputs)

/// The main error type for the superq crate.
#[derive(Debug, thiserror::Error)]
pub enum SuperqError {
    /// A contract defined in the design but intentionally absent.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// The backing engine rejected a statement.
    #[error("db exec failed: {statement}: {message}")]
    DbExec {
        /// The offending SQL statement.
        statement: String,
        /// The engine's error text.
        message: String,
    },

    /// A network frame decoded but its request grammar is violated.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// A network frame decoded but its response grammar is violated.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Non-blocking pop on an empty collection, or a blocking pop that
    /// reached its deadline.
    #[error("collection {0} is empty")]
    Empty(String),

    /// Push on a full collection where the requested position is not a
    /// legal eviction, or a blocking push that reached its deadline.
    #[error("collection {0} is full")]
    Full(String),

    /// A user object could not be resolved back to an element.
    #[error("object not recognized: {0}")]
    ObjectNotRecognized(String),

    /// No collection registered under the given public name.
    #[error("superq {0} does not exist")]
    UnknownCollection(String),

    /// No element or atom under the given key.
    #[error("unknown key: {0}")]
    UnknownKey(String),

    /// Scalar/structured mismatch or an unsupported value type.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Invalid constructor or operation input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A remote operation was rejected by the node.
    #[error("remote {op} failed: {response}")]
    Remote {
        /// The forwarded operation.
        op: &'static str,
        /// The node's response, for context.
        response: String,
    },

    /// Transport-level I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS configuration or handshake error.
    #[error("tls error: {0}")]
    Tls(String),
}

impl SuperqError {
    /// Create a backing-engine error for a failed statement.
    pub fn db_exec(statement: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::DbExec {
            statement: statement.into(),
            message: err.to_string(),
        }
    }

    /// Create a remote-operation error carrying the node's response.
    pub fn remote(op: &'static str, response: impl std::fmt::Display) -> Self {
        Self::Remote {
            op,
            response: response.to_string(),
        }
    }

    /// Whether this error is the empty-collection signal.
    #[must_use]
    pub fn is_empty_signal(&self) -> bool {
        matches!(self, Self::Empty(_))
    }

    /// Whether this error is the full-collection signal.
    #[must_use]
    pub fn is_full_signal(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SuperqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_exec_carries_statement() {
        let err = SuperqError::db_exec("SELECT 1;", "no such table");
        assert!(err.to_string().contains("SELECT 1;"));
        assert!(err.to_string().contains("no such table"));
    }

    #[test]
    fn capacity_signals() {
        assert!(SuperqError::Empty("q".to_owned()).is_empty_signal());
        assert!(SuperqError::Full("q".to_owned()).is_full_signal());
        assert!(!SuperqError::Full("q".to_owned()).is_empty_signal());
    }
}
