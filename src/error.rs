use thiserror::Error;

/// Errors produced by the server engine.
///
/// A failure on one connection only ever terminates that connection; the
/// listener and the other clients are unaffected. A full event queue is not
/// an error at all, it is backpressure on the producing connection.
#[derive(Debug, Error)]
pub enum VncError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer disconnected, or a read ended short of a full message.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Malformed message, unsupported mandatory feature or invalid
    /// dimensions on the wire.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The configured client limit was reached; the connection was refused
    /// after the version handshake.
    #[error("too many clients")]
    TooManyClients,

    /// Rejected options at construction time.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The client made no progress through the handshake within the
    /// allowed window.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The listening socket failed in a way the server cannot recover from.
    #[error("listener failure: {0}")]
    Fatal(String),
}

impl VncError {
    /// True when the peer simply went away, which is routine and logged
    /// quietly rather than as a failure.
    pub fn is_disconnect(&self) -> bool {
        match self {
            VncError::ConnectionClosed => true,
            VncError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
