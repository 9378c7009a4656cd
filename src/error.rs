//! Session and stream error types.

use std::fmt;
use std::io;
use std::sync::Arc;

/// Errors surfaced by sessions and streams.
///
/// Fatal errors are stored once in the session and handed out as clones to
/// every caller blocked on the session surface, so the type is `Clone` and
/// transport errors are shared behind an `Arc`.
#[derive(Debug, Clone)]
pub enum Error {
    /// The peer spoke a different protocol version or an unknown command.
    InvalidProtocol,
    /// The peer reported consuming more bytes than were ever sent on the
    /// stream.
    Consumed,
    /// The local stream-id space is exhausted; open a new session.
    GoAway,
    /// A deadline expired while accepting a stream or submitting a write.
    Timeout,
    /// A non-blocking operation could not proceed without waiting.
    WouldBlock,
    /// The session is closed.
    ClosedPipe,
    /// The configuration was rejected by validation.
    InvalidConfig(&'static str),
    /// A transport-level I/O failure.
    Io(Arc<io::Error>),
}

impl Error {
    /// Whether the error is transient: the operation may be retried on the
    /// same session.
    pub fn is_temporary(&self) -> bool {
        matches!(self, Error::Timeout | Error::WouldBlock)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidProtocol => write!(f, "invalid protocol"),
            Error::Consumed => write!(f, "peer consumed more than sent"),
            Error::GoAway => write!(f, "stream id space exhausted"),
            Error::Timeout => write!(f, "timeout"),
            Error::WouldBlock => write!(f, "operation would block"),
            Error::ClosedPipe => write!(f, "session closed"),
            Error::InvalidConfig(why) => write!(f, "invalid config: {why}"),
            Error::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_would_block_are_temporary() {
        assert!(Error::Timeout.is_temporary());
        assert!(Error::WouldBlock.is_temporary());
        assert!(!Error::ClosedPipe.is_temporary());
        assert!(!Error::InvalidProtocol.is_temporary());
    }

    #[test]
    fn io_errors_keep_their_source() {
        let err = Error::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        let source = std::error::Error::source(&err).expect("io source");
        assert!(source.to_string().contains("reset"));
    }
}
