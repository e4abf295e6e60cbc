//! Error taxonomy shared by the server and client cores.

use sandlink_terrain::GeometryError;

/// Broad class of a [`NetError`].
///
/// Every class is fatal to the one connection it occurs on and to nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The peer's byte-order token was not recognised.
    Handshake,
    /// The peer sent bytes that do not form a valid message.
    Protocol,
    /// The connection itself failed or was closed.
    Transport,
}

/// Errors produced while speaking the heightfield streaming protocol.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The 4-byte endianness token matched neither byte order.
    #[error("bad endianness token {0:#010x}")]
    BadMagic(u32),

    /// A client message carried a tag other than the pose update.
    #[error("unknown message tag {0}")]
    UnknownMessage(u16),

    /// The server announced an unusable grid geometry.
    #[error("invalid grid geometry: {0}")]
    InvalidGeometry(#[from] GeometryError),

    /// A snapshot buffer did not have the length the geometry implies.
    #[error("snapshot length mismatch: expected {expected} bytes, got {actual}")]
    SnapshotLength {
        /// Length implied by the geometry.
        expected: usize,
        /// Length actually supplied.
        actual: usize,
    },

    /// The peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            NetError::BadMagic(_) => ErrorKind::Handshake,
            NetError::UnknownMessage(_)
            | NetError::InvalidGeometry(_)
            | NetError::SnapshotLength { .. } => ErrorKind::Protocol,
            NetError::ConnectionClosed | NetError::Io(_) => ErrorKind::Transport,
        }
    }

    /// Map an I/O error, folding end-of-stream into [`NetError::ConnectionClosed`].
    pub(crate) fn from_read(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            NetError::ConnectionClosed
        } else {
            NetError::Io(err)
        }
    }
}
