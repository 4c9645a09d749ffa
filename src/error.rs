use thiserror::Error;

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by sources, the seekable reader, and the VFS adapter.
///
/// Variants carry rendered messages rather than source errors so that the
/// whole taxonomy stays cloneable; the once-guarded VFS registration caches
/// its outcome and hands out clones.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The named path or URL does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The source exists but refuses access.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A retryable source failure. Only surfaced once the retry budget is
    /// exhausted; see `HttpRangeSource`.
    #[error("transient source failure: {0}")]
    Transient(String),

    /// The seekable stream is malformed: bad magic numbers, prefix sums
    /// that disagree with the source size, failed decompression, or a
    /// checksum mismatch.
    #[error("corrupt seekable stream: {0}")]
    Corrupt(String),

    /// The source returned fewer bytes than the frame index expects.
    #[error("short read: wanted {wanted} bytes, got {got}")]
    IoShort { wanted: usize, got: usize },

    /// A write, truncate, or delete was attempted on the read-only file.
    #[error("write attempted on read-only database")]
    ReadOnly,

    /// A cancellation signal fired between frame fetches.
    #[error("read cancelled")]
    Cancelled,

    /// Source construction failed at open time.
    #[error("cannot open {0}")]
    CantOpen(String),

    /// An unrecoverable I/O failure.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        // Cursors wrap crate errors when crossing the std::io boundary;
        // unwrap them instead of flattening to an opaque kind.
        if let Some(inner) = err.get_ref().and_then(|e| e.downcast_ref::<Error>()) {
            return inner.clone();
        }

        match err.kind() {
            ErrorKind::NotFound => Error::NotFound(err.to_string()),
            ErrorKind::PermissionDenied => Error::PermissionDenied(err.to_string()),
            ErrorKind::TimedOut
            | ErrorKind::Interrupted
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionAborted => Error::Transient(err.to_string()),
            _ => Error::Io(err.to_string()),
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind;

        let kind = match &err {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::IoShort { .. } => ErrorKind::UnexpectedEof,
            Error::Corrupt(_) => ErrorKind::InvalidData,
            Error::Cancelled => ErrorKind::Interrupted,
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Io(err.to_string())
    }
}
