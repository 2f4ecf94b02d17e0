//! Repository-wide structured errors for SCP transfer operations.

/// Exhaustive error type for every failure mode the crate can surface.
///
/// Variants line up with the component that raises them: path resolution,
/// the SSH collaborator, the wire-format codec, or the remote `scp` process.
#[derive(Debug, Clone)]
pub enum Error {
    /// `~` expansion requested but the home directory is unknown, or the
    /// path could not be normalized.
    InvalidPath(String),
    ConnectionFailed(String),
    AuthenticationFailed(String),
    SessionOpenFailed(String),
    /// Bad tag, missing newline, wrong field count, or non-numeric field.
    MalformedRecord(String),
    /// A record name contained `/` or `\n`.
    NameContainsSeparator(String),
    /// Declared size exceeds the platform file-offset range.
    SizeOverflow(String),
    /// Missing trailing `0x00`, or premature EOF mid-payload.
    PayloadFramingError(String),
    /// End-of-stream with open `D` scopes still unmatched by `E`.
    UnbalancedDir,
    /// An `E` record with no open `D` scope to close.
    UnbalancedEndDir,
    LocalIoFailed(std::io::ErrorKind, String),
    /// The remote sink/source sent a fatal (`0x02`) acknowledgement.
    RemoteRejected(String),
    RemoteCommandFailed { exit_code: i32, stderr_tail: String },
    Cancelled,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Error::*;
        match self {
            InvalidPath(p) => write!(f, "invalid path: {p}"),
            ConnectionFailed(msg) => write!(f, "connection failed: {msg}"),
            AuthenticationFailed(msg) => write!(f, "authentication failed: {msg}"),
            SessionOpenFailed(msg) => write!(f, "failed to open SSH session: {msg}"),
            MalformedRecord(msg) => write!(f, "malformed SCP record: {msg}"),
            NameContainsSeparator(name) => {
                write!(f, "record name contains '/' or newline: {name:?}")
            }
            SizeOverflow(msg) => write!(f, "size overflow: {msg}"),
            PayloadFramingError(msg) => write!(f, "payload framing error: {msg}"),
            UnbalancedDir => write!(f, "stream ended with unclosed directory scope"),
            UnbalancedEndDir => write!(f, "'E' record with no open directory scope"),
            LocalIoFailed(kind, msg) => write!(f, "local I/O error ({kind:?}): {msg}"),
            RemoteRejected(msg) => write!(f, "remote rejected transfer: {msg}"),
            RemoteCommandFailed { exit_code, stderr_tail } => {
                if stderr_tail.is_empty() {
                    write!(f, "remote scp exited with status {exit_code}")
                } else {
                    write!(f, "remote scp exited with status {exit_code}: {stderr_tail}")
                }
            }
            Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::LocalIoFailed(e.kind(), e.to_string())
    }
}

/// Result alias used across the crate's public surface.
pub type Result<T> = std::result::Result<T, Error>;
