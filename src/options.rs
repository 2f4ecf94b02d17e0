use std::time::Duration;

/// Non-persisted tuning knobs for a transfer.
///
/// The teacher crate wires equivalent values (`--buf-mib`, concurrency) in
/// from CLI flags and a config file; this crate has no CLI and no
/// configuration files (spec §6), so callers construct `Options` directly
/// and pass it into the choreographer for a single operation.
#[derive(Debug, Clone)]
pub struct Options {
    /// Size of the buffer used to stream a `File` record's payload, in
    /// either direction. The codec never holds more than one buffer's worth
    /// of payload in memory at a time (spec §4.B: "never allocates
    /// unbounded read-ahead").
    pub buffer_size: usize,
    /// Idle timeout applied while establishing the SSH session and
    /// negotiating the remote `scp` process. Per spec §5, unlimited during
    /// data transfer unless the caller re-applies a deadline on the
    /// underlying channel themselves.
    pub handshake_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self { buffer_size: 32 * 1024, handshake_timeout: Duration::from_secs(60) }
    }
}
