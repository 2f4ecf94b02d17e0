//! Client-side SCP (Secure Copy) file transfer over an already-established
//! SSH session: push and pull single files, directory trees, and in-memory
//! buffers using the classic `scp -f`/`scp -t` wire protocol.

pub mod choreographer;
pub mod codec;
pub mod error;
pub mod options;
pub mod path_utils;
pub mod session;
pub mod sink;
pub mod source;

#[cfg(test)]
pub mod testutil;

pub use choreographer::Choreographer;
pub use error::{Error, Result};
pub use options::Options;
pub use session::{Auth, ConnectConfig};

use std::path::Path;

/// One end of an SSH connection plus the tuning knobs for transfers run
/// over it. This is the crate's top-level entry point — build it once per
/// remote host, then call `get`/`put`/`get_buffer`/`put_buffer` as needed.
pub struct Client {
    choreographer: Choreographer,
}

impl Client {
    /// Dial, authenticate, and return a client ready to drive transfers,
    /// using [`Options::default`] for buffer size and timeouts.
    pub fn connect(cfg: ConnectConfig) -> Result<Self> {
        Self::connect_with_options(cfg, Options::default())
    }

    pub fn connect_with_options(cfg: ConnectConfig, options: Options) -> Result<Self> {
        let sess = session::connect(&cfg)?;
        Ok(Self { choreographer: Choreographer::new(sess, options) })
    }

    /// Wrap an already-authenticated `ssh2::Session` (e.g. one another part
    /// of the host application manages) instead of dialing one here.
    pub fn from_session(sess: ssh2::Session, options: Options) -> Self {
        Self { choreographer: Choreographer::new(sess, options) }
    }

    /// Pull `remote_src` (file or directory) down to `local_dst`.
    pub fn get(&self, remote_src: &str, local_dst: &Path) -> Result<Vec<String>> {
        self.choreographer.get(remote_src, local_dst)
    }

    /// Push `local_src` (file or directory) up to `remote_dst`.
    pub fn put(&self, local_src: &Path, remote_dst: &str) -> Result<()> {
        self.choreographer.put(local_src, remote_dst)
    }

    /// Capture the raw SCP byte stream for `remote_src` into memory, unparsed
    /// — identical to [`Self::get`] except nothing is written to the local
    /// filesystem. `remote_src` may be a file or a directory tree.
    pub fn get_buffer(&self, remote_src: &str) -> Result<Vec<u8>> {
        self.choreographer.get_buffer(remote_src)
    }

    /// Replay a previously captured raw SCP stream to `remote_dst` —
    /// identical to [`Self::put`] except the source is `bytes` itself rather
    /// than a local path; `bytes` must already be a complete, well-formed
    /// SCP stream (as returned by [`Self::get_buffer`]).
    pub fn put_buffer(&self, bytes: &[u8], remote_dst: &str) -> Result<()> {
        self.choreographer.put_buffer(bytes, remote_dst)
    }
}
