//! The SSH collaborator boundary (spec §6).
//!
//! The core treats SSH as an opaque bidirectional byte channel plus a
//! command invoker; connection establishment and authentication are
//! explicitly out of scope (spec §1). This module still provides a
//! concrete `ssh2`-backed adapter so callers don't have to write their own
//! to use the crate, following the same shape as the teacher's
//! `SftpLike`/`Ssh2Adapter` split (`transfer/sftp_like.rs`): a small trait
//! plus one boxed adapter over the real library.

use crate::error::{Error, Result};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

/// How to authenticate once the transport handshake completes.
pub enum Auth {
    PrivateKeyFile { path: PathBuf, passphrase: Option<String> },
    Password(String),
    /// Try the default key files under `~/.ssh` in turn, first match wins —
    /// the teacher's `try_key_authentication` fallback chain.
    DefaultKeyFiles,
}

pub struct ConnectConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: Auth,
    pub handshake_timeout: Duration,
}

/// Open a TCP connection and complete the SSH handshake and authentication.
pub fn connect(cfg: &ConnectConfig) -> Result<ssh2::Session> {
    let addr = format!("{}:{}", cfg.host, cfg.port);
    let mut addrs = addr
        .to_socket_addrs()
        .map_err(|e| Error::ConnectionFailed(format!("cannot resolve {addr}: {e}")))?;
    let sock_addr =
        addrs.next().ok_or_else(|| Error::ConnectionFailed(format!("no address for {addr}")))?;
    let tcp = TcpStream::connect_timeout(&sock_addr, cfg.handshake_timeout)
        .map_err(|e| Error::ConnectionFailed(format!("{addr}: {e}")))?;
    let _ = tcp.set_read_timeout(Some(cfg.handshake_timeout));
    let _ = tcp.set_write_timeout(Some(cfg.handshake_timeout));

    let mut sess =
        ssh2::Session::new().map_err(|e| Error::SessionOpenFailed(format!("{addr}: {e}")))?;
    sess.set_tcp_stream(tcp);
    sess.handshake().map_err(|e| Error::ConnectionFailed(format!("handshake with {addr}: {e}")))?;

    authenticate(&mut sess, &cfg.username, &cfg.auth)?;
    tracing::info!(host = cfg.host.as_str(), port = cfg.port, "SSH session established");
    Ok(sess)
}

fn authenticate(sess: &mut ssh2::Session, username: &str, auth: &Auth) -> Result<()> {
    match auth {
        Auth::Password(pw) => {
            sess.userauth_password(username, pw)
                .map_err(|e| Error::AuthenticationFailed(e.to_string()))?;
        }
        Auth::PrivateKeyFile { path, passphrase } => {
            sess.userauth_pubkey_file(username, None, path, passphrase.as_deref())
                .map_err(|e| Error::AuthenticationFailed(e.to_string()))?;
        }
        Auth::DefaultKeyFiles => {
            let home = dirs::home_dir()
                .ok_or_else(|| Error::AuthenticationFailed("no home directory for key lookup".into()))?;
            let mut last_err = None;
            for name in ["id_ed25519", "id_rsa", "id_ecdsa"] {
                let candidate = home.join(".ssh").join(name);
                if !candidate.exists() {
                    continue;
                }
                match sess.userauth_pubkey_file(username, None, &candidate, None) {
                    Ok(()) if sess.authenticated() => return Ok(()),
                    Ok(()) => {}
                    Err(e) => {
                        tracing::debug!(key = %candidate.display(), error = %e, "key auth attempt failed");
                        last_err = Some(e.to_string());
                    }
                }
            }
            return Err(Error::AuthenticationFailed(
                last_err.unwrap_or_else(|| "no usable default key file found".into()),
            ));
        }
    }
    if !sess.authenticated() {
        return Err(Error::AuthenticationFailed("session not authenticated after auth call".into()));
    }
    Ok(())
}

/// The command-invoker half of the collaborator contract: a running remote
/// process with a duplex byte channel and a final exit status.
pub trait RemoteCommand: Send {
    fn reader(&mut self) -> &mut dyn Read;
    fn writer(&mut self) -> &mut dyn Write;
    /// Close the write half so the remote sees EOF on stdin, then block
    /// until the process exits, returning its exit code and a tail of
    /// anything written to stderr.
    fn finish(&mut self) -> Result<(i32, String)>;
}

/// `ssh2::Channel`-backed implementation of [`RemoteCommand`].
pub struct Ssh2Command {
    channel: ssh2::Channel,
}

impl Ssh2Command {
    pub fn spawn(sess: &ssh2::Session, cmd: &str) -> Result<Self> {
        let mut channel = sess
            .channel_session()
            .map_err(|e| Error::SessionOpenFailed(format!("channel_session: {e}")))?;
        channel.exec(cmd).map_err(|e| Error::SessionOpenFailed(format!("exec {cmd:?}: {e}")))?;
        tracing::info!(cmd, "spawned remote command");
        Ok(Self { channel })
    }
}

impl RemoteCommand for Ssh2Command {
    fn reader(&mut self) -> &mut dyn Read {
        &mut self.channel
    }

    fn writer(&mut self) -> &mut dyn Write {
        &mut self.channel
    }

    fn finish(&mut self) -> Result<(i32, String)> {
        let _ = self.channel.send_eof();
        let mut stderr_tail = String::new();
        let _ = self.channel.stderr().read_to_string(&mut stderr_tail);
        self.channel
            .wait_close()
            .map_err(|e| Error::SessionOpenFailed(format!("wait_close: {e}")))?;
        let code = self
            .channel
            .exit_status()
            .map_err(|e| Error::SessionOpenFailed(format!("exit_status: {e}")))?;
        if !stderr_tail.is_empty() {
            tracing::warn!(exit_code = code, stderr = stderr_tail.trim_end(), "remote scp exited");
        }
        Ok((code, stderr_tail))
    }
}

/// Single-quote-wrap a remote path per spec §6: any embedded single quote
/// is replaced with `'\''`. Nothing else is escaped — spaces pass through.
pub fn quote_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 2);
    out.push('\'');
    for ch in path.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_path_escapes_embedded_single_quotes() {
        assert_eq!(quote_path("/tmp/plain"), "'/tmp/plain'");
        assert_eq!(quote_path("/tmp/o'brien"), "'/tmp/o'\\''brien'");
        assert_eq!(quote_path("has space"), "'has space'");
    }
}
