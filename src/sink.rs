//! Sink Engine: the "receive" side of an SCP exchange (spec §4.C).
//!
//! Reads records from the remote source, reconstructs files and
//! directories under a local target, and exchanges acknowledgement bytes
//! with the remote so it knows when to send the next record.

use crate::codec::{self, Record};
use crate::error::{Error, Result};
use std::ffi::OsString;
use std::fs::Permissions;
use std::io::{BufRead, Read, Write};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const ACK_OK: u8 = 0x00;
const ACK_WARN: u8 = 0x01;
const ACK_FATAL: u8 = 0x02;

/// Drives the receive side of one SCP operation against a local target path.
pub struct Sink<R, W> {
    reader: R,
    acks: W,
    target: PathBuf,
    buf_size: usize,
    cursor: Vec<PathBuf>,
    first_name_override: Option<Vec<u8>>,
    setup_done: bool,
    pending_times: Option<(u64, u32, u64, u32)>,
    warnings: Vec<String>,
}

impl<R: BufRead, W: Write> Sink<R, W> {
    pub fn new(reader: R, acks: W, target: PathBuf, buf_size: usize) -> Self {
        Self {
            reader,
            acks,
            target,
            buf_size,
            cursor: Vec::new(),
            first_name_override: None,
            setup_done: false,
            pending_times: None,
            warnings: Vec::new(),
        }
    }

    /// Run the sink to completion. On success returns any best-effort
    /// warnings collected along the way (chmod/utime failures); on a
    /// protocol or local I/O error, the remote has already been sent a
    /// fatal (`0x02`) acknowledgement and the session should be torn down.
    pub fn run(mut self) -> Result<Vec<String>> {
        self.acks.write_all(&[ACK_OK])?;
        loop {
            let record = match codec::read_record(&mut self.reader) {
                Ok(Some(r)) => r,
                Ok(None) => break,
                Err(e) => {
                    let _ = self.ack_fatal(&e);
                    return Err(e);
                }
            };
            if let Err(e) = self.apply(record) {
                let _ = self.ack_fatal(&e);
                return Err(e);
            }
        }
        if self.cursor.len() > 1 {
            let e = Error::UnbalancedDir;
            let _ = self.ack_fatal(&e);
            return Err(e);
        }
        Ok(self.warnings)
    }

    fn ack_fatal(&mut self, e: &Error) -> std::io::Result<()> {
        self.acks.write_all(&[ACK_FATAL])?;
        writeln!(self.acks, "{e}")?;
        self.acks.flush()
    }

    fn ack_warn(&mut self, msg: &str) -> Result<()> {
        self.acks.write_all(&[ACK_WARN])?;
        writeln!(self.acks, "{msg}")?;
        Ok(())
    }

    fn ack_ok(&mut self) -> Result<()> {
        self.acks.write_all(&[ACK_OK])?;
        Ok(())
    }

    fn ensure_setup(&mut self, first_is_file: bool, record_name: &[u8]) {
        if self.setup_done {
            return;
        }
        self.setup_done = true;
        let target_meta = std::fs::symlink_metadata(&self.target);
        match target_meta {
            Ok(m) if m.is_dir() => {
                self.cursor.push(self.target.clone());
            }
            Ok(_) => {
                // Target exists but is not a directory: use its parent.
                self.cursor.push(parent_or_cwd(&self.target));
            }
            Err(_) if first_is_file => {
                // Target doesn't exist and the stream opens with a file:
                // the target path itself is the destination file name.
                self.cursor.push(parent_or_cwd(&self.target));
                let name = self
                    .target
                    .file_name()
                    .map(|n| n.as_bytes().to_vec())
                    .unwrap_or_else(|| record_name.to_vec());
                self.first_name_override = Some(name);
            }
            Err(_) => {
                self.cursor.push(parent_or_cwd(&self.target));
            }
        }
    }

    fn resolve_first_name(&mut self, record_name: &[u8]) -> Vec<u8> {
        self.first_name_override.take().unwrap_or_else(|| record_name.to_vec())
    }

    fn cwd(&self) -> &Path {
        self.cursor.last().expect("cursor always has an initial entry once set up")
    }

    fn apply(&mut self, record: Record) -> Result<()> {
        match record {
            Record::Times { mtime_s, mtime_us, atime_s, atime_us } => {
                self.pending_times = Some((mtime_s, mtime_us, atime_s, atime_us));
                self.ack_ok()
            }
            Record::Dir { mode, name } => {
                self.ensure_setup(false, &name);
                let effective_name = self.resolve_first_name(&name);
                let path = self.cwd().join(bytes_to_path(&effective_name));
                let times = self.pending_times.take();
                match std::fs::create_dir(&path) {
                    Ok(()) => {
                        if let Err(e) = std::fs::set_permissions(&path, Permissions::from_mode(mode))
                        {
                            self.warnings.push(format!("chmod {} failed: {e}", path.display()));
                            self.cursor.push(path.clone());
                            apply_times_best_effort(&path, times, &mut self.warnings);
                            return self.ack_warn(&format!("chmod {} failed: {e}", path.display()));
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                        // Keep the existing directory; do not alter its mode.
                    }
                    Err(e) => return Err(Error::from(e)),
                }
                self.cursor.push(path.clone());
                apply_times_best_effort(&path, times, &mut self.warnings);
                self.ack_ok()
            }
            Record::EndDir => {
                if self.cursor.len() <= 1 {
                    return Err(Error::UnbalancedEndDir);
                }
                self.cursor.pop();
                self.ack_ok()
            }
            Record::File { mode, size, name } => {
                self.ensure_setup(true, &name);
                let effective_name = self.resolve_first_name(&name);
                let path = self.cwd().join(bytes_to_path(&effective_name));
                let mut file = std::fs::File::create(&path)?;
                codec::read_file_payload(&mut self.reader, &mut file, size, self.buf_size)?;
                drop(file);
                let times = self.pending_times.take();
                let mut warning: Option<String> = None;
                if let Err(e) = std::fs::set_permissions(&path, Permissions::from_mode(mode)) {
                    warning = Some(format!("chmod {} failed: {e}", path.display()));
                }
                apply_times_best_effort(&path, times, &mut self.warnings);
                match warning {
                    Some(msg) => {
                        self.warnings.push(msg.clone());
                        self.ack_warn(&msg)
                    }
                    None => self.ack_ok(),
                }
            }
        }
    }
}

/// Drive the same record-boundary and acknowledgement discipline as
/// [`Sink::run`], but without touching the filesystem: every raw byte read
/// from `reader` is captured verbatim and returned, instead of being
/// materialized under a target path. Used by `get_buffer`, where the result
/// is itself a replayable raw SCP stream rather than a reconstructed tree.
pub fn drive_raw_capture<R: Read, W: Write>(reader: R, mut acks: W, buf_size: usize) -> Result<Vec<u8>> {
    let mut tee = std::io::BufReader::new(TeeReader { inner: reader, capture: Vec::new() });
    acks.write_all(&[ACK_OK])?;
    let mut open_dirs: usize = 0;

    loop {
        let record = match codec::read_record(&mut tee) {
            Ok(Some(r)) => r,
            Ok(None) => break,
            Err(e) => return Err(fail(&mut acks, e)),
        };
        match record {
            Record::Times { .. } => acks.write_all(&[ACK_OK])?,
            Record::Dir { .. } => {
                open_dirs += 1;
                acks.write_all(&[ACK_OK])?;
            }
            Record::EndDir => {
                if open_dirs == 0 {
                    return Err(fail(&mut acks, Error::UnbalancedEndDir));
                }
                open_dirs -= 1;
                acks.write_all(&[ACK_OK])?;
            }
            Record::File { size, .. } => {
                if let Err(e) = codec::read_file_payload(&mut tee, &mut std::io::sink(), size, buf_size) {
                    return Err(fail(&mut acks, e));
                }
                acks.write_all(&[ACK_OK])?;
            }
        }
    }

    if open_dirs != 0 {
        return Err(fail(&mut acks, Error::UnbalancedDir));
    }
    Ok(tee.into_inner().capture)
}

struct TeeReader<R> {
    inner: R,
    capture: Vec<u8>,
}

impl<R: Read> Read for TeeReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.capture.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

fn fail<W: Write>(acks: &mut W, e: Error) -> Error {
    let _ = acks.write_all(&[ACK_FATAL]);
    let _ = writeln!(acks, "{e}");
    e
}

fn parent_or_cwd(p: &Path) -> PathBuf {
    p.parent().filter(|p| !p.as_os_str().is_empty()).map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."))
}

fn bytes_to_path(name: &[u8]) -> PathBuf {
    PathBuf::from(OsString::from_vec(name.to_vec()))
}

fn apply_times_best_effort(path: &Path, times: Option<(u64, u32, u64, u32)>, warnings: &mut Vec<String>) {
    let Some((mtime_s, mtime_us, atime_s, atime_us)) = times else { return };
    let mtime = filetime::FileTime::from_unix_time(mtime_s as i64, mtime_us * 1000);
    let atime = filetime::FileTime::from_unix_time(atime_s as i64, atime_us * 1000);
    if let Err(e) = filetime::set_file_times(path, atime, mtime) {
        warnings.push(format!("utime {} failed: {e}", path.display()));
    }
}
