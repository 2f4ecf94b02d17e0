//! Source Engine: the "send" side of an SCP exchange (spec §4.D).
//!
//! Walks a local path, emits records in the order the remote sink expects,
//! streams file contents, and balances `D` records with matching `E`
//! records using a stack of currently-open directory scopes.

use crate::codec;
use crate::error::{Error, Result};
use crate::path_utils::walk;
use std::io::{BufRead, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// Drives the send side of one SCP operation.
pub struct Source<W, A> {
    writer: W,
    acks: A,
    buf_size: usize,
}

impl<W: Write, A: BufRead> Source<W, A> {
    pub fn new(writer: W, acks: A, buf_size: usize) -> Self {
        Self { writer, acks, buf_size }
    }

    /// Send a single regular file, renamed to `name` on the wire (spec
    /// §4.D first bullet — this is what lets a push rename the remote
    /// basename independent of the local one).
    pub fn send_file(&mut self, path: &Path, name: &[u8]) -> Result<()> {
        let meta = std::fs::metadata(path)?;
        let mode = meta.mode() & 0o7777;
        self.emit_file(path, mode, meta.len(), name)
    }

    /// Send the preorder serialization of `root`'s tree, including `root`
    /// itself as the outermost `D`/`E` pair (spec §8 scenario 2).
    pub fn send_tree(&mut self, root: &Path) -> Result<()> {
        let meta = std::fs::metadata(root)?;
        let root_name = root
            .file_name()
            .map(|n| n.as_bytes().to_vec())
            .ok_or_else(|| Error::InvalidPath(format!("{} has no basename", root.display())))?;
        self.emit_dir(meta.mode() & 0o7777, &root_name)?;
        let mut open_stack: Vec<Vec<u8>> = vec![root_name];

        for entry in walk(root)? {
            let rel = entry.path.strip_prefix(root).expect("walk entries are under root");
            let rel_components: Vec<Vec<u8>> =
                rel.components().map(|c| c.as_os_str().as_bytes().to_vec()).collect();
            let mut target_scope = vec![open_stack[0].clone()];
            if entry.is_dir {
                target_scope.extend(rel_components.iter().cloned());
            } else {
                target_scope.extend(rel_components[..rel_components.len() - 1].iter().cloned());
            }

            self.unwind_to_prefix(&mut open_stack, &target_scope)?;

            if entry.is_dir {
                let name = rel_components.last().expect("dir entry has a basename").clone();
                self.emit_dir(entry.mode, &name)?;
                open_stack.push(name);
            } else {
                let name = rel_components.last().expect("file entry has a basename").clone();
                self.emit_file(&entry.path, entry.mode, std::fs::metadata(&entry.path)?.len(), &name)?;
            }
        }

        while !open_stack.is_empty() {
            self.emit_end_dir()?;
            open_stack.pop();
        }
        Ok(())
    }

    fn unwind_to_prefix(&mut self, open_stack: &mut Vec<Vec<u8>>, target: &[Vec<u8>]) -> Result<()> {
        while !(open_stack.len() <= target.len() && open_stack.as_slice() == &target[..open_stack.len()])
        {
            self.emit_end_dir()?;
            open_stack.pop();
        }
        Ok(())
    }

    fn emit_dir(&mut self, mode: u32, name: &[u8]) -> Result<()> {
        codec::write_dir_header(&mut self.writer, mode, name)?;
        self.wait_ack()
    }

    fn emit_end_dir(&mut self) -> Result<()> {
        codec::write_end_dir(&mut self.writer)?;
        self.wait_ack()
    }

    fn emit_file(&mut self, path: &Path, mode: u32, size: u64, name: &[u8]) -> Result<()> {
        codec::write_file_header(&mut self.writer, mode, size, name)?;
        let mut f = std::fs::File::open(path)?;
        let mut reader: &mut dyn Read = &mut f;
        codec::stream_payload(&mut reader, &mut self.writer, size, self.buf_size)?;
        self.wait_ack()
    }

    fn wait_ack(&mut self) -> Result<()> {
        let mut byte = [0u8; 1];
        self.acks.read_exact(&mut byte)?;
        match byte[0] {
            0x00 => Ok(()),
            0x01 => {
                let mut msg = String::new();
                self.acks.read_line(&mut msg)?;
                tracing::warn!(message = msg.trim_end(), "remote scp reported a warning");
                Ok(())
            }
            0x02 => {
                let mut msg = String::new();
                self.acks.read_line(&mut msg)?;
                Err(Error::RemoteRejected(msg.trim_end().to_string()))
            }
            other => Err(Error::MalformedRecord(format!("unexpected ack byte {:#04x}", other))),
        }
    }
}

/// Write an already-formed raw SCP byte stream (as produced by
/// [`crate::sink::drive_raw_capture`]) straight to the remote sink, then
/// drain its acknowledgement bytes until it closes its end. Used by
/// `put_buffer`, where the caller's buffer already contains complete
/// records and there is nothing left for this crate's codec to construct.
pub fn replay_raw<W: Write, A: BufRead>(writer: &mut W, acks: &mut A, bytes: &[u8]) -> Result<()> {
    writer.write_all(bytes)?;
    loop {
        let mut byte = [0u8; 1];
        let n = acks.read(&mut byte)?;
        if n == 0 {
            return Ok(());
        }
        match byte[0] {
            0x00 => {}
            0x01 => {
                let mut msg = String::new();
                acks.read_line(&mut msg)?;
                tracing::warn!(message = msg.trim_end(), "remote scp reported a warning");
            }
            0x02 => {
                let mut msg = String::new();
                acks.read_line(&mut msg)?;
                return Err(Error::RemoteRejected(msg.trim_end().to_string()));
            }
            other => return Err(Error::MalformedRecord(format!("unexpected ack byte {:#04x}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;
    use std::os::unix::fs::PermissionsExt;

    fn acks(n: usize) -> BufReader<std::io::Cursor<Vec<u8>>> {
        BufReader::new(std::io::Cursor::new(vec![0x00; n]))
    }

    #[test]
    fn single_file_push_produces_expected_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let mut out = Vec::new();
        let mut source = Source::new(&mut out, acks(1), 4096);
        source.send_file(&path, b"out").unwrap();
        assert_eq!(out, b"C0644 6 out\nhello\n\x00");
    }

    #[test]
    fn two_level_tree_push_matches_expected_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir(&src).unwrap();
        std::fs::set_permissions(&src, std::fs::Permissions::from_mode(0o755)).unwrap();
        let sub = src.join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::set_permissions(&sub, std::fs::Permissions::from_mode(0o700)).unwrap();
        std::fs::write(sub.join("x"), b"abc").unwrap();
        std::fs::set_permissions(sub.join("x"), std::fs::Permissions::from_mode(0o600)).unwrap();

        let mut out = Vec::new();
        let mut source = Source::new(&mut out, acks(4), 4096);
        source.send_tree(&src).unwrap();
        assert_eq!(out, b"D0755 0 src\nD0700 0 sub\nC0600 3 x\nabc\x00E\nE\n");
    }

    #[test]
    fn fatal_ack_aborts_with_remote_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hi").unwrap();
        let mut ack_stream = Vec::new();
        ack_stream.push(0x02);
        ack_stream.extend_from_slice(b"no space left\n");
        let mut out = Vec::new();
        let mut source = Source::new(&mut out, BufReader::new(std::io::Cursor::new(ack_stream)), 4096);
        let err = source.send_file(&path, b"a.txt").unwrap_err();
        assert!(matches!(err, Error::RemoteRejected(msg) if msg == "no space left"));
    }

    #[test]
    fn replay_raw_writes_the_buffer_verbatim_and_drains_acks() {
        let raw = b"C0644 3 x\nabc\x00".to_vec();
        let mut out = Vec::new();
        let mut acks = acks(1);
        replay_raw(&mut out, &mut acks, &raw).unwrap();
        assert_eq!(out, raw);
    }

    #[test]
    fn replay_raw_surfaces_a_fatal_ack() {
        let raw = b"C0644 3 x\nabc\x00".to_vec();
        let mut out = Vec::new();
        let mut acks = BufReader::new(std::io::Cursor::new(b"\x02disk full\n".to_vec()));
        let err = replay_raw(&mut out, &mut acks, &raw).unwrap_err();
        assert!(matches!(err, Error::RemoteRejected(msg) if msg == "disk full"));
    }
}
