//! IO fakes for exercising the codec and engines without a real SSH session.

use std::io::{Read, Write};

/// Wraps a byte source and returns it to callers in small, uneven chunks
/// instead of all at once, to exercise callers that assume a single `read`
/// call fills the buffer.
pub struct PartialReader {
    data: std::io::Cursor<Vec<u8>>,
    chunk: usize,
}

impl PartialReader {
    pub fn new(data: Vec<u8>, chunk: usize) -> Self {
        Self { data: std::io::Cursor::new(data), chunk: chunk.max(1) }
    }
}

impl Read for PartialReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let want = buf.len().min(self.chunk);
        self.data.read(&mut buf[..want])
    }
}

/// A writer that accepts up to `limit` bytes total, then fails every
/// subsequent write with `ErrorKind::WriteZero` — stands in for a remote
/// that vanishes mid-transfer (a full disk, a dropped connection).
pub struct FailingWriter {
    pub written: Vec<u8>,
    limit: usize,
}

impl FailingWriter {
    pub fn new(limit: usize) -> Self {
        Self { written: Vec::new(), limit }
    }
}

impl Write for FailingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.written.len() >= self.limit {
            return Err(std::io::Error::new(std::io::ErrorKind::WriteZero, "fake remote hung up"));
        }
        let room = self.limit - self.written.len();
        let take = buf.len().min(room);
        self.written.extend_from_slice(&buf[..take]);
        if take < buf.len() {
            return Err(std::io::Error::new(std::io::ErrorKind::WriteZero, "fake remote hung up"));
        }
        Ok(take)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    #[test]
    fn partial_reader_never_returns_more_than_chunk_size() {
        let mut r = PartialReader::new(b"hello world".to_vec(), 3);
        let mut buf = [0u8; 8];
        let n = r.read(&mut buf).unwrap();
        assert_eq!(n, 3);
        assert_eq!(&buf[..3], b"hel");
    }

    #[test]
    fn failing_writer_errors_once_limit_is_reached() {
        let mut w = FailingWriter::new(4);
        assert_eq!(w.write(b"ab").unwrap(), 2);
        assert!(w.write(b"abcd").is_err());
    }
}
