//! The SCP wire-format codec: parsing and emitting `C`/`D`/`E`/`T` records.
//!
//! Pure over byte streams — no filesystem or session knowledge lives here.
//! Both the Sink Engine and the Source Engine call through this module as
//! the single source of truth for the wire format (spec §4.B, §9).

use crate::error::{Error, Result};
use std::io::{BufRead, Read, Write};

/// A parsed record header. `File`'s payload is read separately via
/// [`read_file_payload`] once the caller is ready to stream it — the codec
/// never buffers a whole file in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    File { mode: u32, size: u64, name: Vec<u8> },
    Dir { mode: u32, name: Vec<u8> },
    EndDir,
    Times { mtime_s: u64, mtime_us: u32, atime_s: u64, atime_us: u32 },
}

fn validate_name(name: &[u8]) -> Result<()> {
    if name.contains(&b'/') || name.contains(&b'\n') {
        return Err(Error::NameContainsSeparator(String::from_utf8_lossy(name).into_owned()));
    }
    Ok(())
}

fn octal4(mode: u32) -> String {
    format!("{:04o}", mode & 0o7777)
}

/// Write a `D0755 0 name\n` header. Does not open/track scope state; the
/// Source Engine owns the open-scope stack (spec §3, tree walk frame).
pub fn write_dir_header<W: Write>(w: &mut W, mode: u32, name: &[u8]) -> Result<()> {
    validate_name(name)?;
    write!(w, "D{} 0 ", octal4(mode))?;
    w.write_all(name)?;
    w.write_all(b"\n")?;
    Ok(())
}

/// Write an `E\n` record, closing the innermost open directory scope.
pub fn write_end_dir<W: Write>(w: &mut W) -> Result<()> {
    w.write_all(b"E\n")?;
    Ok(())
}

/// Write a `T<mtime_s> <mtime_us> <atime_s> <atime_us>\n` record.
pub fn write_times<W: Write>(
    w: &mut W,
    mtime_s: u64,
    mtime_us: u32,
    atime_s: u64,
    atime_us: u32,
) -> Result<()> {
    writeln!(w, "T{mtime_s} {mtime_us} {atime_s} {atime_us}")?;
    Ok(())
}

/// Write a `C0644 <size> name\n` header. The caller streams the payload and
/// trailing `0x00` separately via [`stream_payload`] — keeping the header
/// write and the payload write as two calls is what lets the Source Engine
/// guarantee "no interleaving between a `File` header and its payload+null"
/// (spec §4.D) while still bounding memory to one buffer's worth at a time.
pub fn write_file_header<W: Write>(w: &mut W, mode: u32, size: u64, name: &[u8]) -> Result<()> {
    validate_name(name)?;
    write!(w, "C{} {} ", octal4(mode), size)?;
    w.write_all(name)?;
    w.write_all(b"\n")?;
    Ok(())
}

/// Stream exactly `size` bytes from `reader` into `writer` in chunks of
/// `buf_size`, then write the single trailing `0x00`. Used by the Source
/// Engine to emit a `File` record's payload without holding the whole file
/// in memory.
pub fn stream_payload<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    size: u64,
    buf_size: usize,
) -> Result<()> {
    let mut buf = vec![0u8; buf_size.max(1)];
    let mut remaining = size;
    while remaining > 0 {
        let want = std::cmp::min(remaining, buf.len() as u64) as usize;
        reader.read_exact(&mut buf[..want])?;
        writer.write_all(&buf[..want])?;
        remaining -= want as u64;
    }
    writer.write_all(&[0u8])?;
    Ok(())
}

/// Read one record from `reader`. Returns `Ok(None)` at a clean end of
/// stream (EOF before any tag byte).
///
/// For `Record::File`, the payload has *not* been consumed yet — the caller
/// must follow up with [`read_file_payload`] before reading the next record.
pub fn read_record<R: BufRead>(reader: &mut R) -> Result<Option<Record>> {
    let mut tag_buf = [0u8; 1];
    match reader.read(&mut tag_buf) {
        Ok(0) => return Ok(None),
        Ok(_) => {}
        Err(e) => return Err(e.into()),
    }
    let tag = tag_buf[0];

    match tag {
        b'E' => {
            let mut nl = [0u8; 1];
            let n = reader.read(&mut nl)?;
            if n != 1 || nl[0] != b'\n' {
                return Err(Error::MalformedRecord("'E' record missing trailing newline".into()));
            }
            Ok(Some(Record::EndDir))
        }
        b'C' | b'D' => {
            // Split on raw bytes, not `&str` — the name field is
            // byte-transparent (spec §4.A/§9): a non-UTF-8 filename is a
            // valid record and must round-trip unchanged.
            let line = read_line_exclusive(reader)?;
            let mut parts = line.splitn(3, |b| *b == b' ');
            let mode_b = parts
                .next()
                .ok_or_else(|| Error::MalformedRecord("missing mode field".into()))?;
            let size_b = parts
                .next()
                .ok_or_else(|| Error::MalformedRecord("missing size field".into()))?;
            let name = parts
                .next()
                .ok_or_else(|| Error::MalformedRecord("missing name field".into()))?
                .to_vec();
            let mode_s = std::str::from_utf8(mode_b)
                .map_err(|_| Error::MalformedRecord(format!("bad octal mode: {mode_b:?}")))?;
            let mode = u32::from_str_radix(mode_s, 8)
                .map_err(|_| Error::MalformedRecord(format!("bad octal mode: {mode_s:?}")))?;
            let size_s = std::str::from_utf8(size_b)
                .map_err(|_| Error::MalformedRecord(format!("bad size field: {size_b:?}")))?;
            let size: u64 = size_s.parse().map_err(|e: std::num::ParseIntError| {
                if *e.kind() == std::num::IntErrorKind::PosOverflow {
                    Error::SizeOverflow(format!("size field {size_s:?} exceeds u64 range"))
                } else {
                    Error::MalformedRecord(format!("bad size field: {size_s:?}"))
                }
            })?;
            validate_name(&name)?;
            if tag == b'C' {
                Ok(Some(Record::File { mode, size, name }))
            } else {
                Ok(Some(Record::Dir { mode, name }))
            }
        }
        b'T' => {
            // `T` records carry no name field, but split on raw bytes too
            // for the same reason: no part of the wire format should demand
            // whole-line UTF-8 validity just to reach the numeric fields.
            let line = read_line_exclusive(reader)?;
            let mut parts = line.splitn(4, |b| *b == b' ');
            let mut next_u64 = || -> Result<u64> {
                let field = parts
                    .next()
                    .ok_or_else(|| Error::MalformedRecord("missing 'T' field".into()))?;
                std::str::from_utf8(field)
                    .map_err(|_| Error::MalformedRecord("non-numeric 'T' field".into()))?
                    .parse()
                    .map_err(|_| Error::MalformedRecord("non-numeric 'T' field".into()))
            };
            let mtime_s = next_u64()?;
            let mtime_us = next_u64()? as u32;
            let atime_s = next_u64()?;
            let atime_us = next_u64()? as u32;
            Ok(Some(Record::Times { mtime_s, mtime_us, atime_s, atime_us }))
        }
        other => Err(Error::MalformedRecord(format!("unknown tag byte {:#04x}", other))),
    }
}

fn read_line_exclusive<R: BufRead>(reader: &mut R) -> Result<Vec<u8>> {
    let mut line = Vec::new();
    let n = reader
        .read_until(b'\n', &mut line)
        .map_err(Error::from)?;
    if n == 0 || line.last() != Some(&b'\n') {
        return Err(Error::MalformedRecord("header line missing terminating newline".into()));
    }
    line.pop();
    Ok(line)
}

/// Consume a `File` record's payload: exactly `size` bytes streamed to
/// `writer`, followed by the trailing `0x00`. A short read or a byte other
/// than `0x00` in the terminator position is [`Error::PayloadFramingError`].
pub fn read_file_payload<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    size: u64,
    buf_size: usize,
) -> Result<()> {
    let mut buf = vec![0u8; buf_size.max(1)];
    let mut remaining = size;
    while remaining > 0 {
        let want = std::cmp::min(remaining, buf.len() as u64) as usize;
        reader.read_exact(&mut buf[..want]).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::PayloadFramingError("premature EOF while reading payload".into())
            } else {
                Error::from(e)
            }
        })?;
        writer.write_all(&buf[..want])?;
        remaining -= want as u64;
    }
    let mut terminator = [0u8; 1];
    reader.read_exact(&mut terminator).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::PayloadFramingError("missing trailing null byte".into())
        } else {
            Error::from(e)
        }
    })?;
    if terminator[0] != 0x00 {
        return Err(Error::PayloadFramingError(format!(
            "expected trailing 0x00, got {:#04x}",
            terminator[0]
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trip_file_record() {
        let mut buf = Vec::new();
        write_file_header(&mut buf, 0o644, 6, b"out").unwrap();
        stream_payload(&mut Cursor::new(b"hello\n".to_vec()), &mut buf, 6, 4096).unwrap();
        assert_eq!(buf, b"C0644 6 out\nhello\n\x00");

        let mut reader = std::io::BufReader::new(Cursor::new(buf));
        let rec = read_record(&mut reader).unwrap().unwrap();
        assert_eq!(rec, Record::File { mode: 0o644, size: 6, name: b"out".to_vec() });
        let mut payload = Vec::new();
        read_file_payload(&mut reader, &mut payload, 6, 4096).unwrap();
        assert_eq!(payload, b"hello\n");
        assert!(read_record(&mut reader).unwrap().is_none());
    }

    #[test]
    fn dir_and_end_dir_round_trip() {
        let mut buf = Vec::new();
        write_dir_header(&mut buf, 0o755, b"src").unwrap();
        write_end_dir(&mut buf).unwrap();
        assert_eq!(buf, b"D0755 0 src\nE\n");

        let mut reader = std::io::BufReader::new(Cursor::new(buf));
        assert_eq!(
            read_record(&mut reader).unwrap().unwrap(),
            Record::Dir { mode: 0o755, name: b"src".to_vec() }
        );
        assert_eq!(read_record(&mut reader).unwrap().unwrap(), Record::EndDir);
    }

    #[test]
    fn times_round_trip() {
        let mut buf = Vec::new();
        write_times(&mut buf, 1000, 500000, 1001, 600000).unwrap();
        assert_eq!(buf, b"T1000 500000 1001 600000\n");
        let mut reader = std::io::BufReader::new(Cursor::new(buf));
        assert_eq!(
            read_record(&mut reader).unwrap().unwrap(),
            Record::Times { mtime_s: 1000, mtime_us: 500000, atime_s: 1001, atime_us: 600000 }
        );
    }

    #[test]
    fn name_with_slash_is_rejected_by_encoder_and_decoder() {
        let mut buf = Vec::new();
        assert!(matches!(
            write_file_header(&mut buf, 0o644, 0, b"a/b"),
            Err(Error::NameContainsSeparator(_))
        ));

        let mut reader = std::io::BufReader::new(Cursor::new(b"C0644 0 a/b\n".to_vec()));
        assert!(matches!(read_record(&mut reader), Err(Error::NameContainsSeparator(_))));
    }

    #[test]
    fn non_utf8_name_round_trips() {
        let name: &[u8] = b"r\xe9sum\xe9";
        let mut buf = Vec::new();
        write_file_header(&mut buf, 0o644, 3, name).unwrap();
        stream_payload(&mut Cursor::new(b"abc".to_vec()), &mut buf, 3, 4096).unwrap();

        let mut reader = std::io::BufReader::new(Cursor::new(buf));
        let rec = read_record(&mut reader).unwrap().unwrap();
        assert_eq!(rec, Record::File { mode: 0o644, size: 3, name: name.to_vec() });
    }

    #[test]
    fn oversized_size_field_is_size_overflow() {
        let mut reader = std::io::BufReader::new(Cursor::new(
            b"C0644 99999999999999999999999999 f\n".to_vec(),
        ));
        assert!(matches!(read_record(&mut reader), Err(Error::SizeOverflow(_))));
    }

    #[test]
    fn unknown_tag_is_malformed() {
        let mut reader = std::io::BufReader::new(Cursor::new(b"X0644 1 f\n".to_vec()));
        assert!(matches!(read_record(&mut reader), Err(Error::MalformedRecord(_))));
    }

    #[test]
    fn truncated_payload_is_framing_error() {
        let mut reader = std::io::BufReader::new(Cursor::new(b"hell".to_vec()));
        let mut out = Vec::new();
        assert!(matches!(
            read_file_payload(&mut reader, &mut out, 5, 4096),
            Err(Error::PayloadFramingError(_))
        ));
    }

    #[test]
    fn wrong_terminator_byte_is_framing_error() {
        let mut reader = std::io::BufReader::new(Cursor::new(b"abc\x01".to_vec()));
        let mut out = Vec::new();
        assert!(matches!(
            read_file_payload(&mut reader, &mut out, 3, 4096),
            Err(Error::PayloadFramingError(_))
        ));
    }

    #[test]
    fn malformed_header_missing_field() {
        let mut reader = std::io::BufReader::new(Cursor::new(b"C0644 5\n".to_vec()));
        assert!(matches!(read_record(&mut reader), Err(Error::MalformedRecord(_))));
    }

    #[test]
    fn end_of_stream_returns_none() {
        let mut reader = std::io::BufReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(read_record(&mut reader).unwrap().is_none());
    }
}
