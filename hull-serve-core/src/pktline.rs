//! Packet-line framing for the server side of the wire protocol.
//!
//! Every frame is a 4-byte hexadecimal length prefix followed by the payload.
//! Three lengths are reserved as control frames: `0000` (flush, ends a
//! section), `0001` (delimiter, separates sub-sections of a command) and
//! `0002` (response end).

use bstr::{BStr, BString, ByteSlice};
use std::io::{Read, Write};

/// Largest total frame size on the wire, length prefix included.
pub const MAX_FRAME_LEN: usize = 65520;
/// Largest payload a data frame may carry.
pub const MAX_DATA_LEN: usize = MAX_FRAME_LEN - 4;
/// Largest payload of a side-band-64k frame, band byte excluded.
pub const MAX_BAND_DATA_LEN: usize = MAX_DATA_LEN - 1;
/// Largest payload of a narrow side-band frame, band byte excluded.
pub const SMALL_BAND_DATA_LEN: usize = 999;

/// The result type used throughout this module.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure modes of packet-line framing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying stream failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A length prefix was not four hexadecimal digits, or encoded a length
    /// below the header size.
    #[error("invalid packet length prefix {0:?}")]
    InvalidLength(BString),
    /// An incoming frame claimed more than [`MAX_FRAME_LEN`] bytes, or an
    /// outgoing payload would not fit into one frame.
    #[error("packet of {0} bytes exceeds the protocol maximum")]
    Oversized(usize),
}

/// One frame read from or written to the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// `0000`, terminating a section.
    Flush,
    /// `0001`, separating sub-sections within one command.
    Delimiter,
    /// `0002`, terminating an entire response.
    ResponseEnd,
    /// A payload-bearing frame.
    Data(BString),
}

impl Packet {
    /// The payload of a data frame, or `None` for control frames.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Packet::Data(d) => Some(d.as_ref()),
            _ => None,
        }
    }

    /// The payload with a single trailing newline removed, or `None` for
    /// control frames.
    pub fn text(&self) -> Option<&BStr> {
        self.data()
            .map(|d| d.strip_suffix(b"\n").unwrap_or(d).as_bstr())
    }
}

/// Reads packet-lines off a byte stream.
pub struct PacketReader<R> {
    inner: R,
}

impl<R: Read> PacketReader<R> {
    /// Create a new reader over `inner`.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next frame, or `None` on a clean end of stream.
    ///
    /// End of stream in the middle of a frame is an error.
    pub fn read_packet(&mut self) -> Result<Option<Packet>> {
        let mut prefix = [0u8; 4];
        match read_exact_or_eof(&mut self.inner, &mut prefix)? {
            false => return Ok(None),
            true => {}
        }
        let len = parse_prefix(&prefix)?;
        Ok(Some(match len {
            0 => Packet::Flush,
            1 => Packet::Delimiter,
            2 => Packet::ResponseEnd,
            n => {
                let mut payload = vec![0u8; n - 4];
                self.inner.read_exact(&mut payload)?;
                Packet::Data(payload.into())
            }
        }))
    }

    /// Access the wrapped stream, e.g. to read raw bytes after the framed
    /// portion of a conversation.
    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

fn read_exact_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..])? {
            0 if filled == 0 => return Ok(false),
            0 => {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream ended inside a packet",
                )))
            }
            n => filled += n,
        }
    }
    Ok(true)
}

fn parse_prefix(prefix: &[u8; 4]) -> Result<usize> {
    let digits = std::str::from_utf8(prefix)
        .map_err(|_| Error::InvalidLength(prefix.as_bstr().to_owned()))?;
    let len = usize::from_str_radix(digits, 16)
        .map_err(|_| Error::InvalidLength(prefix.as_bstr().to_owned()))?;
    if len == 3 {
        return Err(Error::InvalidLength(prefix.as_bstr().to_owned()));
    }
    if len > MAX_FRAME_LEN {
        return Err(Error::Oversized(len));
    }
    Ok(len)
}

/// Writes packet-lines onto a byte stream.
pub struct PacketWriter<W> {
    inner: W,
}

impl<W: Write> PacketWriter<W> {
    /// Create a new writer over `inner`.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write a data frame carrying `payload` verbatim.
    pub fn data(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_DATA_LEN {
            return Err(Error::Oversized(payload.len() + 4));
        }
        let prefix = format!("{:04x}", payload.len() + 4);
        self.inner.write_all(prefix.as_bytes())?;
        self.inner.write_all(payload)?;
        Ok(())
    }

    /// Write a data frame carrying `line`, appending a newline if missing.
    pub fn text(&mut self, line: impl AsRef<[u8]>) -> Result<()> {
        let line = line.as_ref();
        if line.ends_with(b"\n") {
            self.data(line)
        } else {
            let mut owned = Vec::with_capacity(line.len() + 1);
            owned.extend_from_slice(line);
            owned.push(b'\n');
            self.data(&owned)
        }
    }

    /// Write an `ERR` frame carrying a fatal message for the peer.
    pub fn error(&mut self, message: &str) -> Result<()> {
        self.text(format!("ERR {message}"))
    }

    /// Write a flush (`0000`) frame.
    pub fn flush_pkt(&mut self) -> Result<()> {
        self.inner.write_all(b"0000")?;
        Ok(())
    }

    /// Write a delimiter (`0001`) frame.
    pub fn delim(&mut self) -> Result<()> {
        self.inner.write_all(b"0001")?;
        Ok(())
    }

    /// Write a response-end (`0002`) frame.
    pub fn response_end(&mut self) -> Result<()> {
        self.inner.write_all(b"0002")?;
        Ok(())
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    /// Access the wrapped stream, e.g. to emit raw pack bytes when no
    /// side-band was negotiated.
    pub fn inner_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}

/// Side-band channels multiplexed inside data frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Channel 1: pack data.
    Pack = 1,
    /// Channel 2: human-readable progress.
    Progress = 2,
    /// Channel 3: fatal error text; the stream ends after it.
    Error = 3,
}

/// Multiplexes pack data, progress and errors over one packet stream.
///
/// Payloads larger than the negotiated band width are split across frames.
pub struct BandWriter<'a, W: Write> {
    out: &'a mut PacketWriter<W>,
    limit: usize,
}

impl<'a, W: Write> BandWriter<'a, W> {
    /// Create a band writer; `wide` selects the 64k frame size negotiated by
    /// `side-band-64k`, otherwise the narrow 1000-byte frames are used.
    pub fn new(out: &'a mut PacketWriter<W>, wide: bool) -> Self {
        let limit = if wide {
            MAX_BAND_DATA_LEN
        } else {
            SMALL_BAND_DATA_LEN
        };
        Self { out, limit }
    }

    /// Write `data` on `channel`, splitting across frames as needed.
    pub fn write_band(&mut self, channel: Channel, data: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(self.limit + 1);
        for chunk in data.chunks(self.limit.max(1)) {
            frame.clear();
            frame.push(channel as u8);
            frame.extend_from_slice(chunk);
            self.out.data(&frame)?;
        }
        Ok(())
    }

    /// Terminate the multiplexed stream with a flush frame.
    pub fn finish(self) -> Result<()> {
        self.out.flush_pkt()
    }
}

impl<W: Write> Write for BandWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.write_band(Channel::Pack, buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.out
            .flush()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_frames_round_trip() {
        let mut buf = Vec::new();
        {
            let mut w = PacketWriter::new(&mut buf);
            w.flush_pkt().unwrap();
            w.delim().unwrap();
            w.response_end().unwrap();
        }
        assert_eq!(&buf, b"000000010002");

        let mut r = PacketReader::new(buf.as_slice());
        assert_eq!(r.read_packet().unwrap(), Some(Packet::Flush));
        assert_eq!(r.read_packet().unwrap(), Some(Packet::Delimiter));
        assert_eq!(r.read_packet().unwrap(), Some(Packet::ResponseEnd));
        assert_eq!(r.read_packet().unwrap(), None);
    }

    #[test]
    fn text_appends_newline_once() {
        let mut buf = Vec::new();
        {
            let mut w = PacketWriter::new(&mut buf);
            w.text("version 2").unwrap();
            w.text("done\n").unwrap();
        }
        assert_eq!(&buf, b"000eversion 2\n0009done\n");
    }

    #[test]
    fn reader_rejects_junk_prefix() {
        let mut r = PacketReader::new(&b"zzzz"[..]);
        assert!(matches!(r.read_packet(), Err(Error::InvalidLength(_))));
    }

    #[test]
    fn reader_rejects_length_three() {
        let mut r = PacketReader::new(&b"0003"[..]);
        assert!(matches!(r.read_packet(), Err(Error::InvalidLength(_))));
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut r = PacketReader::new(&b"000ahel"[..]);
        assert!(matches!(r.read_packet(), Err(Error::Io(_))));
    }

    #[test]
    fn band_writer_splits_large_payloads() {
        let mut buf = Vec::new();
        {
            let mut w = PacketWriter::new(&mut buf);
            let mut band = BandWriter::new(&mut w, false);
            band.write_band(Channel::Pack, &vec![7u8; SMALL_BAND_DATA_LEN + 1])
                .unwrap();
        }
        let mut r = PacketReader::new(buf.as_slice());
        let first = r.read_packet().unwrap().unwrap();
        assert_eq!(first.data().unwrap().len(), SMALL_BAND_DATA_LEN + 1);
        assert_eq!(first.data().unwrap()[0], 1);
        let second = r.read_packet().unwrap().unwrap();
        assert_eq!(second.data().unwrap(), [1, 7]);
    }

    #[test]
    fn oversized_data_frame_is_rejected() {
        let mut w = PacketWriter::new(Vec::new());
        let too_big = vec![0u8; MAX_DATA_LEN + 1];
        assert!(matches!(w.data(&too_big), Err(Error::Oversized(_))));
    }
}
