//! Driving the external pack writer over the negotiated transport framing.

use crate::error::Result;
use crate::store::{ObjectDatabase, PackRequest, PackWriter};
use hull_serve_core::pktline::{BandWriter, Channel, PacketWriter};
use hull_serve_core::progress::ProgressSink;
use std::io::Write;
use tracing::debug;

/// Pack output multiplexed on the side-band: data on channel 1, progress on
/// channel 2 unless suppressed.
pub struct SidebandOutput<'a, W: Write> {
    band: BandWriter<'a, W>,
    no_progress: bool,
}

impl<'a, W: Write> SidebandOutput<'a, W> {
    /// Create a side-band output over `out`.
    pub fn new(out: &'a mut PacketWriter<W>, wide: bool, no_progress: bool) -> Self {
        Self {
            band: BandWriter::new(out, wide),
            no_progress,
        }
    }

    /// Report a fatal condition on channel 3.
    pub fn fatal(&mut self, message: &str) {
        let _ = self.band.write_band(Channel::Error, message.as_bytes());
    }

    /// Terminate the multiplexed stream with a flush frame.
    pub fn finish(self) -> Result<()> {
        self.band.finish()?;
        Ok(())
    }
}

impl<W: Write> Write for SidebandOutput<'_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.band.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.band.flush()
    }
}

impl<W: Write> ProgressSink for SidebandOutput<'_, W> {
    fn info(&mut self, message: &str) {
        if self.no_progress {
            return;
        }
        let mut line = message.as_bytes().to_vec();
        if !line.ends_with(b"\n") {
            line.push(b'\n');
        }
        let _ = self.band.write_band(Channel::Progress, &line);
    }
}

/// Unframed pack output for the stateful dialect without side-band. The wire
/// has no channel for progress, so messages go to the session's out-of-band
/// sink if one was provided and are dropped otherwise.
pub struct RawOutput<'a, 'b, W: Write> {
    inner: &'a mut W,
    messages: Option<&'b mut dyn ProgressSink>,
}

impl<'a, 'b, W: Write> RawOutput<'a, 'b, W> {
    /// Create a raw output over the transport stream.
    pub fn new(inner: &'a mut W, messages: Option<&'b mut dyn ProgressSink>) -> Self {
        Self { inner, messages }
    }
}

impl<W: Write> Write for RawOutput<'_, '_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> ProgressSink for RawOutput<'_, '_, W> {
    fn info(&mut self, message: &str) {
        if let Some(messages) = self.messages.as_deref_mut() {
            messages.info(message);
        }
    }
}

/// An in-memory pack output collecting bytes and progress, for tests and
/// embedders that post-process the pack.
#[derive(Default)]
pub struct BufferedOutput {
    /// The pack bytes.
    pub bytes: Vec<u8>,
    /// Progress messages in emission order.
    pub progress: Vec<String>,
}

impl Write for BufferedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl ProgressSink for BufferedOutput {
    fn info(&mut self, message: &str) {
        self.progress.push(message.to_string());
    }
}

/// Stream the pack on the side-band and close the multiplexed stream.
///
/// A writer failure is reported on channel 3 before the error propagates;
/// the partial pack is the transport's to discard.
pub(crate) fn send_pack_sideband<W: Write>(
    out: &mut PacketWriter<W>,
    wide: bool,
    no_progress: bool,
    store: &dyn ObjectDatabase,
    writer: &mut dyn PackWriter,
    request: &PackRequest<'_>,
) -> Result<u64> {
    let mut output = SidebandOutput::new(out, wide, no_progress);
    match writer.write_pack(store, request, &mut output) {
        Ok(written) => {
            output.finish()?;
            out.flush()?;
            debug!(pack_bytes = written, "pack streamed on side-band");
            Ok(written)
        }
        Err(error) => {
            output.fatal(&error.to_string());
            drop(output);
            let _ = out.flush();
            Err(error)
        }
    }
}

/// Stream the pack as raw bytes after the negotiation frames.
pub(crate) fn send_pack_raw<W: Write>(
    out: &mut PacketWriter<W>,
    store: &dyn ObjectDatabase,
    writer: &mut dyn PackWriter,
    request: &PackRequest<'_>,
    messages: Option<&mut dyn ProgressSink>,
) -> Result<u64> {
    let written = {
        let mut output = RawOutput::new(out.inner_mut(), messages);
        writer.write_pack(store, request, &mut output)?
    };
    out.flush()?;
    debug!(pack_bytes = written, "pack streamed raw");
    Ok(written)
}
