//! Progress reporting sinks for the pack-writing phase.

use crate::pktline::{BandWriter, Channel};
use std::io::Write;

/// A minimal sink for human-readable progress messages.
pub trait ProgressSink {
    /// Emit one progress message; a trailing newline is supplied by the sink
    /// if the transport needs one.
    fn info(&mut self, message: &str);
}

/// A sink that discards all progress.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn info(&mut self, _message: &str) {}
}

/// A sink that writes progress onto side-band channel 2.
pub struct SidebandProgress<'a, 'w, W: Write> {
    band: &'a mut BandWriter<'w, W>,
}

impl<'a, 'w, W: Write> SidebandProgress<'a, 'w, W> {
    /// Create a progress sink over an existing band writer.
    pub fn new(band: &'a mut BandWriter<'w, W>) -> Self {
        Self { band }
    }
}

impl<W: Write> ProgressSink for SidebandProgress<'_, '_, W> {
    fn info(&mut self, message: &str) {
        let mut line = message.as_bytes().to_vec();
        if !line.ends_with(b"\n") {
            line.push(b'\n');
        }
        let _ = self.band.write_band(Channel::Progress, &line);
    }
}
