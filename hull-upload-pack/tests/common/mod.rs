#![allow(dead_code)]

use gix_hash::ObjectId;
use hull_serve_core::pktline::{Packet, PacketReader, PacketWriter};
use hull_upload_pack::store::memory::{parse_stream_pack, MemoryRefs, MemoryStore};
use hull_upload_pack::{Kind, Result, UploadPack};
use std::collections::HashSet;

/// One frame of client input.
pub enum Frame<'a> {
    Line(&'a str),
    Delim,
    Flush,
}

pub use Frame::{Delim, Flush};

/// Encode client input frames as a packet stream.
pub fn pkt_input(frames: &[Frame<'_>]) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut writer = PacketWriter::new(&mut buf);
    for frame in frames {
        match frame {
            Frame::Line(line) => writer.text(*line).unwrap(),
            Frame::Delim => writer.delim().unwrap(),
            Frame::Flush => writer.flush_pkt().unwrap(),
        }
    }
    buf
}

/// Run one V2 session and hand back the result with the raw response bytes.
pub fn upload_v2(
    server: &mut UploadPack<MemoryStore, MemoryRefs>,
    frames: &[Frame<'_>],
) -> (Result<()>, Vec<u8>) {
    server.set_extra_parameters(vec!["version=2".to_string()]);
    let input = pkt_input(frames);
    let mut output = Vec::new();
    let result = server.upload(input.as_slice(), &mut output);
    (result, output)
}

/// Run one V0 session.
pub fn upload_v0(
    server: &mut UploadPack<MemoryStore, MemoryRefs>,
    frames: &[Frame<'_>],
) -> (Result<()>, Vec<u8>) {
    let input = pkt_input(frames);
    let mut output = Vec::new();
    let result = server.upload(input.as_slice(), &mut output);
    (result, output)
}

/// A parsed server response, consumed packet by packet. Anything after the
/// framed prefix (the raw pack of a no-side-band session) lands in
/// `trailing`.
pub struct Response {
    packets: Vec<Packet>,
    at: usize,
    pub trailing: Vec<u8>,
}

impl Response {
    pub fn parse(bytes: &[u8]) -> Self {
        let mut packets = Vec::new();
        let mut pos = 0;
        while bytes.len() - pos >= 4 && bytes[pos..pos + 4].iter().all(u8::is_ascii_hexdigit) {
            let mut reader = PacketReader::new(&bytes[pos..]);
            match reader.read_packet().unwrap() {
                Some(packet) => {
                    pos += match &packet {
                        Packet::Data(data) => 4 + data.len(),
                        _ => 4,
                    };
                    packets.push(packet);
                }
                None => break,
            }
        }
        Self {
            packets,
            at: 0,
            trailing: bytes[pos..].to_vec(),
        }
    }

    pub fn next(&mut self) -> Packet {
        let packet = self.packets[self.at].clone();
        self.at += 1;
        packet
    }

    pub fn next_text(&mut self) -> String {
        match self.next() {
            Packet::Data(data) => {
                let text = data.strip_suffix(b"\n").unwrap_or(&data);
                String::from_utf8_lossy(text).into_owned()
            }
            other => panic!("expected a data frame, got {other:?}"),
        }
    }

    pub fn expect_delim(&mut self) {
        assert_eq!(self.next(), Packet::Delimiter);
    }

    pub fn expect_flush(&mut self) {
        assert_eq!(self.next(), Packet::Flush);
    }

    pub fn at_end(&self) -> bool {
        self.at == self.packets.len()
    }

    /// Skip past the capability advertisement, i.e. everything up to and
    /// including the first flush.
    pub fn drain_advertisement(&mut self) {
        loop {
            if matches!(self.next(), Packet::Flush) {
                return;
            }
        }
    }

    /// Consume the side-band multiplexed pack after the `packfile` line.
    /// Returns the decoded objects and the progress messages.
    pub fn read_pack(&mut self) -> (Vec<(ObjectId, Kind, Vec<u8>)>, Vec<String>) {
        let mut pack = Vec::new();
        let mut progress = Vec::new();
        loop {
            match self.next() {
                Packet::Flush => break,
                Packet::Data(data) => match data[0] {
                    1 => pack.extend_from_slice(&data[1..]),
                    2 => progress.push(String::from_utf8_lossy(&data[1..]).into_owned()),
                    3 => panic!(
                        "fatal on side-band: {}",
                        String::from_utf8_lossy(&data[1..])
                    ),
                    band => panic!("unexpected band {band}"),
                },
                other => panic!("unexpected frame in pack stream: {other:?}"),
            }
        }
        (parse_stream_pack(&pack).unwrap(), progress)
    }

    /// The ids in the multiplexed pack, for membership assertions.
    pub fn pack_ids(&mut self) -> HashSet<ObjectId> {
        self.read_pack().0.into_iter().map(|(id, _, _)| id).collect()
    }
}
