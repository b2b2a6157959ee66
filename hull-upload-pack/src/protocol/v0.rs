//! The stateful dialect: ref advertisement, want collection, interactive
//! negotiation, then the pack.

use crate::error::{Error, Result};
use crate::negotiate::AckRule;
use crate::pack::{send_pack_raw, send_pack_sideband};
use crate::protocol::{require_packet, SessionContext};
use crate::request::{FetchParser, FetchRequest};
use crate::store::PackRequest;
use crate::types::{MultiAckMode, SideBandMode};
use bstr::{BStr, BString, ByteSlice};
use gix_hash::ObjectId;
use hull_serve_core::capabilities::CapabilitySet;
use hull_serve_core::pktline::{Packet, PacketReader, PacketWriter};
use std::io::{Read, Write};
use tracing::debug;

/// Serve one stateful session.
pub(crate) fn serve<R: Read, W: Write>(
    ctx: &mut SessionContext<'_, '_>,
    reader: &mut PacketReader<R>,
    out: &mut PacketWriter<W>,
    version_banner: bool,
) -> Result<()> {
    if version_banner {
        out.text("version 1")?;
    }
    advertise_refs(ctx, out)?;
    if ctx.options.advertise_refs_only {
        return Ok(());
    }

    let mut req = FetchRequest::default();
    if !read_want_phase(ctx, reader, &mut req)? {
        // The client hung up or flushed without wants; nothing to serve.
        return Ok(());
    }
    ctx.note_agent(&req.agent);
    ctx.validate_wants(&req)?;
    debug!(wants = req.wants.len(), "stateful want phase complete");

    // The shallow exchange answers a deepen request before negotiation.
    if !req.deepen.is_none() {
        let plan = ctx.shallow_plan(&req)?;
        for id in &plan.new_shallows {
            out.text(format!("shallow {id}"))?;
        }
        for id in &plan.unshallows {
            out.text(format!("unshallow {id}"))?;
        }
        out.flush_pkt()?;
        out.flush()?;
    }

    let mut negotiator = ctx.negotiator(&req);
    negotiate(reader, out, &mut req, &mut negotiator)?;

    let closure = negotiator.common_commit_closure()?;
    let (_, enumeration) = ctx.plan_fetch(&req, &closure)?;

    let request = PackRequest {
        objects: &enumeration.objects,
        bases: &enumeration.bases,
        thin_pack: req.thin_pack,
        ofs_delta: req.ofs_delta,
    };
    ctx.stats.pack_bytes = match req.side_band {
        SideBandMode::None => {
            let messages = ctx.messages.take();
            send_pack_raw(out, ctx.store, ctx.pack_writer, &request, messages)?
        }
        mode => send_pack_sideband(
            out,
            mode.is_wide(),
            req.no_progress,
            ctx.store,
            ctx.pack_writer,
            &request,
        )?,
    };
    Ok(())
}

/// Advertise the visible refs. The first line carries the capability list
/// after a NUL; annotated tags repeat as peeled `^{}` lines; a repository
/// with nothing to show advertises capabilities alone.
fn advertise_refs<W: Write>(ctx: &mut SessionContext<'_, '_>, out: &mut PacketWriter<W>) -> Result<()> {
    let caps = capability_list(ctx);
    if ctx.advertised.is_empty() {
        let null = ObjectId::null(gix_hash::Kind::Sha1);
        out.text(format!("{null} capabilities^{{}}\0{caps}"))?;
    } else {
        for (index, reference) in ctx.advertised.iter().enumerate() {
            if index == 0 {
                out.text(format!("{} {}\0{caps}", reference.target, reference.name))?;
            } else {
                out.text(format!("{} {}", reference.target, reference.name))?;
            }
        }
        for reference in &ctx.advertised {
            if let Some(peeled) = reference.peeled {
                out.text(format!("{peeled} {}^{{}}", reference.name))?;
            }
        }
    }
    out.flush_pkt()?;
    out.flush()?;
    Ok(())
}

fn capability_list(ctx: &SessionContext<'_, '_>) -> String {
    let mut caps = vec![
        "multi_ack",
        "multi_ack_detailed",
        "thin-pack",
        "side-band",
        "side-band-64k",
        "ofs-delta",
        "shallow",
        "deepen-since",
        "deepen-not",
        "no-progress",
        "include-tag",
    ];
    if ctx.options.allow_filter {
        caps.push("filter");
    }
    if ctx.options.allow_tip_sha1_in_want {
        caps.push("allow-tip-sha1-in-want");
    }
    if ctx.options.allow_reachable_sha1_in_want {
        caps.push("allow-reachable-sha1-in-want");
    }
    if ctx.options.allow_any_sha1_in_want {
        caps.push("allow-any-sha1-in-want");
    }
    let mut list = caps.join(" ");
    list.push_str(&format!(" agent={}", ctx.options.agent));
    list
}

/// Read the want phase up to its flush. Returns `false` when the client went
/// away or sent no wants, which ends the session cleanly.
fn read_want_phase<R: Read>(
    ctx: &SessionContext<'_, '_>,
    reader: &mut PacketReader<R>,
    req: &mut FetchRequest,
) -> Result<bool> {
    let parser = FetchParser::new(ctx.options, &ctx.advertised);
    let mut first_want = true;
    loop {
        let packet = match reader.read_packet()? {
            None => return Ok(false),
            Some(packet) => packet,
        };
        match packet {
            Packet::Flush => break,
            Packet::Delimiter | Packet::ResponseEnd => {
                return Err(Error::protocol("unexpected delimiter in want phase"))
            }
            packet => {
                let Some(line) = packet.text() else { continue };
                if first_want {
                    if let Some(rest) = line.strip_prefix(b"want ") {
                        first_want = false;
                        parse_first_want(req, rest.as_bstr())?;
                        continue;
                    }
                }
                parser.parse_line(req, line)?;
            }
        }
    }
    Ok(!req.wants.is_empty())
}

/// The first want line carries the capability list after the object id.
fn parse_first_want(req: &mut FetchRequest, rest: &BStr) -> Result<()> {
    let (oid_part, caps_part) = match rest.find_byte(b' ') {
        Some(at) => (&rest[..at], Some(rest[at + 1..].as_bstr())),
        None => (&rest[..], None),
    };
    req.add_want(crate::request::parse_oid(oid_part.as_bstr())?);
    let Some(caps_part) = caps_part else {
        return Ok(());
    };
    let caps = CapabilitySet::from_line(caps_part);
    req.thin_pack = caps.contains("thin-pack");
    req.ofs_delta = caps.contains("ofs-delta");
    req.include_tag = caps.contains("include-tag");
    req.no_progress = caps.contains("no-progress");
    req.side_band = if caps.contains("side-band-64k") {
        SideBandMode::Wide
    } else if caps.contains("side-band") {
        SideBandMode::Basic
    } else {
        SideBandMode::None
    };
    req.multi_ack = if caps.contains("multi_ack_detailed") {
        MultiAckMode::MultiAckDetailed
    } else if caps.contains("multi_ack") {
        MultiAckMode::MultiAck
    } else {
        MultiAckMode::None
    };
    if let Some(agent) = caps.value("agent") {
        req.agent = Some(BString::from(agent));
    }
    Ok(())
}

/// Alternate `have` batches with acknowledgments until `done`.
fn negotiate<R: Read, W: Write>(
    reader: &mut PacketReader<R>,
    out: &mut PacketWriter<W>,
    req: &mut FetchRequest,
    negotiator: &mut crate::negotiate::Negotiator<'_>,
) -> Result<()> {
    let mut sent_plain_ack = false;
    let mut sent_ready = false;
    let mut acked_in_round = false;
    loop {
        match require_packet(reader)? {
            Packet::Flush => {
                // End of one have batch; without news the server keeps the
                // client going with a NAK.
                if !acked_in_round {
                    out.text("NAK")?;
                    out.flush()?;
                }
                acked_in_round = false;
            }
            Packet::Delimiter | Packet::ResponseEnd => {
                return Err(Error::protocol("unexpected delimiter in negotiation"))
            }
            packet => {
                let Some(line) = packet.text() else { continue };
                if line == "done" {
                    req.done = true;
                    break;
                }
                let Some(rest) = line.strip_prefix(b"have ") else {
                    return Err(Error::protocol(format!("unexpected {line}")));
                };
                let oid = crate::request::parse_oid(rest.as_bstr())?;
                if !req.haves.contains(&oid) {
                    req.haves.push(oid);
                }
                if !negotiator.record_have(oid, AckRule::WantAncestry)? {
                    continue;
                }
                match req.multi_ack {
                    MultiAckMode::None => {
                        if !sent_plain_ack {
                            out.text(format!("ACK {oid}"))?;
                            sent_plain_ack = true;
                            acked_in_round = true;
                        }
                    }
                    MultiAckMode::MultiAck => {
                        out.text(format!("ACK {oid} continue"))?;
                        acked_in_round = true;
                    }
                    MultiAckMode::MultiAckDetailed => {
                        if !sent_ready && negotiator.is_ready()? {
                            out.text(format!("ACK {oid} ready"))?;
                            sent_ready = true;
                        } else {
                            out.text(format!("ACK {oid} common"))?;
                        }
                        acked_in_round = true;
                    }
                }
            }
        }
    }

    match negotiator.common().last() {
        None => out.text("NAK")?,
        // In plain mode the one permitted ACK may already be out.
        Some(last) if !sent_plain_ack => out.text(format!("ACK {last}"))?,
        Some(_) => {}
    }
    out.flush()?;
    Ok(())
}
