//! The stateless command dialect: capability advertisement, `ls-refs` and
//! `fetch`.

use crate::error::{Error, Result};
use crate::negotiate::AckRule;
use crate::pack::send_pack_sideband;
use crate::protocol::{require_packet, SessionContext};
use crate::request::{CapabilitiesRequest, FetchParser, FetchRequest, LsRefsRequest};
use crate::store::PackRequest;
use bstr::{BStr, BString, ByteSlice};
use hull_serve_core::pktline::{Packet, PacketReader, PacketWriter};
use std::io::{Read, Write};
use tracing::debug;

/// Serve one stateless-command session: advertisement, then commands until
/// the client goes away.
pub(crate) fn serve<R: Read, W: Write>(
    ctx: &mut SessionContext<'_, '_>,
    reader: &mut PacketReader<R>,
    out: &mut PacketWriter<W>,
) -> Result<()> {
    advertise_capabilities(ctx, out)?;
    if ctx.options.advertise_refs_only {
        return Ok(());
    }
    loop {
        let line = match reader.read_packet()? {
            None => return Ok(()),
            Some(Packet::Flush) => continue,
            Some(Packet::ResponseEnd) => return Ok(()),
            Some(Packet::Delimiter) => {
                return Err(Error::protocol("unexpected delimiter before a command"))
            }
            Some(packet) => match packet.text() {
                Some(text) => text.to_owned(),
                None => continue,
            },
        };
        let command = line
            .strip_prefix(b"command=")
            .ok_or_else(|| Error::protocol(format!("unexpected {line}")))?;
        if command == b"ls-refs" {
            ls_refs(ctx, reader, out)?;
        } else if command == b"fetch" {
            fetch(ctx, reader, out)?;
        } else {
            return Err(Error::protocol(format!(
                "unexpected command {}",
                command.as_bstr()
            )));
        }
    }
}

/// Write the capability advertisement: the version banner, one line per
/// command, then flush.
fn advertise_capabilities<W: Write>(
    ctx: &mut SessionContext<'_, '_>,
    out: &mut PacketWriter<W>,
) -> Result<()> {
    ctx.hooks.on_capabilities(&CapabilitiesRequest::default())?;
    out.text("version 2")?;
    out.text("ls-refs")?;
    let mut features = Vec::new();
    if ctx.options.allow_filter {
        features.push("filter");
    }
    if ctx.options.allow_ref_in_want && ctx.options.advertise_ref_in_want {
        features.push("ref-in-want");
    }
    features.push("shallow");
    out.text(format!("fetch={}", features.join(" ")))?;
    out.text("server-option")?;
    out.flush_pkt()?;
    out.flush()?;
    Ok(())
}

/// Handle one `ls-refs` command.
fn ls_refs<R: Read, W: Write>(
    ctx: &mut SessionContext<'_, '_>,
    reader: &mut PacketReader<R>,
    out: &mut PacketWriter<W>,
) -> Result<()> {
    let mut req = LsRefsRequest::default();

    // Capability declarations come before the delimiter, arguments after; a
    // flush without delimiter means an argument-less command.
    let mut in_args = false;
    loop {
        match require_packet(reader)? {
            Packet::Flush => break,
            Packet::Delimiter => in_args = true,
            Packet::ResponseEnd => return Err(Error::protocol("unexpected response end")),
            packet => {
                let line = packet
                    .text()
                    .map(|t| t.to_owned())
                    .unwrap_or_default();
                parse_ls_refs_line(&mut req, line.as_ref(), in_args)?;
            }
        }
    }
    ctx.note_agent(&req.agent);
    ctx.hooks.on_ls_refs(&req)?;
    debug!(prefixes = req.ref_prefixes.len(), "serving ls-refs");

    for reference in &ctx.advertised {
        if !req.matches(reference.name.as_ref()) {
            continue;
        }
        let mut line = format!("{} {}", reference.target, reference.name);
        if req.symrefs {
            if let Some(symref) = ctx
                .snapshot
                .symrefs
                .iter()
                .find(|s| s.name == reference.name)
            {
                line.push_str(&format!(" symref-target:{}", symref.target));
            }
        }
        if req.peel {
            if let Some(peeled) = reference.peeled {
                line.push_str(&format!(" peeled:{peeled}"));
            }
        }
        out.text(line)?;
    }
    out.flush_pkt()?;
    out.flush()?;
    Ok(())
}

fn parse_ls_refs_line(req: &mut LsRefsRequest, line: &BStr, in_args: bool) -> Result<()> {
    if !in_args {
        if let Some(rest) = line.strip_prefix(b"server-option=") {
            req.server_options.push(BString::from(rest));
            return Ok(());
        }
        if let Some(rest) = line.strip_prefix(b"agent=") {
            req.agent = Some(BString::from(rest));
            return Ok(());
        }
    }
    if line == "symrefs" {
        req.symrefs = true;
    } else if line == "peel" {
        req.peel = true;
    } else if let Some(prefix) = line.strip_prefix(b"ref-prefix ") {
        req.ref_prefixes.push(BString::from(prefix));
    } else {
        return Err(Error::protocol(format!("unexpected {line}")));
    }
    Ok(())
}

/// Handle one `fetch` command: parse, negotiate, then emit the response
/// sections in their fixed order.
fn fetch<R: Read, W: Write>(
    ctx: &mut SessionContext<'_, '_>,
    reader: &mut PacketReader<R>,
    out: &mut PacketWriter<W>,
) -> Result<()> {
    let mut req = FetchRequest::default();
    {
        let parser = FetchParser::new(ctx.options, &ctx.advertised);
        loop {
            match require_packet(reader)? {
                Packet::Flush => break,
                Packet::Delimiter => continue,
                Packet::ResponseEnd => {
                    return Err(Error::protocol("unexpected response end"))
                }
                packet => {
                    if let Some(line) = packet.text() {
                        parser.parse_line(&mut req, line)?;
                    }
                }
            }
        }
    }
    ctx.note_agent(&req.agent);
    ctx.hooks.on_fetch(&req)?;
    req.validate()?;
    ctx.validate_wants(&req)?;
    debug!(
        wants = req.wants.len(),
        want_refs = req.want_refs.len(),
        haves = req.haves.len(),
        done = req.done,
        "serving fetch"
    );

    let mut negotiator = ctx.negotiator(&req);
    let mut acks = Vec::new();
    for have in &req.haves {
        if negotiator.record_have(*have, AckRule::Possession)? {
            acks.push(*have);
        }
    }

    if !req.done {
        let ready = negotiator.is_ready()?;
        out.text("acknowledgments")?;
        if acks.is_empty() {
            out.text("NAK")?;
        } else {
            for ack in &acks {
                out.text(format!("ACK {ack}"))?;
            }
        }
        if !ready {
            // A negotiation round with no complete answer yet: nothing but
            // acknowledgments may be sent.
            out.flush_pkt()?;
            out.flush()?;
            return Ok(());
        }
        out.text("ready")?;
        out.delim()?;
    }

    let closure = negotiator.common_commit_closure()?;
    let (plan, enumeration) = ctx.plan_fetch(&req, &closure)?;

    if !req.deepen.is_none() {
        out.text("shallow-info")?;
        for id in &plan.new_shallows {
            out.text(format!("shallow {id}"))?;
        }
        for id in &plan.unshallows {
            out.text(format!("unshallow {id}"))?;
        }
        out.delim()?;
    }

    if !req.want_refs.is_empty() {
        out.text("wanted-refs")?;
        for reference in &req.want_refs {
            out.text(format!("{} {}", reference.target, reference.name))?;
        }
        out.delim()?;
    }

    out.text("packfile")?;
    let request = PackRequest {
        objects: &enumeration.objects,
        bases: &enumeration.bases,
        thin_pack: req.thin_pack,
        ofs_delta: req.ofs_delta,
    };
    ctx.stats.pack_bytes = send_pack_sideband(
        out,
        true,
        req.no_progress,
        ctx.store,
        ctx.pack_writer,
        &request,
    )?;
    Ok(())
}
