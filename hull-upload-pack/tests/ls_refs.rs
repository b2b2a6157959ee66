mod common;

use common::{upload_v2, Delim, Flush, Frame::Line, Response};
use hull_upload_pack::store::memory::{MemoryRefs, MemoryStore};
use hull_upload_pack::{
    LsRefsRequest, ProtocolHooks, Result, ServerOptions, UploadPack,
};
use std::cell::RefCell;
use std::rc::Rc;

struct Fixture {
    server: UploadPack<MemoryStore, MemoryRefs>,
    tip: gix_hash::ObjectId,
    tag: gix_hash::ObjectId,
}

fn fixture() -> Fixture {
    let mut store = MemoryStore::new();
    let tip = store.commit(&[], 1_000);
    let tag = store.tag("tag", tip);
    let mut refs = MemoryRefs::new();
    refs.update("master", tip);
    refs.update("refs/tags/tag", tag);
    refs.symref("HEAD", "refs/heads/master");
    Fixture {
        server: UploadPack::new(store, refs, ServerOptions::default()),
        tip,
        tag,
    }
}

#[test]
fn lists_head_then_sorted_refs() {
    let Fixture { mut server, tip, tag } = fixture();
    let (result, output) = upload_v2(&mut server, &[Line("command=ls-refs"), Flush]);
    result.unwrap();

    let mut response = Response::parse(&output);
    response.drain_advertisement();
    assert_eq!(response.next_text(), format!("{tip} HEAD"));
    assert_eq!(response.next_text(), format!("{tip} refs/heads/master"));
    assert_eq!(response.next_text(), format!("{tag} refs/tags/tag"));
    response.expect_flush();
}

#[test]
fn symrefs_argument_reports_link_targets() {
    let Fixture { mut server, tip, tag } = fixture();
    let (result, output) = upload_v2(
        &mut server,
        &[Line("command=ls-refs"), Delim, Line("symrefs"), Flush],
    );
    result.unwrap();

    let mut response = Response::parse(&output);
    response.drain_advertisement();
    assert_eq!(
        response.next_text(),
        format!("{tip} HEAD symref-target:refs/heads/master")
    );
    assert_eq!(response.next_text(), format!("{tip} refs/heads/master"));
    assert_eq!(response.next_text(), format!("{tag} refs/tags/tag"));
    response.expect_flush();
}

#[test]
fn peel_argument_reports_tag_targets() {
    let Fixture { mut server, tip, tag } = fixture();
    let (result, output) = upload_v2(
        &mut server,
        &[Line("command=ls-refs"), Delim, Line("peel"), Flush],
    );
    result.unwrap();

    let mut response = Response::parse(&output);
    response.drain_advertisement();
    assert_eq!(response.next_text(), format!("{tip} HEAD"));
    assert_eq!(response.next_text(), format!("{tip} refs/heads/master"));
    assert_eq!(
        response.next_text(),
        format!("{tag} refs/tags/tag peeled:{tip}")
    );
    response.expect_flush();
}

#[test]
fn ref_prefixes_restrict_the_listing() {
    let mut store = MemoryStore::new();
    let tip = store.commit(&[], 1_000);
    let mut refs = MemoryRefs::new();
    refs.update("master", tip);
    refs.update("other", tip);
    refs.update("yetAnother", tip);

    let mut server = UploadPack::new(store, refs, ServerOptions::default());
    let (result, output) = upload_v2(
        &mut server,
        &[
            Line("command=ls-refs"),
            Delim,
            Line("ref-prefix refs/heads/maste"),
            Line("ref-prefix refs/heads/other"),
            Flush,
        ],
    );
    result.unwrap();

    let mut response = Response::parse(&output);
    response.drain_advertisement();
    assert_eq!(response.next_text(), format!("{tip} refs/heads/master"));
    assert_eq!(response.next_text(), format!("{tip} refs/heads/other"));
    response.expect_flush();
}

#[test]
fn two_commands_in_one_session() {
    let Fixture { mut server, tip, tag } = fixture();
    let (result, output) = upload_v2(
        &mut server,
        &[
            Line("command=ls-refs"),
            Delim,
            Line("symrefs"),
            Line("peel"),
            Flush,
            Line("command=ls-refs"),
            Delim,
            Flush,
        ],
    );
    result.unwrap();

    let mut response = Response::parse(&output);
    response.drain_advertisement();
    assert_eq!(
        response.next_text(),
        format!("{tip} HEAD symref-target:refs/heads/master")
    );
    assert_eq!(response.next_text(), format!("{tip} refs/heads/master"));
    assert_eq!(
        response.next_text(),
        format!("{tag} refs/tags/tag peeled:{tip}")
    );
    response.expect_flush();
    assert_eq!(response.next_text(), format!("{tip} HEAD"));
    assert_eq!(response.next_text(), format!("{tip} refs/heads/master"));
    assert_eq!(response.next_text(), format!("{tag} refs/tags/tag"));
    response.expect_flush();
}

#[test]
fn unrecognized_argument_is_a_protocol_error() {
    let Fixture { mut server, .. } = fixture();
    let (result, _) = upload_v2(
        &mut server,
        &[
            Line("command=ls-refs"),
            Delim,
            Line("invalid-argument"),
            Flush,
        ],
    );
    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "unexpected invalid-argument");
}

#[derive(Default)]
struct CapturedLsRefs(Rc<RefCell<Option<LsRefsRequest>>>);

impl ProtocolHooks for CapturedLsRefs {
    fn on_ls_refs(&mut self, request: &LsRefsRequest) -> Result<()> {
        *self.0.borrow_mut() = Some(request.clone());
        Ok(())
    }
}

#[test]
fn server_options_reach_the_hook() {
    let Fixture { mut server, .. } = fixture();
    let captured = Rc::new(RefCell::new(None));
    server.set_hooks(CapturedLsRefs(Rc::clone(&captured)));

    let (result, _) = upload_v2(
        &mut server,
        &[
            Line("command=ls-refs"),
            Line("server-option=one"),
            Line("server-option=two"),
            Delim,
            Flush,
        ],
    );
    result.unwrap();

    let captured = captured.borrow();
    let request = captured.as_ref().expect("hook observed the request");
    assert_eq!(request.server_options.len(), 2);
    assert_eq!(request.server_options[0], "one");
    assert_eq!(request.server_options[1], "two");
}
