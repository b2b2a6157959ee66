mod common;

use common::{upload_v2, Delim, Flush, Frame::Line, Response};
use gix_hash::ObjectId;
use hull_upload_pack::store::memory::{MemoryRefs, MemoryStore};
use hull_upload_pack::{ServerOptions, UploadPack};

/// Two branches, each a parent and a child.
struct TwoBranches {
    store: MemoryStore,
    foo_parent: ObjectId,
    foo_child: ObjectId,
    bar_parent: ObjectId,
    bar_child: ObjectId,
}

fn two_branches() -> TwoBranches {
    let mut store = MemoryStore::new();
    let foo_parent = store.commit(&[], 1);
    let foo_child = store.commit(&[foo_parent], 2);
    let bar_parent = store.commit(&[], 3);
    let bar_child = store.commit(&[bar_parent], 4);
    TwoBranches {
        store,
        foo_parent,
        foo_child,
        bar_parent,
        bar_child,
    }
}

fn server_for(two: TwoBranches) -> UploadPack<MemoryStore, MemoryRefs> {
    let mut refs = MemoryRefs::new();
    refs.update("branch1", two.foo_child);
    refs.update("branch2", two.bar_child);
    UploadPack::new(two.store, refs, ServerOptions::default())
}

#[test]
fn server_does_not_stop_negotiation_with_uncovered_wants() {
    let two = two_branches();
    let (foo_child, bar_child, foo_parent) = (two.foo_child, two.bar_child, two.foo_parent);
    let mut server = server_for(two);

    let want_foo = format!("want {foo_child}");
    let want_bar = format!("want {bar_child}");
    let have_foo = format!("have {foo_parent}");
    let (result, output) = upload_v2(
        &mut server,
        &[
            Line("command=fetch"),
            Delim,
            Line(&want_foo),
            Line(&want_bar),
            Line(&have_foo),
            Flush,
        ],
    );
    result.unwrap();

    let mut response = Response::parse(&output);
    response.drain_advertisement();
    assert_eq!(response.next_text(), "acknowledgments");
    assert_eq!(response.next_text(), format!("ACK {foo_parent}"));
    response.expect_flush();
    assert!(response.at_end());
}

#[test]
fn server_stops_negotiation_once_all_wants_are_covered() {
    let two = two_branches();
    let (foo_parent, foo_child, bar_parent, bar_child) =
        (two.foo_parent, two.foo_child, two.bar_parent, two.bar_child);
    let mut server = server_for(two);

    let lines = [
        format!("want {foo_child}"),
        format!("want {bar_child}"),
        format!("have {foo_parent}"),
        format!("have {bar_parent}"),
    ];
    let (result, output) = upload_v2(
        &mut server,
        &[
            Line("command=fetch"),
            Delim,
            Line(&lines[0]),
            Line(&lines[1]),
            Line(&lines[2]),
            Line(&lines[3]),
            Flush,
        ],
    );
    result.unwrap();

    let mut response = Response::parse(&output);
    response.drain_advertisement();
    assert_eq!(response.next_text(), "acknowledgments");
    assert_eq!(response.next_text(), format!("ACK {foo_parent}"));
    assert_eq!(response.next_text(), format!("ACK {bar_parent}"));
    assert_eq!(response.next_text(), "ready");
    response.expect_delim();
    assert_eq!(response.next_text(), "packfile");
    let ids = response.pack_ids();
    assert!(ids.contains(&foo_child));
    assert!(ids.contains(&bar_child));
    assert!(!ids.contains(&foo_parent));
    assert!(!ids.contains(&bar_parent));
}

#[test]
fn client_stops_negotiation_with_done() {
    let two = two_branches();
    let (foo_parent, foo_child, bar_parent, bar_child) =
        (two.foo_parent, two.foo_child, two.bar_parent, two.bar_child);
    let mut server = server_for(two);

    let lines = [
        format!("want {foo_child}"),
        format!("want {bar_child}"),
        format!("have {foo_parent}"),
    ];
    let (result, output) = upload_v2(
        &mut server,
        &[
            Line("command=fetch"),
            Delim,
            Line(&lines[0]),
            Line(&lines[1]),
            Line(&lines[2]),
            Line("done"),
            Flush,
        ],
    );
    result.unwrap();

    let mut response = Response::parse(&output);
    response.drain_advertisement();
    assert_eq!(response.next_text(), "packfile");
    let ids = response.pack_ids();
    assert!(!ids.contains(&foo_parent));
    assert!(ids.contains(&foo_child));
    assert!(ids.contains(&bar_parent));
    assert!(ids.contains(&bar_child));
}

#[test]
fn thin_pack_offers_client_side_bases() {
    let mut store = MemoryStore::new();
    let parent_blob = store.blob("abcdefghijklmnopqrstuvwxyza");
    let parent_tree = store.tree(&[("foo", parent_blob)]);
    let parent = store.commit_with_tree(parent_tree, &[], 1);
    let child_blob = store.blob("abcdefghijklmnopqrstuvwxyzb");
    let child_tree = store.tree(&[("foo", child_blob)]);
    let child = store.commit_with_tree(child_tree, &[parent], 2);

    let mut refs = MemoryRefs::new();
    refs.update("branch1", child);
    let mut server = UploadPack::new(store, refs, ServerOptions::default());

    let lines = [format!("want {child}"), format!("have {parent}")];
    let (result, output) = upload_v2(
        &mut server,
        &[
            Line("command=fetch"),
            Delim,
            Line(&lines[0]),
            Line(&lines[1]),
            Line("thin-pack"),
            Line("done"),
            Flush,
        ],
    );
    result.unwrap();

    let mut response = Response::parse(&output);
    response.drain_advertisement();
    assert_eq!(response.next_text(), "packfile");
    let ids = response.pack_ids();
    assert!(ids.contains(&child));
    assert!(ids.contains(&child_tree));
    assert!(ids.contains(&child_blob));
    assert!(!ids.contains(&parent));
    assert!(!ids.contains(&parent_tree));
    assert!(!ids.contains(&parent_blob));
}

#[test]
fn progress_is_reported_unless_suppressed() {
    let mut store = MemoryStore::new();
    let commit = store.commit(&[], 1);
    let mut refs = MemoryRefs::new();
    refs.update("branch1", commit);
    let mut server = UploadPack::new(store, refs, ServerOptions::default());

    let want = format!("want {commit}");
    let (result, output) = upload_v2(
        &mut server,
        &[
            Line("command=fetch"),
            Delim,
            Line(&want),
            Line("done"),
            Flush,
        ],
    );
    result.unwrap();
    let mut response = Response::parse(&output);
    response.drain_advertisement();
    assert_eq!(response.next_text(), "packfile");
    let (_, progress) = response.read_pack();
    assert!(!progress.is_empty());

    let (result, output) = upload_v2(
        &mut server,
        &[
            Line("command=fetch"),
            Delim,
            Line(&want),
            Line("no-progress"),
            Line("done"),
            Flush,
        ],
    );
    result.unwrap();
    let mut response = Response::parse(&output);
    response.drain_advertisement();
    assert_eq!(response.next_text(), "packfile");
    let (_, progress) = response.read_pack();
    assert!(progress.is_empty());
}

#[test]
fn include_tag_appends_pointing_tags() {
    let mut store = MemoryStore::new();
    let commit = store.commit(&[], 1);
    let tag = store.tag("tag", commit);
    let mut refs = MemoryRefs::new();
    refs.update("branch1", commit);
    refs.update("refs/tags/tag", tag);
    let mut server = UploadPack::new(store, refs, ServerOptions::default());

    let want = format!("want {commit}");
    let (result, output) = upload_v2(
        &mut server,
        &[
            Line("command=fetch"),
            Delim,
            Line(&want),
            Line("done"),
            Flush,
        ],
    );
    result.unwrap();
    let mut response = Response::parse(&output);
    response.drain_advertisement();
    assert_eq!(response.next_text(), "packfile");
    assert!(!response.pack_ids().contains(&tag));

    let (result, output) = upload_v2(
        &mut server,
        &[
            Line("command=fetch"),
            Delim,
            Line(&want),
            Line("include-tag"),
            Line("done"),
            Flush,
        ],
    );
    result.unwrap();
    let mut response = Response::parse(&output);
    response.drain_advertisement();
    assert_eq!(response.next_text(), "packfile");
    assert!(response.pack_ids().contains(&tag));
}

#[test]
fn declared_shallow_reopens_history_behind_a_have() {
    let mut store = MemoryStore::new();
    let common_parent = store.commit(&[], 1);
    let foo_child = store.commit(&[common_parent], 2);
    let bar_child = store.commit(&[common_parent], 3);
    let mut refs = MemoryRefs::new();
    refs.update("branch1", bar_child);
    let mut server = UploadPack::new(store, refs, ServerOptions::default());

    // Without a shallow declaration the have implies its ancestry.
    let lines = [format!("want {bar_child}"), format!("have {foo_child}")];
    let (result, output) = upload_v2(
        &mut server,
        &[
            Line("command=fetch"),
            Delim,
            Line(&lines[0]),
            Line(&lines[1]),
            Line("done"),
            Flush,
        ],
    );
    result.unwrap();
    let mut response = Response::parse(&output);
    response.drain_advertisement();
    assert_eq!(response.next_text(), "packfile");
    let ids = response.pack_ids();
    assert!(ids.contains(&bar_child));
    assert!(!ids.contains(&common_parent));

    // With the shallow declaration the server knows the parent is missing.
    let shallow = format!("shallow {foo_child}");
    let (result, output) = upload_v2(
        &mut server,
        &[
            Line("command=fetch"),
            Delim,
            Line(&lines[0]),
            Line(&lines[1]),
            Line(&shallow),
            Line("done"),
            Flush,
        ],
    );
    result.unwrap();
    let mut response = Response::parse(&output);
    response.drain_advertisement();
    assert_eq!(response.next_text(), "packfile");
    assert!(response.pack_ids().contains(&common_parent));
}

#[test]
fn fetch_without_wants_is_rejected() {
    let two = two_branches();
    let mut server = server_for(two);
    let (result, _) = upload_v2(
        &mut server,
        &[Line("command=fetch"), Delim, Line("done"), Flush],
    );
    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "no wants given");
}

#[test]
fn unrecognized_fetch_argument_is_a_protocol_error() {
    let two = two_branches();
    let mut server = server_for(two);
    let (result, _) = upload_v2(
        &mut server,
        &[
            Line("command=fetch"),
            Delim,
            Line("invalid-argument"),
            Flush,
        ],
    );
    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "unexpected invalid-argument");
}

#[test]
fn peer_agent_is_recorded() {
    let two = two_branches();
    let foo_child = two.foo_child;
    let mut server = server_for(two);

    let want = format!("want {foo_child}");
    let (result, _) = upload_v2(
        &mut server,
        &[
            Line("command=fetch"),
            Line("agent=probe-client/1.2.4"),
            Delim,
            Line(&want),
            Line("done"),
            Flush,
        ],
    );
    result.unwrap();
    assert_eq!(
        server.peer_agent().map(|a| a.to_string()),
        Some("probe-client/1.2.4".to_string())
    );
}

#[test]
fn repeated_fetch_after_applying_the_pack_is_empty() {
    let two = two_branches();
    let (foo_child, foo_parent) = (two.foo_child, two.foo_parent);
    let mut server = server_for(two);

    let want = format!("want {foo_child}");
    let (result, output) = upload_v2(
        &mut server,
        &[
            Line("command=fetch"),
            Delim,
            Line(&want),
            Line("done"),
            Flush,
        ],
    );
    result.unwrap();
    let mut response = Response::parse(&output);
    response.drain_advertisement();
    assert_eq!(response.next_text(), "packfile");
    let (objects, _) = response.read_pack();
    assert!(objects.iter().any(|(id, _, _)| *id == foo_child));
    assert!(objects.iter().any(|(id, _, _)| *id == foo_parent));

    // The client now has everything; the same wants negotiate to no work.
    let have = format!("have {foo_child}");
    let (result, output) = upload_v2(
        &mut server,
        &[
            Line("command=fetch"),
            Delim,
            Line(&want),
            Line(&have),
            Flush,
        ],
    );
    result.unwrap();
    let mut response = Response::parse(&output);
    response.drain_advertisement();
    assert_eq!(response.next_text(), "acknowledgments");
    assert_eq!(response.next_text(), format!("ACK {foo_child}"));
    assert_eq!(response.next_text(), "ready");
    response.expect_delim();
    assert_eq!(response.next_text(), "packfile");
    let (objects, _) = response.read_pack();
    assert!(objects.is_empty());
}
