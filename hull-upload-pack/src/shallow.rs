//! Shallow-frontier arithmetic for `deepen`, `deepen-since` and `deepen-not`.
//!
//! The planner is a pure function from the request and the commit graph to a
//! [`ShallowPlan`]; nothing here mutates session state, which keeps the
//! disjointness of `new_shallows` and `unshallows` a direct consequence of
//! the computation.

use crate::error::{Error, Result};
use crate::policy::peel_to_commit;
use crate::request::{parse_oid, Deepen};
use crate::store::{ObjectDatabase, RefSnapshot};
use bstr::{BStr, BString};
use gix_hash::ObjectId;
use std::collections::{HashMap, HashSet, VecDeque};

/// The outcome of shallow planning for one fetch.
#[derive(Debug, Default)]
pub struct ShallowPlan {
    /// Commits eligible for sending under the deepen clause; `None` when no
    /// deepening was requested and the walk is unrestricted.
    pub selected: Option<HashSet<ObjectId>>,
    /// Boundaries the client must now treat as shallow, in discovery order.
    pub new_shallows: Vec<ObjectId>,
    /// Previously shallow boundaries that are now fully present, in the
    /// client's declaration order.
    pub unshallows: Vec<ObjectId>,
}

impl ShallowPlan {
    /// Whether the plan carries any frontier change worth announcing.
    pub fn has_changes(&self) -> bool {
        !self.new_shallows.is_empty() || !self.unshallows.is_empty()
    }

    /// Compute the plan for `deepen` over the commits reachable from `wants`.
    ///
    /// `client_shallow` is the boundary the client declared; `refs` is the
    /// full snapshot used to resolve `deepen-not` names.
    pub fn compute(
        store: &dyn ObjectDatabase,
        wants: &[ObjectId],
        deepen: &Deepen,
        client_shallow: &[ObjectId],
        refs: &RefSnapshot,
    ) -> Result<ShallowPlan> {
        let roots = commit_roots(store, wants)?;
        let frontier = match deepen {
            Deepen::None => return Ok(ShallowPlan::default()),
            Deepen::Depth(depth) => depth_frontier(store, &roots, u64::from(*depth))?,
            Deepen::Since(time) => since_frontier(store, &roots, *time)?,
            Deepen::Not(names) => {
                let mut excluded = HashSet::new();
                for name in names {
                    let target = resolve_deepen_not(store, refs, name.as_ref())?;
                    exclude_ancestry(store, target, &mut excluded)?;
                }
                not_frontier(store, &roots, &excluded)?
            }
        };
        if frontier.selected.is_empty() {
            return Err(Error::ShallowRequestEmpty);
        }
        let boundary_set: HashSet<ObjectId> = frontier.boundary.iter().copied().collect();
        let client_set: HashSet<ObjectId> = client_shallow.iter().copied().collect();
        let new_shallows = frontier
            .boundary
            .iter()
            .copied()
            .filter(|id| !client_set.contains(id))
            .collect();
        let unshallows = client_shallow
            .iter()
            .copied()
            .filter(|id| {
                store.contains(id)
                    && frontier.selected.contains(id)
                    && !boundary_set.contains(id)
            })
            .collect();
        Ok(ShallowPlan {
            selected: Some(frontier.selected),
            new_shallows,
            unshallows,
        })
    }
}

/// The wants peeled down to distinct commits, keeping request order.
fn commit_roots(store: &dyn ObjectDatabase, wants: &[ObjectId]) -> Result<Vec<ObjectId>> {
    let mut roots = Vec::new();
    for want in wants {
        if let Some(commit) = peel_to_commit(store, *want)? {
            if !roots.contains(&commit) {
                roots.push(commit);
            }
        }
    }
    Ok(roots)
}

struct Frontier {
    selected: HashSet<ObjectId>,
    /// Selected commits cut off from part of their ancestry, discovery order.
    boundary: Vec<ObjectId>,
}

/// `deepen <n>`: wants are generation 1; a selected commit at generation `n`
/// whose parent falls outside the selection becomes a boundary.
fn depth_frontier(
    store: &dyn ObjectDatabase,
    roots: &[ObjectId],
    depth: u64,
) -> Result<Frontier> {
    let mut generation: HashMap<ObjectId, u64> = HashMap::new();
    let mut order = Vec::new();
    let mut queue = VecDeque::new();
    for root in roots {
        queue.push_back((*root, 1));
    }
    while let Some((id, gen)) = queue.pop_front() {
        if gen > depth || !store.contains(&id) {
            continue;
        }
        match generation.get(&id) {
            Some(known) if *known <= gen => continue,
            _ => {}
        }
        if generation.insert(id, gen).is_none() {
            order.push(id);
        }
        for parent in store.commit(&id)?.parents {
            queue.push_back((parent, gen + 1));
        }
    }
    let selected: HashSet<ObjectId> = generation.keys().copied().collect();
    let mut boundary = Vec::new();
    for id in &order {
        if generation[id] < depth {
            continue;
        }
        let parents = store.commit(id)?.parents;
        if !parents.is_empty() && parents.iter().any(|p| !selected.contains(p)) {
            boundary.push(*id);
        }
    }
    Ok(Frontier { selected, boundary })
}

/// `deepen-since <t>`: a commit is selected iff committed at or after `t`;
/// traversal stops below unselected commits.
fn since_frontier(store: &dyn ObjectDatabase, roots: &[ObjectId], time: i64) -> Result<Frontier> {
    let mut selected = HashSet::new();
    let mut order = Vec::new();
    let mut rejected = HashSet::new();
    let mut queue: VecDeque<ObjectId> = roots.iter().copied().collect();
    while let Some(id) = queue.pop_front() {
        if selected.contains(&id) || rejected.contains(&id) || !store.contains(&id) {
            continue;
        }
        let info = store.commit(&id)?;
        if info.committer_time < time {
            rejected.insert(id);
            continue;
        }
        selected.insert(id);
        order.push(id);
        queue.extend(info.parents.iter().copied());
    }
    let mut boundary = Vec::new();
    for id in &order {
        let info = store.commit(id)?;
        let cut = info.parents.iter().any(|p| {
            !selected.contains(p)
                && store
                    .commit(p)
                    .map(|parent| parent.committer_time < time)
                    .unwrap_or(true)
        });
        if cut {
            boundary.push(*id);
        }
    }
    Ok(Frontier { selected, boundary })
}

/// `deepen-not`: everything reachable from the excluded points is out; a
/// selected commit with an excluded parent becomes a boundary.
fn not_frontier(
    store: &dyn ObjectDatabase,
    roots: &[ObjectId],
    excluded: &HashSet<ObjectId>,
) -> Result<Frontier> {
    let mut selected = HashSet::new();
    let mut order = Vec::new();
    let mut queue: VecDeque<ObjectId> = roots.iter().copied().collect();
    while let Some(id) = queue.pop_front() {
        if selected.contains(&id) || excluded.contains(&id) || !store.contains(&id) {
            continue;
        }
        selected.insert(id);
        order.push(id);
        queue.extend(store.commit(&id)?.parents.iter().copied());
    }
    let mut boundary = Vec::new();
    for id in &order {
        if store
            .commit(id)?
            .parents
            .iter()
            .any(|p| excluded.contains(p))
        {
            boundary.push(*id);
        }
    }
    Ok(Frontier { selected, boundary })
}

/// Resolve a `deepen-not` operand: a full or shorthand ref name, or a hex
/// object id; annotated tags peel to their commit.
fn resolve_deepen_not(
    store: &dyn ObjectDatabase,
    refs: &RefSnapshot,
    name: &BStr,
) -> Result<ObjectId> {
    let target = lookup_ref(refs, name)
        .or_else(|| parse_oid(name).ok().filter(|id| store.contains(id)));
    let target = target.ok_or_else(|| Error::RefNotFound(BString::from(name)))?;
    peel_to_commit(store, target)?.ok_or_else(|| Error::RefNotFound(BString::from(name)))
}

fn lookup_ref(refs: &RefSnapshot, name: &BStr) -> Option<ObjectId> {
    let candidates = [
        BString::from(name),
        BString::from(format!("refs/{name}")),
        BString::from(format!("refs/heads/{name}")),
        BString::from(format!("refs/tags/{name}")),
    ];
    candidates
        .iter()
        .find_map(|candidate| refs.find(candidate.as_ref()).map(|r| r.target))
}

fn exclude_ancestry(
    store: &dyn ObjectDatabase,
    from: ObjectId,
    excluded: &mut HashSet<ObjectId>,
) -> Result<()> {
    let mut queue = VecDeque::from([from]);
    while let Some(id) = queue.pop_front() {
        if !excluded.insert(id) || !store.contains(&id) {
            continue;
        }
        queue.extend(store.commit(&id)?.parents.iter().copied());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryRefs, MemoryStore};
    use crate::store::RefStore;

    fn snapshot(refs: &MemoryRefs) -> RefSnapshot {
        refs.snapshot().unwrap()
    }

    #[test]
    fn depth_one_cuts_below_the_want() {
        let mut store = MemoryStore::new();
        let parent = MemoryStore::commit(&mut store, &[], 1);
        let child = MemoryStore::commit(&mut store, &[parent], 2);

        let plan = ShallowPlan::compute(
            &store,
            &[child],
            &Deepen::Depth(1),
            &[],
            &RefSnapshot::default(),
        )
        .unwrap();
        assert_eq!(plan.new_shallows, vec![child]);
        assert!(plan.unshallows.is_empty());
        let selected = plan.selected.unwrap();
        assert!(selected.contains(&child));
        assert!(!selected.contains(&parent));
    }

    #[test]
    fn deepening_unshallows_prior_boundaries() {
        let mut store = MemoryStore::new();
        let one = MemoryStore::commit(&mut store, &[], 1);
        let two = MemoryStore::commit(&mut store, &[one], 2);
        let three = MemoryStore::commit(&mut store, &[two], 3);

        let mut unknown = [0u8; 20];
        unknown[0] = 0x01;
        let unknown = ObjectId::from(unknown);

        let plan = ShallowPlan::compute(
            &store,
            &[three],
            &Deepen::Depth(3),
            &[unknown, two],
            &RefSnapshot::default(),
        )
        .unwrap();
        // `one` sits at the depth limit but is a root, so nothing is cut.
        assert!(plan.new_shallows.is_empty());
        // `two` is now fully present; the unknown boundary stays untouched.
        assert_eq!(plan.unshallows, vec![two]);
    }

    #[test]
    fn since_marks_commits_with_older_parents() {
        let mut store = MemoryStore::new();
        let beyond = MemoryStore::commit(&mut store, &[], 1_510_000);
        let boundary = MemoryStore::commit(&mut store, &[beyond], 1_520_000);
        let too_old = MemoryStore::commit(&mut store, &[], 1_500_000);
        let merge = MemoryStore::commit(&mut store, &[boundary, too_old], 1_530_000);

        let plan = ShallowPlan::compute(
            &store,
            &[merge],
            &Deepen::Since(1_510_000),
            &[boundary],
            &RefSnapshot::default(),
        )
        .unwrap();
        assert_eq!(plan.new_shallows, vec![merge]);
        assert_eq!(plan.unshallows, vec![boundary]);
        let selected = plan.selected.unwrap();
        assert!(selected.contains(&beyond));
        assert!(!selected.contains(&too_old));
    }

    #[test]
    fn since_with_nothing_selected_fails() {
        let mut store = MemoryStore::new();
        let too_old = MemoryStore::commit(&mut store, &[], 1_500_000);
        let err = ShallowPlan::compute(
            &store,
            &[too_old],
            &Deepen::Since(1_510_000),
            &[],
            &RefSnapshot::default(),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "No commits selected for shallow request"
        );
    }

    #[test]
    fn deepen_not_excludes_side_history() {
        let mut store = MemoryStore::new();
        let one = MemoryStore::commit(&mut store, &[], 1);
        let two = MemoryStore::commit(&mut store, &[one], 2);
        let three = MemoryStore::commit(&mut store, &[two], 3);
        let side = MemoryStore::commit(&mut store, &[one], 4);
        let merge = MemoryStore::commit(&mut store, &[three, side], 5);

        let mut refs = MemoryRefs::new();
        refs.update("branch1", merge);
        refs.update("side", side);

        let plan = ShallowPlan::compute(
            &store,
            &[merge],
            &Deepen::Not(vec![BString::from("side")]),
            &[three],
            &snapshot(&refs),
        )
        .unwrap();
        let shallows: HashSet<ObjectId> = plan.new_shallows.iter().copied().collect();
        assert_eq!(shallows, HashSet::from([merge, two]));
        assert_eq!(plan.unshallows, vec![three]);
        let selected = plan.selected.unwrap();
        assert!(!selected.contains(&side));
        assert!(!selected.contains(&one));
    }

    #[test]
    fn deepen_not_resolves_annotated_tags() {
        let mut store = MemoryStore::new();
        let one = MemoryStore::commit(&mut store, &[], 1);
        let two = MemoryStore::commit(&mut store, &[one], 2);
        let three = MemoryStore::commit(&mut store, &[two], 3);
        let four = MemoryStore::commit(&mut store, &[three], 4);
        let tag = MemoryStore::tag(&mut store, "twotag", two);

        let mut refs = MemoryRefs::new();
        refs.update("refs/tags/twotag", tag);
        refs.update("four", four);

        let plan = ShallowPlan::compute(
            &store,
            &[four],
            &Deepen::Not(vec![BString::from("twotag")]),
            &[],
            &snapshot(&refs),
        )
        .unwrap();
        assert_eq!(plan.new_shallows, vec![three]);
        let selected = plan.selected.unwrap();
        assert!(selected.contains(&four));
        assert!(!selected.contains(&two));
    }

    #[test]
    fn deepen_not_covering_the_want_fails() {
        let mut store = MemoryStore::new();
        let one = MemoryStore::commit(&mut store, &[], 1);
        let two = MemoryStore::commit(&mut store, &[one], 2);
        let three = MemoryStore::commit(&mut store, &[two], 3);
        let four = MemoryStore::commit(&mut store, &[three], 4);

        let mut refs = MemoryRefs::new();
        refs.update("two", two);
        refs.update("four", four);

        let err = ShallowPlan::compute(
            &store,
            &[two],
            &Deepen::Not(vec![BString::from("four")]),
            &[],
            &snapshot(&refs),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ShallowRequestEmpty));
    }

    #[test]
    fn unknown_deepen_not_name_fails() {
        let mut store = MemoryStore::new();
        let tip = MemoryStore::commit(&mut store, &[], 1);
        let err = ShallowPlan::compute(
            &store,
            &[tip],
            &Deepen::Not(vec![BString::from("nowhere")]),
            &[],
            &RefSnapshot::default(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid ref name: nowhere");
    }
}
