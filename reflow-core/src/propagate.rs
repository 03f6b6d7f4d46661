//! Propagation engine: topological re-evaluation and cycle detection (§4.7).

use std::{
	cell::{Cell as StdCell, RefCell},
	collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque},
	sync::Weak,
};

use crate::{
	error::{ReflowError, Result},
	id::NodeId,
	node::Node,
};

thread_local! {
	/// Set while this thread is inside the outermost `run_write` call, covering both the
	/// wave itself and the draining of anything it defers.
	static WAVING: StdCell<bool> = StdCell::new(false);
	/// Writes requested while `WAVING` was already `true`; drained in enqueue order once
	/// the outermost wave finishes (§4.7 point 4, "re-entrant writes ... are deferred").
	static DEFERRED: RefCell<VecDeque<Box<dyn FnOnce()>>> = RefCell::new(VecDeque::new());
}

/// Runs `write` — a closure that mutates a cell and then triggers its propagation wave —
/// honouring re-entrancy: if this thread is already inside a wave (because `write` was
/// called from within a computation or action body), the operation is queued instead of
/// running immediately, and drained in FIFO order after the outermost wave completes.
pub(crate) fn run_write(write: impl FnOnce() + 'static) {
	let already_waving = WAVING.with(|w| w.get());
	if already_waving {
		DEFERRED.with(|q| q.borrow_mut().push_back(Box::new(write)));
		return;
	}

	WAVING.with(|w| w.set(true));
	let guard = scopeguard::guard((), |()| WAVING.with(|w| w.set(false)));

	write();
	loop {
		let next = DEFERRED.with(|q| q.borrow_mut().pop_front());
		match next {
			Some(deferred) => deferred(),
			None => break,
		}
	}
	drop(guard);
}

/// Checks each freshly tracked read for a would-be cycle and, if none is found, returns
/// the committed dependency map with observer back-edges already registered (I1).
///
/// A cycle exists if `cell_id` is reachable from `upstream` by following *existing*
/// dependency edges — i.e. `upstream` already (transitively) depends on `cell_id`, so
/// adding `cell_id -> upstream` would close the loop. A read of `cell_id` itself is the
/// direct (zero-hop) case of this same check (§8 scenario 3).
pub(crate) fn commit_dependencies(
	cell_id: NodeId,
	cell_name: Option<&str>,
	self_as_observer: Weak<dyn Node>,
	reads: &[(NodeId, Weak<dyn Node>)],
) -> Result<BTreeMap<NodeId, Weak<dyn Node>>> {
	for (upstream_id, upstream_weak) in reads {
		if *upstream_id == cell_id {
			return Err(ReflowError::cycle(cell_id, cell_name, *upstream_id, cell_name));
		}
		if let Some(upstream) = upstream_weak.upgrade() {
			if reaches(&*upstream, cell_id) {
				return Err(ReflowError::cycle(
					cell_id,
					cell_name,
					*upstream_id,
					upstream.name().as_deref(),
				));
			}
		}
	}

	let mut committed = BTreeMap::new();
	for (upstream_id, upstream_weak) in reads {
		if let Some(upstream) = upstream_weak.upgrade() {
			upstream.add_observer(cell_id, self_as_observer.clone());
		}
		committed.insert(*upstream_id, upstream_weak.clone());
	}
	Ok(committed)
}

/// Removes `cell_id` from the observer set of every dependency present in `old` but no
/// longer present in `new` (§4.3's "removeAllDependencies ... rebuild from scratch",
/// keeping I1 symmetric as the edge set is replaced wholesale on every evaluation).
pub(crate) fn prune_stale_observers(
	cell_id: NodeId,
	old: &[(NodeId, Weak<dyn Node>)],
	new: &BTreeMap<NodeId, Weak<dyn Node>>,
) {
	for (old_id, old_weak) in old {
		if !new.contains_key(old_id) {
			if let Some(node) = old_weak.upgrade() {
				node.remove_observer(cell_id);
			}
		}
	}
}

/// BFS over `start`'s transitive dependency edges; `true` if `target` is reachable.
fn reaches(start: &dyn Node, target: NodeId) -> bool {
	let mut seen = HashSet::new();
	let mut queue = VecDeque::new();
	seen.insert(start.id());
	queue.push_back(start.dependency_refs());
	while let Some(edges) = queue.pop_front() {
		for (id, weak) in edges {
			if id == target {
				return true;
			}
			if seen.insert(id) {
				if let Some(node) = weak.upgrade() {
					queue.push_back(node.dependency_refs());
				}
			}
		}
	}
	false
}

/// Runs a single propagation wave starting from `origin`'s current observers (§4.7).
///
/// `origin` itself has already had its new value committed by the caller (a source write
/// or a `reset`'s immediate re-evaluation); this function only walks the nodes downstream
/// of it.
///
/// The topological frontier advances unconditionally as each node completes, regardless of
/// whether that node was actually re-evaluated: indegree is purely structural bookkeeping
/// for Kahn's algorithm. Whether a node *should* re-evaluate is tracked separately as
/// `dirty`, OR'd in from any parent whose trigger policy approved propagation. A node with
/// one suppressed parent and one propagating parent must still run once both have
/// completed — decrementing its indegree only on the propagating parent's turn would leave
/// it permanently unscheduled whenever the suppressed parent happens to finish last.
pub(crate) fn propagate_from(origin: &dyn Node) {
	let origin_id = origin.id();

	// Step 1: BFS-collect the reachable subgraph, each node's indegree within it, and each
	// node's own (already-resolved) children so the execution pass never has to re-query a
	// live node's observer set.
	let mut entries: HashMap<NodeId, Entry> = HashMap::new();
	let mut queue: VecDeque<(NodeId, Weak<dyn Node>)> = VecDeque::new();

	for (id, weak) in origin.observer_refs() {
		if id == origin_id {
			// Defensive: would indicate a cycle slipped past `commit_dependencies`.
			log::error!("reflow: propagation reached its own origin ({origin_id}); aborting wave");
			return;
		}
		entries.entry(id).or_insert_with(|| Entry::new(Weak::clone(&weak))).dirty = true;
		queue.push_back((id, weak));
	}

	let mut frontier_seen: HashSet<NodeId> = HashSet::new();
	while let Some((id, weak)) = queue.pop_front() {
		if !frontier_seen.insert(id) {
			continue;
		}
		let node = match weak.upgrade() {
			Some(node) => node,
			None => continue, // observer already dropped; weak entries are pruned lazily
		};
		let children = node.observer_refs();
		for (next_id, next_weak) in &children {
			if *next_id == origin_id {
				log::error!("reflow: propagation reached its own origin ({origin_id}); aborting wave");
				return;
			}
			entries.entry(*next_id).or_insert_with(|| Entry::new(Weak::clone(next_weak))).indegree += 1;
			queue.push_back((*next_id, next_weak.clone()));
		}
		entries.get_mut(&id).unwrap().children = children;
	}

	// Step 3: Kahn's algorithm, ties broken by ascending NodeId (§4.7 "Tie-breaks").
	let mut ready: BTreeSet<NodeId> = entries
		.iter()
		.filter(|(_, e)| e.indegree == 0)
		.map(|(id, _)| *id)
		.collect();
	let mut done: HashSet<NodeId> = HashSet::new();

	while let Some(&id) = ready.iter().next() {
		ready.remove(&id);
		if !done.insert(id) {
			continue; // each node evaluates at most once per wave (I4 consistency, §8)
		}
		let Some(entry) = entries.get(&id) else { continue };
		let dirty = entry.dirty;
		let children = entry.children.clone();

		let continue_signal = if !dirty {
			false
		} else {
			match entry.node.upgrade() {
				Some(node) if node.state() == crate::node::NodeState::Active => node.evaluate_in_wave(),
				_ => false,
			}
		};

		for (next_id, _) in children {
			if let Some(next_entry) = entries.get_mut(&next_id) {
				next_entry.indegree -= 1;
				if continue_signal {
					next_entry.dirty = true;
				}
				if next_entry.indegree == 0 {
					ready.insert(next_id);
				}
			}
		}
	}
}

struct Entry {
	node: Weak<dyn Node>,
	indegree: usize,
	/// Whether at least one already-completed parent signalled propagation; only a dirty
	/// node actually calls `evaluate_in_wave`.
	dirty: bool,
	children: Vec<(NodeId, Weak<dyn Node>)>,
}

impl Entry {
	fn new(node: Weak<dyn Node>) -> Self {
		Entry {
			node,
			indegree: 0,
			dirty: false,
			children: Vec::new(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;

	#[test]
	fn run_write_defers_reentrant_calls_in_order() {
		let order = Arc::new(std::sync::Mutex::new(Vec::new()));

		let o1 = Arc::clone(&order);
		let o2 = Arc::clone(&order);
		run_write(move || {
			o1.lock().unwrap().push(1);
			let o3 = Arc::clone(&o2);
			run_write(move || {
				o3.lock().unwrap().push(2);
			});
			let o4 = Arc::clone(&o2);
			run_write(move || {
				o4.lock().unwrap().push(3);
			});
			o2.lock().unwrap().push(4);
		});

		assert_eq!(*order.lock().unwrap(), vec![1, 4, 2, 3]);
	}
}
