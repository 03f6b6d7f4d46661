//! Observer node base entity: adjacency, lifecycle, ordering hooks (§4.2).

use std::{
	collections::BTreeMap,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Weak,
	},
};

use crate::{concurrency::AdaptiveRwLock, id::NodeId};

/// Lifecycle state of an [`ObserverNode`] (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
	/// Participates in the graph; may gain/lose edges and be evaluated.
	Active,
	/// Terminal. A closed node's edge sets are empty (I3) and it never re-enters `Active`.
	Closed,
}

/// Everything in the graph a [`crate::propagate`] wave or a dependent needs to see,
/// independent of a cell's payload type `T`. Implemented by every `Cell<T>`.
///
/// Object-safe so the propagation engine and the dependency/observer edge sets can hold
/// `Weak<dyn Node>`/`Arc<dyn Node>` without knowing each node's concrete value type.
pub trait Node: Send + Sync {
	/// The node's process-unique identity (§4.1).
	fn id(&self) -> NodeId;

	/// The node's optional diagnostic name (§4.1).
	fn name(&self) -> Option<String>;

	/// Current lifecycle state.
	fn state(&self) -> NodeState;

	/// Ascending-`NodeId`-ordered snapshot of current observer edges.
	fn observer_refs(&self) -> Vec<(NodeId, Weak<dyn Node>)>;

	/// Ascending-`NodeId`-ordered snapshot of current dependency edges.
	fn dependency_refs(&self) -> Vec<(NodeId, Weak<dyn Node>)>;

	/// Convenience view over [`Node::observer_refs`] for tests/diagnostics.
	fn observer_ids(&self) -> Vec<NodeId> {
		self.observer_refs().into_iter().map(|(id, _)| id).collect()
	}

	/// Convenience view over [`Node::dependency_refs`] for tests/diagnostics.
	fn dependency_ids(&self) -> Vec<NodeId> {
		self.dependency_refs().into_iter().map(|(id, _)| id).collect()
	}

	/// Registers `observer` as depending on this node. Called from the observer's side
	/// after the dependency edge has passed the cycle check and been committed.
	fn add_observer(&self, observer_id: NodeId, observer: Weak<dyn Node>);

	/// Removes `observer_id` from this node's observer set, if present.
	fn remove_observer(&self, observer_id: NodeId);

	/// Re-evaluates this node as part of a propagation wave if its trigger policy approves
	/// (§4.7 step 3). Returns whether the wave should continue to this node's observers.
	///
	/// Implementations must not panic: failures from user bodies are caught internally and
	/// converted to a stale marker per (I5) and §7's propagation policy.
	fn evaluate_in_wave(&self) -> bool;

	/// Invoked synchronously, once per still-active dependent, when a dependency it holds
	/// closes (§4.6). Implementations must not re-enter the closing node.
	fn on_dependency_closed(&self, lost: NodeId);

	/// Tears the node down: marks it `Closed`, fires `on_dependency_closed` on every
	/// observer, then empties both edge sets (I3). Idempotent (§8).
	fn close(self: Arc<Self>);
}

/// Shared adjacency/lifecycle bookkeeping embedded in every `Cell<T>`.
pub(crate) struct NodeBase {
	id: NodeId,
	name: AdaptiveRwLock<Option<String>>,
	closed: AtomicBool,
	dependencies: AdaptiveRwLock<BTreeMap<NodeId, Weak<dyn Node>>>,
	observers: AdaptiveRwLock<BTreeMap<NodeId, Weak<dyn Node>>>,
}

impl NodeBase {
	pub(crate) fn new() -> Self {
		Self {
			id: NodeId::next(),
			name: AdaptiveRwLock::new(None),
			closed: AtomicBool::new(false),
			dependencies: AdaptiveRwLock::new(BTreeMap::new()),
			observers: AdaptiveRwLock::new(BTreeMap::new()),
		}
	}

	pub(crate) fn id(&self) -> NodeId {
		self.id
	}

	pub(crate) fn name(&self) -> Option<String> {
		self.name.read().clone()
	}

	/// Settable once (§4.1); later calls are ignored, matching `setName`'s "settable once
	/// after construction" contract.
	pub(crate) fn set_name_once(&self, name: String) {
		let mut slot = self.name.write();
		if slot.is_none() {
			*slot = Some(name);
		}
	}

	pub(crate) fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}

	pub(crate) fn state(&self) -> NodeState {
		if self.is_closed() {
			NodeState::Closed
		} else {
			NodeState::Active
		}
	}

	pub(crate) fn dependency_ids(&self) -> Vec<NodeId> {
		self.dependencies.read().keys().copied().collect()
	}

	pub(crate) fn observer_ids(&self) -> Vec<NodeId> {
		self.observers.read().keys().copied().collect()
	}

	pub(crate) fn dependencies_snapshot(&self) -> Vec<(NodeId, Weak<dyn Node>)> {
		self.dependencies
			.read()
			.iter()
			.map(|(id, weak)| (*id, weak.clone()))
			.collect()
	}

	pub(crate) fn observers_snapshot(&self) -> Vec<(NodeId, Weak<dyn Node>)> {
		self.observers
			.read()
			.iter()
			.map(|(id, weak)| (*id, weak.clone()))
			.collect()
	}

	/// Replaces the dependency set wholesale (used by the tracker after a (re)evaluation,
	/// §4.3 "atomically swaps the cell's dependency set with the scratch buffer").
	pub(crate) fn set_dependencies(&self, deps: BTreeMap<NodeId, Weak<dyn Node>>) {
		*self.dependencies.write() = deps;
	}

	pub(crate) fn add_observer(&self, id: NodeId, observer: Weak<dyn Node>) {
		self.observers.write().insert(id, observer);
	}

	pub(crate) fn remove_observer(&self, id: NodeId) {
		self.observers.write().remove(&id);
	}

	/// Marks the node closed and drains both edge sets (I3), returning what they held so
	/// the caller can notify former observers and unregister from former dependencies.
	/// Returns `None` if the node was already closed, so callers can make `close()`
	/// idempotent (§8).
	#[allow(clippy::type_complexity)]
	pub(crate) fn mark_closed(
		&self,
	) -> Option<(Vec<(NodeId, Weak<dyn Node>)>, Vec<(NodeId, Weak<dyn Node>)>)> {
		if self.closed.swap(true, Ordering::AcqRel) {
			return None;
		}
		let deps = self.dependencies.write().drain().collect();
		let observers = self.observers.write().drain().collect();
		Some((deps, observers))
	}
}
