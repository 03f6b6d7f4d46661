//! Ergonomic `Var`/`Calc`/`Action` vocabulary over [`reflow_core`]'s reactive engine.
//!
//! ```
//! use reflow::{var, calc};
//!
//! let a = var(2).build();
//! let a2 = a.clone();
//! let b = calc(move || a2.get().unwrap() * 3).build().unwrap();
//! assert_eq!(b.get().unwrap(), 6);
//!
//! a.value(5).unwrap();
//! assert_eq!(b.get().unwrap(), 15);
//! ```

use std::sync::{Arc, Weak};

use reflow_core::Cell;

pub use reflow_core::{is_armed, FilterTrigger, InvalidationPolicy, NodeId, NodeState, ReflowError, Result, TriggerPolicy};

/// A void payload: the declared value type of an [`Action`](fn@action) node, which exists
/// only for its side effects.
pub type Void = ();

/// A reference-counted pointer to a reactive cell (§3 "Handle", §6).
///
/// Cloning a `Handle` shares the underlying cell; the cell closes once every clone (and
/// every strong reference reachable through it) is dropped, or when [`Handle::close`] is
/// called explicitly.
pub struct Handle<T>(Arc<Cell<T>>);

impl<T: Clone + PartialEq + Send + Sync + 'static> Handle<T> {
	/// `get()` (§4.4, §6).
	pub fn get(&self) -> Result<T> {
		self.0.get()
	}

	/// `value(v)` (§4.4, §6). Source handles only; chainable.
	pub fn value(&self, new_value: T) -> Result<&Self> {
		self.0.value(new_value)?;
		Ok(self)
	}

	/// `reset(fn)` (§4.4, §6). Computed handles only.
	pub fn reset(&self, thunk: impl Fn() -> T + Send + Sync + 'static) -> Result<()> {
		self.0.reset(thunk)
	}

	/// `close()` (§4.4, §6). Idempotent.
	pub fn close(&self) {
		self.0.close();
	}

	/// `setName(s)` (§4.1, §6).
	pub fn set_name(&self, name: impl Into<String>) {
		self.0.set_name(name);
	}

	#[must_use]
	pub fn name(&self) -> Option<String> {
		self.0.name()
	}

	/// Whether the last evaluation attempt failed, leaving the cached value stale (I5).
	#[must_use]
	pub fn is_stale(&self) -> bool {
		self.0.is_stale()
	}

	/// `getId()` (§4.1, §6).
	#[must_use]
	pub fn id(&self) -> NodeId {
		self.0.id()
	}

	/// A non-owning reference suitable for capture inside another cell's body, so that
	/// `Filter` predicates and the like can observe liveness without keeping this cell
	/// alive on their own (§5 "Resource policy").
	#[must_use]
	pub fn downgrade(&self) -> WeakHandle<T> {
		WeakHandle(Arc::downgrade(&self.0))
	}

	/// A type-erased weak reference suitable for [`filter_trigger`]'s upstream liveness list.
	#[must_use]
	pub fn as_node(&self) -> Weak<dyn reflow_core::Node> {
		Arc::downgrade(&self.0) as Weak<dyn reflow_core::Node>
	}

	/// The IDs of this cell's current dependencies, for diagnostics and tests (§4.2).
	#[must_use]
	pub fn dependency_ids(&self) -> Vec<NodeId> {
		reflow_core::Node::dependency_ids(&*self.0)
	}
}

/// Builds a `Filter` trigger policy (§4.5, §6 "Policy selectors": `withTrigger(Filter(pred,
/// …))`) bound over the given upstream handles. The predicate is expected to read those
/// same handles through their ordinary tracked `get()`; `upstreams` is used only to detect
/// that one of them has closed, per the short-circuit-to-`false` rule.
pub fn filter_trigger<T>(
	upstreams: impl IntoIterator<Item = Weak<dyn reflow_core::Node>>,
	predicate: impl Fn() -> bool + Send + Sync + 'static,
) -> TriggerPolicy<T> {
	TriggerPolicy::Filter(FilterTrigger::new(upstreams.into_iter().collect(), predicate))
}

impl<T> Clone for Handle<T> {
	fn clone(&self) -> Self {
		Handle(Arc::clone(&self.0))
	}
}

impl<T> std::fmt::Debug for Handle<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_tuple("Handle").field(&self.0.id()).finish()
	}
}

/// A weak counterpart to [`Handle`], used to bind `Filter` triggers and similar
/// collaborators over upstream cells without extending their lifetime.
pub struct WeakHandle<T>(Weak<Cell<T>>);

impl<T: Clone + PartialEq + Send + Sync + 'static> WeakHandle<T> {
	#[must_use]
	pub fn upgrade(&self) -> Option<Handle<T>> {
		self.0.upgrade().map(Handle)
	}
}

impl<T> Clone for WeakHandle<T> {
	fn clone(&self) -> Self {
		WeakHandle(self.0.clone())
	}
}

/// Builds a `Var` (§6 "Factories", "Policy selectors").
///
/// `var(v)` alone yields a handle with the default `Always` trigger and `Cascade`
/// invalidation; chain [`VarBuilder::with_trigger`]/[`VarBuilder::with_invalidation`]
/// before [`VarBuilder::build`] to opt into the others.
pub fn var<T: Clone + PartialEq + Send + Sync + 'static>(value: T) -> VarBuilder<T> {
	VarBuilder {
		value,
		trigger: TriggerPolicy::Always,
		invalidation: InvalidationPolicy::default(),
	}
}

pub struct VarBuilder<T> {
	value: T,
	trigger: TriggerPolicy<T>,
	invalidation: InvalidationPolicy,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> VarBuilder<T> {
	#[must_use]
	pub fn with_trigger(mut self, trigger: TriggerPolicy<T>) -> Self {
		self.trigger = trigger;
		self
	}

	#[must_use]
	pub fn with_invalidation(mut self, invalidation: InvalidationPolicy) -> Self {
		self.invalidation = invalidation;
		self
	}

	#[must_use]
	pub fn build(self) -> Handle<T> {
		Handle(Cell::new_source(self.value, self.trigger, self.invalidation))
	}
}

/// Builds a `Calc` (§6 "Factories", "Policy selectors").
///
/// The body runs once, immediately, inside [`CalcBuilder::build`] to establish the cell's
/// initial value and dependency set (§9 "Open questions": construction, like `reset`,
/// evaluates eagerly).
pub fn calc<T, F>(thunk: F) -> CalcBuilder<T>
where
	T: Clone + PartialEq + Send + Sync + 'static,
	F: Fn() -> T + Send + Sync + 'static,
{
	CalcBuilder {
		thunk: Arc::new(thunk),
		trigger: TriggerPolicy::Always,
		invalidation: InvalidationPolicy::default(),
	}
}

pub struct CalcBuilder<T> {
	thunk: Arc<dyn Fn() -> T + Send + Sync>,
	trigger: TriggerPolicy<T>,
	invalidation: InvalidationPolicy,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> CalcBuilder<T> {
	#[must_use]
	pub fn with_trigger(mut self, trigger: TriggerPolicy<T>) -> Self {
		self.trigger = trigger;
		self
	}

	#[must_use]
	pub fn with_invalidation(mut self, invalidation: InvalidationPolicy) -> Self {
		self.invalidation = invalidation;
		self
	}

	pub fn build(self) -> Result<Handle<T>> {
		let thunk = self.thunk;
		Cell::new_computed(move || thunk(), self.trigger, self.invalidation).map(Handle)
	}
}

/// Builds an `Action` (§4.4 "Actions are computed cells whose declared value type is
/// void", §6 "Factories"). Always uses the `Always` trigger (§4.5); only invalidation is
/// selectable.
pub fn action<F>(body: F) -> ActionBuilder
where
	F: Fn() + Send + Sync + 'static,
{
	ActionBuilder {
		body: Arc::new(body),
		invalidation: InvalidationPolicy::default(),
	}
}

pub struct ActionBuilder {
	body: Arc<dyn Fn() + Send + Sync>,
	invalidation: InvalidationPolicy,
}

impl ActionBuilder {
	#[must_use]
	pub fn with_invalidation(mut self, invalidation: InvalidationPolicy) -> Self {
		self.invalidation = invalidation;
		self
	}

	pub fn build(self) -> Result<Handle<Void>> {
		let body = self.body;
		Cell::new_computed(move || body(), TriggerPolicy::Always, self.invalidation).map(Handle)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[test]
	fn simple_chain_propagates_end_to_end() {
		let a = var(2).build();
		let a_for_b = a.clone();
		let b = calc(move || a_for_b.get().unwrap() * 3).build().unwrap();
		let b_for_c = b.clone();
		let c = calc(move || b_for_c.get().unwrap() + 1).build().unwrap();

		assert_eq!(c.get().unwrap(), 7);
		a.value(5).unwrap();
		assert_eq!(c.get().unwrap(), 16);
	}

	#[test]
	fn diamond_evaluates_join_exactly_once() {
		let a = var(1).build();
		let a_for_b = a.clone();
		let b = calc(move || a_for_b.get().unwrap() + 1).build().unwrap();
		let a_for_c = a.clone();
		let c = calc(move || a_for_c.get().unwrap() * 2).build().unwrap();

		let evals = Arc::new(AtomicUsize::new(0));
		let evals_for_d = Arc::clone(&evals);
		let b_for_d = b.clone();
		let c_for_d = c.clone();
		let d = calc(move || {
			evals_for_d.fetch_add(1, Ordering::SeqCst);
			b_for_d.get().unwrap() + c_for_d.get().unwrap()
		})
		.build()
		.unwrap();

		evals.store(0, Ordering::SeqCst);
		a.value(3).unwrap();
		assert_eq!(d.get().unwrap(), 10);
		assert_eq!(evals.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn change_only_suppresses_repeat_writes() {
		let count = Arc::new(AtomicUsize::new(0));
		let a = var(10).with_trigger(TriggerPolicy::ChangeOnly).build();
		let a_for_action = a.clone();
		let count_for_action = Arc::clone(&count);
		let _b = action(move || {
			let _ = a_for_action.get();
			count_for_action.fetch_add(1, Ordering::SeqCst);
		})
		.build()
		.unwrap();

		let before = count.load(Ordering::SeqCst);
		a.value(10).unwrap();
		assert_eq!(count.load(Ordering::SeqCst), before);
	}

	#[test]
	fn cascade_close_propagates_to_dependents() {
		let a = var(1).build();
		let a_for_b = a.clone();
		let b = calc(move || a_for_b.get().unwrap() + 1).build().unwrap();

		a.close();
		assert!(b.get().is_err());
	}

	#[test]
	fn keep_last_survives_upstream_close() {
		let a = var(1).build();
		let a_for_b = a.clone();
		let b = calc(move || a_for_b.get().unwrap() + 1)
			.with_invalidation(InvalidationPolicy::KeepLast)
			.build()
			.unwrap();

		assert_eq!(b.get().unwrap(), 2);
		a.close();
		assert_eq!(b.get().unwrap(), 2);
	}
}
