//! Trigger policies (§4.5) and invalidation policies (§4.6).

use std::sync::{Arc, Weak};

use crate::node::Node;

/// Decides whether a freshly computed value should propagate to observers (§4.5).
pub enum TriggerPolicy<T> {
	/// Unconditionally propagates. Default for `Var`/`Calc` unless opted out, and always
	/// used for `Action`.
	Always,
	/// Propagates iff the new value differs from the old one under `PartialEq`.
	ChangeOnly,
	/// Propagates iff a user predicate over bound upstream cells returns `true`. Short-
	/// circuits to `false` if any bound upstream has closed (§10.5).
	Filter(FilterTrigger<T>),
}

impl<T> TriggerPolicy<T> {
	/// Evaluates the policy against the previous and freshly computed value.
	pub(crate) fn should_propagate(&self, old: Option<&T>, new: &T) -> bool
	where
		T: PartialEq,
	{
		match self {
			TriggerPolicy::Always => true,
			TriggerPolicy::ChangeOnly => match old {
				Some(old) => old != new,
				None => true, // first successful evaluation always counts as a change
			},
			TriggerPolicy::Filter(filter) => filter.check(),
		}
	}
}

/// A user predicate bound over weak references to named upstream cells (§4.5).
///
/// Mirrors the reference `FilterTrig` (`include/reaction/trigger.h`), which locks each
/// bound weak pointer before invoking the predicate and otherwise fails the check.
pub struct FilterTrigger<T> {
	upstreams: Vec<Weak<dyn Node>>,
	predicate: Arc<dyn Fn() -> bool + Send + Sync>,
	_marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> FilterTrigger<T> {
	/// Builds a filter trigger. `upstreams` are the cells the predicate closes over, used
	/// only to detect that one of them has closed; `predicate` performs the actual check
	/// (it is expected to read those same cells through the normal tracked `get()` path).
	pub fn new(upstreams: Vec<Weak<dyn Node>>, predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
		Self {
			upstreams,
			predicate: Arc::new(predicate),
			_marker: std::marker::PhantomData,
		}
	}

	fn check(&self) -> bool {
		if self.upstreams.iter().any(|weak| weak.upgrade().is_none()) {
			return false;
		}
		(self.predicate)()
	}
}

/// Decides a dependent's fate when one of its upstreams closes (§4.6).
#[derive(Clone)]
pub enum InvalidationPolicy {
	/// Default: the dependent is itself closed, cascading the loss downstream.
	Cascade,
	/// The dependent keeps its last cached value and becomes an inert source cell.
	KeepLast,
	/// User-supplied handler, invoked with the lost upstream's ID.
	Custom(Arc<dyn Fn(crate::id::NodeId) + Send + Sync>),
}

impl Default for InvalidationPolicy {
	fn default() -> Self {
		InvalidationPolicy::Cascade
	}
}
