//! Process-unique node identity (§4.1).

use std::{
	fmt::{self, Display, Formatter},
	sync::atomic::{AtomicU64, Ordering},
};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// A stable, process-unique identifier assigned to every node at construction.
///
/// IDs are never reused, monotonically increasing, and `Ord` so the propagation
/// engine can use them as the equal-depth tie-break (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
	pub(crate) fn next() -> Self {
		// Relaxed: the counter only needs to be unique, not synchronised with anything else.
		Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
	}

	/// Returns the raw numeric value, mostly useful for logging and tests.
	#[must_use]
	pub fn as_u64(self) -> u64 {
		self.0
	}
}

impl Display for NodeId {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

#[cfg(test)]
mod tests {
	use super::NodeId;

	#[test]
	fn ids_are_monotonic_and_unique() {
		let a = NodeId::next();
		let b = NodeId::next();
		assert!(b.as_u64() > a.as_u64());
	}
}
