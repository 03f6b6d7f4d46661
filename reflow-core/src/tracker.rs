//! Thread-local dependency tracker (§4.3).
//!
//! A computed cell pushes itself before running its body and pops itself afterwards.
//! Any reactive read that happens while the stack is non-empty records the read target
//! against the top frame's scratch buffer; the cell then swaps that buffer in as its new
//! dependency set once the cycle check passes (`crate::propagate::commit_dependencies`).
//! Reads with an empty stack are untracked (plain value extraction).

use std::{cell::RefCell, sync::Weak};

use crate::{id::NodeId, node::Node};

thread_local! {
	static STACK: RefCell<Vec<Vec<(NodeId, Weak<dyn Node>)>>> = RefCell::new(Vec::new());
}

/// Pushes a fresh scratch frame, runs `body`, and returns its result together with the
/// set of nodes read during `body` (deduplicated by ID, insertion order preserved).
///
/// On panic, the frame is popped and its contents discarded (§4.3 "on abnormal return
/// the scratch is discarded; dependency set is left unchanged") and the panic resumes
/// so the caller's own evaluation-boundary `catch_unwind` (§7) can handle it.
pub(crate) fn track<T>(body: impl FnOnce() -> T) -> (T, Vec<(NodeId, Weak<dyn Node>)>) {
	STACK.with(|stack| stack.borrow_mut().push(Vec::new()));
	match std::panic::catch_unwind(std::panic::AssertUnwindSafe(body)) {
		Ok(value) => {
			let recorded = STACK.with(|stack| stack.borrow_mut().pop().unwrap_or_default());
			(value, recorded)
		}
		Err(payload) => {
			STACK.with(|stack| {
				stack.borrow_mut().pop();
			});
			std::panic::resume_unwind(payload);
		}
	}
}

/// Called by a reactive cell on every read. Records `(id, node)` into the top tracker
/// frame, if any is active on this thread.
pub(crate) fn record_read(id: NodeId, node: Weak<dyn Node>) {
	STACK.with(|stack| {
		if let Some(frame) = stack.borrow_mut().last_mut() {
			if !frame.iter().any(|(seen, _)| *seen == id) {
				frame.push((id, node));
			}
		}
	});
}

/// Whether any computation is currently being tracked on this thread.
#[must_use]
pub(crate) fn is_tracking() -> bool {
	STACK.with(|stack| !stack.borrow().is_empty())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn records_reads_during_tracking_only() {
		record_read(NodeId::next(), Weak::<crate::cell::Cell<i32>>::new()); // untracked, stack empty
		let target = NodeId::next();
		let (value, deps) = track(|| {
			record_read(target, Weak::<crate::cell::Cell<i32>>::new());
			record_read(target, Weak::<crate::cell::Cell<i32>>::new()); // duplicate id, ignored
			42
		});
		assert_eq!(value, 42);
		assert_eq!(deps.len(), 1);
		assert_eq!(deps[0].0, target);
		assert!(!is_tracking());
	}

	#[test]
	fn pops_frame_even_when_body_panics() {
		let target = NodeId::next();
		let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
			track(|| {
				record_read(target, Weak::<crate::cell::Cell<i32>>::new());
				panic!("boom");
			})
		}));
		assert!(result.is_err());
		assert!(!is_tracking());
	}
}
