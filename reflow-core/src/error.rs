//! Structured error taxonomy (§7).

use thiserror::Error;

use crate::id::NodeId;

/// The closed set of failures this core can produce.
///
/// Errors raised by user-supplied computation bodies never reach this type directly:
/// they are caught at the evaluation boundary and converted to [`ReflowError::InvalidState`]
/// (§7 "Propagation policy"). Variants here are otherwise produced by the core itself.
#[derive(Debug, Error, Clone)]
pub enum ReflowError {
	/// Adding an edge would have closed a cycle; carries both endpoints' display names.
	#[error("dependency cycle: {source} would depend on {target}, which already depends on {source}")]
	DependencyCycle {
		/// The node the new edge originates from.
		source: String,
		/// The node the new edge would have pointed to.
		target: String,
	},

	/// A cell attempted to depend on itself directly.
	#[error("{node} attempted to depend on itself")]
	SelfObservation {
		/// The offending node.
		node: String,
	},

	/// `get()` on a closed cell, or a computed cell that never evaluated successfully.
	#[error("{node} has no value: {reason}")]
	NullAccess {
		/// The node that was read.
		node: String,
		/// `"closed"` or `"never evaluated"`.
		reason: String,
	},

	/// Internal invariant: a cell was accessed before construction completed.
	///
	/// Reserved for internal bookkeeping; never returned from a public API (§7, §10.5).
	#[error("{node} accessed before it finished constructing")]
	ResourceNotInitialized {
		/// The node under construction.
		node: String,
	},

	/// `reset` was given an expression whose return type does not match the cell's declared type.
	#[error("{node}: reset expression's return type is not convertible to the declared type")]
	TypeMismatch {
		/// The node `reset` was called on.
		node: String,
	},

	/// Operation invalid for the node's current kind or state (e.g. `value()` on a computed cell).
	#[error("{node}: {operation} is invalid in the current state")]
	InvalidState {
		/// The node the operation was attempted on.
		node: String,
		/// A short description of the rejected operation.
		operation: String,
	},

	/// Reserved for explicit detection of forbidden re-entrancy.
	#[error("{node}: thread-safety violation: {detail}")]
	ThreadSafetyViolation {
		/// The node involved.
		node: String,
		/// Free-form detail.
		detail: String,
	},

	/// Reserved for future batched-write support; unused by the current propagation engine.
	#[error("batch operation conflict: {detail}")]
	BatchOperationConflict {
		/// Free-form detail.
		detail: String,
	},

	/// Fallback for failures that do not fit the closed taxonomy above.
	#[error("unknown reflow error: {0}")]
	Unknown(String),
}

impl ReflowError {
	pub(crate) fn cycle(source: NodeId, source_name: Option<&str>, target: NodeId, target_name: Option<&str>) -> Self {
		Self::DependencyCycle {
			source: display_node(source, source_name),
			target: display_node(target, target_name),
		}
	}

	pub(crate) fn null_access(node: NodeId, name: Option<&str>, reason: &str) -> Self {
		Self::NullAccess {
			node: display_node(node, name),
			reason: reason.to_string(),
		}
	}

	pub(crate) fn invalid_state(node: NodeId, name: Option<&str>, operation: &str) -> Self {
		Self::InvalidState {
			node: display_node(node, name),
			operation: operation.to_string(),
		}
	}
}

fn display_node(id: NodeId, name: Option<&str>) -> String {
	match name {
		Some(name) => format!("{name} ({id})"),
		None => id.to_string(),
	}
}

/// Convenience alias used throughout the crate's fallible APIs.
pub type Result<T> = std::result::Result<T, ReflowError>;
