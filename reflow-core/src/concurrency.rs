//! Auto-enabling reader-writer guards around graph mutations (§5 "Thread-safety modes").
//!
//! The substrate starts *dormant*: a process-wide latch records the first thread that
//! touches the graph and every lock acquisition made from that thread stays on
//! `parking_lot`'s uncontended fast path. The moment a second, distinct thread calls in,
//! the latch flips to *armed* permanently; from then on the same locks simply behave like
//! ordinary reader-writer locks, because a second thread means acquisitions can now
//! genuinely contend.

use std::{
	cell::Cell,
	sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
	static THIS_THREAD: Cell<u64> = Cell::new(0);
}

fn this_thread_token() -> u64 {
	THIS_THREAD.with(|slot| {
		let existing = slot.get();
		if existing != 0 {
			return existing;
		}
		let token = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
		slot.set(token);
		token
	})
}

/// 0 means "no thread has touched the graph yet".
static OWNER_THREAD: AtomicU64 = AtomicU64::new(0);

#[cfg(feature = "force_thread_safety")]
static ARMED: AtomicBool = AtomicBool::new(true);
#[cfg(not(feature = "force_thread_safety"))]
static ARMED: AtomicBool = AtomicBool::new(false);

/// Records that the calling thread is touching the graph, arming the substrate the
/// moment a second distinct thread is observed. One-way: once armed, stays armed.
pub(crate) fn touch() {
	if ARMED.load(Ordering::Acquire) {
		return;
	}
	let me = this_thread_token();
	match OWNER_THREAD.compare_exchange(0, me, Ordering::AcqRel, Ordering::Acquire) {
		Ok(_) => {}                                 // first thread to ever touch the graph
		Err(owner) if owner == me => {}              // same thread as before
		Err(_) => {
			ARMED.store(true, Ordering::Release);
			log::info!("reflow: second thread detected, concurrency substrate armed");
		}
	}
}

/// Whether the substrate has armed its guards. Exposed mainly for tests.
#[must_use]
pub fn is_armed() -> bool {
	ARMED.load(Ordering::Acquire)
}

/// A reader-writer lock that touches the dormant/armed latch on every acquisition.
///
/// While dormant, acquisitions never contend (only one thread ever calls in), so the
/// underlying `parking_lot::RwLock` fast path costs a couple of uncontended atomic ops.
/// Arming does not change how the lock behaves, only the fact that a second thread may
/// now genuinely contend for it.
pub(crate) struct AdaptiveRwLock<T> {
	inner: RwLock<T>,
}

impl<T> AdaptiveRwLock<T> {
	pub(crate) fn new(value: T) -> Self {
		Self {
			inner: RwLock::new(value),
		}
	}

	pub(crate) fn read(&self) -> RwLockReadGuard<'_, T> {
		touch();
		self.inner.read()
	}

	pub(crate) fn write(&self) -> RwLockWriteGuard<'_, T> {
		touch();
		self.inner.write()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::thread;

	#[test]
	fn arms_on_second_thread() {
		let lock = AdaptiveRwLock::new(0_u32);
		*lock.write() += 1;
		assert_eq!(*lock.read(), 1);

		thread::spawn(move || {
			*lock.write() += 1;
			assert!(is_armed());
		})
		.join()
		.unwrap();
	}
}
