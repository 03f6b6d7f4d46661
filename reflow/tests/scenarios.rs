//! End-to-end scenarios, one per numbered case.

use std::sync::{
	atomic::{AtomicUsize, Ordering},
	Arc,
};

use reflow::{action, calc, filter_trigger, var, InvalidationPolicy, ReflowError, TriggerPolicy};

#[test]
fn cycle_rejection_leaves_prior_expression_installed() {
	let a = var(1).build();
	let a_for_c = a.clone();
	let c = calc(move || a_for_c.get().unwrap() + 1).build().unwrap();
	assert_eq!(c.get().unwrap(), 2);

	let c_for_reset = c.clone();
	let a_for_reset = a.clone();
	let err = c.reset(move || c_for_reset.get().unwrap() + a_for_reset.get().unwrap()).unwrap_err();
	match err {
		ReflowError::DependencyCycle { .. } => {}
		other => panic!("expected DependencyCycle, got {other:?}"),
	}

	// The rejected `reset` must not have clobbered the previously installed expression.
	assert_eq!(c.get().unwrap(), 2);
}

#[test]
fn reset_with_same_expression_twice_is_idempotent() {
	let a = var(1).build();
	let a1 = a.clone();
	let a2 = a.clone();
	let b = calc(move || a1.get().unwrap() + 1).build().unwrap();

	let deps_before = b.dependency_ids();
	b.reset(move || a2.get().unwrap() + 1).unwrap();
	assert_eq!(b.get().unwrap(), 2);
	assert_eq!(b.dependency_ids(), deps_before);
}

#[test]
fn action_continues_running_after_upstream_closes_keep_last_sibling() {
	// A KeepLast dependent survives the closing of one upstream while the engine continues
	// to serve other still-live observers normally.
	let a = var(1).build();
	let b = var(10).build();

	let a_for_sum = a.clone();
	let b_for_sum = b.clone();
	let sum = calc(move || a_for_sum.get().unwrap() + b_for_sum.get().unwrap())
		.with_invalidation(InvalidationPolicy::KeepLast)
		.build()
		.unwrap();

	assert_eq!(sum.get().unwrap(), 11);
	a.close();
	assert_eq!(sum.get().unwrap(), 11);

	// `sum` is now an inert source; `b`'s further writes must not reach it.
	b.value(20).unwrap();
	assert_eq!(sum.get().unwrap(), 11);
}

#[test]
fn filter_trigger_suppresses_until_predicate_passes() {
	let gate = var(false).build();
	let source = var(1).build();

	let gate_weak = gate.as_node();
	let gate_for_pred = gate.clone();
	let policy: TriggerPolicy<i32> = filter_trigger(vec![gate_weak], move || gate_for_pred.get().unwrap_or(false));

	let source_for_calc = source.clone();
	let observed = Arc::new(AtomicUsize::new(0));
	let observed_for_action = Arc::clone(&observed);
	let passthrough = calc(move || source_for_calc.get().unwrap())
		.with_trigger(policy)
		.build()
		.unwrap();

	let passthrough_for_action = passthrough.clone();
	let _watcher = action(move || {
		let _ = passthrough_for_action.get();
		observed_for_action.fetch_add(1, Ordering::SeqCst);
	})
	.build()
	.unwrap();

	let before = observed.load(Ordering::SeqCst);
	source.value(2).unwrap();
	// Filter predicate still false: the wave is cut at `passthrough` before reaching the action.
	assert_eq!(observed.load(Ordering::SeqCst), before);

	gate.value(true).unwrap();
	source.value(3).unwrap();
	assert!(observed.load(Ordering::SeqCst) > before);
}

#[test]
fn constant_calc_never_reevaluates_and_has_no_dependencies() {
	let evals = Arc::new(AtomicUsize::new(0));
	let evals_for_calc = Arc::clone(&evals);
	let constant = calc(move || {
		evals_for_calc.fetch_add(1, Ordering::SeqCst);
		42
	})
	.build()
	.unwrap();

	assert_eq!(constant.get().unwrap(), 42);
	assert!(constant.dependency_ids().is_empty());
	assert_eq!(evals.load(Ordering::SeqCst), 1);

	let unrelated = var(1).build();
	unrelated.value(2).unwrap();
	assert_eq!(evals.load(Ordering::SeqCst), 1);
}

#[test]
fn panicking_computation_marks_stale_but_keeps_prior_value_and_wave_continues() {
	let a = var(1).build();
	let a_for_b = a.clone();
	let should_panic = Arc::new(std::sync::atomic::AtomicBool::new(false));
	let should_panic_for_b = Arc::clone(&should_panic);
	let b = calc(move || {
		if should_panic_for_b.load(Ordering::SeqCst) {
			panic!("synthetic failure");
		}
		a_for_b.get().unwrap() + 1
	})
	.build()
	.unwrap();

	let a_for_c = a.clone();
	let sibling_evals = Arc::new(AtomicUsize::new(0));
	let sibling_evals_for_c = Arc::clone(&sibling_evals);
	let _c = calc(move || {
		sibling_evals_for_c.fetch_add(1, Ordering::SeqCst);
		a_for_c.get().unwrap() * 10
	})
	.build()
	.unwrap();

	assert_eq!(b.get().unwrap(), 2);
	should_panic.store(true, Ordering::SeqCst);
	sibling_evals.store(0, Ordering::SeqCst);
	a.value(5).unwrap();

	// `b`'s panic is caught, marks it stale, and leaves its prior cached value intact...
	assert!(b.is_stale());
	assert_eq!(b.get().unwrap(), 2);
	// ...while the wave still reaches its sibling `c`, which does not share `b`'s failure.
	assert_eq!(sibling_evals.load(Ordering::SeqCst), 1);
}

#[test]
fn thread_safety_arming_survives_cross_thread_access() {
	let a = var(1).build();
	let a_for_thread = a.clone();

	std::thread::spawn(move || {
		a_for_thread.value(2).unwrap();
	})
	.join()
	.unwrap();

	assert!(reflow::is_armed());
	assert_eq!(a.get().unwrap(), 2);
	a.value(3).unwrap();
	assert_eq!(a.get().unwrap(), 3);
}
