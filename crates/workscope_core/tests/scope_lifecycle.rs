//! Scope lifecycle tests: join/create, save semantics, disposal protocol.

mod test_utils;

use std::sync::Arc;
use test_utils::{ProbeContext, ProbeEvent, ProbeLog, SecondProbe, probe_factory};
use workscope_core::context::IsolationLevel;
use workscope_core::error::ScopeError;
use workscope_core::factory::{ScopeFactory, ScopeOption};
use workscope_core::locator::AmbientContexts;
use workscope_core::registry::ContextRegistry;

// ─────────────────────────────────────────────────────────────────────────────
// Nesting
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn nested_scopes_share_one_collection_and_one_instance() {
    let log = ProbeLog::new();
    let factory = probe_factory(&log);

    let mut outer = factory.create(ScopeOption::JoinExisting).unwrap();
    assert!(!outer.is_nested());
    let outer_ctx = outer.context::<ProbeContext>().unwrap();

    let mut inner = factory.create(ScopeOption::JoinExisting).unwrap();
    assert!(inner.is_nested());
    let inner_ctx = inner.context::<ProbeContext>().unwrap();

    assert!(Arc::ptr_eq(&outer_ctx, &inner_ctx));
    assert_eq!(log.count(|e| matches!(e, ProbeEvent::Constructed { .. })), 1);

    outer_ctx.stage(2);

    // A nested save completes the inner scope without committing anything.
    assert_eq!(inner.save_changes().unwrap(), 0);
    assert_eq!(log.saves(), 0);
    inner.dispose().unwrap();

    // The outermost scope commits the pending changes exactly once.
    assert_eq!(outer.save_changes().unwrap(), 2);
    assert_eq!(log.saves(), 1);
    outer.dispose().unwrap();
}

#[test]
fn forced_new_scope_gets_its_own_collection() {
    let log = ProbeLog::new();
    let factory = probe_factory(&log);
    let locator = AmbientContexts::new();

    let mut outer = factory.create(ScopeOption::JoinExisting).unwrap();
    let outer_ctx = outer.context::<ProbeContext>().unwrap();

    {
        let mut forced = factory.create(ScopeOption::ForceCreateNew).unwrap();
        assert!(!forced.is_nested());
        let forced_ctx = forced.context::<ProbeContext>().unwrap();
        assert!(!Arc::ptr_eq(&outer_ctx, &forced_ctx));
        forced.save_changes().unwrap();
        forced.dispose().unwrap();
    }

    // The outer scope is ambient again after the forced scope is gone.
    let ambient_ctx = locator.get::<ProbeContext>().unwrap().unwrap();
    assert!(Arc::ptr_eq(&outer_ctx, &ambient_ctx));
    outer.save_changes().unwrap();
    outer.dispose().unwrap();
}

#[test]
fn commit_sums_across_context_types() {
    let log = ProbeLog::new();
    let factory = probe_factory(&log);

    let mut scope = factory.create(ScopeOption::JoinExisting).unwrap();
    scope.context::<ProbeContext>().unwrap().stage(2);
    scope.context::<SecondProbe>().unwrap().stage(3);

    assert_eq!(scope.save_changes().unwrap(), 5);
    assert_eq!(log.saves(), 2);
    scope.dispose().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Save usage errors
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn save_twice_is_a_usage_error() {
    let factory = probe_factory(&ProbeLog::new());

    let mut scope = factory.create(ScopeOption::JoinExisting).unwrap();
    scope.save_changes().unwrap();
    assert!(matches!(
        scope.save_changes(),
        Err(ScopeError::AlreadyCompleted)
    ));
    scope.dispose().unwrap();
}

#[test]
fn save_after_dispose_is_a_usage_error() {
    let factory = probe_factory(&ProbeLog::new());

    let mut scope = factory.create(ScopeOption::JoinExisting).unwrap();
    scope.dispose().unwrap();
    assert!(matches!(scope.save_changes(), Err(ScopeError::ScopeDisposed)));
}

#[test]
fn commit_failure_propagates_and_scope_rolls_back_on_dispose() {
    let log = ProbeLog::new();
    let factory = probe_factory(&log);

    let mut scope = factory.create(ScopeOption::JoinExisting).unwrap();
    let ctx = scope.context::<ProbeContext>().unwrap();
    ctx.fail_next_save();

    assert!(matches!(scope.save_changes(), Err(ScopeError::Context(_))));

    // The failed save left the scope not-completed, so disposal rolls back.
    scope.dispose().unwrap();
    assert_eq!(log.rollbacks(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Disposal
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn read_write_scope_dropped_unsaved_rolls_back_every_context_once() {
    let log = ProbeLog::new();
    let factory = probe_factory(&log);

    {
        let scope = factory.create(ScopeOption::JoinExisting).unwrap();
        scope.context::<ProbeContext>().unwrap().stage(1);
        scope.context::<SecondProbe>().unwrap().stage(1);
    }

    assert_eq!(log.saves(), 0);
    assert_eq!(log.rollbacks(), 2);
    assert_eq!(log.count(|e| matches!(e, ProbeEvent::Disposed)), 2);
}

#[test]
fn read_only_scope_disposed_unsaved_commits() {
    let log = ProbeLog::new();
    let factory = probe_factory(&log);

    {
        let scope = factory.create_read_only(ScopeOption::JoinExisting).unwrap();
        let ctx = scope.context::<ProbeContext>().unwrap();
        assert!(ctx.is_read_only());
    }

    // Fire-and-forget read path: auto-commit, never a rollback.
    assert_eq!(log.events(), vec![
        ProbeEvent::Constructed { read_only: true },
        ProbeEvent::Saved(0),
        ProbeEvent::Disposed,
    ]);
}

#[test]
fn dispose_is_idempotent() {
    let factory = probe_factory(&ProbeLog::new());

    let mut scope = factory.create(ScopeOption::JoinExisting).unwrap();
    scope.save_changes().unwrap();
    scope.dispose().unwrap();
    scope.dispose().unwrap();
}

#[test]
fn out_of_order_disposal_is_fatal_and_younger_scope_degrades() {
    let log = ProbeLog::new();
    let factory = probe_factory(&log);
    let locator = AmbientContexts::new();

    let mut outer = factory.create(ScopeOption::JoinExisting).unwrap();
    let mut inner = factory.create(ScopeOption::JoinExisting).unwrap();

    // Disposing the outer scope while the inner one is still ambient is a
    // fatal ordering violation, surfaced immediately.
    assert!(matches!(
        outer.dispose(),
        Err(ScopeError::OutOfOrderDisposal)
    ));

    // The inner scope's own disposal finds its captured parent already
    // disposed: reported as a diagnostic, no parent restored.
    inner.dispose().unwrap();
    assert!(!locator.has_ambient_scope());
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration errors
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn read_write_scope_cannot_join_read_only_parent() {
    let log = ProbeLog::new();
    let factory = probe_factory(&log);

    let mut outer = factory.create_read_only(ScopeOption::JoinExisting).unwrap();
    assert!(matches!(
        factory.create(ScopeOption::JoinExisting),
        Err(ScopeError::ReadWriteWithinReadOnly)
    ));

    // A read-only inner scope joins fine.
    let mut inner = factory.create_read_only(ScopeOption::JoinExisting).unwrap();
    assert!(inner.is_nested());
    inner.dispose().unwrap();
    outer.dispose().unwrap();
}

#[test]
fn unregistered_context_type_is_reported() {
    let factory = ScopeFactory::new(ContextRegistry::new());

    let mut scope = factory.create(ScopeOption::JoinExisting).unwrap();
    assert!(matches!(
        scope.context::<ProbeContext>(),
        Err(ScopeError::UnregisteredContext(_))
    ));
    scope.dispose().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Explicit isolation levels
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn isolation_scope_opens_transaction_on_first_context_access() {
    let log = ProbeLog::new();
    let factory = probe_factory(&log);

    let mut scope = factory
        .create_with_isolation(IsolationLevel::Serializable)
        .unwrap();
    assert!(!scope.is_nested());
    assert_eq!(
        log.count(|e| matches!(e, ProbeEvent::TransactionOpened(_))),
        0
    );

    scope.context::<ProbeContext>().unwrap();
    assert_eq!(
        log.count(|e| matches!(
            e,
            ProbeEvent::TransactionOpened(IsolationLevel::Serializable)
        )),
        1
    );

    scope.save_changes().unwrap();
    assert_eq!(
        log.count(|e| matches!(e, ProbeEvent::TransactionCommitted)),
        1
    );
    scope.dispose().unwrap();
}

#[test]
fn isolation_scope_dropped_unsaved_rolls_the_transaction_back() {
    let log = ProbeLog::new();
    let factory = probe_factory(&log);

    {
        let scope = factory
            .create_with_isolation(IsolationLevel::RepeatableRead)
            .unwrap();
        scope.context::<ProbeContext>().unwrap().stage(1);
    }

    assert_eq!(log.rollbacks(), 1);
    assert_eq!(
        log.count(|e| matches!(e, ProbeEvent::TransactionRolledBack)),
        1
    );
}

#[test]
fn read_only_isolation_scope_commits_on_dispose() {
    let log = ProbeLog::new();
    let factory = probe_factory(&log);

    {
        let scope = factory
            .create_read_only_with_isolation(IsolationLevel::Snapshot)
            .unwrap();
        scope.context::<ProbeContext>().unwrap();
    }

    assert_eq!(log.saves(), 1);
    assert_eq!(
        log.count(|e| matches!(e, ProbeEvent::TransactionCommitted)),
        1
    );
    assert_eq!(log.rollbacks(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Suppression
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn suppression_hides_and_restores_the_outer_scope() {
    let log = ProbeLog::new();
    let factory = probe_factory(&log);
    let locator = AmbientContexts::new();

    let mut outer = factory.create(ScopeOption::JoinExisting).unwrap();
    let outer_ctx = outer.context::<ProbeContext>().unwrap();

    {
        let _suppressed = factory.suppress_ambient();
        assert!(!locator.has_ambient_scope());

        // Work inside the suppressed region runs with its own chain.
        let mut isolated = factory.create(ScopeOption::ForceCreateNew).unwrap();
        let isolated_ctx = isolated.context::<ProbeContext>().unwrap();
        assert!(!Arc::ptr_eq(&outer_ctx, &isolated_ctx));
        isolated.save_changes().unwrap();
        isolated.dispose().unwrap();
    }

    // Immediately after release the outer scope is observable again.
    let ambient_ctx = locator.get::<ProbeContext>().unwrap().unwrap();
    assert!(Arc::ptr_eq(&outer_ctx, &ambient_ctx));
    outer.save_changes().unwrap();
    outer.dispose().unwrap();
}

#[test]
fn locator_without_ambient_scope_returns_none() {
    let locator = AmbientContexts::new();
    assert!(locator.get::<ProbeContext>().unwrap().is_none());
}
