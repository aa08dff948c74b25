//! Integration tests for the dispatch gate and transactional traversals.
//!
//! Every test drives a wrapped sequence against the in-memory manager and
//! asserts on the recorded begin/commit/rollback calls and on which staged
//! writes became visible.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use proptest::prelude::*;
use std::ops::ControlFlow;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::io;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_test::{assert_err, assert_ok};
use traverse_tx_core::attribute::{RollbackRule, TransactionAttribute};
use traverse_tx_core::context::TraverseContext;
use traverse_tx_core::error::TransactionError;
use traverse_tx_core::invocation::{MethodDescriptor, ReturnShape, Returned, TargetType};
use traverse_tx_core::traversable::{BoxTraversable, Traversable, TraverseMethod};
use traverse_tx_runtime::config::{InterceptorConfig, UnsupportedManagerPolicy};
use traverse_tx_runtime::support::{ManagerRef, TransactionManagerResolver};
use traverse_tx_testing::helpers::{drive_all, drive_take, init_test_tracing};
use traverse_tx_testing::{
    ExampleError, GateHarness, InMemoryTransactionManager, ScriptedTraversable, TransactionEvent,
    ValidationError, calls, properties,
};

fn transactional_finders() -> GateHarness {
    GateHarness::new().with_attribute("find*", TransactionAttribute::new())
}

fn wrapped<V>(returned: Returned<(), V, ExampleError>) -> BoxTraversable<V, ExampleError> {
    returned
        .into_traversable()
        .expect("gate should return a traversable")
}

fn metadata_unavailable(
    _method: &MethodDescriptor,
    _target: Option<&TargetType>,
) -> Result<Option<Arc<TransactionAttribute>>, TransactionError> {
    Err(TransactionError::AttributeResolution("metadata unavailable".to_string()))
}

#[test]
fn exhausted_traversal_commits() {
    init_test_tracing();
    let gate = transactional_finders().build();
    let entries = wrapped(assert_ok!(
        gate.invoke(calls::traversable("findEntries", ScriptedTraversable::new(vec![1, 2, 3])))
    ));
    assert_eq!(gate.manager().call_count(), 0, "nothing opens before the drive");

    let ctx = TraverseContext::new();
    let (seen, result) = drive_take(entries.as_ref(), usize::MAX, &ctx);

    assert_eq!(seen, vec![1, 2, 3]);
    assert_eq!(result, Ok(true));
    assert_eq!(gate.manager().begin_count(), 1);
    assert_eq!(gate.manager().commit_count(), 1);
    assert_eq!(gate.manager().rollback_count(), 0);
    assert_eq!(ctx.releases(), 1);
    assert_eq!(ctx.depth(), 0);
}

#[test]
fn transaction_is_labelled_with_target_qualified_name() {
    let gate = transactional_finders().build();
    let entries = wrapped(assert_ok!(
        gate.invoke(calls::traversable("findEntries", ScriptedTraversable::new(vec![1])))
    ));

    let _ = drive_all(entries.as_ref());

    let events = gate.manager().events();
    assert!(matches!(
        events.first(),
        Some(TransactionEvent::Begin { label, .. }) if label == "InMemoryLedgerRepository.findEntries"
    ));
}

#[test]
fn attribute_name_overrides_label() {
    let gate = GateHarness::new()
        .with_attribute("find*", TransactionAttribute::new().with_name("ledger-export"))
        .build();
    let entries = wrapped(assert_ok!(
        gate.invoke(calls::traversable("findEntries", ScriptedTraversable::new(vec![1])))
    ));

    let _ = drive_all(entries.as_ref());

    assert!(matches!(
        gate.manager().events().first(),
        Some(TransactionEvent::Begin { label, .. }) if label == "ledger-export"
    ));
}

#[test]
fn early_stop_rolls_back() {
    let gate = transactional_finders().build();
    let scripted = ScriptedTraversable::new(vec![1, 2, 3]);
    let produced = scripted.produced_counter();
    let entries = wrapped(assert_ok!(gate.invoke(calls::traversable("findEntries", scripted))));

    let ctx = TraverseContext::new();
    let (seen, result) = drive_take(entries.as_ref(), 1, &ctx);

    assert_eq!(seen, vec![1]);
    assert_eq!(result, Ok(false));
    assert_eq!(produced.load(Ordering::SeqCst), 1);
    assert_eq!(gate.manager().commit_count(), 0);
    assert_eq!(gate.manager().rollback_count(), 1);
    assert_eq!(ctx.releases(), 1);
}

#[test]
fn production_error_rolls_back_and_is_returned_verbatim() {
    let gate = transactional_finders().build();
    let entries = wrapped(assert_ok!(gate.invoke(calls::traversable(
        "findEntries",
        ScriptedTraversable::new(vec![1, 2, 3]).fail_after(2),
    ))));

    let ctx = TraverseContext::new();
    let (seen, result) = drive_take(entries.as_ref(), usize::MAX, &ctx);

    assert_eq!(seen, vec![1, 2]);
    assert_eq!(result, Err(ExampleError::Production { after: 2 }));
    assert_eq!(gate.manager().commit_count(), 0);
    assert_eq!(gate.manager().rollback_count(), 1);
    assert_eq!(ctx.releases(), 1);
}

#[test]
fn no_rollback_rule_commits_despite_error() {
    let gate = GateHarness::new()
        .with_attribute(
            "find*",
            TransactionAttribute::new().with_rule(RollbackRule::no_rollback_for::<ValidationError>()),
        )
        .build();
    let entries = wrapped(assert_ok!(gate.invoke(calls::traversable(
        "findEntries",
        ScriptedTraversable::new(vec![1, 2, 3]).reject_after(1),
    ))));

    let (seen, result) = drive_all(entries.as_ref());

    assert_eq!(seen, vec![1]);
    assert!(matches!(result, Err(ExampleError::Rejected(_))));
    assert_eq!(gate.manager().commit_count(), 1);
    assert_eq!(gate.manager().rollback_count(), 0);
}

#[test]
fn shallowest_matching_rule_wins() {
    let gate = GateHarness::new()
        .with_attribute(
            "find*",
            TransactionAttribute::new()
                .with_rule(RollbackRule::no_rollback_for::<ExampleError>())
                .with_rule(RollbackRule::rollback_for::<ValidationError>()),
        )
        .build();
    let entries = wrapped(assert_ok!(gate.invoke(calls::traversable(
        "findEntries",
        ScriptedTraversable::new(vec![1, 2]).reject_after(0),
    ))));

    let (_, result) = drive_all(entries.as_ref());

    assert_err!(result);
    // ExampleError matches at depth 0, ValidationError only at depth 1
    assert_eq!(gate.manager().commit_count(), 1);
}

#[test]
fn writes_become_visible_only_on_commit() {
    let gate = transactional_finders().build();
    let manager = gate.manager().clone();
    let writer = move |n: &u32, ctx: &TraverseContext| {
        manager
            .write(ctx, format!("entry-{n}"), n.to_string())
            .map_err(ExampleError::from)
    };

    let entries = wrapped(assert_ok!(gate.invoke(calls::traversable(
        "findEntries",
        ScriptedTraversable::new(vec![1, 2, 3]).with_hook(writer.clone()),
    ))));
    let stopped = wrapped(assert_ok!(gate.invoke(calls::traversable(
        "findPending",
        ScriptedTraversable::new(vec![4, 5, 6]).with_hook(writer),
    ))));

    let (_, result) = drive_take(stopped.as_ref(), 2, &TraverseContext::new());
    assert_eq!(result, Ok(false));
    assert_eq!(gate.manager().committed_len(), 0);

    let (_, result) = drive_all(entries.as_ref());
    assert_eq!(result, Ok(true));
    assert_eq!(gate.manager().committed_len(), 3);
    assert_eq!(gate.manager().committed("entry-2"), Some("2".to_string()));
    assert_eq!(gate.manager().committed("entry-4"), None);
}

#[test]
fn elements_see_the_bound_transaction() {
    let gate = transactional_finders().build();
    let entries = wrapped(assert_ok!(
        gate.invoke(calls::traversable("findEntries", ScriptedTraversable::new(vec![1, 2])))
    ));

    let ctx = TraverseContext::new();
    assert!(ctx.current_transaction().is_none());

    let mut bound = Vec::new();
    let result = entries.sequence(
        &mut |_| {
            bound.push(ctx.current_transaction());
            ControlFlow::Continue(())
        },
        &ctx,
    );

    assert_eq!(result, Ok(true));
    assert_eq!(bound.len(), 2);
    assert!(bound.iter().all(|tx| tx.as_ref().is_some_and(|tx| tx.is_transactional())));
    assert!(ctx.current_transaction().is_none());
}

#[test]
fn each_drive_gets_its_own_transaction() {
    let gate = transactional_finders().build();
    let entries = wrapped(assert_ok!(
        gate.invoke(calls::traversable("findEntries", ScriptedTraversable::new(vec![1, 2])))
    ));

    let _ = drive_all(entries.as_ref());
    let _ = drive_take(entries.as_ref(), 1, &TraverseContext::new());

    assert_eq!(gate.manager().begin_count(), 2);
    assert_eq!(gate.manager().commit_count(), 1);
    assert_eq!(gate.manager().rollback_count(), 1);
}

#[test]
fn parallel_request_is_driven_sequentially() {
    let gate = transactional_finders().build();
    let entries = wrapped(assert_ok!(
        gate.invoke(calls::traversable("findEntries", ScriptedTraversable::new(vec![1, 2, 3])))
    ));

    let ctx = TraverseContext::new();
    for _ in 0..2 {
        let mut seen = Vec::new();
        let result = entries.traverse(
            TraverseMethod::Parallel,
            &mut |n| {
                seen.push(n);
                ControlFlow::Continue(())
            },
            &ctx,
        );
        assert_eq!(result, Ok(true));
        assert_eq!(seen, vec![1, 2, 3]);
    }
    assert_eq!(gate.manager().commit_count(), 2);
}

#[test]
fn panic_releases_binding_and_rolls_back() {
    init_test_tracing();
    let gate = transactional_finders().build();
    let entries = wrapped(assert_ok!(gate.invoke(calls::traversable(
        "findEntries",
        ScriptedTraversable::new(vec![1, 2, 3]).panic_after(1),
    ))));

    let ctx = TraverseContext::new();
    let outcome = catch_unwind(AssertUnwindSafe(|| drive_take(entries.as_ref(), usize::MAX, &ctx)));

    assert!(outcome.is_err());
    assert_eq!(ctx.depth(), 0);
    assert_eq!(ctx.releases(), 1);
    assert_eq!(gate.manager().rollback_count(), 1);
    assert_eq!(gate.manager().active_count(), 0);
}

#[test]
fn non_transactional_method_never_calls_manager() {
    let gate = transactional_finders().build();
    let entries = wrapped(assert_ok!(
        gate.invoke(calls::traversable("listEntries", ScriptedTraversable::new(vec![1, 2])))
    ));

    let ctx = TraverseContext::new();
    let (seen, result) = drive_take(entries.as_ref(), usize::MAX, &ctx);

    assert_eq!(seen, vec![1, 2]);
    assert_eq!(result, Ok(true));
    assert_eq!(gate.manager().call_count(), 0);
    assert_eq!(gate.delegated(), 0);
    assert_eq!(ctx.releases(), 1);
}

#[test]
fn absent_result_opens_no_transaction() {
    let gate = transactional_finders().build();
    let returned = assert_ok!(gate.invoke(calls::absent::<u32>("findEntries")));

    assert!(returned.is_absent());
    assert_eq!(gate.manager().call_count(), 0);
}

#[test]
fn absent_emittable_opens_no_transaction() {
    let gate = GateHarness::new()
        .with_attribute("stream*", TransactionAttribute::new())
        .build();
    let returned = assert_ok!(gate.invoke(calls::absent_emittable::<u32>("streamEntries")));

    assert!(returned.is_absent());
    assert!(matches!(returned, Returned::Emittable(None)));
    assert_eq!(gate.manager().call_count(), 0);
}

#[test]
fn immediate_method_is_delegated() {
    let gate = GateHarness::new()
        .with_attribute("count*", TransactionAttribute::new())
        .build();

    let returned = assert_ok!(gate.invoke(calls::immediate("countEntries", 3_u64)));

    assert_eq!(returned.into_value(), Some(3));
    assert_eq!(gate.delegated(), 1);
    assert_eq!(gate.manager().begin_count(), 1);
    assert_eq!(gate.manager().commit_count(), 1);
}

#[test]
fn immediate_method_error_is_rolled_back_by_delegate() {
    let gate = GateHarness::new()
        .with_attribute("count*", TransactionAttribute::new())
        .build();

    let result = gate.invoke(calls::custom::<u64, (), _>(
        MethodDescriptor::immediate("LedgerRepository", "countEntries"),
        || Err(ExampleError::Target("ledger offline".to_string())),
    ));

    assert_eq!(result.err(), Some(ExampleError::Target("ledger offline".to_string())));
    assert_eq!(gate.manager().rollback_count(), 1);
}

#[test]
fn target_error_propagates_without_transaction() {
    let gate = transactional_finders().build();

    let result = gate.invoke(calls::custom::<(), u32, _>(
        MethodDescriptor::traversable("LedgerRepository", "findEntries"),
        || Err(ExampleError::Target("ledger offline".to_string())),
    ));

    assert!(matches!(result, Err(ExampleError::Target(_))));
    assert_eq!(gate.manager().call_count(), 0);
}

#[test]
fn attribute_resolution_error_propagates_before_target_runs() {
    let invoked = Arc::new(AtomicBool::new(false));
    let gate = GateHarness::new()
        .with_source(Arc::new(metadata_unavailable))
        .build();

    let flag = Arc::clone(&invoked);
    let result = gate.invoke(calls::custom::<(), u32, _>(
        MethodDescriptor::traversable("LedgerRepository", "findEntries"),
        move || {
            flag.store(true, Ordering::SeqCst);
            Ok(Returned::Traversable(None))
        },
    ));

    assert!(matches!(
        result,
        Err(ExampleError::Transaction(TransactionError::AttributeResolution(_)))
    ));
    assert!(!invoked.load(Ordering::SeqCst));
}

#[test]
fn declared_shape_mismatch_is_an_error() {
    let gate = transactional_finders().build();

    let result = gate.invoke(calls::custom::<(), u32, _>(
        MethodDescriptor::emittable("LedgerRepository", "findEntries"),
        || {
            let raw: BoxTraversable<u32, ExampleError> = Box::new(ScriptedTraversable::new(vec![1]));
            Ok(Returned::Traversable(Some(raw)))
        },
    ));

    match result {
        Err(ExampleError::Transaction(TransactionError::ReturnShapeMismatch {
            declared, actual, ..
        })) => {
            assert_eq!(declared, ReturnShape::Emittable);
            assert_eq!(actual, ReturnShape::Traversable);
        }
        other => panic!("expected a shape mismatch, got {other:?}"),
    }
}

#[test]
fn qualifier_selects_named_manager() {
    let primary = InMemoryTransactionManager::with_name("primary");
    let reporting = InMemoryTransactionManager::with_name("reporting");
    let gate = GateHarness::new()
        .with_attribute("find*", TransactionAttribute::new().with_qualifier("reporting"))
        .with_resolver(
            TransactionManagerResolver::new()
                .with_default(ManagerRef::platform(primary.clone()))
                .with_named("reporting", ManagerRef::platform(reporting.clone())),
        )
        .build();

    let entries = wrapped(assert_ok!(
        gate.invoke(calls::traversable("findEntries", ScriptedTraversable::new(vec![1])))
    ));
    let _ = drive_all(entries.as_ref());

    assert_eq!(reporting.commit_count(), 1);
    assert_eq!(primary.call_count(), 0);
}

#[test]
fn unknown_qualifier_is_rejected() {
    let gate = GateHarness::new()
        .with_attribute("find*", TransactionAttribute::new().with_qualifier("archive"))
        .build();

    let result = gate.invoke(calls::traversable("findEntries", ScriptedTraversable::new(vec![1])));

    assert!(matches!(
        result,
        Err(ExampleError::Transaction(TransactionError::NoSuchManager(q))) if q == "archive"
    ));
}

#[test]
fn reject_policy_never_invokes_target() {
    let invoked = Arc::new(AtomicBool::new(false));
    let gate = transactional_finders()
        .with_resolver(
            TransactionManagerResolver::new().with_default(ManagerRef::opaque("reactiveTransactionManager")),
        )
        .with_config(
            InterceptorConfig::builder()
                .unsupported_manager(UnsupportedManagerPolicy::Reject)
                .build(),
        )
        .build();

    let flag = Arc::clone(&invoked);
    let result = gate.invoke(calls::custom::<(), u32, _>(
        MethodDescriptor::traversable("LedgerRepository", "findEntries"),
        move || {
            flag.store(true, Ordering::SeqCst);
            Ok(Returned::Traversable(None))
        },
    ));

    assert!(matches!(
        result,
        Err(ExampleError::Transaction(TransactionError::UnsupportedManager { manager, .. }))
            if manager == "reactiveTransactionManager"
    ));
    assert!(!invoked.load(Ordering::SeqCst));
    assert_eq!(gate.delegated(), 0);
}

#[test]
fn delegate_policy_hands_lazy_call_to_delegate() {
    let gate = transactional_finders()
        .with_resolver(TransactionManagerResolver::new())
        .build();

    let returned = assert_ok!(
        gate.invoke(calls::traversable("findEntries", ScriptedTraversable::new(vec![1, 2])))
    );
    assert_eq!(gate.delegated(), 1);

    // Without a manager the delegate runs the target without a transaction
    let (seen, result) = drive_all(wrapped(returned).as_ref());
    assert_eq!(seen, vec![1, 2]);
    assert_eq!(result, Ok(true));
}

#[test]
fn reject_policy_without_any_manager() {
    let gate = transactional_finders()
        .with_resolver(TransactionManagerResolver::new())
        .with_config(
            InterceptorConfig::builder()
                .unsupported_manager(UnsupportedManagerPolicy::Reject)
                .build(),
        )
        .build();

    let result = gate.invoke(calls::traversable("findEntries", ScriptedTraversable::new(vec![1])));

    assert!(matches!(
        result,
        Err(ExampleError::Transaction(TransactionError::UnsupportedManager { manager, .. }))
            if manager == "<none>"
    ));
}

#[test]
fn commit_failure_surfaces_after_elements() {
    let gate = transactional_finders().build();
    gate.manager().fail_commits(true);
    let entries = wrapped(assert_ok!(
        gate.invoke(calls::traversable("findEntries", ScriptedTraversable::new(vec![1, 2])))
    ));

    let (seen, result) = drive_all(entries.as_ref());

    assert_eq!(seen, vec![1, 2]);
    assert!(matches!(
        result,
        Err(ExampleError::Transaction(TransactionError::CommitFailed { .. }))
    ));
}

#[test]
fn rollback_failure_keeps_production_error() {
    let gate = transactional_finders().build();
    gate.manager().fail_rollbacks(true);
    let entries = wrapped(assert_ok!(gate.invoke(calls::traversable(
        "findEntries",
        ScriptedTraversable::new(vec![1, 2]).fail_after(1),
    ))));

    let (_, result) = drive_all(entries.as_ref());

    assert_eq!(result, Err(ExampleError::Production { after: 1 }));
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn rollback_failure_is_logged_and_application_error_returned() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();

    let gate = transactional_finders().build();
    gate.manager().fail_rollbacks(true);
    let entries = wrapped(assert_ok!(gate.invoke(calls::traversable(
        "findEntries",
        ScriptedTraversable::new(vec![1, 2]).fail_after(1),
    ))));

    let (_, result) = tracing::subscriber::with_default(subscriber, || drive_all(entries.as_ref()));

    assert_eq!(result, Err(ExampleError::Production { after: 1 }));
    let output = logs.contents();
    assert!(output.contains("Rollback failed after application error, returning the application error"));
    assert!(!output.contains("overridden"));
}

#[test]
fn rollback_failure_after_early_stop_is_returned() {
    let gate = transactional_finders().build();
    gate.manager().fail_rollbacks(true);
    let entries = wrapped(assert_ok!(
        gate.invoke(calls::traversable("findEntries", ScriptedTraversable::new(vec![1, 2])))
    ));

    let (_, result) = drive_take(entries.as_ref(), 1, &TraverseContext::new());

    assert!(matches!(
        result,
        Err(ExampleError::Transaction(TransactionError::RollbackFailed { .. }))
    ));
}

proptest! {
    #[test]
    fn any_attribute_commits_on_exhaustion_and_rolls_back_on_stop(
        attribute in properties::attribute(),
        len in 1usize..8,
        stop in 1usize..8,
    ) {
        let gate = GateHarness::new().with_attribute("find*", attribute).build();
        let items: Vec<usize> = (0..len).collect();

        let entries = wrapped(gate.invoke(calls::traversable("findEntries", ScriptedTraversable::new(items.clone()))).unwrap());
        let (seen, result) = drive_all(entries.as_ref());
        prop_assert_eq!(seen, items);
        prop_assert_eq!(result, Ok(true));
        prop_assert_eq!(gate.manager().commit_count(), 1);

        let (seen, result) = drive_take(entries.as_ref(), stop, &TraverseContext::new());
        let exhausted = stop > len;
        prop_assert_eq!(seen.len(), stop.min(len));
        prop_assert_eq!(result, Ok(exhausted));
        prop_assert_eq!(gate.manager().commit_count(), if exhausted { 2 } else { 1 });
        prop_assert_eq!(gate.manager().rollback_count(), usize::from(!exhausted));
        prop_assert_eq!(gate.manager().active_count(), 0);
    }
}
