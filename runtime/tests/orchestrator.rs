//! Integration tests for the lifecycle orchestrator
//!
//! Runs orchestrated operations against a recording `MockHost` and checks the
//! notifications, the resulting state and the values callers observe.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use async_lifecycle_core::{
    AsyncActionState, ErrorInfo, Host, FailureValue, LifecycleStatus, OperationKey, SimpleAction,
    StatusRecord, selectors,
};
use async_lifecycle_runtime::{AsyncActionOptions, AsyncError, Orchestrator};
use async_lifecycle_testing::{ManualClock, MockHost};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

type TestHost = MockHost<SimpleAction, String>;

#[derive(Debug, thiserror::Error)]
#[error("BOOM")]
struct Boom;

fn some_action() -> SimpleAction {
    SimpleAction::new("SOME_ACTION")
}

fn with_id() -> AsyncActionOptions {
    AsyncActionOptions::new().with_identifier("anIdentifier")
}

fn setup() -> (Orchestrator<String, ManualClock>, TestHost, ManualClock) {
    let clock = ManualClock::default();
    let orchestrator = Orchestrator::new(clock.clone());
    let host = MockHost::with_clock((), clock.clone());
    (orchestrator, host, clock)
}

/// Counts invocations and answers with the invocation number
#[derive(Clone, Default)]
struct Backend {
    calls: Arc<AtomicUsize>,
}

impl Backend {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fetch(&self, delay: Duration) -> impl Future<Output = Result<String, Boom>> + Send + use<> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            tokio::time::sleep(delay).await;
            Ok(format!("response #{call}"))
        }
    }

    fn fail(&self) -> impl Future<Output = Result<String, Boom>> + Send + use<> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Err(Boom)
        }
    }
}

// ============================================================================
// Notification sequence
// ============================================================================

#[tokio::test]
async fn test_success_dispatches_pending_then_complete() {
    let (orchestrator, host, _) = setup();

    let value = orchestrator
        .begin_operation(
            some_action(),
            |_host: TestHost| async { Ok::<_, FailureValue>("a payload".to_owned()) },
            with_id(),
        )
        .run(host.clone())
        .await
        .unwrap();

    assert_eq!(value, "a payload");
    let wire: Vec<_> = host
        .dispatched()
        .iter()
        .map(|n| serde_json::to_value(n).unwrap())
        .collect();
    assert_eq!(
        wire,
        vec![
            json!({
                "type": "SOME_ACTION",
                "payload": null,
                "error": null,
                "meta": { "status": "ASYNC_PENDING", "identifier": "anIdentifier" },
            }),
            json!({
                "type": "SOME_ACTION",
                "payload": "a payload",
                "error": null,
                "meta": { "status": "ASYNC_COMPLETE", "identifier": "anIdentifier" },
            }),
        ]
    );

    let state = host.state();
    assert!(!selectors::is_pending(&state, "SOME_ACTION", Some("anIdentifier"), true));
    assert!(state.record("SOME_ACTION", Some("anIdentifier")).is_some_and(|r| r.completed));
    assert_eq!(orchestrator.in_flight_count(), 0);
}

#[tokio::test]
async fn test_failure_dispatches_failed_and_returns_original_error() {
    let (orchestrator, host, _) = setup();

    let error = orchestrator
        .begin_operation(some_action(), |_host: TestHost| async { Err::<String, _>(Boom) }, with_id())
        .run(host.clone())
        .await
        .unwrap_err();

    let failure = error.failure().expect("operation failure");
    assert!(failure.downcast_ref::<Boom>().is_some());

    assert_eq!(host.statuses(), vec![LifecycleStatus::Pending, LifecycleStatus::Failed]);
    let failed = serde_json::to_value(&host.dispatched()[1]).unwrap();
    assert_eq!(
        failed["error"],
        json!({ "name": "Boom", "message": "BOOM", "stack": "Boom: BOOM" })
    );

    let recorded = selectors::error(&host.state(), "SOME_ACTION", Some("anIdentifier")).unwrap();
    assert_eq!(recorded.name, "Boom");
    assert_eq!(recorded.message, "BOOM");
    assert_eq!(orchestrator.in_flight_count(), 0);
}

#[tokio::test]
async fn test_non_error_failure_normalises_to_unknown() {
    let (orchestrator, host, _) = setup();

    let error = orchestrator
        .begin_operation(
            some_action(),
            |_host: TestHost| async {
                Err::<String, _>(FailureValue::value("a am a string not an error silly!"))
            },
            AsyncActionOptions::new(),
        )
        .run(host.clone())
        .await
        .unwrap_err();

    assert_eq!(
        error,
        AsyncError::Operation(FailureValue::value("a am a string not an error silly!"))
    );
    assert_eq!(
        selectors::error(&host.state(), "SOME_ACTION", None),
        Some(ErrorInfo::unknown())
    );
}

// ============================================================================
// Deduplication
// ============================================================================

#[tokio::test]
async fn test_already_pending_key_is_deduped_without_invoking_operation() {
    let (orchestrator, host, _) = setup();
    host.given_state(AsyncActionState::new().with_record(
        "SOME_ACTION",
        Some("anIdentifier"),
        StatusRecord::pending(),
    ));
    let backend = Backend::default();

    let operation_backend = backend.clone();
    let result = orchestrator
        .begin_operation(
            some_action(),
            move |_host: TestHost| operation_backend.fetch(Duration::ZERO),
            with_id(),
        )
        .run(host.clone())
        .await;

    assert_eq!(host.statuses(), vec![LifecycleStatus::Deduped]);
    let notification = serde_json::to_value(&host.dispatched()[0]).unwrap();
    assert_eq!(notification["payload"], json!(null));
    assert_eq!(notification["error"], json!(null));
    assert_eq!(backend.calls(), 0);
    assert_eq!(
        result,
        Err(AsyncError::NotInFlight(OperationKey::new("SOME_ACTION", Some("anIdentifier"))))
    );
}

#[tokio::test]
async fn test_concurrent_calls_share_one_invocation() {
    let (orchestrator, host, _) = setup();
    let backend = Backend::default();

    let call = |backend: Backend| {
        orchestrator
            .begin_operation(
                some_action(),
                move |_host: TestHost| backend.fetch(Duration::from_millis(20)),
                with_id(),
            )
            .run(host.clone())
    };

    let (first, second, third) = tokio::join!(
        call(backend.clone()),
        call(backend.clone()),
        call(backend.clone())
    );

    assert_eq!(backend.calls(), 1);
    assert_eq!(first.unwrap(), "response #1");
    assert_eq!(second.unwrap(), "response #1");
    assert_eq!(third.unwrap(), "response #1");
    assert_eq!(
        host.statuses(),
        vec![
            LifecycleStatus::Pending,
            LifecycleStatus::Deduped,
            LifecycleStatus::Deduped,
            LifecycleStatus::Complete,
        ]
    );
    assert_eq!(orchestrator.in_flight_count(), 0);
}

#[tokio::test]
async fn test_deduped_callers_share_the_failure() {
    let (orchestrator, host, _) = setup();
    let backend = Backend::default();

    let call = |backend: Backend| {
        orchestrator
            .begin_operation(some_action(), move |_host: TestHost| backend.fail(), with_id())
            .run(host.clone())
    };

    let (first, second) = tokio::join!(call(backend.clone()), call(backend.clone()));

    assert_eq!(backend.calls(), 1);
    assert!(first.unwrap_err().failure().is_some_and(|f| f.downcast_ref::<Boom>().is_some()));
    assert!(second.unwrap_err().failure().is_some_and(|f| f.downcast_ref::<Boom>().is_some()));
    assert_eq!(
        host.statuses(),
        vec![LifecycleStatus::Pending, LifecycleStatus::Deduped, LifecycleStatus::Failed]
    );
}

#[tokio::test]
async fn test_different_identifiers_run_independently() {
    let (orchestrator, host, _) = setup();
    let backend = Backend::default();

    let call = |id: &str, backend: Backend| {
        orchestrator
            .begin_operation(
                some_action(),
                move |_host: TestHost| backend.fetch(Duration::from_millis(5)),
                AsyncActionOptions::new().with_identifier(id),
            )
            .run(host.clone())
    };

    let (a, b) = tokio::join!(call("a", backend.clone()), call("b", backend.clone()));

    assert_eq!(backend.calls(), 2);
    assert_ne!(a.unwrap(), b.unwrap());
}

#[tokio::test]
async fn test_stale_settlement_keeps_newer_in_flight_entry() {
    let (orchestrator, host, _) = setup();
    let backend = Backend::default();

    let call = |delay_ms: u64| {
        let backend = backend.clone();
        orchestrator
            .begin_operation(
                some_action(),
                move |_host: TestHost| backend.fetch(Duration::from_millis(delay_ms)),
                with_id(),
            )
            .run(host.clone())
    };

    let mut first = Box::pin(call(20));
    assert!(futures::poll!(&mut first).is_pending());

    orchestrator
        .reset_operation(&host, some_action(), Some("anIdentifier"))
        .unwrap();

    let mut second = Box::pin(call(80));
    assert!(futures::poll!(&mut second).is_pending());
    assert_eq!(backend.calls(), 2);

    assert_eq!(first.await.unwrap(), "response #1");
    assert!(orchestrator.is_in_flight("SOME_ACTION", Some("anIdentifier")));

    assert_eq!(second.await.unwrap(), "response #2");
    assert_eq!(orchestrator.in_flight_count(), 0);
}

#[tokio::test]
async fn test_operation_completes_after_caller_stops_waiting() {
    let (orchestrator, host, _) = setup();
    let backend = Backend::default();

    let operation_backend = backend.clone();
    let mut call = tokio_test::task::spawn(
        orchestrator
            .begin_operation(
                some_action(),
                move |_host: TestHost| operation_backend.fetch(Duration::from_millis(10)),
                with_id(),
            )
            .run(host.clone()),
    );
    tokio_test::assert_pending!(call.poll());
    drop(call);

    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(host.statuses(), vec![LifecycleStatus::Pending, LifecycleStatus::Complete]);
    assert_eq!(orchestrator.in_flight_count(), 0);
}

// ============================================================================
// Caching
// ============================================================================

async fn fetch_cached(
    orchestrator: &Orchestrator<String, ManualClock>,
    host: &TestHost,
    backend: &Backend,
    options: AsyncActionOptions,
) -> String {
    let backend = backend.clone();
    orchestrator
        .begin_operation(
            some_action(),
            move |_host: TestHost| backend.fetch(Duration::ZERO),
            options,
        )
        .run(host.clone())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_cached_response_is_served_without_invoking_operation() {
    let (orchestrator, host, _) = setup();
    let backend = Backend::default();
    let cached = with_id().with_cache(true);

    assert_eq!(fetch_cached(&orchestrator, &host, &backend, cached.clone()).await, "response #1");
    assert_eq!(fetch_cached(&orchestrator, &host, &backend, cached.clone()).await, "response #1");

    assert_eq!(backend.calls(), 1);
    assert_eq!(
        host.statuses(),
        vec![LifecycleStatus::Pending, LifecycleStatus::Complete, LifecycleStatus::Cached]
    );
    let complete = serde_json::to_value(&host.dispatched()[1]).unwrap();
    assert_eq!(
        complete["meta"],
        json!({ "status": "ASYNC_COMPLETE", "identifier": "anIdentifier", "cache": true })
    );
    let hit = serde_json::to_value(&host.dispatched()[2]).unwrap();
    assert_eq!(hit["payload"], json!("response #1"));
}

#[tokio::test]
async fn test_overwrite_cache_forces_a_new_invocation() {
    let (orchestrator, host, _) = setup();
    let backend = Backend::default();
    let cached = with_id().with_cache(true);

    fetch_cached(&orchestrator, &host, &backend, cached.clone()).await;
    let refreshed =
        fetch_cached(&orchestrator, &host, &backend, cached.clone().with_overwrite_cache(true)).await;

    assert_eq!(refreshed, "response #2");
    assert_eq!(fetch_cached(&orchestrator, &host, &backend, cached).await, "response #2");
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_ttl_expiry_is_strict() {
    let (orchestrator, host, clock) = setup();
    let backend = Backend::default();
    let cached = with_id().with_cache(true).with_ttl_seconds(60);

    fetch_cached(&orchestrator, &host, &backend, cached.clone()).await;

    clock.advance_seconds(59);
    assert_eq!(fetch_cached(&orchestrator, &host, &backend, cached.clone()).await, "response #1");

    clock.advance_seconds(1);
    assert_eq!(fetch_cached(&orchestrator, &host, &backend, cached.clone()).await, "response #2");
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_without_cache_option_nothing_is_cached() {
    let (orchestrator, host, _) = setup();
    let backend = Backend::default();

    fetch_cached(&orchestrator, &host, &backend, with_id()).await;
    fetch_cached(&orchestrator, &host, &backend, with_id().with_cache(true)).await;

    assert_eq!(backend.calls(), 2);
}

// ============================================================================
// Dispatch failures
// ============================================================================

#[tokio::test]
async fn test_complete_dispatch_failure_propagates_and_unregisters() {
    let (orchestrator, host, _) = setup();
    host.fail_dispatch_on(LifecycleStatus::Complete);

    let error = orchestrator
        .begin_operation(
            some_action(),
            |_host: TestHost| async { Ok::<_, Boom>("fine".to_owned()) },
            with_id(),
        )
        .run(host.clone())
        .await
        .unwrap_err();

    assert!(matches!(error, AsyncError::Dispatch(_)));
    assert_eq!(host.statuses(), vec![LifecycleStatus::Pending, LifecycleStatus::Complete]);
    assert_eq!(orchestrator.in_flight_count(), 0);
}

#[tokio::test]
async fn test_failed_dispatch_failure_masks_operation_error() {
    let (orchestrator, host, _) = setup();
    host.fail_dispatch_on(LifecycleStatus::Failed);

    let error = orchestrator
        .begin_operation(some_action(), |_host: TestHost| async { Err::<String, _>(Boom) }, with_id())
        .run(host.clone())
        .await
        .unwrap_err();

    assert_eq!(
        error,
        AsyncError::Dispatch(async_lifecycle_core::DispatchError::Rejected(
            "listener rejected ASYNC_FAILED".to_owned()
        ))
    );
    assert_eq!(orchestrator.in_flight_count(), 0);
}

#[tokio::test]
async fn test_pending_dispatch_failure_does_not_invoke_operation() {
    let (orchestrator, host, _) = setup();
    host.fail_dispatch_on(LifecycleStatus::Pending);
    let backend = Backend::default();

    let operation_backend = backend.clone();
    let result = orchestrator
        .begin_operation(
            some_action(),
            move |_host: TestHost| operation_backend.fetch(Duration::ZERO),
            with_id(),
        )
        .run(host.clone())
        .await;

    assert!(matches!(result, Err(AsyncError::Dispatch(_))));
    assert_eq!(backend.calls(), 0);
    assert_eq!(orchestrator.in_flight_count(), 0);
}

// ============================================================================
// Host access and reset
// ============================================================================

#[derive(Debug)]
struct Api {
    greeting: &'static str,
}

#[tokio::test]
async fn test_operation_receives_extra_argument_and_state() {
    let orchestrator: Orchestrator<String> = Orchestrator::default();
    let host: MockHost<SimpleAction, String, Api> = MockHost::new(Api { greeting: "hello" });

    let value = orchestrator
        .begin_operation(
            SimpleAction::new("GREET"),
            |host: MockHost<SimpleAction, String, Api>| {
                let pending = host.with_state(|s| selectors::is_pending(s, "GREET", None, false));
                let greeting = host.extra().greeting;
                async move { Ok::<_, Boom>(format!("{greeting} (pending: {pending})")) }
            },
            AsyncActionOptions::new(),
        )
        .run(host.clone())
        .await
        .unwrap();

    assert_eq!(value, "hello (pending: true)");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_operation_can_query_its_orchestrator() {
    let (orchestrator, host, _) = setup();
    let inner = orchestrator.clone();

    let task = tokio::spawn(
        orchestrator
            .begin_operation(
                some_action(),
                move |_host: TestHost| {
                    let in_flight = inner.in_flight_count();
                    let registered = inner.is_in_flight("SOME_ACTION", Some("anIdentifier"));
                    async move { Ok::<_, Boom>(format!("{in_flight} {registered}")) }
                },
                with_id(),
            )
            .run(host.clone()),
    );

    let value = tokio::time::timeout(Duration::from_secs(3), task)
        .await
        .expect("operation must not block on the in-flight table")
        .unwrap()
        .unwrap();

    assert_eq!(value, "1 true");
    assert_eq!(orchestrator.in_flight_count(), 0);
}

#[tokio::test]
async fn test_reset_removes_the_record() {
    let (orchestrator, host, _) = setup();
    let backend = Backend::default();

    fetch_cached(&orchestrator, &host, &backend, with_id().with_cache(true)).await;
    orchestrator
        .reset_operation(&host, some_action(), Some("anIdentifier"))
        .unwrap();

    assert_eq!(host.statuses().last(), Some(&LifecycleStatus::Reset));
    assert!(host.state().is_empty());
    // Unknown again, so the default is returned.
    assert!(selectors::is_pending(&host.state(), "SOME_ACTION", Some("anIdentifier"), true));

    // With the cache gone the next call runs the operation again.
    fetch_cached(&orchestrator, &host, &backend, with_id().with_cache(true)).await;
    assert_eq!(backend.calls(), 2);
}

#[test]
fn test_runs_without_a_tokio_runtime() {
    let (orchestrator, host, _) = setup();

    let value = futures::executor::block_on(
        orchestrator
            .begin_operation(
                some_action(),
                |_host: TestHost| async { Ok::<_, Boom>("sync world".to_owned()) },
                AsyncActionOptions::new(),
            )
            .run(host.clone()),
    )
    .unwrap();

    assert_eq!(value, "sync world");
    assert_eq!(host.statuses(), vec![LifecycleStatus::Pending, LifecycleStatus::Complete]);
}
