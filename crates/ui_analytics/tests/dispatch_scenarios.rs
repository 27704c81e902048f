use serde_json::json;
use std::collections::HashSet;
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use ui_analytics::{
    topics, Analytics, Definition, EnvironmentSignal, EventKind, EventRecord, IntegrationError,
    IntegrationStatus, Outcome, RoutingOptions, TopicPayload,
};

type Received = Arc<Mutex<Vec<EventRecord>>>;

fn tracking_definition() -> (Received, Definition) {
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let definition = Definition::new().with_track(move |event| {
        sink.lock().unwrap().push(event.clone());
        Outcome::ok()
    });
    (received, definition)
}

fn names(received: &Received) -> Vec<String> {
    received.lock().unwrap().iter().map(|e| e.name.clone()).collect()
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    true
}

#[test_log::test(tokio::test)]
async fn early_event_is_delivered_once_after_async_initialize() {
    let analytics = Analytics::new();
    analytics.emit_track("signup", json!({"plan": "pro"}), RoutingOptions::new());

    let (release, gate) = oneshot::channel::<()>();
    let gate = Mutex::new(Some(gate));
    let (received, definition) = tracking_definition();
    let definition = definition.with_initialize(move |_| {
        let gate = gate.lock().unwrap().take();
        Outcome::deferred(async move {
            match gate {
                Some(gate) => gate.await.map_err(|_| IntegrationError::failed("gate dropped")),
                None => Ok(()),
            }
        })
    });

    let x = analytics.define_integration("x", definition).unwrap();
    tokio::task::yield_now().await;

    assert_eq!(x.status(), IntegrationStatus::Initializing);
    assert!(received.lock().unwrap().is_empty());

    release.send(()).unwrap();
    assert_eq!(x.settled().await, IntegrationStatus::Ready);

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].name, "signup");
    assert_eq!(received[0].properties.get("plan"), Some(&json!("pro")));
}

#[test_log::test]
fn failing_initialize_marks_errored_and_notifies_once() {
    let analytics = Analytics::new();
    let y = analytics.integration("y").unwrap();

    let notifications = Arc::new(Mutex::new(Vec::new()));
    let sink = notifications.clone();
    y.on(topics::ERROR, move |payload| {
        sink.lock().unwrap().push(payload.and_then(TopicPayload::as_error).cloned());
    });

    let (received, definition) = tracking_definition();
    analytics.emit_track("before", json!({}), RoutingOptions::new());
    analytics.define_integration("y", definition.with_initialize(|_| Outcome::err("vendor script missing")));

    assert_eq!(y.status(), IntegrationStatus::Errored);
    assert!(!y.is_ready());
    assert_eq!(
        *notifications.lock().unwrap(),
        vec![Some(IntegrationError::failed("vendor script missing"))]
    );
    // no replay after a failed initialize
    assert!(received.lock().unwrap().is_empty());
    assert_eq!(analytics.stats().initialization_failures, 1);
}

#[test_log::test]
fn panicking_initialize_is_reported_on_error_topic() {
    let analytics = Analytics::new();
    let y = analytics.integration("y").unwrap();

    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();
    y.on(topics::INIT_ERROR, move |payload| {
        if let Some(TopicPayload::Value(value)) = payload {
            sink.lock().unwrap().push(value["error"].clone());
        }
    });

    analytics.define_integration("y", Definition::new().with_initialize(|_| panic!("boom")));

    assert_eq!(y.status(), IntegrationStatus::Errored);
    assert_eq!(*messages.lock().unwrap(), vec![json!("integration panicked: boom")]);
}

#[test_log::test]
fn late_ready_subscriber_fires_immediately_without_replay() {
    let analytics = Analytics::new();
    let (received, definition) = tracking_definition();
    analytics.emit_track("one", json!({}), RoutingOptions::new());
    let handle = analytics.define_integration("z", definition).unwrap();
    assert_eq!(names(&received), vec!["one"]);

    let fired = Arc::new(Mutex::new(Vec::new()));
    let sink = fired.clone();
    handle.on(topics::READY, move |payload| sink.lock().unwrap().push(payload.is_none()));

    assert_eq!(*fired.lock().unwrap(), vec![true]);
    assert_eq!(names(&received), vec!["one"]);
}

#[test_log::test]
fn replay_and_live_dispatch_preserve_order_and_routing() {
    let analytics = Analytics::new();
    analytics.emit_track("e1", json!({}), RoutingOptions::new());
    analytics.emit_track("e2", json!({}), RoutingOptions::new().allow(["b"]));
    analytics.emit_page("p1", json!({}), RoutingOptions::new().deny(["a"]));
    analytics.emit_track("e3", json!({}), RoutingOptions::new().allow(["a"]));

    let (a_received, a) = tracking_definition();
    let (b_received, b) = tracking_definition();
    analytics.define_integration("a", a);
    analytics.define_integration("b", b);

    analytics.emit_track("e4", json!({}), RoutingOptions::new());
    analytics.emit_track("e5", json!({}), RoutingOptions::new().deny(["b"]));

    assert_eq!(names(&a_received), vec!["e1", "e3", "e4", "e5"]);
    assert_eq!(names(&b_received), vec!["e1", "e2", "p1", "e4"]);

    let page = b_received.lock().unwrap()[2].clone();
    assert_eq!(page.kind, EventKind::Page);
}

#[test_log::test]
fn whitelisted_event_reaches_only_listed_integration() {
    let analytics = Analytics::new();
    analytics.emit_track("only-a", json!({}), RoutingOptions::new().allow(["a"]));

    let (a_received, a) = tracking_definition();
    let (b_received, b) = tracking_definition();
    analytics.define_integration("a", a);
    analytics.define_integration("b", b);

    assert_eq!(names(&a_received), vec!["only-a"]);
    assert!(b_received.lock().unwrap().is_empty());
}

#[test_log::test]
fn one_failing_integration_does_not_affect_others() {
    let analytics = Analytics::new();
    let (healthy_received, healthy) = tracking_definition();

    analytics.define_integration("flaky", Definition::new().with_track(|_| panic!("vendor bug")));
    analytics.define_integration(
        "rejecting",
        Definition::new().with_track(|_| Outcome::deferred(async { Err(IntegrationError::failed("429")) })),
    );
    analytics.define_integration("healthy", healthy);

    analytics.emit_track("purchase", json!({"total": 10}), RoutingOptions::new());

    assert_eq!(names(&healthy_received), vec!["purchase"]);
    assert_eq!(analytics.state().event_count(), 1);

    assert_eq!(analytics.stats().deliveries, 3);
    // the deferred rejection settles on its own thread
    assert!(wait_until(|| analytics.stats().delivery_failures == 2));
}

#[test_log::test]
fn slow_deferred_track_does_not_hold_up_other_integrations() {
    let analytics = Analytics::new();
    let (release, gate) = oneshot::channel::<()>();
    let gate = Mutex::new(Some(gate));
    let (done_tx, done_rx) = mpsc::channel();
    let done_tx = Mutex::new(done_tx);

    analytics.define_integration(
        "slow",
        Definition::new().with_track(move |_| {
            let gate = gate.lock().unwrap().take();
            let done = done_tx.lock().unwrap().clone();
            Outcome::deferred(async move {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                let _ = done.send(());
                Ok(())
            })
        }),
    );
    let (fast_received, fast) = tracking_definition();
    analytics.define_integration("fast", fast);

    analytics.emit_track("checkout", json!({}), RoutingOptions::new());

    assert_eq!(names(&fast_received), vec!["checkout"]);
    assert!(done_rx.try_recv().is_err());

    release.send(()).unwrap();
    done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(analytics.stats().delivery_failures, 0);
}

#[test_log::test]
fn hanging_initialize_without_runtime_returns_to_the_caller() {
    let analytics = Analytics::new();
    let hang = analytics
        .define_integration(
            "hang",
            Definition::new().with_initialize(|_| Outcome::deferred(futures::future::pending())),
        )
        .unwrap();

    assert_eq!(hang.status(), IntegrationStatus::Initializing);

    let (received, definition) = tracking_definition();
    analytics.define_integration("other", definition);
    analytics.emit_track("still-flowing", json!({}), RoutingOptions::new());
    assert_eq!(names(&received), vec!["still-flowing"]);
}

#[test_log::test(tokio::test)]
async fn settled_reports_errored_after_deferred_failure() {
    let analytics = Analytics::new();
    let z = analytics
        .define_integration(
            "z",
            Definition::new().with_initialize(|_| Outcome::deferred(async { Err(IntegrationError::failed("timeout")) })),
        )
        .unwrap();

    assert_eq!(z.settled().await, IntegrationStatus::Errored);
    assert_eq!(z.status(), IntegrationStatus::Errored);
}

#[test_log::test]
fn redefinition_never_double_delivers() {
    let analytics = Analytics::new();
    analytics.emit_track("e1", json!({}), RoutingOptions::new());

    let (first_received, first) = tracking_definition();
    let (second_received, second) = tracking_definition();
    analytics.define_integration("dup", first);
    analytics.define_integration("dup", second);
    analytics.emit_track("e2", json!({}), RoutingOptions::new());

    assert_eq!(names(&first_received), vec!["e1", "e2"]);
    assert!(second_received.lock().unwrap().is_empty());
    assert_eq!(analytics.state().integrations().len(), 1);
}

#[test_log::test]
fn integration_handle_track_is_restricted_to_that_integration() {
    let analytics = Analytics::new();
    let (a_received, a) = tracking_definition();
    let (b_received, b) = tracking_definition();
    let a = analytics.define_integration("a", a).unwrap();
    analytics.define_integration("b", b);

    a.track("direct", json!({"source": "handle"}), RoutingOptions::new().allow(["b"]));
    a.track_page("landing", json!(null), RoutingOptions::new());

    assert_eq!(names(&a_received), vec!["direct", "landing"]);
    assert_eq!(a_received.lock().unwrap()[0].properties.get("source"), Some(&json!("handle")));
    assert!(b_received.lock().unwrap().is_empty());
}

#[test_log::test]
fn group_helpers_address_events_and_forward_setup() {
    let analytics = Analytics::new();
    let setups = Arc::new(Mutex::new(Vec::new()));
    let sink = setups.clone();
    let (received, definition) = tracking_definition();
    let definition = definition.with_set_group(move |name, properties| {
        sink.lock().unwrap().push((name.to_string(), properties.clone()));
        Outcome::ok()
    });

    let crm = analytics.define_integration("crm", definition).unwrap();
    let team = crm.group("team-7");
    team.setup(json!({"seats": 5}).as_object().unwrap());
    team.track("invite", json!({"role": "admin"}), RoutingOptions::new());
    team.track_page("billing", json!({}), RoutingOptions::new());

    assert_eq!(setups.lock().unwrap()[0].0, "team-7");
    let received = received.lock().unwrap();
    assert_eq!(received.len(), 2);
    assert!(received.iter().all(|e| e.groups == vec!["team-7"]));
    assert!(received.iter().all(|e| e.allow_list == vec!["crm"]));
}

#[test_log::test]
fn options_accumulate_before_definition_and_apply_on_ready() {
    let analytics = Analytics::new();
    let applied = Arc::new(Mutex::new(Vec::new()));

    let pending = analytics.integration("ga").unwrap();
    pending.set_options(json!({"id": "UA-1"}).as_object().cloned().unwrap());
    pending.set_options(json!({"anonymize": true}).as_object().cloned().unwrap());

    let sink = applied.clone();
    analytics.define_integration(
        "ga",
        Definition::new().with_set_options(move |options| sink.lock().unwrap().push(options.clone())),
    );

    let applied = applied.lock().unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].get("id"), Some(&json!("UA-1")));
    assert_eq!(applied[0].get("anonymize"), Some(&json!(true)));
}

#[test_log::test]
fn tool_reference_and_session_clearing_go_through_the_handle() {
    let analytics = Analytics::new();
    let cleared = Arc::new(Mutex::new(0));
    let count = cleared.clone();

    let handle = analytics
        .define_integration(
            "vendor",
            Definition::new()
                .with_tool_reference(|| Some(Arc::new(42u32) as ui_analytics::ToolReference))
                .with_clear_user_session(move || *count.lock().unwrap() += 1),
        )
        .unwrap();

    let tool = handle.get_tool_reference().unwrap();
    assert_eq!(tool.downcast_ref::<u32>(), Some(&42));

    handle.clear_user_session();
    analytics.clear_all_user_sessions();
    assert_eq!(*cleared.lock().unwrap(), 2);
}

#[test_log::test]
fn unsubscribing_one_token_keeps_duplicate_subscription() {
    let analytics = Analytics::new();
    let handle = analytics.integration("dupe-subs").unwrap();
    let count = Arc::new(Mutex::new(0));

    let c = count.clone();
    let callback = move |_: Option<&TopicPayload>| *c.lock().unwrap() += 1;
    let first = handle.on(topics::BEFORE_INIT, callback.clone());
    handle.on(topics::BEFORE_INIT, callback);

    assert!(handle.off(topics::BEFORE_INIT, first));
    assert!(!handle.off(topics::BEFORE_INIT, first));

    analytics.define_integration("dupe-subs", Definition::new());
    assert_eq!(*count.lock().unwrap(), 1);
}

#[test_log::test]
fn environment_signals_are_scoped_per_engine() {
    let first = Analytics::new();
    let second = Analytics::new();
    let fired = Arc::new(Mutex::new(0));

    let c = fired.clone();
    first.environment().once(EnvironmentSignal::PageLoad, move || *c.lock().unwrap() += 1);

    second.environment().signal(EnvironmentSignal::PageLoad);
    assert_eq!(*fired.lock().unwrap(), 0);

    first.environment().signal(EnvironmentSignal::PageLoad);
    first.environment().signal(EnvironmentSignal::PageLoad);
    assert_eq!(*fired.lock().unwrap(), 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn concurrent_emits_during_promotion_are_delivered_exactly_once() {
    let analytics = Analytics::new();
    let (received, definition) = tracking_definition();
    let definition = definition.with_initialize(|_| {
        Outcome::deferred(async {
            tokio::task::yield_now().await;
            Ok(())
        })
    });

    let emitters: Vec<_> = (0..4)
        .map(|t| {
            let analytics = analytics.clone();
            std::thread::spawn(move || {
                for i in 0..50 {
                    analytics.emit_track(&format!("t{t}-{i}"), json!({}), RoutingOptions::new());
                }
            })
        })
        .collect();

    let handle = analytics.define_integration("racer", definition).unwrap();
    for emitter in emitters {
        emitter.join().unwrap();
    }
    assert_eq!(handle.settled().await, IntegrationStatus::Ready);

    let delivered = names(&received);
    let unique: HashSet<_> = delivered.iter().cloned().collect();
    assert_eq!(delivered.len(), 200);
    assert_eq!(unique.len(), 200);
}
