//! End-to-end runtime flows driven through the test harness

use serde_json::{json, Value};
use spyglass_plugin_host::{
    CallError, LifecycleState, MenuEntry, PluginDescriptor, StateAtom, TestHarness,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn foreground() -> PluginDescriptor {
    PluginDescriptor::new("tables", "Tables").version("1.0.0")
}

fn background() -> PluginDescriptor {
    PluginDescriptor::new("logs", "Logs").background()
}

async fn wait_for_sent(harness: &TestHarness, count: usize) {
    while harness.sent_calls().len() < count {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_events_while_deactivated_flush_on_activate_in_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);

    let harness = TestHarness::new(foreground(), |runtime| {
        runtime.on_message("row", move |payload| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.lock().unwrap().push(payload["i"].as_i64().unwrap());
            }
        });
        Ok(())
    })
    .unwrap();

    harness.connect().await;
    harness.activate().await;
    harness.deactivate().await;

    harness
        .send_events(vec![
            ("row", json!({"i": 1})),
            ("row", json!({"i": 2})),
            ("row", json!({"i": 3})),
        ])
        .await;
    assert!(seen.lock().unwrap().is_empty());

    harness.activate().await;
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);

    // Delivery is direct from now on.
    harness.send_event("row", json!({"i": 4})).await;
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_unhandled_events_reach_the_sink_in_order() {
    let handled = Arc::new(AtomicUsize::new(0));
    let handled_clone = Arc::clone(&handled);
    let sunk = Arc::new(Mutex::new(Vec::new()));
    let sunk_clone = Arc::clone(&sunk);

    let harness = TestHarness::new(foreground(), |runtime| {
        runtime.on_message("known", move |_| {
            let handled = Arc::clone(&handled_clone);
            async move {
                handled.fetch_add(1, Ordering::SeqCst);
            }
        });
        runtime.on_unhandled_message(move |name, payload| {
            let sunk = Arc::clone(&sunk_clone);
            async move {
                sunk.lock().unwrap().push((name, payload));
            }
        });
        Ok(())
    })
    .unwrap();

    harness.connect().await;
    harness.activate().await;

    harness.send_event("mystery", json!(1)).await;
    harness.send_event("known", json!(2)).await;
    harness.send_event("other", json!(3)).await;

    assert_eq!(handled.load(Ordering::SeqCst), 1);
    let sunk = sunk.lock().unwrap();
    assert_eq!(sunk.len(), 2);
    assert_eq!(sunk[0].0, "mystery");
    assert_eq!(sunk[1].0, "other");
}

#[tokio::test]
async fn test_last_handler_registration_wins() {
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let first_clone = Arc::clone(&first);
    let second_clone = Arc::clone(&second);

    let harness = TestHarness::new(foreground(), |runtime| {
        runtime.on_message("row", move |_| {
            let first = Arc::clone(&first_clone);
            async move {
                first.fetch_add(1, Ordering::SeqCst);
            }
        });
        runtime.on_message("row", move |_| {
            let second = Arc::clone(&second_clone);
            async move {
                second.fetch_add(1, Ordering::SeqCst);
            }
        });
        Ok(())
    })
    .unwrap();

    harness.connect().await;
    // Queued while merely connected, delivered on activation through the
    // same lookup as direct delivery.
    harness.send_event("row", json!(1)).await;
    harness.activate().await;
    harness.send_event("row", json!(2)).await;

    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_disconnect_rejects_pending_call_exactly_once() {
    let harness = TestHarness::new(foreground(), |_| Ok(())).unwrap();
    harness.connect().await;

    let runtime = Arc::clone(harness.runtime());
    let call = tokio::spawn(async move { runtime.send("getRows", json!({})).await });

    wait_for_sent(&harness, 1).await;
    assert_eq!(harness.runtime().pending_calls(), 1);

    harness.disconnect().await;

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, CallError::ConnectionLost));
    assert_eq!(harness.runtime().pending_calls(), 0);

    // A late reply for the settled call is ignored.
    let call_id = harness.transport().last_call_id().unwrap();
    harness.respond(call_id, json!([]));
}

#[tokio::test]
async fn test_calls_permitted_while_deactivated() {
    let harness = TestHarness::new(foreground(), |_| Ok(())).unwrap();
    harness.connect().await;
    harness.activate().await;
    harness.deactivate().await;

    let runtime = Arc::clone(harness.runtime());
    let call = tokio::spawn(async move { runtime.send("getRows", json!({})).await });

    wait_for_sent(&harness, 1).await;
    let call_id = harness.transport().last_call_id().unwrap();
    harness.respond(call_id, json!([1]));

    assert_eq!(call.await.unwrap().unwrap(), json!([1]));
}

#[tokio::test]
async fn test_background_deactivate_is_not_a_disconnect() {
    let harness = TestHarness::new(background(), |_| Ok(())).unwrap();
    harness.connect().await;
    harness.activate().await;

    let runtime = Arc::clone(harness.runtime());
    let call = tokio::spawn(async move { runtime.send("tail", json!({})).await });
    wait_for_sent(&harness, 1).await;

    harness.deactivate().await;
    assert_eq!(harness.runtime().pending_calls(), 1);

    let call_id = harness.transport().last_call_id().unwrap();
    harness.respond(call_id, json!("line"));
    assert_eq!(call.await.unwrap().unwrap(), json!("line"));
}

#[tokio::test]
async fn test_background_plugin_receives_events_without_activation() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);

    let harness = TestHarness::new(background(), |runtime| {
        runtime.on_message("line", move |payload| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.lock().unwrap().push(payload);
            }
        });
        Ok(())
    })
    .unwrap();

    // Arrives before the transport is up: parked, then flushed on connect.
    harness.send_event("line", json!("early")).await;
    harness.connect().await;
    assert_eq!(*seen.lock().unwrap(), vec![json!("early")]);

    harness.send_event("line", json!("late")).await;
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_rows_scenario_with_snapshot_export() {
    let rows_handle: Arc<Mutex<Option<StateAtom<Vec<Value>>>>> = Arc::new(Mutex::new(None));
    let rows_out = Arc::clone(&rows_handle);

    let harness = TestHarness::new(foreground(), move |runtime| {
        let rows = runtime.create_persisted_atom("rows", Vec::<Value>::new())?;
        *rows_out.lock().unwrap() = Some(rows.clone());
        runtime.on_message("newRow", move |payload| {
            let rows = rows.clone();
            async move {
                rows.update(|v| v.push(payload));
            }
        });
        Ok(())
    })
    .unwrap();

    harness.connect().await;
    harness.activate().await;
    harness.deactivate().await;

    harness.send_event("newRow", json!({"id": 1})).await;
    let rows = rows_handle.lock().unwrap().clone().unwrap();
    assert!(rows.get().is_empty());

    harness.activate().await;
    assert_eq!(rows.get(), vec![json!({"id": 1})]);

    let snapshot = harness.export_state().unwrap();
    assert_eq!(snapshot["rows"], json!([{"id": 1}]));

    // A fresh instance importing the snapshot starts where this one left off.
    let restored = TestHarness::with_snapshot(foreground(), Some(snapshot), |runtime| {
        let rows = runtime.create_persisted_atom("rows", Vec::<Value>::new())?;
        assert_eq!(rows.get(), vec![json!({"id": 1})]);
        Ok(())
    })
    .unwrap();
    assert_eq!(
        restored.export_state().unwrap()["rows"],
        json!([{"id": 1}])
    );
}

#[tokio::test]
async fn test_handler_can_await_a_call_without_stalling_its_instance() {
    let answer = Arc::new(Mutex::new(None));
    let answer_clone = Arc::clone(&answer);

    let harness = TestHarness::new(foreground(), |runtime| {
        let invoker = runtime.invoker();
        runtime.on_message("refresh", move |_| {
            let invoker = invoker.clone();
            let answer = Arc::clone(&answer_clone);
            async move {
                let result = invoker.call("getRows", json!({})).await;
                *answer.lock().unwrap() = Some(result);
            }
        });
        Ok(())
    })
    .unwrap();

    harness.connect().await;
    harness.activate().await;

    let runtime = Arc::clone(harness.runtime());
    let delivery = tokio::spawn(async move { runtime.deliver_event("refresh", json!({})).await });

    wait_for_sent(&harness, 1).await;
    let call_id = harness.transport().last_call_id().unwrap();
    harness.respond(call_id, json!([7]));

    delivery.await.unwrap();
    let answer = answer.lock().unwrap().take().unwrap();
    assert_eq!(answer.unwrap(), json!([7]));
}

#[tokio::test]
async fn test_lifecycle_hooks_fire_in_registration_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let log_a = Arc::clone(&log);
    let log_b = Arc::clone(&log);
    let log_c = Arc::clone(&log);

    let harness = TestHarness::new(foreground(), |runtime| {
        runtime.on_connect(move || log_a.lock().unwrap().push("connect:first"));
        runtime.on_connect(move || log_b.lock().unwrap().push("connect:second"));
        runtime.on_activate(move || log_c.lock().unwrap().push("activate"));
        Ok(())
    })
    .unwrap();

    harness.connect().await;
    harness.activate().await;

    assert_eq!(
        *log.lock().unwrap(),
        vec!["connect:first", "connect:second", "activate"]
    );
}

#[tokio::test]
async fn test_destroy_fires_deactivate_for_visible_instance() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let log_a = Arc::clone(&log);
    let log_b = Arc::clone(&log);

    let harness = TestHarness::new(foreground(), |runtime| {
        runtime.on_deactivate(move || log_a.lock().unwrap().push("deactivate"));
        runtime.on_destroy(move || log_b.lock().unwrap().push("destroy"));
        Ok(())
    })
    .unwrap();

    harness.connect().await;
    harness.activate().await;
    harness.destroy().await;

    assert_eq!(*log.lock().unwrap(), vec!["deactivate", "destroy"]);
    assert_eq!(
        harness.runtime().lifecycle_state().await,
        LifecycleState::Destroyed
    );
}

#[tokio::test]
async fn test_destroy_rejects_calls_and_swallows_later_signals() {
    let harness = TestHarness::new(foreground(), |_| Ok(())).unwrap();
    harness.connect().await;

    let runtime = Arc::clone(harness.runtime());
    let call = tokio::spawn(async move { runtime.send("getRows", json!({})).await });
    wait_for_sent(&harness, 1).await;

    harness.destroy().await;
    assert!(matches!(
        call.await.unwrap().unwrap_err(),
        CallError::ConnectionLost
    ));

    // Everything after destroy is logged and ignored.
    harness.send_event("row", json!(1)).await;
    harness.activate().await;
    harness.connect().await;
    let err = harness.runtime().send("getRows", json!({})).await.unwrap_err();
    assert!(matches!(err, CallError::ConnectionLost));
}

#[tokio::test]
async fn test_deep_link_bypasses_the_queue() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);

    let harness = TestHarness::new(foreground(), |runtime| {
        runtime.on_deep_link(move |payload| seen_clone.lock().unwrap().push(payload));
        Ok(())
    })
    .unwrap();

    harness.connect().await;
    // Not activated; a queued event would wait, a deep link must not.
    harness.trigger_deep_link(json!({"row": 3})).await;
    assert_eq!(*seen.lock().unwrap(), vec![json!({"row": 3})]);
}

#[tokio::test]
async fn test_menu_entry_registration_and_invocation() {
    let clicked = Arc::new(AtomicUsize::new(0));
    let clicked_clone = Arc::clone(&clicked);

    let harness = TestHarness::new(foreground(), |runtime| {
        runtime.add_menu_entry(
            MenuEntry::new("Clear table", move || {
                clicked_clone.fetch_add(1, Ordering::SeqCst);
            })
            .accelerator("Ctrl+K"),
        );
        Ok(())
    })
    .unwrap();

    let entries = harness.host().menu_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].label, "Clear table");
    assert_eq!(entries[0].accelerator.as_deref(), Some("Ctrl+K"));

    harness.invoke_menu_entry("Clear table").await;
    harness.invoke_menu_entry("missing").await;
    assert_eq!(clicked.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_host_actions_pass_through() {
    let harness = TestHarness::new(foreground(), |_| Ok(())).unwrap();
    harness.host().mark_available("logs");

    assert!(harness.runtime().is_plugin_available("logs"));
    assert!(!harness.runtime().is_plugin_available("absent"));

    harness
        .runtime()
        .select_plugin("logs", Some(json!({"filter": "error"})));
    let selections = harness.host().selections();
    assert_eq!(selections.len(), 1);
    assert_eq!(selections[0].0, "logs");
}

#[tokio::test]
async fn test_remote_error_reaches_the_caller() {
    let harness = TestHarness::new(foreground(), |_| Ok(())).unwrap();
    harness.connect().await;

    let runtime = Arc::clone(harness.runtime());
    let call = tokio::spawn(async move { runtime.send("getRows", json!({})).await });
    wait_for_sent(&harness, 1).await;

    let call_id = harness.transport().last_call_id().unwrap();
    harness.respond_error(call_id, "table is locked");

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, CallError::Remote(e) if e.message == "table is locked"));
}
