// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Pull-based remote iteration: exhaustion, suspension, fallback.

use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use pybridge::testing::MockTransport;
use pybridge::{
    BridgeConfig, BridgeError, Dispatcher, Driven, Ref, Signal, StreamKind, StreamRef, Value,
};
use pybridge_wire::CallResponse;

mod common;

fn config(session_id: &str) -> BridgeConfig {
    common::init_tracing();
    BridgeConfig {
        session_id: Some(session_id.to_string()),
        ..BridgeConfig::default()
    }
}

/// Transport double standing in for a worker holding one iterator that
/// yields `items` then raises the completion signal.
fn iterator_transport(items: Vec<i64>) -> MockTransport {
    let remaining = Arc::new(Mutex::new(items.into_iter().collect::<Vec<_>>()));
    MockTransport::new().respond_with(move |request| match request.function.as_str() {
        "__next__" => {
            let mut remaining = remaining.lock();
            if remaining.is_empty() {
                CallResponse::err("StopIteration", "")
            } else {
                CallResponse::ok(serde_json::json!(remaining.remove(0)))
            }
        }
        "__len__" => CallResponse::ok(serde_json::json!(3)),
        other => panic!("unexpected function {other}"),
    })
}

fn stream_ref(session_id: &str, kind: StreamKind) -> StreamRef {
    StreamRef::new(Ref::new("it_1", session_id), kind)
}

#[tokio::test]
async fn test_exhaustion_is_sticky_and_local() {
    let transport = iterator_transport(vec![10, 20]);
    let dispatcher = Dispatcher::connect(Arc::new(transport.clone()), config("s_it"))
        .await
        .unwrap();

    let mut stream = dispatcher
        .open_stream(stream_ref("s_it", StreamKind::Generator))
        .unwrap();

    assert_eq!(stream.next().await.unwrap(), Some(Value::Int(10)));
    assert_eq!(stream.next().await.unwrap(), Some(Value::Int(20)));
    assert_eq!(stream.next().await.unwrap(), None);
    assert!(stream.is_exhausted());

    // Two items + the completion signal.
    let calls_at_exhaustion = transport.call_count();
    assert_eq!(calls_at_exhaustion, 3);

    // Further pulls answer locally: no new remote calls.
    assert_eq!(stream.next().await.unwrap(), None);
    assert_eq!(stream.next().await.unwrap(), None);
    assert_eq!(transport.call_count(), calls_at_exhaustion);
}

#[tokio::test]
async fn test_suspend_hands_back_a_resumable_stream() {
    let transport = iterator_transport(vec![1, 2, 3]);
    let dispatcher = Dispatcher::connect(Arc::new(transport.clone()), config("s_it"))
        .await
        .unwrap();

    let stream = dispatcher
        .open_stream(stream_ref("s_it", StreamKind::Generator))
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let driven = stream
        .drive(move |value| {
            recorder.lock().push(value);
            Signal::Suspend
        })
        .await
        .unwrap();

    let resumed = match driven {
        Driven::Suspended(stream) => stream,
        _ => panic!("expected suspension"),
    };
    assert_eq!(*seen.lock(), vec![Value::Int(1)]);

    // Resuming picks up exactly where the traversal left off — nothing
    // consumed is re-fetched.
    let recorder = Arc::clone(&seen);
    let driven = resumed
        .drive(move |value| {
            recorder.lock().push(value);
            Signal::Continue
        })
        .await
        .unwrap();
    assert!(matches!(driven, Driven::Completed));
    assert_eq!(*seen.lock(), vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
}

#[tokio::test]
async fn test_halt_stops_without_advancing() {
    let transport = iterator_transport(vec![1, 2, 3]);
    let dispatcher = Dispatcher::connect(Arc::new(transport.clone()), config("s_it"))
        .await
        .unwrap();

    let stream = dispatcher
        .open_stream(stream_ref("s_it", StreamKind::Generator))
        .unwrap();

    let driven = stream.drive(|_| Signal::Halt).await.unwrap();
    assert!(matches!(driven, Driven::Halted));
    // Exactly one pull went out.
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn test_plain_ref_falls_back_to_indexed_pulls() {
    let transport = MockTransport::new().respond_with(|request| match request.function.as_str() {
        // The remote object is a sequence, not an iterator.
        "__next__" => CallResponse::err("TypeError", "'Shelf' object is not an iterator"),
        "__getitem__" => {
            let index = request.args[0].as_i64().unwrap();
            if index < 3 {
                CallResponse::ok(serde_json::json!(index * 10))
            } else {
                CallResponse::err("IndexError", "list index out of range")
            }
        }
        other => panic!("unexpected function {other}"),
    });
    let dispatcher = Dispatcher::connect(Arc::new(transport.clone()), config("s_seq"))
        .await
        .unwrap();

    let mut stream = dispatcher.iterate(Ref::new("shelf_1", "s_seq")).unwrap();
    let mut collected = Vec::new();
    while let Some(value) = stream.next().await.unwrap() {
        collected.push(value);
    }
    assert_eq!(collected, vec![Value::Int(0), Value::Int(10), Value::Int(20)]);
    assert!(stream.is_exhausted());

    // One failed probe, then one __getitem__ per element plus the
    // terminal out-of-range miss.
    let functions: Vec<String> = transport.calls().iter().map(|c| c.function.clone()).collect();
    assert_eq!(functions[0], "__next__");
    assert_eq!(functions.iter().filter(|f| *f == "__getitem__").count(), 4);
}

#[tokio::test]
async fn test_generator_length_is_unsupported() {
    let transport = iterator_transport(vec![]);
    let dispatcher = Dispatcher::connect(Arc::new(transport.clone()), config("s_it"))
        .await
        .unwrap();

    let stream = dispatcher
        .open_stream(stream_ref("s_it", StreamKind::Generator))
        .unwrap();
    let err = stream.len().await.unwrap_err();
    assert!(matches!(err, BridgeError::NotSupported(_)));
    // Never guessed, never asked remotely.
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_iterator_length_asks_remote() {
    let transport = iterator_transport(vec![1, 2, 3]);
    let dispatcher = Dispatcher::connect(Arc::new(transport.clone()), config("s_it"))
        .await
        .unwrap();

    let stream = dispatcher
        .open_stream(stream_ref("s_it", StreamKind::Iterator))
        .unwrap();
    assert_eq!(stream.len().await.unwrap(), 3);
}

#[tokio::test]
async fn test_stream_adapter_collects_all_items() {
    let transport = iterator_transport(vec![7, 8]);
    let dispatcher = Dispatcher::connect(Arc::new(transport.clone()), config("s_it"))
        .await
        .unwrap();

    let stream = dispatcher
        .open_stream(stream_ref("s_it", StreamKind::Generator))
        .unwrap();
    let items: Vec<Value> = stream
        .into_stream()
        .map(|item| item.unwrap())
        .collect()
        .await;
    assert_eq!(items, vec![Value::Int(7), Value::Int(8)]);
}

#[tokio::test]
async fn test_call_returning_stream_ref_opens_a_stream() {
    let transport = MockTransport::new().respond_with(|request| match request.function.as_str() {
        "count_up" => CallResponse::ok(serde_json::json!({
            "__type__": "stream_ref",
            "__schema__": 1,
            "id": "gen_1",
            "session_id": "s_gen",
            "stream_type": "generator"
        })),
        "__next__" => CallResponse::err("StopIteration", ""),
        other => panic!("unexpected function {other}"),
    });
    let dispatcher = Dispatcher::connect(Arc::new(transport.clone()), config("s_gen"))
        .await
        .unwrap();

    let mut stream = dispatcher
        .call("mylib", "counters", "count_up")
        .send_stream()
        .await
        .unwrap();
    assert_eq!(stream.next().await.unwrap(), None);
    assert!(stream.is_exhausted());
}

#[tokio::test]
async fn test_remote_failure_aborts_traversal() {
    let transport =
        MockTransport::new().respond_with(|_| CallResponse::err("RuntimeError", "worker crashed"));
    let dispatcher = Dispatcher::connect(Arc::new(transport.clone()), config("s_it"))
        .await
        .unwrap();

    let mut stream = dispatcher
        .open_stream(stream_ref("s_it", StreamKind::Generator))
        .unwrap();
    let err = stream.next().await.unwrap_err();
    assert!(matches!(err, BridgeError::Remote { .. }));
    // A failure is an abort, not completion.
    assert!(!stream.is_exhausted());
}
