//! Client engine behaviour against a scripted peer.
//!
//! These tests drive `RegistryClient` over an in-memory duplex stream with
//! a hand-rolled far end, so they can script exact frame sequences:
//! negotiation variants, out-of-order responses, timeouts, unsolicited
//! pushes and channel loss.

use std::sync::Arc;
use std::time::Duration;

use registry_client::{ClientConfig, RegistryClient, RemoteError};
use registry_core::ObjectRef;
use registry_protocol::{
    decode_frame, encode_push, encode_response, Frame, MessageType, Param, ResponseFrame,
    VersionHeader, WireMessage,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

fn test_config() -> ClientConfig {
    ClientConfig {
        call_timeout: Duration::from_millis(500),
        handshake_timeout: Duration::from_millis(500),
        ..ClientConfig::default()
    }
}

fn object() -> ObjectRef {
    ObjectRef::new("com.example:type=Cache").unwrap()
}

// ---------------------------------------------------------------------------
// Scripted peer plumbing
// ---------------------------------------------------------------------------

async fn write_frame(stream: &mut DuplexStream, body: &[u8]) {
    stream
        .write_all(&(body.len() as u32).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(body).await.unwrap();
}

async fn read_frame(stream: &mut DuplexStream) -> Frame {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.unwrap();
    let mut body = vec![0u8; u32::from_be_bytes(len_buf) as usize];
    stream.read_exact(&mut body).await.unwrap();
    match decode_frame(&body).unwrap() {
        WireMessage::Request(frame) => frame,
        other => panic!("expected request frame, got {:?}", other),
    }
}

async fn respond_ok(stream: &mut DuplexStream, request: &Frame, result: Option<Param>) {
    let mut body = Vec::new();
    encode_response(
        &ResponseFrame {
            msg_type: request.msg_type,
            correlation_id: request.correlation_id,
            outcome: Ok(result),
        },
        &mut body,
    )
    .unwrap();
    write_frame(stream, &body).await;
}

async fn write_header(stream: &mut DuplexStream, versions: &[u8], full_version: Option<&str>) {
    let mut buf = Vec::new();
    VersionHeader {
        versions: versions.to_vec(),
        snapshot: false,
        full_version: full_version.map(str::to_string),
    }
    .encode(&mut buf)
    .unwrap();
    stream.write_all(&buf).await.unwrap();
}

/// Read the 4-byte selection record; on the re-ask selector, also consume
/// the client version string and return it.
async fn read_selection(stream: &mut DuplexStream) -> (u8, Option<String>) {
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf[..3], b"JMX");
    if buf[3] != 0 {
        return (buf[3], None);
    }
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.unwrap();
    let mut bytes = vec![0u8; i32::from_be_bytes(len_buf) as usize];
    stream.read_exact(&mut bytes).await.unwrap();
    (0, Some(String::from_utf8(bytes).unwrap()))
}

/// Serve negotiation plus handshake and return the negotiated version.
async fn accept_session(stream: &mut DuplexStream, offered: &[u8]) -> u8 {
    write_header(stream, offered, None).await;
    let (mut chosen, _) = read_selection(stream).await;
    if chosen == 0 {
        write_header(stream, &[1, 2], Some("scripted-peer/2.0")).await;
        let (second, _) = read_selection(stream).await;
        chosen = second;
    }

    if chosen == 2 {
        let request = read_frame(stream).await;
        assert_eq!(request.msg_type, MessageType::Parameters);
        let sent = match &request.params[..] {
            [Param::StringArray(items)] => items.clone(),
            other => panic!("unexpected parameters payload {:?}", other),
        };
        respond_ok(stream, &request, Some(Param::StringArray(sent))).await;
    }

    let begin = read_frame(stream).await;
    assert_eq!(begin.msg_type, MessageType::Begin);
    respond_ok(stream, &begin, Some(Param::String("sess-test".into()))).await;
    chosen
}

// ---------------------------------------------------------------------------
// Negotiation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn negotiates_the_highest_common_version() {
    let (client_end, mut server_end) = tokio::io::duplex(64 * 1024);
    let peer = tokio::spawn(async move {
        let chosen = accept_session(&mut server_end, &[1, 2]).await;
        assert_eq!(chosen, 2);
        server_end
    });

    let client = RegistryClient::open(client_end, test_config()).await.unwrap();
    assert_eq!(client.version(), 2);
    assert_eq!(client.session_id(), "sess-test");
    peer.await.unwrap();
}

#[tokio::test]
async fn falls_back_to_version_one_without_parameter_exchange() {
    let (client_end, mut server_end) = tokio::io::duplex(64 * 1024);
    let peer = tokio::spawn(async move {
        // accept_session only serves Parameters for version 2, so reaching
        // Begin directly proves the v1 profile skipped the exchange.
        let chosen = accept_session(&mut server_end, &[1]).await;
        assert_eq!(chosen, 1);
        server_end
    });

    let client = RegistryClient::open(client_end, test_config()).await.unwrap();
    assert_eq!(client.version(), 1);
    peer.await.unwrap();
}

#[tokio::test]
async fn disjoint_version_sets_fail_negotiation() {
    let (client_end, mut server_end) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        write_header(&mut server_end, &[7, 8], None).await;
        // Hold the stream open; the client must fail on its own.
        let mut sink = [0u8; 16];
        let _ = server_end.read(&mut sink).await;
    });

    let err = RegistryClient::open(client_end, test_config())
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Negotiation(_)), "got {:?}", err);
}

#[tokio::test]
async fn legacy_zero_offer_causes_exactly_one_reask() {
    let (client_end, mut server_end) = tokio::io::duplex(64 * 1024);
    let peer = tokio::spawn(async move {
        write_header(&mut server_end, &[0, 1], None).await;
        let (selector, client_version) = read_selection(&mut server_end).await;
        assert_eq!(selector, 0, "client must take the re-ask path");
        assert!(client_version.is_some_and(|v| !v.is_empty()));

        write_header(&mut server_end, &[1, 2], Some("scripted-peer/2.0")).await;
        let (chosen, _) = read_selection(&mut server_end).await;
        assert_eq!(chosen, 2, "full list must yield the highest version");

        let request = read_frame(&mut server_end).await;
        assert_eq!(request.msg_type, MessageType::Parameters);
        respond_ok(&mut server_end, &request, Some(Param::StringArray(vec![]))).await;
        let begin = read_frame(&mut server_end).await;
        respond_ok(&mut server_end, &begin, Some(Param::String("sess-re".into()))).await;
        server_end
    });

    let client = RegistryClient::open(client_end, test_config()).await.unwrap();
    assert_eq!(client.version(), 2);
    assert_eq!(client.session_id(), "sess-re");
    peer.await.unwrap();
}

// ---------------------------------------------------------------------------
// Call engine
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unanswered_call_times_out_once_and_releases_its_id() {
    let (client_end, mut server_end) = tokio::io::duplex(64 * 1024);
    let peer = tokio::spawn(async move {
        accept_session(&mut server_end, &[1, 2]).await;

        // Swallow the first request without answering.
        let first = read_frame(&mut server_end).await;
        assert_eq!(first.msg_type, MessageType::GetAttribute);

        // Answer the second normally.
        let second = read_frame(&mut server_end).await;
        respond_ok(
            &mut server_end,
            &second,
            Some(Param::Object(b"value".to_vec())),
        )
        .await;

        // Now answer the first one, far too late.
        respond_ok(
            &mut server_end,
            &first,
            Some(Param::Object(b"stale".to_vec())),
        )
        .await;
        server_end
    });

    let client = RegistryClient::open(client_end, test_config()).await.unwrap();

    let err = client.get_attribute(&object(), "Slow").await.unwrap_err();
    assert!(matches!(err, RemoteError::Timeout { .. }), "got {:?}", err);
    assert_eq!(client.pending_call_count(), 0, "timed-out id must be released");

    // The channel is still healthy and the late response must not leak
    // into this fresh call.
    let value = client.get_attribute(&object(), "Fast").await.unwrap();
    assert_eq!(value, b"value");

    peer.await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.pending_call_count(), 0);
}

#[tokio::test]
async fn concurrent_calls_answered_in_reverse_order_resolve_correctly() {
    const CALLS: usize = 5;

    let (client_end, mut server_end) = tokio::io::duplex(64 * 1024);
    let peer = tokio::spawn(async move {
        accept_session(&mut server_end, &[1, 2]).await;
        let mut requests = Vec::new();
        for _ in 0..CALLS {
            requests.push(read_frame(&mut server_end).await);
        }
        // Respond in reverse order, echoing the requested attribute name
        // so each caller can check it got its own answer.
        for request in requests.iter().rev() {
            let attribute = match &request.params[..] {
                [Param::String(_), Param::String(attribute)] => attribute.clone(),
                other => panic!("unexpected get-attribute params {:?}", other),
            };
            respond_ok(
                &mut server_end,
                request,
                Some(Param::Object(attribute.into_bytes())),
            )
            .await;
        }
        server_end
    });

    let client = RegistryClient::open(client_end, test_config()).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..CALLS {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let attribute = format!("attr-{}", i);
            let value = client.get_attribute(&object(), &attribute).await.unwrap();
            assert_eq!(value, attribute.as_bytes(), "cross-assigned response");
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(client.pending_call_count(), 0);
    peer.await.unwrap();
}

#[tokio::test]
async fn channel_loss_cancels_every_pending_call() {
    const CALLS: usize = 3;

    let (client_end, mut server_end) = tokio::io::duplex(64 * 1024);
    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
    let peer = tokio::spawn(async move {
        accept_session(&mut server_end, &[1, 2]).await;
        for _ in 0..CALLS {
            read_frame(&mut server_end).await;
        }
        ready_tx.send(()).unwrap();
        // Keep the far end alive until the test drops it.
        server_end
    });

    let mut config = test_config();
    config.call_timeout = Duration::from_secs(30);
    let client = RegistryClient::open(client_end, config).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..CALLS {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client.get_attribute(&object(), &format!("a{}", i)).await
        }));
    }

    ready_rx.await.unwrap();
    let server_end = peer.await.unwrap();
    drop(server_end); // channel dies with three calls in flight

    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, RemoteError::Transport(_)), "got {:?}", err);
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.pending_call_count(), 0);
    assert_eq!(client.subscription_count(), 0);
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[tokio::test]
async fn events_reach_the_listener_with_the_original_handback() {
    let (client_end, mut server_end) = tokio::io::duplex(64 * 1024);
    let (subscribed_tx, subscribed_rx) = tokio::sync::oneshot::channel();
    let peer = tokio::spawn(async move {
        accept_session(&mut server_end, &[1, 2]).await;

        let add = read_frame(&mut server_end).await;
        assert_eq!(add.msg_type, MessageType::AddListener);
        let (id, handback) = match &add.params[..] {
            [Param::String(_), Param::Integer(id), Param::Object(_), Param::Object(hb)] => {
                (*id, hb.clone())
            }
            other => panic!("unexpected add-listener params {:?}", other),
        };
        respond_ok(&mut server_end, &add, None).await;

        let mut push = Vec::new();
        encode_push(id, b"cache-full", &handback, &mut push).unwrap();
        write_frame(&mut server_end, &push).await;
        subscribed_tx.send(id).unwrap();

        // Wait for the removal, then fire a late event anyway.
        let remove = read_frame(&mut server_end).await;
        assert_eq!(remove.msg_type, MessageType::RemoveListener);
        respond_ok(&mut server_end, &remove, None).await;

        let mut late = Vec::new();
        encode_push(id, b"late-event", &handback, &mut late).unwrap();
        write_frame(&mut server_end, &late).await;

        // The client treats the unknown id as cleanup, not a fault: it
        // answers with a fire-and-forget removal request.
        let cleanup = read_frame(&mut server_end).await;
        assert_eq!(cleanup.msg_type, MessageType::RemoveListener);
        assert_eq!(cleanup.correlation_id, 0);
        server_end
    });

    let client = RegistryClient::open(client_end, test_config()).await.unwrap();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let id = client
        .add_notification_listener(
            &object(),
            None,
            b"my-handback".to_vec(),
            Arc::new(move |notification| {
                event_tx.send(notification).unwrap();
            }),
        )
        .await
        .unwrap();
    assert_eq!(client.subscription_count(), 1);
    assert_eq!(subscribed_rx.await.unwrap(), id);

    let notification = event_rx.recv().await.unwrap();
    assert_eq!(notification.subscription_id, id);
    assert_eq!(notification.event, b"cache-full");
    assert_eq!(notification.handback, b"my-handback");

    client.remove_notification_listener(id).await.unwrap();
    assert_eq!(client.subscription_count(), 0);

    peer.await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        event_rx.try_recv().is_err(),
        "no event may be delivered after unsubscribe"
    );
}

#[tokio::test]
async fn events_for_one_subscription_arrive_in_wire_order() {
    const EVENTS: usize = 50;

    let (client_end, mut server_end) = tokio::io::duplex(64 * 1024);
    let peer = tokio::spawn(async move {
        accept_session(&mut server_end, &[1, 2]).await;

        let add = read_frame(&mut server_end).await;
        let id = match &add.params[..] {
            [Param::String(_), Param::Integer(id), Param::Object(_), Param::Object(_)] => *id,
            other => panic!("unexpected add-listener params {:?}", other),
        };
        respond_ok(&mut server_end, &add, None).await;

        // A burst of back-to-back events on one subscription.
        for i in 0..EVENTS {
            let mut push = Vec::new();
            encode_push(id, format!("evt-{}", i).as_bytes(), &[], &mut push).unwrap();
            write_frame(&mut server_end, &push).await;
        }
        server_end
    });

    let client = RegistryClient::open(client_end, test_config()).await.unwrap();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    client
        .add_notification_listener(
            &object(),
            None,
            vec![],
            Arc::new(move |notification| {
                event_tx.send(notification.event).unwrap();
            }),
        )
        .await
        .unwrap();

    for i in 0..EVENTS {
        let event = event_rx.recv().await.unwrap();
        assert_eq!(
            event,
            format!("evt-{}", i).into_bytes(),
            "event {} delivered out of order",
            i
        );
    }
    peer.await.unwrap();
}

#[tokio::test]
async fn failed_remote_registration_rolls_back_the_local_entry() {
    let (client_end, mut server_end) = tokio::io::duplex(64 * 1024);
    let peer = tokio::spawn(async move {
        accept_session(&mut server_end, &[1, 2]).await;
        let add = read_frame(&mut server_end).await;
        assert_eq!(add.msg_type, MessageType::AddListener);

        let error = registry_protocol::encode_error_object(&registry_core::ErrorObject::new(
            registry_core::OperationErrorKind::InstanceNotFound,
            "no such object",
        ));
        let mut body = Vec::new();
        encode_response(
            &ResponseFrame {
                msg_type: add.msg_type,
                correlation_id: add.correlation_id,
                outcome: Err(error),
            },
            &mut body,
        )
        .unwrap();
        write_frame(&mut server_end, &body).await;
        server_end
    });

    let client = RegistryClient::open(client_end, test_config()).await.unwrap();
    let err = client
        .add_notification_listener(&object(), None, vec![], Arc::new(|_| {}))
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            RemoteError::Operation {
                kind: registry_core::OperationErrorKind::InstanceNotFound,
                ..
            }
        ),
        "got {:?}",
        err
    );
    assert_eq!(client.subscription_count(), 0);
    peer.await.unwrap();
}
