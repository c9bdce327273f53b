mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use common::{MockBroker, fast_settings, wait_until};
use weft::client::{RequestCallback, ResponseCallback};
use weft::message::ERR_RESPONSE_TIMEOUT;
use weft::{Client, ClientError, Reply, Request, Response};

async fn connected_client(broker: &MockBroker) -> Client {
    let client = Client::new(fast_settings(vec![broker.broker()])).unwrap();
    client.connect().await.unwrap();
    client
}

/// Serves `topic` by echoing the request payload back, reversed.
async fn start_echo_server(broker: &MockBroker, topic: &'static str) -> Arc<Client> {
    let server = Arc::new(connected_client(broker).await);
    let responder = Arc::clone(&server);
    let callback: Arc<dyn RequestCallback> = Arc::new(move |request: &Request| {
        let mut payload = request.payload.clone();
        payload.reverse();
        let response = Response::for_request(request).with_payload(payload);
        responder.send_response(response).unwrap();
    });
    server.add_request_callback(topic, callback);
    server.subscribe(topic);
    wait_until(|| broker.subscriber_count(topic) == 1, "server subscription").await;
    server
}

#[tokio::test]
async fn sync_request_round_trip() {
    let broker = MockBroker::start().await;
    let server = start_echo_server(&broker, "/svc/echo").await;
    let requester = connected_client(&broker).await;

    let request = Request::new("/svc/echo").with_payload(b"abc".to_vec());
    let request_id = request.message_id.clone();
    let reply = requester
        .sync_request(request, Some(Duration::from_secs(5)))
        .await
        .unwrap();

    assert!(!reply.is_error());
    assert_eq!(reply.request_message_id(), request_id);
    assert_eq!(reply.payload(), b"cba");

    requester.disconnect().await;
    server.disconnect().await;
}

#[tokio::test]
async fn sync_request_times_out_when_unserved() {
    let broker = MockBroker::start().await;
    let requester = connected_client(&broker).await;

    let started = Instant::now();
    let err = requester
        .sync_request(Request::new("/svc/nobody"), Some(Duration::from_millis(500)))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, ClientError::RequestTimeout(_)));
    assert!(elapsed >= Duration::from_millis(450), "returned too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "returned too late: {elapsed:?}");

    requester.disconnect().await;
}

#[tokio::test]
async fn async_request_round_trip() {
    let broker = MockBroker::start().await;
    let server = start_echo_server(&broker, "/svc/echo").await;
    let requester = connected_client(&broker).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let callback: Arc<dyn ResponseCallback> = Arc::new(move |reply: &Reply| {
        let _ = tx.send(reply.clone());
    });

    let request = Request::new("/svc/echo").with_payload(b"ping".to_vec());
    let request_id = request.message_id.clone();
    requester
        .async_request(request, callback, Some(Duration::from_secs(5)))
        .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.request_message_id(), request_id);
    assert_eq!(reply.payload(), b"gnip");

    requester.disconnect().await;
    server.disconnect().await;
}

#[tokio::test]
async fn async_request_timeout_fires_exactly_once() {
    let broker = MockBroker::start().await;
    let requester = connected_client(&broker).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let callback: Arc<dyn ResponseCallback> = Arc::new(move |reply: &Reply| {
        let _ = tx.send(reply.clone());
    });

    requester
        .async_request(
            Request::new("/svc/nobody"),
            callback,
            Some(Duration::from_millis(300)),
        )
        .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    match reply {
        Reply::Error(error) => assert_eq!(error.error_code, ERR_RESPONSE_TIMEOUT),
        other => panic!("Expected a timeout error, got {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(rx.try_recv().is_err(), "callback fired more than once");

    requester.disconnect().await;
}

#[tokio::test]
async fn late_reply_is_dropped_and_client_stays_usable() {
    let broker = MockBroker::start().await;

    // A server that replies well after the requester has given up.
    let server = Arc::new(connected_client(&broker).await);
    let responder = Arc::clone(&server);
    let callback: Arc<dyn RequestCallback> = Arc::new(move |request: &Request| {
        let responder = Arc::clone(&responder);
        let request = request.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(600)).await;
            let _ = responder.send_response(Response::for_request(&request));
        });
    });
    server.add_request_callback("/svc/slow", callback);
    server.subscribe("/svc/slow");
    wait_until(|| broker.subscriber_count("/svc/slow") == 1, "server subscription").await;

    let requester = connected_client(&broker).await;
    let err = requester
        .sync_request(Request::new("/svc/slow"), Some(Duration::from_millis(200)))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::RequestTimeout(_)));

    // The late reply arrives, matches nothing and is discarded; the client
    // still serves new requests afterwards.
    tokio::time::sleep(Duration::from_millis(800)).await;

    let echo = start_echo_server(&broker, "/svc/echo").await;
    let reply = requester
        .sync_request(
            Request::new("/svc/echo").with_payload(b"ok".to_vec()),
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    assert_eq!(reply.payload(), b"ko");

    requester.disconnect().await;
    server.disconnect().await;
    echo.disconnect().await;
}

#[tokio::test]
async fn sync_request_while_disconnected_fails_fast() {
    let broker = MockBroker::start().await;
    let client = Client::new(fast_settings(vec![broker.broker()])).unwrap();

    let err = client
        .sync_request(Request::new("/svc/echo"), Some(Duration::from_secs(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
}
