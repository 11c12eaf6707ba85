//! End-to-end tests for the request/reply engine.
//!
//! Each test binds a server and one or more clients on loopback.  Servers
//! run as spawned tokio tasks; raw [`Socket`]s stand in for clients where a
//! test needs byte-level control over what goes on the wire.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use udp_rpc::envelope::MALFORMED_REPLY;
use udp_rpc::{
    service_fn, ClientConfig, InvokeError, Outcome, Peer, Request, Response, RetryPolicy,
    RpcClient, Semantics, Server, ServerConfig, Service, ServiceError, SimulatorConfig, Socket,
    Status,
};

const OP_INCREMENT: i32 = 1;
const OP_WATCH: i32 = 2;
const OP_POKE: i32 = 3;

async fn ephemeral() -> Socket {
    Socket::bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("bind failed")
}

/// A service whose only state is a call counter, so tests can tell how many
/// times a request actually executed.
fn counter_service(calls: Arc<AtomicUsize>) -> impl Service {
    service_fn(move |req: &Request, _peer: Peer| match req.op {
        OP_INCREMENT => {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Outcome::ok(format!("call {n}")).with_payload((n as i32).to_le_bytes().to_vec()))
        }
        OP_WATCH => {
            let ms = u64::from_le_bytes(req.payload[..8].try_into().unwrap_or([0; 8]));
            Ok(Outcome::ok("watching").subscribe_caller(Duration::from_millis(ms)))
        }
        OP_POKE => Ok(Outcome::ok("poked").notify("something changed", req.payload.clone())),
        op => Err(ServiceError::UnknownOperation(op)),
    })
}

async fn start_server(semantics: Semantics) -> (std::net::SocketAddr, Arc<AtomicUsize>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let calls = Arc::new(AtomicUsize::new(0));
    let config = ServerConfig::new("127.0.0.1:0".parse().unwrap()).semantics(semantics);
    let server = Server::bind(config, counter_service(Arc::clone(&calls)))
        .await
        .expect("server bind");
    let addr = server.local_addr();
    server.spawn();
    (addr, calls)
}

fn fast_retry(attempt_ms: u64, deadline_ms: u64) -> RetryPolicy {
    RetryPolicy {
        attempt_timeout: Duration::from_millis(attempt_ms),
        retry_deadline: Duration::from_millis(deadline_ms),
    }
}

// ---------------------------------------------------------------------------
// Duplicate handling on the server
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_at_most_once_replays_identical_bytes() {
    let (server, calls) = start_server(Semantics::AtMostOnce).await;
    let client = ephemeral().await;
    let request = Request::new(42, OP_INCREMENT, vec![]).encode();

    client.send_to(&request, server).await.unwrap();
    let (first, _) = client.recv_from().await.unwrap();
    client.send_to(&request, server).await.unwrap();
    let (second, _) = client.recv_from().await.unwrap();

    assert_eq!(first, second, "duplicate must receive the stored bytes");
    assert_eq!(calls.load(Ordering::SeqCst), 1, "duplicate must not execute");

    // A new id from the same endpoint is a new request.
    client
        .send_to(&Request::new(43, OP_INCREMENT, vec![]).encode(), server)
        .await
        .unwrap();
    let (third, _) = client.recv_from().await.unwrap();
    assert_eq!(Response::decode(&third).unwrap().message, "call 2");
}

#[tokio::test]
async fn test_same_id_from_different_ports_executes_twice() {
    let (server, calls) = start_server(Semantics::AtMostOnce).await;
    let a = ephemeral().await;
    let b = ephemeral().await;
    let request = Request::new(7, OP_INCREMENT, vec![]).encode();

    a.send_to(&request, server).await.unwrap();
    a.recv_from().await.unwrap();
    b.send_to(&request, server).await.unwrap();
    b.recv_from().await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_at_least_once_reexecutes_duplicates() {
    let (server, calls) = start_server(Semantics::AtLeastOnce).await;
    let client = ephemeral().await;
    let request = Request::new(42, OP_INCREMENT, vec![]).encode();

    client.send_to(&request, server).await.unwrap();
    let (first, _) = client.recv_from().await.unwrap();
    client.send_to(&request, server).await.unwrap();
    let (second, _) = client.recv_from().await.unwrap();

    assert_ne!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_malformed_datagram_answered_with_question_marks() {
    let calls = Arc::new(AtomicUsize::new(0));
    let server = Server::bind(
        ServerConfig::new("127.0.0.1:0".parse().unwrap()),
        counter_service(Arc::clone(&calls)),
    )
    .await
    .unwrap();
    let addr = server.local_addr();
    let history = server.history();
    let stats = server.stats();
    server.spawn();

    let client = ephemeral().await;
    // Declares 99 bytes but carries 12.
    let mut bogus = Request::new(1, OP_INCREMENT, vec![]).encode();
    bogus[0..4].copy_from_slice(&99u32.to_le_bytes());
    client.send_to(&bogus, addr).await.unwrap();
    assert_eq!(client.recv_from().await.unwrap().0, MALFORMED_REPLY);

    client.send_to(b"hi", addr).await.unwrap();
    assert_eq!(client.recv_from().await.unwrap().0, MALFORMED_REPLY);

    assert!(history.is_empty());
    assert_eq!(stats.malformed(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_operation_is_error_status() {
    let (server, _) = start_server(Semantics::AtMostOnce).await;
    let client = RpcClient::connect(ClientConfig::new(server)).await.unwrap();

    let reply = client.invoke(99, vec![]).await.unwrap();
    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.message, "Unknown operation code 99");
}

// ---------------------------------------------------------------------------
// Client retry behaviour
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_client_round_trip() {
    let (server, calls) = start_server(Semantics::AtMostOnce).await;
    let client = RpcClient::connect(ClientConfig::new(server)).await.unwrap();

    for expected in 1..=3 {
        let reply = client.invoke(OP_INCREMENT, vec![]).await.unwrap();
        assert_eq!(reply.status, Status::Ok);
        assert_eq!(reply.payload, (expected as i32).to_le_bytes());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_at_most_once_gives_up_after_one_attempt() {
    // Bound but never answers.
    let silent = ephemeral().await;
    let config = ClientConfig::new(silent.local_addr)
        .semantics(Semantics::AtMostOnce)
        .retry(fast_retry(100, 5_000));
    let client = RpcClient::connect(config).await.unwrap();

    let err = client.invoke(OP_INCREMENT, vec![]).await.unwrap_err();
    match err {
        InvokeError::NoResponse { attempts, elapsed } => {
            assert_eq!(attempts, 1);
            assert!(elapsed < Duration::from_secs(1), "took {elapsed:?}");
        }
        other => panic!("expected NoResponse, got {other}"),
    }

    // Exactly one datagram reached the wire.
    assert!(silent.recv_from().await.is_ok());
    assert!(timeout(Duration::from_millis(100), silent.recv_from())
        .await
        .is_err());
}

#[tokio::test]
async fn test_at_least_once_terminates_under_total_loss() {
    let (server, calls) = start_server(Semantics::AtLeastOnce).await;
    let config = ClientConfig::new(server)
        .semantics(Semantics::AtLeastOnce)
        .retry(fast_retry(50, 300))
        .faults(SimulatorConfig::lossy(1.0));
    let client = RpcClient::connect(config).await.unwrap();

    let result = timeout(Duration::from_secs(2), client.invoke(OP_INCREMENT, vec![]))
        .await
        .expect("invoke must honour its own deadline");

    match result {
        Err(InvokeError::NoResponse { attempts, elapsed }) => {
            assert!(attempts >= 2, "only {attempts} attempt(s)");
            assert!(elapsed >= Duration::from_millis(300));
            assert!(elapsed < Duration::from_millis(900), "overran: {elapsed:?}");
        }
        other => panic!("expected NoResponse, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_at_least_once_retries_through_loss() {
    let (server, _) = start_server(Semantics::AtMostOnce).await;
    let config = ClientConfig::new(server)
        .semantics(Semantics::AtLeastOnce)
        .retry(fast_retry(50, 10_000))
        .faults(SimulatorConfig {
            loss_rate: 0.5,
            seed: Some(7),
            ..SimulatorConfig::default()
        });
    let client = RpcClient::connect(config).await.unwrap();

    for _ in 0..5 {
        let reply = client.invoke(OP_INCREMENT, vec![]).await.unwrap();
        assert_eq!(reply.status, Status::Ok);
    }
}

#[tokio::test]
async fn test_retransmissions_reuse_request_id() {
    let server = ephemeral().await;
    let config = ClientConfig::new(server.local_addr)
        .semantics(Semantics::AtLeastOnce)
        .retry(fast_retry(50, 400));
    let client = RpcClient::connect(config).await.unwrap();

    let server_task = tokio::spawn(async move {
        let (first, _) = server.recv_from().await.unwrap();
        let (second, from) = server.recv_from().await.unwrap();
        assert_eq!(first, second, "retransmission must be byte-identical");
        let req = Request::decode(&second).unwrap();
        let reply = Response::new(req.request_id, Status::Ok, "finally");
        server.send_to(&reply.encode(), from).await.unwrap();
    });

    let reply = client.invoke(OP_INCREMENT, vec![1, 2, 3]).await.unwrap();
    assert_eq!(reply.message, "finally");
    server_task.await.unwrap();
}

#[tokio::test]
async fn test_callbacks_and_noise_do_not_end_the_wait() {
    let server = ephemeral().await;
    let client = RpcClient::connect(ClientConfig::new(server.local_addr).retry(fast_retry(1_000, 1_000)))
        .await
        .unwrap();
    let mut callbacks = client.callbacks();

    let server_task = tokio::spawn(async move {
        let (bytes, from) = server.recv_from().await.unwrap();
        let req = Request::decode(&bytes).unwrap();

        let cb = Response::callback("Account 1000 updated", vec![9]);
        server.send_to(&cb.encode(), from).await.unwrap();
        let stale = Response::new(req.request_id.wrapping_sub(1), Status::Ok, "stale");
        server.send_to(&stale.encode(), from).await.unwrap();
        server.send_to(MALFORMED_REPLY, from).await.unwrap();
        let real = Response::new(req.request_id, Status::Fail, "real");
        server.send_to(&real.encode(), from).await.unwrap();
    });

    let reply = client.invoke(OP_INCREMENT, vec![]).await.unwrap();
    assert_eq!(reply.message, "real");
    assert_eq!(reply.status, Status::Fail);

    let cb = callbacks.try_recv().expect("callback routed to handler");
    assert!(cb.is_callback());
    assert_eq!(cb.message, "Account 1000 updated");
    assert!(callbacks.try_recv().is_err());
    server_task.await.unwrap();
}

#[tokio::test]
async fn test_replies_from_other_hosts_are_ignored() {
    let server = ephemeral().await;
    let stranger = ephemeral().await;
    let client = RpcClient::connect(ClientConfig::new(server.local_addr).retry(fast_retry(1_000, 1_000)))
        .await
        .unwrap();
    let mut callbacks = client.callbacks();

    let server_task = tokio::spawn(async move {
        let (bytes, from) = server.recv_from().await.unwrap();
        let req = Request::decode(&bytes).unwrap();

        let forged = Response::new(req.request_id, Status::Ok, "forged");
        stranger.send_to(&forged.encode(), from).await.unwrap();
        let cb = Response::callback("Account 1000 updated", vec![]);
        stranger.send_to(&cb.encode(), from).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let real = Response::new(req.request_id, Status::Ok, "real");
        server.send_to(&real.encode(), from).await.unwrap();
    });

    let reply = client.invoke(OP_INCREMENT, vec![]).await.unwrap();
    assert_eq!(reply.message, "real");
    assert!(callbacks.try_recv().is_err(), "callback from a stranger delivered");
    server_task.await.unwrap();
}

// ---------------------------------------------------------------------------
// Leased callbacks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_subscriber_receives_callbacks_until_lease_ends() {
    let (server, _) = start_server(Semantics::AtMostOnce).await;
    let watcher = ephemeral().await;
    let actor = RpcClient::connect(ClientConfig::new(server)).await.unwrap();

    watcher
        .send_to(
            &Request::new(1, OP_WATCH, 300u64.to_le_bytes().to_vec()).encode(),
            server,
        )
        .await
        .unwrap();
    let ack = Response::decode(&watcher.recv_from().await.unwrap().0).unwrap();
    assert_eq!(ack.message, "watching");

    actor.invoke(OP_POKE, b"one".to_vec()).await.unwrap();
    let (bytes, _) = timeout(Duration::from_secs(1), watcher.recv_from())
        .await
        .expect("callback within lease")
        .unwrap();
    let cb = Response::decode(&bytes).unwrap();
    assert!(cb.is_callback());
    assert_eq!(cb.payload, b"one");

    tokio::time::sleep(Duration::from_millis(400)).await;
    actor.invoke(OP_POKE, b"two".to_vec()).await.unwrap();
    assert!(
        timeout(Duration::from_millis(200), watcher.recv_from())
            .await
            .is_err(),
        "no callback after the lease expired"
    );
}

#[tokio::test]
async fn test_poke_without_subscribers_still_replies() {
    let (server, _) = start_server(Semantics::AtMostOnce).await;
    let client = RpcClient::connect(ClientConfig::new(server)).await.unwrap();
    let reply = client.invoke(OP_POKE, vec![]).await.unwrap();
    assert_eq!(reply.message, "poked");
}
