//! S4 (LRU fairness across two workers) and S5 (worker death / expiry)
//! scenario tests, driven entirely over the in-process mock transport.

use std::time::Duration;

use bytes::Bytes;
use rmpv::Value;
use rpc_broker::run_lru;
use rpc_proto::{mock_pair, Kind, Request, Response, Transport, WorkerRequest};
use uuid::Uuid;

async fn announce(worker_side: &mut impl Transport, worker_id: &Bytes) {
    let mut frames = vec![worker_id.clone()];
    frames.extend(Response::heartbeat().unwrap());
    worker_side.send(frames).await.unwrap();
}

async fn send_request(client_side: &mut impl Transport, method: &str) -> Uuid {
    let request = Request::new(method, Value::Nil);
    let request_id = request.request_id;
    let mut frames = vec![Bytes::from_static(b"client-1")];
    frames.extend(request.encode().unwrap());
    client_side.send(frames).await.unwrap();
    request_id
}

async fn recv_worker_request(worker_side: &mut impl Transport, expect_worker: &Bytes) -> WorkerRequest {
    let frames = worker_side.recv().await.unwrap();
    assert_eq!(&frames[0], expect_worker);
    WorkerRequest::decode(&frames[1..]).unwrap()
}

async fn reply_done(worker_side: &mut impl Transport, worker_id: &Bytes, request: &WorkerRequest) {
    let response = Response::new(request.client_id.clone(), request.request_id, Kind::Done, Value::Nil);
    let mut frames = vec![worker_id.clone()];
    frames.extend(response.encode().unwrap());
    worker_side.send(frames).await.unwrap();
}

#[tokio::test]
async fn lru_distribution_round_robins_across_two_workers() {
    let (mut client_side, frontend) = mock_pair();
    let (mut worker_side, backend) = mock_pair();
    tokio::spawn(run_lru(frontend, backend, Duration::from_secs(2)));

    let w1 = Bytes::from_static(b"w1");
    let w2 = Bytes::from_static(b"w2");
    announce(&mut worker_side, &w1).await;
    announce(&mut worker_side, &w2).await;

    send_request(&mut client_side, "sleep").await;
    let r1 = recv_worker_request(&mut worker_side, &w1).await;

    send_request(&mut client_side, "sleep").await;
    let r2 = recv_worker_request(&mut worker_side, &w2).await;

    reply_done(&mut worker_side, &w1, &r1).await;
    let _ = client_side.recv().await.unwrap();
    reply_done(&mut worker_side, &w2, &r2).await;
    let _ = client_side.recv().await.unwrap();

    send_request(&mut client_side, "sleep").await;
    let r3 = recv_worker_request(&mut worker_side, &w1).await;
    send_request(&mut client_side, "sleep").await;
    let r4 = recv_worker_request(&mut worker_side, &w2).await;

    assert_eq!(r3.method, "sleep");
    assert_eq!(r4.method, "sleep");
}

#[tokio::test]
async fn dead_worker_is_expired_and_traffic_routes_to_survivor() {
    let (mut client_side, frontend) = mock_pair();
    let (mut worker_side, backend) = mock_pair();
    let heartbeat_max = Duration::from_millis(80);
    tokio::spawn(run_lru(frontend, backend, heartbeat_max));

    let w1 = Bytes::from_static(b"w1");
    let w2 = Bytes::from_static(b"w2");
    announce(&mut worker_side, &w1).await;
    announce(&mut worker_side, &w2).await;

    // w1 takes a request and never replies (simulating a kill mid-request).
    send_request(&mut client_side, "hang").await;
    let _hung = recv_worker_request(&mut worker_side, &w1).await;

    // w2 keeps heartbeating so it survives the expiry window; w1 does not.
    for _ in 0..4 {
        tokio::time::sleep(heartbeat_max / 2).await;
        announce(&mut worker_side, &w2).await;
    }
    tokio::time::sleep(heartbeat_max * 2).await;

    send_request(&mut client_side, "ping").await;
    let routed = recv_worker_request(&mut worker_side, &w2).await;
    assert_eq!(routed.method, "ping");
}
