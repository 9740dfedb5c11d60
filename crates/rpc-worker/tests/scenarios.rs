//! S1 (hello-world round trip) and S2 (streaming progress) scenario tests
//! against the worker loop, using the in-process mock transport.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rmpv::Value;
use rpc_proto::{mock_pair, Kind, Response, Transport, WorkerRequest};
use rpc_worker::{MethodRegistry, RemoteMethod, RequestContext, ServiceBuilder, Worker};
use uuid::Uuid;

struct HelloWorld;
#[async_trait::async_trait]
impl RemoteMethod for HelloWorld {
    async fn call(&self, _ctx: &RequestContext, kwargs: Value) -> Result<Value, String> {
        let name = kwargs
            .as_map()
            .and_then(|m| m.iter().find(|(k, _)| k.as_str() == Some("name")))
            .and_then(|(_, v)| v.as_str())
            .unwrap_or("world")
            .to_string();
        Ok(Value::String(format!("Hi, {name}").into()))
    }
}

struct CountTo;
#[async_trait::async_trait]
impl RemoteMethod for CountTo {
    async fn call(&self, ctx: &RequestContext, kwargs: Value) -> Result<Value, String> {
        let n = kwargs
            .as_map()
            .and_then(|m| m.iter().find(|(k, _)| k.as_str() == Some("n")))
            .and_then(|(_, v)| v.as_i64())
            .unwrap_or(0);
        for i in 1..=n {
            ctx.reply_update(Value::Integer(i.into()));
        }
        Ok(Value::Integer(n.into()))
    }
}

fn registry() -> MethodRegistry {
    ServiceBuilder::new()
        .remote("hello_world", Arc::new(HelloWorld))
        .remote("count_to", Arc::new(CountTo))
        .build()
}

async fn recv_past_heartbeats(transport: &mut impl Transport) -> Response {
    loop {
        let frames = transport.recv().await.unwrap();
        if Response::is_heartbeat_frame(&frames) {
            continue;
        }
        return Response::decode(&frames).unwrap();
    }
}

#[tokio::test]
async fn hello_world_round_trip() {
    let (mut broker_side, worker_side) = mock_pair();
    let worker = Worker::new(worker_side, registry(), Duration::from_secs(30));
    tokio::spawn(worker.run());

    let first = broker_side.recv().await.unwrap();
    assert!(Response::is_heartbeat_frame(&first));

    let request_id = Uuid::new_v4();
    let kwargs = Value::Map(vec![(Value::String("name".into()), Value::String("Ada".into()))]);
    let request = WorkerRequest {
        client_id: Bytes::from_static(b"client-1"),
        request_id,
        method: "hello_world".to_string(),
        kwargs,
    };
    broker_side.send(request.encode().unwrap()).await.unwrap();

    let response = recv_past_heartbeats(&mut broker_side).await;
    assert_eq!(response.kind, Kind::Done);
    assert_eq!(response.content, Value::String("Hi, Ada".into()));
}

#[tokio::test]
async fn streaming_progress_emits_updates_before_done() {
    let (mut broker_side, worker_side) = mock_pair();
    let worker = Worker::new(worker_side, registry(), Duration::from_secs(30));
    tokio::spawn(worker.run());

    let _ = broker_side.recv().await.unwrap();

    let request_id = Uuid::new_v4();
    let kwargs = Value::Map(vec![(Value::String("n".into()), Value::Integer(3.into()))]);
    let request = WorkerRequest {
        client_id: Bytes::from_static(b"client-1"),
        request_id,
        method: "count_to".to_string(),
        kwargs,
    };
    broker_side.send(request.encode().unwrap()).await.unwrap();

    let mut seen_updates = Vec::new();
    loop {
        let response = recv_past_heartbeats(&mut broker_side).await;
        match response.kind {
            Kind::Update => seen_updates.push(response.content),
            Kind::Done => {
                assert_eq!(response.content, Value::Integer(3.into()));
                break;
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }
    assert_eq!(
        seen_updates,
        vec![Value::Integer(1.into()), Value::Integer(2.into()), Value::Integer(3.into())]
    );
}
