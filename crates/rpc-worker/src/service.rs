//! Service contract.
//!
//! A statically typed host replaces Python's `getattr(self, f"remote__{name}")`
//! dynamic lookup with an explicit registration table built at construction
//! time: implementors call `register(name, handler)` instead of relying on
//! naming convention, and the registry resolves by name at dispatch time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rmpv::Value;
use rpc_proto::ClientId;
use uuid::Uuid;

/// Context passed to a remote method: identifies the call and carries the
/// channel through which it can push zero or more UPDATE payloads before
/// returning its DONE value.
pub struct RequestContext {
    pub client_id: ClientId,
    pub request_id: Uuid,
    updates: tokio::sync::mpsc::UnboundedSender<Value>,
}

impl RequestContext {
    pub fn new(
        client_id: ClientId,
        request_id: Uuid,
        updates: tokio::sync::mpsc::UnboundedSender<Value>,
    ) -> Self {
        Self {
            client_id,
            request_id,
            updates,
        }
    }

    /// Push an UPDATE payload for this request. Silently dropped if the
    /// worker's reply channel has already been torn down.
    pub fn reply_update(&self, payload: Value) {
        let _ = self.updates.send(payload);
    }
}

/// A single remote method. The return value becomes the DONE payload; `Err`
/// becomes an ERROR response carrying `"Error: "` + the message.
#[async_trait]
pub trait RemoteMethod: Send + Sync {
    async fn call(&self, ctx: &RequestContext, kwargs: Value) -> Result<Value, String>;
}

/// The set of remote methods a `Service` exposes, keyed by name with the
/// `remote__` sentinel prefix already stripped.
pub struct MethodRegistry {
    methods: HashMap<String, Arc<dyn RemoteMethod>>,
}

impl MethodRegistry {
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn RemoteMethod>) {
        self.methods.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RemoteMethod>> {
        self.methods.get(name).cloned()
    }

    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }
}

struct Ping;
#[async_trait]
impl RemoteMethod for Ping {
    async fn call(&self, _ctx: &RequestContext, _kwargs: Value) -> Result<Value, String> {
        Ok(Value::Nil)
    }
}

struct ClientConfig {
    names: Vec<String>,
}
#[async_trait]
impl RemoteMethod for ClientConfig {
    async fn call(&self, _ctx: &RequestContext, _kwargs: Value) -> Result<Value, String> {
        Ok(Value::Array(
            self.names.iter().cloned().map(Value::String).map(|s| s.into()).collect(),
        ))
    }
}

/// Builder for a `MethodRegistry`: collects user `remote__*` methods, then
/// wires up `client_config` with the final method-name list.
pub struct ServiceBuilder {
    registry: MethodRegistry,
}

impl ServiceBuilder {
    pub fn new() -> Self {
        Self {
            registry: MethodRegistry {
                methods: HashMap::new(),
            },
        }
    }

    pub fn remote(mut self, name: impl Into<String>, handler: Arc<dyn RemoteMethod>) -> Self {
        self.registry.register(name, handler);
        self
    }

    /// Register `client_config` and `ping`, then freeze the registry.
    pub fn build(mut self) -> MethodRegistry {
        self.registry.register("ping", Arc::new(Ping));
        let mut names = self.registry.method_names();
        names.sort();
        self.registry
            .register("client_config", Arc::new(ClientConfig { names }));
        self.registry
    }
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve and invoke `method` against `registry`. Exactly one outcome is
/// produced: `Ok(Value)` is the DONE payload, `Err` carries the string an
/// ERROR response should report.
pub async fn call_remote(
    registry: &MethodRegistry,
    ctx: &RequestContext,
    method: &str,
    kwargs: Value,
) -> Result<Value, String> {
    match registry.get(method) {
        None => Err(format!("Service does not support remote method \"{method}\"")),
        Some(handler) => match handler.call(ctx, kwargs).await {
            Ok(value) => Ok(value),
            Err(message) => Err(format!("Error: {message}")),
        },
    }
}
