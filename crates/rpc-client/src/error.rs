//! Client-side error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("bootstrap has not completed: only client_config and ping are callable")]
    NotBootstrapped,
    #[error("unknown remote method \"{0}\"")]
    UnknownMethod(String),
    #[error("client is disconnected from its reactor task")]
    Disconnected,
    #[error(transparent)]
    Proto(#[from] rpc_proto::RpcError),
}
