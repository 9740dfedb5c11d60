//! Frontend/backend broker: transparent proxy and LRU load-balancing modes.

pub mod broker;
pub mod lru;

pub use broker::{run_lru, run_proxy, Mode};
pub use lru::WorkerTable;
