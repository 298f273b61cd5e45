//! Storage bindings for the timelock monitor: the k/v store backing RPC
//! metadata and the durable log queue, and the relational persistence layer
//! backing progress, events, flows, and notification state.

pub mod kv;
pub mod log_queue;
pub mod persistence;

pub use kv::{KvStore, MemoryKv, RedisKv};
pub use log_queue::LogQueue;
pub use persistence::Persistence;
