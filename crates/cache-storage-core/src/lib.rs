//! Cache Storage connection layer.
//!
//! Brokers Cache API requests from a client connection to one storage engine
//! per browsing session, routes each asynchronous result back to the session
//! that asked for it, and turns per-session cache references into advisory
//! locks with the engine.
//!
//! ```text
//! client ──▶ CacheConnectionBroker ──▶ EngineProvider ──▶ CacheStorageEngine
//!   ▲               │  LockTable                          (one per session)
//!   └── ConnectionSink ◀── completions
//! ```

pub mod broker;
pub mod config;
pub mod engine;
pub mod error;
pub mod lock_table;
pub mod messages;
pub mod sink;
pub mod types;

pub use broker::CacheConnectionBroker;
pub use config::BrokerConfig;
pub use engine::{
    CacheStorageEngine, EngineProvider, MemoryEngine, MemoryEngineConfig, SessionEngines,
};
pub use error::{StorageError, StorageResult};
pub use lock_table::{Dereference, LockTable};
pub use messages::{CacheStorageRequest, CacheStorageResponse, InboundMessage, OutboundMessage};
pub use sink::{ChannelSink, ConnectionSink};
pub use types::*;
