//! Coord - hierarchical coordination store
//!
//! The shared source of truth for config sets and cluster topology.
//!
//! # Features
//! - Persistent, ephemeral and sequential nodes with versioned data
//! - Store-wide revision counter with change subscription
//! - Chrooted client with bounded timeouts and parent creation
//! - Embedded in-process server with on-disk persistence
//!
//! # Usage Example
//! ```ignore
//! use std::sync::Arc;
//! use coord::{ClientConfig, MemoryStore, StoreClient};
//!
//! let store = MemoryStore::new();
//! let client = StoreClient::connect(Arc::new(store.connect()), &ClientConfig::default()).await?;
//! client.make_path("/configs/myconf").await?;
//! ```

pub mod client;
pub mod embedded;
pub mod error;
pub mod memory;
pub mod path;
pub mod store;

// Re-export commonly used types
pub use client::{ClientConfig, PutOutcome, StoreClient};
pub use embedded::EmbeddedServer;
pub use error::{StoreError, StoreResult};
pub use memory::{MemorySession, MemoryStore, StoreImage};
pub use store::{CoordinationStore, CreateMode, SessionId, Stat};
