//! In-memory storage engine for noetic.
//!
//! This crate provides a thread-safe, in-memory implementation of the
//! [`StoreBackend`](noetic_core::backend::StoreBackend) trait modelled on
//! versioned, transactional key-value engines. It is meant for development
//! and tests, and for exercising the connection lifecycle without a host
//! engine.
//!
//! # Features
//!
//! - **Versioned databases** - Opens create or upgrade a database and its object store
//! - **Version-change notifications** - Open connections are told when the database is upgraded or deleted
//! - **Transactions** - Staged writes applied atomically on commit, uniqueness re-checked
//! - **Ordered keys** - Numbers, dates, strings and arrays, with auto-increment generation
//! - **Cursors** - Forward and backward traversal with in-place updates
//!
//! # Quick Start
//!
//! ```ignore
//! use noetic::{prelude::*, memory::InMemoryStore};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = InMemoryStore::builder().build().await?;
//!     let registry = Registry::register(backend, vec![CollectionConfig::new("users")])?;
//!
//!     registry
//!         .collection("users")?
//!         .insert_one(doc! { "id": 1, "name": "Alice" })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as noetic_memory;

mod key;
pub mod store;
pub mod transaction;

pub use store::{InMemoryStore, InMemoryStoreBuilder, MemoryConnection};
pub use transaction::{MemoryCursor, MemoryTransaction};
