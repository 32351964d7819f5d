//! A document-store convenience layer over versioned, transactional key-value engines.
//!
//! This crate is the core of the noetic project and provides:
//!
//! - **Storage engine abstraction** ([`backend`]) - Traits a host engine implements: open/upgrade, transactions, cursors
//! - **Configuration** ([`config`]) - Collection declarations (key path, auto-increment) and store-wide options
//! - **Connection management** ([`connection`]) - One lazily opened, shared connection per collection
//! - **Key validation** ([`validate`]) - Primary-key presence checks before writes
//! - **Queries** ([`query`]) - Equality/inequality predicates and typed builder stages
//! - **Collections** ([`collection`]) - Insert, scan and match-based update operations
//! - **Registry** ([`registry`]) - Declared collections, looked up by name
//! - **Records** ([`document`]) - Conversion between serde types and stored records
//! - **Error handling** ([`error`]) - The error taxonomy and result type
//!
//! # Example
//!
//! ```ignore
//! use noetic::{prelude::*, memory::InMemoryStore};
//! use bson::doc;
//!
//! let registry = Registry::register(
//!     InMemoryStore::new(),
//!     vec![CollectionConfig::new("users").key_path("id")],
//! )?;
//!
//! let users = registry.collection("users")?;
//! let inserted = users.insert_one(doc! { "id": 1, "name": "John" }).await?;
//! assert_eq!(inserted.key, bson::Bson::Int32(1));
//!
//! let john = users.query().find_one().field("id").eq(1).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as noetic_core;

pub mod backend;
pub mod collection;
pub mod config;
pub mod connection;
pub mod document;
pub mod error;
pub mod query;
pub mod registry;
pub mod validate;

mod deadline;
#[cfg(test)]
mod mock;
mod mutation;
mod scan;
