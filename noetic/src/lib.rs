//! Main noetic crate providing a document-store interface over versioned key-value engines.
//!
//! This crate is the primary entry point for users of noetic. It re-exports
//! the core types from `noetic-core` and bundles the in-memory engine.
//!
//! # Features
//!
//! - **Declared collections** - Register collections with a key path and optional auto-increment
//! - **Lazy, shared connections** - Each collection is opened once, on first use, and reused
//! - **Key validation** - Records missing their primary key are rejected before any write
//! - **Equality queries** - `find_one`/`find_many` with `eq` and `not_eq`, plus match-based updates
//! - **Typed access** - Read and write any serde type through [`collection::TypedCollection`]
//!
//! # Quick Start
//!
//! ```ignore
//! use noetic::{prelude::*, memory::InMemoryStore};
//! use noetic::bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let registry = Registry::builder(InMemoryStore::new())
//!         .collection(CollectionConfig::new("users").key_path("id"))
//!         .collection(CollectionConfig::new("movies").key_path("id"))
//!         .collection(CollectionConfig::new("rentals").key_path(["movie", "customer"]))
//!         .build()?;
//!
//!     let users = registry.collection("users")?;
//!     users.insert_one(doc! { "id": 1, "name": "John" }).await?;
//!
//!     let john = users.query().find_one().field("id").eq(1).await?;
//!     println!("Found: {john:?}");
//!
//!     let movies = registry.collection("movies")?;
//!     movies
//!         .insert_many(vec![
//!             doc! { "id": "rio", "name": "Rio", "rent_price": 9.99 },
//!             doc! { "id": "up", "name": "Up", "rent_price": 4.99 },
//!         ])
//!         .await?;
//!
//!     let others = movies
//!         .query()
//!         .find_many()
//!         .limit(10)
//!         .field("id")
//!         .not_eq("rio")
//!         .await?;
//!     println!("Not Rio: {others:?}");
//!
//!     let patched = movies
//!         .update()
//!         .one(doc! { "id": "rio" }, doc! { "rent_price": 7.99 })
//!         .await?;
//!     println!("Patched: {patched:?}");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Typed Collections
//!
//! ```ignore
//! use noetic::{prelude::*, memory::InMemoryStore};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct Movie {
//!     pub id: String,
//!     pub name: String,
//!     pub rent_price: f64,
//! }
//!
//! let registry = Registry::register(InMemoryStore::new(), vec![CollectionConfig::new("movies")])?;
//! let movies = registry.collection("movies")?.typed::<Movie>();
//!
//! movies.insert_one(&Movie { id: "rio".into(), name: "Rio".into(), rent_price: 9.99 }).await?;
//! let rio = movies.find_one("id", "rio").await?;
//! ```
//!
//! # Engines
//!
//! - [`memory`] - In-memory engine for development and testing
//!
//! Any other engine plugs in by implementing the traits in [`backend`].

pub mod prelude;

pub use noetic_core::{
    backend, collection, config, connection, document, error, query, registry, validate,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage engine implementations.
pub mod memory {
    pub use noetic_memory::{
        InMemoryStore, InMemoryStoreBuilder, MemoryConnection, MemoryCursor, MemoryTransaction,
    };
}
