//! Convenient re-exports of commonly used types from noetic.
//!
//! ```ignore
//! use noetic::prelude::*;
//! ```

pub use noetic_core::{
    backend::{StoreBackend, StoreBackendBuilder, StoreConnection, TransactionMode},
    collection::{Collection, InsertOutcome, TypedCollection, UpdateOutcome},
    config::{CollectionConfig, KeyPath, StoreOptions},
    document::{Record, RecordExt},
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Operator, Predicate},
    registry::{Registry, RegistryBuilder},
};
