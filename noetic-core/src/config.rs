//! Collection declarations and store-wide options.
//!
//! A [`CollectionConfig`] names a collection, the field(s) that make up its
//! primary key, and whether the engine generates keys. [`StoreOptions`] holds
//! the settings shared by every collection of a registry: the schema version
//! used when opening connections, and optional deadlines.
//!
//! Both types deserialize from JSON (or any serde format), so declarations can
//! live in configuration files:
//!
//! ```ignore
//! let configs: Vec<CollectionConfig> = serde_json::from_str(r#"[
//!     { "name": "users", "key_path": "id" },
//!     { "name": "events", "auto_increment": true },
//!     { "name": "rentals", "key_path": ["movie", "customer"] }
//! ]"#)?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Key path used when a declaration does not name one.
pub const DEFAULT_KEY_PATH: &str = "id";

/// Schema version requested from the engine when none is configured.
pub const DEFAULT_SCHEMA_VERSION: u32 = 1;

/// One or more field names forming a collection's primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    /// A single key field.
    Single(String),
    /// Several key fields. A record needs any one of them to pass validation.
    Compound(Vec<String>),
}

impl KeyPath {
    /// Returns the declared key fields in order.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            KeyPath::Single(field) => vec![field.as_str()],
            KeyPath::Compound(fields) => fields.iter().map(String::as_str).collect(),
        }
    }

    /// Returns `true` when the key path names more than one field.
    pub fn is_compound(&self) -> bool {
        matches!(self, KeyPath::Compound(_))
    }
}

impl Default for KeyPath {
    fn default() -> Self {
        KeyPath::Single(DEFAULT_KEY_PATH.to_string())
    }
}

impl From<&str> for KeyPath {
    fn from(field: &str) -> Self {
        KeyPath::Single(field.to_string())
    }
}

impl From<String> for KeyPath {
    fn from(field: String) -> Self {
        KeyPath::Single(field)
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(fields: Vec<&str>) -> Self {
        KeyPath::Compound(fields.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for KeyPath {
    fn from(fields: Vec<String>) -> Self {
        KeyPath::Compound(fields)
    }
}

impl<const N: usize> From<[&str; N]> for KeyPath {
    fn from(fields: [&str; N]) -> Self {
        KeyPath::Compound(fields.iter().map(|f| f.to_string()).collect())
    }
}

/// The object-store layout the engine creates when a collection is first opened.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoreSchema {
    /// The key path of the object store.
    pub key_path: KeyPath,
    /// Whether the engine generates keys for records that lack one.
    pub auto_increment: bool,
}

/// Declaration of a single collection.
///
/// # Example
///
/// ```ignore
/// let users = CollectionConfig::new("users").key_path("id");
/// let log = CollectionConfig::new("log").auto_increment(true);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// The collection name. Also names the engine database and object store.
    pub name: String,
    /// The primary-key field(s).
    #[serde(default)]
    pub key_path: KeyPath,
    /// Whether the engine generates keys.
    #[serde(default)]
    pub auto_increment: bool,
}

impl CollectionConfig {
    /// Creates a declaration with the default key path (`"id"`) and no auto-increment.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: KeyPath::default(),
            auto_increment: false,
        }
    }

    /// Sets the key path.
    pub fn key_path(mut self, key_path: impl Into<KeyPath>) -> Self {
        self.key_path = key_path.into();
        self
    }

    /// Sets whether the engine generates keys.
    pub fn auto_increment(mut self, auto_increment: bool) -> Self {
        self.auto_increment = auto_increment;
        self
    }

    /// Returns the object-store layout for this collection.
    pub fn schema(&self) -> StoreSchema {
        StoreSchema {
            key_path: self.key_path.clone(),
            auto_increment: self.auto_increment,
        }
    }

    /// Checks the declaration is usable before any storage is touched.
    pub fn validate(&self) -> DocumentStoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(DocumentStoreError::Configuration(
                "Collection name must not be empty".to_string(),
            ));
        }

        let fields = self.key_path.fields();

        if fields.is_empty() {
            return Err(DocumentStoreError::Configuration(format!(
                "Collection \"{}\" declares an empty key path",
                self.name
            )));
        }

        if fields.iter().any(|field| field.trim().is_empty()) {
            return Err(DocumentStoreError::Configuration(format!(
                "Collection \"{}\" declares a blank key-path field",
                self.name
            )));
        }

        if self.auto_increment && self.key_path.is_compound() {
            return Err(DocumentStoreError::Configuration(format!(
                "Collection \"{}\" cannot combine a compound key path with auto-increment",
                self.name
            )));
        }

        Ok(())
    }
}

/// Settings shared by every collection of a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// The schema version requested when opening connections.
    pub schema_version: u32,
    /// Deadline for opening a connection.
    pub open_timeout: Option<Duration>,
    /// Deadline for each collection operation, including any connection open it triggers.
    pub operation_timeout: Option<Duration>,
}

impl StoreOptions {
    /// Creates options with the default schema version and no deadlines.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the schema version.
    pub fn schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    /// Sets the connection-open deadline.
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = Some(timeout);
        self
    }

    /// Sets the per-operation deadline.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            schema_version: DEFAULT_SCHEMA_VERSION,
            open_timeout: None,
            operation_timeout: None,
        }
    }
}
