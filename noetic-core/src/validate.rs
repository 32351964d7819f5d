//! Primary-key presence checks run before a write is issued.

use bson::Document;

use crate::{
    config::CollectionConfig,
    error::{DocumentStoreError, DocumentStoreResult},
};

/// Outcome of [`validate_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValidation {
    /// The record may be written.
    Valid,
    /// None of the declared key fields is present.
    Missing {
        /// Every declared key field. Any one of them would have sufficed.
        required: Vec<String>,
        /// The declared key fields absent from the record.
        missing: Vec<String>,
    },
}

impl KeyValidation {
    /// Returns `true` for [`KeyValidation::Valid`].
    pub fn is_valid(&self) -> bool {
        matches!(self, KeyValidation::Valid)
    }

    /// Converts a failed validation into a [`DocumentStoreError::Validation`].
    ///
    /// `index` is the record's position when it belongs to a batch.
    pub fn into_result(
        self,
        collection: &str,
        record: &Document,
        index: Option<usize>,
    ) -> DocumentStoreResult<()> {
        match self {
            KeyValidation::Valid => Ok(()),
            KeyValidation::Missing { required, missing } => Err(DocumentStoreError::Validation {
                collection: collection.to_string(),
                required,
                missing,
                record: render_record(record),
                index,
            }),
        }
    }
}

/// Checks that `record` carries at least one of the collection's key fields.
///
/// Auto-increment collections always pass. A field counts as present even when
/// its value is null.
pub fn validate_key(config: &CollectionConfig, record: &Document) -> KeyValidation {
    if config.auto_increment {
        return KeyValidation::Valid;
    }

    let fields = config.key_path.fields();

    if fields.iter().any(|field| record.contains_key(*field)) {
        return KeyValidation::Valid;
    }

    KeyValidation::Missing {
        required: fields.iter().map(|f| f.to_string()).collect(),
        missing: fields
            .iter()
            .filter(|field| !record.contains_key(**field))
            .map(|f| f.to_string())
            .collect(),
    }
}

fn render_record(record: &Document) -> String {
    serde_json::to_string(record).unwrap_or_else(|_| record.to_string())
}
