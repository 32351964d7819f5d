//! Conversion between typed values and stored records.
//!
//! Collections store plain [`bson::Document`] records. Any serde type can be
//! written and read through [`RecordExt`], which converts through BSON (and
//! JSON, for interop with `serde_json` values).

use bson::{Bson, Document, de::deserialize_from_bson, ser::serialize_to_bson};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, from_value, to_value};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Marker for types that can be stored as records.
///
/// Implemented for every `Serialize + DeserializeOwned` type that is
/// `Send + Sync`. The type must serialize to a map (a struct or a map type).
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Record for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Extension trait providing record conversion utilities.
pub trait RecordExt: Record {
    /// Converts this value to a stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the value is not a map.
    fn to_record(&self) -> DocumentStoreResult<Document>;

    /// Creates a value from a stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails or the structure is invalid.
    fn from_record(record: Document) -> DocumentStoreResult<Self>;

    /// Converts this value to a JSON value.
    fn to_json(&self) -> DocumentStoreResult<Value>;

    /// Creates a value from a JSON value.
    fn from_json(value: Value) -> DocumentStoreResult<Self>;
}

impl<R: Record> RecordExt for R {
    fn to_record(&self) -> DocumentStoreResult<Document> {
        match serialize_to_bson(self)? {
            Bson::Document(record) => Ok(record),
            other => Err(DocumentStoreError::Serialization(format!(
                "Expected a record (map), got {:?}",
                other.element_type()
            ))),
        }
    }

    fn from_record(record: Document) -> DocumentStoreResult<Self> {
        Ok(deserialize_from_bson(Bson::Document(record))?)
    }

    fn to_json(&self) -> DocumentStoreResult<Value> {
        Ok(to_value(self)?)
    }

    fn from_json(value: Value) -> DocumentStoreResult<Self> {
        Ok(from_value(value)?)
    }
}

/// Builds a record from a JSON object.
///
/// # Errors
///
/// Returns an error if `value` is not a JSON object.
pub fn record_from_json(value: Value) -> DocumentStoreResult<Document> {
    <Document as RecordExt>::from_json(value)
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Movie {
        id: String,
        name: String,
        rent_price: f64,
    }

    #[test]
    fn typed_values_round_trip_through_records() {
        let movie = Movie {
            id: "rio".to_string(),
            name: "Rio".to_string(),
            rent_price: 9.99,
        };

        let record = movie.to_record().unwrap();
        assert_eq!(record, doc! { "id": "rio", "name": "Rio", "rent_price": 9.99 });
        assert_eq!(Movie::from_record(record).unwrap(), movie);
    }

    #[test]
    fn scalars_are_not_records() {
        let err = 42_i32.to_record().unwrap_err();

        assert!(matches!(err, DocumentStoreError::Serialization(_)));
    }

    #[test]
    fn json_objects_become_records() {
        let record = record_from_json(json!({ "id": "rio", "tags": ["kids"] })).unwrap();

        assert_eq!(record.get_str("id").unwrap(), "rio");
        assert!(record_from_json(json!([1, 2])).is_err());
    }
}
