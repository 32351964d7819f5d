//! Primary keys and their ordering.
//!
//! Records are kept in key order. Valid keys are numbers, dates, strings and
//! arrays of valid keys; they order by type first (number < date < string <
//! array) and then by value. Every numeric BSON representation is one number
//! type, so `Int32(1)`, `Int64(1)` and `Double(1.0)` are the same key.
//! Integers are compared exactly, including those past 2^53 that a double
//! cannot hold.

use std::cmp::Ordering;

use bson::{Bson, Document};

use noetic_core::config::{KeyPath, StoreSchema};

/// A comparable primary key.
#[derive(Debug, Clone)]
pub(crate) enum StoreKey {
    Int(i64),
    /// Only non-integral values and values outside the `i64` range.
    Float(f64),
    Date(i64),
    String(String),
    Array(Vec<StoreKey>),
}

impl StoreKey {
    /// Converts a BSON value into a key. Returns `None` for values that cannot be keys.
    pub fn from_bson(value: &Bson) -> Option<Self> {
        match value {
            Bson::Int32(value) => Some(StoreKey::Int(i64::from(*value))),
            Bson::Int64(value) => Some(StoreKey::Int(*value)),
            Bson::Double(value) if value.is_nan() => None,
            Bson::Double(value) if is_integral(*value) => Some(StoreKey::Int(*value as i64)),
            Bson::Double(value) => Some(StoreKey::Float(*value)),
            Bson::DateTime(value) => Some(StoreKey::Date(value.timestamp_millis())),
            Bson::String(value) => Some(StoreKey::String(value.clone())),
            Bson::Array(values) => values
                .iter()
                .map(StoreKey::from_bson)
                .collect::<Option<Vec<_>>>()
                .map(StoreKey::Array),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            StoreKey::Int(_) | StoreKey::Float(_) => 0,
            StoreKey::Date(_) => 1,
            StoreKey::String(_) => 2,
            StoreKey::Array(_) => 3,
        }
    }
}

impl Ord for StoreKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (StoreKey::Int(a), StoreKey::Int(b)) => a.cmp(b),
            (StoreKey::Float(a), StoreKey::Float(b)) => a.total_cmp(b),
            (StoreKey::Int(a), StoreKey::Float(b)) => cmp_int_float(*a, *b),
            (StoreKey::Float(a), StoreKey::Int(b)) => cmp_int_float(*b, *a).reverse(),
            (StoreKey::Date(a), StoreKey::Date(b)) => a.cmp(b),
            (StoreKey::String(a), StoreKey::String(b)) => a.cmp(b),
            (StoreKey::Array(a), StoreKey::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// 2^63, the first double past `i64::MAX`.
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

fn is_integral(value: f64) -> bool {
    value.fract() == 0.0 && (-I64_LIMIT..I64_LIMIT).contains(&value)
}

fn cmp_int_float(int: i64, float: f64) -> Ordering {
    if float >= I64_LIMIT {
        return Ordering::Less;
    }
    if float < -I64_LIMIT {
        return Ordering::Greater;
    }

    let whole = float.trunc();
    match int.cmp(&(whole as i64)) {
        Ordering::Equal if float > whole => Ordering::Less,
        Ordering::Equal if float < whole => Ordering::Greater,
        ordering => ordering,
    }
}

impl PartialOrd for StoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for StoreKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for StoreKey {}

/// Evaluates the store's key path against a record.
///
/// A single key path yields the field's value. A compound key path yields an
/// array of the components the record carries, in declared order, so records
/// holding only some components stay addressable. Returns `None` when no
/// component is present.
pub(crate) fn extract_key(schema: &StoreSchema, record: &Document) -> Option<Bson> {
    match &schema.key_path {
        KeyPath::Single(field) => record.get(field).cloned(),
        KeyPath::Compound(fields) => {
            let components = fields
                .iter()
                .filter_map(|field| record.get(field).cloned())
                .collect::<Vec<_>>();

            (!components.is_empty()).then_some(Bson::Array(components))
        }
    }
}
