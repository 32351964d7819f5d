//! Predicates and the query builder stages of a collection.
//!
//! Queries are single-field equality or inequality tests evaluated during a
//! forward scan of the collection. They are assembled through a closed set of
//! builder stages:
//!
//! ```ignore
//! // selector -> field -> operator (executes)
//! let rio = movies.query().find_one().field("id").eq("rio").await?;
//! let others = movies.query().find_many().limit(10).field("id").not_eq("rio").await?;
//! let targets = movies.update().many().field("genre").eq("animation").await?;
//! ```
//!
//! Field comparison follows strict-equality rules with one normalization: all
//! numeric representations compare by value, so an `Int32(1)` equals an
//! `Int64(1)` and a `Double(1.0)`. A record lacking the field never matches,
//! for either operator.

use bson::{Bson, Document};

use crate::{
    backend::StoreBackend,
    collection::{Collection, UpdateOutcome},
    error::DocumentStoreResult,
};

/// Comparison applied by a [`Predicate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// The field equals the value.
    Eq,
    /// The field is present and does not equal the value.
    NotEq,
}

/// A single-field test, optionally bounded by a result limit.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// The field to test.
    pub field: String,
    /// The comparison to apply.
    pub operator: Operator,
    /// The value to compare against.
    pub value: Bson,
    /// Maximum number of matches to collect. `None` collects every match.
    pub limit: Option<usize>,
}

impl Predicate {
    /// Creates an equality predicate without a limit.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self {
            field: field.into(),
            operator: Operator::Eq,
            value: value.into(),
            limit: None,
        }
    }

    /// Creates an inequality predicate without a limit.
    pub fn not_eq(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self {
            field: field.into(),
            operator: Operator::NotEq,
            value: value.into(),
            limit: None,
        }
    }

    /// Bounds the number of matches.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Tests a record against this predicate.
    pub fn matches(&self, record: &Document) -> bool {
        match record.get(&self.field) {
            Some(value) => match self.operator {
                Operator::Eq => values_equal(value, &self.value),
                Operator::NotEq => !values_equal(value, &self.value),
            },
            None => false,
        }
    }
}

/// Returns `true` if every field of `matcher` is present in `record` with an equal value.
///
/// An empty matcher matches every record.
pub fn matches_all(matcher: &Document, record: &Document) -> bool {
    matcher.iter().all(|(field, expected)| {
        record
            .get(field)
            .is_some_and(|actual| values_equal(actual, expected))
    })
}

/// Compares two values, treating every numeric representation as one number type.
///
/// Integers compare exactly; a double equals an integer only when it holds
/// that integer's value with no fraction.
pub fn values_equal(left: &Bson, right: &Bson) -> bool {
    match (as_number(left), as_number(right)) {
        (Some(a), Some(b)) => return numbers_equal(a, b),
        (Some(_), None) | (None, Some(_)) => return false,
        (None, None) => {}
    }

    match (left, right) {
        (Bson::Array(a), Bson::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Bson::Document(a), Bson::Document(b)) => {
            a.len() == b.len() && matches_all(a, b)
        }
        _ => left == right,
    }
}

#[derive(Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

fn as_number(value: &Bson) -> Option<Number> {
    match value {
        Bson::Int32(value) => Some(Number::Int(i64::from(*value))),
        Bson::Int64(value) => Some(Number::Int(*value)),
        Bson::Double(value) => Some(Number::Float(*value)),
        _ => None,
    }
}

fn numbers_equal(left: Number, right: Number) -> bool {
    // 2^63
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;

    match (left, right) {
        (Number::Int(a), Number::Int(b)) => a == b,
        (Number::Float(a), Number::Float(b)) => a == b,
        (Number::Int(int), Number::Float(float)) | (Number::Float(float), Number::Int(int)) => {
            float.fract() == 0.0 && (-LIMIT..LIMIT).contains(&float) && float as i64 == int
        }
    }
}

/// Entry point of `collection.query()`.
pub struct QueryBuilder<'a, B: StoreBackend> {
    collection: Collection<'a, B>,
}

impl<'a, B: StoreBackend + 'static> QueryBuilder<'a, B> {
    pub(crate) fn new(collection: Collection<'a, B>) -> Self {
        Self { collection }
    }

    /// Selects the first matching record.
    pub fn find_one(self) -> FindOne<'a, B> {
        FindOne { collection: self.collection }
    }

    /// Selects every matching record, optionally bounded by [`FindMany::limit`].
    pub fn find_many(self) -> FindMany<'a, B> {
        FindMany { collection: self.collection, limit: None }
    }
}

/// Selector stage of a single-record query.
pub struct FindOne<'a, B: StoreBackend> {
    collection: Collection<'a, B>,
}

impl<'a, B: StoreBackend + 'static> FindOne<'a, B> {
    /// Chooses the field to test.
    pub fn field(self, field: impl Into<String>) -> FindOneWhere<'a, B> {
        FindOneWhere { collection: self.collection, field: field.into() }
    }
}

/// Operator stage of a single-record query.
pub struct FindOneWhere<'a, B: StoreBackend> {
    collection: Collection<'a, B>,
    field: String,
}

impl<'a, B: StoreBackend + 'static> FindOneWhere<'a, B> {
    /// Returns the first record whose field equals `value`, or `None`.
    pub async fn eq(self, value: impl Into<Bson>) -> DocumentStoreResult<Option<Document>> {
        self.run(Predicate::eq(self.field.clone(), value)).await
    }

    /// Returns the first record whose field is present and differs from `value`, or `None`.
    pub async fn not_eq(self, value: impl Into<Bson>) -> DocumentStoreResult<Option<Document>> {
        self.run(Predicate::not_eq(self.field.clone(), value)).await
    }

    async fn run(&self, predicate: Predicate) -> DocumentStoreResult<Option<Document>> {
        Ok(self
            .collection
            .scan(predicate.with_limit(Some(1)))
            .await?
            .into_iter()
            .next())
    }
}

/// Selector stage of a multi-record query.
pub struct FindMany<'a, B: StoreBackend> {
    collection: Collection<'a, B>,
    limit: Option<usize>,
}

impl<'a, B: StoreBackend + 'static> FindMany<'a, B> {
    /// Stops the scan once `limit` matches were collected.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Chooses the field to test.
    pub fn field(self, field: impl Into<String>) -> FindManyWhere<'a, B> {
        FindManyWhere {
            collection: self.collection,
            field: field.into(),
            limit: self.limit,
        }
    }
}

/// Operator stage of a multi-record query.
pub struct FindManyWhere<'a, B: StoreBackend> {
    collection: Collection<'a, B>,
    field: String,
    limit: Option<usize>,
}

impl<'a, B: StoreBackend + 'static> FindManyWhere<'a, B> {
    /// Returns the records whose field equals `value`, in scan order.
    pub async fn eq(self, value: impl Into<Bson>) -> DocumentStoreResult<Vec<Document>> {
        let predicate = Predicate::eq(self.field, value).with_limit(self.limit);
        self.collection.scan(predicate).await
    }

    /// Returns the records whose field is present and differs from `value`, in scan order.
    pub async fn not_eq(self, value: impl Into<Bson>) -> DocumentStoreResult<Vec<Document>> {
        let predicate = Predicate::not_eq(self.field, value).with_limit(self.limit);
        self.collection.scan(predicate).await
    }
}

/// Entry point of `collection.update()`.
pub struct UpdateBuilder<'a, B: StoreBackend> {
    collection: Collection<'a, B>,
}

impl<'a, B: StoreBackend + 'static> UpdateBuilder<'a, B> {
    pub(crate) fn new(collection: Collection<'a, B>) -> Self {
        Self { collection }
    }

    /// Patches the first record matching every field of `matcher`.
    ///
    /// The patch is merged shallowly into the matched record, its fields
    /// winning on conflict. Resolves to `None` when nothing matches.
    pub async fn one(
        self,
        matcher: Document,
        patch: Document,
    ) -> DocumentStoreResult<Option<UpdateOutcome>> {
        self.collection.update_one(matcher, patch).await
    }

    /// Selects the records a bulk update would target.
    ///
    /// This runs the multi-record query path and returns the matches
    /// unchanged; no patch is applied.
    pub fn many(self) -> FindMany<'a, B> {
        FindMany { collection: self.collection, limit: None }
    }
}
