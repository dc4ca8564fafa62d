//! Document store port and the write primitives the rest of the crate relies on.
//!
//! Every correctness guarantee of the lifecycle engine is pushed down into
//! [`DocumentStore::update`]: preconditions and mutations in one [`Update`] are
//! evaluated and applied atomically by the backend.

pub mod feed;
pub mod memory;
pub mod postgres;
mod watch;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use tokio::sync::broadcast;

pub use feed::{Change, ChangeFeed};
pub use memory::MemoryStore;
pub use postgres::PgDocumentStore;
pub use watch::{SnapshotStream, watch};

/// A stored document: its key, a version bumped on every write, and the JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub version: u64,
    pub body: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },
    #[error("document {collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },
    #[error("precondition failed: {0}")]
    PreconditionFailed(Precondition),
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub(crate) fn not_found(collection: &str, id: &str) -> Self {
        Self::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub(crate) fn already_exists(collection: &str, id: &str) -> Self {
        Self::AlreadyExists {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

/// The persistent key-document store the repositories sit on.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read. An absent document is `Ok(None)`.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Create-if-absent. Fails with [`StoreError::AlreadyExists`] when the key is taken.
    async fn create(&self, collection: &str, id: &str, body: Value)
    -> Result<Document, StoreError>;

    /// Atomically check every precondition of `update` and apply its mutations.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        update: Update,
    ) -> Result<Document, StoreError>;

    /// Hard delete. Returns whether a document was removed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Change notifications for every committed write.
    fn changes(&self) -> broadcast::Receiver<Change>;
}

// ── Preconditions & mutations ──

#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// The document version must still be the one the caller read.
    Version(u64),
    /// A top-level field must hold exactly this value.
    FieldEquals { field: String, value: Value },
    /// No element of an array field may carry `key == value`.
    NoElementWith {
        array: String,
        key: String,
        value: Value,
    },
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precondition::Version(v) => write!(f, "expected version {v}"),
            Precondition::FieldEquals { field, value } => write!(f, "expected {field} == {value}"),
            Precondition::NoElementWith { array, key, value } => {
                write!(f, "expected no element of {array} with {key} == {value}")
            }
        }
    }
}

impl Precondition {
    fn holds(&self, body: &Value, version: u64) -> bool {
        match self {
            Precondition::Version(expected) => *expected == version,
            Precondition::FieldEquals { field, value } => body
                .get(field)
                .is_some_and(|actual| values_equal(actual, value)),
            Precondition::NoElementWith { array, key, value } => match body.get(array) {
                Some(Value::Array(items)) => !items
                    .iter()
                    .any(|item| item.get(key).is_some_and(|v| values_equal(v, value))),
                _ => true,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Partial field update.
    Set { field: String, value: Value },
    /// List append; a missing field starts as an empty list.
    Append { field: String, value: Value },
}

/// A conditional write: all preconditions must hold, then all mutations apply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub preconditions: Vec<Precondition>,
    pub mutations: Vec<Mutation>,
    /// Create the document from an empty body when it does not exist.
    pub upsert: bool,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_version(mut self, version: u64) -> Self {
        self.preconditions.push(Precondition::Version(version));
        self
    }

    pub fn expect_field(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.preconditions.push(Precondition::FieldEquals {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn expect_no_element(mut self, array: &str, key: &str, value: impl Into<Value>) -> Self {
        self.preconditions.push(Precondition::NoElementWith {
            array: array.to_string(),
            key: key.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.mutations.push(Mutation::Set {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn append(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.mutations.push(Mutation::Append {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn upsert(mut self) -> Self {
        self.upsert = true;
        self
    }

    /// Evaluate against a document body at `version`, mutating it in place.
    ///
    /// Nothing is written to `body` unless every precondition holds.
    pub fn apply_to(&self, body: &mut Value, version: u64) -> Result<(), StoreError> {
        if let Some(failed) = self
            .preconditions
            .iter()
            .find(|p| !p.holds(body, version))
        {
            return Err(StoreError::PreconditionFailed(failed.clone()));
        }

        let fields = body
            .as_object_mut()
            .ok_or_else(|| StoreError::InvalidDocument("body is not an object".to_string()))?;

        for mutation in &self.mutations {
            match mutation {
                Mutation::Set { field, value } => {
                    fields.insert(field.clone(), value.clone());
                }
                Mutation::Append { field, value } => {
                    let slot = fields.entry(field.clone()).or_insert(Value::Null);
                    if slot.is_null() {
                        *slot = Value::Array(Vec::new());
                    }
                    match slot {
                        Value::Array(items) => items.push(value.clone()),
                        _ => {
                            return Err(StoreError::InvalidDocument(format!(
                                "field {field} is not a list"
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

pub(crate) fn ensure_object(collection: &str, id: &str, body: &Value) -> Result<(), StoreError> {
    if body.is_object() {
        Ok(())
    } else {
        Err(StoreError::InvalidDocument(format!(
            "{collection}/{id}: body must be a JSON object"
        )))
    }
}

pub(crate) fn empty_body() -> Value {
    Value::Object(Map::new())
}

// ── Queries ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl FilterOp {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            FilterOp::Eq => ordering == Ordering::Equal,
            FilterOp::Lt => ordering == Ordering::Less,
            FilterOp::Lte => ordering != Ordering::Greater,
            FilterOp::Gt => ordering == Ordering::Greater,
            FilterOp::Gte => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// A filtered, ordered view over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(name: &str) -> Self {
        Self {
            collection: name.to_string(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter(mut self, field: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn where_eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, body: &Value) -> bool {
        self.filters.iter().all(|f| {
            body.get(&f.field)
                .and_then(|actual| compare_values(actual, &f.value))
                .is_some_and(|ordering| f.op.accepts(ordering))
        })
    }

    /// Filter, sort and truncate an unordered set of documents.
    pub fn evaluate(&self, docs: impl IntoIterator<Item = Document>) -> Vec<Document> {
        let mut selected: Vec<Document> = docs.into_iter().filter(|d| self.matches(&d.body)).collect();

        if let Some((field, direction)) = &self.order_by {
            selected.sort_by(|a, b| {
                let ordering = match (a.body.get(field), b.body.get(field)) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Greater,
                    (None, Some(_)) => Ordering::Less,
                    (None, None) => Ordering::Equal,
                };
                let ordering = ordering.then_with(|| a.id.cmp(&b.id));
                match direction {
                    Direction::Asc => ordering,
                    Direction::Desc => ordering.reverse(),
                }
            });
        } else {
            selected.sort_by(|a, b| a.id.cmp(&b.id));
        }

        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

/// Ordering between two JSON scalars of the same kind. Numbers compare by value.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (x, y) if x == y => Some(Ordering::Equal),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Some(Ordering::Equal)
}
