//! Document store contract consumed by the catalog loader.
//!
//! A store holds named collections of JSON documents keyed by their `_id` field. It only
//! has to support what a drop-and-rebuild bulk load and its read-side report need:
//! dropping a collection, building indexes, unordered batch inserts with a single-document
//! fallback, counts and simple grouping/sorting/limiting queries.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A JSON object carrying an `_id` member.
pub type Document = Value;

/// Name of the identity field every document carries.
pub const ID_FIELD: &str = "_id";

/// Per-document write failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot be reached or opened. Always fatal for a load.
    #[error("document store '{target}' is unavailable: {reason}")]
    Unavailable { target: String, reason: String },
    #[error("duplicate key in '{collection}' for document '{id}': {reason}")]
    DuplicateKey {
        collection: String,
        id: String,
        reason: String,
    },
    #[error("document has no string or numeric `_id`")]
    MissingId,
    #[error("invalid collection or field name '{0}'")]
    InvalidName(String),
    #[error("cannot build index '{index}' on '{collection}': {reason}")]
    Index {
        collection: String,
        index: String,
        reason: String,
    },
    /// Unordered batch insert finished with some documents rejected.
    #[error("bulk write to '{collection}' rejected {} of {} documents", .failures.len(), .failures.len() + .inserted.len())]
    BulkWrite {
        collection: String,
        inserted: Vec<String>,
        failures: Vec<DocumentFailure>,
    },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Connection-level errors abort a run; everything else is contained per step.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    Ascending,
    Unique,
    Text,
}

/// Single-field index definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub field: String,
    pub kind: IndexKind,
}

impl IndexSpec {
    pub fn ascending(name: &str, field: &str) -> Self {
        Self {
            name: name.to_string(),
            field: field.to_string(),
            kind: IndexKind::Ascending,
        }
    }

    pub fn unique(name: &str, field: &str) -> Self {
        Self {
            kind: IndexKind::Unique,
            ..Self::ascending(name, field)
        }
    }

    pub fn text(name: &str, field: &str) -> Self {
        Self {
            kind: IndexKind::Text,
            ..Self::ascending(name, field)
        }
    }
}

/// Value computed from a document for filtering, sorting and grouping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldExpr {
    /// Dotted field path, e.g. `metadata.total_products`.
    Path(String),
    /// Length of the array at a dotted path, e.g. `category.breadcrumbs`.
    ArrayLen(String),
}

impl FieldExpr {
    pub fn path(path: &str) -> Self {
        FieldExpr::Path(path.to_string())
    }

    pub fn array_len(path: &str) -> Self {
        FieldExpr::ArrayLen(path.to_string())
    }

    pub fn dotted(&self) -> &str {
        match self {
            FieldExpr::Path(p) | FieldExpr::ArrayLen(p) => p,
        }
    }

    /// Evaluate against an in-memory document; missing fields yield `Null`.
    pub fn eval(&self, doc: &Value) -> Value {
        match self {
            FieldExpr::Path(path) => lookup(doc, path).cloned().unwrap_or(Value::Null),
            FieldExpr::ArrayLen(path) => match lookup(doc, path) {
                Some(Value::Array(items)) => Value::from(items.len()),
                _ => Value::Null,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// `find` query: optional equality filter, optional sort, optional limit.
#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    pub filter: Option<(FieldExpr, Value)>,
    pub sort: Option<(FieldExpr, SortOrder)>,
    pub limit: Option<usize>,
}

impl FindQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filter_eq(mut self, expr: FieldExpr, value: impl Into<Value>) -> Self {
        self.filter = Some((expr, value.into()));
        self
    }

    pub fn sort_by(mut self, expr: FieldExpr, order: SortOrder) -> Self {
        self.sort = Some((expr, order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSort {
    /// Group key ascending.
    KeyAscending,
    /// Largest groups first; ties broken by key ascending.
    CountDescending,
}

/// Group-by aggregate: count per key, optionally summing a numeric field.
#[derive(Debug, Clone)]
pub struct GroupQuery {
    pub key: FieldExpr,
    pub sum: Option<FieldExpr>,
    pub sort: GroupSort,
    pub limit: Option<usize>,
}

impl GroupQuery {
    pub fn by(key: FieldExpr) -> Self {
        Self {
            key,
            sum: None,
            sort: GroupSort::KeyAscending,
            limit: None,
        }
    }

    pub fn summing(mut self, expr: FieldExpr) -> Self {
        self.sum = Some(expr);
        self
    }

    pub fn sorted(mut self, sort: GroupSort) -> Self {
        self.sort = sort;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupRow {
    pub key: Value,
    pub count: u64,
    /// Present when the query asked for a sum.
    pub sum: Option<f64>,
}

/// Write sink and read-side query surface for one logical database.
///
/// Reads against a collection that does not exist behave as reads against an empty
/// collection.
pub trait DocumentStore {
    /// Human-readable target used in diagnostics.
    fn describe(&self) -> String;

    /// Round-trip to confirm the store is reachable.
    fn ping(&mut self) -> Result<(), StoreError>;

    /// Remove a collection with all of its documents and indexes. Missing is not an error.
    fn drop_collection(&mut self, collection: &str) -> Result<(), StoreError>;

    fn create_index(&mut self, collection: &str, index: &IndexSpec) -> Result<(), StoreError>;

    /// Unordered insert: every document is attempted. Returns the number inserted when all
    /// succeed, otherwise `StoreError::BulkWrite` listing accepted ids and failures.
    fn insert_many(&mut self, collection: &str, docs: &[Document]) -> Result<usize, StoreError>;

    fn insert_one(&mut self, collection: &str, doc: &Document) -> Result<(), StoreError>;

    fn count(&self, collection: &str) -> Result<u64, StoreError>;

    /// Number of distinct non-null values of `expr`.
    fn count_distinct(&self, collection: &str, expr: &FieldExpr) -> Result<u64, StoreError>;

    fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Document>, StoreError>;

    fn group(&self, collection: &str, query: &GroupQuery) -> Result<Vec<GroupRow>, StoreError>;
}

impl<T: DocumentStore + ?Sized> DocumentStore for Box<T> {
    fn describe(&self) -> String {
        (**self).describe()
    }
    fn ping(&mut self) -> Result<(), StoreError> {
        (**self).ping()
    }
    fn drop_collection(&mut self, collection: &str) -> Result<(), StoreError> {
        (**self).drop_collection(collection)
    }
    fn create_index(&mut self, collection: &str, index: &IndexSpec) -> Result<(), StoreError> {
        (**self).create_index(collection, index)
    }
    fn insert_many(&mut self, collection: &str, docs: &[Document]) -> Result<usize, StoreError> {
        (**self).insert_many(collection, docs)
    }
    fn insert_one(&mut self, collection: &str, doc: &Document) -> Result<(), StoreError> {
        (**self).insert_one(collection, doc)
    }
    fn count(&self, collection: &str) -> Result<u64, StoreError> {
        (**self).count(collection)
    }
    fn count_distinct(&self, collection: &str, expr: &FieldExpr) -> Result<u64, StoreError> {
        (**self).count_distinct(collection, expr)
    }
    fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Document>, StoreError> {
        (**self).find(collection, query)
    }
    fn group(&self, collection: &str, query: &GroupQuery) -> Result<Vec<GroupRow>, StoreError> {
        (**self).group(collection, query)
    }
}

/// String form of a document's `_id`; numbers are accepted and rendered.
pub fn document_id(doc: &Value) -> Result<String, StoreError> {
    match doc.get(ID_FIELD) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(StoreError::MissingId),
    }
}

/// Resolve a dotted path inside a JSON document.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |node, key| node.get(key))
}

/// Collection names and field path segments are restricted to `[A-Za-z0-9_]`.
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .split('.')
            .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
}

/// Total order over JSON values used for sorting and group keys:
/// null < bool < number < string < array < object.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ if rank(a) != rank(b) => rank(a).cmp(&rank(b)),
        _ => a.to_string().cmp(&b.to_string()),
    }
}
