//! In-process document store.
//!
//! Backs `--dry-run` loads and the test suite. Enforces `_id` uniqueness and unique
//! indexes the same way the SQLite store does, so write-failure paths behave alike.

use std::collections::{BTreeMap, HashSet};

use indexmap::IndexMap;
use serde_json::Value;

use super::store::{
    compare_values, document_id, is_valid_identifier, DocumentFailure, DocumentStore, FieldExpr,
    FindQuery, GroupQuery, GroupRow, GroupSort, IndexKind, IndexSpec, SortOrder, StoreError,
};

#[derive(Debug, Default)]
struct Collection {
    docs: IndexMap<String, Value>,
    indexes: Vec<IndexSpec>,
}

impl Collection {
    fn unique_conflict(&self, doc: &Value) -> Option<&IndexSpec> {
        self.indexes
            .iter()
            .filter(|idx| idx.kind == IndexKind::Unique)
            .find(|idx| {
                let expr = FieldExpr::path(&idx.field);
                let candidate = expr.eval(doc);
                self.docs.values().any(|existing| expr.eval(existing) == candidate)
            })
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: BTreeMap<String, Collection>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn indexes(&self, collection: &str) -> Vec<IndexSpec> {
        self.collections
            .get(collection)
            .map(|c| c.indexes.clone())
            .unwrap_or_default()
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<&Value> {
        self.collections.get(collection)?.docs.get(id)
    }

    fn check_name(name: &str) -> Result<(), StoreError> {
        if is_valid_identifier(name) && !name.contains('.') {
            Ok(())
        } else {
            Err(StoreError::InvalidName(name.to_string()))
        }
    }

    fn docs<'a>(&'a self, collection: &str) -> impl Iterator<Item = &'a Value> + 'a {
        self.collections
            .get(collection)
            .into_iter()
            .flat_map(|c| c.docs.values())
    }
}

impl DocumentStore for MemoryStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn ping(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    fn drop_collection(&mut self, collection: &str) -> Result<(), StoreError> {
        Self::check_name(collection)?;
        self.collections.remove(collection);
        Ok(())
    }

    fn create_index(&mut self, collection: &str, index: &IndexSpec) -> Result<(), StoreError> {
        Self::check_name(collection)?;
        if !is_valid_identifier(&index.field) {
            return Err(StoreError::InvalidName(index.field.clone()));
        }
        let coll = self.collections.entry(collection.to_string()).or_default();
        if coll.indexes.iter().any(|existing| existing.name == index.name) {
            return Ok(());
        }
        if index.kind == IndexKind::Unique {
            let expr = FieldExpr::path(&index.field);
            let mut seen = HashSet::new();
            for doc in coll.docs.values() {
                let key = expr.eval(doc).to_string();
                if !seen.insert(key.clone()) {
                    return Err(StoreError::Index {
                        collection: collection.to_string(),
                        index: index.name.clone(),
                        reason: format!("duplicate value {key} for {}", index.field),
                    });
                }
            }
        }
        coll.indexes.push(index.clone());
        Ok(())
    }

    fn insert_many(&mut self, collection: &str, docs: &[Value]) -> Result<usize, StoreError> {
        let mut inserted = Vec::with_capacity(docs.len());
        let mut failures = Vec::new();
        for doc in docs {
            match self.insert_one(collection, doc) {
                Ok(()) => inserted.push(document_id(doc)?),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => failures.push(DocumentFailure {
                    id: document_id(doc).unwrap_or_default(),
                    reason: err.to_string(),
                }),
            }
        }
        if failures.is_empty() {
            Ok(inserted.len())
        } else {
            Err(StoreError::BulkWrite {
                collection: collection.to_string(),
                inserted,
                failures,
            })
        }
    }

    fn insert_one(&mut self, collection: &str, doc: &Value) -> Result<(), StoreError> {
        Self::check_name(collection)?;
        let id = document_id(doc)?;
        let coll = self.collections.entry(collection.to_string()).or_default();
        if coll.docs.contains_key(&id) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                id,
                reason: "_id already exists".to_string(),
            });
        }
        if let Some(index) = coll.unique_conflict(doc) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                id,
                reason: format!("unique index {} violated", index.name),
            });
        }
        coll.docs.insert(id, doc.clone());
        Ok(())
    }

    fn count(&self, collection: &str) -> Result<u64, StoreError> {
        Ok(self.docs(collection).count() as u64)
    }

    fn count_distinct(&self, collection: &str, expr: &FieldExpr) -> Result<u64, StoreError> {
        let distinct: HashSet<String> = self
            .docs(collection)
            .map(|doc| expr.eval(doc))
            .filter(|v| !v.is_null())
            .map(|v| v.to_string())
            .collect();
        Ok(distinct.len() as u64)
    }

    fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Value>, StoreError> {
        let mut out: Vec<Value> = self
            .docs(collection)
            .filter(|doc| match &query.filter {
                Some((expr, expected)) => &expr.eval(doc) == expected,
                None => true,
            })
            .cloned()
            .collect();
        if let Some((expr, order)) = &query.sort {
            out.sort_by(|a, b| {
                let ord = compare_values(&expr.eval(a), &expr.eval(b));
                match order {
                    SortOrder::Ascending => ord,
                    SortOrder::Descending => ord.reverse(),
                }
            });
        }
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    fn group(&self, collection: &str, query: &GroupQuery) -> Result<Vec<GroupRow>, StoreError> {
        let mut groups: IndexMap<String, GroupRow> = IndexMap::new();
        for doc in self.docs(collection) {
            let key = query.key.eval(doc);
            let row = groups.entry(key.to_string()).or_insert_with(|| GroupRow {
                key: key.clone(),
                count: 0,
                sum: query.sum.as_ref().map(|_| 0.0),
            });
            row.count += 1;
            if let (Some(expr), Some(total)) = (&query.sum, row.sum.as_mut()) {
                *total += expr.eval(doc).as_f64().unwrap_or(0.0);
            }
        }
        let mut rows: Vec<GroupRow> = groups.into_values().collect();
        match query.sort {
            GroupSort::KeyAscending => rows.sort_by(|a, b| compare_values(&a.key, &b.key)),
            GroupSort::CountDescending => rows.sort_by(|a, b| {
                b.count
                    .cmp(&a.count)
                    .then_with(|| compare_values(&a.key, &b.key))
            }),
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}
