//! SQLite-backed document store.
//!
//! - One table per collection: `(id TEXT PRIMARY KEY, doc TEXT NOT NULL)` with the JSON
//!   document in `doc`.
//! - Ascending/unique indexes are expression indexes over `json_extract(doc, '$.field')`.
//! - Text indexes are FTS5 tables named `{collection}__fts_{field}` kept in sync by an
//!   `AFTER INSERT` trigger.
//!
//! The loader is the only writer while it runs; two loads against the same file are not
//! supported.

use std::path::{Path, PathBuf};

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use serde_json::Value;
use tracing::debug;

use super::store::{
    document_id, is_valid_identifier, DocumentFailure, DocumentStore, FieldExpr, FindQuery,
    GroupQuery, GroupRow, GroupSort, IndexKind, IndexSpec, SortOrder, StoreError,
};

pub struct SqliteStore {
    conn: Connection,
    target: String,
}

impl SqliteStore {
    /// Open (or create) a store file. Failure to open is reported as `Unavailable`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let target = path.display().to_string();
        let conn = Connection::open(&path).map_err(|e| StoreError::Unavailable {
            target: target.clone(),
            reason: e.to_string(),
        })?;
        apply_bulk_load_pragmas(&conn).map_err(|e| StoreError::Unavailable {
            target: target.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self { conn, target })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Unavailable {
            target: ":memory:".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            conn,
            target: ":memory:".to_string(),
        })
    }

    /// Names of the indexes SQLite reports for a collection table.
    pub fn index_names(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        let table = table_name(collection)?;
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL ORDER BY name",
        )?;
        let names = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Ids of documents whose text-indexed `field` matches an FTS5 query.
    pub fn search_text(
        &self,
        collection: &str,
        field: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let fts = fts_table_name(collection, field)?;
        if !table_exists(&self.conn, &fts)? {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id FROM \"{fts}\" WHERE \"{fts}\" MATCH ?1 ORDER BY rank LIMIT ?2"
        ))?;
        let ids = stmt
            .query_map(params![query, limit as i64], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn ensure_collection(&self, collection: &str) -> Result<String, StoreError> {
        let table = table_name(collection)?;
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (id TEXT PRIMARY KEY, doc TEXT NOT NULL)"
        ))?;
        Ok(table)
    }

    fn existing_table(&self, collection: &str) -> Result<Option<String>, StoreError> {
        let table = table_name(collection)?;
        Ok(table_exists(&self.conn, &table)?.then_some(table))
    }

    fn insert_into(&self, table: &str, collection: &str, doc: &Value) -> Result<(), StoreError> {
        let id = document_id(doc)?;
        let body = serde_json::to_string(doc)?;
        self.conn
            .prepare_cached(&format!("INSERT INTO \"{table}\" (id, doc) VALUES (?1, ?2)"))?
            .execute(params![id, body])
            .map(|_| ())
            .map_err(|err| classify_insert_error(err, collection, &id, &self.target))
    }
}

impl DocumentStore for SqliteStore {
    fn describe(&self) -> String {
        format!("sqlite:{}", self.target)
    }

    fn ping(&mut self) -> Result<(), StoreError> {
        self.conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(|e| StoreError::Unavailable {
                target: self.target.clone(),
                reason: e.to_string(),
            })
    }

    fn drop_collection(&mut self, collection: &str) -> Result<(), StoreError> {
        let table = table_name(collection)?;
        let fts_tables: Vec<String> = {
            let mut stmt = self.conn.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND sql LIKE 'CREATE VIRTUAL TABLE%' AND name LIKE ?1",
            )?;
            let pattern = format!("{table}__fts_%");
            let rows = stmt.query_map([pattern], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .filter(|name| name.starts_with(&format!("{table}__fts_")))
                .collect()
        };
        for fts in fts_tables {
            self.conn
                .execute_batch(&format!("DROP TABLE IF EXISTS \"{fts}\""))?;
        }
        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS \"{table}\""))?;
        debug!(collection, "dropped collection");
        Ok(())
    }

    fn create_index(&mut self, collection: &str, index: &IndexSpec) -> Result<(), StoreError> {
        let table = self.ensure_collection(collection)?;
        if !is_valid_identifier(&index.name) || index.name.contains('.') {
            return Err(StoreError::InvalidName(index.name.clone()));
        }
        let expr = sql_expr(&FieldExpr::path(&index.field))?;
        let as_index_error = |err: rusqlite::Error| StoreError::Index {
            collection: collection.to_string(),
            index: index.name.clone(),
            reason: err.to_string(),
        };
        match index.kind {
            IndexKind::Ascending | IndexKind::Unique => {
                let unique = if index.kind == IndexKind::Unique {
                    "UNIQUE "
                } else {
                    ""
                };
                let name = format!("{table}__{}", index.name);
                self.conn
                    .execute_batch(&format!(
                        "CREATE {unique}INDEX IF NOT EXISTS \"{name}\" ON \"{table}\" ({expr})"
                    ))
                    .map_err(as_index_error)?;
            }
            IndexKind::Text => {
                let fts = fts_table_name(collection, &index.field)?;
                let path = json_path(&index.field);
                self.conn
                    .execute_batch(&format!(
                        "CREATE VIRTUAL TABLE IF NOT EXISTS \"{fts}\" USING fts5(id UNINDEXED, body);
                         DELETE FROM \"{fts}\";
                         INSERT INTO \"{fts}\" (id, body) SELECT id, {expr} FROM \"{table}\";
                         CREATE TRIGGER IF NOT EXISTS \"{fts}_ai\" AFTER INSERT ON \"{table}\" BEGIN
                             INSERT INTO \"{fts}\" (id, body) VALUES (new.id, json_extract(new.doc, '{path}'));
                         END;"
                    ))
                    .map_err(as_index_error)?;
            }
        }
        Ok(())
    }

    fn insert_many(&mut self, collection: &str, docs: &[Value]) -> Result<usize, StoreError> {
        let table = self.ensure_collection(collection)?;
        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = Vec::with_capacity(docs.len());
        let mut failures = Vec::new();
        for doc in docs {
            // A constraint failure aborts only its own statement; the transaction goes on.
            match self.insert_into(&table, collection, doc) {
                Ok(()) => inserted.push(document_id(doc)?),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => failures.push(DocumentFailure {
                    id: document_id(doc).unwrap_or_default(),
                    reason: err.to_string(),
                }),
            }
        }
        tx.commit().map_err(|e| StoreError::Unavailable {
            target: self.target.clone(),
            reason: format!("commit failed: {e}"),
        })?;
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
        let table = self.ensure_collection(collection)?;
        self.insert_into(&table, collection, doc)
    }

    fn count(&self, collection: &str) -> Result<u64, StoreError> {
        let Some(table) = self.existing_table(collection)? else {
            return Ok(0);
        };
        let n: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    fn count_distinct(&self, collection: &str, expr: &FieldExpr) -> Result<u64, StoreError> {
        let Some(table) = self.existing_table(collection)? else {
            return Ok(0);
        };
        let sql = sql_expr(expr)?;
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(DISTINCT {sql}) FROM \"{table}\""),
            [],
            |row| row.get(0),
        )?;
        Ok(n.max(0) as u64)
    }

    fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Value>, StoreError> {
        let Some(table) = self.existing_table(collection)? else {
            return Ok(Vec::new());
        };
        let mut sql = format!("SELECT doc FROM \"{table}\"");
        let mut binds: Vec<SqlValue> = Vec::new();
        if let Some((expr, value)) = &query.filter {
            let column = sql_expr(expr)?;
            match json_to_sql(value) {
                SqlValue::Null => sql.push_str(&format!(" WHERE {column} IS NULL")),
                bound => {
                    sql.push_str(&format!(" WHERE {column} = ?"));
                    binds.push(bound);
                }
            }
        }
        if let Some((expr, order)) = &query.sort {
            let dir = match order {
                SortOrder::Ascending => "ASC",
                SortOrder::Descending => "DESC",
            };
            sql.push_str(&format!(" ORDER BY {} {dir}, rowid ASC", sql_expr(expr)?));
        } else {
            sql.push_str(" ORDER BY rowid ASC");
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let bodies = stmt
            .query_map(params_from_iter(binds), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(StoreError::from))
            .collect()
    }

    fn group(&self, collection: &str, query: &GroupQuery) -> Result<Vec<GroupRow>, StoreError> {
        let Some(table) = self.existing_table(collection)? else {
            return Ok(Vec::new());
        };
        let key = sql_expr(&query.key)?;
        let sum = match &query.sum {
            Some(expr) => format!("TOTAL({})", sql_expr(expr)?),
            None => "NULL".to_string(),
        };
        let order = match query.sort {
            GroupSort::KeyAscending => "k ASC",
            GroupSort::CountDescending => "c DESC, k ASC",
        };
        let mut sql = format!(
            "SELECT {key} AS k, COUNT(*) AS c, {sum} AS s FROM \"{table}\" GROUP BY k ORDER BY {order}"
        );
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                let key: SqlValue = row.get(0)?;
                let count: i64 = row.get(1)?;
                let sum: Option<f64> = row.get(2)?;
                Ok(GroupRow {
                    key: sql_to_json(key),
                    count: count.max(0) as u64,
                    sum,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// Bulk-load friendly settings; durability of a half-finished load is not a goal since a
/// rerun drops and rebuilds the collection.
fn apply_bulk_load_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = OFF;
PRAGMA temp_store = MEMORY;
PRAGMA busy_timeout = 3000;
"#,
    )
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool, StoreError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1",
            [table],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn table_name(collection: &str) -> Result<String, StoreError> {
    if is_valid_identifier(collection) && !collection.contains('.') {
        Ok(collection.to_string())
    } else {
        Err(StoreError::InvalidName(collection.to_string()))
    }
}

fn fts_table_name(collection: &str, field: &str) -> Result<String, StoreError> {
    let table = table_name(collection)?;
    if !is_valid_identifier(field) {
        return Err(StoreError::InvalidName(field.to_string()));
    }
    Ok(format!("{table}__fts_{}", field.replace('.', "_")))
}

fn json_path(field: &str) -> String {
    format!("$.{field}")
}

fn sql_expr(expr: &FieldExpr) -> Result<String, StoreError> {
    let dotted = expr.dotted();
    if !is_valid_identifier(dotted) {
        return Err(StoreError::InvalidName(dotted.to_string()));
    }
    let path = json_path(dotted);
    Ok(match expr {
        FieldExpr::Path(_) => format!("json_extract(doc, '{path}')"),
        FieldExpr::ArrayLen(_) => format!("json_array_length(doc, '{path}')"),
    })
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_to_json(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::from(i),
        SqlValue::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => Value::String(String::from_utf8_lossy(&b).into_owned()),
    }
}

fn classify_insert_error(err: rusqlite::Error, collection: &str, id: &str, target: &str) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(code, msg) if code.code == ErrorCode::ConstraintViolation => {
            StoreError::DuplicateKey {
                collection: collection.to_string(),
                id: id.to_string(),
                reason: msg.clone().unwrap_or_else(|| code.to_string()),
            }
        }
        rusqlite::Error::SqliteFailure(code, _)
            if matches!(
                code.code,
                ErrorCode::CannotOpen
                    | ErrorCode::DiskFull
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::NotADatabase
                    | ErrorCode::DatabaseCorrupt
            ) =>
        {
            StoreError::Unavailable {
                target: target.to_string(),
                reason: err.to_string(),
            }
        }
        _ => StoreError::Sqlite(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> SqliteStore {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_many(
                "products",
                &[
                    json!({"_id": "P_1", "offer_id": "1", "type": "Phone", "name": "Red phone",
                           "category": {"breadcrumbs": [{"level": 1}, {"level": 2}]}}),
                    json!({"_id": "P_2", "offer_id": "2", "type": "Phone", "name": "Blue phone",
                           "category": {"breadcrumbs": [{"level": 1}]}}),
                    json!({"_id": "P_3", "offer_id": "3", "type": "Case", "name": "Leather case",
                           "category": {"breadcrumbs": [{"level": 1}, {"level": 2}]}}),
                ],
            )
            .unwrap();
        store
    }

    #[test]
    fn insert_many_reports_rejected_duplicates() {
        let mut store = seeded();
        let err = store
            .insert_many(
                "products",
                &[json!({"_id": "P_4", "offer_id": "4"}), json!({"_id": "P_1", "offer_id": "1"})],
            )
            .unwrap_err();
        match err {
            StoreError::BulkWrite {
                inserted, failures, ..
            } => {
                assert_eq!(inserted, vec!["P_4".to_string()]);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].id, "P_1");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.count("products").unwrap(), 4);
    }

    #[test]
    fn groups_by_field_and_array_length() {
        let store = seeded();
        let by_type = store
            .group(
                "products",
                &GroupQuery::by(FieldExpr::path("type")).sorted(GroupSort::CountDescending),
            )
            .unwrap();
        assert_eq!(by_type[0].key, json!("Phone"));
        assert_eq!(by_type[0].count, 2);

        let by_depth = store
            .group(
                "products",
                &GroupQuery::by(FieldExpr::array_len("category.breadcrumbs")),
            )
            .unwrap();
        assert_eq!(
            by_depth.iter().map(|r| (r.key.clone(), r.count)).collect::<Vec<_>>(),
            vec![(json!(1), 1), (json!(2), 2)]
        );
    }

    #[test]
    fn find_filters_sorts_and_limits() {
        let store = seeded();
        let docs = store
            .find(
                "products",
                &FindQuery::all()
                    .filter_eq(FieldExpr::path("type"), "Phone")
                    .sort_by(FieldExpr::path("offer_id"), SortOrder::Descending)
                    .limit(1),
            )
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["_id"], json!("P_2"));
    }

    #[test]
    fn unique_index_fails_on_duplicate_values() {
        let mut store = seeded();
        store
            .insert_one("products", &json!({"_id": "Q_1", "offer_id": "1"}))
            .unwrap();
        let err = store
            .create_index("products", &IndexSpec::unique("idx_offer_id", "offer_id"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Index { .. }));
        store
            .create_index("products", &IndexSpec::ascending("idx_type", "type"))
            .unwrap();
        assert_eq!(
            store.index_names("products").unwrap(),
            vec!["products__idx_type".to_string()]
        );
    }

    #[test]
    fn text_index_tracks_later_inserts() {
        let mut store = seeded();
        store
            .create_index("products", &IndexSpec::text("idx_name_text", "name"))
            .unwrap();
        store
            .insert_one("products", &json!({"_id": "P_9", "offer_id": "9", "name": "Green phone"}))
            .unwrap();
        let mut hits = store.search_text("products", "name", "phone", 10).unwrap();
        hits.sort();
        assert_eq!(hits, vec!["P_1", "P_2", "P_9"]);
    }

    #[test]
    fn drop_collection_removes_documents_and_text_tables() {
        let mut store = seeded();
        store
            .create_index("products", &IndexSpec::text("idx_name_text", "name"))
            .unwrap();
        store.drop_collection("products").unwrap();
        assert_eq!(store.count("products").unwrap(), 0);
        assert!(store.search_text("products", "name", "phone", 10).unwrap().is_empty());
        store.drop_collection("products").unwrap();
    }

    #[test]
    fn rejects_unsafe_collection_names() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let err = store
            .insert_one("x\"; DROP TABLE y", &json!({"_id": "1"}))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidName(_)));
    }
}
