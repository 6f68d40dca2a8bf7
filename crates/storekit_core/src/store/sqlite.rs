//! SQLite-backed relational handle.
//!
//! # Responsibility
//! - Open and configure one SQLite connection per handle.
//! - Store each entity kind in its own `(key, body)` table with JSON bodies.
//! - Expose raw SQL execution and explicit transactions.
//!
//! # Invariants
//! - Opened connections have `foreign_keys=ON` and a busy timeout.
//! - Schema version is mirrored to `PRAGMA user_version`.
//! - A transaction is open whenever the connection is out of autocommit mode,
//!   including one opened by a raw `BEGIN`.
//! - Writes inside a transaction are counted and reported by `commit`.

use crate::connection::{redact, ConnectionOptions};
use crate::model::entity::EntityKind;
use crate::store::{BackendKind, HandleConstructor, StoreError, StoreHandle, StoreResult};
use log::{error, info};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const SCHEMA_VERSION: u32 = 1;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds `SqliteHandle`s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConstructor;

impl HandleConstructor for SqliteConstructor {
    fn backend(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn construct(&self, options: &ConnectionOptions) -> StoreResult<Arc<dyn StoreHandle>> {
        Ok(Arc::new(SqliteHandle::open(options)?))
    }
}

struct SqliteState {
    conn: Option<Connection>,
    /// Writes counted since the open transaction began.
    tx_writes: Option<usize>,
}

/// One SQLite connection shared behind a mutex.
pub struct SqliteHandle {
    connection_string: String,
    entity_kinds: BTreeSet<EntityKind>,
    state: Mutex<SqliteState>,
}

impl SqliteHandle {
    /// Opens the database named by `options`.
    ///
    /// Accepts file paths, `:memory:` and `file:` URIs, with an optional
    /// `sqlite:` prefix.
    ///
    /// # Side effects
    /// - Emits `db_open` logging events with duration and status.
    pub fn open(options: &ConnectionOptions) -> StoreResult<Self> {
        let started_at = Instant::now();
        let raw = options.connection_string();
        let target = raw.strip_prefix("sqlite:").unwrap_or(raw).trim();
        if target.is_empty() {
            return Err(StoreError::InvalidConnection(redact(raw)));
        }
        info!(
            "event=db_open module=store backend=sqlite status=start target={}",
            redact(target)
        );

        let conn = Connection::open(target).and_then(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            Ok(conn)
        });
        let conn = match conn {
            Ok(conn) => conn,
            Err(err) => {
                error!(
                    "event=db_open module=store backend=sqlite status=error duration_ms={} error_code=db_open_failed error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                return Err(err.into());
            }
        };

        info!(
            "event=db_open module=store backend=sqlite status=ok duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(Self {
            connection_string: raw.to_string(),
            entity_kinds: options.entity_kinds().clone(),
            state: Mutex::new(SqliteState {
                conn: Some(conn),
                tx_writes: None,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SqliteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection, &mut Option<usize>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut state = self.lock();
        let SqliteState { conn, tx_writes } = &mut *state;
        let conn = conn.as_ref().ok_or(StoreError::Closed)?;
        f(conn, tx_writes)
    }
}

impl StoreHandle for SqliteHandle {
    fn backend(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn ensure_schema(&self) -> StoreResult<()> {
        self.with_conn(|conn, _| {
            let current: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
            if current > SCHEMA_VERSION {
                return Err(StoreError::UnsupportedSchemaVersion {
                    db_version: current,
                    latest_supported: SCHEMA_VERSION,
                });
            }

            let mut ddl = String::new();
            for kind in &self.entity_kinds {
                ddl.push_str(&format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        key TEXT PRIMARY KEY NOT NULL,
                        body TEXT NOT NULL
                    );",
                    quote_ident(kind.name())
                ));
            }
            ddl.push_str(&format!("PRAGMA user_version = {SCHEMA_VERSION};"));
            conn.execute_batch(&ddl)?;
            Ok(())
        })
    }

    fn find(&self, collection: &str, key: &str) -> StoreResult<Option<Value>> {
        self.with_conn(|conn, _| {
            let mut stmt = conn.prepare(&format!(
                "SELECT body FROM {} WHERE key = ?1;",
                quote_ident(collection)
            ))?;
            let mut rows = stmt.query([key])?;
            match rows.next()? {
                Some(row) => {
                    let body: String = row.get(0)?;
                    Ok(Some(parse_body(collection, &body)?))
                }
                None => Ok(None),
            }
        })
    }

    fn insert(&self, collection: &str, key: &str, document: Value) -> StoreResult<()> {
        let body = serde_json::to_string(&document)?;
        self.with_conn(|conn, tx_writes| {
            let result = conn.execute(
                &format!(
                    "INSERT INTO {} (key, body) VALUES (?1, ?2);",
                    quote_ident(collection)
                ),
                params![key, body],
            );
            match result {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    return Err(StoreError::DuplicateKey {
                        collection: collection.to_string(),
                        key: key.to_string(),
                    });
                }
                Err(err) => return Err(err.into()),
            }
            if !conn.is_autocommit() {
                *tx_writes.get_or_insert(0) += 1;
            }
            Ok(())
        })
    }

    fn scan(&self, collection: &str) -> StoreResult<Vec<Value>> {
        self.with_conn(|conn, _| {
            let mut stmt = conn.prepare(&format!(
                "SELECT body FROM {} ORDER BY key ASC;",
                quote_ident(collection)
            ))?;
            let mut rows = stmt.query([])?;
            let mut documents = Vec::new();
            while let Some(row) = rows.next()? {
                let body: String = row.get(0)?;
                documents.push(parse_body(collection, &body)?);
            }
            Ok(documents)
        })
    }

    fn execute_raw(&self, command: &str, params: &[Value]) -> StoreResult<usize> {
        let bind_values: Vec<SqlValue> = params.iter().map(json_to_sql).collect();
        self.with_conn(|conn, tx_writes| {
            let was_open = !conn.is_autocommit();
            let changed = conn.execute(command, params_from_iter(bind_values))?;
            match (was_open, conn.is_autocommit()) {
                (_, true) => *tx_writes = None,
                (true, false) => *tx_writes.get_or_insert(0) += changed,
                (false, false) => *tx_writes = Some(0),
            }
            Ok(changed)
        })
    }

    fn begin(&self) -> StoreResult<()> {
        self.with_conn(|conn, tx_writes| {
            if !conn.is_autocommit() {
                return Err(StoreError::TransactionAlreadyOpen);
            }
            conn.execute_batch("BEGIN IMMEDIATE;")?;
            *tx_writes = Some(0);
            Ok(())
        })
    }

    fn commit(&self) -> StoreResult<usize> {
        self.with_conn(|conn, tx_writes| {
            if conn.is_autocommit() {
                *tx_writes = None;
                return Err(StoreError::NoTransaction);
            }
            conn.execute_batch("COMMIT;")?;
            Ok(tx_writes.take().unwrap_or(0))
        })
    }

    fn rollback(&self) -> StoreResult<()> {
        self.with_conn(|conn, tx_writes| {
            *tx_writes = None;
            if conn.is_autocommit() {
                return Err(StoreError::NoTransaction);
            }
            conn.execute_batch("ROLLBACK;")?;
            Ok(())
        })
    }

    fn in_transaction(&self) -> bool {
        self.lock()
            .conn
            .as_ref()
            .is_some_and(|conn| !conn.is_autocommit())
    }

    fn close(&self) -> StoreResult<()> {
        let mut state = self.lock();
        state.tx_writes = None;
        match state.conn.take() {
            Some(conn) => conn.close().map_err(|(_, err)| StoreError::Sqlite(err)),
            None => Ok(()),
        }
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn parse_body(collection: &str, body: &str) -> StoreResult<Value> {
    serde_json::from_str(body).map_err(|err| {
        StoreError::InvalidData(format!("invalid JSON body in `{collection}`: {err}"))
    })
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(int) => SqlValue::Integer(int),
            None => SqlValue::Real(number.as_f64().unwrap_or_default()),
        },
        Value::String(text) => SqlValue::Text(text.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::{quote_ident, SqliteHandle};
    use crate::connection::{ConnectionDescriptor, ConnectionOptions};
    use crate::model::entity::EntityKind;
    use crate::store::{StoreError, StoreHandle};
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn memory_handle() -> SqliteHandle {
        let kinds: BTreeSet<EntityKind> = [EntityKind::new("Order")].into_iter().collect();
        let options = ConnectionOptions::new(&ConnectionDescriptor::new(":memory:"), Arc::new(kinds));
        let handle = SqliteHandle::open(&options).expect("open in-memory sqlite");
        handle.ensure_schema().expect("ensure schema");
        handle
    }

    #[test]
    fn quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("Order"), "\"Order\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn insert_then_find_and_scan() {
        let handle = memory_handle();
        handle
            .insert("Order", "b", json!({"id": "b", "total": 2}))
            .expect("insert b");
        handle
            .insert("order", "a", json!({"id": "a", "total": 1}))
            .expect("table names are case-insensitive in sqlite");

        let found = handle.find("Order", "a").expect("find a");
        assert_eq!(found, Some(json!({"id": "a", "total": 1})));
        assert_eq!(handle.find("Order", "missing").expect("find missing"), None);

        let all = handle.scan("Order").expect("scan");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["id"], "a");
    }

    #[test]
    fn duplicate_key_is_reported() {
        let handle = memory_handle();
        handle.insert("Order", "a", json!({})).expect("first insert");
        let err = handle
            .insert("Order", "a", json!({}))
            .expect_err("duplicate insert must fail");
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
    }

    #[test]
    fn transaction_counts_writes_and_rollback_discards() {
        let handle = memory_handle();
        handle.begin().expect("begin");
        assert!(handle.in_transaction());
        assert!(matches!(
            handle.begin(),
            Err(StoreError::TransactionAlreadyOpen)
        ));
        handle.insert("Order", "a", json!({})).expect("insert a");
        handle.insert("Order", "b", json!({})).expect("insert b");
        assert_eq!(handle.commit().expect("commit"), 2);
        assert!(!handle.in_transaction());

        handle.begin().expect("second begin");
        handle.insert("Order", "c", json!({})).expect("insert c");
        handle.rollback().expect("rollback");
        assert_eq!(handle.scan("Order").expect("scan").len(), 2);
        assert!(matches!(handle.commit(), Err(StoreError::NoTransaction)));
    }

    #[test]
    fn execute_raw_binds_json_params() {
        let handle = memory_handle();
        handle.insert("Order", "a", json!({"n": 1})).expect("insert");
        let changed = handle
            .execute_raw(
                "UPDATE \"Order\" SET body = ?1 WHERE key = ?2;",
                &[json!("{\"n\":2}"), json!("a")],
            )
            .expect("raw update");
        assert_eq!(changed, 1);
        assert_eq!(
            handle.find("Order", "a").expect("find"),
            Some(json!({"n": 2}))
        );
    }

    #[test]
    fn raw_begin_and_commit_are_tracked_as_transactions() {
        let handle = memory_handle();
        handle
            .execute_raw("BEGIN IMMEDIATE;", &[])
            .expect("raw begin");
        assert!(handle.in_transaction());
        assert!(matches!(
            handle.begin(),
            Err(StoreError::TransactionAlreadyOpen)
        ));
        handle.insert("Order", "a", json!({})).expect("insert");
        assert_eq!(handle.commit().expect("commit raw transaction"), 1);
        assert!(!handle.in_transaction());

        handle.begin().expect("begin");
        handle.execute_raw("COMMIT;", &[]).expect("raw commit");
        assert!(!handle.in_transaction());
        assert!(matches!(handle.commit(), Err(StoreError::NoTransaction)));
    }

    #[test]
    fn closed_handle_rejects_operations() {
        let handle = memory_handle();
        handle.close().expect("close");
        handle.close().expect("second close is a no-op");
        assert!(matches!(
            handle.find("Order", "a"),
            Err(StoreError::Closed)
        ));
    }
}
