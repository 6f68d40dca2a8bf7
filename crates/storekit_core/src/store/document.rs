//! In-process document-store handle.
//!
//! Connection strings have the form `mem://<space>`. Every handle opened on
//! the same space name shares one set of collections for the life of the
//! process, so a replica opened on the primary's string sees committed
//! primary writes.
//!
//! # Invariants
//! - Writes inside a transaction are staged and applied together on commit.
//! - Reads through a handle with an open transaction see its staged writes.

use crate::connection::{redact, ConnectionOptions};
use crate::model::entity::EntityKind;
use crate::store::{BackendKind, HandleConstructor, StoreError, StoreHandle, StoreResult};
use log::info;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

const SCHEME: &str = "mem://";

type Collections = BTreeMap<String, BTreeMap<String, Value>>;

static SPACES: Lazy<Mutex<HashMap<String, Arc<DocumentSpace>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Shared collections behind one space name.
#[derive(Default)]
struct DocumentSpace {
    collections: RwLock<Collections>,
}

impl DocumentSpace {
    fn attach(name: &str) -> Arc<Self> {
        let mut spaces = SPACES.lock().unwrap_or_else(PoisonError::into_inner);
        spaces.entry(name.to_string()).or_default().clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Collections> {
        self.collections.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Collections> {
        self.collections.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builds `DocumentHandle`s.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentConstructor;

impl HandleConstructor for DocumentConstructor {
    fn backend(&self) -> BackendKind {
        BackendKind::Document
    }

    fn construct(&self, options: &ConnectionOptions) -> StoreResult<Arc<dyn StoreHandle>> {
        Ok(Arc::new(DocumentHandle::open(options)?))
    }
}

#[derive(Debug, Clone)]
struct StagedWrite {
    collection: String,
    key: String,
    document: Value,
}

pub struct DocumentHandle {
    connection_string: String,
    entity_kinds: BTreeSet<EntityKind>,
    space: Arc<DocumentSpace>,
    staged: Mutex<Option<Vec<StagedWrite>>>,
    closed: AtomicBool,
}

impl DocumentHandle {
    pub fn open(options: &ConnectionOptions) -> StoreResult<Self> {
        let raw = options.connection_string();
        let name = raw
            .trim()
            .strip_prefix(SCHEME)
            .map(|rest| rest.split('?').next().unwrap_or_default())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| StoreError::InvalidConnection(redact(raw)))?;

        info!("event=db_open module=store backend=document status=ok space={name}");
        Ok(Self {
            connection_string: raw.to_string(),
            entity_kinds: options.entity_kinds().clone(),
            space: DocumentSpace::attach(name),
            staged: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    fn staged(&self) -> StoreResult<MutexGuard<'_, Option<Vec<StagedWrite>>>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(self.staged.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl StoreHandle for DocumentHandle {
    fn backend(&self) -> BackendKind {
        BackendKind::Document
    }

    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn ensure_schema(&self) -> StoreResult<()> {
        let _guard = self.staged()?;
        let mut collections = self.space.write();
        for kind in &self.entity_kinds {
            collections.entry(kind.name().to_string()).or_default();
        }
        Ok(())
    }

    fn find(&self, collection: &str, key: &str) -> StoreResult<Option<Value>> {
        let staged = self.staged()?;
        if let Some(write) = staged.as_ref().and_then(|writes| {
            writes
                .iter()
                .find(|write| write.collection == collection && write.key == key)
        }) {
            return Ok(Some(write.document.clone()));
        }
        Ok(self
            .space
            .read()
            .get(collection)
            .and_then(|documents| documents.get(key))
            .cloned())
    }

    fn insert(&self, collection: &str, key: &str, document: Value) -> StoreResult<()> {
        let mut staged = self.staged()?;
        let duplicate = || StoreError::DuplicateKey {
            collection: collection.to_string(),
            key: key.to_string(),
        };

        match staged.as_mut() {
            Some(writes) => {
                let exists = self
                    .space
                    .read()
                    .get(collection)
                    .is_some_and(|documents| documents.contains_key(key))
                    || writes
                        .iter()
                        .any(|write| write.collection == collection && write.key == key);
                if exists {
                    return Err(duplicate());
                }
                writes.push(StagedWrite {
                    collection: collection.to_string(),
                    key: key.to_string(),
                    document,
                });
            }
            None => {
                let mut collections = self.space.write();
                let documents = collections.entry(collection.to_string()).or_default();
                if documents.contains_key(key) {
                    return Err(duplicate());
                }
                documents.insert(key.to_string(), document);
            }
        }
        Ok(())
    }

    fn scan(&self, collection: &str) -> StoreResult<Vec<Value>> {
        let staged = self.staged()?;
        let mut merged = self
            .space
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default();
        for write in staged.iter().flatten() {
            if write.collection == collection {
                merged.insert(write.key.clone(), write.document.clone());
            }
        }
        Ok(merged.into_values().collect())
    }

    fn execute_raw(&self, _command: &str, _params: &[Value]) -> StoreResult<usize> {
        Err(StoreError::Unsupported {
            backend: BackendKind::Document,
            operation: "raw commands",
        })
    }

    fn begin(&self) -> StoreResult<()> {
        let mut staged = self.staged()?;
        if staged.is_some() {
            return Err(StoreError::TransactionAlreadyOpen);
        }
        *staged = Some(Vec::new());
        Ok(())
    }

    fn commit(&self) -> StoreResult<usize> {
        let mut staged = self.staged()?;
        let writes = staged.take().ok_or(StoreError::NoTransaction)?;
        let count = writes.len();
        let mut collections = self.space.write();
        for write in writes {
            collections
                .entry(write.collection)
                .or_default()
                .insert(write.key, write.document);
        }
        Ok(count)
    }

    fn rollback(&self) -> StoreResult<()> {
        let mut staged = self.staged()?;
        staged.take().map(|_| ()).ok_or(StoreError::NoTransaction)
    }

    fn in_transaction(&self) -> bool {
        self.staged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn close(&self) -> StoreResult<()> {
        self.staged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::DocumentHandle;
    use crate::connection::{ConnectionDescriptor, ConnectionOptions};
    use crate::store::{StoreError, StoreHandle};
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn handle(connection: &str) -> DocumentHandle {
        let options = ConnectionOptions::new(
            &ConnectionDescriptor::new(connection),
            Arc::new(BTreeSet::new()),
        );
        DocumentHandle::open(&options).expect("open document handle")
    }

    #[test]
    fn rejects_unknown_scheme_and_empty_space() {
        let options =
            ConnectionOptions::new(&ConnectionDescriptor::new("mongodb://x"), Arc::new(BTreeSet::new()));
        assert!(matches!(
            DocumentHandle::open(&options),
            Err(StoreError::InvalidConnection(_))
        ));
        let options =
            ConnectionOptions::new(&ConnectionDescriptor::new("mem://"), Arc::new(BTreeSet::new()));
        assert!(DocumentHandle::open(&options).is_err());
    }

    #[test]
    fn handles_on_same_space_share_committed_documents() {
        let writer = handle("mem://doc-unit-shared");
        let reader = handle("mem://doc-unit-shared?role=reader");
        writer.insert("notes", "a", json!({"v": 1})).expect("insert");
        assert_eq!(
            reader.find("notes", "a").expect("find"),
            Some(json!({"v": 1}))
        );
    }

    #[test]
    fn staged_writes_are_private_until_commit() {
        let writer = handle("mem://doc-unit-staged");
        let reader = handle("mem://doc-unit-staged");
        writer.begin().expect("begin");
        writer.insert("notes", "a", json!({"v": 1})).expect("stage");

        assert!(writer.find("notes", "a").expect("own read").is_some());
        assert!(reader.find("notes", "a").expect("other read").is_none());
        assert!(matches!(
            writer.insert("notes", "a", json!({})),
            Err(StoreError::DuplicateKey { .. })
        ));

        assert_eq!(writer.commit().expect("commit"), 1);
        assert_eq!(reader.scan("notes").expect("scan").len(), 1);
    }

    #[test]
    fn rollback_discards_staged_writes() {
        let writer = handle("mem://doc-unit-rollback");
        writer.begin().expect("begin");
        writer.insert("notes", "a", json!({})).expect("stage");
        writer.rollback().expect("rollback");
        assert!(writer.scan("notes").expect("scan").is_empty());
        assert!(matches!(writer.rollback(), Err(StoreError::NoTransaction)));
    }

    #[test]
    fn raw_commands_are_unsupported() {
        let writer = handle("mem://doc-unit-raw");
        assert!(matches!(
            writer.execute_raw("db.notes.drop()", &[]),
            Err(StoreError::Unsupported { .. })
        ));
    }
}
