//! Persistent document store on sled
//!
//! One tree per collection (`_id` -> JSON bytes) plus one `unique:<collection>`
//! tree per relation collection (relation key -> `_id`). Relation writes touch
//! both trees inside a single sled transaction.
//!
//! Pipelines scan trees lazily, one collection at a time. A store-wide gate
//! keeps writes out while a pipeline runs, so every pipeline observes a
//! single committed state across all the collections it reads.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError, Transactional,
};
use sled::{Db, Tree};

use super::{
    normalize_relation, object_id, Collection, CollectionSource, DeleteOutcome, Document, DocumentStore, Filter, Update,
    UpdateOutcome, ID_FIELD,
};
use crate::error::{EngageError, Result};
use crate::pipeline::{Executor, Explained, Stage};
use crate::relation::{Relation, ToggleOutcome};

fn encode(doc: &Document) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(doc)?)
}

fn decode(bytes: &[u8]) -> Result<Document> {
    Ok(serde_json::from_slice(bytes)?)
}

fn abort(err: EngageError) -> ConflictableTransactionError<EngageError> {
    ConflictableTransactionError::Abort(err)
}

fn finish<T>(res: std::result::Result<T, TransactionError<EngageError>>) -> Result<T> {
    res.map_err(|e| match e {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => EngageError::Storage(err),
    })
}

/// Document store backed by sled
pub struct SledStore {
    db: Db,
    docs: HashMap<Collection, Tree>,
    unique: HashMap<Collection, Tree>,
    // Readers: pipelines. Writers: every mutating operation.
    gate: RwLock<()>,
}

impl SledStore {
    /// Open (or create) a store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::Config::new()
            .path(path.as_ref())
            .mode(sled::Mode::HighThroughput)
            .open()?;

        let mut docs = HashMap::new();
        let mut unique = HashMap::new();
        for collection in Collection::ALL {
            docs.insert(collection, db.open_tree(collection.as_str())?);
            if collection.is_relation() {
                unique.insert(collection, db.open_tree(format!("unique:{}", collection))?);
            }
        }

        tracing::info!(path = %path.as_ref().display(), "sled store opened");
        Ok(Self {
            db,
            docs,
            unique,
            gate: RwLock::new(()),
        })
    }

    /// Flush dirty pages to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn read_gate(&self) -> Result<RwLockReadGuard<'_, ()>> {
        self.gate
            .read()
            .map_err(|_| EngageError::Internal("store gate poisoned".to_string()))
    }

    fn write_gate(&self) -> Result<RwLockWriteGuard<'_, ()>> {
        self.gate
            .write()
            .map_err(|_| EngageError::Internal("store gate poisoned".to_string()))
    }

    fn docs(&self, collection: Collection) -> Result<&Tree> {
        self.docs
            .get(&collection)
            .ok_or_else(|| EngageError::Internal(format!("no tree for {}", collection)))
    }

    fn unique(&self, collection: Collection) -> Result<&Tree> {
        self.unique
            .get(&collection)
            .ok_or_else(|| EngageError::Internal(format!("no unique index for {}", collection)))
    }

    fn next_id(&self) -> Result<String> {
        Ok(object_id(self.db.generate_id()?))
    }

    /// `_id` of the first document matching `filter`
    fn first_match(&self, collection: Collection, filter: &Filter) -> Result<Option<String>> {
        let tree = self.docs(collection)?;

        if let Some(Value::String(id)) = filter.pinned(ID_FIELD) {
            return match tree.get(id.as_bytes())? {
                Some(bytes) if filter.matches(&decode(&bytes)?) => Ok(Some(id.clone())),
                _ => Ok(None),
            };
        }

        for entry in tree.iter() {
            let (key, bytes) = entry?;
            if filter.matches(&decode(&bytes)?) {
                return Ok(Some(String::from_utf8_lossy(&key).into_owned()));
            }
        }
        Ok(None)
    }

    /// Assign `_id` and move it to the front of the document
    fn prepare(&self, doc: Document) -> Result<(String, Document)> {
        let id = match doc.get(ID_FIELD) {
            None => self.next_id()?,
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(other) => {
                return Err(EngageError::validation(format!("_id must be a non-empty string, got {}", other)))
            }
        };
        let mut stored = Document::new();
        stored.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        stored.extend(doc.into_iter().filter(|(k, _)| k != ID_FIELD));
        Ok((id, stored))
    }

    fn duplicate_id(collection: Collection, id: &str) -> EngageError {
        EngageError::Conflict(format!("{}/{} already exists", collection, id))
    }

    fn duplicate_relation(collection: Collection) -> EngageError {
        EngageError::Conflict(format!("relation already exists in {}", collection))
    }
}

impl CollectionSource for SledStore {
    fn scan(&self, collection: Collection) -> Result<Vec<Document>> {
        self.docs(collection)?
            .iter()
            .values()
            .map(|bytes| decode(&bytes?))
            .collect()
    }
}

impl DocumentStore for SledStore {
    fn find(&self, collection: Collection, filter: &Filter) -> Result<Vec<Document>> {
        let tree = self.docs(collection)?;

        if let Some(Value::String(id)) = filter.pinned(ID_FIELD) {
            return Ok(match tree.get(id.as_bytes())? {
                Some(bytes) => Some(decode(&bytes)?).filter(|d| filter.matches(d)).into_iter().collect(),
                None => Vec::new(),
            });
        }

        let mut out = Vec::new();
        for bytes in tree.iter().values() {
            let doc = decode(&bytes?)?;
            if filter.matches(&doc) {
                out.push(doc);
            }
        }
        Ok(out)
    }

    fn find_by_id(&self, collection: Collection, id: &str) -> Result<Option<Document>> {
        self.docs(collection)?
            .get(id.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn run_pipeline(&self, collection: Collection, stages: &[Stage]) -> Result<Vec<Document>> {
        let _gate = self.read_gate()?;
        Executor::new(self).execute(collection, stages)
    }

    fn explain(&self, collection: Collection, stages: &[Stage]) -> Result<Explained> {
        let _gate = self.read_gate()?;
        Executor::new(self).explain(collection, stages)
    }

    fn create(&self, collection: Collection, doc: Document) -> Result<Document> {
        let (key, doc) = if collection.is_relation() {
            let (relation, normalized) = normalize_relation(collection, doc)?;
            (Some(relation.key()), normalized)
        } else {
            (None, doc)
        };
        let (id, stored) = self.prepare(doc)?;
        let bytes = encode(&stored)?;
        let docs = self.docs(collection)?;
        let _gate = self.write_gate()?;

        let Some(key) = key else {
            finish(docs.transaction(|d| -> ConflictableTransactionResult<(), EngageError> {
                if d.get(id.as_bytes())?.is_some() {
                    return Err(abort(Self::duplicate_id(collection, &id)));
                }
                d.insert(id.as_bytes(), bytes.as_slice())?;
                Ok(())
            }))?;
            return Ok(stored);
        };

        let unique = self.unique(collection)?;
        finish((docs, unique).transaction(|(d, u)| -> ConflictableTransactionResult<(), EngageError> {
            if d.get(id.as_bytes())?.is_some() {
                return Err(abort(Self::duplicate_id(collection, &id)));
            }
            if u.get(key.as_bytes())?.is_some() {
                return Err(abort(Self::duplicate_relation(collection)));
            }
            d.insert(id.as_bytes(), bytes.as_slice())?;
            u.insert(key.as_bytes(), id.as_bytes())?;
            Ok(())
        }))?;
        Ok(stored)
    }

    fn update_one(&self, collection: Collection, filter: &Filter, update: &Update) -> Result<UpdateOutcome> {
        if collection.is_relation() {
            return Err(EngageError::validation(format!(
                "{} documents cannot be updated in place",
                collection
            )));
        }
        update.validate()?;
        let _gate = self.write_gate()?;

        let Some(id) = self.first_match(collection, filter)? else {
            return Ok(UpdateOutcome { matched: false, document: None });
        };

        // Re-read inside the transaction; a concurrent writer may have
        // changed or removed the document since the scan
        let updated = finish(self.docs(collection)?.transaction(
            |d| -> ConflictableTransactionResult<Option<Document>, EngageError> {
                let Some(bytes) = d.get(id.as_bytes())? else {
                    return Ok(None);
                };
                let current = decode(&bytes).map_err(abort)?;
                if !filter.matches(&current) {
                    return Ok(None);
                }
                let next = update.apply(&current).map_err(abort)?;
                d.insert(id.as_bytes(), encode(&next).map_err(abort)?)?;
                Ok(Some(next))
            },
        ))?;

        Ok(UpdateOutcome {
            matched: updated.is_some(),
            document: updated,
        })
    }

    fn delete_one(&self, collection: Collection, filter: &Filter) -> Result<DeleteOutcome> {
        let _gate = self.write_gate()?;
        let Some(id) = self.first_match(collection, filter)? else {
            return Ok(DeleteOutcome { deleted: false });
        };
        let docs = self.docs(collection)?;

        if !collection.is_relation() {
            let removed = docs.remove(id.as_bytes())?;
            return Ok(DeleteOutcome { deleted: removed.is_some() });
        }

        let unique = self.unique(collection)?;
        let deleted = finish((docs, unique).transaction(
            |(d, u)| -> ConflictableTransactionResult<bool, EngageError> {
                let Some(bytes) = d.remove(id.as_bytes())? else {
                    return Ok(false);
                };
                let doc = decode(&bytes).map_err(abort)?;
                // Only drop the index entry if it still points at this document
                if let Ok(relation) = Relation::from_document(collection, &doc) {
                    let key = relation.key();
                    if u.get(key.as_bytes())?.as_deref() == Some(id.as_bytes()) {
                        u.remove(key.as_bytes())?;
                    }
                }
                Ok(true)
            },
        ))?;
        Ok(DeleteOutcome { deleted })
    }

    fn toggle_relation(&self, relation: &Relation) -> Result<ToggleOutcome> {
        let collection = relation.collection();
        let docs = self.docs(collection)?;
        let unique = self.unique(collection)?;
        let key = relation.key();

        let (new_id, stored) = self.prepare(relation.to_document())?;
        let bytes = encode(&stored)?;
        let _gate = self.write_gate()?;

        let active = finish((docs, unique).transaction(
            |(d, u)| -> ConflictableTransactionResult<bool, EngageError> {
                if let Some(existing) = u.get(key.as_bytes())? {
                    d.remove(&existing[..])?;
                    u.remove(key.as_bytes())?;
                    return Ok(false);
                }
                d.insert(new_id.as_bytes(), bytes.as_slice())?;
                u.insert(key.as_bytes(), new_id.as_bytes())?;
                Ok(true)
            },
        ))?;

        if active {
            tracing::debug!(%collection, id = %new_id, "relation created");
        } else {
            tracing::debug!(%collection, "relation removed");
        }
        Ok(ToggleOutcome { active })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::LikeTarget;
    use serde_json::json;
    use tempfile::tempdir;

    fn obj(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_create_and_find() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path().join("db")).unwrap();

        let a = store.create(Collection::Videos, obj(json!({"title": "first"}))).unwrap();
        store.create(Collection::Videos, obj(json!({"title": "second"}))).unwrap();

        let id = a["_id"].as_str().unwrap();
        assert_eq!(id.len(), 24);
        assert_eq!(store.find_by_id(Collection::Videos, id).unwrap().unwrap()["title"], json!("first"));

        let all = store.find(Collection::Videos, &Filter::new()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["title"], json!("first"));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let store = SledStore::open(&path).unwrap();
            store.create(Collection::Users, obj(json!({"_id": "u1", "username": "ann"}))).unwrap();
            store.flush().unwrap();
        }
        let store = SledStore::open(&path).unwrap();
        assert!(store.find_by_id(Collection::Users, "u1").unwrap().is_some());
    }

    #[test]
    fn test_duplicate_relation_conflicts() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path().join("db")).unwrap();
        let rel = Relation::like("u1", LikeTarget::Comment("c1".into())).unwrap();

        store.create(Collection::Likes, rel.to_document()).unwrap();
        let err = store.create(Collection::Likes, rel.to_document()).unwrap_err();
        assert!(matches!(err, EngageError::Conflict(_)));
    }

    #[test]
    fn test_update_and_delete() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path().join("db")).unwrap();
        store.create(Collection::Videos, obj(json!({"_id": "v1", "views": 0}))).unwrap();

        let out = store
            .update_one(Collection::Videos, &Filter::by_id("v1"), &Update::new().inc("views", 1))
            .unwrap();
        assert_eq!(out.document.unwrap()["views"], json!(1));

        assert!(store.delete_one(Collection::Videos, &Filter::by_id("v1")).unwrap().deleted);
        assert!(store.find_by_id(Collection::Videos, "v1").unwrap().is_none());
    }

    #[test]
    fn test_toggle_twice_restores_state() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path().join("db")).unwrap();
        let rel = Relation::subscription("s1", "c1").unwrap();

        assert!(store.toggle_relation(&rel).unwrap().active);
        assert_eq!(store.find(Collection::Subscriptions, &rel.filter()).unwrap().len(), 1);
        assert!(!store.toggle_relation(&rel).unwrap().active);
        assert!(store.find(Collection::Subscriptions, &rel.filter()).unwrap().is_empty());
    }

    #[test]
    fn test_delete_relation_frees_tuple() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path().join("db")).unwrap();
        let rel = Relation::like("u1", LikeTarget::Video("v1".into())).unwrap();

        store.create(Collection::Likes, rel.to_document()).unwrap();
        assert!(store.delete_one(Collection::Likes, &rel.filter()).unwrap().deleted);
        assert!(store.toggle_relation(&rel).unwrap().active);
    }

    #[test]
    fn test_create_relation_stores_normalized_shape() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path().join("db")).unwrap();
        let stored = store
            .create(Collection::Likes, obj(json!({"likedBy": "u1", "comment": "c1"})))
            .unwrap();
        assert_eq!(stored["targetKind"], json!("comment"));

        let id = stored["_id"].as_str().unwrap();
        let read = store.find_by_id(Collection::Likes, id).unwrap().unwrap();
        assert_eq!(read, stored);

        let rel = Relation::like("u1", LikeTarget::Comment("c1".into())).unwrap();
        assert!(!store.toggle_relation(&rel).unwrap().active);
        assert!(store.find(Collection::Likes, &Filter::new()).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_toggles_stay_unique() {
        use std::sync::Arc;
        use std::thread;

        let dir = tempdir().unwrap();
        let store = Arc::new(SledStore::open(dir.path().join("db")).unwrap());
        let rel = Relation::like("u1", LikeTarget::Tweet("t1".into())).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let rel = rel.clone();
                thread::spawn(move || {
                    for _ in 0..10 {
                        store.toggle_relation(&rel).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert!(store.find(Collection::Likes, &rel.filter()).unwrap().len() <= 1);
        // 40 toggles: relation ends absent
        assert!(store.find(Collection::Likes, &rel.filter()).unwrap().is_empty());
    }
}
