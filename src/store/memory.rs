//! In-memory document store
//!
//! All collections sit behind one `RwLock`: pipelines run under a single
//! read guard (a coherent snapshot) and every write, including the relation
//! toggle, runs under a single write guard.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

use super::{
    document_id, normalize_relation, object_id, Collection, CollectionSource, DeleteOutcome, Document, DocumentStore,
    Filter, Update, UpdateOutcome, ID_FIELD,
};
use crate::error::{EngageError, Result};
use crate::pipeline::{Executor, Explained, Stage};
use crate::relation::{Relation, ToggleOutcome};

#[derive(Default)]
struct Collections {
    docs: HashMap<Collection, BTreeMap<String, Document>>,
    /// Relation key -> `_id`, per relation collection
    unique: HashMap<Collection, HashMap<String, String>>,
    next_seq: u64,
}

impl Collections {
    fn next_id(&mut self, collection: Collection) -> String {
        loop {
            self.next_seq += 1;
            let id = object_id(self.next_seq);
            let taken = self
                .docs
                .get(&collection)
                .map_or(false, |docs| docs.contains_key(&id));
            if !taken {
                return id;
            }
        }
    }

    fn insert(&mut self, collection: Collection, doc: Document) -> Result<Document> {
        let (key, doc) = if collection.is_relation() {
            let (relation, normalized) = normalize_relation(collection, doc)?;
            (Some(relation.key()), normalized)
        } else {
            (None, doc)
        };

        let id = match doc.get(ID_FIELD) {
            None => self.next_id(collection),
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(other) => {
                return Err(EngageError::validation(format!("_id must be a non-empty string, got {}", other)))
            }
        };

        if self
            .docs
            .get(&collection)
            .map_or(false, |docs| docs.contains_key(&id))
        {
            return Err(EngageError::Conflict(format!("{}/{} already exists", collection, id)));
        }

        if let Some(key) = key {
            let index = self.unique.entry(collection).or_default();
            if index.contains_key(&key) {
                return Err(EngageError::Conflict(format!(
                    "relation already exists in {}",
                    collection
                )));
            }
            index.insert(key, id.clone());
        }

        let mut stored = Document::new();
        stored.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        stored.extend(doc.into_iter().filter(|(k, _)| k != ID_FIELD));

        self.docs
            .entry(collection)
            .or_default()
            .insert(id, stored.clone());
        Ok(stored)
    }

    fn first_match(&self, collection: Collection, filter: &Filter) -> Option<String> {
        let docs = self.docs.get(&collection)?;
        if let Some(Value::String(id)) = filter.pinned(ID_FIELD) {
            return docs
                .get(id)
                .filter(|doc| filter.matches(doc))
                .map(|_| id.clone());
        }
        docs.iter()
            .find(|(_, doc)| filter.matches(doc))
            .map(|(id, _)| id.clone())
    }

    fn remove(&mut self, collection: Collection, id: &str) -> Option<Document> {
        let removed = self.docs.get_mut(&collection)?.remove(id)?;
        if collection.is_relation() {
            if let (Ok(relation), Some(index)) = (
                Relation::from_document(collection, &removed),
                self.unique.get_mut(&collection),
            ) {
                let key = relation.key();
                if index.get(&key).map(String::as_str) == Some(id) {
                    index.remove(&key);
                }
            }
        }
        Some(removed)
    }
}

/// Snapshot view handed to the executor
struct Snapshot<'g>(&'g Collections);

impl CollectionSource for Snapshot<'_> {
    fn scan(&self, collection: Collection) -> Result<Vec<Document>> {
        Ok(self
            .0
            .docs
            .get(&collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }
}

/// Document store held entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Collections>> {
        self.inner
            .read()
            .map_err(|_| EngageError::Internal("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Collections>> {
        self.inner
            .write()
            .map_err(|_| EngageError::Internal("memory store lock poisoned".into()))
    }

    /// Number of documents in a collection
    pub fn len(&self, collection: Collection) -> Result<usize> {
        Ok(self.read()?.docs.get(&collection).map_or(0, BTreeMap::len))
    }
}

impl DocumentStore for MemoryStore {
    fn find(&self, collection: Collection, filter: &Filter) -> Result<Vec<Document>> {
        let guard = self.read()?;
        Ok(guard
            .docs
            .get(&collection)
            .map(|docs| docs.values().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    fn find_by_id(&self, collection: Collection, id: &str) -> Result<Option<Document>> {
        let guard = self.read()?;
        Ok(guard.docs.get(&collection).and_then(|docs| docs.get(id)).cloned())
    }

    fn run_pipeline(&self, collection: Collection, stages: &[Stage]) -> Result<Vec<Document>> {
        let guard = self.read()?;
        let snapshot = Snapshot(&guard);
        Executor::new(&snapshot).execute(collection, stages)
    }

    fn explain(&self, collection: Collection, stages: &[Stage]) -> Result<Explained> {
        let guard = self.read()?;
        let snapshot = Snapshot(&guard);
        Executor::new(&snapshot).explain(collection, stages)
    }

    fn create(&self, collection: Collection, doc: Document) -> Result<Document> {
        self.write()?.insert(collection, doc)
    }

    fn update_one(&self, collection: Collection, filter: &Filter, update: &Update) -> Result<UpdateOutcome> {
        if collection.is_relation() {
            return Err(EngageError::validation(format!(
                "{} documents cannot be updated in place",
                collection
            )));
        }
        update.validate()?;

        let mut guard = self.write()?;
        let Some(id) = guard.first_match(collection, filter) else {
            return Ok(UpdateOutcome { matched: false, document: None });
        };
        let docs = guard.docs.entry(collection).or_default();
        let Some(current) = docs.get(&id) else {
            return Ok(UpdateOutcome { matched: false, document: None });
        };
        let next = update.apply(current)?;
        docs.insert(id, next.clone());

        Ok(UpdateOutcome { matched: true, document: Some(next) })
    }

    fn delete_one(&self, collection: Collection, filter: &Filter) -> Result<DeleteOutcome> {
        let mut guard = self.write()?;
        let deleted = match guard.first_match(collection, filter) {
            Some(id) => guard.remove(collection, &id).is_some(),
            None => false,
        };
        Ok(DeleteOutcome { deleted })
    }

    fn toggle_relation(&self, relation: &Relation) -> Result<ToggleOutcome> {
        let collection = relation.collection();
        let key = relation.key();
        let mut guard = self.write()?;

        let existing = guard
            .unique
            .get(&collection)
            .and_then(|index| index.get(&key))
            .cloned();

        match existing {
            Some(id) => {
                guard.remove(collection, &id);
                tracing::debug!(%collection, id = %id, "relation removed");
                Ok(ToggleOutcome { active: false })
            }
            None => {
                let stored = guard.insert(collection, relation.to_document())?;
                tracing::debug!(%collection, id = document_id(&stored).unwrap_or(""), "relation created");
                Ok(ToggleOutcome { active: true })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::LikeTarget;
    use serde_json::json;

    fn obj(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_create_assigns_ordered_ids() {
        let store = MemoryStore::new();
        let a = store.create(Collection::Videos, obj(json!({"title": "a"}))).unwrap();
        let b = store.create(Collection::Videos, obj(json!({"title": "b"}))).unwrap();

        let all = store.find(Collection::Videos, &Filter::new()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["_id"], a["_id"]);
        assert_eq!(all[1]["_id"], b["_id"]);
    }

    #[test]
    fn test_create_duplicate_id_conflicts() {
        let store = MemoryStore::new();
        store.create(Collection::Users, obj(json!({"_id": "u1"}))).unwrap();
        let err = store.create(Collection::Users, obj(json!({"_id": "u1"}))).unwrap_err();
        assert!(matches!(err, EngageError::Conflict(_)));
    }

    #[test]
    fn test_duplicate_relation_conflicts() {
        let store = MemoryStore::new();
        let doc = obj(json!({"subscriber": "s1", "channel": "c1"}));
        store.create(Collection::Subscriptions, doc.clone()).unwrap();
        let err = store.create(Collection::Subscriptions, doc).unwrap_err();
        assert!(matches!(err, EngageError::Conflict(_)));
    }

    #[test]
    fn test_relation_rejects_update() {
        let store = MemoryStore::new();
        let err = store
            .update_one(Collection::Likes, &Filter::new(), &Update::new().set("x", 1))
            .unwrap_err();
        assert!(matches!(err, EngageError::Validation(_)));
    }

    #[test]
    fn test_update_and_delete_first_match() {
        let store = MemoryStore::new();
        store.create(Collection::Videos, obj(json!({"_id": "v1", "views": 1}))).unwrap();

        let out = store
            .update_one(Collection::Videos, &Filter::by_id("v1"), &Update::new().inc("views", 2))
            .unwrap();
        assert!(out.matched);
        assert_eq!(out.document.unwrap()["views"], json!(3));

        let missing = store
            .update_one(Collection::Videos, &Filter::by_id("nope"), &Update::new().inc("views", 1))
            .unwrap();
        assert!(!missing.matched);

        assert!(store.delete_one(Collection::Videos, &Filter::by_id("v1")).unwrap().deleted);
        assert!(!store.delete_one(Collection::Videos, &Filter::by_id("v1")).unwrap().deleted);
    }

    #[test]
    fn test_delete_relation_clears_unique_entry() {
        let store = MemoryStore::new();
        let rel = Relation::like("u1", LikeTarget::Tweet("t1".into())).unwrap();

        store.create(Collection::Likes, rel.to_document()).unwrap();
        store.delete_one(Collection::Likes, &rel.filter()).unwrap();

        // The tuple can be created again
        store.create(Collection::Likes, rel.to_document()).unwrap();
        assert_eq!(store.len(Collection::Likes).unwrap(), 1);
    }

    #[test]
    fn test_delete_relation_keeps_other_entries() {
        let store = MemoryStore::new();
        let kept = Relation::like("u1", LikeTarget::Video("v1".into())).unwrap();
        let dropped = Relation::like("u2", LikeTarget::Video("v1".into())).unwrap();

        store.create(Collection::Likes, kept.to_document()).unwrap();
        store.create(Collection::Likes, dropped.to_document()).unwrap();
        assert!(store.delete_one(Collection::Likes, &dropped.filter()).unwrap().deleted);

        let err = store.create(Collection::Likes, kept.to_document()).unwrap_err();
        assert!(matches!(err, EngageError::Conflict(_)));
        store.create(Collection::Likes, dropped.to_document()).unwrap();
        assert_eq!(store.len(Collection::Likes).unwrap(), 2);
    }

    #[test]
    fn test_create_relation_stores_normalized_shape() {
        let store = MemoryStore::new();
        let stored = store
            .create(Collection::Likes, obj(json!({"_id": "l1", "likedBy": " u1 ", "video": "v1", "note": "x"})))
            .unwrap();
        assert_eq!(stored["_id"], json!("l1"));
        assert_eq!(stored["likedBy"], json!("u1"));
        assert_eq!(stored["targetKind"], json!("video"));
        assert_eq!(stored["note"], json!("x"));

        let rel = Relation::like("u1", LikeTarget::Video("v1".into())).unwrap();
        assert_eq!(store.find(Collection::Likes, &rel.filter()).unwrap().len(), 1);
        // The toggle sees the raw-created tuple and removes it
        assert!(!store.toggle_relation(&rel).unwrap().active);
        assert_eq!(store.len(Collection::Likes).unwrap(), 0);
    }

    #[test]
    fn test_create_relation_rejects_mismatched_kind() {
        let store = MemoryStore::new();
        let err = store
            .create(Collection::Likes, obj(json!({"likedBy": "u1", "video": "v1", "targetKind": "tweet"})))
            .unwrap_err();
        assert!(matches!(err, EngageError::Validation(_)));
        assert_eq!(store.len(Collection::Likes).unwrap(), 0);
    }

    #[test]
    fn test_toggle_flips_presence() {
        let store = MemoryStore::new();
        let rel = Relation::subscription("s1", "c1").unwrap();

        assert!(store.toggle_relation(&rel).unwrap().active);
        assert_eq!(store.find(Collection::Subscriptions, &rel.filter()).unwrap().len(), 1);

        assert!(!store.toggle_relation(&rel).unwrap().active);
        assert!(store.find(Collection::Subscriptions, &rel.filter()).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_toggles_keep_at_most_one() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(MemoryStore::new());
        let rel = Relation::like("u1", LikeTarget::Video("v1".into())).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let rel = rel.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        store.toggle_relation(&rel).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // 200 toggles: even count, so the relation ends absent
        assert!(store.find(Collection::Likes, &rel.filter()).unwrap().is_empty());
        assert!(store.toggle_relation(&rel).unwrap().active);
        assert_eq!(store.find(Collection::Likes, &rel.filter()).unwrap().len(), 1);
    }
}
