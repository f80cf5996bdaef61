//! Document storage
//!
//! Stores own the documents; the engine only reads and writes through the
//! [`DocumentStore`] trait. Two implementations ship with the crate:
//! [`MemoryStore`] (tests, embedding) and [`SledStore`] (persistent).

pub mod filter;
pub mod id_gen;
pub mod memory;
pub mod sled_store;
pub mod value;

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngageError, Result};
use crate::pipeline::{Explained, Stage};
use crate::relation::{Relation, ToggleOutcome};

pub use filter::{Condition, Filter, Update, UpdateOp};
pub use id_gen::{object_id, relation_key};
pub use memory::MemoryStore;
pub use sled_store::SledStore;

/// A stored document. The identifier lives in the `_id` field.
pub type Document = serde_json::Map<String, Value>;

pub const ID_FIELD: &str = "_id";

/// Entity collections known to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Users,
    Videos,
    Comments,
    Tweets,
    Playlists,
    Likes,
    Subscriptions,
}

impl Collection {
    pub const ALL: [Collection; 7] = [
        Collection::Users,
        Collection::Videos,
        Collection::Comments,
        Collection::Tweets,
        Collection::Playlists,
        Collection::Likes,
        Collection::Subscriptions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Videos => "videos",
            Collection::Comments => "comments",
            Collection::Tweets => "tweets",
            Collection::Playlists => "playlists",
            Collection::Likes => "likes",
            Collection::Subscriptions => "subscriptions",
        }
    }

    /// Relation collections carry a uniqueness constraint and are never
    /// updated in place
    pub fn is_relation(&self) -> bool {
        matches!(self, Collection::Likes | Collection::Subscriptions)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = EngageError;

    fn from_str(s: &str) -> Result<Self> {
        Collection::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| EngageError::validation(format!("unknown collection '{}'", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateOutcome {
    pub matched: bool,
    /// Document after the update, when one matched
    pub document: Option<Document>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub deleted: bool,
}

/// Read access used by the pipeline executor
pub trait CollectionSource: Sync {
    /// All documents of a collection in ascending `_id` order
    fn scan(&self, collection: Collection) -> Result<Vec<Document>>;
}

/// Main trait for entity storage
pub trait DocumentStore: Send + Sync {
    // === READS ===

    /// Documents matching the filter, in ascending `_id` order
    fn find(&self, collection: Collection, filter: &Filter) -> Result<Vec<Document>>;

    fn find_by_id(&self, collection: Collection, id: &str) -> Result<Option<Document>>;

    /// Run a pipeline as one snapshot read over `collection`
    fn run_pipeline(&self, collection: Collection, stages: &[Stage]) -> Result<Vec<Document>>;

    /// Like `run_pipeline`, recording per-stage counts and timings
    fn explain(&self, collection: Collection, stages: &[Stage]) -> Result<Explained>;

    // === WRITES ===

    /// Insert a document, assigning `_id` when absent.
    /// Fails with `Conflict` on a duplicate `_id` or relation tuple.
    fn create(&self, collection: Collection, doc: Document) -> Result<Document>;

    /// Update the first matching document
    fn update_one(&self, collection: Collection, filter: &Filter, update: &Update) -> Result<UpdateOutcome>;

    /// Delete the first matching document
    fn delete_one(&self, collection: Collection, filter: &Filter) -> Result<DeleteOutcome>;

    /// Atomic delete-if-exists-else-insert over a relation tuple
    fn toggle_relation(&self, relation: &Relation) -> Result<ToggleOutcome>;
}

/// Serialize a typed entity into a document
pub fn to_document<T: Serialize>(value: &T) -> Result<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(EngageError::Internal(format!(
            "entity serialized to non-object value: {}",
            other
        ))),
    }
}

/// Deserialize a document into a typed entity
pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

/// Canonical stored shape of a relation document
///
/// Reference fields come from the decoded [`Relation`] (so `targetKind` is
/// always present for likes); `_id` and any other extra fields are kept.
pub(crate) fn normalize_relation(collection: Collection, doc: Document) -> Result<(Relation, Document)> {
    let relation = Relation::from_document(collection, &doc)?;
    let mut normalized = relation.to_document();
    for (field, value) in doc {
        if !normalized.contains_key(&field) {
            normalized.insert(field, value);
        }
    }
    Ok((relation, normalized))
}

/// `_id` of a stored document
pub fn document_id(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_round_trip_names() {
        for c in Collection::ALL {
            assert_eq!(c.as_str().parse::<Collection>().unwrap(), c);
        }
        assert!("posts".parse::<Collection>().is_err());
    }

    #[test]
    fn test_relation_collections() {
        assert!(Collection::Likes.is_relation());
        assert!(Collection::Subscriptions.is_relation());
        assert!(!Collection::Videos.is_relation());
    }
}
