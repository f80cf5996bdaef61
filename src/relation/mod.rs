//! Engagement relations (likes, subscriptions) and the toggle engine
//!
//! A relation is an edge between a subject (the acting user) and an object
//! (a video, comment, tweet or channel). At most one relation exists per
//! `(kind, subject, object, objectKind)` tuple; the stores enforce this
//! with a uniqueness key computed by [`crate::store::relation_key`].

pub mod toggle;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngageError, Result};
use crate::store::{relation_key, Collection, Document, Filter};

pub const LIKED_BY: &str = "likedBy";
pub const TARGET_KIND: &str = "targetKind";
pub const SUBSCRIBER: &str = "subscriber";
pub const CHANNEL: &str = "channel";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    Like,
    Subscription,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Like => "like",
            RelationKind::Subscription => "subscription",
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            RelationKind::Like => Collection::Likes,
            RelationKind::Subscription => Collection::Subscriptions,
        }
    }
}

/// What a LIKE points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetKind {
    Video,
    Comment,
    Tweet,
}

impl TargetKind {
    /// Also the name of the reference field on a like document
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Video => "video",
            TargetKind::Comment => "comment",
            TargetKind::Tweet => "tweet",
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            TargetKind::Video => Collection::Videos,
            TargetKind::Comment => Collection::Comments,
            TargetKind::Tweet => Collection::Tweets,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "video" => Some(TargetKind::Video),
            "comment" => Some(TargetKind::Comment),
            "tweet" => Some(TargetKind::Tweet),
            _ => None,
        }
    }

    pub const ALL: [TargetKind; 3] = [TargetKind::Video, TargetKind::Comment, TargetKind::Tweet];
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exactly one like target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LikeTarget {
    Video(String),
    Comment(String),
    Tweet(String),
}

impl LikeTarget {
    pub fn new(kind: TargetKind, id: impl Into<String>) -> Self {
        let id = id.into();
        match kind {
            TargetKind::Video => LikeTarget::Video(id),
            TargetKind::Comment => LikeTarget::Comment(id),
            TargetKind::Tweet => LikeTarget::Tweet(id),
        }
    }

    /// Build from the three optional references of a like document.
    /// Exactly one must be supplied.
    pub fn from_refs(video: Option<&str>, comment: Option<&str>, tweet: Option<&str>) -> Result<Self> {
        let mut supplied: Vec<LikeTarget> = [
            video.map(|id| LikeTarget::Video(id.to_string())),
            comment.map(|id| LikeTarget::Comment(id.to_string())),
            tweet.map(|id| LikeTarget::Tweet(id.to_string())),
        ]
        .into_iter()
        .flatten()
        .collect();

        match (supplied.pop(), supplied.len()) {
            (Some(target), 0) => Ok(target),
            (None, _) => Err(EngageError::validation("like has no target reference")),
            (Some(_), extra) => Err(EngageError::validation(format!(
                "like has {} target references, expected exactly one",
                extra + 1
            ))),
        }
    }

    pub fn kind(&self) -> TargetKind {
        match self {
            LikeTarget::Video(_) => TargetKind::Video,
            LikeTarget::Comment(_) => TargetKind::Comment,
            LikeTarget::Tweet(_) => TargetKind::Tweet,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            LikeTarget::Video(id) | LikeTarget::Comment(id) | LikeTarget::Tweet(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RelationObject {
    Like(LikeTarget),
    Channel(String),
}

/// A validated relation tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Relation {
    subject_id: String,
    object: RelationObject,
}

fn require_id(label: &str, id: &str) -> Result<String> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(EngageError::validation(format!("{} is required", label)));
    }
    Ok(trimmed.to_string())
}

impl Relation {
    /// Generic constructor; `object_kind` is required for likes and
    /// forbidden for subscriptions
    pub fn new(
        kind: RelationKind,
        subject_id: &str,
        object_id: &str,
        object_kind: Option<TargetKind>,
    ) -> Result<Self> {
        let subject_id = require_id("subject id", subject_id)?;
        let object_id = require_id("object id", object_id)?;

        let object = match (kind, object_kind) {
            (RelationKind::Like, Some(k)) => RelationObject::Like(LikeTarget::new(k, object_id)),
            (RelationKind::Like, None) => {
                return Err(EngageError::validation("like requires an object kind"))
            }
            (RelationKind::Subscription, None) => RelationObject::Channel(object_id),
            (RelationKind::Subscription, Some(k)) => {
                return Err(EngageError::validation(format!(
                    "subscription cannot target a {}",
                    k
                )))
            }
        };

        Ok(Relation { subject_id, object })
    }

    pub fn like(subject_id: &str, target: LikeTarget) -> Result<Self> {
        Self::new(RelationKind::Like, subject_id, target.id(), Some(target.kind()))
    }

    pub fn subscription(subscriber_id: &str, channel_id: &str) -> Result<Self> {
        Self::new(RelationKind::Subscription, subscriber_id, channel_id, None)
    }

    pub fn kind(&self) -> RelationKind {
        match self.object {
            RelationObject::Like(_) => RelationKind::Like,
            RelationObject::Channel(_) => RelationKind::Subscription,
        }
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn object_id(&self) -> &str {
        match &self.object {
            RelationObject::Like(target) => target.id(),
            RelationObject::Channel(id) => id,
        }
    }

    pub fn object_kind(&self) -> Option<TargetKind> {
        match &self.object {
            RelationObject::Like(target) => Some(target.kind()),
            RelationObject::Channel(_) => None,
        }
    }

    pub fn collection(&self) -> Collection {
        self.kind().collection()
    }

    pub fn subject_field(&self) -> &'static str {
        match self.kind() {
            RelationKind::Like => LIKED_BY,
            RelationKind::Subscription => SUBSCRIBER,
        }
    }

    pub fn object_field(&self) -> &'static str {
        match self.object_kind() {
            Some(kind) => kind.as_str(),
            None => CHANNEL,
        }
    }

    /// Uniqueness key of the tuple
    pub fn key(&self) -> String {
        relation_key(
            self.kind().as_str(),
            &self.subject_id,
            self.object_id(),
            self.object_kind().map(|k| k.as_str()).unwrap_or(""),
        )
    }

    /// Predicate matching stored documents of this tuple
    pub fn filter(&self) -> Filter {
        let filter = Filter::new()
            .eq(self.subject_field(), self.subject_id.as_str())
            .eq(self.object_field(), self.object_id());
        match self.object_kind() {
            Some(kind) => filter.eq(TARGET_KIND, kind.as_str()),
            None => filter,
        }
    }

    /// Stored shape, without `_id`
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(self.subject_field().to_string(), Value::from(self.subject_id.as_str()));
        doc.insert(self.object_field().to_string(), Value::from(self.object_id()));
        if let Some(kind) = self.object_kind() {
            doc.insert(TARGET_KIND.to_string(), Value::from(kind.as_str()));
        }
        doc
    }

    /// Decode a stored relation document
    pub fn from_document(collection: Collection, doc: &Document) -> Result<Self> {
        let text = |field: &str| doc.get(field).and_then(Value::as_str);

        match collection {
            Collection::Likes => {
                let subject = text(LIKED_BY).unwrap_or("");
                let target = LikeTarget::from_refs(text("video"), text("comment"), text("tweet"))?;
                if let Some(declared) = text(TARGET_KIND) {
                    if TargetKind::parse(declared) != Some(target.kind()) {
                        return Err(EngageError::validation(format!(
                            "targetKind '{}' does not match the {} reference",
                            declared,
                            target.kind()
                        )));
                    }
                }
                Relation::like(subject, target)
            }
            Collection::Subscriptions => {
                Relation::subscription(text(SUBSCRIBER).unwrap_or(""), text(CHANNEL).unwrap_or(""))
            }
            other => Err(EngageError::validation(format!(
                "{} is not a relation collection",
                other
            ))),
        }
    }
}

/// Result of a toggle: whether the relation exists after the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleOutcome {
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_like_requires_object_kind() {
        let err = Relation::new(RelationKind::Like, "u1", "v1", None).unwrap_err();
        assert!(matches!(err, EngageError::Validation(_)));
    }

    #[test]
    fn test_subscription_rejects_object_kind() {
        let err = Relation::new(RelationKind::Subscription, "u1", "c1", Some(TargetKind::Video));
        assert!(err.is_err());
    }

    #[test]
    fn test_missing_identifiers() {
        assert!(Relation::subscription("", "c1").is_err());
        assert!(Relation::subscription("u1", "   ").is_err());
    }

    #[test]
    fn test_like_target_from_refs() {
        let t = LikeTarget::from_refs(None, Some("c1"), None).unwrap();
        assert_eq!(t, LikeTarget::Comment("c1".into()));

        assert!(LikeTarget::from_refs(None, None, None).is_err());
        assert!(LikeTarget::from_refs(Some("v1"), None, Some("t1")).is_err());
    }

    #[test]
    fn test_like_document_shape() {
        let rel = Relation::like("u1", LikeTarget::Video("v1".into())).unwrap();
        let d = rel.to_document();
        assert_eq!(d.get("likedBy"), Some(&json!("u1")));
        assert_eq!(d.get("video"), Some(&json!("v1")));
        assert_eq!(d.get("targetKind"), Some(&json!("video")));
        assert!(rel.filter().matches(&d));

        let decoded = Relation::from_document(Collection::Likes, &d).unwrap();
        assert_eq!(decoded, rel);
    }

    #[test]
    fn test_subscription_document_shape() {
        let rel = Relation::subscription("s1", "c1").unwrap();
        let d = rel.to_document();
        assert_eq!(d.get("subscriber"), Some(&json!("s1")));
        assert_eq!(d.get("channel"), Some(&json!("c1")));
        assert!(d.get("targetKind").is_none());
    }

    #[test]
    fn test_decode_rejects_two_targets() {
        let d = doc(json!({"likedBy": "u1", "video": "v1", "tweet": "t1"}));
        assert!(Relation::from_document(Collection::Likes, &d).is_err());
    }

    #[test]
    fn test_decode_rejects_mismatched_kind() {
        let d = doc(json!({"likedBy": "u1", "video": "v1", "targetKind": "tweet"}));
        assert!(Relation::from_document(Collection::Likes, &d).is_err());
    }

    #[test]
    fn test_keys_distinguish_target_kinds() {
        let video = Relation::like("u1", LikeTarget::Video("x".into())).unwrap();
        let comment = Relation::like("u1", LikeTarget::Comment("x".into())).unwrap();
        assert_ne!(video.key(), comment.key());
        assert_eq!(video.key(), video.clone().key());
    }
}
