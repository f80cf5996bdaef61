//! Toggle engine
//!
//! A toggle flips the presence of one relation tuple. The check and the
//! write happen inside the store's atomic `toggle_relation` primitive, so
//! concurrent toggles on the same tuple can never leave two rows behind.

use super::{LikeTarget, Relation, RelationKind, TargetKind, ToggleOutcome};
use crate::engine::Engine;
use crate::error::{EngageError, Result};
use crate::store::{Collection, DocumentStore};

impl<S: DocumentStore> Engine<S> {
    /// Flip the relation `(kind, subject, object, object_kind)`.
    ///
    /// Identifiers are validated before the store is touched.
    pub fn toggle(
        &self,
        kind: RelationKind,
        subject_id: &str,
        object_id: &str,
        object_kind: Option<TargetKind>,
    ) -> Result<ToggleOutcome> {
        let relation = Relation::new(kind, subject_id, object_id, object_kind)?;
        self.toggle_relation(&relation)
    }

    pub fn toggle_relation(&self, relation: &Relation) -> Result<ToggleOutcome> {
        if self.config.verify_targets {
            self.ensure_target(relation)?;
        }

        let outcome = self.store.toggle_relation(relation)?;
        tracing::info!(
            kind = relation.kind().as_str(),
            subject = relation.subject_id(),
            object = relation.object_id(),
            active = outcome.active,
            "relation toggled"
        );
        Ok(outcome)
    }

    pub fn toggle_video_like(&self, subject_id: &str, video_id: &str) -> Result<ToggleOutcome> {
        self.toggle_relation(&Relation::like(subject_id, LikeTarget::Video(video_id.to_string()))?)
    }

    pub fn toggle_comment_like(&self, subject_id: &str, comment_id: &str) -> Result<ToggleOutcome> {
        self.toggle_relation(&Relation::like(subject_id, LikeTarget::Comment(comment_id.to_string()))?)
    }

    pub fn toggle_tweet_like(&self, subject_id: &str, tweet_id: &str) -> Result<ToggleOutcome> {
        self.toggle_relation(&Relation::like(subject_id, LikeTarget::Tweet(tweet_id.to_string()))?)
    }

    pub fn toggle_subscription(&self, subscriber_id: &str, channel_id: &str) -> Result<ToggleOutcome> {
        self.toggle_relation(&Relation::subscription(subscriber_id, channel_id)?)
    }

    /// Whether the tuple currently exists
    pub fn is_active(&self, relation: &Relation) -> Result<bool> {
        Ok(!self
            .store
            .find(relation.collection(), &relation.filter())?
            .is_empty())
    }

    /// The object must exist before a new relation may point at it.
    /// Removing an existing relation is always allowed, so a tuple whose
    /// target was deleted can still be switched off.
    fn ensure_target(&self, relation: &Relation) -> Result<()> {
        if self.is_active(relation)? {
            return Ok(());
        }
        let collection = relation
            .object_kind()
            .map(|k| k.collection())
            .unwrap_or(Collection::Users);
        match self.store.find_by_id(collection, relation.object_id())? {
            Some(_) => Ok(()),
            None => Err(EngageError::not_found(collection.as_str(), relation.object_id())),
        }
    }
}
