//! Content operations: videos, comments, tweets and playlists
//!
//! Thin wrappers over the store. Input is validated before any store call,
//! and an absent target is reported as `NotFound`. Deleting content does
//! not cascade to relations pointing at it; listings skip those dangling
//! relations instead.

use crate::engine::Engine;
use crate::error::{EngageError, Result};
use crate::model::{Comment, Playlist, Tweet, Video};
use crate::store::{from_document, to_document, Collection, DocumentStore, Filter, Update};

/// Fields supplied when publishing a video
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVideo {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub video_file: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
}

/// Trimmed, non-blank text
fn text(label: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngageError::validation(format!("{} is required", label)));
    }
    Ok(trimmed.to_string())
}

impl<S: DocumentStore> Engine<S> {
    fn fetch<T: serde::de::DeserializeOwned>(&self, collection: Collection, id: &str) -> Result<T> {
        let id = text("id", id)?;
        match self.store.find_by_id(collection, &id)? {
            Some(doc) => from_document(doc),
            None => Err(EngageError::not_found(collection.as_str(), id)),
        }
    }

    fn insert<T: serde::Serialize + serde::de::DeserializeOwned>(&self, collection: Collection, entity: &T) -> Result<T> {
        from_document(self.store.create(collection, to_document(entity)?)?)
    }

    /// Update by id; an unmatched id is `NotFound`
    fn modify<T: serde::de::DeserializeOwned>(&self, collection: Collection, id: &str, update: Update) -> Result<T> {
        let id = text("id", id)?;
        let outcome = self.store.update_one(collection, &Filter::by_id(id.as_str()), &update)?;
        match outcome.document {
            Some(doc) if outcome.matched => from_document(doc),
            _ => Err(EngageError::not_found(collection.as_str(), id)),
        }
    }

    fn remove(&self, collection: Collection, id: &str) -> Result<()> {
        let id = text("id", id)?;
        if self.store.delete_one(collection, &Filter::by_id(id.as_str()))?.deleted {
            tracing::info!(%collection, id = %id, "document deleted");
            Ok(())
        } else {
            Err(EngageError::not_found(collection.as_str(), id))
        }
    }

    fn owned_by<T: serde::de::DeserializeOwned>(&self, collection: Collection, owner: &str) -> Result<Vec<T>> {
        let owner = text("owner id", owner)?;
        self.store
            .find(collection, &Filter::new().eq("owner", owner))?
            .into_iter()
            .map(from_document)
            .collect()
    }

    // === Videos ===

    pub fn publish_video(&self, owner: &str, new: NewVideo) -> Result<Video> {
        let video = Video {
            id: String::new(),
            owner: text("owner id", owner)?,
            title: text("title", &new.title)?,
            description: text("description", &new.description)?,
            views: 0,
            is_published: true,
            video_file: new.video_file,
            thumbnail: new.thumbnail,
            duration: new.duration,
        };
        self.insert(Collection::Videos, &video)
    }

    pub fn get_video(&self, video_id: &str) -> Result<Video> {
        self.fetch(Collection::Videos, video_id)
    }

    pub fn update_video_details(&self, video_id: &str, title: &str, description: &str) -> Result<Video> {
        let update = Update::new()
            .set("title", text("title", title)?)
            .set("description", text("description", description)?);
        self.modify(Collection::Videos, video_id, update)
    }

    /// Flip `isPublished` in one store write
    pub fn toggle_publish_status(&self, video_id: &str) -> Result<Video> {
        self.modify(Collection::Videos, video_id, Update::new().toggle("isPublished"))
    }

    pub fn record_view(&self, video_id: &str) -> Result<Video> {
        self.modify(Collection::Videos, video_id, Update::new().inc("views", 1))
    }

    /// Likes pointing at the video are left in place
    pub fn delete_video(&self, video_id: &str) -> Result<()> {
        self.remove(Collection::Videos, video_id)
    }

    // === Comments ===

    pub fn add_comment(&self, owner: &str, video_id: &str, content: &str) -> Result<Comment> {
        let content = text("comment", content)?;
        let owner = text("owner id", owner)?;
        let video = self.get_video(video_id)?;

        self.insert(
            Collection::Comments,
            &Comment { id: String::new(), content, video: video.id, owner },
        )
    }

    /// The new content is validated after trimming, so whitespace-only
    /// edits are rejected
    pub fn update_comment(&self, comment_id: &str, content: &str) -> Result<Comment> {
        let content = text("comment", content)?;
        self.modify(Collection::Comments, comment_id, Update::new().set("content", content))
    }

    pub fn delete_comment(&self, comment_id: &str) -> Result<()> {
        self.remove(Collection::Comments, comment_id)
    }

    // === Tweets ===

    pub fn post_tweet(&self, owner: &str, content: &str) -> Result<Tweet> {
        let tweet = Tweet {
            id: String::new(),
            content: text("tweet", content)?,
            owner: text("owner id", owner)?,
        };
        self.insert(Collection::Tweets, &tweet)
    }

    pub fn update_tweet(&self, tweet_id: &str, content: &str) -> Result<Tweet> {
        let content = text("tweet", content)?;
        self.modify(Collection::Tweets, tweet_id, Update::new().set("content", content))
    }

    pub fn delete_tweet(&self, tweet_id: &str) -> Result<()> {
        self.remove(Collection::Tweets, tweet_id)
    }

    pub fn user_tweets(&self, owner: &str) -> Result<Vec<Tweet>> {
        self.owned_by(Collection::Tweets, owner)
    }

    // === Playlists ===

    pub fn create_playlist(&self, owner: &str, name: &str, description: &str) -> Result<Playlist> {
        let playlist = Playlist {
            id: String::new(),
            name: text("name", name)?,
            description: text("description", description)?,
            videos: Vec::new(),
            owner: text("owner id", owner)?,
        };
        self.insert(Collection::Playlists, &playlist)
    }

    pub fn get_playlist(&self, playlist_id: &str) -> Result<Playlist> {
        self.fetch(Collection::Playlists, playlist_id)
    }

    pub fn update_playlist(&self, playlist_id: &str, name: &str, description: &str) -> Result<Playlist> {
        let update = Update::new()
            .set("name", text("name", name)?)
            .set("description", text("description", description)?);
        self.modify(Collection::Playlists, playlist_id, update)
    }

    pub fn delete_playlist(&self, playlist_id: &str) -> Result<()> {
        self.remove(Collection::Playlists, playlist_id)
    }

    pub fn user_playlists(&self, owner: &str) -> Result<Vec<Playlist>> {
        self.owned_by(Collection::Playlists, owner)
    }

    /// Adding a video twice keeps one entry
    pub fn add_video_to_playlist(&self, playlist_id: &str, video_id: &str) -> Result<Playlist> {
        let video = self.get_video(video_id)?;
        self.modify(Collection::Playlists, playlist_id, Update::new().add_to_set("videos", video.id))
    }

    pub fn remove_video_from_playlist(&self, playlist_id: &str, video_id: &str) -> Result<Playlist> {
        let video_id = text("video id", video_id)?;
        self.modify(Collection::Playlists, playlist_id, Update::new().pull("videos", video_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn new_video(title: &str) -> NewVideo {
        NewVideo {
            title: title.to_string(),
            description: "about".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_publish_and_fetch() {
        let engine = Engine::new(MemoryStore::new());
        let video = engine.publish_video("c1", new_video("  First  ")).unwrap();
        assert_eq!(video.id.len(), 24);
        assert_eq!(video.title, "First");
        assert!(video.is_published);
        assert_eq!(engine.get_video(&video.id).unwrap(), video);
    }

    #[test]
    fn test_publish_rejects_blank_fields() {
        let engine = Engine::new(MemoryStore::new());
        let err = engine.publish_video("c1", new_video("   ")).unwrap_err();
        assert!(matches!(err, EngageError::Validation(_)));
        assert_eq!(engine.store().len(Collection::Videos).unwrap(), 0);
    }

    #[test]
    fn test_toggle_publish_and_views() {
        let engine = Engine::new(MemoryStore::new());
        let video = engine.publish_video("c1", new_video("v")).unwrap();

        assert!(!engine.toggle_publish_status(&video.id).unwrap().is_published);
        assert!(engine.toggle_publish_status(&video.id).unwrap().is_published);

        engine.record_view(&video.id).unwrap();
        assert_eq!(engine.record_view(&video.id).unwrap().views, 2);

        assert!(matches!(
            engine.toggle_publish_status("missing"),
            Err(EngageError::NotFound { .. })
        ));
    }

    #[test]
    fn test_comment_lifecycle() {
        let engine = Engine::new(MemoryStore::new());
        let video = engine.publish_video("c1", new_video("v")).unwrap();

        let comment = engine.add_comment("u1", &video.id, " nice ").unwrap();
        assert_eq!(comment.content, "nice");
        assert_eq!(comment.video, video.id);

        let edited = engine.update_comment(&comment.id, "even nicer").unwrap();
        assert_eq!(edited.content, "even nicer");

        engine.delete_comment(&comment.id).unwrap();
        assert!(matches!(engine.delete_comment(&comment.id), Err(EngageError::NotFound { .. })));
    }

    #[test]
    fn test_comment_requires_existing_video() {
        let engine = Engine::new(MemoryStore::new());
        let err = engine.add_comment("u1", "nope", "hi").unwrap_err();
        assert!(matches!(err, EngageError::NotFound { .. }));
    }

    #[test]
    fn test_update_comment_validates_trimmed_content() {
        let engine = Engine::new(MemoryStore::new());
        let video = engine.publish_video("c1", new_video("v")).unwrap();
        let comment = engine.add_comment("u1", &video.id, "hello").unwrap();

        let err = engine.update_comment(&comment.id, "   ").unwrap_err();
        assert!(matches!(err, EngageError::Validation(_)));
        assert_eq!(engine.store().find_by_id(Collection::Comments, &comment.id).unwrap().unwrap()["content"], "hello");
    }

    #[test]
    fn test_tweets() {
        let engine = Engine::new(MemoryStore::new());
        let tweet = engine.post_tweet("u1", "first").unwrap();
        engine.post_tweet("u2", "other").unwrap();

        assert_eq!(engine.update_tweet(&tweet.id, "edited").unwrap().content, "edited");
        assert_eq!(engine.user_tweets("u1").unwrap().len(), 1);

        engine.delete_tweet(&tweet.id).unwrap();
        assert!(engine.user_tweets("u1").unwrap().is_empty());
    }

    #[test]
    fn test_playlist_membership() {
        let engine = Engine::new(MemoryStore::new());
        let video = engine.publish_video("c1", new_video("v")).unwrap();
        let playlist = engine.create_playlist("u1", "mix", "stuff").unwrap();

        engine.add_video_to_playlist(&playlist.id, &video.id).unwrap();
        let twice = engine.add_video_to_playlist(&playlist.id, &video.id).unwrap();
        assert_eq!(twice.videos, vec![video.id.clone()]);

        let removed = engine.remove_video_from_playlist(&playlist.id, &video.id).unwrap();
        assert!(removed.videos.is_empty());

        assert!(matches!(
            engine.add_video_to_playlist(&playlist.id, "ghost"),
            Err(EngageError::NotFound { .. })
        ));
        assert_eq!(engine.user_playlists("u1").unwrap().len(), 1);

        engine.delete_playlist(&playlist.id).unwrap();
        assert!(engine.get_playlist(&playlist.id).is_err());
    }
}
