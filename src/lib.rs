//! engagedb - relation-toggle and aggregation engine for a content-sharing backend
//!
//! # Architecture
//!
//! - **Document stores**: `MemoryStore` (RwLock snapshot) and `SledStore` (persistent)
//! - **Atomic toggles**: delete-if-exists-else-insert over a unique relation key
//! - **Deterministic relation keys**: BLAKE3(kind|subject|object|objectKind)
//! - **Pipelines**: match/lookup/group/facet/unwind/... interpreted by one executor
//! - **Listings**: Count+Window pagination and Join+Flatten relation listings
//!
//! # Usage example
//!
//! ```
//! use engagedb::{Engine, MemoryStore, PageRequest};
//!
//! # fn main() -> engagedb::Result<()> {
//! let engine = Engine::new(MemoryStore::new());
//!
//! // Like, then unlike
//! assert!(engine.toggle_video_like("user-1", "video-1")?.active);
//! assert!(!engine.toggle_video_like("user-1", "video-1")?.active);
//!
//! // A channel with nothing in it still has a stats record
//! let stats = engine.channel_stats("channel-1")?;
//! assert_eq!(stats.total_videos, 0);
//!
//! let page = engine.video_comments("video-1", PageRequest::new(1, 10))?;
//! assert_eq!(page.total_count, 0);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod content;
pub mod engine;
pub mod error;
pub mod listing;
pub mod model;
pub mod pagination;
pub mod pipeline;
pub mod relation;
pub mod stats;
pub mod store;

pub use config::{EngineConfig, ServerConfig};
pub use engine::Engine;
pub use error::{EngageError, ErrorKind, Result};
pub use listing::{Page, VideoQuery};
pub use model::{ChannelStats, Comment, Playlist, Tweet, Video};
pub use pagination::{PageRequest, Window};
pub use relation::{LikeTarget, Relation, RelationKind, TargetKind, ToggleOutcome};
pub use store::{Collection, Document, DocumentStore, Filter, MemoryStore, SledStore, Update};
