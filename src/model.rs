//! Typed entities
//!
//! Stores hold plain documents; these types are the shapes the engine
//! writes and reads back. Field names follow the stored camelCase form.

use serde::{Deserialize, Deserializer, Serialize};

fn is_empty(s: &str) -> bool {
    s.is_empty()
}

fn published_by_default() -> bool {
    true
}

/// Non-negative count that may have been stored (or summed) as a float
fn count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Int(u64),
        Float(f64),
    }

    Ok(match Count::deserialize(deserializer)? {
        Count::Int(n) => n,
        Count::Float(f) => f.max(0.0).round() as u64,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    #[serde(rename = "_id", default, skip_serializing_if = "is_empty")]
    pub id: String,
    pub owner: String,
    pub title: String,
    pub description: String,
    #[serde(default, deserialize_with = "count")]
    pub views: u64,
    #[serde(default = "published_by_default")]
    pub is_published: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(rename = "_id", default, skip_serializing_if = "is_empty")]
    pub id: String,
    pub content: String,
    pub video: String,
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tweet {
    #[serde(rename = "_id", default, skip_serializing_if = "is_empty")]
    pub id: String,
    pub content: String,
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    #[serde(rename = "_id", default, skip_serializing_if = "is_empty")]
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub videos: Vec<String>,
    pub owner: String,
}

/// Per-channel engagement totals. Derived on demand, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    #[serde(deserialize_with = "count")]
    pub total_views: u64,
    #[serde(deserialize_with = "count")]
    pub total_subscribers: u64,
    #[serde(deserialize_with = "count")]
    pub total_videos: u64,
    #[serde(deserialize_with = "count")]
    pub total_likes: u64,
}
