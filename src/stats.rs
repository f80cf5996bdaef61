//! Channel statistics
//!
//! One pipeline computes all four totals. It starts from a literal
//! `{_id: channel}` document rather than the users collection, so exactly one
//! record comes out even for a channel with no user row, no videos and no
//! subscribers. The videos join is unwound with `preserve_empty`; a plain
//! unwind would drop the whole record for a channel without videos.

use serde_json::Value;

use crate::engine::Engine;
use crate::error::{EngageError, Result};
use crate::model::ChannelStats;
use crate::pipeline::{Accumulator, Expr, Projection, Stage};
use crate::relation::{CHANNEL, TargetKind};
use crate::store::{from_document, Collection, Document, DocumentStore, ID_FIELD};

/// Stats pipeline for one channel
pub fn channel_stats_pipeline(channel_id: &str) -> Vec<Stage> {
    let mut seed = Document::new();
    seed.insert(ID_FIELD.to_string(), Value::from(channel_id));

    let zero = || Expr::literal(0);

    vec![
        Stage::Documents(vec![seed]),
        Stage::lookup_with(
            Collection::Videos,
            ID_FIELD,
            "owner",
            "videos",
            vec![
                Stage::lookup(Collection::Likes, ID_FIELD, TargetKind::Video.as_str(), "likes"),
                Stage::add_fields(vec![("likesCount", Expr::size(Expr::field("likes")))]),
            ],
        ),
        Stage::lookup(Collection::Subscriptions, ID_FIELD, CHANNEL, "subscribers"),
        Stage::add_fields(vec![
            ("totalSubscribers", Expr::size(Expr::field("subscribers"))),
            ("totalVideos", Expr::size(Expr::field("videos"))),
        ]),
        Stage::unwind_preserving("videos"),
        Stage::group(
            Expr::field(ID_FIELD),
            vec![
                ("totalViews", Accumulator::Sum(Expr::field("videos.views"))),
                ("totalLikes", Accumulator::Sum(Expr::field("videos.likesCount"))),
                ("totalSubscribers", Accumulator::First(Expr::field("totalSubscribers"))),
                ("totalVideos", Accumulator::First(Expr::field("totalVideos"))),
            ],
        ),
        Stage::project(vec![
            (ID_FIELD, Projection::Exclude),
            ("totalViews", Projection::Computed(Expr::if_null(Expr::field("totalViews"), zero()))),
            (
                "totalSubscribers",
                Projection::Computed(Expr::if_null(Expr::field("totalSubscribers"), zero())),
            ),
            ("totalVideos", Projection::Computed(Expr::if_null(Expr::field("totalVideos"), zero()))),
            ("totalLikes", Projection::Computed(Expr::if_null(Expr::field("totalLikes"), zero()))),
        ]),
    ]
}

impl<S: DocumentStore> Engine<S> {
    /// Engagement totals for a channel. Always returns one record.
    pub fn channel_stats(&self, channel_id: &str) -> Result<ChannelStats> {
        let channel_id = channel_id.trim();
        if channel_id.is_empty() {
            return Err(EngageError::validation("channel id is required"));
        }

        let record = self
            .store
            .run_pipeline(Collection::Users, &channel_stats_pipeline(channel_id))?
            .into_iter()
            .next();

        match record {
            Some(doc) => from_document(doc),
            None => {
                tracing::warn!(channel = channel_id, "stats pipeline produced no record");
                Ok(ChannelStats::default())
            }
        }
    }
}
