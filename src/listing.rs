//! List composer
//!
//! Two query shapes:
//!
//! - **Count+Window**: one `$facet` over the matched set, with a count branch
//!   and a sort/skip/limit branch. The count never sees the window.
//! - **Join+Flatten**: relations are joined to their targets and each
//!   relation is replaced by the target document. Relations whose target no
//!   longer exists are dropped silently (relations are not cascade-deleted).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::Engine;
use crate::error::{EngageError, Result};
use crate::pagination::PageRequest;
use crate::pipeline::{Expr, SortKey, Stage};
use crate::relation::{TargetKind, CHANNEL, LIKED_BY, SUBSCRIBER, TARGET_KIND};
use crate::store::{Collection, Document, DocumentStore, Filter, ID_FIELD};

const TOTAL_BRANCH: &str = "totalCount";
const ITEMS_BRANCH: &str = "items";
const TOTAL_FIELD: &str = "total";
const JOINED: &str = "target";

/// One page of a Count+Window listing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub items: Vec<Document>,
    pub total_count: u64,
    pub page: i64,
    pub page_size: i64,
}

/// Filters for a channel's video listing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoQuery {
    /// Free-text search over the video's string fields
    pub text: Option<String>,
    pub sort_by: Option<String>,
    /// "asc" ascends; anything else descends
    pub sort_type: Option<String>,
    #[serde(flatten)]
    pub page: PageRequest,
}

fn required<'a>(label: &str, id: &'a str) -> Result<&'a str> {
    let id = id.trim();
    if id.is_empty() {
        return Err(EngageError::validation(format!("{} is required", label)));
    }
    Ok(id)
}

/// Count+Window pipeline
pub fn paginated_pipeline(filter: Filter, sort: Option<Vec<SortKey>>, request: &PageRequest) -> Result<Vec<Stage>> {
    let window = request.plan()?;

    let mut items = Vec::new();
    if let Some(keys) = sort.filter(|k| !k.is_empty()) {
        items.push(Stage::Sort(keys));
    }
    items.extend(window.stages());

    Ok(vec![
        Stage::Match(filter),
        Stage::facet(vec![
            (TOTAL_BRANCH, vec![Stage::count(TOTAL_FIELD)]),
            (ITEMS_BRANCH, items),
        ]),
    ])
}

/// Join+Flatten pipeline
///
/// Relations are grouped by `local_key` first, so duplicate relation rows
/// never duplicate a target.
pub fn joined_targets_pipeline(filter: Filter, target: Collection, local_key: &str, foreign_key: &str) -> Vec<Stage> {
    vec![
        Stage::Match(filter),
        Stage::group(Expr::field(local_key), vec![]),
        Stage::lookup(target, ID_FIELD, foreign_key, JOINED),
        Stage::unwind(JOINED),
        Stage::replace_root(JOINED),
    ]
}

/// Read the single facet document back into a page
fn read_page(output: Vec<Document>, request: &PageRequest) -> Page {
    let mut page = Page {
        items: Vec::new(),
        total_count: 0,
        page: request.page,
        page_size: request.page_size,
    };
    let Some(mut doc) = output.into_iter().next() else {
        return page;
    };

    // An empty match set has no count document at all
    page.total_count = doc
        .get(TOTAL_BRANCH)
        .and_then(|v| v.get(0))
        .and_then(|v| v.get(TOTAL_FIELD))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    if let Some(Value::Array(items)) = doc.remove(ITEMS_BRANCH) {
        page.items = items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
    }
    page
}

impl<S: DocumentStore> Engine<S> {
    /// Count+Window listing over `collection`
    pub fn list_paginated(
        &self,
        collection: Collection,
        filter: Filter,
        sort: Option<Vec<SortKey>>,
        request: PageRequest,
    ) -> Result<Page> {
        let stages = paginated_pipeline(filter, sort, &request)?;
        let output = self.store.run_pipeline(collection, &stages)?;
        Ok(read_page(output, &request))
    }

    /// Join+Flatten listing: relations matching `filter` in `relations`,
    /// replaced by the `target` documents whose `foreign_key` equals the
    /// relation's `local_key`
    pub fn list_joined_targets(
        &self,
        relations: Collection,
        filter: Filter,
        target: Collection,
        local_key: &str,
        foreign_key: &str,
    ) -> Result<Vec<Document>> {
        if filter.is_empty() {
            return Err(EngageError::validation("relation predicate is required"));
        }
        if local_key.is_empty() || foreign_key.is_empty() {
            return Err(EngageError::validation("join keys are required"));
        }

        let stages = joined_targets_pipeline(filter, target, local_key, foreign_key);
        self.store.run_pipeline(relations, &stages)
    }

    // === Named listings ===

    pub fn video_comments(&self, video_id: &str, request: PageRequest) -> Result<Page> {
        let video_id = required("video id", video_id)?;
        self.list_paginated(Collection::Comments, Filter::new().eq("video", video_id), None, request)
    }

    pub fn channel_videos(&self, owner: &str, query: &VideoQuery) -> Result<Page> {
        let owner = required("channel id", owner)?;

        let mut filter = Filter::new().eq("owner", owner);
        if let Some(text) = query.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            filter = filter.text(text);
        }

        let sort = query
            .sort_by
            .as_deref()
            .filter(|field| !field.is_empty())
            .map(|field| match query.sort_type.as_deref() {
                Some("asc") => vec![SortKey::asc(field)],
                _ => vec![SortKey::desc(field)],
            });

        self.list_paginated(Collection::Videos, filter, sort, query.page)
    }

    /// Videos the subject has liked; deleted videos are skipped
    pub fn liked_videos(&self, subject_id: &str) -> Result<Vec<Document>> {
        let subject_id = required("subject id", subject_id)?;
        let video = TargetKind::Video.as_str();
        self.list_joined_targets(
            Collection::Likes,
            Filter::new().eq(LIKED_BY, subject_id).eq(TARGET_KIND, video),
            Collection::Videos,
            video,
            ID_FIELD,
        )
    }

    /// Users subscribed to the channel
    pub fn channel_subscribers(&self, channel_id: &str) -> Result<Vec<Document>> {
        let channel_id = required("channel id", channel_id)?;
        self.list_joined_targets(
            Collection::Subscriptions,
            Filter::new().eq(CHANNEL, channel_id),
            Collection::Users,
            SUBSCRIBER,
            ID_FIELD,
        )
    }

    /// Channels the subscriber follows
    pub fn subscribed_channels(&self, subscriber_id: &str) -> Result<Vec<Document>> {
        let subscriber_id = required("subscriber id", subscriber_id)?;
        self.list_joined_targets(
            Collection::Subscriptions,
            Filter::new().eq(SUBSCRIBER, subscriber_id),
            Collection::Users,
            CHANNEL,
            ID_FIELD,
        )
    }

    /// Every video the channel uploaded
    pub fn uploaded_videos(&self, channel_id: &str) -> Result<Vec<Document>> {
        let channel_id = required("channel id", channel_id)?;

        let mut seed = Document::new();
        seed.insert(ID_FIELD.to_string(), Value::from(channel_id));
        let stages = vec![
            Stage::Documents(vec![seed]),
            Stage::lookup(Collection::Videos, ID_FIELD, "owner", "videos"),
            Stage::unwind("videos"),
            Stage::replace_root("videos"),
        ];
        self.store.run_pipeline(Collection::Users, &stages)
    }
}
