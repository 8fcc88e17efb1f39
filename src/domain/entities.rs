//! Persisted content entities and the feed items built from them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::types::{PostId, PostStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRecord {
    pub taxonomy: String,
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: PostId,
    pub post_type: String,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub excerpt: String,
    pub status: PostStatus,
    #[serde(default)]
    pub has_password: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    /// Only populated when meta preloading was requested.
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
    /// Only populated when term preloading was requested.
    #[serde(default)]
    pub terms: Vec<TermRecord>,
}

impl ContentRecord {
    /// Published and not password protected.
    pub fn is_listable(&self) -> bool {
        self.status == PostStatus::Published && !self.has_password
    }
}

/// One position of a feed page.
///
/// Placeholders stand in for positions whose pool ran dry; they carry no
/// identity and are safe to render as an empty card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedItem {
    Post(ContentRecord),
    Placeholder,
}

impl FeedItem {
    pub fn id(&self) -> Option<PostId> {
        match self {
            FeedItem::Post(record) => Some(record.id),
            FeedItem::Placeholder => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, FeedItem::Placeholder)
    }

    pub fn as_record(&self) -> Option<&ContentRecord> {
        match self {
            FeedItem::Post(record) => Some(record),
            FeedItem::Placeholder => None,
        }
    }
}
