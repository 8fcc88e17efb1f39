use serde::Serialize;

use crate::domain::entities::FeedItem;
use crate::domain::types::PostId;

/// One materialized window of a feed: exactly `limit` items starting at
/// absolute index `offset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedPage {
    pub offset: usize,
    pub limit: usize,
    pub items: Vec<FeedItem>,
    /// Number of items, placeholders included.
    pub post_count: usize,
    /// Records found by the store plus placeholders.
    pub found_posts: usize,
}

impl FeedPage {
    pub fn empty(offset: usize) -> Self {
        Self {
            offset,
            limit: 0,
            items: Vec::new(),
            post_count: 0,
            found_posts: 0,
        }
    }

    /// Ids in page order; placeholders are `None`.
    pub fn ids(&self) -> Vec<Option<PostId>> {
        self.items.iter().map(FeedItem::id).collect()
    }

    pub fn placeholder_count(&self) -> usize {
        self.items.iter().filter(|item| item.is_placeholder()).count()
    }
}
