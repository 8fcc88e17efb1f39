//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::ContentRecord;
use crate::domain::types::{PostId, PostStatus, TypeFilter};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Id-only query over the content store, returned in natural order
/// (most recently published first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdQuery {
    pub types: TypeFilter,
    pub status: PostStatus,
    /// `None` returns every match.
    pub limit: Option<usize>,
    pub offset: usize,
    /// Restrict the result to these ids.
    pub include: Option<Vec<PostId>>,
    /// Removed before `offset` and `limit` apply.
    pub exclude: Vec<PostId>,
}

impl IdQuery {
    pub fn published(types: TypeFilter) -> Self {
        Self {
            types,
            status: PostStatus::Published,
            limit: None,
            offset: 0,
            include: None,
            exclude: Vec::new(),
        }
    }

    pub fn with_window(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    pub fn including(mut self, ids: Vec<PostId>) -> Self {
        self.include = Some(ids);
        self
    }

    pub fn excluding(mut self, ids: Vec<PostId>) -> Self {
        self.exclude = ids;
        self
    }
}

/// Auxiliary data joined onto each record when materializing a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub preload_meta: bool,
    pub preload_terms: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            preload_meta: true,
            preload_terms: true,
        }
    }
}

#[async_trait]
pub trait ContentRepo: Send + Sync {
    /// Ids matching the query in natural order. Password protected content
    /// is never returned.
    async fn query_ids(&self, query: &IdQuery) -> Result<Vec<PostId>, RepoError>;

    /// Published records for `ids`, in exactly the order of `ids`. Ids that
    /// do not resolve are skipped.
    async fn query_by_ids(
        &self,
        ids: &[PostId],
        options: LoadOptions,
    ) -> Result<Vec<ContentRecord>, RepoError>;

    /// Cheap reachability check.
    async fn ping(&self) -> Result<(), RepoError> {
        Ok(())
    }
}
