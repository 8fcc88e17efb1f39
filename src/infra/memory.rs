//! In-process content store.
//!
//! Backs the CLI when no database is configured and the test suite. Content
//! can be seeded from a TOML fixture:
//!
//! ```toml
//! [[content]]
//! id = 10
//! post_type = "post"
//! slug = "hello"
//! title = "Hello"
//! status = "published"
//! published_at = "2024-05-01T08:00:00Z"
//!
//! [content.meta]
//! subtitle = "first post"
//! ```

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::application::repos::{ContentRepo, IdQuery, LoadOptions, RepoError};
use crate::domain::entities::ContentRecord;
use crate::domain::types::PostId;

use super::error::InfraError;

const TARGET: &str = "pinfeed::memory";

#[derive(Debug, Deserialize)]
struct Fixture {
    #[serde(default)]
    content: Vec<ContentRecord>,
}

/// Number of store calls made so far, per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryCounts {
    pub id_queries: usize,
    pub record_queries: usize,
}

#[derive(Clone, Default)]
pub struct MemoryContentRepo {
    records: Arc<RwLock<BTreeMap<PostId, ContentRecord>>>,
    id_queries: Arc<AtomicUsize>,
    record_queries: Arc<AtomicUsize>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryContentRepo {
    pub fn new(records: impl IntoIterator<Item = ContentRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|record| (record.id, record))
            .collect();
        Self {
            records: Arc::new(RwLock::new(records)),
            ..Default::default()
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, InfraError> {
        let fixture: Fixture = toml::from_str(raw)
            .map_err(|err| InfraError::fixture(err.to_string()))?;

        let mut seen = HashSet::new();
        if let Some(duplicate) = fixture.content.iter().find(|record| !seen.insert(record.id)) {
            return Err(InfraError::fixture(format!(
                "id {} appears more than once",
                duplicate.id
            )));
        }

        Ok(Self::new(fixture.content))
    }

    pub async fn from_fixture(path: &Path) -> Result<Self, InfraError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let repo = Self::from_toml_str(&raw).map_err(|err| match err {
            InfraError::Fixture(message) => {
                InfraError::fixture(format!("{}: {message}", path.display()))
            }
            other => other,
        })?;
        debug!(
            target = TARGET,
            path = %path.display(),
            "content fixture loaded"
        );
        Ok(repo)
    }

    /// Insert or replace a record.
    pub async fn upsert(&self, record: ContentRecord) {
        self.records.write().await.insert(record.id, record);
    }

    pub async fn remove(&self, id: PostId) -> Option<ContentRecord> {
        self.records.write().await.remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub fn query_counts(&self) -> QueryCounts {
        QueryCounts {
            id_queries: self.id_queries.load(Ordering::SeqCst),
            record_queries: self.record_queries.load(Ordering::SeqCst),
        }
    }

    pub fn reset_query_counts(&self) {
        self.id_queries.store(0, Ordering::SeqCst);
        self.record_queries.store(0, Ordering::SeqCst);
    }

    /// While set, every query fails with [`RepoError::Timeout`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), RepoError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepoError::Timeout);
        }
        Ok(())
    }
}

/// Newest first; undated content last; higher id first on ties.
fn natural_order(left: &ContentRecord, right: &ContentRecord) -> CmpOrdering {
    let by_date = match (left.published_at, right.published_at) {
        (Some(left), Some(right)) => right.cmp(&left),
        (Some(_), None) => CmpOrdering::Less,
        (None, Some(_)) => CmpOrdering::Greater,
        (None, None) => CmpOrdering::Equal,
    };
    by_date.then_with(|| right.id.cmp(&left.id))
}

#[async_trait]
impl ContentRepo for MemoryContentRepo {
    async fn query_ids(&self, query: &IdQuery) -> Result<Vec<PostId>, RepoError> {
        self.id_queries.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let include: Option<HashSet<PostId>> = query
            .include
            .as_ref()
            .map(|ids| ids.iter().copied().collect());
        let exclude: HashSet<PostId> = query.exclude.iter().copied().collect();

        let records = self.records.read().await;
        let mut matches: Vec<&ContentRecord> = records
            .values()
            .filter(|record| record.status == query.status && !record.has_password)
            .filter(|record| query.types.matches(&record.post_type))
            .filter(|record| include.as_ref().is_none_or(|ids| ids.contains(&record.id)))
            .filter(|record| !exclude.contains(&record.id))
            .collect();
        matches.sort_by(|left, right| natural_order(left, right));

        let ids = matches
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|record| record.id)
            .collect();
        Ok(ids)
    }

    async fn query_by_ids(
        &self,
        ids: &[PostId],
        options: LoadOptions,
    ) -> Result<Vec<ContentRecord>, RepoError> {
        self.record_queries.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let records = self.records.read().await;
        let loaded = ids
            .iter()
            .filter_map(|id| records.get(id))
            .filter(|record| record.is_listable())
            .map(|record| {
                let mut record = record.clone();
                if !options.preload_meta {
                    record.meta.clear();
                }
                if !options.preload_terms {
                    record.terms.clear();
                }
                record
            })
            .collect();
        Ok(loaded)
    }

    async fn ping(&self) -> Result<(), RepoError> {
        self.check_available()
    }
}
