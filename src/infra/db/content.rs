use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use sqlx::QueryBuilder;
use time::OffsetDateTime;
use tracing::debug;

use crate::application::repos::{ContentRepo, IdQuery, LoadOptions, RepoError};
use crate::domain::entities::{ContentRecord, TermRecord};
use crate::domain::types::{PostId, PostStatus};

use super::util::to_i64;
use super::{NATURAL_ORDER, PostgresContentRepo, map_sqlx_error};

const TARGET: &str = "pinfeed::db";

#[derive(sqlx::FromRow)]
struct ContentRow {
    id: PostId,
    post_type: String,
    slug: String,
    title: String,
    excerpt: String,
    status: PostStatus,
    has_password: bool,
    published_at: Option<OffsetDateTime>,
}

impl From<ContentRow> for ContentRecord {
    fn from(row: ContentRow) -> Self {
        Self {
            id: row.id,
            post_type: row.post_type,
            slug: row.slug,
            title: row.title,
            excerpt: row.excerpt,
            status: row.status,
            has_password: row.has_password,
            published_at: row.published_at,
            meta: BTreeMap::new(),
            terms: Vec::new(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct MetaRow {
    content_id: PostId,
    meta_key: String,
    meta_value: String,
}

#[derive(sqlx::FromRow)]
struct TermRow {
    content_id: PostId,
    taxonomy: String,
    slug: String,
    name: String,
}

fn raw_ids(ids: &[PostId]) -> Vec<i64> {
    ids.iter().map(|id| id.get()).collect()
}

impl PostgresContentRepo {
    async fn load_meta(
        &self,
        ids: &[i64],
    ) -> Result<HashMap<PostId, BTreeMap<String, String>>, RepoError> {
        let rows = sqlx::query_as::<_, MetaRow>(
            "SELECT content_id, meta_key, meta_value FROM content_meta \
             WHERE content_id = ANY($1) ORDER BY content_id, meta_key",
        )
        .bind(ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let mut meta: HashMap<PostId, BTreeMap<String, String>> = HashMap::new();
        for row in rows {
            meta.entry(row.content_id)
                .or_default()
                .insert(row.meta_key, row.meta_value);
        }
        Ok(meta)
    }

    async fn load_terms(
        &self,
        ids: &[i64],
    ) -> Result<HashMap<PostId, Vec<TermRecord>>, RepoError> {
        let rows = sqlx::query_as::<_, TermRow>(
            "SELECT content_id, taxonomy, slug, name FROM content_terms \
             WHERE content_id = ANY($1) ORDER BY content_id, taxonomy, name",
        )
        .bind(ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let mut terms: HashMap<PostId, Vec<TermRecord>> = HashMap::new();
        for row in rows {
            terms.entry(row.content_id).or_default().push(TermRecord {
                taxonomy: row.taxonomy,
                slug: row.slug,
                name: row.name,
            });
        }
        Ok(terms)
    }
}

#[async_trait]
impl ContentRepo for PostgresContentRepo {
    async fn query_ids(&self, query: &IdQuery) -> Result<Vec<PostId>, RepoError> {
        if query.include.as_ref().is_some_and(Vec::is_empty) || query.limit == Some(0) {
            return Ok(Vec::new());
        }
        // No table holds more rows than a BIGINT offset can skip.
        let Ok(offset) = i64::try_from(query.offset) else {
            return Ok(Vec::new());
        };

        let mut qb = QueryBuilder::new("SELECT c.id FROM content c WHERE 1=1 ");
        Self::apply_visibility(&mut qb, query.status);
        Self::apply_type_filter(&mut qb, &query.types);

        if let Some(include) = query.include.as_ref() {
            qb.push(" AND c.id = ANY(");
            qb.push_bind(raw_ids(include));
            qb.push(")");
        }
        if !query.exclude.is_empty() {
            qb.push(" AND NOT (c.id = ANY(");
            qb.push_bind(raw_ids(&query.exclude));
            qb.push("))");
        }

        qb.push(NATURAL_ORDER);
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ");
            qb.push_bind(to_i64(limit, "limit")?);
        }
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let ids: Vec<PostId> = qb
            .build_query_scalar()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        debug!(
            target = TARGET,
            status = query.status.as_str(),
            offset,
            returned = ids.len(),
            "id query executed"
        );
        Ok(ids)
    }

    async fn query_by_ids(
        &self,
        ids: &[PostId],
        options: LoadOptions,
    ) -> Result<Vec<ContentRecord>, RepoError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let raw = raw_ids(ids);

        let mut qb = QueryBuilder::new(
            "SELECT c.id, c.post_type, c.slug, c.title, c.excerpt, c.status, \
             c.has_password, c.published_at \
             FROM unnest(",
        );
        qb.push_bind(raw.clone());
        qb.push("::bigint[]) WITH ORDINALITY AS wanted(id, position) ");
        qb.push("INNER JOIN content c ON c.id = wanted.id WHERE 1=1 ");
        Self::apply_visibility(&mut qb, PostStatus::Published);
        qb.push(" ORDER BY wanted.position");

        let rows: Vec<ContentRow> = qb
            .build_query_as()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        let mut records: Vec<ContentRecord> = rows.into_iter().map(ContentRecord::from).collect();

        if options.preload_meta {
            let meta = self.load_meta(&raw).await?;
            for record in &mut records {
                record.meta = meta.get(&record.id).cloned().unwrap_or_default();
            }
        }
        if options.preload_terms {
            let terms = self.load_terms(&raw).await?;
            for record in &mut records {
                record.terms = terms.get(&record.id).cloned().unwrap_or_default();
            }
        }

        Ok(records)
    }

    async fn ping(&self) -> Result<(), RepoError> {
        sqlx::query("SELECT 1")
            .execute(self.pool())
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }
}
