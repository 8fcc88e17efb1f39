//! Postgres-backed content store.

mod content;
mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;

use sqlx::{
    Postgres, QueryBuilder,
    postgres::{PgPool, PgPoolOptions},
};

use crate::domain::types::{PostStatus, TypeFilter};

const NATURAL_ORDER: &str = " ORDER BY c.published_at DESC NULLS LAST, c.id DESC";

#[derive(Clone)]
pub struct PostgresContentRepo {
    pool: Arc<PgPool>,
}

impl PostgresContentRepo {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    /// Listable rows only: matching status and never password protected.
    fn apply_visibility<'q>(qb: &mut QueryBuilder<'q, Postgres>, status: PostStatus) {
        qb.push(" AND c.status = ");
        qb.push_bind(status);
        qb.push(" AND NOT c.has_password ");
    }

    fn apply_type_filter<'q>(qb: &mut QueryBuilder<'q, Postgres>, types: &TypeFilter) {
        if let TypeFilter::Types(types) = types {
            qb.push(" AND c.post_type = ANY(");
            qb.push_bind(types.clone());
            qb.push(")");
        }
    }
}
