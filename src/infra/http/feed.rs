use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};

use crate::application::error::{ErrorReport, HttpError};
use crate::application::feed::FeedService;
use crate::application::loader::FeedPage;

use super::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub feed: Arc<FeedService>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/feeds", get(list_feeds))
        .route("/feeds/{profile}", get(feed_page))
        .route("/health", get(health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PageQuery {
    offset: Option<usize>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct FeedList {
    profiles: Vec<String>,
}

async fn list_feeds(State(state): State<HttpState>) -> Json<FeedList> {
    Json(FeedList {
        profiles: state.feed.catalog().names().map(str::to_string).collect(),
    })
}

async fn feed_page(
    State(state): State<HttpState>,
    Path(profile): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<FeedPage>, HttpError> {
    let page = state
        .feed
        .page(&profile, query.offset.unwrap_or(0), query.limit)
        .await?;
    Ok(Json(page))
}

/// 204 while the content store answers, 503 otherwise.
async fn health(State(state): State<HttpState>) -> Response {
    match state.feed.ping().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}
