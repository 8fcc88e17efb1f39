use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::application::feed::FeedError;
use crate::application::loader::LoaderError;
use crate::application::repos::RepoError;
use crate::config::LoadError;
use crate::infra::error::InfraError;

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            report,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<FeedError> for HttpError {
    fn from(error: FeedError) -> Self {
        const SOURCE: &str = "infra::http::feed_error_to_http_error";
        match error {
            FeedError::UnknownProfile(name) => HttpError::new(
                SOURCE,
                StatusCode::NOT_FOUND,
                "Unknown feed",
                format!("Feed profile `{name}` is not configured"),
            ),
            FeedError::LimitTooLarge { limit, max } => HttpError::new(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Requested limit is too large",
                format!("Limit {limit} exceeds the maximum of {max}"),
            ),
            FeedError::WindowOverflow { offset, limit } => HttpError::new(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Requested window is out of range",
                format!("Offset {offset} with limit {limit} is out of range"),
            ),
            FeedError::Loader(LoaderError::Repo(RepoError::Timeout)) => HttpError::new(
                SOURCE,
                StatusCode::SERVICE_UNAVAILABLE,
                "Service temporarily unavailable",
                "Content store timed out",
            ),
            err @ (FeedError::Registry(_) | FeedError::Transient(_) | FeedError::Loader(_)) => {
                HttpError::from_error(
                    SOURCE,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    &err,
                )
            }
        }
    }
}

/// Top-level failure of a pinfeed command.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Process exit status: 2 for unusable configuration, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_)
            | AppError::Infra(InfraError::Configuration { .. })
            | AppError::Feed(FeedError::Registry(_)) => 2,
            _ => 1,
        }
    }
}
