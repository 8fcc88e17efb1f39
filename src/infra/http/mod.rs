//! JSON HTTP surface over the feed service.

mod feed;
mod middleware;

pub use feed::{HttpState, build_router};
pub use middleware::REQUEST_ID_HEADER;
