//! Application services: the feed loader and the services built around it.

pub mod error;
pub mod feed;
pub mod loader;
pub mod registry;
pub mod repos;
