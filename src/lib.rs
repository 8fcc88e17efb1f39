//! Sticky-aware, type-partitioned feed pagination.
//!
//! The core is [`application::loader::PostsLoader`]; everything else wires
//! it to a content store, a plan cache, configuration and an HTTP surface.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
