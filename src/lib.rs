//! Tavola caches and serves derived, paginated table views of named item
//! collections, with debounced background validation.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
