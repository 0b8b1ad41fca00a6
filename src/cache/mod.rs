//! Tavola cache system.
//!
//! A single bounded, promotion-ordered store of built tables keyed by content
//! token. Capacity comes from `[cache] table_limit` in `tavola.toml`.

mod store;

pub use store::{PromotionCache, Tokened};
