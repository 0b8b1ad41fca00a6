//! Bounded, promotion-ordered table cache.
//!
//! Entries are keyed by their content token and kept in most-recently-used
//! order: `add` and `promote` move an entry to the head, and trimming drops
//! the least-recently-promoted tail. The cache is only ever touched from
//! inside a mutation-queue turn, so it needs no interior locking.

use metrics::counter;
use tracing::debug;

use crate::domain::error::DomainError;
use crate::domain::types::Table;

const SOURCE: &str = "cache::store";

/// An entry addressable by its content token.
pub trait Tokened {
    fn token(&self) -> &str;
}

impl Tokened for Table {
    fn token(&self) -> &str {
        &self.token
    }
}

pub struct PromotionCache<T: Tokened> {
    items: Vec<T>,
    limit: usize,
}

impl<T: Tokened> PromotionCache<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            items: Vec::new(),
            limit,
        }
    }

    /// Restore a snapshot, truncating to capacity. The seed is expected in
    /// most-recently-used order, so truncation drops the coldest entries.
    pub fn with_seed(limit: usize, mut seed: Vec<T>) -> Self {
        seed.truncate(limit);
        Self { items: seed, limit }
    }

    /// Insert at the head, then trim the tail beyond capacity. Fails with
    /// `DuplicateKey` when the token is already present, leaving the cache
    /// unchanged. Returns the entries evicted by trimming.
    pub fn add(&mut self, item: T) -> Result<Vec<T>, DomainError> {
        if self.contains(item.token()) {
            return Err(DomainError::duplicate_key(item.token()));
        }

        self.items.insert(0, item);

        let evicted: Vec<T> = if self.items.len() > self.limit {
            self.items.drain(self.limit..).collect()
        } else {
            Vec::new()
        };

        if !evicted.is_empty() {
            counter!("tavola_table_cache_evict_total").increment(evicted.len() as u64);
            debug!(source = SOURCE, evicted = evicted.len(), "cache trimmed to capacity");
        }

        Ok(evicted)
    }

    /// Look an entry up without reordering.
    pub fn get(&self, token: &str) -> Result<&T, DomainError> {
        self.items
            .iter()
            .find(|item| item.token() == token)
            .ok_or_else(|| DomainError::not_found("cache entry", token))
    }

    /// Move an existing entry to the head.
    pub fn promote(&mut self, token: &str) -> Result<&T, DomainError> {
        let entry = self.delete(token)?;
        self.items.insert(0, entry);
        Ok(&self.items[0])
    }

    /// Remove and return an entry.
    pub fn delete(&mut self, token: &str) -> Result<T, DomainError> {
        let position = self
            .items
            .iter()
            .position(|item| item.token() == token)
            .ok_or_else(|| DomainError::not_found("cache entry", token))?;
        Ok(self.items.remove(position))
    }

    /// No-op-safe removal for invalidation paths.
    pub fn invalidate(&mut self, token: &str) {
        let _ = self.delete(token);
    }

    pub fn contains(&self, token: &str) -> bool {
        self.items.iter().any(|item| item.token() == token)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Tokened + Clone> PromotionCache<T> {
    /// Defensive copy in most-recently-used order.
    pub fn list(&self) -> Vec<T> {
        self.items.clone()
    }
}
