//! Anchor-aware pagination.
//!
//! Splits an ordered row sequence into linked, fixed-size pages. Page tokens
//! hash `{items, limit, index}`, so identical content yields identical tokens;
//! they are only ever resolved against their own table.

use std::num::NonZeroUsize;

use serde::Serialize;

use crate::domain::token::hash_token;
use crate::domain::types::{Page, Row};

#[derive(Serialize)]
struct PageTokenInput<'a> {
    items: &'a [Row],
    limit: usize,
    index: usize,
}

/// Chunk `rows` into pages of at most `limit` rows.
///
/// Without an anchor, chunks start at index 0 and only page 0 is active.
/// With an anchor matching the row at index `i`, the first chunk holds
/// `i % limit` rows (skipped when zero) so the anchor lands inside a
/// limit-aligned chunk, and that chunk is the active one. Exactly the active
/// page has `pending = false`; every page keeps its rows populated here — the
/// table view is responsible for stripping pending pages.
pub fn paginate(rows: Vec<Row>, limit: NonZeroUsize, anchor: Option<&str>) -> Vec<Page> {
    let limit = limit.get();
    let anchor_position = anchor.and_then(|id| rows.iter().position(|row| row.resource_id == id));
    let residuum = anchor_position.map_or(0, |position| position % limit);

    let mut chunks: Vec<Vec<Row>> = Vec::new();
    let mut iter = rows.into_iter();

    if residuum > 0 {
        chunks.push(iter.by_ref().take(residuum).collect());
    }
    loop {
        let chunk: Vec<Row> = iter.by_ref().take(limit).collect();
        if chunk.is_empty() {
            break;
        }
        chunks.push(chunk);
    }

    let active = match anchor_position {
        Some(position) if residuum > 0 => 1 + (position - residuum) / limit,
        Some(position) => position / limit,
        None => 0,
    };

    let tokens: Vec<String> = chunks
        .iter()
        .enumerate()
        .map(|(index, items)| {
            hash_token(&PageTokenInput {
                items,
                limit,
                index,
            })
        })
        .collect();

    chunks
        .into_iter()
        .enumerate()
        .map(|(index, items)| Page {
            page_token: tokens[index].clone(),
            previous_page_token: index.checked_sub(1).map(|i| tokens[i].clone()),
            next_page_token: tokens.get(index + 1).cloned(),
            items,
            pending: index != active,
        })
        .collect()
}
