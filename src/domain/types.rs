//! Core table-view data model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One record of a named collection. The identifier is stable; every other
/// field is open JSON owned by the items provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Scalar kind a route can project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Boolean,
    Number,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Descriptor of one projectable leaf field of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub nullable: bool,
}

/// A route plus per-request presentation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub nullable: bool,
    pub include: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<SortOrder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// A route instantiated for one item. `value` is `Null` when the item has no
/// value at the route's path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    pub resource_id: String,
    pub value: Value,
}

/// One filtered/sorted table row. `index` is the row's position in the full
/// post-filter sequence, independent of pagination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub resource_id: String,
    pub fields: BTreeMap<String, Field>,
    pub index: usize,
}

/// One chunk of the row sequence. Pages form a doubly linked chain through
/// their neighbor tokens; `None` marks either end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub page_token: String,
    pub previous_page_token: Option<String>,
    pub next_page_token: Option<String>,
    pub items: Vec<Row>,
    pub pending: bool,
}

/// Anchor echo carried on a built table: the token of the page the caller
/// should fetch first, and the anchor id that selected it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableQuery {
    pub page_token: Option<String>,
    pub resource_id: Option<String>,
}

/// A fully built table view for one resource.
///
/// The cached instance keeps every page populated; [`Table::view`] derives the
/// caller-facing copy where only the active page carries items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub resource: String,
    pub token: String,
    pub columns: Vec<Column>,
    pub primary_paths: Vec<String>,
    pub secondary_paths: Vec<String>,
    pub pages: Vec<Page>,
    pub query: TableQuery,
    pub total_rows: usize,
}

impl Table {
    pub fn page(&self, page_token: &str) -> Option<&Page> {
        self.pages.iter().find(|page| page.page_token == page_token)
    }

    /// Materialize one page for delivery: items populated, no longer pending.
    pub fn fetch_page(&self, page_token: &str) -> Option<Page> {
        self.page(page_token).map(|page| Page {
            pending: false,
            ..page.clone()
        })
    }

    /// The caller-facing copy of this table: pending pages are stripped to
    /// their token chain so only the active page ships rows.
    pub fn view(&self) -> Table {
        let pages = self
            .pages
            .iter()
            .map(|page| {
                if page.pending {
                    Page {
                        items: Vec::new(),
                        ..page.clone()
                    }
                } else {
                    page.clone()
                }
            })
            .collect();

        Table {
            pages,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn item_round_trips_open_fields() {
        let item: Item =
            serde_json::from_value(json!({"id": "1", "age": 5, "address": {"city": "x"}}))
                .expect("valid item");

        assert_eq!(item.id, "1");
        assert_eq!(item.rest.get("age"), Some(&json!(5)));

        let back = serde_json::to_value(&item).expect("serializable item");
        assert_eq!(back, json!({"id": "1", "age": 5, "address": {"city": "x"}}));
    }

    #[test]
    fn view_strips_pending_pages_only() {
        let row = Row {
            resource_id: "1".to_string(),
            fields: BTreeMap::new(),
            index: 0,
        };
        let table = Table {
            resource: "users".to_string(),
            token: "t".to_string(),
            columns: Vec::new(),
            primary_paths: Vec::new(),
            secondary_paths: Vec::new(),
            pages: vec![
                Page {
                    page_token: "p0".to_string(),
                    previous_page_token: None,
                    next_page_token: Some("p1".to_string()),
                    items: vec![row.clone()],
                    pending: false,
                },
                Page {
                    page_token: "p1".to_string(),
                    previous_page_token: Some("p0".to_string()),
                    next_page_token: None,
                    items: vec![row],
                    pending: true,
                },
            ],
            query: TableQuery::default(),
            total_rows: 2,
        };

        let view = table.view();
        assert_eq!(view.pages[0].items.len(), 1);
        assert!(view.pages[1].items.is_empty());

        // The cached original still holds the pending page's rows.
        let fetched = table.fetch_page("p1").expect("page exists");
        assert_eq!(fetched.items.len(), 1);
        assert!(!fetched.pending);
    }
}
