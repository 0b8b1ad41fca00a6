//! Deterministic table building.
//!
//! Turns an ordered item collection plus its route set and a column-spec
//! string into a filtered, sorted, paginated table with a content token.
//! Building is pure: identical inputs always produce an identical table.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use serde::Serialize;
use serde_json::Value;

use crate::application::paginate::paginate;
use crate::domain::error::DomainError;
use crate::domain::paths::ResolvedPath;
use crate::domain::token::hash_token;
use crate::domain::types::{
    Column, Field, Item, Route, Row, SortOrder, Table, TableQuery,
};

/// Inputs of one table build.
#[derive(Debug, Clone)]
pub struct TableRequest<'a> {
    pub resource: &'a str,
    /// Comma-separated `path:sortIndex:order:filter` segments.
    pub spec: &'a str,
    pub limit: NonZeroUsize,
    /// Anchor: the row to make immediately visible.
    pub resource_id: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
struct SpecSegment {
    path: String,
    sort_index: Option<u32>,
    order: Option<SortOrder>,
    filter: Option<String>,
}

/// Parse the column-spec string. Segments are comma-separated; each one is
/// `path:sortIndex:order:filter` where sortIndex is empty or an integer and
/// order is empty, `asc`, or `desc`. The filter tail may itself contain `:`.
fn parse_spec(spec: &str) -> Result<Vec<SpecSegment>, DomainError> {
    if spec.is_empty() {
        return Ok(Vec::new());
    }

    spec.split(',').map(parse_segment).collect()
}

fn parse_segment(segment: &str) -> Result<SpecSegment, DomainError> {
    let parts: Vec<&str> = segment.splitn(4, ':').collect();
    let [path, sort_index, order, filter] = parts.as_slice() else {
        return Err(DomainError::invalid_query(
            segment,
            "expected `path:sortIndex:order:filter`",
        ));
    };

    let sort_index = match *sort_index {
        "" => None,
        raw => Some(raw.parse::<u32>().map_err(|_| {
            DomainError::invalid_query(segment, "sort index must be an integer")
        })?),
    };

    let order = match *order {
        "" => None,
        "asc" => Some(SortOrder::Asc),
        "desc" => Some(SortOrder::Desc),
        _ => {
            return Err(DomainError::invalid_query(
                segment,
                "order must be `asc`, `desc`, or empty",
            ));
        }
    };

    let filter = (!filter.is_empty()).then(|| (*filter).to_string());

    Ok(SpecSegment {
        path: (*path).to_string(),
        sort_index,
        order,
        filter,
    })
}

/// Merge parsed spec segments onto the route set. Unrequested paths default
/// to excluded; a requested path with no order defaults to ascending.
fn merge_columns(routes: &[Route], segments: &[SpecSegment]) -> Vec<Column> {
    routes
        .iter()
        .map(|route| {
            let segment = segments.iter().find(|segment| segment.path == route.path);
            Column {
                path: route.path.clone(),
                kind: route.kind,
                nullable: route.nullable,
                include: segment.is_some(),
                sort_index: segment.and_then(|s| s.sort_index),
                order: segment.and_then(|s| s.order),
                filter: segment.and_then(|s| s.filter.clone()),
            }
        })
        .collect()
}

/// Declared token input; field order here is the canonical hashing order.
#[derive(Serialize)]
struct TableTokenInput<'a> {
    resource: &'a str,
    items: &'a [Item],
    routes: &'a [Route],
    columns: &'a [Column],
    limit: usize,
    resource_id: Option<&'a str>,
}

fn table_token(
    items: &[Item],
    routes: &[Route],
    columns: &[Column],
    request: &TableRequest<'_>,
) -> String {
    hash_token(&TableTokenInput {
        resource: request.resource,
        items,
        routes,
        columns,
        limit: request.limit.get(),
        resource_id: request.resource_id,
    })
}

/// Compute the token a build of these inputs would carry, without building.
/// Lets the cache answer hits before any row work happens.
pub fn probe_token(
    items: &[Item],
    routes: &[Route],
    request: &TableRequest<'_>,
) -> Result<String, DomainError> {
    let segments = parse_spec(request.spec)?;
    let columns = merge_columns(routes, &segments);
    Ok(table_token(items, routes, &columns, request))
}

/// Build the full table for a request.
pub fn build_table(
    items: &[Item],
    routes: &[Route],
    request: &TableRequest<'_>,
) -> Result<Table, DomainError> {
    let segments = parse_spec(request.spec)?;
    let columns = merge_columns(routes, &segments);
    let token = table_token(items, routes, &columns, request);

    let included: Vec<(&Column, ResolvedPath)> = columns
        .iter()
        .filter(|column| column.include)
        .map(|column| (column, ResolvedPath::parse(&column.path)))
        .collect();

    let mut rows: Vec<Row> = items
        .iter()
        .map(|item| {
            let fields: BTreeMap<String, Field> = included
                .iter()
                .map(|(column, path)| {
                    let value = path.lookup(item).unwrap_or(Value::Null);
                    (
                        column.path.clone(),
                        Field {
                            path: column.path.clone(),
                            kind: column.kind,
                            resource_id: item.id.clone(),
                            value,
                        },
                    )
                })
                .collect();
            Row {
                resource_id: item.id.clone(),
                fields,
                index: 0,
            }
        })
        .filter(|row| row_survives(row, &columns))
        .collect();

    let mut sorted_columns: Vec<&Column> = columns
        .iter()
        .filter(|column| column.include && column.sort_index.is_some())
        .collect();
    sorted_columns.sort_by_key(|column| column.sort_index);

    // Stable sort: ties keep original item order.
    rows.sort_by(|a, b| compare_rows(a, b, &sorted_columns));
    for (index, row) in rows.iter_mut().enumerate() {
        row.index = index;
    }

    let total_rows = rows.len();
    let pages = paginate(rows, request.limit, request.resource_id);
    let page_token = pages
        .iter()
        .find(|page| !page.pending)
        .map(|page| page.page_token.clone());

    let primary_paths = sorted_columns
        .iter()
        .map(|column| column.path.clone())
        .collect();
    let secondary_paths = columns
        .iter()
        .filter(|column| column.include && column.sort_index.is_none())
        .map(|column| column.path.clone())
        .collect();

    Ok(Table {
        resource: request.resource.to_string(),
        token,
        columns,
        primary_paths,
        secondary_paths,
        pages,
        query: TableQuery {
            page_token,
            resource_id: request.resource_id.map(str::to_string),
        },
        total_rows,
    })
}

/// A row survives iff every included column with a non-empty filter matches
/// the field's text rendering case-insensitively. Absent values render empty.
fn row_survives(row: &Row, columns: &[Column]) -> bool {
    columns
        .iter()
        .filter(|column| column.include)
        .filter_map(|column| column.filter.as_deref().map(|filter| (column, filter)))
        .all(|(column, filter)| {
            let text = row
                .fields
                .get(&column.path)
                .map(|field| render_text(&field.value))
                .unwrap_or_default();
            text.to_lowercase().contains(&filter.to_lowercase())
        })
}

fn render_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn compare_rows(a: &Row, b: &Row, sorted_columns: &[&Column]) -> Ordering {
    for column in sorted_columns {
        let left = a.fields.get(&column.path).map(|field| &field.value);
        let right = b.fields.get(&column.path).map(|field| &field.value);
        let ordering = compare_values(
            left.unwrap_or(&Value::Null),
            right.unwrap_or(&Value::Null),
        );
        let ordering = match column.order.unwrap_or(SortOrder::Asc) {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Total order over field values: null < boolean < number < string, with
/// structured values last by their JSON rendering.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            _ => 4,
        }
    }

    match (a, b) {
        (Value::Bool(left), Value::Bool(right)) => left.cmp(right),
        (Value::Number(left), Value::Number(right)) => {
            let left = left.as_f64().unwrap_or(f64::NAN);
            let right = right.as_f64().unwrap_or(f64::NAN);
            left.partial_cmp(&right).unwrap_or(Ordering::Equal)
        }
        (Value::String(left), Value::String(right)) => left.cmp(right),
        _ if rank(a) != rank(b) => rank(a).cmp(&rank(b)),
        _ => a.to_string().cmp(&b.to_string()),
    }
}
