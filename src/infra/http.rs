//! HTTP surface.
//!
//! A thin axum layer over the table service: build-or-get a table view,
//! fetch one page, patch one field, kick validation. Errors map to statuses
//! in `application::error`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, patch, post};
use axum::Router;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::application::error::AppError;
use crate::application::tables::{TableParams, TableService};
use crate::domain::types::{Item, Page, Table};

const SOURCE: &str = "infra::http";

#[derive(Clone)]
pub struct HttpState {
    pub tables: Arc<TableService>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/api/resource/table/{resource}", get(get_table))
        .route("/api/resource/table/rows/page/{token}", get(get_page))
        .route("/api/resource/item/{token}", patch(patch_item))
        .route("/api/resource/validate/{resource}", post(post_validate))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableRequestQuery {
    #[serde(default)]
    paths: String,
    limit: Option<usize>,
    resource_id: Option<String>,
    hash: Option<String>,
}

async fn get_table(
    State(state): State<HttpState>,
    Path(resource): Path<String>,
    Query(query): Query<TableRequestQuery>,
) -> Result<Json<Table>, AppError> {
    debug!(source = SOURCE, resource, "table requested");
    let params = TableParams {
        spec: query.paths,
        limit: query.limit,
        resource_id: query.resource_id,
        hash: query.hash,
    };
    let table = state.tables.build_or_get(&resource, params).await?;
    Ok(Json(table))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageRequestQuery {
    page_token: String,
}

async fn get_page(
    State(state): State<HttpState>,
    Path(token): Path<String>,
    Query(query): Query<PageRequestQuery>,
) -> Result<Json<Page>, AppError> {
    let page = state.tables.page(&token, &query.page_token).await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldMutationBody {
    path: String,
    resource_id: String,
    value: Value,
}

async fn patch_item(
    State(state): State<HttpState>,
    Path(token): Path<String>,
    Json(body): Json<FieldMutationBody>,
) -> Result<Json<Item>, AppError> {
    let item = state
        .tables
        .apply_field_mutation(&token, &body.path, &body.resource_id, body.value)
        .await?;
    Ok(Json(item))
}

async fn post_validate(
    State(state): State<HttpState>,
    Path(resource): Path<String>,
) -> StatusCode {
    state.tables.notify_validation(&resource);
    StatusCode::ACCEPTED
}
