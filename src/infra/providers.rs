//! Items and routes providers.
//!
//! The table service consumes these traits; the JSON file store is the
//! shipped implementation, holding one `{name}.json` per resource under
//! `items/` and `routes/` in the data directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::domain::types::{Item, Route};
use crate::infra::error::InfraError;

const SOURCE: &str = "infra::providers";

#[async_trait]
pub trait ItemsProvider: Send + Sync {
    async fn load_items(&self, resource: &str) -> Result<Vec<Item>, InfraError>;
    async fn save_items(&self, resource: &str, items: &[Item]) -> Result<(), InfraError>;
}

#[async_trait]
pub trait RoutesProvider: Send + Sync {
    async fn load_routes(&self, resource: &str) -> Result<Vec<Route>, InfraError>;
}

pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resource_path(&self, kind: &str, resource: &str) -> Result<PathBuf, InfraError> {
        // Resource names become file names; confine them to a safe alphabet.
        if resource.is_empty()
            || !resource
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(InfraError::provider(format!(
                "resource name `{resource}` is not addressable"
            )));
        }
        Ok(self.root.join(kind).join(format!("{resource}.json")))
    }
}

#[async_trait]
impl ItemsProvider for JsonFileStore {
    async fn load_items(&self, resource: &str) -> Result<Vec<Item>, InfraError> {
        let path = self.resource_path("items", resource)?;
        let bytes = fs::read(&path).await?;
        serde_json::from_slice(&bytes).map_err(|err| {
            InfraError::serialization(format!("items for `{resource}` unreadable: {err}"))
        })
    }

    async fn save_items(&self, resource: &str, items: &[Item]) -> Result<(), InfraError> {
        let path = self.resource_path("items", resource)?;
        let bytes = serde_json::to_vec_pretty(items).map_err(|err| {
            InfraError::serialization(format!("items for `{resource}` unwritable: {err}"))
        })?;
        fs::write(&path, bytes).await?;
        debug!(source = SOURCE, resource, count = items.len(), "items persisted");
        Ok(())
    }
}

#[async_trait]
impl RoutesProvider for JsonFileStore {
    async fn load_routes(&self, resource: &str) -> Result<Vec<Route>, InfraError> {
        let path = self.resource_path("routes", resource)?;
        let bytes = fs::read(&path).await?;
        serde_json::from_slice(&bytes).map_err(|err| {
            InfraError::serialization(format!("routes for `{resource}` unreadable: {err}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    async fn seeded_store() -> (tempfile::TempDir, JsonFileStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("items")).await.expect("items dir");
        fs::create_dir_all(dir.path().join("routes")).await.expect("routes dir");
        fs::write(
            dir.path().join("items/users.json"),
            serde_json::to_vec(&json!([{"id": "1", "age": 5}])).unwrap(),
        )
        .await
        .expect("seed items");
        fs::write(
            dir.path().join("routes/users.json"),
            serde_json::to_vec(&json!([{"path": "age", "type": "number"}])).unwrap(),
        )
        .await
        .expect("seed routes");

        let store = JsonFileStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn items_round_trip_on_disk() {
        let (_dir, store) = seeded_store().await;

        let mut items = store.load_items("users").await.expect("loaded");
        assert_eq!(items.len(), 1);

        items[0].rest.insert("age".to_string(), json!(6));
        store.save_items("users", &items).await.expect("saved");

        let reloaded = store.load_items("users").await.expect("reloaded");
        assert_eq!(reloaded[0].rest.get("age"), Some(&json!(6)));
    }

    #[tokio::test]
    async fn routes_deserialize_with_defaults() {
        let (_dir, store) = seeded_store().await;

        let routes = store.load_routes("users").await.expect("loaded");
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].path, "age");
        assert!(!routes[0].nullable);
    }

    #[tokio::test]
    async fn hostile_resource_names_are_rejected() {
        let (_dir, store) = seeded_store().await;

        for name in ["../users", "a/b", "", "users.json"] {
            let err = store.load_items(name).await.expect_err("rejected");
            assert!(matches!(err, InfraError::Provider { .. }), "{name}");
        }
    }

    #[tokio::test]
    async fn missing_resources_surface_io_errors() {
        let (_dir, store) = seeded_store().await;

        let err = store.load_items("ghosts").await.expect_err("missing");
        assert!(matches!(err, InfraError::Io(_)));
    }
}
