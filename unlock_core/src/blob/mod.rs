pub mod local;
pub mod memory;
pub mod s3;
pub mod traits;

pub use traits::{BlobStore, PutMode};

use crate::config::BlobConfig;
use crate::models::TenantId;
use crate::{Error, Result};
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Build the configured blob backend.
#[tracing::instrument(level = "info", skip(cfg))]
pub async fn from_config(cfg: &BlobConfig) -> Result<Arc<dyn BlobStore>> {
    match cfg {
        BlobConfig::S3(s3) => Ok(Arc::new(s3::S3BlobStore::new(s3).await?)),
        BlobConfig::Local { root_dir } => {
            Ok(Arc::new(local::LocalBlobStore::new(root_dir.clone()).await?))
        }
    }
}

/// Reject paths that could escape the tenant root.
#[tracing::instrument(level = "debug")]
pub fn validate_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(Error::InvalidInput("blob path is empty".to_string()));
    }
    if path.starts_with('/') {
        return Err(Error::InvalidInput(
            "blob path must not start with '/'".to_string(),
        ));
    }
    if path.contains('\\') {
        return Err(Error::InvalidInput(
            "blob path must not contain '\\\\'".to_string(),
        ));
    }
    if path.split('/').any(|seg| seg == "..") {
        return Err(Error::InvalidInput(
            "blob path must not contain '..' segments".to_string(),
        ));
    }
    Ok(())
}

/// Prefixes for `list` may be empty (the whole tenant) but are otherwise validated.
pub(crate) fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Ok(());
    }
    validate_path(prefix)
}

/// Serialize `value` as JSON and store it at `path`.
#[tracing::instrument(level = "debug", skip(store, value))]
pub async fn upload_json<T: Serialize + ?Sized>(
    store: &dyn BlobStore,
    tenant_id: TenantId,
    path: &str,
    value: &T,
    mode: PutMode,
) -> Result<()> {
    let body = serde_json::to_vec(value).map_err(|e| Error::backend("serialize blob json", e))?;
    store.put(tenant_id, path, Bytes::from(body), mode).await
}

/// Load and parse the JSON blob at `path`; a missing blob is `NotFound`.
#[tracing::instrument(level = "debug", skip(store))]
pub async fn download_json<T: DeserializeOwned>(
    store: &dyn BlobStore,
    tenant_id: TenantId,
    path: &str,
) -> Result<T> {
    let bytes = store
        .get(tenant_id, path)
        .await?
        .ok_or_else(|| Error::NotFound(format!("blob {path}")))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::backend(format!("parse blob json {path}"), e))
}

/// Convention paths: `{entity-plural}/{entityId}/{subtype}/{identifier}.json`.
pub mod paths {
    use uuid::Uuid;

    pub fn snapshot(experiment_id: Uuid, snapshot_id: Uuid) -> String {
        format!("experiments/{experiment_id}/snapshots/{snapshot_id}.json")
    }

    /// One path per attempt; the analysis row only points at the attempt that won its CAS.
    pub fn context(experiment_id: Uuid, analysis_id: Uuid, attempt_id: Uuid) -> String {
        format!("experiments/{experiment_id}/contexts/{analysis_id}-{attempt_id}.json")
    }

    pub fn verdict(experiment_id: Uuid, analysis_id: Uuid, attempt_id: Uuid) -> String {
        format!("experiments/{experiment_id}/verdicts/{analysis_id}-{attempt_id}.json")
    }

    pub fn outcome(experiment_id: Uuid, outcome_id: Uuid) -> String {
        format!("experiments/{experiment_id}/outcomes/{outcome_id}.json")
    }

    pub fn capture_bundle(capture_id: Uuid, bundle_id: Uuid) -> String {
        format!("captures/{capture_id}/bundles/{bundle_id}.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::memory::MemoryBlobStore;
    use uuid::Uuid;

    #[test]
    fn path_validation() {
        assert!(validate_path("experiments/a/snapshots/b.json").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("/abs").is_err());
        assert!(validate_path("a\\b").is_err());
        assert!(validate_path("a/../b").is_err());
        assert!(validate_path("a/..b/c").is_ok());
    }

    #[test]
    fn convention_paths() {
        let exp = Uuid::nil();
        let id = Uuid::from_u128(7);
        let attempt = Uuid::from_u128(9);
        assert_eq!(
            paths::context(exp, id, attempt),
            format!("experiments/{exp}/contexts/{id}-{attempt}.json")
        );
        assert_eq!(
            paths::capture_bundle(id, id),
            format!("captures/{id}/bundles/{id}.json")
        );
    }

    #[tokio::test]
    async fn local_config_builds_a_working_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = from_config(&BlobConfig::Local {
            root_dir: dir.path().to_path_buf(),
        })
        .await
        .unwrap();
        let tenant = TenantId::new();
        upload_json(store.as_ref(), tenant, "x/y.json", &1u32, PutMode::Create)
            .await
            .unwrap();
        assert!(store.exists(tenant, "x/y.json").await.unwrap());
    }

    #[tokio::test]
    async fn json_helpers_round_trip_and_report_missing() {
        let store = MemoryBlobStore::new();
        let tenant = TenantId::new();
        let doc = serde_json::json!({"html": "<p>hi</p>", "n": 3});

        upload_json(&store, tenant, "a/b.json", &doc, PutMode::Create)
            .await
            .unwrap();
        let back: serde_json::Value = download_json(&store, tenant, "a/b.json").await.unwrap();
        assert_eq!(back, doc);

        let err = download_json::<serde_json::Value>(&store, tenant, "a/missing.json")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
