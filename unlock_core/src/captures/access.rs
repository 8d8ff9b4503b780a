use crate::blob::{self, BlobStore, PutMode, paths};
use crate::captures::models::{
    Capture, CaptureFields, CaptureStatus, DriftSignal, EnvironmentDrift, ObservationBundle,
};
use crate::lifecycle::models::{Resource, ResourceQuery, SortOrder};
use crate::lifecycle::store::LifecycleStore;
use crate::lifecycle::traits::ResourceDb;
use crate::models::TenantId;
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Archive of observation bundles and their extraction lifecycle.
///
/// The bundle blob is written before the row; a failed upload never produces a row.
#[derive(Clone)]
pub struct CaptureAccess {
    store: LifecycleStore<Capture>,
    blobs: Arc<dyn BlobStore>,
}

impl CaptureAccess {
    pub fn new(db: Arc<dyn ResourceDb>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            store: LifecycleStore::new(db),
            blobs,
        }
    }

    pub fn store(&self) -> &LifecycleStore<Capture> {
        &self.store
    }

    fn validate_bundle(bundle: &ObservationBundle) -> Result<()> {
        if bundle.session_id.trim().is_empty() {
            return Err(Error::InvalidInput("capture session_id is empty".to_string()));
        }
        if bundle.url.trim().is_empty() {
            return Err(Error::InvalidInput("capture url is empty".to_string()));
        }
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self, bundle), fields(source_id = %bundle.source_id))]
    pub async fn preserve_capture(
        &self,
        tenant_id: TenantId,
        bundle: ObservationBundle,
    ) -> Result<Uuid> {
        Self::validate_bundle(&bundle)?;
        let capture_id = Uuid::new_v4();
        let bundle_path = paths::capture_bundle(capture_id, capture_id);

        blob::upload_json(
            self.blobs.as_ref(),
            tenant_id,
            &bundle_path,
            &bundle,
            PutMode::Create,
        )
        .await?;

        let fields = CaptureFields {
            source_id: bundle.source_id,
            session_id: bundle.session_id.clone(),
            url: bundle.url.clone(),
            content_hash: bundle.content_hash(),
            bundle_path: bundle_path.clone(),
            captured_at: bundle.captured_at,
            extracted_at: None,
        };
        let result = self
            .store
            .create_with_id(
                tenant_id,
                capture_id,
                CaptureStatus::Preserved,
                fields,
                bundle.metadata.clone(),
            )
            .await;
        if result.is_err() {
            tracing::warn!(%capture_id, %bundle_path, "capture row insert failed; bundle blob is orphaned");
        }
        result
    }

    /// Replace the bundle of an existing capture. The new bundle goes to a fresh path and
    /// the row is switched over under CAS; a losing writer leaves only an unreferenced blob.
    #[tracing::instrument(level = "info", skip(self, bundle))]
    pub async fn represerve_capture(
        &self,
        tenant_id: TenantId,
        capture_id: Uuid,
        bundle: ObservationBundle,
    ) -> Result<Resource<Capture>> {
        Self::validate_bundle(&bundle)?;
        let current = self.store.find(tenant_id, capture_id).await?;
        if current.status == CaptureStatus::Expired {
            return Err(Error::invalid_transition("capture", "expired", "preserved"));
        }
        if current.fields.source_id != bundle.source_id {
            return Err(Error::InvalidInput(format!(
                "capture {capture_id} belongs to source {}",
                current.fields.source_id
            )));
        }

        let bundle_path = paths::capture_bundle(capture_id, Uuid::new_v4());
        blob::upload_json(
            self.blobs.as_ref(),
            tenant_id,
            &bundle_path,
            &bundle,
            PutMode::Create,
        )
        .await?;

        let content_hash = bundle.content_hash();
        let result = self
            .store
            .update_at_version(tenant_id, capture_id, current.version, |r| {
                r.fields.bundle_path = bundle_path.clone();
                r.fields.content_hash = content_hash;
                r.fields.session_id = bundle.session_id;
                r.fields.url = bundle.url;
                r.fields.captured_at = bundle.captured_at;
                r.metadata = bundle.metadata;
                Ok(())
            })
            .await;
        if result.is_err() {
            tracing::warn!(%capture_id, %bundle_path, "capture row update failed; bundle blob is orphaned");
        }
        result
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn recall_capture(
        &self,
        tenant_id: TenantId,
        capture_id: Uuid,
    ) -> Result<ObservationBundle> {
        let capture = self.store.find(tenant_id, capture_id).await?;
        blob::download_json(self.blobs.as_ref(), tenant_id, &capture.fields.bundle_path).await
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn confirm_extraction(&self, tenant_id: TenantId, capture_id: Uuid) -> Result<()> {
        self.store
            .transition_with(tenant_id, capture_id, CaptureStatus::Extracted, |r| {
                r.fields.extracted_at = Some(Utc::now());
                Ok(())
            })
            .await?;
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn expire_capture(&self, tenant_id: TenantId, capture_id: Uuid) -> Result<()> {
        self.store
            .transition(tenant_id, capture_id, CaptureStatus::Expired)
            .await?;
        Ok(())
    }

    /// Compare the two most recent captures of `source_id`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn detect_environment_drift(
        &self,
        tenant_id: TenantId,
        source_id: Uuid,
    ) -> Result<EnvironmentDrift> {
        let query = ResourceQuery {
            parent_id: Some(source_id),
            order: SortOrder::Desc,
            limit: 2,
            ..ResourceQuery::default()
        };
        let recent = self.store.list(tenant_id, &query).await?;

        let (latest, previous) = match recent.as_slice() {
            [latest, previous, ..] => (latest, previous),
            [latest] => {
                return Ok(EnvironmentDrift {
                    has_drifted: false,
                    latest_capture_id: Some(latest.id),
                    previous_capture_id: None,
                    drift_signals: Vec::new(),
                });
            }
            [] => {
                return Ok(EnvironmentDrift {
                    has_drifted: false,
                    latest_capture_id: None,
                    previous_capture_id: None,
                    drift_signals: Vec::new(),
                });
            }
        };

        let mut signals = Vec::new();
        if latest.fields.content_hash != previous.fields.content_hash {
            signals.push(DriftSignal::ContentHashChanged);
        }
        if latest.fields.url != previous.fields.url {
            signals.push(DriftSignal::UrlChanged);
        }
        if !signals.is_empty() {
            tracing::info!(%source_id, ?signals, "environment drift detected");
        }
        Ok(EnvironmentDrift {
            has_drifted: !signals.is_empty(),
            latest_capture_id: Some(latest.id),
            previous_capture_id: Some(previous.id),
            drift_signals: signals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::memory::MemoryBlobStore;
    use crate::lifecycle::memory::MemoryResourceDb;
    use crate::models::Metadata;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{DateTime, Duration};
    use tokio::sync::Mutex;

    /// Moves the capture to `extracted` right before the next upload lands.
    struct RacingBlobStore {
        inner: MemoryBlobStore,
        race: Mutex<Option<(LifecycleStore<Capture>, TenantId, Uuid)>>,
    }

    #[async_trait]
    impl BlobStore for RacingBlobStore {
        async fn put(
            &self,
            tenant_id: TenantId,
            path: &str,
            data: Bytes,
            mode: PutMode,
        ) -> Result<()> {
            if let Some((store, tenant, id)) = self.race.lock().await.take() {
                store.transition(tenant, id, CaptureStatus::Extracted).await?;
            }
            self.inner.put(tenant_id, path, data, mode).await
        }

        async fn get(&self, tenant_id: TenantId, path: &str) -> Result<Option<Bytes>> {
            self.inner.get(tenant_id, path).await
        }

        async fn exists(&self, tenant_id: TenantId, path: &str) -> Result<bool> {
            self.inner.exists(tenant_id, path).await
        }

        async fn list(&self, tenant_id: TenantId, prefix: &str) -> Result<Vec<String>> {
            self.inner.list(tenant_id, prefix).await
        }
    }

    fn access() -> (CaptureAccess, MemoryBlobStore) {
        let blobs = MemoryBlobStore::new();
        (
            CaptureAccess::new(Arc::new(MemoryResourceDb::new()), Arc::new(blobs.clone())),
            blobs,
        )
    }

    fn bundle(source_id: Uuid, html: &str, captured_at: DateTime<Utc>) -> ObservationBundle {
        ObservationBundle {
            source_id,
            session_id: "sess-1".to_string(),
            url: "https://venue.example/calendar".to_string(),
            html: Some(html.to_string()),
            screenshot_url: None,
            network_log_url: None,
            video_url: None,
            metadata: Metadata::new(),
            captured_at,
        }
    }

    #[tokio::test]
    async fn preserve_then_recall_is_byte_identical() {
        let (access, blobs) = access();
        let tenant = TenantId::new();
        let original = bundle(Uuid::new_v4(), "<html>lineup</html>", Utc::now());

        let id = access.preserve_capture(tenant, original.clone()).await.unwrap();
        let capture = access.store().find(tenant, id).await.unwrap();
        assert_eq!(capture.status, CaptureStatus::Preserved);
        assert_eq!(capture.fields.bundle_path, paths::capture_bundle(id, id));
        assert_eq!(capture.fields.content_hash, original.content_hash());
        assert!(blobs.exists(tenant, &paths::capture_bundle(id, id)).await.unwrap());

        let recalled = access.recall_capture(tenant, id).await.unwrap();
        assert_eq!(recalled, original);

        let err = access.recall_capture(TenantId::new(), id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn represerve_switches_bundle_and_bumps_version() {
        let (access, blobs) = access();
        let tenant = TenantId::new();
        let source = Uuid::new_v4();
        let id = access
            .preserve_capture(tenant, bundle(source, "v1", Utc::now()))
            .await
            .unwrap();

        let updated = bundle(source, "v2", Utc::now());
        let capture = access
            .represerve_capture(tenant, id, updated.clone())
            .await
            .unwrap();
        assert_eq!(capture.version, 2);
        assert_ne!(capture.fields.bundle_path, paths::capture_bundle(id, id));
        assert!(capture
            .fields
            .bundle_path
            .starts_with(&format!("captures/{id}/bundles/")));
        assert_eq!(capture.fields.content_hash, updated.content_hash());
        assert_eq!(blobs.len().await, 2);
        assert_eq!(access.recall_capture(tenant, id).await.unwrap(), updated);

        let err = access
            .represerve_capture(tenant, id, bundle(Uuid::new_v4(), "v3", Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn represerve_losing_cas_leaves_row_and_bundle_consistent() {
        let inner = MemoryBlobStore::new();
        let blobs = Arc::new(RacingBlobStore {
            inner: inner.clone(),
            race: Mutex::new(None),
        });
        let access = CaptureAccess::new(Arc::new(MemoryResourceDb::new()), blobs.clone());
        let tenant = TenantId::new();
        let source = Uuid::new_v4();
        let first = bundle(source, "v1", Utc::now());
        let id = access.preserve_capture(tenant, first.clone()).await.unwrap();

        *blobs.race.lock().await = Some((access.store().clone(), tenant, id));
        let err = access
            .represerve_capture(tenant, id, bundle(source, "v2", Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConcurrencyConflict { .. }));

        let capture = access.store().find(tenant, id).await.unwrap();
        assert_eq!(capture.status, CaptureStatus::Extracted);
        assert_eq!(capture.fields.bundle_path, paths::capture_bundle(id, id));
        assert_eq!(capture.fields.content_hash, first.content_hash());
        let recalled = access.recall_capture(tenant, id).await.unwrap();
        assert_eq!(recalled, first);
        assert_eq!(recalled.content_hash(), capture.fields.content_hash);
        // the losing upload stays behind, unreferenced
        assert_eq!(inner.len().await, 2);
    }

    #[tokio::test]
    async fn extraction_and_expiry_lifecycle() {
        let (access, _) = access();
        let tenant = TenantId::new();
        let id = access
            .preserve_capture(tenant, bundle(Uuid::new_v4(), "x", Utc::now()))
            .await
            .unwrap();

        access.confirm_extraction(tenant, id).await.unwrap();
        access.confirm_extraction(tenant, id).await.unwrap();
        let capture = access.store().find(tenant, id).await.unwrap();
        assert_eq!(capture.status, CaptureStatus::Extracted);
        assert!(capture.fields.extracted_at.is_some());
        assert_eq!(capture.version, 2);

        access.expire_capture(tenant, id).await.unwrap();
        assert!(matches!(
            access.confirm_extraction(tenant, id).await.unwrap_err(),
            Error::InvalidTransition { .. }
        ));
        assert!(matches!(
            access
                .represerve_capture(tenant, id, bundle(capture.fields.source_id, "y", Utc::now()))
                .await
                .unwrap_err(),
            Error::InvalidTransition { .. }
        ));
    }

    #[tokio::test]
    async fn drift_compares_two_latest_captures() {
        let (access, _) = access();
        let tenant = TenantId::new();
        let source = Uuid::new_v4();
        let t0 = Utc::now() - Duration::hours(3);

        let none = access.detect_environment_drift(tenant, source).await.unwrap();
        assert!(!none.has_drifted);
        assert_eq!(none.latest_capture_id, None);

        let first = access
            .preserve_capture(tenant, bundle(source, "same", t0))
            .await
            .unwrap();
        let single = access.detect_environment_drift(tenant, source).await.unwrap();
        assert_eq!(single.latest_capture_id, Some(first));
        assert!(!single.has_drifted);

        let second = access
            .preserve_capture(tenant, bundle(source, "same", t0 + Duration::hours(1)))
            .await
            .unwrap();
        let stable = access.detect_environment_drift(tenant, source).await.unwrap();
        assert!(!stable.has_drifted);
        assert_eq!(stable.latest_capture_id, Some(second));
        assert_eq!(stable.previous_capture_id, Some(first));

        let mut moved = bundle(source, "changed", t0 + Duration::hours(2));
        moved.url = "https://venue.example/new-calendar".to_string();
        let third = access.preserve_capture(tenant, moved).await.unwrap();
        let drift = access.detect_environment_drift(tenant, source).await.unwrap();
        assert!(drift.has_drifted);
        assert_eq!(drift.latest_capture_id, Some(third));
        assert_eq!(drift.previous_capture_id, Some(second));
        assert_eq!(
            drift.drift_signals,
            vec![DriftSignal::ContentHashChanged, DriftSignal::UrlChanged]
        );

        // Other sources are not mixed in.
        let other = access
            .detect_environment_drift(tenant, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(other.latest_capture_id, None);
    }
}
