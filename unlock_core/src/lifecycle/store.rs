use crate::lifecycle::models::{LifecycleStatus, Resource, ResourceKind, ResourceQuery};
use crate::lifecycle::traits::ResourceDb;
use crate::models::{Metadata, TenantId};
use crate::{Error, Result};
use chrono::Utc;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

/// Tenant-scoped, version-checked store for one `ResourceKind`.
///
/// Every mutating operation reads the current row, validates the change in process,
/// then issues a single compare-and-swap. A CAS that matches zero rows surfaces as
/// `Error::ConcurrencyConflict`; the store never retries.
pub struct LifecycleStore<K: ResourceKind> {
    db: Arc<dyn ResourceDb>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ResourceKind> Clone for LifecycleStore<K> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: ResourceKind> LifecycleStore<K> {
    pub fn new(db: Arc<dyn ResourceDb>) -> Self {
        Self {
            db,
            _kind: PhantomData,
        }
    }

    fn not_found(id: Uuid) -> Error {
        Error::NotFound(format!("{} {id}", K::KIND))
    }

    pub async fn create(
        &self,
        tenant_id: TenantId,
        status: K::Status,
        fields: K::Fields,
        metadata: Metadata,
    ) -> Result<Uuid> {
        self.create_with_id(tenant_id, Uuid::new_v4(), status, fields, metadata)
            .await
    }

    /// Insert at version 1 under an id allocated in this crate (e.g. one already baked
    /// into a blob path). Ids are never taken from callers, so a collision says nothing
    /// about other tenants.
    #[tracing::instrument(level = "debug", skip(self, fields, metadata), fields(kind = K::KIND))]
    pub(crate) async fn create_with_id(
        &self,
        tenant_id: TenantId,
        id: Uuid,
        status: K::Status,
        fields: K::Fields,
        metadata: Metadata,
    ) -> Result<Uuid> {
        let now = Utc::now();
        let resource = Resource::<K> {
            id,
            tenant_id,
            version: 1,
            status,
            fields,
            metadata,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.db.insert(&resource.to_row()?).await?;
        tracing::debug!(kind = K::KIND, id = %resource.id, status = status.as_str(), "resource created");
        Ok(resource.id)
    }

    #[tracing::instrument(level = "debug", skip(self), fields(kind = K::KIND))]
    pub async fn find(&self, tenant_id: TenantId, id: Uuid) -> Result<Resource<K>> {
        let row = self
            .db
            .find(K::KIND, tenant_id, id)
            .await?
            .ok_or_else(|| Self::not_found(id))?;
        Resource::from_row(row)
    }

    #[tracing::instrument(level = "debug", skip(self), fields(kind = K::KIND))]
    pub async fn try_find(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<Resource<K>>> {
        match self.db.find(K::KIND, tenant_id, id).await? {
            Some(row) => Ok(Some(Resource::from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Move to `target`. Same-status requests succeed without writing.
    #[tracing::instrument(level = "debug", skip(self), fields(kind = K::KIND))]
    pub async fn transition(
        &self,
        tenant_id: TenantId,
        id: Uuid,
        target: K::Status,
    ) -> Result<Resource<K>> {
        self.transition_with(tenant_id, id, target, |_| Ok(())).await
    }

    /// Like `transition`, but the same CAS also writes whatever `mutate` changes.
    ///
    /// `mutate` only runs for a legal, non-idempotent transition.
    #[tracing::instrument(level = "debug", skip(self, mutate), fields(kind = K::KIND))]
    pub async fn transition_with<F>(
        &self,
        tenant_id: TenantId,
        id: Uuid,
        target: K::Status,
        mutate: F,
    ) -> Result<Resource<K>>
    where
        F: FnOnce(&mut Resource<K>) -> Result<()> + Send,
    {
        let current = self.find(tenant_id, id).await?;
        if current.status == target {
            tracing::debug!(kind = K::KIND, %id, status = target.as_str(), "transition is a no-op");
            return Ok(current);
        }
        if !current.status.can_transition_to(target) {
            return Err(Error::invalid_transition(
                K::KIND,
                current.status.as_str(),
                target.as_str(),
            ));
        }

        let from = current.status;
        let mut next = current;
        mutate(&mut next)?;
        next.status = target;
        let next = self.swap(next.version, next).await?;
        tracing::info!(
            kind = K::KIND,
            %id,
            from = from.as_str(),
            to = target.as_str(),
            version = next.version,
            "resource transitioned"
        );
        Ok(next)
    }

    /// CAS write of fields/metadata against the freshly observed version.
    #[tracing::instrument(level = "debug", skip(self, mutate), fields(kind = K::KIND))]
    pub async fn update<F>(&self, tenant_id: TenantId, id: Uuid, mutate: F) -> Result<Resource<K>>
    where
        F: FnOnce(&mut Resource<K>) -> Result<()> + Send,
    {
        let current = self.find(tenant_id, id).await?;
        let expected = current.version;
        self.apply(current, expected, mutate).await
    }

    /// CAS write against a caller-supplied version.
    #[tracing::instrument(level = "debug", skip(self, mutate), fields(kind = K::KIND))]
    pub async fn update_at_version<F>(
        &self,
        tenant_id: TenantId,
        id: Uuid,
        expected_version: i64,
        mutate: F,
    ) -> Result<Resource<K>>
    where
        F: FnOnce(&mut Resource<K>) -> Result<()> + Send,
    {
        let current = self.find(tenant_id, id).await?;
        if current.version != expected_version {
            tracing::warn!(
                kind = K::KIND,
                %id,
                expected_version,
                actual_version = current.version,
                "stale version on update"
            );
            return Err(Error::conflict_at(K::KIND, id, expected_version));
        }
        self.apply(current, expected_version, mutate).await
    }

    #[tracing::instrument(level = "debug", skip(self), fields(kind = K::KIND))]
    pub async fn soft_delete(
        &self,
        tenant_id: TenantId,
        id: Uuid,
        expected_version: i64,
    ) -> Result<()> {
        if self.db.find(K::KIND, tenant_id, id).await?.is_none() {
            return Err(Self::not_found(id));
        }
        let affected = self
            .db
            .soft_delete(K::KIND, tenant_id, id, expected_version, Utc::now())
            .await?;
        if affected == 0 {
            return Err(Error::conflict_at(K::KIND, id, expected_version));
        }
        tracing::info!(kind = K::KIND, %id, "resource soft-deleted");
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self), fields(kind = K::KIND))]
    pub async fn list(&self, tenant_id: TenantId, query: &ResourceQuery) -> Result<Vec<Resource<K>>> {
        let rows = self.db.list(K::KIND, tenant_id, query).await?;
        rows.into_iter().map(Resource::from_row).collect()
    }

    async fn apply<F>(
        &self,
        mut current: Resource<K>,
        expected_version: i64,
        mutate: F,
    ) -> Result<Resource<K>>
    where
        F: FnOnce(&mut Resource<K>) -> Result<()> + Send,
    {
        let status = current.status;
        mutate(&mut current)?;
        // Status changes must go through the transition table.
        current.status = status;
        self.swap(expected_version, current).await
    }

    async fn swap(&self, expected_version: i64, mut next: Resource<K>) -> Result<Resource<K>> {
        next.updated_at = Utc::now();
        let affected = self
            .db
            .compare_and_swap(expected_version, &next.to_row()?)
            .await?;
        if affected == 0 {
            tracing::warn!(kind = K::KIND, id = %next.id, expected_version, "lost compare-and-swap");
            return Err(Error::conflict_at(K::KIND, next.id, expected_version));
        }
        next.version = expected_version + 1;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::memory::MemoryResourceDb;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    enum LampStatus {
        Off,
        On,
        Broken,
    }

    impl LifecycleStatus for LampStatus {
        const ALL: &'static [Self] = &[Self::Off, Self::On, Self::Broken];

        fn as_str(&self) -> &'static str {
            match self {
                Self::Off => "off",
                Self::On => "on",
                Self::Broken => "broken",
            }
        }

        fn parse_str(s: &str) -> Option<Self> {
            Self::ALL.iter().copied().find(|v| v.as_str() == s)
        }

        fn can_transition_to(&self, target: Self) -> bool {
            matches!(
                (self, target),
                (Self::Off, Self::On) | (Self::On, Self::Off) | (_, Self::Broken)
            ) && *self != Self::Broken
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct LampFields {
        room: String,
    }

    #[derive(Debug, Clone)]
    struct Lamp;

    impl ResourceKind for Lamp {
        const KIND: &'static str = "lamp";
        type Status = LampStatus;
        type Fields = LampFields;
    }

    fn store() -> (LifecycleStore<Lamp>, MemoryResourceDb) {
        let db = MemoryResourceDb::new();
        (LifecycleStore::new(Arc::new(db.clone())), db)
    }

    fn fields(room: &str) -> LampFields {
        LampFields {
            room: room.to_string(),
        }
    }

    #[tokio::test]
    async fn create_starts_at_version_one() {
        let (store, _) = store();
        let tenant = TenantId::new();
        let id = store
            .create(tenant, LampStatus::Off, fields("hall"), Metadata::new())
            .await
            .unwrap();
        let lamp = store.find(tenant, id).await.unwrap();
        assert_eq!(lamp.version, 1);
        assert_eq!(lamp.status, LampStatus::Off);
        assert_eq!(lamp.fields, fields("hall"));
    }

    #[tokio::test]
    async fn id_collision_across_tenants_reveals_nothing() {
        let (store, db) = store();
        let owner = TenantId::new();
        let id = store
            .create(owner, LampStatus::Off, fields("hall"), Metadata::new())
            .await
            .unwrap();

        let other = TenantId::new();
        let err = store
            .create_with_id(other, id, LampStatus::On, fields("attic"), Metadata::new())
            .await
            .unwrap_err();
        match err {
            Error::Conflict(msg) => {
                assert!(!msg.contains(&id.to_string()));
                assert!(!msg.contains(&owner.to_string()));
            }
            e => panic!("unexpected error: {e}"),
        }
        assert!(store.try_find(other, id).await.unwrap().is_none());
        let row = db.raw(Lamp::KIND, id).await.unwrap();
        assert_eq!(row.tenant_id, owner);
        assert_eq!(row.version, 1);
    }

    #[tokio::test]
    async fn transition_bumps_version_by_one() {
        let (store, _) = store();
        let tenant = TenantId::new();
        let id = store
            .create(tenant, LampStatus::Off, fields("hall"), Metadata::new())
            .await
            .unwrap();

        let on = store.transition(tenant, id, LampStatus::On).await.unwrap();
        assert_eq!(on.version, 2);
        let off = store.transition(tenant, id, LampStatus::Off).await.unwrap();
        assert_eq!(off.version, 3);
        assert_eq!(store.find(tenant, id).await.unwrap().version, 3);
    }

    #[tokio::test]
    async fn same_status_transition_is_a_no_op() {
        let (store, _) = store();
        let tenant = TenantId::new();
        let id = store
            .create(tenant, LampStatus::Off, fields("hall"), Metadata::new())
            .await
            .unwrap();

        let mut called = false;
        let lamp = store
            .transition_with(tenant, id, LampStatus::Off, |_| {
                called = true;
                Ok(())
            })
            .await
            .unwrap();
        assert!(!called);
        assert_eq!(lamp.version, 1);
        assert_eq!(store.find(tenant, id).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn illegal_transition_fails_without_writing() {
        let (store, db) = store();
        let tenant = TenantId::new();
        let id = store
            .create(tenant, LampStatus::Off, fields("hall"), Metadata::new())
            .await
            .unwrap();
        store.transition(tenant, id, LampStatus::Broken).await.unwrap();
        let before = db.raw("lamp", id).await.unwrap();

        let err = store.transition(tenant, id, LampStatus::On).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(db.raw("lamp", id).await.unwrap(), before);
        assert!(LampStatus::Broken.is_terminal());
    }

    #[tokio::test]
    async fn stale_version_conflicts_and_leaves_row_unchanged() {
        let (store, db) = store();
        let tenant = TenantId::new();
        let id = store
            .create(tenant, LampStatus::Off, fields("hall"), Metadata::new())
            .await
            .unwrap();
        store
            .update(tenant, id, |r| {
                r.fields.room = "kitchen".to_string();
                Ok(())
            })
            .await
            .unwrap();
        let before = db.raw("lamp", id).await.unwrap();

        let err = store
            .update_at_version(tenant, id, 1, |r| {
                r.fields.room = "attic".to_string();
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(db.raw("lamp", id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn concurrent_writer_is_detected_by_cas() {
        let (store, db) = store();
        let tenant = TenantId::new();
        let id = store
            .create(tenant, LampStatus::Off, fields("hall"), Metadata::new())
            .await
            .unwrap();
        let observed = store.find(tenant, id).await.unwrap();

        // Another writer lands between our read and our write.
        store.transition(tenant, id, LampStatus::On).await.unwrap();

        let stale = observed.to_row().unwrap();
        assert_eq!(db.compare_and_swap(observed.version, &stale).await.unwrap(), 0);

        let err = store
            .update_at_version(tenant, id, observed.version, |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ConcurrencyConflict {
                expected_version: 1,
                ..
            }
        ));
        assert_eq!(store.find(tenant, id).await.unwrap().status, LampStatus::On);
    }

    #[tokio::test]
    async fn update_cannot_smuggle_a_status_change() {
        let (store, _) = store();
        let tenant = TenantId::new();
        let id = store
            .create(tenant, LampStatus::Off, fields("hall"), Metadata::new())
            .await
            .unwrap();
        let lamp = store
            .update(tenant, id, |r| {
                r.status = LampStatus::Broken;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(lamp.status, LampStatus::Off);
        assert_eq!(lamp.version, 2);
    }

    #[tokio::test]
    async fn other_tenants_see_not_found() {
        let (store, _) = store();
        let tenant = TenantId::new();
        let id = store
            .create(tenant, LampStatus::Off, fields("hall"), Metadata::new())
            .await
            .unwrap();

        let stranger = TenantId::new();
        assert!(matches!(
            store.find(stranger, id).await.unwrap_err(),
            Error::NotFound(_)
        ));
        assert!(matches!(
            store.transition(stranger, id, LampStatus::On).await.unwrap_err(),
            Error::NotFound(_)
        ));
        assert_eq!(store.find(tenant, id).await.unwrap().status, LampStatus::Off);
    }

    #[tokio::test]
    async fn soft_deleted_rows_are_invisible() {
        let (store, db) = store();
        let tenant = TenantId::new();
        let id = store
            .create(tenant, LampStatus::Off, fields("hall"), Metadata::new())
            .await
            .unwrap();

        let err = store.soft_delete(tenant, id, 7).await.unwrap_err();
        assert!(err.is_retryable());

        store.soft_delete(tenant, id, 1).await.unwrap();
        assert!(matches!(
            store.find(tenant, id).await.unwrap_err(),
            Error::NotFound(_)
        ));
        assert!(store.list(tenant, &ResourceQuery::default()).await.unwrap().is_empty());
        assert_eq!(db.raw("lamp", id).await.unwrap().version, 2);
    }
}
