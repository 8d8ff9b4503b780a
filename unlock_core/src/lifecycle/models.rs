use crate::models::{Metadata, TenantId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use uuid::Uuid;

/// Entity status with an explicit allowed-transition table.
///
/// Same-state "transitions" are never listed here; the store treats them as no-ops
/// before consulting the table.
pub trait LifecycleStatus: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Every status value, used to derive terminal states.
    const ALL: &'static [Self];

    fn as_str(&self) -> &'static str;

    fn parse_str(s: &str) -> Option<Self>;

    fn can_transition_to(&self, target: Self) -> bool;

    /// A status with no outgoing transitions.
    fn is_terminal(&self) -> bool {
        Self::ALL
            .iter()
            .all(|t| *t == *self || !self.can_transition_to(*t))
    }
}

/// Field schema and index projection for one persisted entity type.
///
/// All kinds share one physical row shape (`ResourceRow`); `KIND` discriminates them.
pub trait ResourceKind: fmt::Debug + Clone + Send + Sync + 'static {
    /// Discriminator stored with each row (`source`, `event`, `capture`).
    const KIND: &'static str;

    type Status: LifecycleStatus;
    type Fields: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync;

    /// Owning resource used for scoped listing (e.g. the source of a capture).
    fn parent_id(_fields: &Self::Fields) -> Option<Uuid> {
        None
    }

    /// Timestamp used for range filters and ordering.
    fn sort_at(_fields: &Self::Fields) -> Option<DateTime<Utc>> {
        None
    }
}

/// Untyped persistence row shared by every `ResourceKind`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRow {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub kind: String,
    pub version: i64,
    pub status: String,
    pub fields: serde_json::Value,
    pub metadata: Metadata,
    pub parent_id: Option<Uuid>,
    pub sort_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Typed view of a persisted resource.
#[derive(Debug, Clone)]
pub struct Resource<K: ResourceKind> {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub version: i64,
    pub status: K::Status,
    pub fields: K::Fields,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl<K: ResourceKind> Resource<K> {
    #[tracing::instrument(level = "debug", skip(row), fields(kind = K::KIND))]
    pub fn from_row(row: ResourceRow) -> Result<Self> {
        if row.kind != K::KIND {
            return Err(Error::BackendMessage(format!(
                "row {} has kind '{}', expected '{}'",
                row.id,
                row.kind,
                K::KIND
            )));
        }
        let status = K::Status::parse_str(&row.status).ok_or_else(|| {
            Error::BackendMessage(format!("invalid {} status in db: {}", K::KIND, row.status))
        })?;
        let fields: K::Fields = serde_json::from_value(row.fields)
            .map_err(|e| Error::backend(format!("deserialize {} fields", K::KIND), e))?;
        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            version: row.version,
            status,
            fields,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }

    pub fn to_row(&self) -> Result<ResourceRow> {
        let fields = serde_json::to_value(&self.fields)
            .map_err(|e| Error::backend(format!("serialize {} fields", K::KIND), e))?;
        Ok(ResourceRow {
            id: self.id,
            tenant_id: self.tenant_id,
            kind: K::KIND.to_string(),
            version: self.version,
            status: self.status.as_str().to_string(),
            fields,
            metadata: self.metadata.clone(),
            parent_id: K::parent_id(&self.fields),
            sort_at: K::sort_at(&self.fields),
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Tenant-scoped listing filter over the indexable columns.
///
/// Ascending order puts rows without `sort_at` first; descending puts them last.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceQuery {
    pub status: Option<String>,
    pub parent_id: Option<Uuid>,
    /// Inclusive lower bound on `sort_at`.
    pub sort_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `sort_at`.
    pub sort_until: Option<DateTime<Utc>>,
    /// Whether rows with no `sort_at` pass the range filter.
    pub include_unsorted: bool,
    pub order: SortOrder,
    pub limit: usize,
}

impl Default for ResourceQuery {
    fn default() -> Self {
        Self {
            status: None,
            parent_id: None,
            sort_from: None,
            sort_until: None,
            include_unsorted: true,
            order: SortOrder::Asc,
            limit: 100,
        }
    }
}

impl ResourceQuery {
    pub fn with_status<S: LifecycleStatus>(mut self, status: S) -> Self {
        self.status = Some(status.as_str().to_string());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(Error::InvalidInput("limit must be > 0".to_string()));
        }
        if let (Some(from), Some(until)) = (self.sort_from, self.sort_until) {
            if from > until {
                return Err(Error::InvalidInput(
                    "sort_from must be <= sort_until".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Filter predicate shared by in-process backends.
    pub fn matches(&self, row: &ResourceRow) -> bool {
        if let Some(status) = &self.status {
            if &row.status != status {
                return false;
            }
        }
        if let Some(parent) = self.parent_id {
            if row.parent_id != Some(parent) {
                return false;
            }
        }
        match row.sort_at {
            None => self.include_unsorted,
            Some(at) => {
                self.sort_from.is_none_or(|from| at >= from)
                    && self.sort_until.is_none_or(|until| at <= until)
            }
        }
    }
}
