use crate::events::models::{Event, EventData, EventFields, EventSchedule, EventStatus};
use crate::lifecycle::models::{LifecycleStatus, Resource, ResourceQuery, SortOrder};
use crate::lifecycle::store::LifecycleStore;
use crate::lifecycle::traits::ResourceDb;
use crate::models::TenantId;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Upper bound on events returned for one schedule period.
pub const MAX_SCHEDULE_EVENTS: usize = 5_000;

/// Event lifecycle from ingestion through publication.
#[derive(Clone)]
pub struct EventAccess {
    store: LifecycleStore<Event>,
}

impl EventAccess {
    pub fn new(db: Arc<dyn ResourceDb>) -> Self {
        Self {
            store: LifecycleStore::new(db),
        }
    }

    pub fn store(&self) -> &LifecycleStore<Event> {
        &self.store
    }

    #[tracing::instrument(level = "info", skip(self, data))]
    pub async fn ingest_event(
        &self,
        tenant_id: TenantId,
        source_id: Uuid,
        data: EventData,
    ) -> Result<Uuid> {
        if data.title.trim().is_empty() {
            return Err(Error::InvalidInput("event title is empty".to_string()));
        }
        if data.timezone.trim().is_empty() {
            return Err(Error::InvalidInput("event timezone is empty".to_string()));
        }
        if let Some(ends_at) = data.ends_at {
            if ends_at < data.starts_at {
                return Err(Error::InvalidInput(
                    "event ends_at must be >= starts_at".to_string(),
                ));
            }
        }

        let fields = EventFields {
            source_id,
            title: data.title.trim().to_string(),
            description: data.description,
            starts_at: data.starts_at,
            ends_at: data.ends_at,
            timezone: data.timezone.trim().to_string(),
            is_free: data.is_free,
            registration_url: data.registration_url,
            image_url: data.image_url,
            canonical_id: None,
        };
        self.store
            .create(tenant_id, EventStatus::Ingested, fields, data.metadata)
            .await
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn publish_event(&self, tenant_id: TenantId, event_id: Uuid) -> Result<()> {
        self.store
            .transition(tenant_id, event_id, EventStatus::Published)
            .await?;
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn cancel_event(&self, tenant_id: TenantId, event_id: Uuid) -> Result<()> {
        self.store
            .transition(tenant_id, event_id, EventStatus::Cancelled)
            .await?;
        Ok(())
    }

    /// Fold `duplicate_id` into `canonical_id`. Status and pointer land in one write.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn consolidate_events(
        &self,
        tenant_id: TenantId,
        duplicate_id: Uuid,
        canonical_id: Uuid,
    ) -> Result<()> {
        if duplicate_id == canonical_id {
            return Err(Error::InvalidInput(
                "an event cannot be consolidated into itself".to_string(),
            ));
        }

        let canonical = self.store.find(tenant_id, canonical_id).await?;
        if canonical.status == EventStatus::Consolidated {
            return Err(Error::InvalidInput(format!(
                "canonical event {canonical_id} is itself consolidated"
            )));
        }

        let duplicate = self.store.find(tenant_id, duplicate_id).await?;
        if duplicate.status == EventStatus::Consolidated {
            if duplicate.fields.canonical_id == Some(canonical_id) {
                return Ok(());
            }
            return Err(Error::invalid_transition(
                "event",
                format!(
                    "consolidated into {}",
                    duplicate
                        .fields
                        .canonical_id
                        .map(|id| id.to_string())
                        .unwrap_or_default()
                ),
                format!("consolidated into {canonical_id}"),
            ));
        }

        let observed = duplicate.version;
        self.store
            .transition_with(tenant_id, duplicate_id, EventStatus::Consolidated, |r| {
                if r.version != observed {
                    return Err(Error::conflict_at("event", duplicate_id, observed));
                }
                r.fields.canonical_id = Some(canonical_id);
                Ok(())
            })
            .await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn compile_event_schedule(
        &self,
        tenant_id: TenantId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<EventSchedule> {
        if period_start > period_end {
            return Err(Error::InvalidInput(
                "period_start must be <= period_end".to_string(),
            ));
        }
        let query = ResourceQuery {
            sort_from: Some(period_start),
            sort_until: Some(period_end),
            include_unsorted: false,
            order: SortOrder::Asc,
            limit: MAX_SCHEDULE_EVENTS,
            ..ResourceQuery::default()
        }
        .with_status(EventStatus::Published);
        let events = self.store.list(tenant_id, &query).await?;
        if events.len() == MAX_SCHEDULE_EVENTS {
            tracing::warn!(%tenant_id, limit = MAX_SCHEDULE_EVENTS, "event schedule truncated");
        }
        Ok(EventSchedule {
            total: events.len(),
            events,
            period_start,
            period_end,
        })
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn resolve_event_for_processing(
        &self,
        tenant_id: TenantId,
        event_id: Uuid,
    ) -> Result<Resource<Event>> {
        let event = self.store.find(tenant_id, event_id).await?;
        if event.status.is_terminal() {
            tracing::debug!(%event_id, status = event.status.as_str(), "resolved terminal event");
        }
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::memory::MemoryResourceDb;
    use crate::models::Metadata;
    use chrono::{Duration, TimeZone};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    fn data(title: &str, starts_at: DateTime<Utc>) -> EventData {
        EventData {
            title: title.to_string(),
            description: None,
            starts_at,
            ends_at: Some(starts_at + Duration::hours(2)),
            timezone: "Europe/Berlin".to_string(),
            is_free: true,
            registration_url: None,
            image_url: None,
            metadata: Metadata::new(),
        }
    }

    #[tokio::test]
    async fn ingest_validates_payload() {
        let access = EventAccess::new(Arc::new(MemoryResourceDb::new()));
        let tenant = TenantId::new();
        let source = Uuid::new_v4();

        let mut bad = data("Open Mic", at(1, 19));
        bad.ends_at = Some(at(1, 18));
        assert!(matches!(
            access.ingest_event(tenant, source, bad).await.unwrap_err(),
            Error::InvalidInput(_)
        ));

        let mut bad = data("Open Mic", at(1, 19));
        bad.timezone = String::new();
        assert!(matches!(
            access.ingest_event(tenant, source, bad).await.unwrap_err(),
            Error::InvalidInput(_)
        ));

        let id = access
            .ingest_event(tenant, source, data("Open Mic", at(1, 19)))
            .await
            .unwrap();
        let event = access.resolve_event_for_processing(tenant, id).await.unwrap();
        assert_eq!(event.status, EventStatus::Ingested);
        assert_eq!(event.fields.source_id, source);
    }

    #[tokio::test]
    async fn publish_and_cancel_are_idempotent() {
        let access = EventAccess::new(Arc::new(MemoryResourceDb::new()));
        let tenant = TenantId::new();
        let id = access
            .ingest_event(tenant, Uuid::new_v4(), data("Quiz Night", at(2, 20)))
            .await
            .unwrap();

        access.publish_event(tenant, id).await.unwrap();
        access.publish_event(tenant, id).await.unwrap();
        access.cancel_event(tenant, id).await.unwrap();
        access.cancel_event(tenant, id).await.unwrap();

        let event = access.store().find(tenant, id).await.unwrap();
        assert_eq!(event.status, EventStatus::Cancelled);
        assert_eq!(event.version, 3);
        assert!(matches!(
            access.publish_event(tenant, id).await.unwrap_err(),
            Error::InvalidTransition { .. }
        ));
    }

    #[tokio::test]
    async fn consolidation_rules() {
        let access = EventAccess::new(Arc::new(MemoryResourceDb::new()));
        let tenant = TenantId::new();
        let source = Uuid::new_v4();
        let canonical = access
            .ingest_event(tenant, source, data("Poetry Slam", at(3, 20)))
            .await
            .unwrap();
        let dup = access
            .ingest_event(tenant, source, data("Poetry slam!", at(3, 20)))
            .await
            .unwrap();
        let other = access
            .ingest_event(tenant, source, data("Poetry Slam (2)", at(3, 20)))
            .await
            .unwrap();

        assert!(matches!(
            access.consolidate_events(tenant, dup, dup).await.unwrap_err(),
            Error::InvalidInput(_)
        ));
        assert!(matches!(
            access
                .consolidate_events(tenant, dup, Uuid::new_v4())
                .await
                .unwrap_err(),
            Error::NotFound(_)
        ));

        access.consolidate_events(tenant, dup, canonical).await.unwrap();
        let merged = access.store().find(tenant, dup).await.unwrap();
        assert_eq!(merged.status, EventStatus::Consolidated);
        assert_eq!(merged.fields.canonical_id, Some(canonical));
        assert_eq!(merged.version, 2);

        // Same canonical again is a no-op.
        access.consolidate_events(tenant, dup, canonical).await.unwrap();
        assert_eq!(access.store().find(tenant, dup).await.unwrap().version, 2);

        assert!(matches!(
            access.consolidate_events(tenant, dup, other).await.unwrap_err(),
            Error::InvalidTransition { .. }
        ));
        assert!(matches!(
            access.consolidate_events(tenant, other, dup).await.unwrap_err(),
            Error::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn schedule_lists_published_events_in_range_ascending() {
        let access = EventAccess::new(Arc::new(MemoryResourceDb::new()));
        let tenant = TenantId::new();
        let source = Uuid::new_v4();

        let late = access
            .ingest_event(tenant, source, data("Late", at(10, 21)))
            .await
            .unwrap();
        let early = access
            .ingest_event(tenant, source, data("Early", at(10, 9)))
            .await
            .unwrap();
        let boundary = access
            .ingest_event(tenant, source, data("Boundary", at(12, 0)))
            .await
            .unwrap();
        let outside = access
            .ingest_event(tenant, source, data("Outside", at(13, 0)))
            .await
            .unwrap();
        let draft = access
            .ingest_event(tenant, source, data("Draft", at(11, 0)))
            .await
            .unwrap();
        for id in [late, early, boundary, outside] {
            access.publish_event(tenant, id).await.unwrap();
        }

        let schedule = access
            .compile_event_schedule(tenant, at(10, 0), at(12, 0))
            .await
            .unwrap();
        let ids: Vec<Uuid> = schedule.events.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![early, late, boundary]);
        assert_eq!(schedule.total, 3);
        assert!(!ids.contains(&draft));

        let empty = access
            .compile_event_schedule(TenantId::new(), at(10, 0), at(12, 0))
            .await
            .unwrap();
        assert_eq!(empty.total, 0);

        assert!(matches!(
            access
                .compile_event_schedule(tenant, at(12, 0), at(10, 0))
                .await
                .unwrap_err(),
            Error::InvalidInput(_)
        ));
    }
}
