use crate::lifecycle::models::{LifecycleStatus, Resource, ResourceKind};
use crate::models::Metadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event lifecycle. `cancelled` and `consolidated` are terminal.
///
/// Consolidation is a status of its own; `EventFields::canonical_id` names the survivor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Ingested,
    Published,
    Cancelled,
    Consolidated,
}

impl LifecycleStatus for EventStatus {
    const ALL: &'static [Self] = &[
        Self::Ingested,
        Self::Published,
        Self::Cancelled,
        Self::Consolidated,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Ingested => "ingested",
            Self::Published => "published",
            Self::Cancelled => "cancelled",
            Self::Consolidated => "consolidated",
        }
    }

    fn parse_str(s: &str) -> Option<Self> {
        match s {
            "ingested" => Some(Self::Ingested),
            "published" => Some(Self::Published),
            "cancelled" => Some(Self::Cancelled),
            "consolidated" => Some(Self::Consolidated),
            _ => None,
        }
    }

    fn can_transition_to(&self, target: Self) -> bool {
        use EventStatus::*;
        matches!(
            (self, target),
            (Ingested, Published) | (Ingested | Published, Cancelled | Consolidated)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFields {
    pub source_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    /// IANA zone name the event is advertised in.
    pub timezone: String,
    #[serde(default)]
    pub is_free: bool,
    #[serde(default)]
    pub registration_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Set exactly when status is `consolidated`.
    #[serde(default)]
    pub canonical_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct Event;

impl ResourceKind for Event {
    const KIND: &'static str = "event";
    type Status = EventStatus;
    type Fields = EventFields;

    fn parent_id(fields: &EventFields) -> Option<Uuid> {
        Some(fields.source_id)
    }

    fn sort_at(fields: &EventFields) -> Option<DateTime<Utc>> {
        Some(fields.starts_at)
    }
}

/// Extracted event payload handed to `ingest_event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    pub title: String,
    pub description: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub timezone: String,
    #[serde(default)]
    pub is_free: bool,
    #[serde(default)]
    pub registration_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Published events for a display period, ordered by start time.
#[derive(Debug, Clone)]
pub struct EventSchedule {
    pub events: Vec<Resource<Event>>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total: usize,
}
