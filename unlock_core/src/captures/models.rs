use crate::lifecycle::models::{LifecycleStatus, ResourceKind};
use crate::models::Metadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    Preserved,
    Extracted,
    Expired,
}

impl LifecycleStatus for CaptureStatus {
    const ALL: &'static [Self] = &[Self::Preserved, Self::Extracted, Self::Expired];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Preserved => "preserved",
            Self::Extracted => "extracted",
            Self::Expired => "expired",
        }
    }

    fn parse_str(s: &str) -> Option<Self> {
        match s {
            "preserved" => Some(Self::Preserved),
            "extracted" => Some(Self::Extracted),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    fn can_transition_to(&self, target: Self) -> bool {
        use CaptureStatus::*;
        matches!(
            (self, target),
            (Preserved, Extracted) | (Preserved | Extracted, Expired)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureFields {
    pub source_id: Uuid,
    pub session_id: String,
    pub url: String,
    /// Lowercase hex sha-256 of the captured html (empty document when absent).
    pub content_hash: String,
    /// Blob path of the observation bundle. Fixed at creation.
    pub bundle_path: String,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub extracted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Capture;

impl ResourceKind for Capture {
    const KIND: &'static str = "capture";
    type Status = CaptureStatus;
    type Fields = CaptureFields;

    fn parent_id(fields: &CaptureFields) -> Option<Uuid> {
        Some(fields.source_id)
    }

    fn sort_at(fields: &CaptureFields) -> Option<DateTime<Utc>> {
        Some(fields.captured_at)
    }
}

/// Raw observations from one navigation session, archived as a JSON blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationBundle {
    pub source_id: Uuid,
    pub session_id: String,
    pub url: String,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub screenshot_url: Option<String>,
    #[serde(default)]
    pub network_log_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub captured_at: DateTime<Utc>,
}

impl ObservationBundle {
    pub fn content_hash(&self) -> String {
        let digest = Sha256::digest(self.html.as_deref().unwrap_or_default().as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftSignal {
    ContentHashChanged,
    UrlChanged,
}

/// Comparison of the two most recent captures of a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentDrift {
    pub has_drifted: bool,
    pub latest_capture_id: Option<Uuid>,
    pub previous_capture_id: Option<Uuid>,
    pub drift_signals: Vec<DriftSignal>,
}
