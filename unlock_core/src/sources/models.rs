use crate::lifecycle::models::{LifecycleStatus, ResourceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source lifecycle: `pending -> active <-> inactive`, any non-retired state may retire.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Pending,
    Active,
    Inactive,
    Retired,
}

impl LifecycleStatus for SourceStatus {
    const ALL: &'static [Self] = &[Self::Pending, Self::Active, Self::Inactive, Self::Retired];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Retired => "retired",
        }
    }

    fn parse_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "retired" => Some(Self::Retired),
            _ => None,
        }
    }

    fn can_transition_to(&self, target: Self) -> bool {
        use SourceStatus::*;
        matches!(
            (self, target),
            (Pending, Active)
                | (Active, Inactive)
                | (Inactive, Active)
                | (Pending | Active | Inactive, Retired)
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceCategory {
    #[default]
    WebPage,
    SocialPost,
    Feed,
    Api,
    Manual,
}

impl SourceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebPage => "web_page",
            Self::SocialPost => "social_post",
            Self::Feed => "feed",
            Self::Api => "api",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFields {
    pub name: String,
    pub url: String,
    pub category: SourceCategory,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub feed_url: Option<String>,
    /// Free-form navigation hints. `frequency_hours` overrides the revisit interval.
    #[serde(default = "empty_object")]
    pub crawl_config: serde_json::Value,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default)]
    pub last_navigated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_navigate_at: Option<DateTime<Utc>>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl SourceFields {
    /// Hours between visits requested by `crawl_config.frequency_hours`, if positive.
    pub fn frequency_hours(&self) -> Option<f64> {
        self.crawl_config
            .get("frequency_hours")
            .and_then(|v| v.as_f64())
            .filter(|h| h.is_finite() && *h > 0.0)
    }
}

/// An event environment crawled for discovery.
#[derive(Debug, Clone)]
pub struct Source;

impl ResourceKind for Source {
    const KIND: &'static str = "source";
    type Status = SourceStatus;
    type Fields = SourceFields;

    fn sort_at(fields: &SourceFields) -> Option<DateTime<Utc>> {
        fields.next_navigate_at
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OnboardOptions {
    pub category: Option<SourceCategory>,
    pub platform: Option<String>,
    pub feed_url: Option<String>,
    pub crawl_config: Option<serde_json::Value>,
}

/// Everything a navigator needs to visit a source once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationBrief {
    pub source_id: Uuid,
    pub name: String,
    pub url: String,
    pub feed_url: Option<String>,
    pub category: SourceCategory,
    pub crawl_config: serde_json::Value,
    pub last_navigated_at: Option<DateTime<Utc>>,
    pub failure_count: u32,
}
