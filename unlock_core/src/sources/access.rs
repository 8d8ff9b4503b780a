use crate::config::SourceAccessConfig;
use crate::lifecycle::models::{Resource, ResourceQuery, SortOrder};
use crate::lifecycle::store::LifecycleStore;
use crate::lifecycle::traits::ResourceDb;
use crate::models::{Metadata, TenantId};
use crate::sources::models::{NavigationBrief, OnboardOptions, Source, SourceFields, SourceStatus};
use crate::{Error, Result};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Source lifecycle: how environments enter, rotate through, and leave discovery.
#[derive(Clone)]
pub struct SourceAccess {
    store: LifecycleStore<Source>,
    config: SourceAccessConfig,
}

impl SourceAccess {
    pub fn new(db: Arc<dyn ResourceDb>, config: SourceAccessConfig) -> Self {
        Self {
            store: LifecycleStore::new(db),
            config,
        }
    }

    pub fn store(&self) -> &LifecycleStore<Source> {
        &self.store
    }

    #[tracing::instrument(level = "debug")]
    fn validate_url(field: &str, raw: &str) -> Result<()> {
        let parsed = url::Url::parse(raw.trim())
            .map_err(|e| Error::InvalidInput(format!("{field} is not a valid url: {e}")))?;
        match parsed.scheme() {
            "http" | "https" => Ok(()),
            other => Err(Error::InvalidInput(format!(
                "{field} must be http(s), got '{other}'"
            ))),
        }
    }

    /// Register a new environment in `pending`.
    #[tracing::instrument(level = "info", skip(self, options))]
    pub async fn onboard_source(
        &self,
        tenant_id: TenantId,
        name: &str,
        url: &str,
        options: OnboardOptions,
    ) -> Result<Uuid> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("source name is empty".to_string()));
        }
        Self::validate_url("url", url)?;
        if let Some(feed) = &options.feed_url {
            Self::validate_url("feed_url", feed)?;
        }
        let crawl_config = options
            .crawl_config
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
        if !crawl_config.is_object() {
            return Err(Error::InvalidInput(
                "crawl_config must be a JSON object".to_string(),
            ));
        }

        let fields = SourceFields {
            name: name.trim().to_string(),
            url: url.trim().to_string(),
            category: options.category.unwrap_or_default(),
            platform: options.platform,
            feed_url: options.feed_url,
            crawl_config,
            failure_count: 0,
            last_navigated_at: None,
            next_navigate_at: None,
        };
        self.store
            .create(tenant_id, SourceStatus::Pending, fields, Metadata::new())
            .await
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn commission_source(&self, tenant_id: TenantId, source_id: Uuid) -> Result<()> {
        self.store
            .transition(tenant_id, source_id, SourceStatus::Active)
            .await?;
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn decommission_source(&self, tenant_id: TenantId, source_id: Uuid) -> Result<()> {
        self.store
            .transition(tenant_id, source_id, SourceStatus::Inactive)
            .await?;
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn retire_source(&self, tenant_id: TenantId, source_id: Uuid) -> Result<()> {
        self.store
            .transition(tenant_id, source_id, SourceStatus::Retired)
            .await?;
        Ok(())
    }

    /// Count a failed visit. Reaching the failure ceiling deactivates an active source
    /// in the same write.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn report_navigation_failure(
        &self,
        tenant_id: TenantId,
        source_id: Uuid,
    ) -> Result<Resource<Source>> {
        let current = self.store.find(tenant_id, source_id).await?;
        let observed = current.version;
        let failures = current.fields.failure_count.saturating_add(1);

        if current.status == SourceStatus::Active && failures >= self.config.max_navigation_failures
        {
            tracing::warn!(%source_id, failures, "failure ceiling reached; deactivating source");
            return self
                .store
                .transition_with(tenant_id, source_id, SourceStatus::Inactive, |r| {
                    if r.version != observed {
                        return Err(Error::conflict_at("source", source_id, observed));
                    }
                    r.fields.failure_count = failures;
                    Ok(())
                })
                .await;
        }

        self.store
            .update_at_version(tenant_id, source_id, observed, |r| {
                r.fields.failure_count = failures;
                Ok(())
            })
            .await
    }

    /// Reset failure tracking and schedule the next visit.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn acknowledge_navigation_success(
        &self,
        tenant_id: TenantId,
        source_id: Uuid,
    ) -> Result<Resource<Source>> {
        let default_interval = ChronoDuration::from_std(self.config.default_navigation_interval)
            .map_err(|e| Error::InvalidInput(format!("navigation interval out of range: {e}")))?;
        self.store
            .update(tenant_id, source_id, |r| {
                let interval = match r.fields.frequency_hours() {
                    Some(hours) => hours_to_delta(hours)?,
                    None => default_interval,
                };
                let now = Utc::now();
                let next = now.checked_add_signed(interval).ok_or_else(|| {
                    Error::InvalidInput(format!("navigation interval of source {source_id} overflows"))
                })?;
                r.fields.failure_count = 0;
                r.fields.last_navigated_at = Some(now);
                r.fields.next_navigate_at = Some(next);
                Ok(())
            })
            .await
    }

    /// Active sources due now; never-visited sources first, then the longest overdue.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn nominate_for_navigation(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<Resource<Source>>> {
        let query = ResourceQuery {
            sort_until: Some(Utc::now()),
            include_unsorted: true,
            order: SortOrder::Asc,
            limit,
            ..ResourceQuery::default()
        }
        .with_status(SourceStatus::Active);
        self.store.list(tenant_id, &query).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn resolve_navigation_brief(
        &self,
        tenant_id: TenantId,
        source_id: Uuid,
    ) -> Result<NavigationBrief> {
        let source = self.store.find(tenant_id, source_id).await?;
        let f = source.fields;
        Ok(NavigationBrief {
            source_id: source.id,
            name: f.name,
            url: f.url,
            feed_url: f.feed_url,
            category: f.category,
            crawl_config: f.crawl_config,
            last_navigated_at: f.last_navigated_at,
            failure_count: f.failure_count,
        })
    }
}

fn hours_to_delta(hours: f64) -> Result<ChronoDuration> {
    let millis = hours * 3_600_000.0;
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return Err(Error::InvalidInput(format!("frequency_hours {hours} out of range")));
    }
    ChronoDuration::try_milliseconds(millis as i64)
        .ok_or_else(|| Error::InvalidInput(format!("frequency_hours {hours} out of range")))
}
