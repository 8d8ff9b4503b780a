use crate::config::SchedulerConfig;
use crate::scheduler::models::{CadenceAdjustment, CadenceFrequency, RosterEntry, SourceSchedule};
use crate::scheduler::traits::ScheduleStore;
use crate::{Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Decides when each source should next be navigated and which sources are due.
///
/// Holds no schedule state itself; everything goes through the injected `ScheduleStore`.
#[derive(Clone)]
pub struct NavigationScheduler {
    store: Arc<dyn ScheduleStore>,
    config: SchedulerConfig,
}

impl NavigationScheduler {
    #[tracing::instrument(level = "debug", skip(store))]
    pub fn new(store: Arc<dyn ScheduleStore>, config: SchedulerConfig) -> Self {
        Self { store, config }
    }

    pub fn interval(&self, frequency: CadenceFrequency) -> Duration {
        match frequency {
            CadenceFrequency::Hourly => Duration::from_millis(3_600_000),
            CadenceFrequency::Daily => Duration::from_millis(86_400_000),
            CadenceFrequency::Weekly => Duration::from_millis(604_800_000),
            CadenceFrequency::Monthly => Duration::from_millis(2_592_000_000),
            CadenceFrequency::Custom => self.config.custom_interval,
        }
    }

    fn interval_delta(&self, frequency: CadenceFrequency) -> Result<ChronoDuration> {
        ChronoDuration::from_std(self.interval(frequency))
            .map_err(|e| Error::InvalidInput(format!("{frequency} interval out of range: {e}")))
    }

    fn next_after(
        &self,
        frequency: CadenceFrequency,
        last_navigated_at: Option<DateTime<Utc>>,
    ) -> Result<DateTime<Utc>> {
        match last_navigated_at {
            None => Ok(Utc::now()),
            Some(last) => last
                .checked_add_signed(self.interval_delta(frequency)?)
                .ok_or_else(|| {
                    Error::InvalidInput(format!("{frequency} interval overflows after {last}"))
                }),
        }
    }

    /// Replace the schedule for `source_id`. A never-navigated source is due now.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn schedule_next_navigation(
        &self,
        source_id: Uuid,
        frequency: CadenceFrequency,
        last_navigated_at: Option<DateTime<Utc>>,
    ) -> Result<SourceSchedule> {
        let schedule = SourceSchedule {
            source_id,
            frequency,
            next_navigation_at: self.next_after(frequency, last_navigated_at)?,
            last_navigated_at,
        };
        self.store.put(&schedule).await?;
        Ok(schedule)
    }

    /// Due sources among `source_ids`, most overdue first. Unscheduled sources are skipped.
    #[tracing::instrument(level = "debug", skip(self, source_ids), fields(candidates = source_ids.len()))]
    pub async fn assemble_navigation_roster(
        &self,
        source_ids: &[Uuid],
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Vec<RosterEntry>> {
        let as_of = as_of.unwrap_or_else(Utc::now);
        let mut roster = Vec::new();
        for &source_id in source_ids {
            let Some(schedule) = self.store.get(source_id).await? else {
                continue;
            };
            if schedule.next_navigation_at > as_of {
                continue;
            }
            let overdue_ms = (as_of - schedule.next_navigation_at).num_milliseconds();
            roster.push(RosterEntry {
                source_id,
                priority: self.priority(schedule.frequency, overdue_ms),
                next_navigation_at: schedule.next_navigation_at,
                frequency: schedule.frequency,
            });
        }
        roster.sort_by(|a, b| b.priority.total_cmp(&a.priority));
        tracing::debug!(due = roster.len(), "navigation roster assembled");
        Ok(roster)
    }

    fn priority(&self, frequency: CadenceFrequency, overdue_ms: i64) -> f64 {
        let interval_ms = self.interval(frequency).as_millis();
        if interval_ms == 0 {
            return 1.0;
        }
        let ratio = overdue_ms as f64 / interval_ms as f64;
        (ratio * 100.0).round() / 100.0
    }

    /// Switch a source to `new_frequency`, keeping its last visit. Only sources that
    /// already have a schedule are persisted.
    #[tracing::instrument(level = "info", skip(self, reason))]
    pub async fn adjust_cadence(
        &self,
        source_id: Uuid,
        new_frequency: CadenceFrequency,
        reason: impl Into<String>,
    ) -> Result<CadenceAdjustment> {
        let reason = reason.into();
        let existing = self.store.get(source_id).await?;
        let previous_frequency = existing
            .as_ref()
            .map(|s| s.frequency)
            .unwrap_or(self.config.default_frequency);
        let last_navigated_at = existing.as_ref().and_then(|s| s.last_navigated_at);
        let next_navigation_at = self.next_after(new_frequency, last_navigated_at)?;

        if existing.is_some() {
            self.store
                .put(&SourceSchedule {
                    source_id,
                    frequency: new_frequency,
                    next_navigation_at,
                    last_navigated_at,
                })
                .await?;
        } else {
            tracing::debug!(%source_id, "source has no schedule; cadence change not persisted");
        }

        tracing::info!(
            %source_id,
            from = previous_frequency.as_str(),
            to = new_frequency.as_str(),
            %reason,
            "cadence adjusted"
        );
        Ok(CadenceAdjustment {
            source_id,
            previous_frequency,
            new_frequency,
            reason,
            next_navigation_at,
        })
    }
}
