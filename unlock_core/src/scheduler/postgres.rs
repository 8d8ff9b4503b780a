use crate::scheduler::models::{CadenceFrequency, SourceSchedule};
use crate::scheduler::traits::ScheduleStore;
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Schedules in the `source_schedules` table, one row per source.
#[derive(Clone)]
pub struct PostgresScheduleStore {
    pool: PgPool,
}

impl PostgresScheduleStore {
    #[tracing::instrument(level = "debug", skip(pool))]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleStore for PostgresScheduleStore {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn get(&self, source_id: Uuid) -> Result<Option<SourceSchedule>> {
        let row = sqlx::query(
            r#"
SELECT source_id, frequency, next_navigation_at, last_navigated_at
FROM source_schedules
WHERE source_id = $1
"#,
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::backend("get source schedule", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let frequency: String = row
            .try_get("frequency")
            .map_err(|e| Error::backend("frequency", e))?;
        Ok(Some(SourceSchedule {
            source_id: row
                .try_get("source_id")
                .map_err(|e| Error::backend("source_id", e))?,
            frequency: frequency
                .parse::<CadenceFrequency>()
                .map_err(|_| Error::BackendMessage(format!("invalid frequency in db: {frequency}")))?,
            next_navigation_at: row
                .try_get("next_navigation_at")
                .map_err(|e| Error::backend("next_navigation_at", e))?,
            last_navigated_at: row
                .try_get("last_navigated_at")
                .map_err(|e| Error::backend("last_navigated_at", e))?,
        }))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(source_id = %schedule.source_id))]
    async fn put(&self, schedule: &SourceSchedule) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO source_schedules (source_id, frequency, next_navigation_at, last_navigated_at, updated_at)
VALUES ($1, $2, $3, $4, now())
ON CONFLICT (source_id) DO UPDATE
SET frequency = EXCLUDED.frequency,
    next_navigation_at = EXCLUDED.next_navigation_at,
    last_navigated_at = EXCLUDED.last_navigated_at,
    updated_at = EXCLUDED.updated_at
"#,
        )
        .bind(schedule.source_id)
        .bind(schedule.frequency.as_str())
        .bind(schedule.next_navigation_at)
        .bind(schedule.last_navigated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::backend("put source schedule", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestInfra;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn postgres_put_replaces_the_schedule() {
        let Some(infra) = TestInfra::from_env().await else {
            return;
        };
        let store = PostgresScheduleStore::new(infra.pool().await);
        let source_id = Uuid::new_v4();
        assert!(store.get(source_id).await.unwrap().is_none());

        let last = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let mut schedule = SourceSchedule {
            source_id,
            frequency: CadenceFrequency::Daily,
            next_navigation_at: Utc.with_ymd_and_hms(2026, 1, 16, 10, 0, 0).unwrap(),
            last_navigated_at: Some(last),
        };
        store.put(&schedule).await.unwrap();

        schedule.frequency = CadenceFrequency::Weekly;
        schedule.next_navigation_at = Utc.with_ymd_and_hms(2026, 1, 22, 10, 0, 0).unwrap();
        store.put(&schedule).await.unwrap();
        assert_eq!(store.get(source_id).await.unwrap(), Some(schedule));
    }
}
