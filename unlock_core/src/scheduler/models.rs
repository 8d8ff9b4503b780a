use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// How often a source should be navigated.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CadenceFrequency {
    Hourly,
    Daily,
    Weekly,
    /// Thirty days.
    Monthly,
    /// Interval taken from `SchedulerConfig::custom_interval`.
    Custom,
}

impl CadenceFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for CadenceFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CadenceFrequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "custom" => Ok(Self::Custom),
            other => Err(Error::InvalidInput(format!(
                "unknown cadence frequency: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSchedule {
    pub source_id: Uuid,
    pub frequency: CadenceFrequency,
    pub next_navigation_at: DateTime<Utc>,
    pub last_navigated_at: Option<DateTime<Utc>>,
}

/// A due source and how overdue it is, in multiples of its interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub source_id: Uuid,
    pub priority: f64,
    pub next_navigation_at: DateTime<Utc>,
    pub frequency: CadenceFrequency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CadenceAdjustment {
    pub source_id: Uuid,
    pub previous_frequency: CadenceFrequency,
    pub new_frequency: CadenceFrequency,
    pub reason: String,
    pub next_navigation_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_parses_and_prints() {
        for f in [
            CadenceFrequency::Hourly,
            CadenceFrequency::Daily,
            CadenceFrequency::Weekly,
            CadenceFrequency::Monthly,
            CadenceFrequency::Custom,
        ] {
            assert_eq!(f.to_string().parse::<CadenceFrequency>().unwrap(), f);
        }
        assert_eq!(" Weekly ".parse::<CadenceFrequency>().unwrap(), CadenceFrequency::Weekly);
        assert!(matches!(
            "fortnightly".parse::<CadenceFrequency>(),
            Err(Error::InvalidInput(_))
        ));
    }
}
