use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Id;

/// How severe an observed condition or outbreak is. Ordered from least to
/// most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Severity {
    pub fn name(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn from_str(name: &str) -> Option<Severity> {
        [
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ]
        .into_iter()
        .find(|s| name.trim().eq_ignore_ascii_case(s.name()))
    }
}

#[cfg(feature = "sqlx-support")]
impl sqlx::Type<sqlx::postgres::Postgres> for Severity {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <&str as sqlx::Type<sqlx::postgres::Postgres>>::type_info()
    }
}

#[cfg(feature = "sqlx-support")]
impl sqlx::Encode<'_, sqlx::postgres::Postgres> for Severity {
    fn encode_by_ref(&self, buf: &mut sqlx::postgres::PgArgumentBuffer) -> sqlx::encode::IsNull {
        <&str as sqlx::Encode<'_, sqlx::Postgres>>::encode_by_ref(&self.name(), buf)
    }
}

#[cfg(feature = "sqlx-support")]
impl sqlx::Decode<'_, sqlx::postgres::Postgres> for Severity {
    fn decode(value: sqlx::postgres::PgValueRef<'_>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::postgres::Postgres>>::decode(value)?;
        Severity::from_str(s).ok_or_else(|| format!("Invalid severity: {}", s).into())
    }
}

/// One user's report of a named condition, as recorded by the upstream
/// diagnosis flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReporterObservation {
    /// Absent when the observation is submitted before it has been stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    pub user_id: uuid::Uuid,
    /// The region of the observation. When absent, the region is resolved
    /// from the reporter's profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_id: Option<Id>,
    /// Free-text condition label, such as a disease name.
    pub condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    pub observed_at: DateTime<Utc>,
}

/// A detected cluster of independent reports of the same condition in one
/// region. At most one record per (region, condition) is active at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutbreakRecord {
    pub id: Id,
    pub region_id: Id,
    pub condition: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub reporter_count: u32,
    pub severity: Severity,
    pub active: bool,
}
