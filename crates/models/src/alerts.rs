use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Id, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    HeavyRain,
    HeatStress,
    ColdStress,
    SafeSprayWindow,
    OutbreakAlert,
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl AlertType {
    pub fn name(&self) -> &'static str {
        match self {
            AlertType::HeavyRain => "heavy_rain",
            AlertType::HeatStress => "heat_stress",
            AlertType::ColdStress => "cold_stress",
            AlertType::SafeSprayWindow => "safe_spray_window",
            AlertType::OutbreakAlert => "outbreak_alert",
        }
    }

    pub fn all() -> &'static [AlertType] {
        &[
            AlertType::HeavyRain,
            AlertType::HeatStress,
            AlertType::ColdStress,
            AlertType::SafeSprayWindow,
            AlertType::OutbreakAlert,
        ]
    }

    pub fn from_str(name: &str) -> Option<AlertType> {
        for alert_type in AlertType::all() {
            if name.eq_ignore_ascii_case(alert_type.name()) {
                return Some(*alert_type);
            }
        }
        None
    }

    /// The preference category that gates push and email delivery of this alert type.
    pub fn category(&self) -> AlertCategory {
        match self {
            AlertType::HeavyRain
            | AlertType::HeatStress
            | AlertType::ColdStress
            | AlertType::SafeSprayWindow => AlertCategory::Weather,
            AlertType::OutbreakAlert => AlertCategory::Outbreak,
        }
    }
}

#[cfg(feature = "sqlx-support")]
impl sqlx::Type<sqlx::postgres::Postgres> for AlertType {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <&str as sqlx::Type<sqlx::postgres::Postgres>>::type_info()
    }
}

#[cfg(feature = "sqlx-support")]
impl sqlx::Encode<'_, sqlx::postgres::Postgres> for AlertType {
    fn encode_by_ref(&self, buf: &mut sqlx::postgres::PgArgumentBuffer) -> sqlx::encode::IsNull {
        <&str as sqlx::Encode<'_, sqlx::Postgres>>::encode_by_ref(&self.name(), buf)
    }
}

#[cfg(feature = "sqlx-support")]
impl sqlx::Decode<'_, sqlx::postgres::Postgres> for AlertType {
    fn decode(value: sqlx::postgres::PgValueRef<'_>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::postgres::Postgres>>::decode(value)?;
        AlertType::from_str(s).ok_or_else(|| format!("Invalid alert_type: {}", s).into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    Weather,
    Outbreak,
}

/// Structured details of an alert, one variant per alert type. This is what
/// gets stored as the `payload` of each notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertPayload {
    HeavyRain {
        /// Forecast precipitation total for the day, in millimeters.
        rain_mm: f64,
        /// Forecast maximum precipitation probability, in percent.
        probability: f64,
    },
    HeatStress {
        temp_max: f64,
    },
    ColdStress {
        temp_min: f64,
    },
    SafeSprayWindow {
        /// Local start of the first qualifying run of hours.
        window_start: NaiveDateTime,
        /// Local end (exclusive) of that run.
        window_end: NaiveDateTime,
        hours: u32,
        probability: f64,
        wind_max: f64,
    },
    OutbreakAlert {
        outbreak_id: Id,
        condition: String,
        region: String,
        reporter_count: u32,
        severity: Severity,
        first_seen: DateTime<Utc>,
    },
}

impl AlertPayload {
    pub fn alert_type(&self) -> AlertType {
        match self {
            AlertPayload::HeavyRain { .. } => AlertType::HeavyRain,
            AlertPayload::HeatStress { .. } => AlertType::HeatStress,
            AlertPayload::ColdStress { .. } => AlertType::ColdStress,
            AlertPayload::SafeSprayWindow { .. } => AlertType::SafeSprayWindow,
            AlertPayload::OutbreakAlert { .. } => AlertType::OutbreakAlert,
        }
    }
}

/// A weather alert computed from one run's forecast data. Candidates are never
/// stored: they're checked against delivered-alert markers and then turned
/// into notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherAlertCandidate {
    pub region_id: Id,
    /// The forecast day that the alert pertains to.
    pub target_day: NaiveDate,
    pub payload: AlertPayload,
}

impl WeatherAlertCandidate {
    pub fn alert_type(&self) -> AlertType {
        self.payload.alert_type()
    }
}

/// The thing that an alert was delivered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Subject {
    User(uuid::Uuid),
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subject::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// The existence of a marker means that an alert of `alert_type` was already
/// created for `subject` on `day`. There is at most one marker per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertMarker {
    pub subject: Subject,
    pub alert_type: AlertType,
    pub day: NaiveDate,
}
