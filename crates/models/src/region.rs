use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::Id;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// A named geographic unit (district-equivalent). Regions are reference data,
/// and are never modified by the alerting engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: Id,
    /// Display name of the region, which is also matched against the
    /// district that users enter in their profiles.
    pub name: String,
    /// Alternate spellings of the name that should resolve to this region.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Representative coordinates, used for forecast requests.
    pub coordinates: Coordinates,
    /// Fixed UTC offset of the region's local time.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Region {
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Returns the calendar day that `ts` falls on in the region's local time.
    pub fn local_day(&self, ts: DateTime<Utc>) -> NaiveDate {
        ts.with_timezone(&self.offset()).date_naive()
    }
}

/// The subset of a user's farmer profile that the alerting engine consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmerProfile {
    pub user_id: uuid::Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    /// Free-text district as entered by the user, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Device token for push delivery, if the user registered a device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_token: Option<String>,
}
