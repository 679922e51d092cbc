use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Aggregated forecast for a single local calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyForecast {
    pub date: NaiveDate,
    /// Degrees Celsius.
    pub temp_max: f64,
    /// Degrees Celsius.
    pub temp_min: f64,
    /// Total precipitation, in millimeters.
    pub precipitation_mm: f64,
    /// Maximum precipitation probability over the day, in percent.
    pub precipitation_probability: f64,
    /// Maximum wind speed over the day, in km/h.
    pub wind_max_kmh: f64,
}

/// Forecast for a single local hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyForecast {
    /// Local start time of the hour.
    pub time: NaiveDateTime,
    pub temperature: f64,
    pub precipitation_mm: f64,
    pub precipitation_probability: f64,
    pub wind_kmh: f64,
}

/// A short-range forecast for one location. Times are in the location's
/// local time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Forecast {
    pub daily: Vec<DailyForecast>,
    pub hourly: Vec<HourlyForecast>,
}

impl Forecast {
    /// Returns the daily summary for `day`, if the forecast covers it.
    pub fn day(&self, day: NaiveDate) -> Option<&DailyForecast> {
        self.daily.iter().find(|d| d.date == day)
    }

    /// Returns the hourly entries that fall on `day`, in order.
    pub fn hours_on(&self, day: NaiveDate) -> impl Iterator<Item = &HourlyForecast> {
        self.hourly.iter().filter(move |h| h.time.date() == day)
    }
}
