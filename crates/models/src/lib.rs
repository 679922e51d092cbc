//! Domain types shared by the alerting engine, its store, and notification
//! rendering.
mod alerts;
mod forecast;
mod id;
mod notification;
mod outbreak;
mod region;

pub use alerts::{
    AlertCategory, AlertMarker, AlertPayload, AlertType, Subject, WeatherAlertCandidate,
};
pub use forecast::{DailyForecast, Forecast, HourlyForecast};
pub use id::Id;
pub use notification::{NewNotification, Notification, NotificationPreference};
pub use outbreak::{OutbreakRecord, ReporterObservation, Severity};
pub use region::{Coordinates, FarmerProfile, Region};

use caseless::Caseless;
use unicode_normalization::UnicodeNormalization;

/// Map input characters (e.x. String::chars()) into its collated form,
/// which ignores casing and is unicode-normalized.
/// This follows the conformance guidelines in:
/// http://www.unicode.org/versions/Unicode13.0.0/ch03.pdf
/// in Section 3.13 - "Default Caseless Matching" (all the way at the bottom).
pub fn collate<I>(i: I) -> impl Iterator<Item = char>
where
    I: Iterator<Item = char>,
{
    i.nfd().default_case_fold().nfkc()
}

/// Collates `s` and collapses runs of whitespace, producing the form that
/// user-entered labels and district names are compared in.
pub fn normalize_label(s: &str) -> String {
    let collated: String = collate(s.chars()).collect();
    collated.split_whitespace().collect::<Vec<_>>().join(" ")
}
