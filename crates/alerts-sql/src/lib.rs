//! Access to the relational store that holds regions, farmer profiles,
//! reporter observations, and the alerting engine's own durable state:
//! outbreak records, delivered-alert markers, notifications, and job state.
use chrono::{DateTime, Utc};
use models::{
    AlertMarker, FarmerProfile, Id, NewNotification, Notification, NotificationPreference,
    OutbreakRecord, Region, ReporterObservation, Severity,
};
use serde::{Deserialize, Serialize};

mod memory;
mod postgres;

pub use memory::{Fixture, MemoryStore};
pub use postgres::PgStore;

/// An outbreak record that's about to be created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutbreak {
    pub region_id: Id,
    pub condition: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub reporter_count: u32,
    pub severity: Severity,
}

/// Persisted state of a periodic job, keyed by job name. This is the single
/// source of truth for when a job last ran and how it went.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_completed: Option<DateTime<Utc>>,
    /// Summary of the most recent completed run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_summary: Option<serde_json::Value>,
    /// Number of runs in a row that failed to complete.
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A trait for giving the alerting engine access to the database. This makes
/// it possible to test the engine against an in-memory store.
///
/// Methods that guard an invariant of the store return whether their write
/// took effect, so that callers can tell when a concurrent writer got there
/// first.
#[async_trait::async_trait]
pub trait AlertStore: Send + Sync {
    async fn list_regions(&self) -> anyhow::Result<Vec<Region>>;

    async fn list_farmers(&self) -> anyhow::Result<Vec<FarmerProfile>>;

    async fn get_farmer(&self, user_id: uuid::Uuid) -> anyhow::Result<Option<FarmerProfile>>;

    /// Returns all observations at or after `since` that are either in the
    /// region or have no region at all. Observations without a region belong
    /// to whichever region their reporter's profile resolves to, which the
    /// caller determines.
    async fn fetch_observations(
        &self,
        region_id: Id,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ReporterObservation>>;

    async fn fetch_active_outbreaks(&self, region_id: Id) -> anyhow::Result<Vec<OutbreakRecord>>;

    /// Creates an active outbreak record. Returns `None` if an active record
    /// for the same region and normalized condition label already exists.
    async fn insert_outbreak(&self, outbreak: NewOutbreak)
        -> anyhow::Result<Option<OutbreakRecord>>;

    async fn update_outbreak(
        &self,
        id: Id,
        reporter_count: u32,
        last_seen: DateTime<Utc>,
        severity: Severity,
    ) -> anyhow::Result<()>;

    async fn list_active_outbreaks(&self) -> anyhow::Result<Vec<OutbreakRecord>>;

    async fn marker_exists(&self, marker: &AlertMarker) -> anyhow::Result<bool>;

    /// Writes the marker, returning `false` if it already existed.
    async fn insert_marker(&self, marker: &AlertMarker) -> anyhow::Result<bool>;

    async fn insert_notification(&self, notification: &NewNotification) -> anyhow::Result<Id>;

    /// Returns the user's notifications, most recent first.
    async fn list_notifications(
        &self,
        user_id: uuid::Uuid,
        limit: u32,
    ) -> anyhow::Result<Vec<Notification>>;

    /// Marks a notification as read, returning `false` if the user has no
    /// such notification.
    async fn mark_notification_read(&self, user_id: uuid::Uuid, id: Id) -> anyhow::Result<bool>;

    async fn fetch_preferences(
        &self,
        user_id: uuid::Uuid,
    ) -> anyhow::Result<Option<NotificationPreference>>;

    async fn load_job_state(&self, job_name: &str) -> anyhow::Result<JobState>;

    async fn save_job_state(&self, job_name: &str, state: &JobState) -> anyhow::Result<()>;
}
