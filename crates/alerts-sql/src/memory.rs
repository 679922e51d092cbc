use super::{AlertStore, JobState, NewOutbreak};
use chrono::{DateTime, Utc};
use models::{
    normalize_label, AlertMarker, FarmerProfile, Id, NewNotification, Notification,
    NotificationPreference, OutbreakRecord, Region, ReporterObservation, Severity,
};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tokio::sync::Mutex;

/// Reference data that a `MemoryStore` can be seeded with, as read from a
/// JSON fixture.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fixture {
    #[serde(default)]
    pub regions: Vec<Region>,
    #[serde(default)]
    pub farmers: Vec<FarmerProfile>,
    #[serde(default)]
    pub preferences: Vec<NotificationPreference>,
    #[serde(default)]
    pub observations: Vec<ReporterObservation>,
}

/// An `AlertStore` that keeps everything in process memory. It enforces the
/// same uniqueness rules as the Postgres schema, and can be told to fail
/// specific writes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    regions: Vec<Region>,
    farmers: BTreeMap<uuid::Uuid, FarmerProfile>,
    observations: Vec<ReporterObservation>,
    outbreaks: Vec<OutbreakRecord>,
    markers: BTreeSet<(String, models::AlertType, chrono::NaiveDate)>,
    notifications: Vec<Notification>,
    preferences: BTreeMap<uuid::Uuid, NotificationPreference>,
    job_states: BTreeMap<String, JobState>,

    fail_notification_writes: HashSet<uuid::Uuid>,
    fail_reads: bool,
}

impl Inner {
    fn next_id(&mut self) -> Id {
        self.next_id += 1;
        Id::from_i64(self.next_id)
    }

    fn check_reads(&self) -> anyhow::Result<()> {
        if self.fail_reads {
            anyhow::bail!("store is unavailable");
        }
        Ok(())
    }
}

fn marker_key(marker: &AlertMarker) -> (String, models::AlertType, chrono::NaiveDate) {
    (marker.subject.to_string(), marker.alert_type, marker.day)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: Fixture) -> Self {
        let mut inner = Inner::default();
        inner.regions = fixture.regions;
        inner.farmers = fixture
            .farmers
            .into_iter()
            .map(|f| (f.user_id, f))
            .collect();
        inner.preferences = fixture
            .preferences
            .into_iter()
            .map(|p| (p.user_id, p))
            .collect();
        for mut observation in fixture.observations {
            if observation.id.is_none() {
                observation.id = Some(inner.next_id());
            }
            inner.observations.push(observation);
        }
        Self {
            inner: Mutex::new(inner),
        }
    }

    pub async fn add_region(&self, region: Region) {
        self.inner.lock().await.regions.push(region);
    }

    pub async fn add_farmer(&self, farmer: FarmerProfile) {
        self.inner.lock().await.farmers.insert(farmer.user_id, farmer);
    }

    pub async fn set_preferences(&self, preferences: NotificationPreference) {
        self.inner
            .lock()
            .await
            .preferences
            .insert(preferences.user_id, preferences);
    }

    /// Stores the observation, assigning it an id if it doesn't have one.
    pub async fn add_observation(
        &self,
        mut observation: ReporterObservation,
    ) -> ReporterObservation {
        let mut inner = self.inner.lock().await;
        if observation.id.is_none() {
            observation.id = Some(inner.next_id());
        }
        inner.observations.push(observation.clone());
        observation
    }

    /// Causes subsequent notification writes for `user_id` to fail.
    pub async fn fail_notification_writes_for(&self, user_id: uuid::Uuid) {
        self.inner.lock().await.fail_notification_writes.insert(user_id);
    }

    /// Causes subsequent reads of reference data to fail.
    pub async fn set_fail_reads(&self, fail: bool) {
        self.inner.lock().await.fail_reads = fail;
    }

    /// Returns every outbreak record, active or not, in creation order.
    pub async fn all_outbreaks(&self) -> Vec<OutbreakRecord> {
        self.inner.lock().await.outbreaks.clone()
    }

    /// Returns every notification, in creation order.
    pub async fn all_notifications(&self) -> Vec<Notification> {
        self.inner.lock().await.notifications.clone()
    }

    pub async fn marker_count(&self) -> usize {
        self.inner.lock().await.markers.len()
    }
}

#[async_trait::async_trait]
impl AlertStore for MemoryStore {
    async fn list_regions(&self) -> anyhow::Result<Vec<Region>> {
        let inner = self.inner.lock().await;
        inner.check_reads()?;
        Ok(inner.regions.clone())
    }

    async fn list_farmers(&self) -> anyhow::Result<Vec<FarmerProfile>> {
        let inner = self.inner.lock().await;
        inner.check_reads()?;
        Ok(inner.farmers.values().cloned().collect())
    }

    async fn get_farmer(&self, user_id: uuid::Uuid) -> anyhow::Result<Option<FarmerProfile>> {
        let inner = self.inner.lock().await;
        inner.check_reads()?;
        Ok(inner.farmers.get(&user_id).cloned())
    }

    async fn fetch_observations(
        &self,
        region_id: Id,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ReporterObservation>> {
        let inner = self.inner.lock().await;
        inner.check_reads()?;

        let mut observations: Vec<_> = inner
            .observations
            .iter()
            .filter(|o| {
                o.region_id.map_or(true, |r| r == region_id) && o.observed_at >= since
            })
            .cloned()
            .collect();
        observations.sort_by_key(|o| o.observed_at);
        Ok(observations)
    }

    async fn fetch_active_outbreaks(&self, region_id: Id) -> anyhow::Result<Vec<OutbreakRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .outbreaks
            .iter()
            .filter(|o| o.active && o.region_id == region_id)
            .cloned()
            .collect())
    }

    async fn insert_outbreak(
        &self,
        outbreak: NewOutbreak,
    ) -> anyhow::Result<Option<OutbreakRecord>> {
        let mut inner = self.inner.lock().await;

        let key = normalize_label(&outbreak.condition);
        if inner.outbreaks.iter().any(|o| {
            o.active && o.region_id == outbreak.region_id && normalize_label(&o.condition) == key
        }) {
            return Ok(None);
        }

        let record = OutbreakRecord {
            id: inner.next_id(),
            region_id: outbreak.region_id,
            condition: outbreak.condition,
            first_seen: outbreak.first_seen,
            last_seen: outbreak.last_seen,
            reporter_count: outbreak.reporter_count,
            severity: outbreak.severity,
            active: true,
        };
        inner.outbreaks.push(record.clone());
        Ok(Some(record))
    }

    async fn update_outbreak(
        &self,
        id: Id,
        reporter_count: u32,
        last_seen: DateTime<Utc>,
        severity: Severity,
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.outbreaks.iter_mut().find(|o| o.id == id) else {
            anyhow::bail!("outbreak {id} does not exist");
        };
        record.reporter_count = reporter_count;
        record.last_seen = last_seen;
        record.severity = severity;
        Ok(())
    }

    async fn list_active_outbreaks(&self) -> anyhow::Result<Vec<OutbreakRecord>> {
        let inner = self.inner.lock().await;
        inner.check_reads()?;

        let mut active: Vec<_> = inner.outbreaks.iter().filter(|o| o.active).cloned().collect();
        active.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(active)
    }

    async fn marker_exists(&self, marker: &AlertMarker) -> anyhow::Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner.markers.contains(&marker_key(marker)))
    }

    async fn insert_marker(&self, marker: &AlertMarker) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner.markers.insert(marker_key(marker)))
    }

    async fn insert_notification(&self, notification: &NewNotification) -> anyhow::Result<Id> {
        let mut inner = self.inner.lock().await;
        if inner.fail_notification_writes.contains(&notification.user_id) {
            anyhow::bail!("inserting notification for {}: connection reset", notification.user_id);
        }

        let id = inner.next_id();
        inner.notifications.push(Notification {
            id,
            user_id: notification.user_id,
            alert_type: notification.alert_type(),
            title: notification.title.clone(),
            message: notification.message.clone(),
            payload: notification.payload.clone(),
            read: false,
            created_at: notification.created_at,
        });
        Ok(id)
    }

    async fn list_notifications(
        &self,
        user_id: uuid::Uuid,
        limit: u32,
    ) -> anyhow::Result<Vec<Notification>> {
        let inner = self.inner.lock().await;
        inner.check_reads()?;

        let mut notifications: Vec<_> = inner
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        // Ids are assigned in insertion order, which breaks ties between equal timestamps.
        notifications
            .sort_by(|a, b| (b.created_at, b.id.as_i64()).cmp(&(a.created_at, a.id.as_i64())));
        notifications.truncate(limit as usize);
        Ok(notifications)
    }

    async fn mark_notification_read(&self, user_id: uuid::Uuid, id: Id) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner
            .notifications
            .iter_mut()
            .find(|n| n.id == id && n.user_id == user_id)
        {
            Some(notification) => {
                notification.read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn fetch_preferences(
        &self,
        user_id: uuid::Uuid,
    ) -> anyhow::Result<Option<NotificationPreference>> {
        let inner = self.inner.lock().await;
        Ok(inner.preferences.get(&user_id).cloned())
    }

    async fn load_job_state(&self, job_name: &str) -> anyhow::Result<JobState> {
        let inner = self.inner.lock().await;
        Ok(inner.job_states.get(job_name).cloned().unwrap_or_default())
    }

    async fn save_job_state(&self, job_name: &str, state: &JobState) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.job_states.insert(job_name.to_string(), state.clone());
        Ok(())
    }
}
