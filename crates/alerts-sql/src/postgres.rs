use super::{AlertStore, JobState, NewOutbreak};
use anyhow::Context;
use chrono::{DateTime, Utc};
use models::{
    normalize_label, AlertMarker, AlertPayload, AlertType, Coordinates, FarmerProfile, Id,
    NewNotification, Notification, NotificationPreference, OutbreakRecord, Region,
    ReporterObservation, Severity,
};
use sqlx::types::{Json, Uuid};

/// `AlertStore` backed by the Postgres tables described in `schema.sql`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RegionRow {
    id: Id,
    name: String,
    aliases: Vec<String>,
    latitude: f64,
    longitude: f64,
    utc_offset_minutes: i32,
}

impl From<RegionRow> for Region {
    fn from(row: RegionRow) -> Self {
        Region {
            id: row.id,
            name: row.name,
            aliases: row.aliases,
            coordinates: Coordinates {
                latitude: row.latitude,
                longitude: row.longitude,
            },
            utc_offset_minutes: row.utc_offset_minutes,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FarmerRow {
    user_id: Uuid,
    full_name: Option<String>,
    district: Option<String>,
    email: Option<String>,
    push_token: Option<String>,
}

impl From<FarmerRow> for FarmerProfile {
    fn from(row: FarmerRow) -> Self {
        FarmerProfile {
            user_id: row.user_id,
            full_name: row.full_name,
            district: row.district,
            email: row.email,
            push_token: row.push_token,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ObservationRow {
    id: Id,
    user_id: Uuid,
    region_id: Option<Id>,
    condition: String,
    severity: Option<Severity>,
    observed_at: DateTime<Utc>,
}

impl From<ObservationRow> for ReporterObservation {
    fn from(row: ObservationRow) -> Self {
        ReporterObservation {
            id: Some(row.id),
            user_id: row.user_id,
            region_id: row.region_id,
            condition: row.condition,
            severity: row.severity,
            observed_at: row.observed_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OutbreakRow {
    id: Id,
    region_id: Id,
    condition: String,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    reporter_count: i32,
    severity: Severity,
    active: bool,
}

impl From<OutbreakRow> for OutbreakRecord {
    fn from(row: OutbreakRow) -> Self {
        OutbreakRecord {
            id: row.id,
            region_id: row.region_id,
            condition: row.condition,
            first_seen: row.first_seen,
            last_seen: row.last_seen,
            reporter_count: row.reporter_count.max(0) as u32,
            severity: row.severity,
            active: row.active,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct NotificationRow {
    id: Id,
    user_id: Uuid,
    alert_type: AlertType,
    title: String,
    message: String,
    payload: Json<AlertPayload>,
    read: bool,
    created_at: DateTime<Utc>,
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        Notification {
            id: row.id,
            user_id: row.user_id,
            alert_type: row.alert_type,
            title: row.title,
            message: row.message,
            payload: row.payload.0,
            read: row.read,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PreferenceRow {
    user_id: Uuid,
    in_app_enabled: bool,
    push_enabled: bool,
    email_enabled: bool,
    outbreak_alerts: bool,
    weather_alerts: bool,
}

const OUTBREAK_COLUMNS: &str =
    "id, region_id, condition, first_seen, last_seen, reporter_count, severity, active";

#[async_trait::async_trait]
impl AlertStore for PgStore {
    async fn list_regions(&self) -> anyhow::Result<Vec<Region>> {
        let rows = sqlx::query_as::<_, RegionRow>(
            r#"select id, name, aliases, latitude, longitude, utc_offset_minutes
            from regions
            order by id"#,
        )
        .fetch_all(&self.pool)
        .await
        .context("listing regions")?;

        Ok(rows.into_iter().map(Region::from).collect())
    }

    async fn list_farmers(&self) -> anyhow::Result<Vec<FarmerProfile>> {
        let rows = sqlx::query_as::<_, FarmerRow>(
            r#"select user_id, full_name, district, email, push_token
            from farmer_profiles
            order by user_id"#,
        )
        .fetch_all(&self.pool)
        .await
        .context("listing farmer profiles")?;

        Ok(rows.into_iter().map(FarmerProfile::from).collect())
    }

    async fn get_farmer(&self, user_id: Uuid) -> anyhow::Result<Option<FarmerProfile>> {
        let row = sqlx::query_as::<_, FarmerRow>(
            r#"select user_id, full_name, district, email, push_token
            from farmer_profiles
            where user_id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching farmer profile")?;

        Ok(row.map(FarmerProfile::from))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn fetch_observations(
        &self,
        region_id: Id,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ReporterObservation>> {
        let rows = sqlx::query_as::<_, ObservationRow>(
            r#"select id, user_id, region_id, condition, severity, observed_at
            from reporter_observations
            where (region_id = $1 or region_id is null) and observed_at >= $2
            order by observed_at"#,
        )
        .bind(region_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("fetching reporter observations")?;

        Ok(rows.into_iter().map(ReporterObservation::from).collect())
    }

    async fn fetch_active_outbreaks(&self, region_id: Id) -> anyhow::Result<Vec<OutbreakRecord>> {
        let rows = sqlx::query_as::<_, OutbreakRow>(&format!(
            "select {OUTBREAK_COLUMNS} from outbreaks where region_id = $1 and active order by first_seen"
        ))
        .bind(region_id)
        .fetch_all(&self.pool)
        .await
        .context("fetching active outbreaks")?;

        Ok(rows.into_iter().map(OutbreakRecord::from).collect())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn insert_outbreak(
        &self,
        outbreak: NewOutbreak,
    ) -> anyhow::Result<Option<OutbreakRecord>> {
        // Relies on the partial unique index over active records.
        let row = sqlx::query_as::<_, OutbreakRow>(&format!(
            r#"insert into outbreaks (
                region_id, condition, condition_key, first_seen, last_seen,
                reporter_count, severity, active
            )
            values ($1, $2, $3, $4, $5, $6, $7, true)
            on conflict (region_id, condition_key) where active do nothing
            returning {OUTBREAK_COLUMNS}"#
        ))
        .bind(outbreak.region_id)
        .bind(&outbreak.condition)
        .bind(normalize_label(&outbreak.condition))
        .bind(outbreak.first_seen)
        .bind(outbreak.last_seen)
        .bind(outbreak.reporter_count as i32)
        .bind(outbreak.severity)
        .fetch_optional(&self.pool)
        .await
        .context("inserting outbreak")?;

        Ok(row.map(OutbreakRecord::from))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn update_outbreak(
        &self,
        id: Id,
        reporter_count: u32,
        last_seen: DateTime<Utc>,
        severity: Severity,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"update outbreaks set
                reporter_count = $2,
                last_seen = $3,
                severity = $4
            where id = $1"#,
        )
        .bind(id)
        .bind(reporter_count as i32)
        .bind(last_seen)
        .bind(severity)
        .execute(&self.pool)
        .await
        .context("updating outbreak")?;

        Ok(())
    }

    async fn list_active_outbreaks(&self) -> anyhow::Result<Vec<OutbreakRecord>> {
        let rows = sqlx::query_as::<_, OutbreakRow>(&format!(
            "select {OUTBREAK_COLUMNS} from outbreaks where active order by last_seen desc"
        ))
        .fetch_all(&self.pool)
        .await
        .context("listing active outbreaks")?;

        Ok(rows.into_iter().map(OutbreakRecord::from).collect())
    }

    async fn marker_exists(&self, marker: &AlertMarker) -> anyhow::Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"select exists(
                select 1 from alert_markers
                where subject = $1 and alert_type = $2 and day = $3
            )"#,
        )
        .bind(marker.subject.to_string())
        .bind(marker.alert_type)
        .bind(marker.day)
        .fetch_one(&self.pool)
        .await
        .context("checking alert marker")?;

        Ok(exists)
    }

    async fn insert_marker(&self, marker: &AlertMarker) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"insert into alert_markers (subject, alert_type, day)
            values ($1, $2, $3)
            on conflict (subject, alert_type, day) do nothing"#,
        )
        .bind(marker.subject.to_string())
        .bind(marker.alert_type)
        .bind(marker.day)
        .execute(&self.pool)
        .await
        .context("inserting alert marker")?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_notification(&self, notification: &NewNotification) -> anyhow::Result<Id> {
        let (id,): (Id,) = sqlx::query_as(
            r#"insert into notifications (user_id, alert_type, title, message, payload, read, created_at)
            values ($1, $2, $3, $4, $5, false, $6)
            returning id"#,
        )
        .bind(notification.user_id)
        .bind(notification.alert_type())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(Json(&notification.payload))
        .bind(notification.created_at)
        .fetch_one(&self.pool)
        .await
        .context("inserting notification")?;

        Ok(id)
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        limit: u32,
    ) -> anyhow::Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"select id, user_id, alert_type, title, message, payload, read, created_at
            from notifications
            where user_id = $1
            order by created_at desc, id desc
            limit $2"#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("listing notifications")?;

        Ok(rows.into_iter().map(Notification::from).collect())
    }

    async fn mark_notification_read(&self, user_id: Uuid, id: Id) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"update notifications set read = true
            where id = $1 and user_id = $2"#,
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("marking notification read")?;

        Ok(result.rows_affected() == 1)
    }

    async fn fetch_preferences(
        &self,
        user_id: Uuid,
    ) -> anyhow::Result<Option<NotificationPreference>> {
        let row = sqlx::query_as::<_, PreferenceRow>(
            r#"select user_id, in_app_enabled, push_enabled, email_enabled, outbreak_alerts, weather_alerts
            from notification_preferences
            where user_id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching notification preferences")?;

        Ok(row.map(|row| NotificationPreference {
            user_id: row.user_id,
            in_app_enabled: row.in_app_enabled,
            push_enabled: row.push_enabled,
            email_enabled: row.email_enabled,
            outbreak_alerts: row.outbreak_alerts,
            weather_alerts: row.weather_alerts,
        }))
    }

    async fn load_job_state(&self, job_name: &str) -> anyhow::Result<JobState> {
        let row: Option<(Json<JobState>,)> =
            sqlx::query_as(r#"select state from alert_job_states where job_name = $1"#)
                .bind(job_name)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("loading state of job {job_name}"))?;

        Ok(row.map(|(state,)| state.0).unwrap_or_default())
    }

    async fn save_job_state(&self, job_name: &str, state: &JobState) -> anyhow::Result<()> {
        sqlx::query(
            r#"insert into alert_job_states (job_name, state, updated_at)
            values ($1, $2, now())
            on conflict (job_name) do update set
                state = $2,
                updated_at = now()"#,
        )
        .bind(job_name)
        .bind(Json(state))
        .execute(&self.pool)
        .await
        .with_context(|| format!("saving state of job {job_name}"))?;

        Ok(())
    }
}
