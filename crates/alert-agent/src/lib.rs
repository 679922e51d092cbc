//! Geo-scoped alerting for farmers: weather threshold alerts and disease
//! outbreak detection, delivered as in-app notifications, push messages
//! and emails.
pub mod api;
pub mod dedup;
pub mod fanout;
pub mod forecast;
pub mod geo;
pub mod outbreaks;
pub mod rules;
pub mod weather;

#[cfg(test)]
mod integration_tests;

pub use fanout::{
    DeliveryState, EmailSender, Fanout, FanoutReport, PushMessage, PushSender, Pusher,
    RecipientOutcome, RetryPolicy, Sender, SkipReason,
};
pub use forecast::{ForecastError, ForecastProvider, OpenMeteo};
pub use outbreaks::OutbreakOutcome;
pub use weather::{WeatherRunSummary, WEATHER_JOB};

use alerts_sql::{AlertStore, JobState};
use chrono::{DateTime, Utc};
use models::ReporterObservation;

/// Ties together the forecast provider and notification fanout that both
/// kinds of alerts run through.
#[derive(Debug)]
pub struct Engine<F, ES, PS> {
    forecasts: F,
    fanout: Fanout<ES, PS>,
    region_concurrency: usize,
}

impl<F: ForecastProvider, ES: EmailSender, PS: PushSender> Engine<F, ES, PS> {
    pub fn new(forecasts: F, fanout: Fanout<ES, PS>, region_concurrency: usize) -> Self {
        Self {
            forecasts,
            fanout,
            region_concurrency,
        }
    }

    pub fn store(&self) -> &dyn AlertStore {
        self.fanout.store()
    }

    /// Evaluates weather alerts for all regions as of `now`.
    pub async fn run_weather(&self, now: DateTime<Utc>) -> anyhow::Result<WeatherRunSummary> {
        weather::run(&self.forecasts, &self.fanout, self.region_concurrency, now).await
    }

    /// Checks whether a new reporter observation creates or updates an outbreak.
    pub async fn check_observation(
        &self,
        observation: &ReporterObservation,
        now: DateTime<Utc>,
    ) -> anyhow::Result<OutbreakOutcome> {
        outbreaks::check_observation(&self.fanout, observation, now).await
    }

    pub async fn weather_job_state(&self) -> anyhow::Result<JobState> {
        self.store().load_job_state(WEATHER_JOB).await
    }
}
