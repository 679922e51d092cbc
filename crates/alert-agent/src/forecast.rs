use chrono::{NaiveDate, NaiveDateTime};
use models::{DailyForecast, Forecast, HourlyForecast, Region};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Reasons that forecast data is unavailable for a region. Any of these
/// causes the region to be skipped for the current run.
#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    #[error("requesting forecast")]
    Http(#[from] reqwest::Error),
    #[error("forecast provider responded with {0}")]
    Status(reqwest::StatusCode),
    #[error("forecast request timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed forecast: {0}")]
    Malformed(String),
}

/// Fetches a short-range forecast for a region.
pub trait ForecastProvider: std::fmt::Debug + Send + Sync + 'static {
    fn fetch<'s>(
        &'s self,
        region: &'s Region,
    ) -> impl std::future::Future<Output = Result<Forecast, ForecastError>> + Send + 's;
}

/// Client of the Open-Meteo forecast API.
#[derive(Debug, Clone)]
pub struct OpenMeteo {
    client: reqwest::Client,
    base_url: url::Url,
    forecast_days: u8,
    timeout: Duration,
}

const HOURLY_FIELDS: &str = "temperature_2m,precipitation,precipitation_probability,wind_speed_10m";
const DAILY_FIELDS: &str = "temperature_2m_max,temperature_2m_min,precipitation_sum,precipitation_probability_max,wind_speed_10m_max";

impl OpenMeteo {
    pub fn new(
        client: reqwest::Client,
        base_url: url::Url,
        forecast_days: u8,
        timeout: Duration,
    ) -> OpenMeteo {
        OpenMeteo {
            client,
            base_url,
            forecast_days,
            timeout,
        }
    }

    fn request_url(&self, region: &Region) -> url::Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("latitude", &region.coordinates.latitude.to_string())
            .append_pair("longitude", &region.coordinates.longitude.to_string())
            .append_pair("hourly", HOURLY_FIELDS)
            .append_pair("daily", DAILY_FIELDS)
            .append_pair("forecast_days", &self.forecast_days.to_string())
            .append_pair("wind_speed_unit", "kmh")
            .append_pair("timezone", "auto");
        url
    }

    async fn fetch_unbounded(&self, region: &Region) -> Result<Forecast, ForecastError> {
        let response = self
            .client
            .get(self.request_url(region))
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ForecastError::Status(status));
        }
        let body = response.bytes().await?;
        let response: Response = serde_json::from_slice(&body)
            .map_err(|err| ForecastError::Malformed(err.to_string()))?;

        parse_response(response)
    }
}

impl ForecastProvider for OpenMeteo {
    async fn fetch<'s>(&'s self, region: &'s Region) -> Result<Forecast, ForecastError> {
        // Bounds the whole exchange, including connection setup.
        match tokio::time::timeout(self.timeout, self.fetch_unbounded(region)).await {
            Ok(Err(ForecastError::Http(err))) if err.is_timeout() => {
                Err(ForecastError::Timeout(self.timeout))
            }
            Ok(result) => result,
            Err(_elapsed) => Err(ForecastError::Timeout(self.timeout)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Response {
    hourly: HourlySeries,
    daily: DailySeries,
}

#[derive(Debug, Deserialize)]
struct HourlySeries {
    time: Vec<String>,
    temperature_2m: Vec<Option<f64>>,
    precipitation: Vec<Option<f64>>,
    precipitation_probability: Vec<Option<f64>>,
    wind_speed_10m: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct DailySeries {
    time: Vec<String>,
    temperature_2m_max: Vec<Option<f64>>,
    temperature_2m_min: Vec<Option<f64>>,
    precipitation_sum: Vec<Option<f64>>,
    precipitation_probability_max: Vec<Option<f64>>,
    wind_speed_10m_max: Vec<Option<f64>>,
}

fn value(series: &[Option<f64>], index: usize, field: &str) -> Result<f64, ForecastError> {
    match series.get(index) {
        Some(Some(v)) if v.is_finite() => Ok(*v),
        _ => Err(ForecastError::Malformed(format!(
            "missing value for {field} at index {index}"
        ))),
    }
}

fn check_lengths(
    what: &str,
    expect: usize,
    lengths: &[(&str, usize)],
) -> Result<(), ForecastError> {
    for (field, len) in lengths {
        if *len != expect {
            return Err(ForecastError::Malformed(format!(
                "{what} field {field} has {len} values, expected {expect}"
            )));
        }
    }
    Ok(())
}

fn parse_response(response: Response) -> Result<Forecast, ForecastError> {
    let Response { hourly, daily } = response;

    check_lengths(
        "hourly",
        hourly.time.len(),
        &[
            ("temperature_2m", hourly.temperature_2m.len()),
            ("precipitation", hourly.precipitation.len()),
            ("precipitation_probability", hourly.precipitation_probability.len()),
            ("wind_speed_10m", hourly.wind_speed_10m.len()),
        ],
    )?;
    check_lengths(
        "daily",
        daily.time.len(),
        &[
            ("temperature_2m_max", daily.temperature_2m_max.len()),
            ("temperature_2m_min", daily.temperature_2m_min.len()),
            ("precipitation_sum", daily.precipitation_sum.len()),
            ("precipitation_probability_max", daily.precipitation_probability_max.len()),
            ("wind_speed_10m_max", daily.wind_speed_10m_max.len()),
        ],
    )?;

    let mut forecast = Forecast::default();

    for (i, time) in daily.time.iter().enumerate() {
        let date = NaiveDate::parse_from_str(time, "%Y-%m-%d")
            .map_err(|err| ForecastError::Malformed(format!("daily time {time:?}: {err}")))?;

        forecast.daily.push(DailyForecast {
            date,
            temp_max: value(&daily.temperature_2m_max, i, "temperature_2m_max")?,
            temp_min: value(&daily.temperature_2m_min, i, "temperature_2m_min")?,
            precipitation_mm: value(&daily.precipitation_sum, i, "precipitation_sum")?,
            precipitation_probability: value(
                &daily.precipitation_probability_max,
                i,
                "precipitation_probability_max",
            )?,
            wind_max_kmh: value(&daily.wind_speed_10m_max, i, "wind_speed_10m_max")?,
        });
    }

    for (i, time) in hourly.time.iter().enumerate() {
        let time = NaiveDateTime::parse_from_str(time, "%Y-%m-%dT%H:%M")
            .map_err(|err| ForecastError::Malformed(format!("hourly time {time:?}: {err}")))?;

        forecast.hourly.push(HourlyForecast {
            time,
            temperature: value(&hourly.temperature_2m, i, "temperature_2m")?,
            precipitation_mm: value(&hourly.precipitation, i, "precipitation")?,
            precipitation_probability: value(
                &hourly.precipitation_probability,
                i,
                "precipitation_probability",
            )?,
            wind_kmh: value(&hourly.wind_speed_10m, i, "wind_speed_10m")?,
        });
    }

    Ok(forecast)
}
