//! Fixed threshold rules over a region's next-day forecast. Rules are
//! independent, and each satisfied rule yields exactly one candidate.
use chrono::{NaiveDate, NaiveDateTime};
use models::{AlertPayload, DailyForecast, Forecast, HourlyForecast, Id, WeatherAlertCandidate};

/// Heavy rain fires at or above this precipitation total, in millimeters.
pub const HEAVY_RAIN_MM: f64 = 25.0;
/// Heavy rain also fires at or above this precipitation probability, in percent.
pub const HEAVY_RAIN_PROBABILITY: f64 = 80.0;
/// Heat stress fires at or above this maximum temperature, in Celsius.
pub const HEAT_STRESS_TEMP_MAX: f64 = 35.0;
/// Cold stress fires at or below this minimum temperature, in Celsius.
pub const COLD_STRESS_TEMP_MIN: f64 = 5.0;
/// Spraying requires a precipitation probability strictly below this, in percent.
pub const SPRAY_MAX_PROBABILITY: f64 = 20.0;
/// Spraying requires wind strictly below this speed, in km/h.
pub const SPRAY_MAX_WIND_KMH: f64 = 8.0;
/// Minimum run of consecutive suitable hours for a safe spray window.
pub const SPRAY_MIN_HOURS: usize = 6;

/// Evaluates all rules against the forecast for `target_day`. Returns `None`
/// if the forecast doesn't cover that day, in which case no alerts can be
/// produced for the region.
pub fn evaluate(
    region_id: Id,
    forecast: &Forecast,
    target_day: NaiveDate,
) -> Option<Vec<WeatherAlertCandidate>> {
    let day = forecast.day(target_day)?;
    let hours: Vec<&HourlyForecast> = forecast.hours_on(target_day).collect();

    let candidates = evaluate_day(day, &hours)
        .into_iter()
        .map(|payload| WeatherAlertCandidate {
            region_id,
            target_day,
            payload,
        })
        .collect();

    Some(candidates)
}

fn evaluate_day(day: &DailyForecast, hours: &[&HourlyForecast]) -> Vec<AlertPayload> {
    let mut out = Vec::new();

    if day.precipitation_mm >= HEAVY_RAIN_MM
        || day.precipitation_probability >= HEAVY_RAIN_PROBABILITY
    {
        out.push(AlertPayload::HeavyRain {
            rain_mm: day.precipitation_mm,
            probability: day.precipitation_probability,
        });
    }
    if day.temp_max >= HEAT_STRESS_TEMP_MAX {
        out.push(AlertPayload::HeatStress {
            temp_max: day.temp_max,
        });
    }
    if day.temp_min <= COLD_STRESS_TEMP_MIN {
        out.push(AlertPayload::ColdStress {
            temp_min: day.temp_min,
        });
    }
    if day.precipitation_probability < SPRAY_MAX_PROBABILITY
        && day.wind_max_kmh < SPRAY_MAX_WIND_KMH
    {
        if let Some(window) = spray_window(hours) {
            out.push(window);
        }
    }

    out
}

fn suitable_for_spraying(hour: &HourlyForecast) -> bool {
    hour.precipitation_probability < SPRAY_MAX_PROBABILITY && hour.wind_kmh < SPRAY_MAX_WIND_KMH
}

/// Finds the first run of at least `SPRAY_MIN_HOURS` consecutive suitable
/// hours, extended for as long as conditions hold. Gaps in the hourly data
/// break a run.
fn spray_window(hours: &[&HourlyForecast]) -> Option<AlertPayload> {
    let one_hour = chrono::Duration::hours(1);
    let mut run: Vec<&HourlyForecast> = Vec::new();

    let finish = |run: &[&HourlyForecast]| -> Option<AlertPayload> {
        if run.len() < SPRAY_MIN_HOURS {
            return None;
        }
        let first = run.first()?;
        let last = run.last()?;
        let window_end: NaiveDateTime = last.time + one_hour;

        Some(AlertPayload::SafeSprayWindow {
            window_start: first.time,
            window_end,
            hours: run.len() as u32,
            probability: run.iter().map(|h| h.precipitation_probability).fold(0.0, f64::max),
            wind_max: run.iter().map(|h| h.wind_kmh).fold(0.0, f64::max),
        })
    };

    for hour in hours {
        let contiguous = run.last().map_or(true, |prev| prev.time + one_hour == hour.time);

        if suitable_for_spraying(hour) && contiguous {
            run.push(hour);
            continue;
        }
        if let Some(window) = finish(&run) {
            return Some(window);
        }
        run.clear();
        if suitable_for_spraying(hour) {
            run.push(hour);
        }
    }
    finish(&run)
}
