use crate::{Engine, EmailSender, ForecastProvider, OutbreakOutcome, PushSender, WeatherRunSummary};
use alerts_sql::JobState;
use axum::{
    extract::{FromRequest, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use derivative::Derivative;
use models::{Id, Notification, OutbreakRecord, ReporterObservation};
use std::sync::Arc;

mod error;

pub use error::ApiError;

/// Request wraps a JSON-deserialized request type T which
/// also implements the `Validate` trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct Request<T>(pub T);

/// Checks a deserialized request body for values that are well-formed but
/// not acceptable.
pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}

impl Validate for ReporterObservation {
    fn validate(&self) -> Result<(), String> {
        if self.condition.trim().is_empty() {
            return Err("condition must not be empty".to_string());
        }
        Ok(())
    }
}

/// Rejection is an error type of reasons why an API request may fail.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error("{0}")]
    ValidationError(String),
    #[error(transparent)]
    JsonError(#[from] axum::extract::rejection::JsonRejection),
}

/// Default and maximum number of notifications returned per request.
const DEFAULT_NOTIFICATION_LIMIT: u32 = 50;
const MAX_NOTIFICATION_LIMIT: u32 = 200;

#[derive(Derivative)]
#[derivative(Debug)]
pub struct App<F, ES, PS> {
    engine: Engine<F, ES, PS>,
    #[derivative(Debug = "ignore")]
    service_token: String,
    #[derivative(Debug = "ignore")]
    current_time: fn() -> DateTime<Utc>,
}

impl<F, ES, PS> App<F, ES, PS> {
    pub fn new(engine: Engine<F, ES, PS>, service_token: String) -> Self {
        Self {
            engine,
            service_token,
            current_time: Utc::now,
        }
    }

    /// Replaces the clock that handlers use to determine the current time.
    pub fn with_clock(self, current_time: fn() -> DateTime<Utc>) -> Self {
        Self {
            current_time,
            ..self
        }
    }
}

/// Build the alert agent's API router. All routes except `/healthz` require
/// the shared service token as a bearer token.
pub fn build_router<F, ES, PS>(app: Arc<App<F, ES, PS>>) -> axum::Router<()>
where
    F: ForecastProvider,
    ES: EmailSender,
    PS: PushSender,
{
    use axum::routing::{get, post};

    let authorized = axum::Router::new()
        .route(
            "/jobs/weather-alerts",
            post(run_weather_job::<F, ES, PS>).get(get_weather_job::<F, ES, PS>),
        )
        .route(
            "/observations/outbreak-check",
            post(check_outbreak::<F, ES, PS>),
        )
        .route("/outbreaks", get(list_outbreaks::<F, ES, PS>))
        .route(
            "/users/{user_id}/notifications",
            get(list_notifications::<F, ES, PS>),
        )
        .route(
            "/users/{user_id}/notifications/{id}/read",
            post(mark_notification_read::<F, ES, PS>),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            app.clone(),
            authorize::<F, ES, PS>,
        ));

    axum::Router::new()
        .route("/healthz", get(healthz))
        .merge(authorized)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(app)
}

impl<T, S> FromRequest<S> for Request<T>
where
    T: serde::de::DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = Rejection;

    async fn from_request(req: axum::extract::Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate().map_err(Rejection::ValidationError)?;
        Ok(Request(value))
    }
}

impl axum::response::IntoResponse for Rejection {
    fn into_response(self) -> axum::response::Response {
        ApiError::from(self).into_response()
    }
}

// Middleware which checks for the shared service token before proceeding.
async fn authorize<F, ES, PS>(
    State(app): State<Arc<App<F, ES, PS>>>,
    bearer: Option<
        axum_extra::TypedHeader<
            axum_extra::headers::Authorization<axum_extra::headers::authorization::Bearer>,
        >,
    >,
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response
where
    F: ForecastProvider,
    ES: EmailSender,
    PS: PushSender,
{
    let authorized = match &bearer {
        Some(axum_extra::TypedHeader(auth)) => {
            !app.service_token.is_empty() && auth.token() == app.service_token
        }
        None => false,
    };
    if !authorized {
        return ApiError::new(
            StatusCode::UNAUTHORIZED,
            anyhow::anyhow!("missing or invalid service token"),
        )
        .into_response();
    }
    next.run(req).await
}

async fn healthz() -> &'static str {
    "ok"
}

async fn run_weather_job<F, ES, PS>(
    State(app): State<Arc<App<F, ES, PS>>>,
) -> Result<Json<WeatherRunSummary>, ApiError>
where
    F: ForecastProvider,
    ES: EmailSender,
    PS: PushSender,
{
    let now = (app.current_time)();
    let summary = app.engine.run_weather(now).await?;
    Ok(Json(summary))
}

async fn get_weather_job<F, ES, PS>(
    State(app): State<Arc<App<F, ES, PS>>>,
) -> Result<Json<JobState>, ApiError>
where
    F: ForecastProvider,
    ES: EmailSender,
    PS: PushSender,
{
    Ok(Json(app.engine.weather_job_state().await?))
}

async fn check_outbreak<F, ES, PS>(
    State(app): State<Arc<App<F, ES, PS>>>,
    Request(observation): Request<ReporterObservation>,
) -> Result<Json<OutbreakOutcome>, ApiError>
where
    F: ForecastProvider,
    ES: EmailSender,
    PS: PushSender,
{
    let now = (app.current_time)();
    let outcome = app.engine.check_observation(&observation, now).await?;
    Ok(Json(outcome))
}

async fn list_outbreaks<F, ES, PS>(
    State(app): State<Arc<App<F, ES, PS>>>,
) -> Result<Json<Vec<OutbreakRecord>>, ApiError>
where
    F: ForecastProvider,
    ES: EmailSender,
    PS: PushSender,
{
    Ok(Json(app.engine.store().list_active_outbreaks().await?))
}

#[derive(Debug, serde::Deserialize)]
struct ListParams {
    limit: Option<u32>,
}

async fn list_notifications<F, ES, PS>(
    State(app): State<Arc<App<F, ES, PS>>>,
    Path(user_id): Path<uuid::Uuid>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Notification>>, ApiError>
where
    F: ForecastProvider,
    ES: EmailSender,
    PS: PushSender,
{
    let limit = params
        .limit
        .unwrap_or(DEFAULT_NOTIFICATION_LIMIT)
        .clamp(1, MAX_NOTIFICATION_LIMIT);
    Ok(Json(
        app.engine.store().list_notifications(user_id, limit).await?,
    ))
}

async fn mark_notification_read<F, ES, PS>(
    State(app): State<Arc<App<F, ES, PS>>>,
    Path((user_id, id)): Path<(uuid::Uuid, Id)>,
) -> Result<StatusCode, ApiError>
where
    F: ForecastProvider,
    ES: EmailSender,
    PS: PushSender,
{
    if app.engine.store().mark_notification_read(user_id, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("notification {id}")))
    }
}
