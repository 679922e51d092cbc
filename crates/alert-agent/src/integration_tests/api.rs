use super::harness::{test_now, TestHarness, SERVICE_TOKEN};
use alerts_sql::AlertStore;
use axum::body::Body;
use axum::http::{Method, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn call(
    router: axum::Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = axum::http::Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        request = request.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, value)
}

#[tokio::test]
async fn test_service_token_is_required() {
    let harness = TestHarness::init();

    let (status, body) = call(harness.router(), Method::GET, "/healthz", None, None).await;
    assert_eq!(StatusCode::OK, status);
    assert_eq!(json!("ok"), body);

    let (status, body) = call(harness.router(), Method::GET, "/outbreaks", None, None).await;
    assert_eq!(StatusCode::UNAUTHORIZED, status);
    insta::assert_json_snapshot!(body, @r#"
    {
      "error": "missing or invalid service token",
      "status": 401
    }
    "#);

    let (status, _) = call(
        harness.router(),
        Method::POST,
        "/jobs/weather-alerts",
        Some("not-the-token"),
        None,
    )
    .await;
    assert_eq!(StatusCode::UNAUTHORIZED, status);
    let state = harness.store.load_job_state(crate::WEATHER_JOB).await.unwrap();
    assert_eq!(None, state.last_started);
}

#[tokio::test]
async fn test_weather_job_endpoints() {
    let mut harness = TestHarness::init();
    let guntur = harness.add_region(1, "Guntur").await;
    harness.add_farmer("Asha", "Guntur").await;
    harness.script_forecast(&guntur, 0.0, 50.0, 36.0, 22.0, 12.0).await;

    let (status, body) = call(
        harness.router(),
        Method::POST,
        "/jobs/weather-alerts",
        Some(SERVICE_TOKEN),
        None,
    )
    .await;
    assert_eq!(StatusCode::OK, status);
    insta::assert_json_snapshot!(body, @r#"
    {
      "alerts_by_type": {
        "heat_stress": 1
      },
      "alerts_created": 1,
      "candidates": 1,
      "duplicates_suppressed": 0,
      "email_failed": 0,
      "email_sent": 1,
      "notifications_created": 1,
      "push_failed": 0,
      "push_sent": 1,
      "regions_evaluated": 1,
      "regions_skipped": 0,
      "unresolved_users": 0
    }
    "#);

    let (status, body) = call(
        harness.router(),
        Method::GET,
        "/jobs/weather-alerts",
        Some(SERVICE_TOKEN),
        None,
    )
    .await;
    assert_eq!(StatusCode::OK, status);
    assert_eq!(json!("2024-07-01T06:00:00Z"), body["last_completed"]);
    assert_eq!(json!(1), body["last_summary"]["alerts_created"]);

    harness.store.set_fail_reads(true).await;
    let (status, body) = call(
        harness.router(),
        Method::POST,
        "/jobs/weather-alerts",
        Some(SERVICE_TOKEN),
        None,
    )
    .await;
    assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, status);
    insta::assert_json_snapshot!(body, @r#"
    {
      "error": "listing regions: store is unavailable",
      "status": 500
    }
    "#);
}

#[tokio::test]
async fn test_outbreak_check_endpoint() {
    let mut harness = TestHarness::init();
    let guntur = harness.add_region(1, "Guntur").await;
    let asha = harness.add_farmer("Asha", "Guntur").await;
    let bhanu = harness.add_farmer("Bhanu", "Guntur").await;
    let chitra = harness.add_farmer("Chitra", "Guntur").await;
    harness.report(&asha, &guntur, "rice blast", 3, None).await;
    harness.report(&bhanu, &guntur, "rice blast", 2, None).await;

    let (status, body) = call(
        harness.router(),
        Method::POST,
        "/observations/outbreak-check",
        Some(SERVICE_TOKEN),
        Some(json!({
            "user_id": chitra.user_id,
            "condition": "   ",
            "observed_at": "2024-07-01T05:00:00Z",
        })),
    )
    .await;
    assert_eq!(StatusCode::BAD_REQUEST, status);
    insta::assert_json_snapshot!(body, @r#"
    {
      "error": "Input validation error: condition must not be empty",
      "status": 400
    }
    "#);

    let (status, body) = call(
        harness.router(),
        Method::POST,
        "/observations/outbreak-check",
        Some(SERVICE_TOKEN),
        Some(json!({
            "user_id": chitra.user_id,
            "region_id": guntur.id,
            "condition": "Rice Blast",
            "severity": "high",
            "observed_at": "2024-07-01T05:00:00Z",
        })),
    )
    .await;
    assert_eq!(StatusCode::OK, status);
    insta::assert_json_snapshot!(body, {
        ".outbreak.id" => "[id]",
        ".notifications.recipients[].notification_id" => "[id]",
        ".notifications.recipients[].user_id" => "[user]",
    }, @r#"
    {
      "notifications": {
        "recipients": [
          {
            "email": {
              "attempts": 1,
              "state": "sent"
            },
            "notification_id": "[id]",
            "push": {
              "attempts": 1,
              "state": "sent"
            },
            "user_id": "[user]"
          },
          {
            "email": {
              "attempts": 1,
              "state": "sent"
            },
            "notification_id": "[id]",
            "push": {
              "attempts": 1,
              "state": "sent"
            },
            "user_id": "[user]"
          }
        ]
      },
      "outbreak": {
        "active": true,
        "condition": "Rice Blast",
        "first_seen": "2024-07-01T03:00:00Z",
        "id": "[id]",
        "last_seen": "2024-07-01T05:00:00Z",
        "region_id": "0000000000000001",
        "reporter_count": 3,
        "severity": "high"
      },
      "outcome": "created"
    }
    "#);

    let (status, body) = call(
        harness.router(),
        Method::GET,
        "/outbreaks",
        Some(SERVICE_TOKEN),
        None,
    )
    .await;
    assert_eq!(StatusCode::OK, status);
    assert_eq!(1, body.as_array().unwrap().len());
    assert_eq!(json!("Rice Blast"), body[0]["condition"]);
}

#[tokio::test]
async fn test_notification_endpoints() {
    let mut harness = TestHarness::init();
    let guntur = harness.add_region(1, "Guntur").await;
    let asha = harness.add_farmer("Asha", "Guntur").await;
    let bhanu = harness.add_farmer("Bhanu", "Guntur").await;
    // Heavy rain and cold stress.
    harness.script_forecast(&guntur, 30.0, 60.0, 12.0, 3.0, 12.0).await;
    harness.engine().run_weather(test_now()).await.unwrap();

    let uri = format!("/users/{}/notifications?limit=1", asha.user_id);
    let (status, body) = call(harness.router(), Method::GET, &uri, Some(SERVICE_TOKEN), None).await;
    assert_eq!(StatusCode::OK, status);
    assert_eq!(1, body.as_array().unwrap().len());

    let uri = format!("/users/{}/notifications", asha.user_id);
    let (status, body) = call(harness.router(), Method::GET, &uri, Some(SERVICE_TOKEN), None).await;
    assert_eq!(StatusCode::OK, status);
    let listed = body.as_array().unwrap();
    assert_eq!(2, listed.len());
    let mut types: Vec<_> = listed.iter().map(|n| n["alert_type"].clone()).collect();
    types.sort_by_key(|t| t.to_string());
    assert_eq!(vec![json!("cold_stress"), json!("heavy_rain")], types);
    assert!(listed.iter().all(|n| n["read"] == json!(false)));

    let id = listed[0]["id"].as_str().unwrap().to_string();

    // Notifications can only be marked read by their recipient.
    let uri = format!("/users/{}/notifications/{id}/read", bhanu.user_id);
    let (status, body) =
        call(harness.router(), Method::POST, &uri, Some(SERVICE_TOKEN), None).await;
    assert_eq!(StatusCode::NOT_FOUND, status);
    assert_eq!(json!(404), body["status"]);

    let uri = format!("/users/{}/notifications/{id}/read", asha.user_id);
    let (status, body) =
        call(harness.router(), Method::POST, &uri, Some(SERVICE_TOKEN), None).await;
    assert_eq!(StatusCode::NO_CONTENT, status);
    assert_eq!(Value::Null, body);

    let uri = format!("/users/{}/notifications", asha.user_id);
    let (_, body) = call(harness.router(), Method::GET, &uri, Some(SERVICE_TOKEN), None).await;
    let read: Vec<_> = body
        .as_array()
        .unwrap()
        .iter()
        .filter(|n| n["read"] == json!(true))
        .map(|n| n["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(vec![id], read);
}
