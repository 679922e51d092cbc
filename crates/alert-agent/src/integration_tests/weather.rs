use super::harness::{test_now, Scripted, TestHarness};
use crate::fanout::RetryPolicy;
use crate::WEATHER_JOB;
use alerts_sql::AlertStore;
use pretty_assertions::assert_eq;
use std::time::Duration;

#[tokio::test]
async fn test_heavy_rain_alerts_each_farmer_once_per_day() {
    let mut harness = TestHarness::init();
    let guntur = harness.add_region(1, "Guntur").await;
    let asha = harness.add_farmer("Asha", "Guntur").await;
    let bhanu = harness.add_farmer("Bhanu", " guntur ").await;
    harness.script_forecast(&guntur, 40.0, 90.0, 30.0, 20.0, 5.0).await;

    let summary = harness.engine().run_weather(test_now()).await.unwrap();
    insta::assert_json_snapshot!(summary, @r#"
    {
      "regions_evaluated": 1,
      "regions_skipped": 0,
      "unresolved_users": 0,
      "candidates": 1,
      "alerts_created": 1,
      "duplicates_suppressed": 0,
      "notifications_created": 2,
      "push_sent": 2,
      "push_failed": 0,
      "email_sent": 2,
      "email_failed": 0,
      "alerts_by_type": {
        "heavy_rain": 1
      }
    }
    "#);

    assert_eq!(vec!["heavy_rain"], harness.notification_types(asha.user_id).await);
    assert_eq!(vec!["heavy_rain"], harness.notification_types(bhanu.user_id).await);

    let emails = harness.emails.take_sent().await;
    let mut recipients: Vec<_> = emails.iter().map(|e| e.recipient.email.as_str()).collect();
    recipients.sort();
    assert_eq!(vec!["asha@farm.test", "bhanu@farm.test"], recipients);
    for email in &emails {
        assert_eq!(
            "Cropwatch: heavy rain expected in Guntur on 2024-07-02",
            email.subject
        );
        assert!(email.idempotency_key.starts_with("heavy_rain-"));
    }

    let pushes = harness.pushes.take_sent().await;
    let mut devices: Vec<_> = pushes.iter().map(|p| p.to.as_str()).collect();
    devices.sort();
    assert_eq!(vec!["device-asha", "device-bhanu"], devices);
    assert_eq!(2, harness.store.marker_count().await);

    // Running again on the same local day delivers nothing new.
    let later = test_now() + chrono::Duration::hours(6);
    let summary = harness.engine().run_weather(later).await.unwrap();
    assert_eq!(1, summary.candidates);
    assert_eq!(0, summary.alerts_created);
    assert_eq!(2, summary.duplicates_suppressed);
    assert_eq!(0, summary.notifications_created);
    assert!(harness.emails.take_sent().await.is_empty());
    assert!(harness.pushes.take_sent().await.is_empty());
    assert_eq!(2, harness.store.all_notifications().await.len());

    // 19:00 UTC is already the next day in Guntur, so the next run alerts again.
    let next_day = test_now() + chrono::Duration::hours(13);
    let day_after = guntur.local_day(next_day).succ_opt().unwrap();
    harness
        .script_forecast_for(&guntur, day_after, 40.0, 90.0, 30.0, 20.0, 5.0)
        .await;
    let summary = harness.engine().run_weather(next_day).await.unwrap();
    assert_eq!(2, summary.notifications_created);
    assert_eq!(4, harness.store.marker_count().await);
}

#[tokio::test]
async fn test_one_candidate_per_satisfied_rule() {
    let mut harness = TestHarness::init();
    let guntur = harness.add_region(1, "Guntur").await;
    let asha = harness.add_farmer("Asha", "Guntur").await;
    // Hot and dry, with calm winds all day.
    harness.script_forecast(&guntur, 0.0, 5.0, 38.5, 24.0, 4.0).await;

    let summary = harness.engine().run_weather(test_now()).await.unwrap();
    assert_eq!(2, summary.candidates);
    assert_eq!(2, summary.alerts_created);
    assert_eq!(2, summary.notifications_created);

    let mut types = harness.notification_types(asha.user_id).await;
    types.sort();
    assert_eq!(vec!["heat_stress", "safe_spray_window"], types);

    let pushes = harness.pushes.take_sent().await;
    let spray = pushes
        .iter()
        .find(|p| matches!(p.data, models::AlertPayload::SafeSprayWindow { .. }))
        .unwrap();
    insta::assert_json_snapshot!(spray.data, @r#"
    {
      "type": "safe_spray_window",
      "window_start": "2024-07-02T00:00:00",
      "window_end": "2024-07-03T00:00:00",
      "hours": 24,
      "probability": 5.0,
      "wind_max": 4.0
    }
    "#);
}

#[tokio::test]
async fn test_unavailable_forecast_skips_only_that_region() {
    let mut harness = TestHarness::init();
    let guntur = harness.add_region(1, "Guntur").await;
    let krishna = harness.add_region(2, "Krishna").await;
    harness.add_farmer("Asha", "Guntur").await;
    harness.add_farmer("Chitra", "Krishna").await;
    harness.add_farmer("Dev", "Atlantis").await;
    harness.script_forecast(&guntur, 0.0, 50.0, 2.0, -1.0, 12.0).await;
    harness.forecasts.set(krishna.id, Scripted::Unavailable).await;

    let summary = harness.engine().run_weather(test_now()).await.unwrap();
    insta::assert_json_snapshot!(summary, @r#"
    {
      "regions_evaluated": 1,
      "regions_skipped": 1,
      "unresolved_users": 1,
      "candidates": 1,
      "alerts_created": 1,
      "duplicates_suppressed": 0,
      "notifications_created": 1,
      "push_sent": 1,
      "push_failed": 0,
      "email_sent": 1,
      "email_failed": 0,
      "alerts_by_type": {
        "cold_stress": 1
      }
    }
    "#);
}

#[tokio::test]
async fn test_preferences_gate_push_and_email() {
    let mut harness = TestHarness::init();
    let guntur = harness.add_region(1, "Guntur").await;
    let asha = harness.add_farmer("Asha", "Guntur").await;
    let bhanu = harness.add_farmer("Bhanu", "Guntur").await;
    let chitra = harness.add_farmer("Chitra", "Guntur").await;
    harness.script_forecast(&guntur, 40.0, 90.0, 30.0, 20.0, 5.0).await;

    harness
        .update_preferences(asha.user_id, |p| p.email_enabled = false)
        .await;
    harness
        .update_preferences(bhanu.user_id, |p| {
            p.weather_alerts = false;
            p.in_app_enabled = false;
        })
        .await;

    let summary = harness.engine().run_weather(test_now()).await.unwrap();
    assert_eq!(3, summary.notifications_created);
    assert_eq!(2, summary.push_sent);
    assert_eq!(1, summary.email_sent);

    // The in-app notification is written regardless of preferences.
    for user in [&asha, &bhanu, &chitra] {
        assert_eq!(vec!["heavy_rain"], harness.notification_types(user.user_id).await);
    }

    let mut devices: Vec<_> = harness
        .pushes
        .take_sent()
        .await
        .into_iter()
        .map(|p| p.to)
        .collect();
    devices.sort();
    assert_eq!(vec!["device-asha", "device-chitra"], devices);

    let emails: Vec<_> = harness
        .emails
        .take_sent()
        .await
        .into_iter()
        .map(|e| e.recipient.email)
        .collect();
    assert_eq!(vec!["chitra@farm.test"], emails);
}

#[tokio::test]
async fn test_recipient_failures_are_isolated() {
    let mut harness = TestHarness::init();
    let guntur = harness.add_region(1, "Guntur").await;
    let asha = harness.add_farmer("Asha", "Guntur").await;
    let bhanu = harness.add_farmer("Bhanu", "Guntur").await;
    let chitra = harness.add_farmer("Chitra", "Guntur").await;
    harness.script_forecast(&guntur, 40.0, 90.0, 30.0, 20.0, 5.0).await;

    harness.store.fail_notification_writes_for(asha.user_id).await;
    harness.emails.fail_for("bhanu@farm.test").await;
    harness.pushes.fail_for("device-chitra").await;

    let summary = harness.engine().run_weather(test_now()).await.unwrap();
    insta::assert_json_snapshot!(summary, {
        ".errors[]" => "[persist error]",
    }, @r#"
    {
      "regions_evaluated": 1,
      "regions_skipped": 0,
      "unresolved_users": 0,
      "candidates": 1,
      "alerts_created": 1,
      "duplicates_suppressed": 0,
      "notifications_created": 2,
      "push_sent": 1,
      "push_failed": 1,
      "email_sent": 1,
      "email_failed": 1,
      "alerts_by_type": {
        "heavy_rain": 1
      },
      "errors": [
        "[persist error]"
      ]
    }
    "#);

    assert!(harness.notification_types(asha.user_id).await.is_empty());
    assert_eq!(vec!["heavy_rain"], harness.notification_types(bhanu.user_id).await);
    assert_eq!(vec!["heavy_rain"], harness.notification_types(chitra.user_id).await);

    // Only farmers whose notification was written are marked, so the next
    // run retries the others.
    assert_eq!(2, harness.store.marker_count().await);
    let summary = harness.engine().run_weather(test_now()).await.unwrap();
    assert_eq!(2, summary.duplicates_suppressed);
    assert_eq!(0, summary.notifications_created);
    assert_eq!(1, summary.errors.len());

    let state = harness.store.load_job_state(WEATHER_JOB).await.unwrap();
    assert_eq!(0, state.consecutive_failures);
    assert!(state
        .last_error
        .unwrap()
        .contains(&asha.user_id.to_string()));
}

#[tokio::test]
async fn test_sends_are_retried() {
    let mut harness = TestHarness::init();
    harness.retry = RetryPolicy {
        max_attempts: 3,
        backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    };
    let guntur = harness.add_region(1, "Guntur").await;
    harness.add_farmer("Asha", "Guntur").await;
    harness.script_forecast(&guntur, 40.0, 90.0, 30.0, 20.0, 5.0).await;
    harness.emails.fail_next(2).await;

    let summary = harness.engine().run_weather(test_now()).await.unwrap();
    assert_eq!(1, summary.email_sent);
    assert_eq!(0, summary.email_failed);
    assert_eq!(3, harness.emails.attempts().await);
    assert_eq!(1, harness.emails.take_sent().await.len());
}

#[tokio::test]
async fn test_job_state_is_recorded() {
    let mut harness = TestHarness::init();
    let guntur = harness.add_region(1, "Guntur").await;
    harness.add_farmer("Asha", "Guntur").await;
    harness.script_forecast(&guntur, 0.0, 50.0, 30.0, 20.0, 12.0).await;

    harness.engine().run_weather(test_now()).await.unwrap();
    let state = harness.engine().weather_job_state().await.unwrap();
    insta::assert_json_snapshot!(state, @r#"
    {
      "last_started": "2024-07-01T06:00:00Z",
      "last_completed": "2024-07-01T06:00:00Z",
      "last_summary": {
        "alerts_created": 0,
        "candidates": 0,
        "duplicates_suppressed": 0,
        "email_failed": 0,
        "email_sent": 0,
        "notifications_created": 0,
        "push_failed": 0,
        "push_sent": 0,
        "regions_evaluated": 1,
        "regions_skipped": 0,
        "unresolved_users": 0
      },
      "consecutive_failures": 0
    }
    "#);

    // A run that can't list regions fails, and counts towards consecutive failures.
    harness.store.set_fail_reads(true).await;
    let later = test_now() + chrono::Duration::hours(1);
    let err = harness.engine().run_weather(later).await.unwrap_err();
    assert_eq!("listing regions: store is unavailable", format!("{err:#}"));

    let state = harness.engine().weather_job_state().await.unwrap();
    assert_eq!(1, state.consecutive_failures);
    assert_eq!(Some(later), state.last_started);
    assert_eq!(Some(test_now()), state.last_completed);
    assert_eq!(
        Some("listing regions: store is unavailable".to_string()),
        state.last_error
    );
}
