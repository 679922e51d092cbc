use super::harness::{test_now, TestHarness};
use crate::OutbreakOutcome;
use models::{AlertPayload, ReporterObservation, Severity};
use pretty_assertions::assert_eq;

fn below_threshold(outcome: &OutbreakOutcome) -> u32 {
    match outcome {
        OutbreakOutcome::BelowThreshold { reporter_count } => *reporter_count,
        other => panic!("expected no outbreak yet, got {other:?}"),
    }
}

#[tokio::test]
async fn test_outbreak_lifecycle() {
    let mut harness = TestHarness::init();
    let guntur = harness.add_region(1, "Guntur").await;
    let _krishna = harness.add_region(2, "Krishna").await;
    let asha = harness.add_farmer("Asha", "Guntur").await;
    let bhanu = harness.add_farmer("Bhanu", "Guntur").await;
    let chitra = harness.add_farmer("Chitra", "Guntur").await;
    let dev = harness.add_farmer("Dev", "Guntur").await;
    let esha = harness.add_farmer("Esha", "guntur").await;
    let farid = harness.add_farmer("Farid", "Krishna").await;

    let outcome = harness.report(&asha, &guntur, "Rice Blast", 30, None).await;
    assert_eq!(1, below_threshold(&outcome));
    // Repeat reports by the same farmer count once.
    let outcome = harness.report(&asha, &guntur, "rice blast", 20, None).await;
    assert_eq!(1, below_threshold(&outcome));
    let outcome = harness.report(&bhanu, &guntur, "blast", 10, None).await;
    assert_eq!(2, below_threshold(&outcome));
    // Other conditions and regions don't count.
    let outcome = harness.report(&farid, &guntur, "leaf curl", 5, None).await;
    assert_eq!(1, below_threshold(&outcome));
    assert!(harness.store.all_outbreaks().await.is_empty());

    let outcome = harness
        .report(&chitra, &guntur, " Rice blast ", 0, Some(Severity::High))
        .await;
    let OutbreakOutcome::Created {
        outbreak,
        notifications,
    } = outcome
    else {
        panic!("expected a new outbreak, got {outcome:?}");
    };
    insta::assert_json_snapshot!(outbreak, { ".id" => "[id]" }, @r#"
    {
      "id": "[id]",
      "region_id": "0000000000000001",
      "condition": "Rice blast",
      "first_seen": "2024-06-30T00:00:00Z",
      "last_seen": "2024-07-01T06:00:00Z",
      "reporter_count": 3,
      "severity": "high",
      "active": true
    }
    "#);

    // Everyone else in the region is told, but not the reporter.
    let recipients: Vec<_> = notifications.recipients.iter().map(|r| r.user_id).collect();
    assert_eq!(
        vec![asha.user_id, bhanu.user_id, dev.user_id, esha.user_id],
        recipients
    );
    assert_eq!(4, notifications.notifications_created());
    assert!(harness.notification_types(chitra.user_id).await.is_empty());
    assert!(harness.notification_types(farid.user_id).await.is_empty());

    let emails = harness.emails.take_sent().await;
    assert_eq!(4, emails.len());
    assert_eq!(
        "Cropwatch: Rice blast outbreak reported in Guntur",
        emails[0].subject
    );
    let pushes = harness.pushes.take_sent().await;
    assert!(matches!(
        &pushes[0].data,
        AlertPayload::OutbreakAlert { reporter_count: 3, severity: Severity::High, .. }
    ));

    // Further reports update the record without announcing it again.
    let outcome = harness.report(&dev, &guntur, "RICE BLAST", 1, None).await;
    let OutbreakOutcome::Updated { outbreak: updated } = outcome else {
        panic!("expected an update, got {outcome:?}");
    };
    assert_eq!(outbreak.id, updated.id);
    assert_eq!(4, updated.reporter_count);
    assert_eq!(test_now(), updated.last_seen);
    assert_eq!(Severity::High, updated.severity);

    let outcome = harness
        .report(&esha, &guntur, "blast", 0, Some(Severity::Critical))
        .await;
    let OutbreakOutcome::Updated { outbreak: updated } = outcome else {
        panic!("expected an update, got {outcome:?}");
    };
    assert_eq!(5, updated.reporter_count);
    assert_eq!(Severity::Critical, updated.severity);

    let all = harness.store.all_outbreaks().await;
    assert_eq!(1, all.len());
    assert_eq!(5, all[0].reporter_count);
    assert_eq!(Severity::Critical, all[0].severity);
    assert_eq!(4, harness.store.all_notifications().await.len());
    assert!(harness.emails.take_sent().await.is_empty());
}

#[tokio::test]
async fn test_reports_outside_window_are_ignored() {
    let mut harness = TestHarness::init();
    let guntur = harness.add_region(1, "Guntur").await;
    let asha = harness.add_farmer("Asha", "Guntur").await;
    let bhanu = harness.add_farmer("Bhanu", "Guntur").await;
    let chitra = harness.add_farmer("Chitra", "Guntur").await;

    harness.report(&asha, &guntur, "leaf curl", 73, None).await;
    harness.report(&bhanu, &guntur, "leaf curl", 10, None).await;
    let outcome = harness.report(&chitra, &guntur, "leaf curl", 0, None).await;
    assert_eq!(2, below_threshold(&outcome));

    // Exactly 72 hours old is still inside the window.
    let outcome = harness.report(&asha, &guntur, "leaf curl", 72, None).await;
    let OutbreakOutcome::Created { outbreak, .. } = outcome else {
        panic!("expected a new outbreak, got {outcome:?}");
    };
    assert_eq!(3, outbreak.reporter_count);
    assert_eq!(Severity::Medium, outbreak.severity);
    assert_eq!(test_now() - chrono::Duration::hours(72), outbreak.first_seen);
}

#[tokio::test]
async fn test_region_is_resolved_from_reporter_profile() {
    let mut harness = TestHarness::init();
    let guntur = harness.add_region(1, "Guntur").await;
    let asha = harness.add_farmer("Asha", "Guntur").await;
    let bhanu = harness.add_farmer("Bhanu", "Guntur").await;
    let nomad = harness.add_farmer("Nomad", "Atlantis").await;

    harness.report(&asha, &guntur, "stem borer", 5, None).await;
    harness.report(&bhanu, &guntur, "stem borer", 4, None).await;

    // An unstored observation without a region falls back to the profile.
    let mut observation = ReporterObservation {
        id: None,
        user_id: nomad.user_id,
        region_id: None,
        condition: "stem borer".to_string(),
        severity: None,
        observed_at: test_now(),
    };
    let outcome = harness
        .engine()
        .check_observation(&observation, test_now())
        .await
        .unwrap();
    assert!(matches!(outcome, OutbreakOutcome::NoRegion), "{outcome:?}");

    observation.user_id = uuid::Uuid::from_u128(999);
    let outcome = harness
        .engine()
        .check_observation(&observation, test_now())
        .await
        .unwrap();
    assert!(matches!(outcome, OutbreakOutcome::NoRegion), "{outcome:?}");

    let chitra = harness.add_farmer("Chitra", "GUNTUR").await;
    observation.user_id = chitra.user_id;
    let outcome = harness
        .engine()
        .check_observation(&observation, test_now())
        .await
        .unwrap();
    let OutbreakOutcome::Created { outbreak, notifications } = outcome else {
        panic!("expected a new outbreak, got {outcome:?}");
    };
    assert_eq!(guntur.id, outbreak.region_id);
    assert_eq!(3, outbreak.reporter_count);
    assert_eq!(2, notifications.notifications_created());
}

#[tokio::test]
async fn test_stored_reports_without_region_count_toward_profile_region() {
    let mut harness = TestHarness::init();
    let guntur = harness.add_region(1, "Guntur").await;
    let _krishna = harness.add_region(2, "Krishna").await;
    let asha = harness.add_farmer("Asha", "Guntur").await;
    let bhanu = harness.add_farmer("Bhanu", "Guntur").await;
    let chitra = harness.add_farmer("Chitra", "Guntur").await;
    let farid = harness.add_farmer("Farid", "Krishna").await;
    let nomad = harness.add_farmer("Nomad", "Atlantis").await;

    let outcome = harness.report_without_region(&asha, "rice blast", 3).await;
    assert_eq!(1, below_threshold(&outcome));
    // Reporters elsewhere, or nowhere, don't count toward Guntur.
    let outcome = harness.report_without_region(&farid, "rice blast", 3).await;
    assert_eq!(1, below_threshold(&outcome));
    let outcome = harness.report_without_region(&nomad, "rice blast", 3).await;
    assert!(matches!(outcome, OutbreakOutcome::NoRegion), "{outcome:?}");

    let outcome = harness.report_without_region(&bhanu, "rice blast", 2).await;
    assert_eq!(2, below_threshold(&outcome));
    let outcome = harness.report_without_region(&chitra, "rice blast", 1).await;
    let OutbreakOutcome::Created { outbreak, .. } = outcome else {
        panic!("expected a new outbreak, got {outcome:?}");
    };
    assert_eq!(guntur.id, outbreak.region_id);
    assert_eq!(3, outbreak.reporter_count);
    assert_eq!(test_now() - chrono::Duration::hours(3), outbreak.first_seen);

    // Reports with and without a region are counted together.
    let dev = harness.add_farmer("Dev", "Guntur").await;
    let outcome = harness.report(&dev, &guntur, "Rice Blast", 0, None).await;
    let OutbreakOutcome::Updated { outbreak } = outcome else {
        panic!("expected an update, got {outcome:?}");
    };
    assert_eq!(4, outbreak.reporter_count);
}

#[tokio::test]
async fn test_outcome_serialization() {
    let mut harness = TestHarness::init();
    let guntur = harness.add_region(1, "Guntur").await;
    let asha = harness.add_farmer("Asha", "Guntur").await;

    let outcome = harness.report(&asha, &guntur, "rust", 1, None).await;
    insta::assert_json_snapshot!(outcome, @r#"
    {
      "outcome": "below_threshold",
      "reporter_count": 1
    }
    "#);
}
