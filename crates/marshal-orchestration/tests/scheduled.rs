mod support;

use std::time::Duration;

use marshal_orchestration::{
  BatchKind, BatchStatus, ScheduledBatchInput, ScheduledBatchSignal, ScheduledBatchWorkflow,
};
use marshal_runtime::Engine;
use support::{Fixture, ROBOT, TestFacility};

fn batch(task_type: BatchKind, locations: &[&str]) -> ScheduledBatchInput {
  ScheduledBatchInput {
    task_type,
    target_locations: locations.iter().map(|l| l.to_string()).collect(),
    schedule_name: "nightly".to_string(),
    priority: 3,
    robot_id: None,
    parameters: serde_json::Map::new(),
  }
}

const ROUND: [&str; 3] = ["floor-1/lobby", "floor-2/hall", "floor-3/office"];

#[tokio::test(start_paused = true)]
async fn test_occupied_location_is_skipped() {
  let fx = Fixture::new(TestFacility::default().with_occupied("floor-2"));
  let engine = Engine::new();
  let handle = engine
    .start::<ScheduledBatchWorkflow>(None, batch(BatchKind::Cleaning, &ROUND), fx.deps())
    .await
    .unwrap();

  let result = handle.result().await.unwrap();
  assert!(!result.success);
  assert_eq!(result.status, BatchStatus::Completed);
  assert_eq!(result.robot_id.as_deref(), Some(ROBOT));
  assert_eq!(result.locations_completed, vec!["floor-1/lobby", "floor-3/office"]);
  assert_eq!(result.locations_failed, vec!["floor-2/hall"]);
  assert!(result.locations_remaining.is_empty());
  assert_eq!(result.message, "Completed 2/3 locations");

  let updates = fx.notifications.updates();
  assert!(updates.contains(&"Skipped floor-2/hall - area occupied".to_string()));
  assert!(updates.contains(&"Completed cleaning floor-3/office".to_string()));

  // each visited location unlocks its own zone and locks it again
  let log = fx.facility.log();
  assert_eq!(log.granted, vec!["floor-1/lobby", "floor-3/office"]);
  assert_eq!(log.revoked.len(), 2);
  assert_eq!(log.closed.len(), log.opened.len());
  assert_eq!(fx.robots.release_count(), 1);
  assert_eq!(fx.robot_load(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_batch() {
  let fx = Fixture::new(TestFacility::default());
  let engine = Engine::new();
  let handle = engine
    .start::<ScheduledBatchWorkflow>(None, batch(BatchKind::Cleaning, &ROUND), fx.deps())
    .await
    .unwrap();

  tokio::time::sleep(Duration::from_secs(90)).await;
  assert_eq!(handle.query().current_location.as_deref(), Some("floor-2/hall"));
  handle.signal(ScheduledBatchSignal::Cancel {
    reason: Some("fire drill".to_string()),
  });

  let result = handle.result().await.unwrap();
  assert!(!result.success);
  assert_eq!(result.status, BatchStatus::Cancelled);
  assert_eq!(result.locations_completed, vec!["floor-1/lobby"]);
  assert_eq!(result.locations_failed, vec!["floor-2/hall"]);
  assert_eq!(result.locations_remaining, vec!["floor-3/office"]);
  assert_eq!(result.message, "Cancelled after 1/3 locations: fire drill");

  let log = fx.facility.log();
  assert_eq!(log.revoked.len(), log.granted.len());
  assert_eq!(log.closed.len(), log.opened.len());
  assert_eq!(fx.robots.release_count(), 1);
  assert_eq!(fx.robot_load(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_patrol_reports_anomalies() {
  let fx = Fixture::new(TestFacility::default());
  let engine = Engine::new();
  let handle = engine
    .start::<ScheduledBatchWorkflow>(
      None,
      batch(BatchKind::Patrol, &["floor-1/gate", "floor-2/lab"]),
      fx.deps(),
    )
    .await
    .unwrap();

  tokio::time::sleep(Duration::from_secs(30)).await;
  handle.signal(ScheduledBatchSignal::ReportAnomaly {
    checkpoint: "floor-1/gate".to_string(),
    anomaly_type: "open_window".to_string(),
    description: "window left open".to_string(),
  });

  let result = handle.result().await.unwrap();
  assert!(!result.success);
  assert_eq!(result.status, BatchStatus::Completed);
  assert_eq!(result.task_type, BatchKind::Patrol);
  assert_eq!(result.locations_completed.len(), 2);
  assert_eq!(result.anomalies.len(), 1);
  assert_eq!(result.anomalies[0].anomaly_type, "open_window");
  assert_eq!(result.message, "Patrol completed. 1 anomalies detected.");

  let updates = fx.notifications.updates();
  assert!(updates.contains(&"Checkpoint floor-2/lab cleared".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_clean_patrol_succeeds() {
  let fx = Fixture::new(TestFacility::default());
  let engine = Engine::new();
  let handle = engine
    .start::<ScheduledBatchWorkflow>(None, batch(BatchKind::Patrol, &["floor-1/gate"]), fx.deps())
    .await
    .unwrap();

  let result = handle.result().await.unwrap();
  assert!(result.success);
  assert_eq!(result.message, "Patrol completed. 0 anomalies detected.");
}

#[tokio::test(start_paused = true)]
async fn test_skip_requested_location() {
  let fx = Fixture::new(TestFacility::default());
  let engine = Engine::new();
  let handle = engine
    .start::<ScheduledBatchWorkflow>(None, batch(BatchKind::Cleaning, &ROUND), fx.deps())
    .await
    .unwrap();
  handle.signal(ScheduledBatchSignal::SkipLocation {
    location: "floor-2/hall".to_string(),
  });
  // not part of the batch
  handle.signal(ScheduledBatchSignal::SkipLocation {
    location: "floor-9/roof".to_string(),
  });

  let result = handle.result().await.unwrap();
  assert!(!result.success);
  assert_eq!(result.locations_completed, vec!["floor-1/lobby", "floor-3/office"]);
  assert_eq!(result.locations_failed, vec!["floor-2/hall"]);
  assert_eq!(handle.query().skip_requests, vec!["floor-2/hall"]);
  assert!(
    fx.notifications
      .updates()
      .contains(&"Skipped floor-2/hall on request".to_string())
  );
}

#[tokio::test(start_paused = true)]
async fn test_no_robot_fails_every_location() {
  let fx = Fixture::new(TestFacility::default());
  fx.dispatcher
    .update_status(ROBOT, marshal_dispatch::WorkerStatus::Offline);
  let engine = Engine::new();
  let handle = engine
    .start::<ScheduledBatchWorkflow>(None, batch(BatchKind::Cleaning, &ROUND), fx.deps())
    .await
    .unwrap();

  let result = handle.result().await.unwrap();
  assert_eq!(result.status, BatchStatus::Failed);
  assert_eq!(result.locations_failed.len(), 3);
  assert!(result.locations_remaining.is_empty());
  assert_eq!(
    result.message,
    "Scheduled cleaning failed: No available robot found"
  );
  assert_eq!(fx.robots.release_count(), 0);
}
