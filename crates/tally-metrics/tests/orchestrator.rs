use std::sync::Arc;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};
use tally_metrics::{
    DateRange, DoraInput, DoraMetrics, FlowMetrics, MetricKind, MetricsError, MetricsOrchestrator,
    PerformanceTier, Record, HISTORY_SESSION_TYPE,
};
use tally_store::{ManualClock, Namespace, RecordStore, ReportFormat, SessionState, StoreError};
use tempfile::tempdir;

async fn setup(root: &std::path::Path) -> (MetricsOrchestrator, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap(),
    ));
    let store = RecordStore::open(root, Some(Duration::hours(1)), clock.clone())
        .await
        .expect("open store");
    (MetricsOrchestrator::new(Arc::new(store)), clock)
}

fn records(values: Vec<Value>) -> Vec<Record> {
    values
        .into_iter()
        .map(|v| v.as_object().cloned().expect("object"))
        .collect()
}

fn day(m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, m, d).unwrap()
}

fn issues() -> Vec<Record> {
    records(vec![
        json!({"key": "P-1", "issueType": "Story", "created": "2024-04-29", "started": "2024-04-30", "resolved": "2024-05-02", "statusCategory": "Done", "storyPoints": 5, "sprint": "Sprint 1"}),
        json!({"key": "P-2", "issueType": "Bug", "created": "2024-04-30", "started": "2024-05-01", "resolved": "2024-05-03", "statusCategory": "Done", "storyPoints": 5, "sprint": "Sprint 2"}),
        json!({"key": "P-3", "issueType": "Story", "created": "2024-05-01", "started": "2024-05-06", "statusCategory": "In Progress", "storyPoints": 5, "sprint": ["Sprint 2", "Sprint 3"]}),
        json!({"key": "P-4", "issueType": "Story", "created": "2024-05-02", "resolved": "2024-05-07", "statusCategory": "Done", "storyPoints": 5, "sprint": "Sprint 3"}),
    ])
}

#[tokio::test]
async fn flow_bundle_is_cached_for_an_hour() {
    let tmp = tempdir().unwrap();
    let (metrics, clock) = setup(tmp.path()).await;
    let flow = metrics.flow_metrics("PROJ", &issues(), None).await.unwrap();
    assert_eq!(flow.completed_count, 3);
    assert_eq!(flow.wip_count, 1);

    let cached: FlowMetrics = metrics
        .cached(MetricKind::Flow, "PROJ", None)
        .await
        .unwrap()
        .expect("cached flow");
    assert_eq!(cached, flow);

    let rec = metrics
        .store()
        .get(Namespace::Analysis, "metrics:PROJ:flow")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rec.metadata["metric_type"], json!("flow"));
    assert_eq!(rec.expires_at, Some(rec.created_at + Duration::hours(1)));

    clock.advance(Duration::minutes(61));
    let gone: Option<FlowMetrics> = metrics.cached(MetricKind::Flow, "PROJ", None).await.unwrap();
    assert!(gone.is_none());
}

#[tokio::test]
async fn dora_bundle_is_keyed_by_range() {
    let tmp = tempdir().unwrap();
    let (metrics, _clock) = setup(tmp.path()).await;
    let input = DoraInput {
        deployments: (1..=7)
            .map(|d| json!({"deployedAt": format!("2024-05-0{d}T12:00:00Z"), "committedAt": format!("2024-05-0{d}T11:30:00Z"), "status": "success"}))
            .map(|v| v.as_object().cloned().unwrap())
            .collect(),
        incidents: Vec::new(),
    };
    let range = DateRange::new(day(5, 1), day(5, 7)).unwrap();
    let dora = metrics.dora_metrics("PROJ", &input, range).await.unwrap();
    assert_eq!(dora.deployment_frequency.value, 1.0);
    assert_eq!(dora.deployment_frequency.tier, Some(PerformanceTier::Elite));
    assert_eq!(dora.lead_time_for_changes.tier, Some(PerformanceTier::Elite));
    assert_eq!(dora.overall_tier, Some(PerformanceTier::Elite));

    let back: Option<DoraMetrics> = metrics
        .cached(MetricKind::Dora, "PROJ", Some(&range))
        .await
        .unwrap();
    assert_eq!(back, Some(dora));
    let other = DateRange::new(day(5, 1), day(5, 8)).unwrap();
    let miss: Option<DoraMetrics> = metrics
        .cached(MetricKind::Dora, "PROJ", Some(&other))
        .await
        .unwrap();
    assert!(miss.is_none());
}

#[tokio::test]
async fn history_collection_completes_its_session() {
    let tmp = tempdir().unwrap();
    let (metrics, clock) = setup(tmp.path()).await;
    let range = DateRange::new(day(4, 29), day(5, 7)).unwrap();
    let history = metrics
        .collect_history("PROJ", &issues(), &DoraInput::default(), range)
        .await
        .unwrap();
    assert_eq!(history.daily.len(), 9);
    assert_eq!(history.weekly.len(), 2);
    assert_eq!(history.monthly_dora.len(), 2);
    assert_eq!(history.weekly[0].completed, 2);

    let session = metrics
        .sessions()
        .get_session(&history.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.session_type, HISTORY_SESSION_TYPE);
    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.data["daily_buckets"], json!(9));
    assert_eq!(session.data["monthly_dora_buckets"], json!(2));

    let first_day = DateRange::single(day(4, 29));
    let week = history.weekly[0].range;
    clock.advance(Duration::hours(25));
    let daily: Option<Value> = metrics
        .cached(MetricKind::DailyRollup, "PROJ", Some(&first_day))
        .await
        .unwrap();
    assert!(daily.is_none());
    let weekly: Option<Value> = metrics
        .cached(MetricKind::WeeklyRollup, "PROJ", Some(&week))
        .await
        .unwrap();
    assert!(weekly.is_some());
}

#[tokio::test]
async fn history_collection_failure_is_recorded() {
    let tmp = tempdir().unwrap();
    let (metrics, _clock) = setup(tmp.path()).await;
    // analysis writes now fail; sessions live elsewhere
    std::fs::remove_dir_all(tmp.path().join("analysis")).unwrap();
    std::fs::write(tmp.path().join("analysis"), b"not a directory").unwrap();

    let range = DateRange::new(day(5, 1), day(5, 3)).unwrap();
    let err = metrics
        .collect_history("PROJ", &issues(), &DoraInput::default(), range)
        .await
        .unwrap_err();
    assert!(matches!(err, MetricsError::Store(StoreError::Io(_))));

    let sessions = metrics
        .sessions()
        .list_sessions(Some(HISTORY_SESSION_TYPE))
        .await
        .unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].state, SessionState::Failed);
    assert!(sessions[0].data["error"].as_str().unwrap().contains("io error"));
}

#[tokio::test]
async fn forecast_uses_sprint_history_and_open_points() {
    let tmp = tempdir().unwrap();
    let (metrics, _clock) = setup(tmp.path()).await;
    let mut items = records(
        (1..=3)
            .flat_map(|s| {
                (0..2).map(move |_| {
                    json!({"sprint": format!("Sprint {s}"), "storyPoints": 5, "statusCategory": "Done"})
                })
            })
            .collect(),
    );
    items.extend(records(vec![
        json!({"storyPoints": 20, "statusCategory": "To Do"}),
        json!({"storyPoints": 10, "statusCategory": "In Progress"}),
    ]));
    let bundle = metrics
        .delivery_forecast("PROJ", &items, None, day(6, 3))
        .await
        .unwrap();
    assert_eq!(bundle.remaining_work, 30.0);
    assert_eq!(bundle.velocity_history.len(), 3);
    assert_eq!(bundle.regression_next_velocity, 10.0);
    assert_eq!(bundle.monte_carlo.likely.sprints, 3);
    assert_eq!(bundle.monte_carlo.pessimistic.sprints, 3);
    assert_eq!(bundle.monte_carlo.likely.date, day(7, 15));
    assert!(bundle.monte_carlo.risks.is_empty());
}

#[tokio::test]
async fn cached_bundles_export_as_reports() {
    let tmp = tempdir().unwrap();
    let (metrics, _clock) = setup(tmp.path()).await;
    assert!(metrics
        .export_report(MetricKind::Quality, "PROJ", None, ReportFormat::Markdown)
        .await
        .unwrap()
        .is_none());

    let quality = metrics.quality_metrics("PROJ", &issues(), None).await.unwrap();
    assert_eq!(quality.bug_count, 1);
    let id = metrics
        .export_report(MetricKind::Quality, "PROJ", None, ReportFormat::Markdown)
        .await
        .unwrap()
        .expect("report id");
    let report = metrics
        .store()
        .get(Namespace::Report, &id)
        .await
        .unwrap()
        .unwrap();
    assert!(report.payload.as_str().unwrap().contains("**bug_count**: 1"));

    let err = metrics
        .export_report(MetricKind::Quality, "PROJ", None, ReportFormat::Csv)
        .await
        .unwrap_err();
    assert!(matches!(err, MetricsError::Render(_)));
}

#[tokio::test]
async fn cumulative_flow_is_persisted_with_bottlenecks() {
    let tmp = tempdir().unwrap();
    let (metrics, _clock) = setup(tmp.path()).await;
    let mut items = records(vec![json!({"created": "2024-04-01", "started": "2024-04-01", "resolved": "2024-04-02"})]);
    items.extend(records(
        (2..=5)
            .map(|d| json!({"created": "2024-04-01", "started": format!("2024-04-0{d}")}))
            .collect(),
    ));
    let range = DateRange::new(day(4, 1), day(4, 5)).unwrap();
    let cfd = metrics.cumulative_flow("PROJ", &items, range).await.unwrap();
    assert_eq!(cfd.days.len(), 5);
    assert_eq!(cfd.days[0].in_progress, 1);
    assert_eq!(cfd.days[4].in_progress, 4);
    assert_eq!(cfd.bottlenecks.len(), 1);
    assert_eq!(cfd.bottlenecks[0].start_count, 1);
    let stored: Option<Value> = metrics
        .cached(MetricKind::CumulativeFlow, "PROJ", Some(&range))
        .await
        .unwrap();
    assert!(stored.is_some());
}
