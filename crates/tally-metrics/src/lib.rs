//! Named metric bundles (flow, sprint, DORA, quality, cumulative flow,
//! delivery forecast, historical rollups) computed from already-fetched
//! records and cached through the record store.

pub mod cfd;
pub mod dora;
pub mod error;
pub mod flow;
pub mod forecast;
pub mod keys;
pub mod quality;
pub mod records;
pub mod rollup;
pub mod sprint;

use std::sync::Arc;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tally_stats::{ForecastEngine, SpikeDetector};
use tally_store::{
    Expiry, Metadata, Namespace, RecordStore, ReportFormat, ReportRenderer, SessionTracker,
    StoreError,
};

pub use cfd::{Bottleneck, CfdDay, CumulativeFlow, WorkflowState};
pub use dora::{DoraFields, DoraInput, DoraMeasure, DoraMetrics, PerformanceTier};
pub use error::{MetricsError, MetricsResult};
pub use flow::{DurationStats, FlowMetrics};
pub use forecast::DeliveryForecastBundle;
pub use keys::{metric_key, MetricKind};
pub use quality::QualityMetrics;
pub use records::{parse_timestamp, DateRange, Record, RecordFields};
pub use rollup::{DailyBucket, MonthlyDoraBucket, WeeklyBucket};
pub use sprint::{SprintMetrics, SprintSummary};

pub const HISTORY_SESSION_TYPE: &str = "historical_collection";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryCollection {
    pub session_id: String,
    pub daily: Vec<DailyBucket>,
    pub weekly: Vec<WeeklyBucket>,
    pub monthly_dora: Vec<MonthlyDoraBucket>,
}

/// Computes metric bundles and persists each one to the `analysis`
/// namespace under [`metric_key`], with the TTL of its [`MetricKind`].
pub struct MetricsOrchestrator {
    store: Arc<RecordStore>,
    sessions: SessionTracker,
    reports: ReportRenderer,
    fields: RecordFields,
    dora_fields: DoraFields,
    spikes: SpikeDetector,
    forecaster: ForecastEngine,
}

impl MetricsOrchestrator {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self {
            sessions: SessionTracker::new(store.clone()),
            reports: ReportRenderer::new(store.clone()),
            store,
            fields: RecordFields::default(),
            dora_fields: DoraFields::default(),
            spikes: SpikeDetector::default(),
            forecaster: ForecastEngine::default(),
        }
    }

    pub fn with_fields(mut self, fields: RecordFields) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_dora_fields(mut self, fields: DoraFields) -> Self {
        self.dora_fields = fields;
        self
    }

    pub fn with_spike_detector(mut self, spikes: SpikeDetector) -> Self {
        self.spikes = spikes;
        self
    }

    pub fn with_forecast_engine(mut self, engine: ForecastEngine) -> Self {
        self.forecaster = engine;
        self
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    async fn persist<T: Serialize>(
        &self,
        kind: MetricKind,
        project: &str,
        range: Option<&DateRange>,
        bundle: &T,
    ) -> MetricsResult<String> {
        let key = metric_key(project, kind, range);
        let mut metadata = Metadata::new();
        metadata.insert("project".into(), json!(project));
        metadata.insert("metric_type".into(), json!(kind.as_str()));
        if let Some(r) = range {
            metadata.insert("range_start".into(), json!(r.start.to_string()));
            metadata.insert("range_end".into(), json!(r.end.to_string()));
        }
        self.store
            .put_json(Namespace::Analysis, &key, bundle, metadata, kind.ttl())
            .await?;
        tracing::debug!(target: "tally::metrics", key = %key, kind = %kind, "bundle cached");
        Ok(key)
    }

    /// Reads back a bundle persisted by one of the computing methods.
    pub async fn cached<T: DeserializeOwned>(
        &self,
        kind: MetricKind,
        project: &str,
        range: Option<&DateRange>,
    ) -> MetricsResult<Option<T>> {
        let key = metric_key(project, kind, range);
        match self.store.get(Namespace::Analysis, &key).await? {
            Some(record) => Ok(Some(record.payload_as().map_err(StoreError::from)?)),
            None => Ok(None),
        }
    }

    pub async fn flow_metrics(
        &self,
        project: &str,
        records: &[Record],
        range: Option<DateRange>,
    ) -> MetricsResult<FlowMetrics> {
        let bundle = flow::compute_flow(project, records, &self.fields, range, &self.spikes);
        self.persist(MetricKind::Flow, project, range.as_ref(), &bundle)
            .await?;
        Ok(bundle)
    }

    pub async fn sprint_metrics(
        &self,
        project: &str,
        records: &[Record],
    ) -> MetricsResult<SprintMetrics> {
        let bundle = sprint::compute_sprints(project, records, &self.fields);
        self.persist(MetricKind::Sprint, project, None, &bundle).await?;
        Ok(bundle)
    }

    pub async fn dora_metrics(
        &self,
        project: &str,
        input: &DoraInput,
        range: DateRange,
    ) -> MetricsResult<DoraMetrics> {
        let bundle = dora::compute_dora(project, input, &self.dora_fields, range);
        self.persist(MetricKind::Dora, project, Some(&range), &bundle)
            .await?;
        Ok(bundle)
    }

    pub async fn quality_metrics(
        &self,
        project: &str,
        records: &[Record],
        range: Option<DateRange>,
    ) -> MetricsResult<QualityMetrics> {
        let bundle = quality::compute_quality(project, records, &self.fields, range);
        self.persist(MetricKind::Quality, project, range.as_ref(), &bundle)
            .await?;
        Ok(bundle)
    }

    pub async fn cumulative_flow(
        &self,
        project: &str,
        records: &[Record],
        range: DateRange,
    ) -> MetricsResult<CumulativeFlow> {
        let bundle = cfd::compute_cumulative_flow(project, records, &self.fields, range);
        if !bundle.bottlenecks.is_empty() {
            tracing::info!(
                target: "tally::metrics",
                project,
                count = bundle.bottlenecks.len(),
                "bottlenecks detected"
            );
        }
        self.persist(MetricKind::CumulativeFlow, project, Some(&range), &bundle)
            .await?;
        Ok(bundle)
    }

    /// Forecasts delivery of `remaining_work` (or, when `None`, the points on
    /// items not yet done) from the sprint velocity history in `records`.
    pub async fn delivery_forecast(
        &self,
        project: &str,
        records: &[Record],
        remaining_work: Option<f64>,
        start: NaiveDate,
    ) -> MetricsResult<DeliveryForecastBundle> {
        let sprints = sprint::compute_sprints(project, records, &self.fields);
        let remaining =
            remaining_work.unwrap_or_else(|| forecast::remaining_points(records, &self.fields));
        let bundle = forecast::build_forecast(
            project,
            &sprints,
            remaining,
            &self.forecaster,
            start,
            &mut rand::rng(),
        );
        self.persist(MetricKind::Forecast, project, None, &bundle)
            .await?;
        Ok(bundle)
    }

    /// One bucket per day of `range`, each cached under its own single-day key.
    pub async fn daily_rollups(
        &self,
        project: &str,
        records: &[Record],
        range: DateRange,
    ) -> MetricsResult<Vec<DailyBucket>> {
        let buckets = rollup::daily_buckets(records, &self.fields, range);
        for bucket in &buckets {
            let day = DateRange::single(bucket.date);
            self.persist(MetricKind::DailyRollup, project, Some(&day), bucket)
                .await?;
        }
        Ok(buckets)
    }

    pub async fn weekly_rollups(
        &self,
        project: &str,
        daily: &[DailyBucket],
    ) -> MetricsResult<Vec<WeeklyBucket>> {
        let buckets = rollup::weekly_from_daily(daily);
        for bucket in &buckets {
            self.persist(MetricKind::WeeklyRollup, project, Some(&bucket.range), bucket)
                .await?;
        }
        Ok(buckets)
    }

    pub async fn monthly_dora(
        &self,
        project: &str,
        input: &DoraInput,
        range: DateRange,
    ) -> MetricsResult<Vec<MonthlyDoraBucket>> {
        let buckets = rollup::monthly_dora(project, input, &self.dora_fields, range);
        for bucket in &buckets {
            self.persist(
                MetricKind::MonthlyDora,
                project,
                Some(&bucket.metrics.range),
                bucket,
            )
            .await?;
        }
        Ok(buckets)
    }

    /// Runs daily, weekly and monthly DORA rollups inside a session. The
    /// session ends `completed` with bucket counts, or `failed` with the
    /// error text, which is then returned.
    pub async fn collect_history(
        &self,
        project: &str,
        records: &[Record],
        dora_input: &DoraInput,
        range: DateRange,
    ) -> MetricsResult<HistoryCollection> {
        let mut initial = Metadata::new();
        initial.insert("project".into(), json!(project));
        initial.insert("range_start".into(), json!(range.start.to_string()));
        initial.insert("range_end".into(), json!(range.end.to_string()));
        let session_id = self
            .sessions
            .create_session(HISTORY_SESSION_TYPE, initial)
            .await?;

        match self
            .run_history(&session_id, project, records, dora_input, range)
            .await
        {
            Ok((daily, weekly, monthly_dora)) => {
                let mut summary = Metadata::new();
                summary.insert("daily_buckets".into(), json!(daily.len()));
                summary.insert("weekly_buckets".into(), json!(weekly.len()));
                summary.insert("monthly_buckets".into(), json!(monthly_dora.len()));
                self.sessions.complete_session(&session_id, summary).await?;
                tracing::info!(
                    target: "tally::metrics",
                    project,
                    session_id = %session_id,
                    days = daily.len(),
                    "historical collection complete"
                );
                Ok(HistoryCollection {
                    session_id,
                    daily,
                    weekly,
                    monthly_dora,
                })
            }
            Err(err) => {
                if let Err(mark_err) = self.sessions.fail_session(&session_id, &err.to_string()).await {
                    tracing::warn!(
                        target: "tally::metrics",
                        session_id = %session_id,
                        error = %mark_err,
                        "could not mark session failed"
                    );
                }
                Err(err)
            }
        }
    }

    async fn run_history(
        &self,
        session_id: &str,
        project: &str,
        records: &[Record],
        dora_input: &DoraInput,
        range: DateRange,
    ) -> MetricsResult<(Vec<DailyBucket>, Vec<WeeklyBucket>, Vec<MonthlyDoraBucket>)> {
        let daily = self.daily_rollups(project, records, range).await?;
        self.mark_step(session_id, "daily", daily.len()).await?;
        let weekly = self.weekly_rollups(project, &daily).await?;
        self.mark_step(session_id, "weekly", weekly.len()).await?;
        let monthly = self.monthly_dora(project, dora_input, range).await?;
        self.mark_step(session_id, "monthly_dora", monthly.len()).await?;
        Ok((daily, weekly, monthly))
    }

    async fn mark_step(&self, session_id: &str, step: &str, buckets: usize) -> MetricsResult<()> {
        let mut partial = Metadata::new();
        partial.insert("step".into(), json!(step));
        partial.insert(format!("{step}_buckets"), json!(buckets));
        self.sessions.update_session(session_id, partial).await?;
        Ok(())
    }

    /// Renders a cached bundle and files it as a report. `None` when nothing
    /// is cached for the key.
    pub async fn export_report(
        &self,
        kind: MetricKind,
        project: &str,
        range: Option<&DateRange>,
        format: ReportFormat,
    ) -> MetricsResult<Option<String>> {
        let Some(bundle) = self.cached::<Value>(kind, project, range).await? else {
            return Ok(None);
        };
        let key = format!("{}:{}", metric_key(project, kind, range), format);
        let id = self
            .reports
            .save(&key, &bundle, format, Expiry::Default)
            .await?;
        Ok(Some(id))
    }
}
