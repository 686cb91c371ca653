//! Monitor pipeline orchestration: fetch, normalize, filter, notify.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use darw_core::HttpConfig;
use darw_notify::{format_notification, MessagePayload, PublishError, WebhookPublisher};
use darw_registry::{filter_recent, normalize, NormalizeError, RegistryClient, TransportError};
use serde::Serialize;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

pub const CRATE_NAME: &str = "darw-sync";

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub webhook_url: String,
    pub study_id: String,
    pub lookback_days: i64,
    pub http: HttpConfig,
    pub scheduler_enabled: bool,
    pub monitor_cron: String,
}

impl MonitorConfig {
    /// Reads configuration from the environment. Only the CLI/scheduler layer
    /// calls this; the pipeline itself consumes the struct as plain data.
    pub fn from_env() -> anyhow::Result<Self> {
        let webhook_url =
            std::env::var("SLACK_WEBHOOK_URL").context("SLACK_WEBHOOK_URL is not set")?;
        let study_id = std::env::var("DBGAP_STUDY_ID").context("DBGAP_STUDY_ID is not set")?;

        Ok(Self {
            webhook_url,
            study_id,
            lookback_days: std::env::var("DARW_LOOKBACK_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(7),
            http: HttpConfig {
                timeout: StdDuration::from_secs(
                    std::env::var("DARW_HTTP_TIMEOUT_SECS")
                        .ok()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(20),
                ),
                user_agent: std::env::var("DARW_USER_AGENT").ok(),
            },
            scheduler_enabled: std::env::var("DARW_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            monitor_cron: std::env::var("DARW_MONITOR_CRON")
                .unwrap_or_else(|_| "0 0 6 * * *".to_string()),
        })
    }
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Where the raw report comes from.
#[async_trait]
pub trait ReportSource: Send + Sync {
    async fn fetch_report(&self, study_id: &str) -> Result<String, TransportError>;
}

/// Where the finished notification goes.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, payload: &MessagePayload) -> Result<(), PublishError>;
}

#[async_trait]
impl ReportSource for RegistryClient {
    async fn fetch_report(&self, study_id: &str) -> Result<String, TransportError> {
        self.fetch_authorized_requestors(study_id).await
    }
}

#[async_trait]
impl NotificationSink for WebhookPublisher {
    async fn publish(&self, payload: &MessagePayload) -> Result<(), PublishError> {
        WebhookPublisher::publish(self, payload).await
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub study_id: String,
    pub sent: bool,
    pub record_count: usize,
}

pub struct MonitorPipeline {
    config: MonitorConfig,
    source: Box<dyn ReportSource>,
    sink: Box<dyn NotificationSink>,
}

impl MonitorPipeline {
    pub fn new(config: MonitorConfig) -> anyhow::Result<Self> {
        let source = RegistryClient::new(&config.http)?;
        let sink = WebhookPublisher::new(&config.http, config.webhook_url.clone())?;
        Ok(Self {
            config,
            source: Box::new(source),
            sink: Box::new(sink),
        })
    }

    pub fn with_collaborators(
        mut self,
        source: Box<dyn ReportSource>,
        sink: Box<dyn NotificationSink>,
    ) -> Self {
        self.source = source;
        self.sink = sink;
        self
    }

    pub async fn run_once(&self) -> Result<RunSummary, MonitorError> {
        self.run_once_at(Utc::now()).await
    }

    /// One complete pipeline run with `now` as the recency reference.
    ///
    /// Nothing is recovered internally: any stage failure surfaces to the
    /// caller, and no notification is published for a run that fails before
    /// the publish stage.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<RunSummary, MonitorError> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        let raw = self.source.fetch_report(&self.config.study_id).await?;
        let records = normalize(&raw)?;
        let recent = filter_recent(records, now, Duration::days(self.config.lookback_days));
        let record_count = recent.len();

        let payload = format_notification(&recent, self.config.lookback_days);
        self.sink.publish(&payload).await?;

        let finished_at = Utc::now();
        tracing::info!(
            %run_id,
            study_id = %self.config.study_id,
            record_count,
            "monitor run published"
        );

        Ok(RunSummary {
            run_id,
            started_at,
            finished_at,
            study_id: self.config.study_id.clone(),
            sent: true,
            record_count,
        })
    }

    /// Builds the cron trigger when scheduling is enabled. Run-serialization
    /// across overlapping fires is the scheduler's concern, not the core's.
    pub async fn maybe_build_scheduler(self: Arc<Self>) -> anyhow::Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.monitor_cron.clone();
        let pipeline = Arc::clone(&self);
        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                match pipeline.run_once().await {
                    Ok(summary) => tracing::info!(
                        run_id = %summary.run_id,
                        record_count = summary.record_count,
                        "scheduled monitor run complete"
                    ),
                    Err(err) => tracing::error!(error = %err, "scheduled monitor run failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }
}

pub async fn run_monitor_once_from_env() -> anyhow::Result<RunSummary> {
    let config = MonitorConfig::from_env()?;
    let pipeline = MonitorPipeline::new(config)?;
    Ok(pipeline.run_once().await?)
}
