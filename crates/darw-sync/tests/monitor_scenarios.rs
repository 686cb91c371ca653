//! End-to-end pipeline scenarios against in-memory collaborators.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use darw_core::HttpConfig;
use darw_notify::{MessagePayload, PublishError};
use darw_registry::{NormalizeError, TransportError};
use darw_sync::{MonitorConfig, MonitorError, MonitorPipeline, NotificationSink, ReportSource};

struct StaticReport(String);

#[async_trait]
impl ReportSource for StaticReport {
    async fn fetch_report(&self, _study_id: &str) -> Result<String, TransportError> {
        Ok(self.0.clone())
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    published: Arc<Mutex<Vec<MessagePayload>>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn publish(&self, payload: &MessagePayload) -> Result<(), PublishError> {
        self.published.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

struct RejectingSink;

#[async_trait]
impl NotificationSink for RejectingSink {
    async fn publish(&self, _payload: &MessagePayload) -> Result<(), PublishError> {
        Err(PublishError::Rejected {
            status: 500,
            body: "invalid_blocks".to_string(),
        })
    }
}

fn test_config() -> MonitorConfig {
    MonitorConfig {
        webhook_url: "http://127.0.0.1:9/webhook".to_string(),
        study_id: "phs002371.v5.p1".to_string(),
        lookback_days: 7,
        http: HttpConfig::default(),
        scheduler_enabled: false,
        monitor_cron: "0 0 6 * * *".to_string(),
    }
}

fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).single().unwrap()
}

fn report_with_row(approval_date: NaiveDate) -> String {
    format!(
        "Cloud Service AdministratorData stewardRequestor\tAffiliation\tProject\tDate of approval\tRequest status\n\
         Jane Doe\tBroad Institute\tVariant calling at scale\t{}\tapproved\n",
        approval_date.format("%b%d, %Y")
    )
}

fn pipeline_with(source: Box<dyn ReportSource>, sink: Box<dyn NotificationSink>) -> MonitorPipeline {
    MonitorPipeline::new(test_config())
        .expect("pipeline")
        .with_collaborators(source, sink)
}

#[tokio::test]
async fn recent_approval_publishes_one_record_payload() {
    let now = test_now();
    let approved = (now - Duration::days(3)).date_naive();
    let sink = RecordingSink::default();
    let pipeline = pipeline_with(
        Box::new(StaticReport(report_with_row(approved))),
        Box::new(sink.clone()),
    );

    let summary = pipeline.run_once_at(now).await.expect("run");
    assert!(summary.sent);
    assert_eq!(summary.record_count, 1);

    let published = sink.published.lock().unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].blocks.len(), 2);
    assert!(published[0].blocks[0]
        .text
        .text
        .contains("New dbGaP Authorized Requestors added in the last 7 days"));
    assert!(published[0].blocks[1]
        .text
        .text
        .starts_with("Jane Doe from Broad Institute approved on"));
}

#[tokio::test]
async fn stale_approval_publishes_no_new_requestors_payload() {
    let now = test_now();
    let approved = (now - Duration::days(10)).date_naive();
    let sink = RecordingSink::default();
    let pipeline = pipeline_with(
        Box::new(StaticReport(report_with_row(approved))),
        Box::new(sink.clone()),
    );

    let summary = pipeline.run_once_at(now).await.expect("run");
    assert!(summary.sent);
    assert_eq!(summary.record_count, 0);

    let published = sink.published.lock().unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].blocks.len(), 1);
    assert_eq!(
        published[0].blocks[0].text.text,
        "No new dbGaP Authorized Requestors added in the last 7 days"
    );
}

#[tokio::test]
async fn upstream_header_drift_aborts_before_publish() {
    let report = "Requestor\tAffiliation\tProject\tDate of approval\tRequest status\n\
                  Jane Doe\tBroad Institute\tproject\tJan05, 2024\tapproved\n";
    let sink = RecordingSink::default();
    let pipeline = pipeline_with(
        Box::new(StaticReport(report.to_string())),
        Box::new(sink.clone()),
    );

    let err = pipeline.run_once_at(test_now()).await.expect_err("must fail");
    assert!(matches!(
        err,
        MonitorError::Normalize(NormalizeError::SchemaMismatch { .. })
    ));
    assert!(sink.published.lock().unwrap().is_empty());
}

#[tokio::test]
async fn bad_row_date_aborts_before_publish() {
    let report = "Cloud Service AdministratorData stewardRequestor\tAffiliation\tProject\tDate of approval\tRequest status\n\
                  Jane Doe\tBroad Institute\tproject\t2024-01-05\tapproved\n";
    let sink = RecordingSink::default();
    let pipeline = pipeline_with(
        Box::new(StaticReport(report.to_string())),
        Box::new(sink.clone()),
    );

    let err = pipeline.run_once_at(test_now()).await.expect_err("must fail");
    assert!(matches!(
        err,
        MonitorError::Normalize(NormalizeError::DataQuality { line: 2, .. })
    ));
    assert!(sink.published.lock().unwrap().is_empty());
}

#[tokio::test]
async fn webhook_rejection_surfaces_status_and_body() {
    let now = test_now();
    let approved = (now - Duration::days(3)).date_naive();
    let pipeline = pipeline_with(
        Box::new(StaticReport(report_with_row(approved))),
        Box::new(RejectingSink),
    );

    let err = pipeline.run_once_at(now).await.expect_err("must fail");
    match err {
        MonitorError::Publish(PublishError::Rejected { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "invalid_blocks");
        }
        other => panic!("expected Publish rejection, got {other:?}"),
    }
}
