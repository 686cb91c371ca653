//! dbGaP registry access: report download, schema repair, recency filtering.

use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use csv::{ReaderBuilder, StringRecord};
use darw_core::{HttpConfig, RequestorRecord};
use reqwest::StatusCode;
use thiserror::Error;

pub const CRATE_NAME: &str = "darw-registry";

/// dbGaP endpoint serving the authorized-requestor report as tab-separated text.
pub const DEFAULT_BASE_URL: &str =
    "https://www.ncbi.nlm.nih.gov/projects/gap/cgi-bin/GetAuthorizedRequestDownload.cgi";

/// The header cell the registry emits for the requestor column: three logical
/// labels concatenated into one string. Renamed to `requestor` during
/// normalization.
pub const GARBLED_REQUESTOR_HEADER: &str = "Cloud Service AdministratorData stewardRequestor";

const DATE_OF_APPROVAL_FORMAT: &str = "%b%d, %Y";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("report column {column:?} is missing; upstream format may have changed")]
    SchemaMismatch { column: String },
    #[error("report line {line}: {reason}")]
    DataQuality { line: usize, reason: String },
}

/// Downloads authorized-requestor reports from the registry.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: reqwest::Client,
    base_url: String,
}

impl RegistryClient {
    pub fn new(config: &HttpConfig) -> anyhow::Result<Self> {
        Self::with_base_url(config, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(config: &HttpConfig, base_url: impl Into<String>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Downloads the raw report for a study. Single attempt, no retries.
    ///
    /// Any status other than 200 is an error; a failed download is never
    /// treated as an empty table.
    pub async fn fetch_authorized_requestors(
        &self,
        study_id: &str,
    ) -> Result<String, TransportError> {
        let url = format!("{}?study_id={study_id}", self.base_url);
        tracing::info!(study_id, %url, "downloading authorized requestor report");

        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();

        if status != StatusCode::OK {
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        Ok(resp.text().await?)
    }
}

/// Parses the raw tab-separated report into cleaned, date-sorted records.
///
/// Ragged rows are tolerated: trailing fields beyond the named columns are
/// ignored. A row missing a value for a named column, or carrying an
/// unparsable `Date of approval`, aborts the whole run with a
/// [`NormalizeError::DataQuality`] naming the offending line.
pub fn normalize(raw_text: &str) -> Result<Vec<RequestorRecord>, NormalizeError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(raw_text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| NormalizeError::DataQuality {
            line: 1,
            reason: e.to_string(),
        })?
        .clone();

    let requestor_idx = column_index(&headers, GARBLED_REQUESTOR_HEADER)?;
    let affiliation_idx = column_index(&headers, "Affiliation")?;
    let project_idx = column_index(&headers, "Project")?;
    let approval_idx = column_index(&headers, "Date of approval")?;
    let status_idx = column_index(&headers, "Request status")?;

    let mut records = Vec::new();
    for (row, result) in reader.records().enumerate() {
        // Line numbers count the header as line 1.
        let line = row + 2;
        let record = result.map_err(|e| NormalizeError::DataQuality {
            line,
            reason: e.to_string(),
        })?;

        let raw_date = field(&record, approval_idx, "Date of approval", line)?;
        let approval_date = NaiveDate::parse_from_str(raw_date.trim(), DATE_OF_APPROVAL_FORMAT)
            .map_err(|e| NormalizeError::DataQuality {
                line,
                reason: format!("unparsable Date of approval {raw_date:?}: {e}"),
            })?;

        records.push(RequestorRecord {
            requestor: field(&record, requestor_idx, GARBLED_REQUESTOR_HEADER, line)?
                .trim()
                .to_string(),
            affiliation: field(&record, affiliation_idx, "Affiliation", line)?
                .trim()
                .to_string(),
            project: field(&record, project_idx, "Project", line)?.trim().to_string(),
            approval_date,
            request_status: field(&record, status_idx, "Request status", line)?.to_string(),
        });
    }

    // Stable sort: rows sharing a date keep their original order.
    records.sort_by(|a, b| b.approval_date.cmp(&a.approval_date));
    Ok(records)
}

/// Keeps records approved strictly after `now - lookback`.
///
/// A record dated exactly at the boundary is excluded. Input ordering is
/// preserved. Pure function; `now` is always injected by the caller.
pub fn filter_recent(
    records: Vec<RequestorRecord>,
    now: DateTime<Utc>,
    lookback: Duration,
) -> Vec<RequestorRecord> {
    let cutoff = (now - lookback).date_naive();
    records
        .into_iter()
        .filter(|record| record.approval_date > cutoff)
        .collect()
}

fn column_index(headers: &StringRecord, name: &str) -> Result<usize, NormalizeError> {
    headers
        .iter()
        .position(|header| header == name)
        .ok_or_else(|| NormalizeError::SchemaMismatch {
            column: name.to_string(),
        })
}

fn field<'a>(
    record: &'a StringRecord,
    idx: usize,
    column: &str,
    line: usize,
) -> Result<&'a str, NormalizeError> {
    record.get(idx).ok_or_else(|| NormalizeError::DataQuality {
        line,
        reason: format!("missing field for column {column:?}"),
    })
}
