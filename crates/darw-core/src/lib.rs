//! Core domain model for DARW.

use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "darw-core";

/// One row of the normalized authorized-requestor table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestorRecord {
    /// Person or entity name, whitespace-trimmed.
    pub requestor: String,
    /// Institution, trimmed.
    pub affiliation: String,
    /// Free-text project description, trimmed.
    pub project: String,
    /// Parsed from the registry's abbreviated-month format ("Jan05, 2024").
    pub approval_date: NaiveDate,
    /// Raw status text, passed through unmodified.
    pub request_status: String,
}

/// HTTP transport settings shared by the report download and the webhook post.
///
/// The timeout is always explicit; the transport default is never relied on.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}
