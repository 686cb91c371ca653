//! Webhook notification rendering and delivery.

use anyhow::Context;
use darw_core::{HttpConfig, RequestorRecord};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "darw-notify";

/// Wire form accepted by the messaging webhook: an ordered `blocks` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub blocks: Vec<SectionBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: MrkdwnText,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MrkdwnText {
    #[serde(rename = "type")]
    pub text_type: String,
    pub text: String,
}

impl SectionBlock {
    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self {
            block_type: "section".to_string(),
            text: MrkdwnText {
                text_type: "mrkdwn".to_string(),
                text: text.into(),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("webhook returned status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Renders a record set into webhook blocks, most recent first.
///
/// An empty record set produces the single "no new requestors" block rather
/// than an empty list; that is a distinct terminal state, not a degenerate
/// run of the general renderer.
pub fn format_notification(records: &[RequestorRecord], lookback_days: i64) -> MessagePayload {
    if records.is_empty() {
        return MessagePayload {
            blocks: vec![SectionBlock::mrkdwn(format!(
                "No new dbGaP Authorized Requestors added in the last {lookback_days} days"
            ))],
        };
    }

    let mut blocks = vec![SectionBlock::mrkdwn(format!(
        "*New dbGaP Authorized Requestors added in the last {lookback_days} days*"
    ))];
    for record in records {
        blocks.push(SectionBlock::mrkdwn(format!(
            "{} from {} {} on {}\n> {}",
            record.requestor,
            record.affiliation,
            record.request_status,
            record.approval_date.format("%a %d %B"),
            record.project
        )));
    }
    MessagePayload { blocks }
}

/// Posts payloads to a fixed webhook endpoint. Single attempt, no retries.
#[derive(Debug, Clone)]
pub struct WebhookPublisher {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookPublisher {
    pub fn new(config: &HttpConfig, endpoint: impl Into<String>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Serializes the payload and posts it. Any status other than 200 is a
    /// [`PublishError::Rejected`] carrying the remote status and body
    /// verbatim, so operators can diagnose webhook misconfiguration.
    pub async fn publish(&self, payload: &MessagePayload) -> Result<(), PublishError> {
        tracing::info!(blocks = payload.blocks.len(), "posting webhook notification");

        let resp = self.client.post(&self.endpoint).json(payload).send().await?;
        let status = resp.status();

        if status != StatusCode::OK {
            let body = resp.text().await?;
            return Err(PublishError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}
