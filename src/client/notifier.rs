//! Follow-up delivery

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Serialize;
use std::time::Duration;

use super::{FollowUpContext, FollowUpSender};
use crate::error::{Result, UpstreamError};

#[derive(Serialize)]
struct FollowUpMessage<'a> {
    contact: &'a str,
    #[serde(flatten)]
    context: &'a FollowUpContext,
}

/// POSTs follow-ups as JSON to a webhook
pub struct WebhookNotifier {
    http: HttpClient,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(UpstreamError::from)?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl FollowUpSender for WebhookNotifier {
    async fn send_follow_up(
        &self,
        contact: &str,
        context: &FollowUpContext,
    ) -> std::result::Result<(), UpstreamError> {
        let response = self
            .http
            .post(&self.url)
            .json(&FollowUpMessage { contact, context })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_server_error() {
            Err(UpstreamError::ServerError(format!("Webhook returned {}", status)))
        } else {
            Err(UpstreamError::InvalidResponse(format!(
                "Webhook returned {}",
                status
            )))
        }
    }
}

/// Writes follow-ups to the log instead of delivering them
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl FollowUpSender for LogNotifier {
    async fn send_follow_up(
        &self,
        contact: &str,
        context: &FollowUpContext,
    ) -> std::result::Result<(), UpstreamError> {
        log::info!(
            "Follow-up for {} ({}) to {} [no webhook configured]",
            context.external_id,
            context.title,
            contact
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_flattens_context() {
        let context = FollowUpContext {
            external_id: "show-1".to_string(),
            title: "Hard Fork".to_string(),
            request_count: 3,
        };
        let json = serde_json::to_value(FollowUpMessage {
            contact: "owner@example.com",
            context: &context,
        })
        .unwrap();

        assert_eq!(json["contact"], "owner@example.com");
        assert_eq!(json["external_id"], "show-1");
        assert_eq!(json["request_count"], 3);
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        let context = FollowUpContext {
            external_id: "show-1".to_string(),
            title: "Hard Fork".to_string(),
            request_count: 1,
        };
        assert!(LogNotifier.send_follow_up("a@b.c", &context).await.is_ok());
    }
}
