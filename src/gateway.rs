//! Boundaries to the outside world: the messaging gateway, the status sink
//! that shows live progress, and the store that lists recipients.
use crate::model::{Payload, Recipient};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy of a single gateway call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("too many requests, retry after {0:?}")]
    RetryAfter(Duration),
    #[error("chat migrated to {0}")]
    Migrated(Recipient),
    #[error("gateway error: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
#[error("status sink error: {0}")]
pub struct SinkError(pub String);

#[derive(Debug, Error)]
#[error("recipient source unavailable: {0}")]
pub struct SourceError(pub String);

/// Sole network boundary for deliveries. One call is one attempt.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn send_text(&self, to: Recipient, payload: &Payload) -> Result<(), GatewayError>;

    async fn send_image(
        &self,
        to: Recipient,
        image: &str,
        payload: &Payload,
    ) -> Result<(), GatewayError>;
}

/// Opaque reference to the status message created by a [`StatusSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusHandle {
    pub chat: i64,
    pub message: i32,
}

#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn create_status(&self, text: &str) -> Result<StatusHandle, SinkError>;

    async fn update_status(&self, handle: &StatusHandle, text: &str) -> Result<(), SinkError>;
}

#[async_trait]
pub trait RecipientSource: Send + Sync {
    async fn list_recipients(&self) -> Result<Vec<Recipient>, SourceError>;
}

/// Fixed list of recipients, mostly useful for tests and one-off runs.
#[async_trait]
impl RecipientSource for Vec<Recipient> {
    async fn list_recipients(&self) -> Result<Vec<Recipient>, SourceError> {
        Ok(self.clone())
    }
}

/// Sink that writes progress into the log instead of a chat.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl StatusSink for LogSink {
    async fn create_status(&self, text: &str) -> Result<StatusHandle, SinkError> {
        tracing::info!(status = %text, "broadcast status");
        Ok(StatusHandle {
            chat: 0,
            message: 0,
        })
    }

    async fn update_status(&self, _handle: &StatusHandle, text: &str) -> Result<(), SinkError> {
        tracing::info!(status = %text, "broadcast status");
        Ok(())
    }
}
