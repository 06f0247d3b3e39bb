//! Recipient store: registered users in SQLite.
//!
//! - `model`: rows returned by queries.
//! - `repo`: SQL-only functions.
//!
//! [`SqliteRecipientSource`] adapts the store to the broadcast engine.

pub mod model;
pub mod repo;

pub use repo::*;

use crate::gateway::{RecipientSource, SourceError};
use crate::model::Recipient;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct SqliteRecipientSource {
    pool: Pool,
}

impl SqliteRecipientSource {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientSource for SqliteRecipientSource {
    async fn list_recipients(&self) -> Result<Vec<Recipient>, SourceError> {
        list_recipient_ids(&self.pool)
            .await
            .map_err(|err| SourceError(format!("{:#}", err)))
    }
}
