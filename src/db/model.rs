//! Rows returned by the recipient store.

use chrono::{DateTime, Utc};

/// A registered user, i.e. one potential broadcast recipient.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub created_at: DateTime<Utc>,
}
