use super::model::UserRow;
use crate::model::Recipient;
use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open {}", normalized))?;
    // Readers (broadcast runs) must not block registrations.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// Expand a leading `~/` in a file-backed SQLite URL and create its parent
/// directory. Other URLs (including in-memory ones) are returned unchanged.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{}?{}", path, q),
        None => format!("sqlite://{}", path),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Registers a user as a recipient, refreshing the display fields if the
/// user already exists. Registration order is preserved.
#[instrument(skip_all)]
pub async fn upsert_user(
    pool: &Pool,
    user_id: i64,
    username: Option<&str>,
    full_name: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO users (id, username, full_name) VALUES (?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET username = excluded.username, full_name = excluded.full_name",
    )
    .bind(user_id)
    .bind(username)
    .bind(full_name)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn list_recipient_ids(pool: &Pool) -> Result<Vec<Recipient>> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM users ORDER BY created_at, id")
        .fetch_all(pool)
        .await?;
    Ok(ids.into_iter().map(Recipient).collect())
}

pub async fn get_user(pool: &Pool, user_id: i64) -> Result<Option<UserRow>> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id, username, full_name, created_at FROM users WHERE id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn count_users(pool: &Pool) -> Result<i64> {
    let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_urls_untouched() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(prepare_sqlite_url("postgres://x"), "postgres://x");
    }

    #[test]
    fn file_urls_are_normalized() {
        let td = tempfile::tempdir().unwrap();
        let file = td.path().join("nested").join("b.db");
        let url = format!("sqlite:{}?mode=rwc", file.display());
        let out = prepare_sqlite_url(&url);
        assert_eq!(out, format!("sqlite://{}?mode=rwc", file.display()));
        assert!(file.parent().unwrap().exists());
    }
}
