//! ABOUTME: Log entry repository backing the log collection service
//! ABOUTME: Stores service log lines and reads them back, optionally per service

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, instrument};
use uh_core::{now_iso8601, Error, Id, Result};

/// A stored log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct LogEntry {
    pub id: String,
    pub service: String,
    pub message: String,
    pub timestamp: String,
}

/// Request to record a log line; the timestamp is assigned on insert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLogEntryRequest {
    pub service: String,
    pub message: String,
}

/// Log entry repository
pub struct LogEntryRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> LogEntryRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self, request), fields(service = %request.service))]
    pub async fn create(&self, request: CreateLogEntryRequest) -> Result<LogEntry> {
        let entry = sqlx::query_as::<_, LogEntry>(
            r#"
            INSERT INTO log_entries (id, service, message, timestamp)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING id, service, message, timestamp
            "#,
        )
        .bind(Id::new().to_string())
        .bind(request.service)
        .bind(request.message)
        .bind(now_iso8601())
        .fetch_one(self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create log entry: {}", e)))?;

        debug!("Stored log entry: {}", entry.id);
        Ok(entry)
    }

    /// All entries, or only those of `service` when given and non-empty
    #[instrument(skip(self))]
    pub async fn list(&self, service: Option<&str>) -> Result<Vec<LogEntry>> {
        let query = match service.filter(|s| !s.is_empty()) {
            Some(service) => sqlx::query_as::<_, LogEntry>(
                "SELECT id, service, message, timestamp FROM log_entries \
                 WHERE service = ?1 ORDER BY rowid",
            )
            .bind(service.to_string()),
            None => sqlx::query_as::<_, LogEntry>(
                "SELECT id, service, message, timestamp FROM log_entries ORDER BY rowid",
            ),
        };

        query
            .fetch_all(self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to list log entries: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;
    use test_support::temp_db_path;

    #[tokio::test]
    async fn filter_by_service() {
        let (_dir, path) = temp_db_path();
        let db = Db::new(&path, 2).await.unwrap();
        let repo = LogEntryRepository::new(db.pool());

        for (service, message) in [("user", "User created"), ("notify", "push"), ("user", "deleted")] {
            repo.create(CreateLogEntryRequest {
                service: service.to_string(),
                message: message.to_string(),
            })
            .await
            .unwrap();
        }

        let all = repo.list(None).await.unwrap();
        assert_eq!(all.len(), 3);

        let user_logs = repo.list(Some("user")).await.unwrap();
        assert_eq!(user_logs.len(), 2);
        assert!(user_logs.iter().all(|e| e.service == "user"));
        assert_eq!(user_logs[0].message, "User created");

        // Empty filter means no filter
        assert_eq!(repo.list(Some("")).await.unwrap().len(), 3);
    }
}
