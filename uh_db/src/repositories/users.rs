//! ABOUTME: User repository with soft delete and unique email enforcement
//! ABOUTME: Provides the persistence side of the user management service

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, instrument};
use uh_core::{now_iso8601, Error, Id, Result};

/// User entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub deleted: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Request to create a new user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
}

/// Request to update a user; `None` keeps the current value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

const USER_COLUMNS: &str = "id, name, email, deleted, created_at, updated_at";

fn map_write_error(action: &str, e: sqlx::Error) -> Error {
    match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            Error::Conflict("Email already registered".to_string())
        }
        other => Error::Database(format!("Failed to {}: {}", action, other)),
    }
}

/// User repository
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new user
    #[instrument(skip(self, request))]
    pub async fn create(&self, request: CreateUserRequest) -> Result<User> {
        let id = Id::new().to_string();
        let now = now_iso8601();

        debug!("Creating user with id: {}", id);

        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (id, name, email, deleted, created_at, updated_at) \
             VALUES (?1, ?2, ?3, 0, ?4, ?5) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(id)
        .bind(request.name)
        .bind(request.email)
        .bind(&now)
        .bind(&now)
        .fetch_one(self.pool)
        .await
        .map_err(|e| map_write_error("create user", e))?;

        debug!("Successfully created user: {}", user.id);
        Ok(user)
    }

    /// Find a user by ID
    #[instrument(skip(self))]
    pub async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to find user by id: {}", e)))
    }

    /// Find a user by email, deleted or not
    #[instrument(skip(self))]
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE email = ?1",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to find user by email: {}", e)))
    }

    /// List users that have not been soft deleted
    #[instrument(skip(self))]
    pub async fn list_active(&self) -> Result<Vec<User>> {
        self.list_by_deleted(false).await
    }

    /// List soft deleted users
    #[instrument(skip(self))]
    pub async fn list_deleted(&self) -> Result<Vec<User>> {
        self.list_by_deleted(true).await
    }

    async fn list_by_deleted(&self, deleted: bool) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE deleted = ?1 ORDER BY rowid",
            USER_COLUMNS
        ))
        .bind(deleted)
        .fetch_all(self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list users: {}", e)))?;

        debug!(deleted, count = users.len(), "Listed users");
        Ok(users)
    }

    /// Update name and/or email
    #[instrument(skip(self, request))]
    pub async fn update(&self, id: &str, request: UpdateUserRequest) -> Result<User> {
        if request.name.is_none() && request.email.is_none() {
            return Err(Error::Validation("No fields to update".to_string()));
        }

        let now = now_iso8601();

        // Read-then-write inside one transaction
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(format!("Failed to begin transaction: {}", e)))?;

        let current = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = ?1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to find user by id: {}", e)))?
        .ok_or_else(|| Error::NotFound("User not found".to_string()))?;

        let name = request.name.unwrap_or(current.name);
        let email = request.email.unwrap_or(current.email);

        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET name = ?1, email = ?2, updated_at = ?3 WHERE id = ?4 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(name)
        .bind(email)
        .bind(&now)
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_write_error("update user", e))?;

        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit transaction: {}", e)))?;

        debug!("Successfully updated user: {}", user.id);
        Ok(user)
    }

    /// Soft delete: the row stays, flagged as deleted
    #[instrument(skip(self))]
    pub async fn soft_delete(&self, id: &str) -> Result<()> {
        let now = now_iso8601();

        let result = sqlx::query("UPDATE users SET deleted = 1, updated_at = ?1 WHERE id = ?2")
            .bind(&now)
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete user: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound("User not found".to_string()));
        }

        debug!("Soft deleted user: {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;
    use test_support::temp_db_path;

    fn request(name: &str, email: &str) -> CreateUserRequest {
        CreateUserRequest {
            name: name.to_string(),
            email: email.to_string(),
        }
    }

    #[tokio::test]
    async fn create_and_find() {
        let (_dir, path) = temp_db_path();
        let db = Db::new(&path, 2).await.unwrap();
        let repo = UserRepository::new(db.pool());

        let user = repo.create(request("Al", "al@x.com")).await.unwrap();
        assert!(!user.deleted);

        let by_id = repo.find_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(by_id, user);

        let by_email = repo.find_by_email("al@x.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, user.id);

        assert!(repo.find_by_email("nobody@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_conflict() {
        let (_dir, path) = temp_db_path();
        let db = Db::new(&path, 2).await.unwrap();
        let repo = UserRepository::new(db.pool());

        repo.create(request("Al", "al@x.com")).await.unwrap();
        let err = repo.create(request("Other", "al@x.com")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn soft_delete_moves_user_between_lists() {
        let (_dir, path) = temp_db_path();
        let db = Db::new(&path, 2).await.unwrap();
        let repo = UserRepository::new(db.pool());

        let al = repo.create(request("Al", "al@x.com")).await.unwrap();
        repo.create(request("Bo", "bo@x.com")).await.unwrap();

        repo.soft_delete(&al.id).await.unwrap();

        let active = repo.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].email, "bo@x.com");

        let deleted = repo.list_deleted().await.unwrap();
        assert_eq!(deleted.len(), 1);
        assert!(deleted[0].deleted);

        let missing = repo.soft_delete("01HZZZZZZZZZZZZZZZZZZZZZZZ").await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn update_keeps_unspecified_fields() {
        let (_dir, path) = temp_db_path();
        let db = Db::new(&path, 2).await.unwrap();
        let repo = UserRepository::new(db.pool());

        let al = repo.create(request("Al", "al@x.com")).await.unwrap();

        let updated = repo
            .update(
                &al.id,
                UpdateUserRequest {
                    name: Some("Albert".to_string()),
                    email: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Albert");
        assert_eq!(updated.email, "al@x.com");

        let empty = repo.update(&al.id, UpdateUserRequest::default()).await;
        assert!(matches!(empty, Err(Error::Validation(_))));
    }
}
