//! ABOUTME: User and log services behind the REST handlers
//! ABOUTME: Keeps the by-email cache coherent and publishes user events

use std::sync::Arc;
use tracing::{info, warn};
use uh_core::{Error, Result};
use uh_db::{
    Cache, CachedUserRepository, CreateLogEntryRequest, CreateUserRequest, Db, LogEntry,
    LogEntryRepository, UpdateUserRequest, User,
};
use uh_events::{Event, Publisher};

/// Reason carried by failed-creation events and conflict responses
pub const EMAIL_TAKEN: &str = "Email already registered";

/// User management with caching and event publishing
#[derive(Clone)]
pub struct UserService {
    db: Db,
    cache: Arc<Cache<User>>,
    publisher: Arc<dyn Publisher>,
}

impl UserService {
    pub fn new(db: Db, cache: Arc<Cache<User>>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            db,
            cache,
            publisher,
        }
    }

    fn repo(&self) -> CachedUserRepository<'_> {
        CachedUserRepository::new(self.db.pool(), self.cache.clone())
    }

    /// Publish without failing the caller; the database write already stands
    async fn publish(&self, event: Event) {
        if let Err(e) = self.publisher.publish(&event).await {
            warn!(
                routing_key = event.routing_key(),
                publisher = self.publisher.name(),
                error = %e,
                "Failed to publish user event"
            );
        }
    }

    /// Register a user, or publish a failure event if the email is taken
    pub async fn add_user(&self, name: String, email: String) -> Result<User> {
        let repo = self.repo();

        if repo.find_by_email(&email).await?.is_some() {
            info!(email = %email, "Rejected duplicate user");
            self.publish(Event::user_creation_failed(&email, EMAIL_TAKEN))
                .await;
            return Err(Error::Conflict(EMAIL_TAKEN.to_string()));
        }

        let request = CreateUserRequest {
            name: name.clone(),
            email: email.clone(),
        };

        match repo.create(request).await {
            Ok(user) => {
                info!(user_id = %user.id, "User created");
                self.publish(Event::user_created(name, email)).await;
                Ok(user)
            }
            // Lost a race with a concurrent insert of the same email
            Err(Error::Conflict(_)) => {
                self.publish(Event::user_creation_failed(&email, EMAIL_TAKEN))
                    .await;
                Err(Error::Conflict(EMAIL_TAKEN.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.repo().list_active().await
    }

    pub async fn list_deleted_users(&self) -> Result<Vec<User>> {
        self.repo().list_deleted().await
    }

    /// Look up a live user by email through the cache
    pub async fn get_user_by_email(&self, email: &str) -> Result<User> {
        match self.repo().find_by_email(email).await? {
            Some(user) if !user.deleted => Ok(user),
            _ => Err(Error::NotFound("User not found".to_string())),
        }
    }

    /// Change name and/or email; empty values are ignored
    pub async fn update_user(
        &self,
        id: &str,
        name: Option<String>,
        email: Option<String>,
    ) -> Result<User> {
        let request = UpdateUserRequest {
            name: name.filter(|n| !n.is_empty()),
            email: email.filter(|e| !e.is_empty()),
        };

        let repo = self.repo();
        if request.name.is_none() && request.email.is_none() {
            // Nothing to change, but the user must still exist
            return repo
                .find_by_id(id)
                .await?
                .ok_or_else(|| Error::NotFound("User not found".to_string()));
        }

        let user = repo.update(id, request).await?;
        info!(user_id = %user.id, "User updated");
        Ok(user)
    }

    /// Flag a user as deleted and drop it from the cache
    pub async fn delete_user(&self, id: &str) -> Result<()> {
        self.repo().soft_delete(id).await?;
        info!(user_id = %id, "User soft deleted");
        Ok(())
    }
}

/// Append-only service log
#[derive(Clone)]
pub struct LogService {
    db: Db,
}

impl LogService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn add_log(&self, service: String, message: String) -> Result<LogEntry> {
        LogEntryRepository::new(self.db.pool())
            .create(CreateLogEntryRequest { service, message })
            .await
    }

    /// All entries, or one service's when `service` is given and non-empty
    pub async fn read_logs(&self, service: Option<&str>) -> Result<Vec<LogEntry>> {
        LogEntryRepository::new(self.db.pool())
            .list(service.filter(|s| !s.is_empty()))
            .await
    }
}
