//! ABOUTME: Cache-aware user repository keyed by email
//! ABOUTME: Reads through the cache and evicts on every write that touches an email

use crate::{cache::Cache, repositories::users::*};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;
use uh_core::{Error, Result};

/// User repository that keeps a by-email read-through cache coherent
pub struct CachedUserRepository<'a> {
    repo: UserRepository<'a>,
    cache: Arc<Cache<User>>,
}

impl<'a> CachedUserRepository<'a> {
    pub fn new(pool: &'a SqlitePool, cache: Arc<Cache<User>>) -> Self {
        Self {
            repo: UserRepository::new(pool),
            cache,
        }
    }

    /// Create a new user and cache it
    pub async fn create(&self, request: CreateUserRequest) -> Result<User> {
        let user = self.repo.create(request).await?;
        self.cache.put(user.email.clone(), user.clone());
        debug!("Cached new user: {}", user.id);
        Ok(user)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        self.repo.find_by_id(id).await
    }

    /// Find user by email, cache first
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.cache
            .get_or_compute(email, || self.repo.find_by_email(email))
            .await
    }

    pub async fn list_active(&self) -> Result<Vec<User>> {
        self.repo.list_active().await
    }

    pub async fn list_deleted(&self) -> Result<Vec<User>> {
        self.repo.list_deleted().await
    }

    /// Update a user; both the previous and the new email are evicted once the write commits
    pub async fn update(&self, id: &str, request: UpdateUserRequest) -> Result<User> {
        let current = self
            .repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound("User not found".to_string()))?;
        let new_email = request.email.clone();

        let user = self.repo.update(id, request).await?;

        self.cache.evict(&current.email);
        if let Some(ref email) = new_email {
            self.cache.evict(email);
        }
        if !user.deleted {
            self.cache.put(user.email.clone(), user.clone());
        }

        debug!("Updated user and refreshed cache: {}", user.id);
        Ok(user)
    }

    /// Soft delete a user and drop its cache entry after the write commits
    pub async fn soft_delete(&self, id: &str) -> Result<()> {
        let user = self.repo.find_by_id(id).await?;
        self.repo.soft_delete(id).await?;

        if let Some(user) = user {
            self.cache.evict(&user.email);
        }
        Ok(())
    }

    pub fn cache(&self) -> &Cache<User> {
        &self.cache
    }
}
