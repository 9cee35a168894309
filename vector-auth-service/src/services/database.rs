//! PostgreSQL metadata store: users and their vector database links.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use super::error::PersistenceError;
use crate::models::{User, VectorDatabase};

/// Lookup and conflict-tolerant creation of users.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, PersistenceError>;

    /// Insert `user` unless a row with the same email exists. Returns the row
    /// present after the call: the new one, or the pre-existing winner.
    async fn insert_if_absent(&self, user: &User) -> Result<User, PersistenceError>;

    async fn health_check(&self) -> Result<(), PersistenceError>;
}

/// Persistence of the user -> provisioned resource mapping.
#[async_trait]
pub trait ResourceRepository: Send + Sync {
    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<VectorDatabase>, PersistenceError>;

    async fn insert_link(&self, link: &VectorDatabase) -> Result<(), PersistenceError>;
}

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for Database {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, PersistenceError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn insert_if_absent(&self, user: &User) -> Result<User, PersistenceError> {
        let inserted = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, user_id, email, name, avatar_url, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (email) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(user.id)
        .bind(&user.user_id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.avatar_url)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(row) => Ok(row),
            // Lost the race: the concurrent winner's row is the result.
            None => self
                .find_by_email(&user.email)
                .await?
                .ok_or_else(|| PersistenceError::MissingAfterConflict(user.email.clone())),
        }
    }

    async fn health_check(&self) -> Result<(), PersistenceError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            PersistenceError::Database(e)
        })?;
        Ok(())
    }
}

#[async_trait]
impl ResourceRepository for Database {
    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<VectorDatabase>, PersistenceError> {
        let link = sqlx::query_as::<_, VectorDatabase>(
            "SELECT * FROM vector_databases WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(link)
    }

    async fn insert_link(&self, link: &VectorDatabase) -> Result<(), PersistenceError> {
        let result = sqlx::query(
            r#"
            INSERT INTO vector_databases (id, vector_db_id, user_id, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(link.id)
        .bind(&link.vector_db_id)
        .bind(link.user_id)
        .bind(link.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::AlreadyLinked(link.user_id));
        }
        Ok(())
    }
}

/// In-memory repository used by tests and local runs without Postgres.
#[derive(Default)]
pub struct InMemoryRepository {
    users: Mutex<HashMap<String, User>>,
    links: Mutex<Vec<VectorDatabase>>,
    fail_user_insert: AtomicBool,
    fail_link_insert: AtomicBool,
    fail_next_link_insert: AtomicBool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing user, bypassing conflict handling.
    pub fn with_user(self, user: User) -> Self {
        self.lock_users().insert(user.email.clone(), user);
        self
    }

    pub fn with_link(self, link: VectorDatabase) -> Self {
        self.lock_links().push(link);
        self
    }

    pub fn fail_user_inserts(&self, fail: bool) {
        self.fail_user_insert.store(fail, Ordering::SeqCst);
    }

    pub fn fail_link_inserts(&self, fail: bool) {
        self.fail_link_insert.store(fail, Ordering::SeqCst);
    }

    /// Fail only the next `insert_link` call.
    pub fn fail_next_link_insert(&self) {
        self.fail_next_link_insert.store(true, Ordering::SeqCst);
    }

    pub fn user_count(&self) -> usize {
        self.lock_users().len()
    }

    pub fn users_with_email(&self, email: &str) -> usize {
        self.lock_users().values().filter(|u| u.email == email).count()
    }

    pub fn links(&self) -> Vec<VectorDatabase> {
        self.lock_links().clone()
    }

    pub fn links_for(&self, user_id: Uuid) -> usize {
        self.lock_links().iter().filter(|l| l.user_id == user_id).count()
    }

    fn lock_users(&self) -> std::sync::MutexGuard<'_, HashMap<String, User>> {
        self.users.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_links(&self) -> std::sync::MutexGuard<'_, Vec<VectorDatabase>> {
        self.links.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl UserRepository for InMemoryRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, PersistenceError> {
        Ok(self.lock_users().get(email).cloned())
    }

    async fn insert_if_absent(&self, user: &User) -> Result<User, PersistenceError> {
        if self.fail_user_insert.load(Ordering::SeqCst) {
            return Err(PersistenceError::Database(sqlx::Error::PoolClosed));
        }
        let mut users = self.lock_users();
        let row = users
            .entry(user.email.clone())
            .or_insert_with(|| user.clone());
        Ok(row.clone())
    }

    async fn health_check(&self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

#[async_trait]
impl ResourceRepository for InMemoryRepository {
    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<VectorDatabase>, PersistenceError> {
        Ok(self
            .lock_links()
            .iter()
            .find(|l| l.user_id == user_id)
            .cloned())
    }

    async fn insert_link(&self, link: &VectorDatabase) -> Result<(), PersistenceError> {
        if self.fail_link_insert.load(Ordering::SeqCst)
            || self.fail_next_link_insert.swap(false, Ordering::SeqCst)
        {
            return Err(PersistenceError::Database(sqlx::Error::PoolClosed));
        }
        let mut links = self.lock_links();
        if links.iter().any(|l| l.user_id == link.user_id) {
            return Err(PersistenceError::AlreadyLinked(link.user_id));
        }
        links.push(link.clone());
        Ok(())
    }
}
