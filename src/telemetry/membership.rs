//! Membership cache: "is this API tracked?"
//!
//! Keyed by `ApiIdentity::cache_key()`; presence of a value means existence.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use sqlx::SqlitePool;

use crate::models::api::InvalidApiIdentity;
use crate::models::ApiIdentity;

#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    #[error(transparent)]
    InvalidIdentity(#[from] InvalidApiIdentity),
    #[error("membership store error: {0}")]
    Store(#[from] sqlx::Error),
}

#[async_trait]
pub trait MembershipCache: Send + Sync {
    async fn exists(&self, identity: &ApiIdentity) -> Result<bool, MembershipError>;

    /// Mark an API as tracked. Registering twice is a no-op.
    async fn register(&self, identity: &ApiIdentity) -> Result<(), MembershipError>;
}

/// SQLite-backed cache shared with the rest of the service database
#[derive(Clone)]
pub struct SqliteMembershipCache {
    pool: SqlitePool,
}

impl SqliteMembershipCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipCache for SqliteMembershipCache {
    async fn exists(&self, identity: &ApiIdentity) -> Result<bool, MembershipError> {
        let key = identity.cache_key()?;
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM api_membership WHERE cache_key = ?")
                .bind(&key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.is_some())
    }

    async fn register(&self, identity: &ApiIdentity) -> Result<(), MembershipError> {
        let key = identity.cache_key()?;
        sqlx::query(
            r#"
            INSERT INTO api_membership (cache_key, value, service_name, api_name, api_version)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(cache_key) DO NOTHING
            "#,
        )
        .bind(&key)
        .bind(Utc::now().to_rfc3339())
        .bind(&identity.service_name)
        .bind(&identity.api_name)
        .bind(identity.api_version.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Process-local cache, used in tests and when no database is configured
#[derive(Debug, Default)]
pub struct InMemoryMembershipCache {
    entries: DashMap<String, String>,
}

impl InMemoryMembershipCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl MembershipCache for InMemoryMembershipCache {
    async fn exists(&self, identity: &ApiIdentity) -> Result<bool, MembershipError> {
        Ok(self.entries.contains_key(&identity.cache_key()?))
    }

    async fn register(&self, identity: &ApiIdentity) -> Result<(), MembershipError> {
        self.entries
            .entry(identity.cache_key()?)
            .or_insert_with(|| Utc::now().to_rfc3339());
        Ok(())
    }
}
