use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::StatusRecord;

/// Redis key holding the status record of a job.
pub fn status_key(job_id: Uuid) -> String {
    format!("job:{job_id}")
}

/// Key-value store of job status records with a retention window.
///
/// Every `put` overwrites the whole record and restarts its TTL. A record
/// that has expired is indistinguishable from one that never existed.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn put(&self, job_id: Uuid, record: &StatusRecord) -> Result<(), StatusStoreError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<StatusRecord>, StatusStoreError>;

    async fn health_check(&self) -> Result<(), StatusStoreError>;
}

/// Redis-backed status store (`SET job:{id} <json> EX <ttl>`).
pub struct RedisStatusStore {
    client: redis::Client,
    ttl: Duration,
}

impl RedisStatusStore {
    pub fn new(redis_url: &str, ttl: Duration) -> Result<Self, StatusStoreError> {
        let client = redis::Client::open(redis_url).map_err(StatusStoreError::Redis)?;
        Ok(Self { client, ttl })
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn put(&self, job_id: Uuid, record: &StatusRecord) -> Result<(), StatusStoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(record)?;
        conn.set_ex::<_, _, ()>(status_key(job_id), payload, self.ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<StatusRecord>, StatusStoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.get(status_key(job_id)).await?;

        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn health_check(&self) -> Result<(), StatusStoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatusStoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Status store unavailable: {0}")]
    Unavailable(String),
}
