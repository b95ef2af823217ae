use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::Client as RedisClient;
use tracing::debug;

use crate::history::ProfileRepository;

/// History storage in Redis, one string value per user key.
#[derive(Clone)]
pub struct RedisRepository {
    client: RedisClient,
}

impl RedisRepository {
    pub fn open(redis_url: &str) -> Result<Self> {
        let client = RedisClient::open(redis_url).context("Invalid REDIS_URL")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProfileRepository for RedisRepository {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?;
        let value: Option<String> = conn.get(key).await.with_context(|| format!("GET {key} failed"))?;
        debug!("Redis GET {key}: {}", if value.is_some() { "hit" } else { "miss" });
        Ok(value)
    }

    async fn put(&self, key: &str, value: String) -> Result<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?;
        conn.set::<_, _, ()>(key, value)
            .await
            .with_context(|| format!("SET {key} failed"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_rejects_malformed_url() {
        assert!(RedisRepository::open("not a url").is_err());
        assert!(RedisRepository::open("redis://127.0.0.1:6379").is_ok());
    }
}
