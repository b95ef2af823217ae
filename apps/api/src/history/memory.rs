use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::history::ProfileRepository;

/// Process-local history storage. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    values: RwLock<HashMap<String, String>>,
}

#[async_trait]
impl ProfileRepository for MemoryRepository {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }
}
