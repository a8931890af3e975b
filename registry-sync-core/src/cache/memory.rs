use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::contract::Cache;
use crate::error::CacheError;

#[derive(Debug, Default)]
pub struct MemoryCache {
    values: RwLock<HashMap<String, String>>,
    sets: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.values.write().await.remove(key);
        Ok(())
    }

    async fn set_add(&self, set: &str, member: &str) -> Result<(), CacheError> {
        self.sets
            .write()
            .await
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, set: &str, member: &str) -> Result<(), CacheError> {
        if let Some(members) = self.sets.write().await.get_mut(set) {
            members.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>, CacheError> {
        Ok(self
            .sets
            .read()
            .await
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }
}
