//! Shadow result cache.
//!
//! Identical stages seen under the same rule version get the same shadow
//! verdict for the cache's lifetime, so a repeated escalation costs no
//! provider call. Only successful verdicts are stored.

use moka::future::Cache;
use riskgate_core::{ShadowAgentResult, ShadowAgentType, StagePayload};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::CacheConfig;

/// Stable cache key: SHA-256 over rule version, agent type and the stage
/// payload as JSON, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// `None` only if the payload cannot be serialized.
    pub fn new(rule_version: &str, agent: ShadowAgentType, payload: &StagePayload) -> Option<Self> {
        let payload = serde_json::to_vec(payload).ok()?;
        let mut hasher = Sha256::new();
        hasher.update(rule_version.as_bytes());
        hasher.update([0u8]);
        hasher.update(agent.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(&payload);
        Some(Self(format!("{:x}", hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub struct ShadowCache {
    cache: Cache<CacheKey, ShadowAgentResult>,
}

impl ShadowCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    /// `None` when caching is disabled.
    pub fn from_config(config: &CacheConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.max_capacity, config.ttl))
    }

    pub async fn get(&self, key: &CacheKey) -> Option<ShadowAgentResult> {
        self.cache.get(key).await
    }

    /// Store a verdict. Fallbacks are never cached.
    pub async fn insert(&self, key: CacheKey, result: ShadowAgentResult) {
        if result.fallback_used {
            return;
        }
        self.cache.insert(key, result).await;
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

impl Default for ShadowCache {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(3600))
    }
}

impl std::fmt::Debug for ShadowCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riskgate_core::{FallbackReason, Layer, RiskScore, RiskThresholds};
    use std::collections::BTreeMap;

    fn verdict() -> ShadowAgentResult {
        let score = RiskScore::new(
            Layer::InputGuard,
            0.7,
            BTreeMap::new(),
            "rules",
            &RiskThresholds::default(),
        );
        let mut result =
            ShadowAgentResult::fallback(ShadowAgentType::Input, &score, FallbackReason::Timeout);
        result.fallback_used = false;
        result.fallback_reason = None;
        result.provider = "scripted".to_string();
        result
    }

    #[test]
    fn test_key_is_stable_and_discriminating() {
        let payload = StagePayload::input("hello");
        let a = CacheKey::new("v1", ShadowAgentType::Input, &payload).unwrap();
        let b = CacheKey::new("v1", ShadowAgentType::Input, &payload).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);

        assert_ne!(a, CacheKey::new("v2", ShadowAgentType::Input, &payload).unwrap());
        assert_ne!(a, CacheKey::new("v1", ShadowAgentType::Output, &payload).unwrap());
        assert_ne!(
            a,
            CacheKey::new("v1", ShadowAgentType::Input, &StagePayload::input("hello!")).unwrap()
        );
    }

    #[tokio::test]
    async fn test_cache_operations() {
        let cache = ShadowCache::default();
        let key = CacheKey::new("v1", ShadowAgentType::Input, &StagePayload::input("x")).unwrap();

        assert!(cache.get(&key).await.is_none());
        cache.insert(key.clone(), verdict()).await;
        let cached = cache.get(&key).await.unwrap();
        assert_eq!(cached.provider, "scripted");
        assert_eq!(cache.entry_count().await, 1);

        cache.invalidate_all();
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_fallbacks_are_not_cached() {
        let cache = ShadowCache::default();
        let key = CacheKey::new("v1", ShadowAgentType::Input, &StagePayload::input("x")).unwrap();
        let mut fallback = verdict();
        fallback.fallback_used = true;
        cache.insert(key.clone(), fallback).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[test]
    fn test_disabled_cache() {
        let config = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(ShadowCache::from_config(&config).is_none());
    }
}
