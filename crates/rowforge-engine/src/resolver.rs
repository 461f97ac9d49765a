//! Store-backed rule resolution with a TTL cache
//!
//! Resolution is always re-derivable from the source configurations, so
//! the cache needs no cross-key locking: a read stale by at most the TTL
//! is an accepted tradeoff, never a correctness violation. Configuration
//! mutations invalidate by template id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rowforge_core::resolver::{ResolvedMappingConfig, merge_configs};

use crate::error::Result;
use crate::store::ConfigStore;

/// Default cache entry lifetime
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    template_id: String,
    company_id: Option<String>,
    format_id: Option<String>,
}

struct CacheEntry {
    inserted_at: Instant,
    resolved: Arc<ResolvedMappingConfig>,
}

/// TTL cache over resolved rule sets, keyed by the
/// (template, company, format) triple
pub struct ResolverCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl ResolverCache {
    /// Create a cache with the given entry lifetime.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, key: &CacheKey) -> Option<Arc<ResolvedMappingConfig>> {
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(key)?;
        if entry.inserted_at.elapsed() >= self.ttl {
            return None;
        }
        Some(Arc::clone(&entry.resolved))
    }

    fn insert(&self, key: CacheKey, resolved: Arc<ResolvedMappingConfig>) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key,
            CacheEntry {
                inserted_at: Instant::now(),
                resolved,
            },
        );
    }

    /// Drop every entry belonging to a template. Called on any
    /// configuration create/update/delete touching that template.
    pub fn invalidate_template(&self, template_id: &str) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|key, _| key.template_id != template_id);
    }

    /// Number of live entries (expired entries included until reinserted).
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves the applicable rule set for a (template, company, format)
/// triple, caching results
pub struct RuleResolver {
    store: Arc<dyn ConfigStore>,
    cache: ResolverCache,
}

impl RuleResolver {
    /// Create a resolver with the default TTL.
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self::with_ttl(store, DEFAULT_CACHE_TTL)
    }

    /// Create a resolver with an injected TTL (tests use a short one).
    pub fn with_ttl(store: Arc<dyn ConfigStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: ResolverCache::new(ttl),
        }
    }

    /// Resolve the merged rule set, consulting the cache first.
    pub async fn resolve(
        &self,
        template_id: &str,
        company_id: Option<&str>,
        format_id: Option<&str>,
    ) -> Result<Arc<ResolvedMappingConfig>> {
        let key = CacheKey {
            template_id: template_id.to_string(),
            company_id: company_id.map(str::to_string),
            format_id: format_id.map(str::to_string),
        };
        if let Some(cached) = self.cache.get(&key) {
            tracing::trace!(template_id, "resolver cache hit");
            return Ok(cached);
        }

        let configs = self
            .store
            .list_configs(template_id, company_id, format_id)
            .await?;
        let resolved = Arc::new(merge_configs(template_id, company_id, format_id, &configs));
        self.cache.insert(key, Arc::clone(&resolved));
        Ok(resolved)
    }

    /// Invalidate cached resolutions for a template.
    pub fn invalidate_template(&self, template_id: &str) {
        self.cache.invalidate_template(template_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use rowforge_core::rules::{ConfigScope, MappingConfig, MappingRule, TransformKind};

    fn config(id: &str, template_id: &str, source: &str, target: &str) -> MappingConfig {
        MappingConfig {
            id: id.to_string(),
            name: id.to_string(),
            scope: ConfigScope::Global,
            template_id: template_id.to_string(),
            company_id: None,
            document_format_id: None,
            rules: vec![MappingRule {
                source_fields: vec![source.to_string()],
                target_field: target.to_string(),
                transform: TransformKind::Direct,
                order: 0,
                is_required: false,
                priority: 0,
            }],
            priority: 0,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_cache_hit_returns_same_resolution() {
        let store = Arc::new(MemoryStore::new());
        store.insert_config(config("c1", "tpl", "a", "x"));
        let resolver = RuleResolver::new(store.clone());

        let first = resolver.resolve("tpl", None, None).await.unwrap();

        // Mutate behind the cache's back; within the TTL the stale read
        // is expected.
        store.insert_config(config("c2", "tpl", "b", "y"));
        let second = resolver.resolve("tpl", None, None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second.rules.len(), 1);
    }

    #[tokio::test]
    async fn test_invalidation_forces_recompute() {
        let store = Arc::new(MemoryStore::new());
        store.insert_config(config("c1", "tpl", "a", "x"));
        let resolver = RuleResolver::new(store.clone());

        resolver.resolve("tpl", None, None).await.unwrap();
        store.insert_config(config("c2", "tpl", "b", "y"));
        resolver.invalidate_template("tpl");

        let resolved = resolver.resolve("tpl", None, None).await.unwrap();
        assert_eq!(resolved.rules.len(), 2);
    }

    #[tokio::test]
    async fn test_ttl_expiry_forces_recompute() {
        let store = Arc::new(MemoryStore::new());
        store.insert_config(config("c1", "tpl", "a", "x"));
        let resolver = RuleResolver::with_ttl(store.clone(), Duration::from_millis(10));

        resolver.resolve("tpl", None, None).await.unwrap();
        store.insert_config(config("c2", "tpl", "b", "y"));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let resolved = resolver.resolve("tpl", None, None).await.unwrap();
        assert_eq!(resolved.rules.len(), 2);
    }

    #[tokio::test]
    async fn test_invalidation_is_scoped_to_template() {
        let store = Arc::new(MemoryStore::new());
        store.insert_config(config("c1", "tpl-a", "a", "x"));
        store.insert_config(config("c2", "tpl-b", "b", "y"));
        let resolver = RuleResolver::new(store.clone());

        resolver.resolve("tpl-a", None, None).await.unwrap();
        resolver.resolve("tpl-b", None, None).await.unwrap();
        assert_eq!(resolver.cache.len(), 2);

        resolver.invalidate_template("tpl-a");
        assert_eq!(resolver.cache.len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_triples_cache_separately() {
        let store = Arc::new(MemoryStore::new());
        store.insert_config(config("c1", "tpl", "a", "x"));
        let resolver = RuleResolver::new(store.clone());

        resolver.resolve("tpl", None, None).await.unwrap();
        resolver.resolve("tpl", Some("acme"), None).await.unwrap();
        resolver
            .resolve("tpl", Some("acme"), Some("pdf"))
            .await
            .unwrap();
        assert_eq!(resolver.cache.len(), 3);
    }
}
