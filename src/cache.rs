//! Reference profile cache
//!
//! Reference solutions are graded against many candidates, so the extracted
//! IR and operation profile for a (source, language) pair is memoized for a
//! bounded window.
//!
//! # Consistency
//!
//! Keys are content hashes, so every writer for a key computed the same
//! value. Concurrent misses may both extract; whichever `put` lands first is
//! kept until it expires and later writes inside the window are dropped.
//! Entries are never mutated after insertion and readers only receive shared
//! handles. Expired entries are evicted lazily on the next lookup.

use crate::ir::{IntermediateProgram, OperationProfile};
use crate::types::Language;
use crate::util::hash_str;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Content-hash key for a program.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_source(source: &str, language: Language) -> Self {
        CacheKey(hash_str(&format!("{}\u{0}{}", language.as_str(), source)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Extracted IR together with its profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfiledProgram {
    pub program: IntermediateProgram,
    pub profile: OperationProfile,
}

impl ProfiledProgram {
    pub fn new(program: IntermediateProgram) -> Self {
        let profile = crate::ir::profile(&program);
        Self { program, profile }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Arc<ProfiledProgram>,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    /// A TTL that runs past chrono's date range never expires.
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.created_at
            .checked_add_signed(self.ttl)
            .is_some_and(|expires_at| now >= expires_at)
    }
}

/// Storage seam for reference profiles. The engine only ever talks to this
/// trait, so a shared store (e.g. a cache service) can replace the in-memory
/// default.
pub trait ProfileStore: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<Arc<ProfiledProgram>>;
    fn put(&self, key: CacheKey, value: Arc<ProfiledProgram>, ttl: Duration);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// In-process `ProfileStore` with lazy TTL eviction.
#[derive(Debug, Default)]
pub struct ReferenceCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<Arc<ProfiledProgram>> {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let expired = match guard.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "reference cache hit");
                return Some(Arc::clone(&entry.value));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            guard.remove(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "reference cache entry expired");
        } else {
            debug!(key = %key, "reference cache miss");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub(crate) fn put_at(
        &self,
        key: CacheKey,
        value: Arc<ProfiledProgram>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = guard.get(&key) {
            if !existing.is_expired(now) {
                // Write-once inside the window; the value is identical anyway.
                return;
            }
        }
        guard.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
                ttl,
            },
        );
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries,
        }
    }
}

impl ProfileStore for ReferenceCache {
    fn get(&self, key: &CacheKey) -> Option<Arc<ProfiledProgram>> {
        self.get_at(key, Utc::now())
    }

    fn put(&self, key: CacheKey, value: Arc<ProfiledProgram>, ttl: Duration) {
        self.put_at(key, value, ttl, Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::OpcodeClass;

    fn sample(lines: &[&str]) -> Arc<ProfiledProgram> {
        Arc::new(ProfiledProgram::new(IntermediateProgram::from_lines(
            lines.iter().copied(),
        )))
    }

    #[test]
    fn test_key_depends_on_language_and_source() {
        let a = CacheKey::for_source("print(1)", Language::Python);
        let b = CacheKey::for_source("print(1)", Language::JavaScript);
        let c = CacheKey::for_source("print(2)", Language::Python);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, CacheKey::for_source("print(1)", Language::Python));
    }

    #[test]
    fn test_key_is_full_sha256_digest() {
        let key = CacheKey::for_source("print(1)", Language::Python);
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_huge_ttl_never_expires() {
        let cache = ReferenceCache::new();
        let key = CacheKey::for_source("x", Language::C);
        let ttl = Duration::seconds(i64::MAX / 1_000);
        let t0 = Utc::now();
        cache.put_at(key.clone(), sample(&["ret i32 0"]), ttl, t0);
        cache.put_at(key.clone(), sample(&["ret i32 1"]), ttl, t0 + Duration::days(1));

        let value = cache.get_at(&key, t0 + Duration::days(365 * 50)).unwrap();
        assert_eq!(value.program.excerpt(1), vec!["ret i32 0".to_string()]);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_get_after_put_hits() {
        let cache = ReferenceCache::new();
        let key = CacheKey::for_source("x", Language::C);
        assert!(cache.get(&key).is_none());

        cache.put(key.clone(), sample(&["%1 = add i32 1, 2", "ret i32 %1"]), Duration::hours(1));
        let hit = cache.get(&key).unwrap();
        assert_eq!(hit.profile.count(OpcodeClass::Arithmetic), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_expired_entry_is_evicted_on_read() {
        let cache = ReferenceCache::new();
        let key = CacheKey::for_source("x", Language::C);
        let t0 = Utc::now();
        cache.put_at(key.clone(), sample(&["ret i32 0"]), Duration::seconds(10), t0);

        assert!(cache.get_at(&key, t0 + Duration::seconds(5)).is_some());
        assert!(cache.get_at(&key, t0 + Duration::seconds(10)).is_none());

        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn test_put_is_write_once_within_ttl() {
        let cache = ReferenceCache::new();
        let key = CacheKey::for_source("x", Language::C);
        let t0 = Utc::now();
        cache.put_at(key.clone(), sample(&["ret i32 0"]), Duration::seconds(60), t0);
        cache.put_at(
            key.clone(),
            sample(&["%1 = mul i32 2, 3", "ret i32 %1"]),
            Duration::seconds(60),
            t0 + Duration::seconds(1),
        );

        let value = cache.get_at(&key, t0 + Duration::seconds(2)).unwrap();
        assert_eq!(value.profile.total(), 1);

        // Past expiry the slot can be rewritten.
        cache.put_at(
            key.clone(),
            sample(&["%1 = mul i32 2, 3", "ret i32 %1"]),
            Duration::seconds(60),
            t0 + Duration::seconds(61),
        );
        let value = cache.get_at(&key, t0 + Duration::seconds(62)).unwrap();
        assert_eq!(value.profile.total(), 2);
    }

    #[test]
    fn test_concurrent_puts_converge() {
        let cache = Arc::new(ReferenceCache::new());
        let key = CacheKey::for_source("shared", Language::Python);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let key = key.clone();
                std::thread::spawn(move || {
                    cache.put(key, sample(&["BINARY_ADD", "RETURN_VALUE"]), Duration::hours(1));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.stats().entries, 1);
        assert_eq!(cache.get(&key).unwrap().profile.total(), 2);
    }
}
