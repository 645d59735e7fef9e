//! The compiled template cache.
//!
//! Template compilation is regex-heavy, and callers tend to run the same handful of
//! templates over many inputs, so compiled templates are cached by source text and options.
//! Eviction is least-recently-used via a monotonic access stamp. A per-key lock table gives
//! single-flight compilation: when several threads request the same missing template, one
//! compiles while the rest wait for its result, and compile errors are returned to every
//! waiter without being cached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use once_cell::sync::Lazy;

use crate::definition::TemplateDefinition;
use crate::error::TemplateError;
use crate::grammar;
use crate::template::{Template, TemplateOptions};

/// The cache shared by [`Template::new`] and friends.
pub(crate) fn shared() -> &'static TemplateCache {
    static SHARED: Lazy<TemplateCache> = Lazy::new(|| TemplateCache::new(128));
    &SHARED
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    text: String,
    options: TemplateOptions,
}

struct CacheEntry {
    template: Arc<Template>,
    /// Stamp of the most recent hit; the smallest stamp is evicted first.
    last_access: u64,
}

/// Hit/miss counters, readable through [`TemplateCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

struct KeyLock {
    mutex: Mutex<bool>,
    ready: Condvar,
    waiters: AtomicU64,
}

/// An LRU cache of compiled templates, keyed by source text and options.
pub struct TemplateCache {
    capacity: usize,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    stamp: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    locks: Mutex<HashMap<CacheKey, Arc<KeyLock>>>,
}

impl TemplateCache {
    /// A cache holding at most `capacity` templates. A capacity of zero disables caching;
    /// every request compiles directly.
    pub fn new(capacity: usize) -> TemplateCache {
        TemplateCache {
            capacity,
            entries: Mutex::new(HashMap::new()),
            stamp: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached template for `text`, compiling and inserting it on a miss.
    pub fn get(&self, text: &str, options: TemplateOptions) -> Result<Arc<Template>, TemplateError> {
        let key = CacheKey { text: text.to_string(), options };
        self.get_or_compile(key, || {
            Ok(Arc::new(Template::compile(&grammar::parse(text)?, options)?))
        })
    }

    /// Like [`get`](Self::get), keyed by the definition's rendered text.
    pub fn get_definition(
        &self,
        definition: &TemplateDefinition,
        options: TemplateOptions,
    ) -> Result<Arc<Template>, TemplateError> {
        let key = CacheKey { text: definition.to_string(), options };
        self.get_or_compile(key, || Ok(Arc::new(Template::compile(definition, options)?)))
    }

    /// The hit/miss counters so far.
    pub fn stats(&self) -> CacheStats {
        CacheStats { hits: self.hits.load(Ordering::Relaxed), misses: self.misses.load(Ordering::Relaxed) }
    }

    /// The number of cached templates.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every cached template. Counters are kept.
    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
    }

    fn get_or_compile(
        &self,
        key: CacheKey,
        compile: impl FnOnce() -> Result<Arc<Template>, TemplateError>,
    ) -> Result<Arc<Template>, TemplateError> {
        if self.capacity == 0 {
            return compile();
        }

        if let Some(template) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(template);
        }

        let lock = self.lock_for(&key);
        let mut compiling = lock.mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while *compiling {
            compiling = lock.ready.wait(compiling).unwrap_or_else(|poisoned| poisoned.into_inner());
        }

        // another waiter may have filled the entry while this thread slept
        if let Some(template) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            drop(compiling);
            self.release(&key, lock);
            return Ok(template);
        }

        *compiling = true;
        drop(compiling);

        self.misses.fetch_add(1, Ordering::Relaxed);
        let result = compile();

        if let Ok(template) = &result {
            self.insert(key.clone(), Arc::clone(template));
        }

        let mut compiling = lock.mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *compiling = false;
        drop(compiling);
        lock.ready.notify_all();
        self.release(&key, lock);

        result
    }

    fn lookup(&self, key: &CacheKey) -> Option<Arc<Template>> {
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = entries.get_mut(key)?;
        entry.last_access = self.stamp.fetch_add(1, Ordering::Relaxed);
        Some(Arc::clone(&entry.template))
    }

    fn insert(&self, key: CacheKey, template: Arc<Template>) {
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        while entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(oldest) => entries.remove(&oldest),
                None => break,
            };
        }

        let last_access = self.stamp.fetch_add(1, Ordering::Relaxed);
        entries.insert(key, CacheEntry { template, last_access });
    }

    fn lock_for(&self, key: &CacheKey) -> Arc<KeyLock> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let lock = locks.entry(key.clone()).or_insert_with(|| {
            Arc::new(KeyLock { mutex: Mutex::new(false), ready: Condvar::new(), waiters: AtomicU64::new(0) })
        });
        lock.waiters.fetch_add(1, Ordering::Relaxed);
        Arc::clone(lock)
    }

    fn release(&self, key: &CacheKey, lock: Arc<KeyLock>) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if lock.waiters.fetch_sub(1, Ordering::Relaxed) == 1 {
            locks.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template_text(tag: usize) -> String {
        format!("Value V{tag} (\\w+)\n\nStart\n ^${{V{tag}}} -> Record\n")
    }

    #[test]
    fn hits_reuse_the_same_template() {
        let cache = TemplateCache::new(4);
        let text = template_text(0);

        let first = cache.get(&text, TemplateOptions::default()).unwrap();
        let second = cache.get(&text, TemplateOptions::default()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[test]
    fn options_are_part_of_the_key() {
        let cache = TemplateCache::new(4);
        let text = template_text(0);
        let null_options = TemplateOptions {
            unmatched_value: crate::template::UnmatchedHandling::Null,
            ..TemplateOptions::default()
        };

        let first = cache.get(&text, TemplateOptions::default()).unwrap();
        let second = cache.get(&text, null_options).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        let cache = TemplateCache::new(2);
        let a = template_text(0);
        let b = template_text(1);
        let c = template_text(2);

        cache.get(&a, TemplateOptions::default()).unwrap();
        cache.get(&b, TemplateOptions::default()).unwrap();
        // touch `a` so `b` becomes the eviction candidate
        cache.get(&a, TemplateOptions::default()).unwrap();
        cache.get(&c, TemplateOptions::default()).unwrap();

        assert_eq!(cache.len(), 2);
        cache.get(&a, TemplateOptions::default()).unwrap();
        assert_eq!(cache.stats().hits, 2);
        // `b` was evicted, so requesting it again is a miss
        cache.get(&b, TemplateOptions::default()).unwrap();
        assert_eq!(cache.stats().misses, 4);
    }

    #[test]
    fn zero_capacity_disables_caching() {
        let cache = TemplateCache::new(0);
        let text = template_text(0);

        let first = cache.get(&text, TemplateOptions::default()).unwrap();
        let second = cache.get(&text, TemplateOptions::default()).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(cache.is_empty());
    }

    #[test]
    fn compile_errors_are_not_cached() {
        let cache = TemplateCache::new(4);

        assert!(cache.get("garbage", TemplateOptions::default()).is_err());
        assert!(cache.is_empty());
        assert!(cache.get("garbage", TemplateOptions::default()).is_err());
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn definition_and_text_share_an_entry() {
        let cache = TemplateCache::new(4);
        let text = template_text(0);
        let definition = grammar::parse(&text).unwrap();

        let from_text = cache.get(&definition.to_string(), TemplateOptions::default()).unwrap();
        let from_definition = cache.get_definition(&definition, TemplateOptions::default()).unwrap();
        assert!(Arc::ptr_eq(&from_text, &from_definition));
    }

    #[test]
    fn concurrent_requests_compile_once() {
        let cache = Arc::new(TemplateCache::new(4));
        let text = Arc::new(template_text(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let text = Arc::clone(&text);
                std::thread::spawn(move || cache.get(&text, TemplateOptions::default()).unwrap())
            })
            .collect();

        let templates: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();
        assert!(templates.iter().all(|template| Arc::ptr_eq(template, &templates[0])));
        assert_eq!(cache.stats().misses, 1);
    }
}
