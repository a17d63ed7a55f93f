//! Bounded LRU cache of record shapes keyed by query fingerprint.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use lru::LruCache;
use sqlparser::ast::{SetExpr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::query::record::RecordSchema;

pub struct RecordSchemaCache {
    inner: Mutex<LruCache<String, Arc<RecordSchema>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RecordSchemaCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a record shape; a hit promotes the entry to most recently
    /// used.
    pub fn get(&self, key: &str) -> Option<Arc<RecordSchema>> {
        let mut cache = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match cache.get(key) {
            Some(schema) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(schema))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace; the least-recently-used entry is evicted on
    /// overflow.
    pub fn put(&self, key: String, schema: Arc<RecordSchema>) {
        let mut cache = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(key, schema);
    }

    pub fn contains(&self, key: &str) -> bool {
        let cache = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        cache.contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// Cache key for a query: namespace, connector and the normalized query
/// text. Two queries that differ only by WHERE/ORDER/LIMIT bodies on the
/// same connector produce the same key.
pub fn fingerprint(namespace: &str, connector: &str, query: &str) -> String {
    match normalize(query) {
        Some(shape) => format!("{namespace}:{connector}:{shape}"),
        None => format!("{namespace}:{connector}:{query}"),
    }
}

/// Reduce a single SELECT to its FROM clause plus projected expressions and
/// aliases. Anything that does not parse as a single plain SELECT keeps its
/// raw text as the key.
fn normalize(query: &str) -> Option<String> {
    let statements = Parser::parse_sql(&GenericDialect {}, query).ok()?;
    if statements.len() != 1 {
        return None;
    }
    let Statement::Query(boxed) = &statements[0] else {
        return None;
    };
    let SetExpr::Select(select) = boxed.body.as_ref() else {
        return None;
    };
    let mut shape = String::new();
    for table in &select.from {
        shape.push_str(&table.to_string());
    }
    shape.push('|');
    for item in &select.projection {
        shape.push_str(&item.to_string());
        shape.push(',');
    }
    Some(shape)
}
