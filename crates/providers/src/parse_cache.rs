use crate::{ParseInput, ParsedSchema, ProviderError};
use models::SchemaReference;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ParseCacheOptions {
    pub capacity: usize,
    pub expiry: Duration,
}

impl Default for ParseCacheOptions {
    fn default() -> Self {
        Self {
            capacity: 1000,
            expiry: Duration::from_secs(300),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    schema_type: String,
    raw: String,
    references: Vec<SchemaReference>,
    is_new: bool,
    normalize: bool,
}

struct CacheEntry {
    inserted: Instant,
    parsed: Arc<ParsedSchema>,
}

/// Bounded cache amortizing schema parsing, keyed by the raw text and the
/// parse flags. Entries expire by age, and the oldest entry is evicted when
/// the cache is full.
pub(crate) struct ParseCache {
    store: Mutex<HashMap<CacheKey, CacheEntry>>,
    options: ParseCacheOptions,
}

impl ParseCache {
    pub(crate) fn new(options: ParseCacheOptions) -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
            options,
        }
    }

    pub(crate) fn get_or_parse<F>(
        &self,
        schema_type: &str,
        input: &ParseInput<'_>,
        parse: F,
    ) -> Result<Arc<ParsedSchema>, ProviderError>
    where
        F: FnOnce() -> Result<ParsedSchema, ProviderError>,
    {
        let key = CacheKey {
            schema_type: schema_type.to_string(),
            raw: input.raw.to_string(),
            references: input.references.to_vec(),
            is_new: input.is_new,
            normalize: input.normalize,
        };

        {
            let mut store = self.store.lock().unwrap();
            if let Some(entry) = store.get(&key) {
                if entry.inserted.elapsed() < self.options.expiry {
                    return Ok(entry.parsed.clone());
                }
                tracing::debug!(schema_type, "parse cache entry expired");
                store.remove(&key);
            }
        }

        // Parse outside the lock; a racing duplicate parse is harmless.
        let parsed = Arc::new(parse()?);

        let mut store = self.store.lock().unwrap();
        if store.len() >= self.options.capacity {
            store.retain(|_, entry| entry.inserted.elapsed() < self.options.expiry);
        }
        if store.len() >= self.options.capacity {
            if let Some(oldest) = store
                .iter()
                .min_by_key(|(_, entry)| entry.inserted)
                .map(|(key, _)| key.clone())
            {
                store.remove(&oldest);
            }
        }
        store.insert(
            key,
            CacheEntry {
                inserted: Instant::now(),
                parsed: parsed.clone(),
            },
        );

        Ok(parsed)
    }
}
