//! Keyed query cache with cancellable fetches.
//!
//! Writes go through `set`, `cancel` and `invalidate`. A fetch records the
//! key's generation when it starts and only lands if the generation is
//! unchanged when it finishes, so once `cancel` returns no earlier fetch can
//! overwrite the entry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::task::AbortHandle;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ForgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub scope: &'static str,
    pub id: Uuid,
}

impl QueryKey {
    pub fn new(scope: &'static str, id: Uuid) -> Self {
        Self { scope, id }
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.scope, self.id)
    }
}

struct Entry<V> {
    data: Option<V>,
    stale: bool,
    generation: u64,
    in_flight: Option<AbortHandle>,
}

impl<V> Entry<V> {
    fn empty() -> Self {
        Self {
            data: None,
            stale: true,
            generation: 0,
            in_flight: None,
        }
    }

    fn abort_in_flight(&mut self) {
        self.generation += 1;
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }
}

pub struct QueryCache<V> {
    entries: Mutex<HashMap<QueryKey, Entry<V>>>,
}

impl<V> Default for QueryCache<V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone + Send + 'static> QueryCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &QueryKey) -> Option<V> {
        self.lock().get(key).and_then(|e| e.data.clone())
    }

    /// Writes data and marks it fresh.
    pub fn set(&self, key: QueryKey, value: V) {
        let mut entries = self.lock();
        let entry = entries.entry(key).or_insert_with(Entry::empty);
        entry.data = Some(value);
        entry.stale = false;
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.lock().get(key).is_none_or(|e| e.stale)
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.lock()
            .get(key)
            .is_some_and(|e| e.in_flight.as_ref().is_some_and(|h| !h.is_finished()))
    }

    /// Keeps the data but forces the next `fetch` to go to the server.
    pub fn invalidate(&self, key: &QueryKey) {
        if let Some(entry) = self.lock().get_mut(key) {
            entry.stale = true;
        }
        debug!(%key, "Query invalidated");
    }

    /// Aborts any in-flight fetch for `key`. Its result, if it still
    /// arrives, is discarded.
    pub fn cancel(&self, key: &QueryKey) {
        if let Some(entry) = self.lock().get_mut(key) {
            entry.abort_in_flight();
        }
    }

    /// Returns fresh cached data, or runs `fetcher` and stores its result.
    /// Starting a fetch supersedes one already in flight for the same key.
    pub async fn fetch<F, Fut>(&self, key: QueryKey, fetcher: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (generation, task) = {
            let mut entries = self.lock();
            let entry = entries.entry(key).or_insert_with(Entry::empty);

            if let (Some(data), false) = (&entry.data, entry.stale) {
                return Ok(data.clone());
            }

            entry.abort_in_flight();
            let task = tokio::spawn(fetcher());
            entry.in_flight = Some(task.abort_handle());
            (entry.generation, task)
        };

        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => return Err(ForgeError::Cancelled),
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        };

        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(&key) else {
            return outcome;
        };
        if entry.generation != generation {
            debug!(%key, "Discarding superseded fetch result");
            return Err(ForgeError::Cancelled);
        }

        entry.in_flight = None;
        let value = outcome?;
        entry.data = Some(value.clone());
        entry.stale = false;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn key() -> QueryKey {
        QueryKey::new("chapters", Uuid::nil())
    }

    #[tokio::test]
    async fn test_fetch_populates_and_reuses() {
        let cache = QueryCache::<Vec<u32>>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            let value = cache
                .fetch(key(), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1, 2, 3])
                })
                .await
                .unwrap();
            assert_eq!(value, vec![1, 2, 3]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.is_stale(&key()));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let cache = QueryCache::<u32>::new();
        cache.set(key(), 1);
        cache.invalidate(&key());
        assert!(cache.is_stale(&key()));
        assert_eq!(cache.get(&key()), Some(1));

        let value = cache.fetch(key(), || async { Ok(2) }).await.unwrap();
        assert_eq!(value, 2);
        assert_eq!(cache.get(&key()), Some(2));
    }

    #[tokio::test]
    async fn test_cancel_discards_in_flight_result() {
        let cache = Arc::new(QueryCache::<u32>::new());
        cache.set(key(), 1);
        cache.invalidate(&key());

        let background = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .fetch(key(), || async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok(99)
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.is_fetching(&key()));
        cache.cancel(&key());
        cache.set(key(), 7);

        let result = background.await.unwrap();
        assert!(matches!(result, Err(ForgeError::Cancelled)));
        assert_eq!(cache.get(&key()), Some(7));
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_data() {
        let cache = QueryCache::<u32>::new();
        cache.set(key(), 5);
        cache.invalidate(&key());

        let result = cache
            .fetch(key(), || async { Err(ForgeError::NotFound("book".into())) })
            .await;
        assert!(result.is_err());
        assert_eq!(cache.get(&key()), Some(5));
        assert!(cache.is_stale(&key()));
    }
}
