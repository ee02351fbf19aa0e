//! Memoized fetches (v0.1)
//!
//! Completed values live in a DashMap bounded by a FIFO of insertion order.
//! Concurrent requests for a key that is still loading share one
//! `futures::future::Shared` instead of issuing a second fetch.

use std::collections::VecDeque;
use std::future::Future;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use super::ClientResult;

type Pending<V> = Shared<BoxFuture<'static, ClientResult<V>>>;

pub struct MemoCache<V: Clone + Send + Sync + 'static> {
    done: DashMap<String, V>,
    order: Mutex<VecDeque<String>>,
    inflight: DashMap<String, Pending<V>>,
    capacity: usize,
}

impl<V: Clone + Send + Sync + 'static> MemoCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            done: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            inflight: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.done.get(key).map(|v| v.clone())
    }

    /// Store a value, evicting the oldest entries beyond capacity
    pub fn insert(&self, key: &str, value: V) {
        if self.done.insert(key.to_string(), value).is_some() {
            return;
        }
        let mut order = self.order.lock();
        order.push_back(key.to_string());
        while order.len() > self.capacity {
            if let Some(old) = order.pop_front() {
                self.done.remove(&old);
            }
        }
    }

    pub fn remove(&self, key: &str) {
        self.done.remove(key);
        self.order.lock().retain(|k| k != key);
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    /// Cached value, or the result of `fetch` shared with concurrent callers
    ///
    /// Failures are not cached.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> ClientResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ClientResult<V>> + Send + 'static,
    {
        if let Some(v) = self.get(key) {
            return Ok(v);
        }
        let pending = match self.inflight.entry(key.to_string()) {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(e) => {
                let shared = fetch().boxed().shared();
                e.insert(shared.clone());
                shared
            }
        };
        let result = pending.await;
        if let Ok(v) = &result {
            self.insert(key, v.clone());
        }
        self.inflight.remove(key);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let cache = MemoCache::<String>::new(8);
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                Ok("html".to_string())
            }
        };
        let (a, b) = futures::join!(cache.get_or_fetch("k", fetch), cache.get_or_fetch("k", fetch));
        assert_eq!(a.unwrap(), "html");
        assert_eq!(b.unwrap(), "html");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // completed values are served without fetching
        cache.get_or_fetch("k", fetch).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_retried() {
        let cache = MemoCache::<String>::new(8);
        let err = cache
            .get_or_fetch("k", || async { Err(ClientError::Script("boom".into())) })
            .await;
        assert!(err.is_err());
        let ok = cache.get_or_fetch("k", || async { Ok("v".to_string()) }).await;
        assert_eq!(ok.unwrap(), "v");
    }

    #[test]
    fn fifo_bound_evicts_oldest() {
        let cache = MemoCache::<u32>::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.len(), 2);
    }
}
