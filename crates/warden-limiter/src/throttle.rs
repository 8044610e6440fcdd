//! Keyed batching throttler.
//!
//! Coalesces items pushed under the same key and hands the accumulated batch
//! to a handler at most once per `wait` interval per key. The first push for
//! an idle key flushes immediately; items arriving during the quiet period
//! are delivered together in the next flush. Used by services to debounce
//! fan-out work (indexing, notifications); independent of the rate limiter.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

type Handler<T> = dyn Fn(&str, Vec<T>) + Send + Sync;

/// Per-key batching throttler.
///
/// Cheap to clone; clones share the same state and handler. Requires a tokio
/// runtime: each active key is served by one short-lived task.
pub struct Throttler<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    wait: Duration,
    handler: Box<Handler<T>>,
    state: Mutex<State<T>>,
}

struct State<T> {
    batches: HashMap<String, Vec<T>>,
    running: HashSet<String>,
}

impl<T> Clone for Throttler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Throttler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttler")
            .field("wait", &self.inner.wait)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Throttler<T> {
    /// Create a throttler delivering batches through `handler`.
    ///
    /// The handler runs synchronously on a tokio worker; keep it short or
    /// hand the batch off to a channel.
    pub fn new(wait: Duration, handler: impl Fn(&str, Vec<T>) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                wait,
                handler: Box::new(handler),
                state: Mutex::new(State {
                    batches: HashMap::new(),
                    running: HashSet::new(),
                }),
            }),
        }
    }

    /// Queue `item` under `key`, starting a flush task for the key if one is
    /// not already active.
    pub fn push(&self, key: impl Into<String>, item: T) {
        let key = key.into();
        let spawn_runner = {
            let mut state = self.inner.state.lock();
            state.batches.entry(key.clone()).or_default().push(item);
            state.running.insert(key.clone())
        };

        if spawn_runner {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(run(inner, key));
        }
    }
}

async fn run<T: Send + 'static>(inner: Arc<Inner<T>>, key: String) {
    loop {
        let batch = inner
            .state
            .lock()
            .batches
            .remove(&key)
            .unwrap_or_default();
        if !batch.is_empty() {
            (inner.handler)(&key, batch);
        }

        tokio::time::sleep(inner.wait).await;

        let mut state = inner.state.lock();
        let has_more = state.batches.get(&key).is_some_and(|batch| !batch.is_empty());
        if !has_more {
            state.running.remove(&key);
            return;
        }
        drop(state);
    }
}
