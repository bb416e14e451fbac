//! Bounded tracking of loading-contexts
//!
//! Validation results are cached per (bundle, loading-context). Hosts can
//! churn through short-lived contexts, so the set of tracked contexts is
//! bounded: least-recently-used contexts fall off once the bound is hit,
//! except the bootstrap context, which is pinned for the life of the
//! manager. An evicted context is simply re-validated if it comes back.

use crate::structure::LoaderId;
use crate::validate::ValidationResult;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Most loading-contexts tracked at once, bootstrap excluded
pub const MAX_TRACKED_CONTEXTS: usize = 100;

/// Per-context validation state
struct ContextState {
    /// Registry epoch the cached results were computed under
    epoch: u64,
    /// Cached result per bundle name
    results: FxHashMap<String, Arc<ValidationResult>>,
}

struct LruInner {
    contexts: FxHashMap<LoaderId, ContextState>,
    /// Recency order, least recently used first; bootstrap never appears
    order: Vec<LoaderId>,
}

/// LRU-bounded map of loading-context to cached validation results
pub(crate) struct ContextLru {
    inner: Mutex<LruInner>,
    capacity: usize,
}

impl ContextLru {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruInner {
                contexts: FxHashMap::default(),
                order: Vec::new(),
            }),
            capacity,
        }
    }

    /// Look up a cached result, touching the context
    ///
    /// Returns the cached result (if any) and the context that was evicted
    /// to make room (if any). A stale epoch drops every cached result for
    /// the context before the lookup.
    pub fn cached(
        &self,
        loader: LoaderId,
        epoch: u64,
        bundle_name: &str,
    ) -> (Option<Arc<ValidationResult>>, Option<LoaderId>) {
        let mut inner = self.inner.lock();
        let evicted = self.touch(&mut inner, loader);

        let state = inner.contexts.entry(loader).or_insert_with(|| ContextState {
            epoch,
            results: FxHashMap::default(),
        });
        if state.epoch != epoch {
            state.results.clear();
            state.epoch = epoch;
        }
        (state.results.get(bundle_name).cloned(), evicted)
    }

    /// Store a freshly computed result for (bundle, context)
    pub fn store(
        &self,
        loader: LoaderId,
        epoch: u64,
        bundle_name: &str,
        result: Arc<ValidationResult>,
    ) {
        let mut inner = self.inner.lock();
        // the context may have been evicted between cached() and store();
        // re-admitting it here keeps the two calls order-independent
        let _ = self.touch(&mut inner, loader);
        let state = inner.contexts.entry(loader).or_insert_with(|| ContextState {
            epoch,
            results: FxHashMap::default(),
        });
        if state.epoch != epoch {
            state.results.clear();
            state.epoch = epoch;
        }
        state.results.insert(bundle_name.to_string(), result);
    }

    /// Drop everything tracked for one context
    pub fn forget(&self, loader: LoaderId) {
        let mut inner = self.inner.lock();
        inner.contexts.remove(&loader);
        inner.order.retain(|l| *l != loader);
    }

    /// Number of contexts currently tracked, bootstrap included
    pub fn tracked(&self) -> usize {
        self.inner.lock().contexts.len()
    }

    /// Mark a context as most recently used; returns an eviction victim if
    /// admitting it pushed the cache over capacity
    fn touch(&self, inner: &mut LruInner, loader: LoaderId) -> Option<LoaderId> {
        if loader == LoaderId::BOOTSTRAP {
            return None;
        }
        if let Some(position) = inner.order.iter().position(|l| *l == loader) {
            inner.order.remove(position);
            inner.order.push(loader);
            return None;
        }
        inner.order.push(loader);
        if inner.order.len() > self.capacity {
            let victim = inner.order.remove(0);
            inner.contexts.remove(&victim);
            return Some(victim);
        }
        None
    }
}
