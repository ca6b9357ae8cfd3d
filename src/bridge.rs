//! Hook-host bridge (C11)
//!
//! Projects a [`Context`](crate::context::Context) into an embedded
//! scripting environment (spec §4.8). Every Context-returned object a
//! hook touches is registered here under an opaque arena key so that
//! host-side garbage collection can't orphan the native resource behind
//! it; on exit from the hook call every object registered during that
//! call is released in reverse registration order (LIFO), the same
//! discipline `StackManager::enter_stack`'s `done_fn` uses for nested
//! invocations.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// An opaque arena key. Equality/hash identity of a bridged object *is*
/// this key — two handles compare equal iff they name the same arena
/// slot, regardless of the underlying value's own equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaKey(u64);

/// A handle a hook script holds to a native object. Exposes identity (the
/// arena key) and a `release` escape hatch; normal hook execution must
/// not call `release` directly — the arena calls it automatically when
/// the hook call that registered the handle returns.
#[derive(Clone)]
pub struct BridgedObject {
    key: ArenaKey,
    value: Arc<dyn Any + Send + Sync>,
    arena: Arc<ArenaInner>,
}

impl BridgedObject {
    pub fn key(&self) -> ArenaKey {
        self.key
    }

    pub fn downcast<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Escape hatch: release this object from its arena immediately,
    /// ahead of the owning hook call's normal LIFO teardown. Calling this
    /// mid-call invalidates every other handle that aliases the same
    /// value and is reserved for host error-recovery paths, not normal
    /// hook bodies.
    pub fn release(&self) {
        self.arena.release_one(self.key);
    }
}

struct ArenaInner {
    counter: AtomicU64,
    registration_order: Mutex<Vec<ArenaKey>>,
    live: Mutex<std::collections::HashMap<ArenaKey, Arc<dyn Any + Send + Sync>>>,
}

/// The per-call arena. One instance is created for each hook invocation
/// and dropped (after calling `release_all`) when the call returns.
pub struct HookArena {
    inner: Arc<ArenaInner>,
}

impl Default for HookArena {
    fn default() -> Self {
        Self::new()
    }
}

impl HookArena {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArenaInner {
                counter: AtomicU64::new(0),
                registration_order: Mutex::new(Vec::new()),
                live: Mutex::new(std::collections::HashMap::new()),
            }),
        }
    }

    /// Register a Context-returned object, obtaining a handle the hook
    /// script can pass back into further Context calls or hold as an
    /// opaque reference.
    pub fn register<T: Any + Send + Sync>(&self, value: T) -> BridgedObject {
        let key = ArenaKey(self.inner.counter.fetch_add(1, Ordering::SeqCst) + 1);
        let value: Arc<dyn Any + Send + Sync> = Arc::new(value);
        self.inner.live.lock().unwrap().insert(key, value.clone());
        self.inner.registration_order.lock().unwrap().push(key);
        BridgedObject { key, value, arena: self.inner.clone() }
    }

    pub fn get(&self, key: ArenaKey) -> Option<BridgedObject> {
        let value = self.inner.live.lock().unwrap().get(&key).cloned()?;
        Some(BridgedObject { key, value, arena: self.inner.clone() })
    }

    pub fn is_live(&self, key: ArenaKey) -> bool {
        self.inner.live.lock().unwrap().contains_key(&key)
    }

    fn release_one(&self, key: ArenaKey) {
        self.inner.live.lock().unwrap().remove(&key);
    }

    pub fn len(&self) -> usize {
        self.inner.live.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every still-registered object in reverse registration
    /// order. Called once, automatically, when the hook call that owns
    /// this arena returns.
    pub fn release_all(&self) {
        let order: Vec<ArenaKey> = {
            let mut guard = self.inner.registration_order.lock().unwrap();
            let order = guard.clone();
            guard.clear();
            order
        };
        let mut live = self.inner.live.lock().unwrap();
        for key in order.into_iter().rev() {
            live.remove(&key);
        }
    }
}

impl Drop for HookArena {
    fn drop(&mut self) {
        self.release_all();
    }
}
