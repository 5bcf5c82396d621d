use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serializes in-process work on a keyed resource, so two tasks never
/// stage the same artifact at once. Cross-process exclusion is the cache
/// file lock's job; this only keeps tasks of one run from contending for
/// it.
#[derive(Debug, Default)]
pub(crate) struct KeyedLock {
    slots: Mutex<FxHashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLock {
    /// Take the slot for `key`, waiting until any current holder is done.
    /// The slot is released when the returned guard drops.
    pub(crate) async fn hold(&self, key: String) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap();
            Arc::clone(slots.entry(key).or_default())
        };
        slot.lock_owned().await
    }
}
