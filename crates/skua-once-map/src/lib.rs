//! Run tasks only once and store the results in a parallel hash map.
//!
//! We often have jobs `Fn(K) -> V` that we only want to run once and
//! memoize, e.g. network requests for metadata. When multiple tasks start
//! the same query in parallel, the others wait until the first is done and
//! read the same result.

use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use tokio::sync::Notify;

/// A keyed once-cell map: the first task to [`OnceMap::register`] a key
/// runs the job and publishes with [`OnceMap::done`]; everyone else
/// [`OnceMap::wait`]s.
pub struct OnceMap<K: Eq + Hash, V> {
    data: Mutex<FxHashMap<K, V>>,
    notifiers: Mutex<FxHashMap<K, Arc<Notify>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> OnceMap<K, V> {
    /// Register that you want to start a job.
    ///
    /// If this method returns `true`, you need to start the job and call
    /// [`OnceMap::done`] eventually, or other tasks will hang. If it
    /// returns `false`, the job is already in progress or finished and you
    /// can [`OnceMap::wait`] for the result.
    pub fn register(&self, key: &K) -> bool {
        if self.data.lock().unwrap().contains_key(key) {
            return false;
        }
        let mut notifiers = self.notifiers.lock().unwrap();
        if notifiers.contains_key(key) {
            false
        } else {
            notifiers.insert(key.clone(), Arc::new(Notify::new()));
            true
        }
    }

    /// Submit the result of a job you registered.
    pub fn done(&self, key: K, value: V) {
        // Publish before notifying so a waiter never observes a gap.
        self.data.lock().unwrap().insert(key.clone(), value);
        let notifier = self.notifiers.lock().unwrap().remove(&key);
        if let Some(notifier) = notifier {
            notifier.notify_waiters();
        }
    }

    /// Wait for the result of a job that is registered or already done.
    ///
    /// Returns an error if the job was abandoned without a [`OnceMap::done`]
    /// call (e.g. the running task failed and dropped its registration).
    pub async fn wait<Q>(&self, key: &Q) -> Result<V, Error>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        loop {
            if let Some(value) = self.data.lock().unwrap().get(key).cloned() {
                return Ok(value);
            }
            let Some(notifier) = self.notifiers.lock().unwrap().get(key).map(Arc::clone) else {
                // `done` publishes the value before removing the notifier,
                // so a missing notifier with no value means abandonment.
                return match self.data.lock().unwrap().get(key).cloned() {
                    Some(value) => Ok(value),
                    None => Err(Error::Canceled),
                };
            };
            // Register interest before re-checking the map; otherwise a
            // notification between the check and the await is lost.
            let notified = notifier.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(value) = self.data.lock().unwrap().get(key).cloned() {
                return Ok(value);
            }
            notified.await;
        }
    }

    /// Remove an abandoned registration so waiters fail instead of hanging.
    pub fn cancel(&self, key: &K) {
        let notifier = self.notifiers.lock().unwrap().remove(key);
        if let Some(notifier) = notifier {
            notifier.notify_waiters();
        }
    }

    /// Return the result of a previously finished job, if any.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.data.lock().unwrap().get(key).cloned()
    }
}

impl<K: Eq + Hash, V> Default for OnceMap<K, V> {
    fn default() -> Self {
        Self {
            data: Mutex::default(),
            notifiers: Mutex::default(),
        }
    }
}

/// An error waiting on a job.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The job was abandoned without publishing a result.
    #[error("The operation was canceled")]
    Canceled,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::OnceMap;

    #[tokio::test]
    async fn register_once() {
        let map: OnceMap<String, usize> = OnceMap::default();
        let key = "flask".to_string();
        assert!(map.register(&key));
        assert!(!map.register(&key));
        map.done(key.clone(), 42);
        assert!(!map.register(&key));
        assert_eq!(map.wait(&key).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn concurrent_waiters_see_one_result() {
        let map: Arc<OnceMap<String, usize>> = Arc::default();
        let runs = Arc::new(AtomicUsize::new(0));
        let key = "werkzeug".to_string();

        let tasks = (0..16).map(|_| {
            let map = Arc::clone(&map);
            let runs = Arc::clone(&runs);
            let key = key.clone();
            tokio::spawn(async move {
                if map.register(&key) {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    map.done(key.clone(), 7);
                }
                map.wait(&key).await.unwrap()
            })
        });
        for task in tasks {
            assert_eq!(task.await.unwrap(), 7);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn canceled_registration_fails_waiters() {
        let map: OnceMap<String, usize> = OnceMap::default();
        let key = "broken".to_string();
        assert!(map.register(&key));
        map.cancel(&key);
        assert!(map.wait(&key).await.is_err());
    }
}
