use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

type InflightMap<K, V> = Arc<Mutex<HashMap<K, broadcast::Sender<V>>>>;

/// Coalesces concurrent work per key.
///
/// The first caller for a key spawns the computation; callers arriving while
/// it runs subscribe to the same result. The key is removed when the result
/// is published, so the next call after completion starts fresh work.
pub struct SingleFlight<K, V> {
    inflight: InflightMap<K, V>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `make()` unless a computation for `key` is already in flight.
    /// Returns `None` only if the computation panicked.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> Option<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let mut receiver = {
            let mut inflight = lock(&self.inflight);
            if let Some(sender) = inflight.get(&key) {
                sender.subscribe()
            } else {
                let (sender, receiver) = broadcast::channel(1);
                inflight.insert(key.clone(), sender);
                let flight = Flight {
                    inflight: self.inflight.clone(),
                    key,
                    published: false,
                };
                let work = make();
                tokio::spawn(async move {
                    let value = work.await;
                    flight.publish(value);
                });
                receiver
            }
        };

        receiver.recv().await.ok()
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.inflight).len()
    }
}

/// Removes the key on publish, or on drop if the computation never finished.
struct Flight<K: Eq + Hash, V> {
    inflight: InflightMap<K, V>,
    key: K,
    published: bool,
}

impl<K: Eq + Hash, V> Flight<K, V> {
    fn publish(mut self, value: V) {
        let sender = lock(&self.inflight).remove(&self.key);
        self.published = true;
        if let Some(sender) = sender {
            let _ = sender.send(value);
        }
    }
}

impl<K: Eq + Hash, V> Drop for Flight<K, V> {
    fn drop(&mut self) {
        if !self.published {
            lock(&self.inflight).remove(&self.key);
        }
    }
}

fn lock<K, V>(map: &InflightMap<K, V>) -> MutexGuard<'_, HashMap<K, broadcast::Sender<V>>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}
