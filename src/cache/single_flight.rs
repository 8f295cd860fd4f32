//! Keyed request coalescing.
//!
//! Concurrent misses on the same cache key must not stampede the database:
//! at most one computation runs per key, and every waiter receives the same
//! value. A canceled or failed leader releases the slot so the next waiter
//! takes over.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

pub struct SingleFlight<V> {
    inflight: DashMap<String, Arc<OnceCell<V>>>,
}

impl<V> Default for SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self { inflight: DashMap::new() }
    }

    pub async fn run<F, Fut, E>(&self, key: &str, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell.get_or_try_init(compute).await.cloned();

        // Only the cell we actually waited on is unregistered; a racing
        // re-registration under the same key stays untouched.
        self.inflight.remove_if(key, |_, v| Arc::ptr_eq(v, &cell));

        result
    }

    #[cfg(test)]
    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_computation() {
        let flight = Arc::new(SingleFlight::<i64>::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let flight = Arc::clone(&flight);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                flight
                    .run("key", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok::<_, ()>(7)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(7));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flight.inflight_len(), 0);
    }

    #[tokio::test]
    async fn failure_releases_the_slot() {
        let flight = SingleFlight::<i64>::new();

        let first: Result<i64, &str> = flight.run("key", || async { Err("boom") }).await;
        assert!(first.is_err());

        // The slot is free again; a later caller computes fresh.
        let second: Result<i64, &str> = flight.run("key", || async { Ok(1) }).await;
        assert_eq!(second, Ok(1));
    }

    #[tokio::test]
    async fn distinct_keys_do_not_coalesce() {
        let flight = Arc::new(SingleFlight::<i64>::new());
        let calls = Arc::new(AtomicU32::new(0));

        let a = {
            let (flight, calls) = (Arc::clone(&flight), Arc::clone(&calls));
            tokio::spawn(async move {
                flight
                    .run("a", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, ()>(1)
                    })
                    .await
            })
        };
        let b = {
            let (flight, calls) = (Arc::clone(&flight), Arc::clone(&calls));
            tokio::spawn(async move {
                flight
                    .run("b", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, ()>(2)
                    })
                    .await
            })
        };

        assert_eq!(a.await.unwrap(), Ok(1));
        assert_eq!(b.await.unwrap(), Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
