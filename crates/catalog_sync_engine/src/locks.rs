//! Per-entity write serialization.

use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;

/// A set of exclusive locks keyed by entity ID.
///
/// Holding the guard for one ID blocks other writers of that ID only; keys are
/// not retained once released, so memory tracks the number of in-flight
/// writes rather than the number of entities ever seen.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl KeyedLocks {
    /// Creates an empty lock set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `key` is free, then holds it until the guard drops.
    pub fn lock(&self, key: &str) -> KeyGuard<'_> {
        let mut held = self.held.lock();
        while held.contains(key) {
            self.released.wait(&mut held);
        }
        held.insert(key.to_string());
        KeyGuard {
            locks: self,
            key: key.to_string(),
        }
    }

    /// Returns the number of keys currently held.
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }
}

/// Guard returned by `KeyedLocks::lock`.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    locks: &'a KeyedLocks,
    key: String,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.locks.held.lock().remove(&self.key);
        self.locks.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn guard_releases_on_drop() {
        let locks = KeyedLocks::new();
        {
            let _a = locks.lock("a");
            let _b = locks.lock("b");
            assert_eq!(locks.held_count(), 2);
        }
        assert_eq!(locks.held_count(), 0);
    }

    #[test]
    fn same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    let _guard = locks.lock("p1");
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(2));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn different_keys_do_not_block() {
        let locks = Arc::new(KeyedLocks::new());
        let _held = locks.lock("p1");

        let other = Arc::clone(&locks);
        let handle = thread::spawn(move || {
            let _guard = other.lock("p2");
            true
        });
        assert!(handle.join().unwrap());
    }
}
