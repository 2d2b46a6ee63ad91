//! Outstanding write-transaction counter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counts top-level write transactions currently inside an engine
/// begin, commit, or abort call.
///
/// One counter is shared by every manager in the process and read
/// asynchronously by subsystems that time checkpoints or replication.
/// Only atomicity is guaranteed; readers get no ordering beyond that.
#[derive(Debug, Default)]
pub struct WriteTxnCounter {
    outstanding: AtomicU64,
}

impl WriteTxnCounter {
    /// Creates a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current count.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.outstanding.load(Ordering::Relaxed)
    }

    /// Increments the counter until the returned guard drops.
    #[must_use = "the counter is decremented when the guard drops"]
    pub fn enter(&self) -> WriteTxnGuard<'_> {
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        WriteTxnGuard { counter: self }
    }
}

/// Decrements the counter on drop, on success and failure paths alike.
#[derive(Debug)]
pub struct WriteTxnGuard<'a> {
    counter: &'a WriteTxnCounter,
}

impl Drop for WriteTxnGuard<'_> {
    fn drop(&mut self) {
        self.counter.outstanding.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn guard_restores_count() {
        let counter = WriteTxnCounter::new();
        {
            let _outer = counter.enter();
            let _inner = counter.enter();
            assert_eq!(counter.outstanding(), 2);
        }
        assert_eq!(counter.outstanding(), 0);
    }

    #[test]
    fn concurrent_guards_balance() {
        let counter = Arc::new(WriteTxnCounter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let _guard = counter.enter();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.outstanding(), 0);
    }
}
