use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Running total of sequences collected across all workers.
///
/// Clones share one counter. The only mutation is [`increment_by`](Self::increment_by).
#[derive(Debug, Clone, Default)]
pub struct ProgressCounter {
    total: Arc<AtomicUsize>,
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `n` and return the new total
    pub fn increment_by(&self, n: usize) -> usize {
        self.total.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn get(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_concurrent_increments() {
        let counter = ProgressCounter::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.increment_by(3);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.get(), 24_000);
    }

    #[test]
    fn test_increment_returns_total() {
        let counter = ProgressCounter::new();
        assert_eq!(counter.increment_by(5), 5);
        assert_eq!(counter.increment_by(2), 7);
    }
}
