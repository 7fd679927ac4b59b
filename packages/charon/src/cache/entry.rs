use std::time::{Duration, Instant};

/// A cached value plus the instant it was created.
#[derive(Clone, Debug)]
pub struct CacheEntry<T> {
    pub value: T,
    created_at: Instant,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            created_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn is_older_than(&self, max_age: Duration) -> bool {
        self.age() > max_age
    }
}
