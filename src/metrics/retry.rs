use std::fmt::Display;

use log::{debug, error};

/// Retries allowed after the first failed attempt.
pub const RETRY_LIMIT: u32 = 3;

/// Retry counter owned by one engine instance.
///
/// The counter returns to zero after a success and after the limit is hit,
/// so the next call always gets the full budget.
#[derive(Clone, Debug)]
pub struct BoundedRetry {
    limit: u32,
    count: u32,
}

#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: E,
}

impl Default for BoundedRetry {
    fn default() -> Self {
        BoundedRetry::new(RETRY_LIMIT)
    }
}

impl BoundedRetry {
    pub fn new(limit: u32) -> Self {
        BoundedRetry { limit, count: 0 }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Retries consumed by the call in progress; zero between calls.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Runs `attempt` until it succeeds or `limit + 1` attempts have failed.
    pub fn run<T, E, F>(&mut self, label: &str, mut attempt: F) -> Result<T, Exhausted<E>>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
    {
        loop {
            match attempt() {
                Ok(value) => {
                    if self.count > 0 {
                        debug!("{} recovered after {} retries", label, self.count);
                    }
                    self.count = 0;
                    return Ok(value);
                }
                Err(err) => {
                    error!("While processing {}: {}", label, err);
                    if self.count < self.limit {
                        self.count += 1;
                        continue;
                    }
                    let attempts = self.count + 1;
                    error!("{} failed {} times, aborting...", label, attempts);
                    self.count = 0;
                    return Err(Exhausted {
                        attempts,
                        last: err,
                    });
                }
            }
        }
    }
}
