//! Log throttling for hot-path warnings
//!
//! Input commands with no executor, forwards to a departed signaling peer
//! and malformed producer frames can arrive dozens of times per second.
//! `LogThrottler` lets the first occurrence through and suppresses repeats
//! of the same key for an interval, counting what was suppressed.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Keys tracked before stale entries are pruned
const PRUNE_THRESHOLD: usize = 256;

#[derive(Debug, Clone, Copy)]
struct Entry {
    last_logged: Instant,
    suppressed: u64,
}

/// Keyed log throttler
///
/// ```rust
/// use screenlink::utils::LogThrottler;
/// use std::time::Duration;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
/// assert!(throttler.should_log("no_executor"));
/// assert!(!throttler.should_log("no_executor"));
/// ```
pub struct LogThrottler {
    entries: Mutex<HashMap<String, Entry>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `true` if a message for `key` should be logged now
    pub fn should_log(&self, key: &str) -> bool {
        self.check(key).is_some()
    }

    /// Like [`should_log`](Self::should_log), but also returns how many
    /// messages for `key` were suppressed since the last one let through.
    pub fn check(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(key) {
            if now.duration_since(entry.last_logged) < self.interval {
                entry.suppressed += 1;
                return None;
            }
            let suppressed = entry.suppressed;
            *entry = Entry {
                last_logged: now,
                suppressed: 0,
            };
            return Some(suppressed);
        }

        if entries.len() >= PRUNE_THRESHOLD {
            let interval = self.interval;
            entries.retain(|_, e| now.duration_since(e.last_logged) < interval);
        }
        entries.insert(
            key.to_string(),
            Entry {
                last_logged: now,
                suppressed: 0,
            },
        );
        Some(0)
    }

    /// Forget `key`, e.g. when the condition it reports has recovered
    pub fn clear(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for LogThrottler {
    /// 5 second interval
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `tracing::warn!`
///
/// ```rust
/// use screenlink::utils::LogThrottler;
/// use screenlink::warn_throttled;
///
/// let throttler = LogThrottler::default();
/// warn_throttled!(throttler, "missing_sink", "Dropping message: {}", "details");
/// ```
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $throttler.check($key) {
            if suppressed > 0 {
                tracing::warn!(suppressed, $($arg)*);
            } else {
                tracing::warn!($($arg)*);
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_throttling() {
        let throttler = LogThrottler::new(Duration::from_millis(100));

        assert!(throttler.should_log("test_key"));
        assert!(!throttler.should_log("test_key"));

        thread::sleep(Duration::from_millis(150));
        assert!(throttler.should_log("test_key"));
    }

    #[test]
    fn test_suppressed_count() {
        let throttler = LogThrottler::new(Duration::from_millis(50));

        assert_eq!(throttler.check("k"), Some(0));
        assert_eq!(throttler.check("k"), None);
        assert_eq!(throttler.check("k"), None);

        thread::sleep(Duration::from_millis(80));
        assert_eq!(throttler.check("k"), Some(2));
    }

    #[test]
    fn test_different_keys() {
        let throttler = LogThrottler::with_secs(10);

        assert!(throttler.should_log("key1"));
        assert!(throttler.should_log("key2"));
        assert!(!throttler.should_log("key1"));
        assert_eq!(throttler.len(), 2);

        throttler.clear("key1");
        assert!(throttler.should_log("key1"));
    }

    #[test]
    fn test_prunes_stale_keys() {
        let throttler = LogThrottler::new(Duration::from_millis(10));
        for i in 0..PRUNE_THRESHOLD {
            throttler.should_log(&format!("session-{}", i));
        }
        thread::sleep(Duration::from_millis(20));

        throttler.should_log("fresh");
        assert_eq!(throttler.len(), 1);
    }
}
