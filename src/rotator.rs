use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{AppError, Result};

/// Round-robin over a fixed pool of upstream API credentials.
///
/// The cursor starts at 0 on every process start. `next()` is safe to call from
/// concurrent fetches: the read-and-advance is a single atomic update, so no
/// credential is skipped or handed out twice in a row.
#[derive(Debug)]
pub struct KeyRotator {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl KeyRotator {
    pub fn new(keys: Vec<String>) -> Result<Self> {
        if keys.is_empty() {
            return Err(AppError::Config("key rotator needs at least one credential".to_string()));
        }
        Ok(Self {
            keys,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn next(&self) -> &str {
        let len = self.keys.len();
        // fetch_update only fails when the closure returns None.
        let idx = match self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
        {
            Ok(prev) | Err(prev) => prev,
        };
        &self.keys[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("key-{i}")).collect()
    }

    #[test]
    fn empty_pool_is_rejected() {
        assert!(matches!(KeyRotator::new(Vec::new()), Err(AppError::Config(_))));
    }

    #[test]
    fn cycles_in_order_from_zero() {
        let rotator = KeyRotator::new(keys(3)).unwrap();
        let seen: Vec<&str> = (0..7).map(|_| rotator.next()).collect();
        assert_eq!(
            seen,
            vec!["key-0", "key-1", "key-2", "key-0", "key-1", "key-2", "key-0"]
        );
    }

    #[test]
    fn single_key_always_returned() {
        let rotator = KeyRotator::new(keys(1)).unwrap();
        for _ in 0..5 {
            assert_eq!(rotator.next(), "key-0");
        }
    }

    #[test]
    fn concurrent_callers_share_keys_evenly() {
        let rotator = Arc::new(KeyRotator::new(keys(4)).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rotator = Arc::clone(&rotator);
                std::thread::spawn(move || {
                    (0..100).map(|_| rotator.next().to_string()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            for key in handle.join().unwrap() {
                *counts.entry(key).or_default() += 1;
            }
        }
        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|&c| c == 200), "uneven rotation: {counts:?}");
    }
}
