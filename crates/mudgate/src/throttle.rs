//! Exponential backoff on failed password attempts, per peer IP and per name.

use std::collections::HashMap;
use std::hash::Hash;
use std::net::IpAddr;
use std::time::{Duration, Instant};

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);
const RESET_AFTER: Duration = Duration::from_secs(10 * 60);
const MAX_ENTRIES: usize = 2048;

fn backoff_delay(failures: u32) -> Duration {
    // 1s, 2s, 4s, ... capped.
    let pow = failures.saturating_sub(1).min(16);
    let mult: u32 = 1u32.checked_shl(pow).unwrap_or(u32::MAX);
    BACKOFF_BASE
        .checked_mul(mult)
        .unwrap_or(BACKOFF_MAX)
        .min(BACKOFF_MAX)
}

/// Whole seconds, rounded up so the user doesn't retry too early.
pub fn wait_seconds(d: Duration) -> u64 {
    let ms = d.as_millis();
    u64::try_from(ms.div_ceil(1000)).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    failures: u32,
    last_failure: Instant,
    next_allowed: Instant,
}

#[derive(Debug)]
struct Table<K> {
    entries: HashMap<K, Entry>,
}

impl<K> Default for Table<K> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash> Table<K> {
    fn prune(&mut self, now: Instant) {
        self.entries
            .retain(|_, e| now.duration_since(e.last_failure) <= RESET_AFTER);
        // Hard cap against unbounded growth under attack.
        if self.entries.len() > MAX_ENTRIES {
            self.entries.clear();
        }
    }

    fn wait(&self, k: &K, now: Instant) -> Duration {
        self.entries
            .get(k)
            .map(|e| e.next_allowed.saturating_duration_since(now))
            .unwrap_or_default()
    }

    fn fail(&mut self, k: K, now: Instant) -> Duration {
        let e = self.entries.entry(k).or_insert(Entry {
            failures: 0,
            last_failure: now,
            next_allowed: now,
        });
        e.failures = e.failures.saturating_add(1);
        let d = backoff_delay(e.failures);
        e.last_failure = now;
        e.next_allowed = now + d;
        d
    }
}

#[derive(Debug, Default)]
pub struct LoginThrottle {
    by_ip: Table<IpAddr>,
    by_name: Table<String>,
}

impl LoginThrottle {
    fn prune(&mut self, now: Instant) {
        self.by_ip.prune(now);
        self.by_name.prune(now);
    }

    /// How long the next attempt from `ip` for `name` has to wait.
    pub fn wait(&mut self, ip: IpAddr, name: &str, now: Instant) -> Duration {
        self.prune(now);
        let by_name = if name.is_empty() {
            Duration::ZERO
        } else {
            self.by_name.wait(&name.to_ascii_lowercase(), now)
        };
        self.by_ip.wait(&ip, now).max(by_name)
    }

    pub fn note_failure(&mut self, ip: IpAddr, name: &str, now: Instant) -> Duration {
        self.prune(now);
        let ip_delay = self.by_ip.fail(ip, now);
        let name_delay = if name.is_empty() {
            Duration::ZERO
        } else {
            self.by_name.fail(name.to_ascii_lowercase(), now)
        };
        ip_delay.max(name_delay)
    }

    pub fn note_success(&mut self, ip: IpAddr, name: &str) {
        self.by_ip.entries.remove(&ip);
        if !name.is_empty() {
            self.by_name.entries.remove(&name.to_ascii_lowercase());
        }
    }
}
