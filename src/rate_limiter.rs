use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Buckets tracked before old ones are evicted.
const MAX_TRACKED_CLIENTS: usize = 10_000;

#[derive(Clone, Copy, Debug)]
pub struct Limits {
    pub requests: u32,
    pub window: Duration,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Per-client token buckets. A client may burst `requests` and then
/// regains one request every `window / requests`.
///
/// At most `max_clients` buckets are kept. When the map is full, buckets
/// idle for a whole window are dropped first, then the least recently used
/// tenth of the map, so eviction runs at most once per that many new clients.
#[derive(Debug)]
pub struct RateLimiter {
    limits: Limits,
    max_clients: usize,
    buckets: Mutex<HashMap<IpAddr, Bucket>>,
}

impl RateLimiter {
    pub fn new(limits: Limits) -> Self {
        Self::with_max_clients(limits, MAX_TRACKED_CLIENTS)
    }

    pub fn with_max_clients(limits: Limits, max_clients: usize) -> Self {
        Self {
            limits,
            max_clients: max_clients.max(1),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Takes a token for `client`. `false` means the request should be rejected.
    pub fn try_acquire(&self, client: IpAddr) -> bool {
        self.try_acquire_at(client, Instant::now())
    }

    fn try_acquire_at(&self, client: IpAddr, now: Instant) -> bool {
        let capacity = self.limits.requests as f64;
        let refill_rate = capacity / self.limits.window.as_secs_f64().max(f64::EPSILON);

        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        if buckets.len() >= self.max_clients && !buckets.contains_key(&client) {
            self.evict(&mut buckets, now);
        }

        let bucket = buckets
            .entry(client)
            .or_insert(Bucket { tokens: capacity, last: now });
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_rate).min(capacity);
        bucket.last = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn evict(&self, buckets: &mut HashMap<IpAddr, Bucket>, now: Instant) {
        let window = self.limits.window;
        buckets.retain(|_, b| now.saturating_duration_since(b.last) < window);

        let target = self.max_clients - (self.max_clients / 10).max(1);
        if buckets.len() > target {
            let mut by_age: Vec<(Instant, IpAddr)> =
                buckets.iter().map(|(ip, b)| (b.last, *ip)).collect();
            by_age.sort_unstable();
            let excess = buckets.len() - target;
            for (_, ip) in by_age.into_iter().take(excess) {
                buckets.remove(&ip);
            }
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.buckets.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn limiter(requests: u32, window: Duration) -> RateLimiter {
        RateLimiter::new(Limits { requests, window })
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn nth_ip(n: u32) -> IpAddr {
        IpAddr::V4(Ipv4Addr::from(0x0a00_0000 + n))
    }

    #[test]
    fn test_burst_then_reject() {
        let rl = limiter(3, Duration::from_secs(10));
        let now = Instant::now();
        for _ in 0..3 {
            assert!(rl.try_acquire_at(ip("10.0.0.1"), now));
        }
        assert!(!rl.try_acquire_at(ip("10.0.0.1"), now));
    }

    #[test]
    fn test_clients_are_independent() {
        let rl = limiter(1, Duration::from_secs(10));
        let now = Instant::now();
        assert!(rl.try_acquire_at(ip("10.0.0.1"), now));
        assert!(!rl.try_acquire_at(ip("10.0.0.1"), now));
        assert!(rl.try_acquire_at(ip("10.0.0.2"), now));
    }

    #[test]
    fn test_refills_over_window() {
        let rl = limiter(2, Duration::from_secs(10));
        let start = Instant::now();
        assert!(rl.try_acquire_at(ip("::1"), start));
        assert!(rl.try_acquire_at(ip("::1"), start));
        assert!(!rl.try_acquire_at(ip("::1"), start + Duration::from_secs(1)));
        // one token every 5s
        assert!(rl.try_acquire_at(ip("::1"), start + Duration::from_secs(6)));
        assert!(!rl.try_acquire_at(ip("::1"), start + Duration::from_secs(6)));
    }

    #[test]
    fn test_distinct_clients_stay_under_cap() {
        let limits = Limits { requests: 5, window: Duration::from_secs(10) };
        let rl = RateLimiter::with_max_clients(limits, 100);
        let now = Instant::now();

        // Every client is active within the window, so nothing is idle.
        for n in 0..5_000 {
            assert!(rl.try_acquire_at(nth_ip(n), now + Duration::from_micros(n as u64)));
            assert!(rl.tracked() <= 100);
        }
    }

    #[test]
    fn test_eviction_keeps_recent_clients() {
        let limits = Limits { requests: 1, window: Duration::from_secs(10) };
        let rl = RateLimiter::with_max_clients(limits, 10);
        let start = Instant::now();

        for n in 0..9 {
            rl.try_acquire_at(nth_ip(n), start);
        }
        let recent = ip("192.168.0.1");
        let later = start + Duration::from_secs(1);
        assert!(rl.try_acquire_at(recent, later));

        // Full map: the oldest buckets go, the recent (and empty) one stays.
        rl.try_acquire_at(nth_ip(100), later);
        assert!(rl.tracked() <= 10);
        assert!(!rl.try_acquire_at(recent, later));
    }

    #[test]
    fn test_idle_clients_are_dropped_first() {
        let limits = Limits { requests: 1, window: Duration::from_secs(10) };
        let rl = RateLimiter::with_max_clients(limits, 10);
        let start = Instant::now();

        for n in 0..10 {
            rl.try_acquire_at(nth_ip(n), start);
        }
        rl.try_acquire_at(nth_ip(100), start + Duration::from_secs(11));
        assert_eq!(rl.tracked(), 1);
    }
}
