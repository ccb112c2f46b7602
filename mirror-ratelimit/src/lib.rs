//! Per-IP token-bucket rate limiting with CIDR allow/deny gating.
//!
//! The bucket table is a [`dashmap::DashMap`] rather than a single mutex
//! around a `HashMap`: refill happens on every admitted request and must
//! not serialise unrelated clients behind one lock.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use mirror_cidr::Cidr;

/// Paths that never consume a token.
const EXEMPT_PATHS: &[&str] = &["/", "/favicon.ico", "/search.html", "/images.html"];

pub fn is_exempt_path(path: &str) -> bool {
    EXEMPT_PATHS.contains(&path) || path.starts_with("/public/")
}

struct IpBucket {
    tokens: f64,
    last_refill: Instant,
    last_access: Instant,
}

/// Outcome of admitting a request for an IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    DeniedByList,
    RateLimited,
}

pub struct RateLimiter {
    request_limit: f64,
    period: Duration,
    allow: Vec<Cidr>,
    deny: Vec<Cidr>,
    buckets: DashMap<String, IpBucket>,
}

impl RateLimiter {
    pub fn new(request_limit: u32, period_hours: f64, allow: Vec<Cidr>, deny: Vec<Cidr>) -> Self {
        Self {
            request_limit: request_limit as f64,
            period: Duration::from_secs_f64((period_hours * 3600.0).max(0.001)),
            allow,
            deny,
            buckets: DashMap::new(),
        }
    }

    /// Extracts the client IP honouring `X-Forwarded-For` (leftmost entry),
    /// then `X-Real-IP`, then the socket's own remote address. Brackets and
    /// an IPv4-mapped IPv6 prefix are stripped.
    pub fn extract_client_ip(
        forwarded_for: Option<&str>,
        real_ip: Option<&str>,
        socket_remote: &str,
    ) -> String {
        let raw = if let Some(xff) = forwarded_for {
            xff.split(',').next().unwrap_or(xff).trim()
        } else if let Some(real) = real_ip {
            real.trim()
        } else {
            socket_remote.trim()
        };
        mirror_cidr::strip_brackets_and_mapped(raw)
    }

    /// Runs the full admission algorithm: deny-list, allow-list bypass,
    /// then token-bucket accounting keyed by the `/64`-normalised IP.
    pub fn check(&self, client_ip: &str) -> Decision {
        if self
            .deny
            .iter()
            .any(|c| mirror_cidr::contains_str(client_ip, c))
        {
            return Decision::DeniedByList;
        }
        if self
            .allow
            .iter()
            .any(|c| mirror_cidr::contains_str(client_ip, c))
        {
            return Decision::Allowed;
        }

        let key = mirror_cidr::normalize_ipv6_to_64(client_ip);
        let now = Instant::now();
        let mut bucket = self.buckets.entry(key).or_insert_with(|| IpBucket {
            tokens: self.request_limit,
            last_refill: now,
            last_access: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let refill_rate = self.request_limit / self.period.as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * refill_rate).min(self.request_limit);
        bucket.last_refill = now;
        bucket.last_access = now;

        if bucket.tokens < 1.0 {
            return Decision::RateLimited;
        }
        bucket.tokens -= 1.0;
        Decision::Allowed
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drops buckets inactive for more than two hours; if the table is
    /// still oversized afterwards, wipes it entirely rather than running a
    /// finer-grained eviction pass.
    pub fn janitor_sweep(&self) {
        let now = Instant::now();
        let inactivity_cutoff = Duration::from_secs(2 * 3600);
        self.buckets
            .retain(|_, b| now.saturating_duration_since(b.last_access) <= inactivity_cutoff);
        if self.buckets.len() > 10_000 {
            self.buckets.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_cidr::parse_cidr;

    #[test]
    fn exempt_paths() {
        assert!(is_exempt_path("/"));
        assert!(is_exempt_path("/favicon.ico"));
        assert!(is_exempt_path("/public/logo.png"));
        assert!(!is_exempt_path("/v2/alpine/manifests/latest"));
    }

    #[test]
    fn extract_ip_prefers_xff_leftmost() {
        let ip = RateLimiter::extract_client_ip(Some(" 1.2.3.4 , 5.6.7.8"), None, "9.9.9.9:1234");
        assert_eq!(ip, "1.2.3.4");
    }

    #[test]
    fn extract_ip_falls_back_to_socket() {
        let ip = RateLimiter::extract_client_ip(None, None, "10.0.0.5");
        assert_eq!(ip, "10.0.0.5");
    }

    #[test]
    fn deny_list_blocks_before_accounting() {
        let deny = vec![parse_cidr("10.0.0.0/8").unwrap()];
        let rl = RateLimiter::new(5, 1.0, vec![], deny);
        assert_eq!(rl.check("10.1.2.3"), Decision::DeniedByList);
    }

    #[test]
    fn allow_list_bypasses_accounting() {
        let allow = vec![parse_cidr("10.0.0.0/8").unwrap()];
        let rl = RateLimiter::new(1, 1.0, allow, vec![]);
        for _ in 0..10 {
            assert_eq!(rl.check("10.1.2.3"), Decision::Allowed);
        }
    }

    #[test]
    fn bucket_exhausts_then_rate_limits() {
        let rl = RateLimiter::new(2, 1.0, vec![], vec![]);
        assert_eq!(rl.check("1.2.3.4"), Decision::Allowed);
        assert_eq!(rl.check("1.2.3.4"), Decision::Allowed);
        assert_eq!(rl.check("1.2.3.4"), Decision::RateLimited);
    }

    #[test]
    fn ipv6_addresses_share_a_bucket_within_slash64() {
        let rl = RateLimiter::new(1, 1.0, vec![], vec![]);
        assert_eq!(rl.check("2001:db8::1"), Decision::Allowed);
        assert_eq!(rl.check("2001:db8::2"), Decision::RateLimited);
    }

    #[test]
    fn janitor_clears_when_table_oversized() {
        let rl = RateLimiter::new(1, 1.0, vec![], vec![]);
        for i in 0..20 {
            rl.check(&format!("10.{}.{}.{}", i / 256, (i / 16) % 16, i % 256));
        }
        assert!(rl.bucket_count() > 0);
        rl.janitor_sweep();
        assert!(rl.bucket_count() <= 10_000);
    }
}
