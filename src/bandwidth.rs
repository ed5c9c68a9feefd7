//! Token-bucket bandwidth shaping for response bodies.
//!
//! Mirrors the teacher's mutex-guarded per-connection state pattern (see
//! `upstream/loadbalance/round_robin.rs`'s `Mutex<WeightEntry>`): the bucket
//! is refilled on every `try_acquire` call rather than by a background tick,
//! so idle connections cost nothing and a burst of concurrent senders all
//! observe a consistent token count.

use crate::config::types::BandwidthRuleConfig;
use crate::proxy::context::BoxBody;
use bytes::Bytes;
use globset::Glob;
use http_body_util::{BodyExt, StreamBody};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

const MIN_SLEEP_USEC: u64 = 1_000;
const MAX_SLEEP_USEC: u64 = 100_000;

/// Smallest chunk a rate-limited send is broken into.
pub const SMALL_CHUNK_BYTES: usize = 8 * 1024;
/// Chunk size used once a transfer has shown it's not tiny (mirrors the
/// original's 64KB `sendfile` chunking).
pub const LARGE_CHUNK_BYTES: usize = 64 * 1024;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Per-request token bucket. `rate_bytes_per_sec` tokens accrue per second,
/// capped at `burst_bytes`.
pub struct TokenBucket {
    rate_bytes_per_sec: u64,
    burst_bytes: u64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(rate_bytes_per_sec: u64, burst_bytes: u64) -> Self {
        Self {
            rate_bytes_per_sec: rate_bytes_per_sec.max(1),
            burst_bytes,
            state: Mutex::new(BucketState {
                tokens: burst_bytes as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }
        let added = elapsed * self.rate_bytes_per_sec as f64;
        state.tokens = (state.tokens + added).min(self.burst_bytes as f64);
        state.last_refill = now;
    }

    /// Try to withdraw `n` bytes worth of tokens. Returns `None` if the
    /// bucket had enough tokens already (send immediately), or
    /// `Some(wait)` — the caller should sleep for `wait` then call again.
    pub fn try_acquire(&self, n: usize) -> Option<std::time::Duration> {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);

        let n = n as f64;
        if state.tokens >= n {
            state.tokens -= n;
            return None;
        }

        let needed = n - state.tokens;
        let wait_usec = ((needed * 1_000_000.0) / self.rate_bytes_per_sec as f64) as u64;
        let wait_usec = wait_usec.clamp(MIN_SLEEP_USEC, MAX_SLEEP_USEC);
        Some(std::time::Duration::from_micros(wait_usec))
    }

    /// Sleep until `n` bytes of tokens are available, then withdraw them.
    pub async fn acquire(&self, n: usize) {
        let mut waited = std::time::Duration::ZERO;
        loop {
            match self.try_acquire(n) {
                None => break,
                Some(wait) => {
                    waited += wait;
                    tokio::time::sleep(wait).await;
                }
            }
        }
        if waited > std::time::Duration::ZERO {
            metrics::histogram!("gateway_bandwidth_wait_seconds").record(waited.as_secs_f64());
        }
    }
}

/// A compiled `BandwidthRuleConfig`: globs are parsed once at config-load
/// time instead of on every request.
pub struct BandwidthRule {
    path: Option<globset::GlobMatcher>,
    mime: Option<globset::GlobMatcher>,
    client_ip: Option<globset::GlobMatcher>,
    pub rate_bytes_per_sec: u64,
    pub burst_bytes: u64,
    pub enabled: bool,
}

impl BandwidthRule {
    pub fn compile(cfg: &BandwidthRuleConfig) -> anyhow::Result<Self> {
        Ok(Self {
            path: Some(Glob::new(&cfg.path_glob)?.compile_matcher()),
            mime: cfg
                .mime_glob
                .as_deref()
                .map(Glob::new)
                .transpose()?
                .map(|g| g.compile_matcher()),
            client_ip: cfg
                .client_ip_glob
                .as_deref()
                .map(Glob::new)
                .transpose()?
                .map(|g| g.compile_matcher()),
            rate_bytes_per_sec: cfg.rate_bytes_per_sec,
            burst_bytes: cfg.burst_bytes,
            enabled: cfg.enabled,
        })
    }

    fn matches(&self, path: &str, mime: Option<&str>, client_ip: &IpAddr) -> bool {
        if !self.enabled {
            return false;
        }
        if let Some(m) = &self.path {
            if !m.is_match(path) {
                return false;
            }
        }
        if let Some(m) = &self.mime {
            match mime {
                Some(mime) if m.is_match(mime) => {}
                _ => return false,
            }
        }
        if let Some(m) = &self.client_ip {
            if !m.is_match(client_ip.to_string()) {
                return false;
            }
        }
        true
    }
}

/// Compiled set of bandwidth rules, evaluated top-to-first-match.
#[derive(Default)]
pub struct BandwidthRules {
    rules: Vec<BandwidthRule>,
}

impl BandwidthRules {
    pub fn compile(cfgs: &[BandwidthRuleConfig]) -> anyhow::Result<Self> {
        let rules = cfgs
            .iter()
            .map(BandwidthRule::compile)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn find(&self, path: &str, mime: Option<&str>, client_ip: &IpAddr) -> Option<&BandwidthRule> {
        self.rules.iter().find(|r| r.matches(path, mime, client_ip))
    }
}

/// Wrap a response body so each frame waits on `bucket` before being yielded,
/// throttling the effective send rate to the bucket's configured rate.
pub fn throttle_body(body: BoxBody, bucket: Arc<TokenBucket>) -> BoxBody {
    let stream = futures_util::stream::unfold((body, bucket), |(mut body, bucket)| async move {
        match body.frame().await {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    bucket.acquire(data.len()).await;
                    metrics::counter!("gateway_bandwidth_bytes_sent_total").increment(data.len() as u64);
                }
                Some((Ok(frame), (body, bucket)))
            }
            Some(Err(e)) => Some((Err(e), (body, bucket))),
            None => None,
        }
    });
    BodyExt::boxed(StreamBody::new(stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_bucket_sends_immediately() {
        let bucket = TokenBucket::new(1024, 4096);
        assert_eq!(bucket.try_acquire(1024), None);
    }

    #[test]
    fn empty_bucket_requests_wait() {
        let bucket = TokenBucket::new(1024, 1024);
        bucket.try_acquire(1024);
        let wait = bucket.try_acquire(1024).expect("should need to wait");
        assert!(wait.as_micros() as u64 >= MIN_SLEEP_USEC);
        assert!(wait.as_micros() as u64 <= MAX_SLEEP_USEC);
    }

    #[test]
    fn rule_matches_path_and_ip() {
        let cfg = BandwidthRuleConfig {
            path_glob: "/downloads/*".to_string(),
            mime_glob: None,
            client_ip_glob: Some("10.0.0.*".to_string()),
            rate_bytes_per_sec: 1024,
            burst_bytes: 4096,
            enabled: true,
        };
        let rule = BandwidthRule::compile(&cfg).unwrap();
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        assert!(rule.matches("/downloads/file.zip", None, &ip));
        assert!(!rule.matches("/api/x", None, &ip));
        let other_ip: IpAddr = "10.0.1.5".parse().unwrap();
        assert!(!rule.matches("/downloads/file.zip", None, &other_ip));
    }
}
