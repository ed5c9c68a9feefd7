use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Deserialize a `T` that implements `Default` — treats JSON `null` the same as
/// a missing field (returns `T::default()`).  Use with:
///   `#[serde(default, deserialize_with = "deserialize_null_default")]`
fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Top-level server configuration. Loaded once at startup from TOML/JSON;
/// there is no watch/hot-reload loop — restart to pick up changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub push: PushConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// The `http {}` block: server blocks, upstream groups, and the directive
/// defaults every `effective()` lookup ultimately falls back to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub server_blocks: Vec<ServerBlock>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub upstream_groups: Vec<ClusterConfig>,

    #[serde(default)]
    pub gzip: GzipConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub bandwidth_rules: Vec<BandwidthRuleConfig>,

    #[serde(default)]
    pub security_headers: SecurityHeadersConfig,

    #[serde(default = "default_server_header")]
    pub server_header: String,
}

fn default_server_header() -> String {
    "janus".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub listeners: Vec<StreamListenerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamListenerConfig {
    pub listen: String,
    /// "tcp" or "udp".
    #[serde(default = "default_stream_proto")]
    pub protocol: String,
    pub upstream: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_udp_session_idle_secs")]
    pub udp_session_idle_secs: u64,
}

fn default_stream_proto() -> String {
    "tcp".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_udp_session_idle_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_push_path")]
    pub path: String,

    #[serde(default = "default_push_queue_depth")]
    pub queue_depth: usize,

    #[serde(default = "default_push_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_push_path(),
            queue_depth: default_push_queue_depth(),
            heartbeat_secs: default_push_heartbeat_secs(),
        }
    }
}

fn default_push_path() -> String {
    "/events".to_string()
}

fn default_push_queue_depth() -> usize {
    256
}

fn default_push_heartbeat_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_listen")]
    pub listen: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen: default_admin_listen(),
        }
    }
}

fn default_admin_listen() -> String {
    "0.0.0.0:9090".to_string()
}

// ---------------------------------------------------------------------------
// Server / location blocks
// ---------------------------------------------------------------------------

/// One `server { ... }` block. Following the nginx model, every location
/// belongs to a server block, selected by (listen port, Host header).
/// The special `server_name` entry `"_"` marks the default server for a port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerBlock {
    pub name: String,

    /// Host patterns. Supports exact (`api.example.com`), wildcard suffix
    /// (`*.example.com`), wildcard prefix (`api.*`), and default (`_`).
    pub hosts: Vec<String>,

    /// Ports this server block listens on. Empty means "any configured
    /// listener" (single-port deployments need not repeat the port here).
    #[serde(default)]
    pub listen: Vec<u16>,

    /// Document root for static locations with no closer override.
    #[serde(default)]
    pub root: Option<String>,

    /// Index file names tried in order when a location resolves to a directory.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub index: Vec<String>,

    #[serde(default)]
    pub gzip: Option<GzipConfig>,

    #[serde(default)]
    pub cache_enabled: Option<bool>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub routes: Vec<LocationBlock>,
}

/// One `location { ... }` block. `clusters` non-empty means `proxy_pass` to
/// a weighted set of upstream groups; empty means serve static files under
/// the effective root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationBlock {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// URI pattern. Supports exact match, prefix match (`/v1/api/*`), and `/*` for catch-all.
    pub uri: String,

    /// Allowed HTTP methods. Empty means all methods.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub methods: Vec<String>,

    /// Header matchers (AND semantics).
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub headers: Vec<HeaderMatcher>,

    /// Higher value = higher priority.
    #[serde(default)]
    pub priority: i32,

    /// Weighted upstream-group references for traffic distribution. Empty
    /// means this location serves static files instead of proxying.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub clusters: Vec<WeightedCluster>,

    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,

    /// When set, the request header value overrides weighted cluster selection.
    #[serde(default)]
    pub cluster_override_header: Option<String>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub request_header_transforms: Vec<HeaderTransform>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub response_header_transforms: Vec<HeaderTransform>,

    /// Requests exceeding this limit are rejected with 413. `None` means no limit.
    #[serde(default)]
    pub max_body_bytes: Option<u64>,

    #[serde(default)]
    pub enable_compression: bool,

    /// Root override for this location; falls back to the server block's root.
    #[serde(default)]
    pub root: Option<String>,

    /// Index file names for this location; falls back to the server block's.
    #[serde(default)]
    pub index: Option<Vec<String>>,

    /// Response-cache override for this location; falls back to the server block's.
    #[serde(default)]
    pub cache_enabled: Option<bool>,

    /// 1 = enabled, 0 = disabled.
    #[serde(default = "default_status")]
    pub status: u8,

    #[serde(default)]
    pub plugins: Option<serde_json::Value>,
}

/// Supports exact (default), prefix, regex, and presence-only match.
/// Multiple matchers on a route use AND semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderMatcher {
    pub name: String,

    /// Ignored when `match_type` is "present".
    #[serde(default)]
    pub value: String,

    /// "exact" (default), "prefix", "regex", "present".
    #[serde(default = "default_header_match_type")]
    pub match_type: String,

    #[serde(default)]
    pub invert: bool,
}

fn default_header_match_type() -> String {
    "exact".to_string()
}

/// Operations: "set" (replace), "add" (append), "remove" (delete).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderTransform {
    pub name: String,

    #[serde(default)]
    pub value: String,

    /// "set" (default), "add", "remove".
    #[serde(default = "default_header_transform_action")]
    pub action: String,
}

fn default_header_transform_action() -> String {
    "set".to_string()
}

/// Weighted reference to an upstream group ("cluster" in this codebase's
/// vocabulary) for traffic splitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedCluster {
    pub name: String,

    #[serde(default = "default_cluster_weight")]
    pub weight: u32,
}

fn default_cluster_weight() -> u32 {
    100
}

fn default_status() -> u8 {
    1
}

// ---------------------------------------------------------------------------
// Upstream groups ("clusters")
// ---------------------------------------------------------------------------

/// Upstream group definition. Owns servers, LB policy, timeouts, health
/// checks, circuit breakers, retries, and session persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,

    /// "roundrobin", "weighted_random", "random", "least_request", "ip_hash".
    #[serde(rename = "type", default = "default_upstream_type")]
    pub lb_type: String,

    #[serde(default)]
    pub timeout: TimeoutConfig,

    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// "pass" (use client host), "node" (use upstream host), "rewrite" + upstream_host.
    #[serde(default = "default_pass_host")]
    pub pass_host: String,

    #[serde(default)]
    pub upstream_host: Option<String>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub nodes: Vec<UpstreamServer>,

    #[serde(default)]
    pub keepalive_pool: KeepalivePoolConfig,

    #[serde(default)]
    pub health_check: Option<HealthCheckConfig>,

    #[serde(default)]
    pub retry: Option<RetryConfig>,

    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    /// Default `false` — typical for internal services with self-signed certs.
    #[serde(default)]
    pub tls_verify: bool,

    /// Session persistence ("sticky sessions").
    #[serde(default)]
    pub session_persistence: Option<SessionPersistenceConfig>,
}

fn default_upstream_type() -> String {
    "roundrobin".to_string()
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_pass_host() -> String {
    "pass".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_timeout")]
    pub connect: f64,

    #[serde(default = "default_timeout")]
    pub send: f64,

    #[serde(default = "default_timeout")]
    pub read: f64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: default_timeout(),
            send: default_timeout(),
            read: default_timeout(),
        }
    }
}

fn default_timeout() -> f64 {
    6.0
}

/// A single backend server inside an upstream group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamServer {
    pub host: String,
    pub port: u16,

    #[serde(default = "default_weight")]
    pub weight: u32,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Consecutive failures before this server is treated as down.
    #[serde(default = "default_max_fails")]
    pub max_fails: u32,

    /// Seconds a server stays excluded after crossing `max_fails`, before
    /// soft-recovery makes it eligible for selection again.
    #[serde(default = "default_fail_timeout")]
    pub fail_timeout: u64,

    /// Maximum concurrent connections to this server (0 = unlimited).
    #[serde(default)]
    pub max_conns: u32,
}

fn default_weight() -> u32 {
    100
}

fn default_max_fails() -> u32 {
    1
}

fn default_fail_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepalivePoolConfig {
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,

    #[serde(default = "default_requests")]
    pub requests: u64,

    #[serde(default = "default_pool_size")]
    pub size: usize,
}

impl Default for KeepalivePoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout: default_idle_timeout(),
            requests: default_requests(),
            size: default_pool_size(),
        }
    }
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_requests() -> u64 {
    1000
}

fn default_pool_size() -> usize {
    320
}

/// Sticky sessions: lookup tries the session-id source first, falling back
/// to client-ip; bind always writes under whichever key produced the miss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPersistenceConfig {
    /// Name of a cookie or header carrying the session id. `None` means
    /// sessions are keyed purely by client ip.
    #[serde(default)]
    pub session_id_header: Option<String>,

    #[serde(default = "default_session_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_session_timeout_secs() -> u64 {
    300
}

/// Per-core token bucket to avoid cross-core contention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// "req" (request rate) or "count" (fixed window count).
    #[serde(default = "default_limit_mode")]
    pub mode: String,

    #[serde(default)]
    pub rate: Option<f64>,

    #[serde(default)]
    pub burst: Option<u64>,

    #[serde(default)]
    pub count: Option<u64>,

    #[serde(default)]
    pub time_window: Option<u64>,

    /// "remote_addr", "host_uri", "uri".
    #[serde(default = "default_limit_key")]
    pub key: String,

    #[serde(default = "default_rejected_code")]
    pub rejected_code: u16,
}

fn default_limit_mode() -> String {
    "req".to_string()
}

fn default_limit_key() -> String {
    "host_uri".to_string()
}

fn default_rejected_code() -> u16 {
    429
}

// ---------------------------------------------------------------------------
// Health checking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default)]
    pub active: Option<ActiveHealthCheck>,

    /// Passive health checking derived from live proxied traffic: a response
    /// status in `unhealthy_statuses`, or a transport-level failure, counts
    /// toward a server's `max_fails`/`fail_timeout` predicate (see the
    /// upstream pool's availability predicate).
    #[serde(default)]
    pub passive: Option<PassiveHealthCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveHealthCheck {
    /// "http", "https", "tcp", or "ping" (ping degrades to tcp).
    #[serde(default = "default_hc_type")]
    pub check_type: String,

    #[serde(default = "default_hc_interval")]
    pub interval: u64,

    #[serde(default = "default_hc_path")]
    pub path: String,

    #[serde(default = "default_hc_method")]
    pub method: String,

    /// Optional substring the probe response body must contain.
    #[serde(default)]
    pub expect_body: Option<String>,

    /// Override port for probes (when health endpoint runs on a separate port).
    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default = "default_healthy_statuses")]
    pub healthy_statuses: Vec<u16>,

    /// Consecutive successes required to transition DOWN/UNKNOWN → UP.
    #[serde(default = "default_hc_rise")]
    pub rise: u32,

    /// Consecutive failures required to transition UP → DOWN.
    #[serde(default = "default_hc_fall")]
    pub fall: u32,

    #[serde(default = "default_hc_timeout")]
    pub timeout: u64,

    /// Prevents probe storms when a group has thousands of servers.
    #[serde(default = "default_hc_concurrency")]
    pub concurrency: usize,

    /// Ring-buffer size for per-server probe history.
    #[serde(default = "default_hc_history")]
    pub history_size: usize,
}

fn default_hc_type() -> String {
    "http".to_string()
}

fn default_hc_interval() -> u64 {
    10
}

fn default_hc_path() -> String {
    "/health".to_string()
}

fn default_hc_method() -> String {
    "GET".to_string()
}

fn default_healthy_statuses() -> Vec<u16> {
    vec![200]
}

fn default_hc_rise() -> u32 {
    2
}

fn default_hc_fall() -> u32 {
    3
}

fn default_hc_timeout() -> u64 {
    3
}

fn default_hc_concurrency() -> usize {
    64
}

fn default_hc_history() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassiveHealthCheck {
    #[serde(default = "default_passive_unhealthy_statuses")]
    pub unhealthy_statuses: Vec<u16>,
}

impl Default for PassiveHealthCheck {
    fn default() -> Self {
        Self {
            unhealthy_statuses: default_passive_unhealthy_statuses(),
        }
    }
}

fn default_passive_unhealthy_statuses() -> Vec<u16> {
    vec![500, 502, 503, 504]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_count")]
    pub count: u32,

    #[serde(default = "default_retry_statuses")]
    pub retry_on_statuses: Vec<u16>,

    #[serde(default = "default_true")]
    pub retry_on_connect_failure: bool,

    #[serde(default = "default_true")]
    pub retry_on_timeout: bool,
}

fn default_retry_count() -> u32 {
    2
}

fn default_retry_statuses() -> Vec<u16> {
    vec![502, 503, 504]
}

fn default_true() -> bool {
    true
}

/// State machine: Closed → Open → HalfOpen → Closed/Open. A stricter,
/// secondary resilience layer next to the plain `max_fails`/`fail_timeout`
/// predicate — both must agree for a server to be selectable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_cb_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_cb_success_threshold")]
    pub success_threshold: u32,

    #[serde(default = "default_cb_open_duration")]
    pub open_duration_secs: u64,
}

fn default_cb_failure_threshold() -> u32 {
    5
}

fn default_cb_success_threshold() -> u32 {
    2
}

fn default_cb_open_duration() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Output policies: gzip, cache, bandwidth, security headers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GzipConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_gzip_min_length")]
    pub min_length: u64,

    #[serde(default = "default_gzip_types")]
    pub types: Vec<String>,
}

impl Default for GzipConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_length: default_gzip_min_length(),
            types: default_gzip_types(),
        }
    }
}

fn default_gzip_min_length() -> u64 {
    1024
}

fn default_gzip_types() -> Vec<String> {
    vec![
        "text/html".to_string(),
        "text/css".to_string(),
        "text/plain".to_string(),
        "application/json".to_string(),
        "application/javascript".to_string(),
        "application/xml".to_string(),
    ]
}

/// Cache eviction policy. An unrecognized string in config is rejected at
/// load time rather than silently falling back to Lru.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    Lru,
    Lfu,
    Fifo,
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::Lru
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_cache_max_bytes")]
    pub max_bytes: u64,

    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,

    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,

    #[serde(default)]
    pub policy: CachePolicy,

    #[serde(default = "default_cache_mime_whitelist")]
    pub mime_whitelist: Vec<String>,

    #[serde(default = "default_cache_min_size")]
    pub min_file_size: u64,

    #[serde(default = "default_cache_max_size")]
    pub max_file_size: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_bytes: default_cache_max_bytes(),
            max_entries: default_cache_max_entries(),
            default_ttl_secs: default_cache_ttl_secs(),
            policy: CachePolicy::default(),
            mime_whitelist: default_cache_mime_whitelist(),
            min_file_size: default_cache_min_size(),
            max_file_size: default_cache_max_size(),
        }
    }
}

fn default_cache_max_bytes() -> u64 {
    256 * 1024 * 1024
}

fn default_cache_max_entries() -> usize {
    10_000
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_cache_mime_whitelist() -> Vec<String> {
    vec![
        "text/html".to_string(),
        "text/css".to_string(),
        "text/plain".to_string(),
        "application/json".to_string(),
        "application/javascript".to_string(),
        "image/png".to_string(),
        "image/jpeg".to_string(),
        "image/svg+xml".to_string(),
    ]
}

fn default_cache_min_size() -> u64 {
    0
}

fn default_cache_max_size() -> u64 {
    10 * 1024 * 1024
}

/// `bandwidth_limit "<path-glob>" <rate>B/s burst=<n>B;` — rules are
/// evaluated top-to-first-match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandwidthRuleConfig {
    pub path_glob: String,

    #[serde(default)]
    pub mime_glob: Option<String>,

    #[serde(default)]
    pub client_ip_glob: Option<String>,

    pub rate_bytes_per_sec: u64,

    #[serde(default = "default_burst_bytes")]
    pub burst_bytes: u64,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_burst_bytes() -> u64 {
    65536
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityHeadersConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_hsts")]
    pub hsts: String,

    #[serde(default = "default_xfo")]
    pub x_frame_options: String,

    #[serde(default = "default_xcto")]
    pub x_content_type_options: String,

    #[serde(default = "default_referrer_policy")]
    pub referrer_policy: String,
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hsts: default_hsts(),
            x_frame_options: default_xfo(),
            x_content_type_options: default_xcto(),
            referrer_policy: default_referrer_policy(),
        }
    }
}

fn default_hsts() -> String {
    "max-age=63072000; includeSubDomains".to_string()
}

fn default_xfo() -> String {
    "SAMEORIGIN".to_string()
}

fn default_xcto() -> String {
    "nosniff".to_string()
}

fn default_referrer_policy() -> String {
    "no-referrer-when-downgrade".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_block_full_serde() {
        let json = r#"{
            "name": "user-service",
            "hosts": ["api.example.com", "*.staging.example.com"],
            "listen": [80],
            "root": "/srv/www",
            "index": ["index.html"],
            "routes": [
                {
                    "id": "r1",
                    "name": "users-api",
                    "uri": "/v1/users/*",
                    "methods": ["GET", "POST"],
                    "headers": [
                        {"name": "X-Canary", "value": "true", "match_type": "exact", "invert": false}
                    ],
                    "priority": 10,
                    "clusters": [
                        {"name": "prod", "weight": 90},
                        {"name": "canary", "weight": 10}
                    ],
                    "rate_limit": {
                        "mode": "req",
                        "rate": 1000.0,
                        "burst": 200,
                        "key": "remote_addr",
                        "rejected_code": 429
                    },
                    "cluster_override_header": "X-Override",
                    "request_header_transforms": [
                        {"name": "X-Env", "value": "canary", "action": "set"}
                    ],
                    "response_header_transforms": [
                        {"name": "X-Debug", "value": "", "action": "remove"}
                    ],
                    "max_body_bytes": 1048576,
                    "enable_compression": true,
                    "status": 1
                }
            ]
        }"#;

        let server: ServerBlock = serde_json::from_str(json).unwrap();
        assert_eq!(server.name, "user-service");
        assert_eq!(server.hosts.len(), 2);
        assert_eq!(server.listen, vec![80]);
        assert_eq!(server.root.as_deref(), Some("/srv/www"));
        assert_eq!(server.routes.len(), 1);

        let route = &server.routes[0];
        assert_eq!(route.id, "r1");
        assert_eq!(route.name, "users-api");
        assert_eq!(route.uri, "/v1/users/*");
        assert_eq!(route.methods, vec!["GET", "POST"]);
        assert_eq!(route.priority, 10);
        assert_eq!(route.status, 1);
        assert_eq!(route.max_body_bytes, Some(1048576));
        assert!(route.enable_compression);
        assert_eq!(
            route.cluster_override_header,
            Some("X-Override".to_string())
        );

        assert_eq!(route.clusters.len(), 2);
        assert_eq!(route.clusters[0].name, "prod");
        assert_eq!(route.clusters[0].weight, 90);

        let rl = route.rate_limit.as_ref().unwrap();
        assert_eq!(rl.mode, "req");
        assert_eq!(rl.rate, Some(1000.0));
        assert_eq!(rl.key, "remote_addr");

        assert_eq!(route.headers.len(), 1);
        assert_eq!(route.headers[0].name, "X-Canary");

        assert_eq!(route.request_header_transforms.len(), 1);
        assert_eq!(route.response_header_transforms.len(), 1);
    }

    #[test]
    fn test_location_block_minimal_defaults() {
        let json = r#"{ "uri": "/*" }"#;
        let loc: LocationBlock = serde_json::from_str(json).unwrap();
        assert_eq!(loc.uri, "/*");
        assert!(loc.clusters.is_empty());
        assert_eq!(loc.status, 1);
        assert!(loc.root.is_none());
    }

    #[test]
    fn test_location_block_null_routes_defaults_to_empty() {
        let json = r#"{"name": "no-routes", "hosts": ["h.com"], "routes": null}"#;
        let server: ServerBlock = serde_json::from_str(json).unwrap();
        assert!(server.routes.is_empty());
    }

    #[test]
    fn test_cluster_defaults() {
        let json = r#"{"name": "default-cluster"}"#;
        let cluster: ClusterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cluster.name, "default-cluster");
        assert_eq!(cluster.lb_type, "roundrobin");
        assert_eq!(cluster.scheme, "http");
        assert_eq!(cluster.pass_host, "pass");
        assert!(cluster.upstream_host.is_none());
        assert!(cluster.nodes.is_empty());
        assert!(cluster.health_check.is_none());
        assert!(cluster.retry.is_none());
        assert!(cluster.circuit_breaker.is_none());
        assert!(cluster.session_persistence.is_none());
        assert!(!cluster.tls_verify);
        assert_eq!(cluster.timeout.connect, 6.0);
        assert_eq!(cluster.keepalive_pool.idle_timeout, 60);
    }

    #[test]
    fn test_cluster_with_health_check() {
        let json = r#"{
            "name": "hc-cluster",
            "health_check": {
                "active": {
                    "check_type": "http",
                    "interval": 5,
                    "path": "/healthz",
                    "port": 8081,
                    "healthy_statuses": [200, 204],
                    "rise": 2,
                    "fall": 4,
                    "timeout": 2,
                    "concurrency": 32
                },
                "passive": {
                    "unhealthy_statuses": [500, 503]
                }
            }
        }"#;

        let cluster: ClusterConfig = serde_json::from_str(json).unwrap();
        let hc = cluster.health_check.unwrap();
        let active = hc.active.unwrap();
        assert_eq!(active.check_type, "http");
        assert_eq!(active.interval, 5);
        assert_eq!(active.path, "/healthz");
        assert_eq!(active.port, Some(8081));
        assert_eq!(active.healthy_statuses, vec![200, 204]);
        assert_eq!(active.rise, 2);
        assert_eq!(active.fall, 4);
        assert_eq!(active.timeout, 2);
        assert_eq!(active.concurrency, 32);

        let passive = hc.passive.unwrap();
        assert_eq!(passive.unhealthy_statuses, vec![500, 503]);
    }

    #[test]
    fn test_health_check_defaults() {
        let json = r#"{ "active": {} }"#;
        let hc: HealthCheckConfig = serde_json::from_str(json).unwrap();
        let active = hc.active.unwrap();
        assert_eq!(active.check_type, "http");
        assert_eq!(active.interval, 10);
        assert_eq!(active.path, "/health");
        assert_eq!(active.method, "GET");
        assert!(active.port.is_none());
        assert_eq!(active.healthy_statuses, vec![200]);
        assert_eq!(active.rise, 2);
        assert_eq!(active.fall, 3);
        assert_eq!(active.timeout, 3);
        assert_eq!(active.concurrency, 64);
        assert_eq!(active.history_size, 100);
    }

    #[test]
    fn test_health_check_passive_defaults() {
        let json = r#"{ "passive": {} }"#;
        let hc: HealthCheckConfig = serde_json::from_str(json).unwrap();
        let passive = hc.passive.unwrap();
        assert_eq!(passive.unhealthy_statuses, vec![500, 502, 503, 504]);
    }

    #[test]
    fn test_session_persistence_defaults() {
        let json = r#"{}"#;
        let sp: SessionPersistenceConfig = serde_json::from_str(json).unwrap();
        assert!(sp.session_id_header.is_none());
        assert_eq!(sp.idle_timeout_secs, 300);
    }

    #[test]
    fn test_cluster_with_retry() {
        let json = r#"{
            "name": "retry-cluster",
            "retry": {
                "count": 3,
                "retry_on_statuses": [502, 503],
                "retry_on_connect_failure": false,
                "retry_on_timeout": true
            }
        }"#;

        let cluster: ClusterConfig = serde_json::from_str(json).unwrap();
        let retry = cluster.retry.unwrap();
        assert_eq!(retry.count, 3);
        assert_eq!(retry.retry_on_statuses, vec![502, 503]);
        assert!(!retry.retry_on_connect_failure);
        assert!(retry.retry_on_timeout);
    }

    #[test]
    fn test_retry_defaults() {
        let json = r#"{"count": 1}"#;
        let retry: RetryConfig = serde_json::from_str(json).unwrap();
        assert_eq!(retry.count, 1);
        assert_eq!(retry.retry_on_statuses, vec![502, 503, 504]);
        assert!(retry.retry_on_connect_failure);
        assert!(retry.retry_on_timeout);
    }

    #[test]
    fn test_circuit_breaker_defaults() {
        let json = r#"{}"#;
        let cb: CircuitBreakerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cb.failure_threshold, 5);
        assert_eq!(cb.success_threshold, 2);
        assert_eq!(cb.open_duration_secs, 30);
    }

    #[test]
    fn test_cluster_with_tls_verify() {
        let json = r#"{"name": "tls", "scheme": "https", "tls_verify": true}"#;
        let cluster: ClusterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cluster.scheme, "https");
        assert!(cluster.tls_verify);
    }

    #[test]
    fn test_upstream_server_defaults() {
        let json = r#"{"host": "10.0.0.1", "port": 8080}"#;
        let node: UpstreamServer = serde_json::from_str(json).unwrap();
        assert_eq!(node.host, "10.0.0.1");
        assert_eq!(node.port, 8080);
        assert_eq!(node.weight, 100);
        assert!(node.metadata.is_empty());
        assert_eq!(node.max_fails, 1);
        assert_eq!(node.fail_timeout, 10);
        assert_eq!(node.max_conns, 0);
    }

    #[test]
    fn test_upstream_server_with_metadata() {
        let json = r#"{"host": "10.0.0.1", "port": 8080, "weight": 50, "max_fails": 3, "fail_timeout": 30, "metadata": {"env": "prod", "zone": "a"}}"#;
        let node: UpstreamServer = serde_json::from_str(json).unwrap();
        assert_eq!(node.weight, 50);
        assert_eq!(node.max_fails, 3);
        assert_eq!(node.fail_timeout, 30);
        assert_eq!(node.metadata.len(), 2);
        assert_eq!(node.metadata["env"], "prod");
    }

    #[test]
    fn test_null_methods_defaults_to_empty() {
        let json = r#"{"uri": "/", "methods": null, "clusters": [{"name": "x"}]}"#;
        let route: LocationBlock = serde_json::from_str(json).unwrap();
        assert!(route.methods.is_empty());
    }

    #[test]
    fn test_null_headers_defaults_to_empty() {
        let json = r#"{"uri": "/", "headers": null, "clusters": [{"name": "x"}]}"#;
        let route: LocationBlock = serde_json::from_str(json).unwrap();
        assert!(route.headers.is_empty());
    }

    #[test]
    fn test_null_nodes_defaults_to_empty() {
        let json = r#"{"name": "c", "nodes": null}"#;
        let cluster: ClusterConfig = serde_json::from_str(json).unwrap();
        assert!(cluster.nodes.is_empty());
    }

    #[test]
    fn test_null_clusters_defaults_to_empty() {
        let json = r#"{"uri": "/", "clusters": null}"#;
        let route: LocationBlock = serde_json::from_str(json).unwrap();
        assert!(route.clusters.is_empty());
    }

    #[test]
    fn test_header_matcher_all_types() {
        for (match_type, invert) in &[
            ("exact", false),
            ("prefix", true),
            ("regex", false),
            ("present", false),
        ] {
            let json = format!(
                r#"{{"name": "X-Test", "value": "v", "match_type": "{}", "invert": {}}}"#,
                match_type, invert
            );
            let hm: HeaderMatcher = serde_json::from_str(&json).unwrap();
            assert_eq!(hm.match_type, *match_type);
            assert_eq!(hm.invert, *invert);
        }
    }

    #[test]
    fn test_header_transform_defaults() {
        let json = r#"{"name": "X-Custom"}"#;
        let ht: HeaderTransform = serde_json::from_str(json).unwrap();
        assert_eq!(ht.name, "X-Custom");
        assert_eq!(ht.value, "");
        assert_eq!(ht.action, "set");
    }

    #[test]
    fn test_rate_limit_defaults() {
        let json = r#"{}"#;
        let rl: RateLimitConfig = serde_json::from_str(json).unwrap();
        assert_eq!(rl.mode, "req");
        assert_eq!(rl.key, "host_uri");
        assert_eq!(rl.rejected_code, 429);
    }

    #[test]
    fn test_weighted_cluster_default_weight() {
        let json = r#"{"name": "backend"}"#;
        let wc: WeightedCluster = serde_json::from_str(json).unwrap();
        assert_eq!(wc.name, "backend");
        assert_eq!(wc.weight, 100);
    }

    #[test]
    fn test_keepalive_pool_defaults() {
        let kp = KeepalivePoolConfig::default();
        assert_eq!(kp.idle_timeout, 60);
        assert_eq!(kp.requests, 1000);
        assert_eq!(kp.size, 320);
    }

    #[test]
    fn test_timeout_defaults() {
        let tc = TimeoutConfig::default();
        assert_eq!(tc.connect, 6.0);
        assert_eq!(tc.send, 6.0);
        assert_eq!(tc.read, 6.0);
    }

    #[test]
    fn test_gateway_config_defaults() {
        let cfg = GatewayConfig::default();
        assert!(cfg.http.server_blocks.is_empty());
        assert!(cfg.http.upstream_groups.is_empty());
        assert!(!cfg.http.gzip.enabled);
        assert!(!cfg.http.cache.enabled);
        assert_eq!(cfg.http.cache.policy, CachePolicy::Lru);
        assert!(cfg.stream.listeners.is_empty());
        assert!(!cfg.push.enabled);
        assert_eq!(cfg.admin.listen, "0.0.0.0:9090");
    }

    #[test]
    fn test_cache_policy_rejects_unknown() {
        let json = r#"{ "policy": "mru" }"#;
        let result: Result<CacheConfig, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_cache_policy_accepts_all_three() {
        for (input, expected) in [
            (r#"{"policy":"lru"}"#, CachePolicy::Lru),
            (r#"{"policy":"lfu"}"#, CachePolicy::Lfu),
            (r#"{"policy":"fifo"}"#, CachePolicy::Fifo),
        ] {
            let cfg: CacheConfig = serde_json::from_str(input).unwrap();
            assert_eq!(cfg.policy, expected);
        }
    }

    #[test]
    fn test_bandwidth_rule_serde() {
        let json = r#"{
            "path_glob": "*.bin",
            "rate_bytes_per_sec": 102400,
            "burst_bytes": 204800
        }"#;
        let rule: BandwidthRuleConfig = serde_json::from_str(json).unwrap();
        assert_eq!(rule.path_glob, "*.bin");
        assert_eq!(rule.rate_bytes_per_sec, 102400);
        assert!(rule.enabled);
    }

    #[test]
    fn test_bandwidth_rule_defaults() {
        let json = r#"{"path_glob": "*", "rate_bytes_per_sec": 1000}"#;
        let rule: BandwidthRuleConfig = serde_json::from_str(json).unwrap();
        assert_eq!(rule.burst_bytes, 65536);
        assert!(rule.mime_glob.is_none());
        assert!(rule.client_ip_glob.is_none());
    }

    #[test]
    fn test_gzip_config_defaults() {
        let gz = GzipConfig::default();
        assert!(!gz.enabled);
        assert_eq!(gz.min_length, 1024);
        assert!(gz.types.contains(&"text/html".to_string()));
    }

    #[test]
    fn test_security_headers_defaults() {
        let sh = SecurityHeadersConfig::default();
        assert!(!sh.enabled);
        assert_eq!(sh.x_frame_options, "SAMEORIGIN");
        assert_eq!(sh.x_content_type_options, "nosniff");
    }

    #[test]
    fn test_route_with_plugins() {
        let json = r#"{
            "uri": "/",
            "clusters": [{"name": "x"}],
            "plugins": {"cors": {"enabled": true}}
        }"#;
        let route: LocationBlock = serde_json::from_str(json).unwrap();
        assert!(route.plugins.is_some());
        let plugins = route.plugins.unwrap();
        assert!(plugins.get("cors").is_some());
    }

    #[test]
    fn test_route_without_plugins() {
        let json = r#"{"uri": "/", "clusters": [{"name": "x"}]}"#;
        let route: LocationBlock = serde_json::from_str(json).unwrap();
        assert!(route.plugins.is_none());
    }

    #[test]
    fn test_stream_listener_defaults() {
        let json = r#"{"listen": "0.0.0.0:9000", "upstream": "backend"}"#;
        let listener: StreamListenerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(listener.protocol, "tcp");
        assert_eq!(listener.connect_timeout_ms, 5000);
        assert_eq!(listener.udp_session_idle_secs, 60);
    }

    #[test]
    fn test_push_config_defaults() {
        let pc = PushConfig::default();
        assert!(!pc.enabled);
        assert_eq!(pc.path, "/events");
        assert_eq!(pc.queue_depth, 256);
        assert_eq!(pc.heartbeat_secs, 30);
    }
}
