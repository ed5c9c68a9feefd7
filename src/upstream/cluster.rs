use crate::config::{ClusterConfig, KeepalivePoolConfig};
use crate::proxy::context::BoxBody;
use crate::upstream::circuit_breaker::CircuitBreakerRegistry;
use crate::upstream::health::{HealthCheckHistory, HealthCheckResult, HealthStatus};
use crate::upstream::loadbalance::{LoadBalancer, RequestGuard, UpstreamTarget};
use crate::upstream::session::SessionTable;
use dashmap::DashMap;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A rustls `ServerCertVerifier` that accepts any certificate without validation.
/// Used when `tls_verify: false` — the common case for internal / mesh traffic
/// where encryption is desired but upstream identity verification is not.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Runtime representation of a cluster — owns all per-cluster state.
///
/// This is the "live" counterpart of `ClusterConfig`. While `ClusterConfig` is
/// a pure serde struct describing *what* a cluster should look like, `Cluster`
/// holds the mutable runtime state: load balancer, circuit breakers, health
/// status, and discovered nodes.
#[derive(Clone)]
pub struct Cluster {
    /// Immutable snapshot of the cluster's declarative config.
    config: Arc<ClusterConfig>,

    /// Pre-interned `Arc<str>` copies of hot config fields so that
    /// `select_upstream()` only bumps a reference count instead of
    /// heap-allocating a fresh `String` on every request.
    scheme: Arc<str>,
    pass_host: Arc<str>,
    upstream_host: Option<Arc<str>>,

    /// Per-cluster HTTP client with connection pool configured from
    /// `ClusterConfig::keepalive_pool`. Each cluster owns its own pool
    /// so that different clusters can have different idle_timeout, pool_size, etc.
    /// Wraps an `HttpsConnector` so that both `http://` and `https://` upstreams
    /// are supported (TLS via rustls). HTTP/2 is negotiated automatically via ALPN.
    http_client: Client<HttpsConnector<HttpConnector>, BoxBody>,

    /// Load balancer (round-robin / random / least-request / peak-ewma).
    lb: Arc<LoadBalancer>,

    /// Per-node circuit breakers.
    circuit_breakers: Arc<CircuitBreakerRegistry>,

    /// Per-node active-health status, keyed by "host:port". `Unknown` until
    /// the first probe completes.
    active_status: Arc<DashMap<String, AtomicU8>>,
    /// Consecutive-success / consecutive-failure streaks feeding the
    /// `rise` / `fall` transition thresholds. Both are reset to zero on
    /// every status transition.
    active_rise_streak: Arc<DashMap<String, AtomicU32>>,
    active_fall_streak: Arc<DashMap<String, AtomicU32>>,
    /// Recent probe history per node, for the health-check inspection API.
    health_history: Arc<DashMap<String, Mutex<HealthCheckHistory>>>,

    /// Passive availability bookkeeping, keyed by "host:port". Tracks the
    /// current consecutive-failure streak and the unix timestamp of the most
    /// recent failure, implementing the `max_fails` / `fail_timeout` predicate
    /// from each node's `UpstreamServer` config.
    consecutive_failures: Arc<DashMap<String, AtomicU32>>,
    last_failure_time: Arc<DashMap<String, AtomicU64>>,

    /// Sticky-session table, present only when the cluster config enables
    /// session persistence.
    session: Option<Arc<SessionTable>>,
    session_id_header: Option<Arc<str>>,
}

/// Point-in-time view of one node's active-health state, for the admin API.
#[derive(Debug, Clone)]
pub struct NodeHealthReport {
    pub node: String,
    pub status: HealthStatus,
    pub rise_streak: u32,
    pub fall_streak: u32,
    pub total_checks: usize,
    pub successful_checks: usize,
    pub failed_checks: usize,
    pub timeouts: usize,
    pub uptime_pct: Option<f64>,
    pub avg_response_time_ms: Option<f64>,
    pub min_response_time_ms: Option<u64>,
    pub max_response_time_ms: Option<u64>,
}

impl Cluster {
    pub fn new(config: ClusterConfig) -> Self {
        let lb = LoadBalancer::new(&config.lb_type);
        if !config.nodes.is_empty() {
            lb.update_instances(&config.nodes);
        }

        let http_client = build_cluster_http_client(
            &config.keepalive_pool,
            config.tls_verify,
            config.timeout.connect,
        );
        let scheme: Arc<str> = Arc::from(config.scheme.as_str());
        let pass_host: Arc<str> = Arc::from(config.pass_host.as_str());
        let upstream_host: Option<Arc<str>> = config.upstream_host.as_deref().map(Arc::from);
        let (session, session_id_header) = build_session_table(&config);

        Self {
            config: Arc::new(config),
            scheme,
            pass_host,
            upstream_host,
            http_client,
            lb,
            circuit_breakers: Arc::new(CircuitBreakerRegistry::new()),
            active_status: Arc::new(DashMap::new()),
            active_rise_streak: Arc::new(DashMap::new()),
            active_fall_streak: Arc::new(DashMap::new()),
            health_history: Arc::new(DashMap::new()),
            consecutive_failures: Arc::new(DashMap::new()),
            last_failure_time: Arc::new(DashMap::new()),
            session,
            session_id_header,
        }
    }

    // ---- Config accessors ----

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn http_client(&self) -> &Client<HttpsConnector<HttpConnector>, BoxBody> {
        &self.http_client
    }

    pub fn lb(&self) -> &Arc<LoadBalancer> {
        &self.lb
    }

    // ---- Node selection ----

    /// Resolve the sticky-session key for a request: the configured session
    /// id header if present and non-empty, otherwise the client ip.
    pub fn session_key(&self, client_ip: &str, headers: &http::HeaderMap) -> String {
        if let Some(header_name) = &self.session_id_header {
            if let Some(v) = headers.get(header_name.as_ref()).and_then(|v| v.to_str().ok()) {
                if !v.is_empty() {
                    return v.to_string();
                }
            }
        }
        client_ip.to_string()
    }

    /// Select an upstream node, skipping any that are currently unavailable
    /// (marked down by active health checks, or tripped by the passive
    /// `max_fails` / `fail_timeout` predicate). Tries at most `node_count`
    /// times before giving up, since the load balancer has no built-in notion
    /// of availability and may hand back the same excluded node repeatedly.
    ///
    /// When sticky sessions are enabled, a live binding for `session_key` is
    /// tried first; a hit that is still available short-circuits the normal
    /// load-balancer policy. A miss (or a binding pointing at an unavailable
    /// node) falls through to the policy selection below, and the resulting
    /// node is bound for next time.
    pub fn select_upstream(
        &self,
        client_ip: Option<&str>,
        session_key: Option<&str>,
    ) -> Option<(UpstreamTarget, RequestGuard)> {
        if let (Some(table), Some(key)) = (&self.session, session_key) {
            if let Some(endpoint) = table.lookup(key) {
                if self.is_available(&endpoint) {
                    if let Some(instance) = self
                        .lb
                        .get_instances()
                        .into_iter()
                        .find(|i| i.endpoint() == &*endpoint)
                    {
                        table.touch(key);
                        let target = UpstreamTarget {
                            instance: instance.clone(),
                            scheme: self.scheme.clone(),
                            pass_host: self.pass_host.clone(),
                            upstream_host: self.upstream_host.clone(),
                        };
                        let guard = RequestGuard {
                            instance,
                            _balancer: None,
                        };
                        return Some((target, guard));
                    }
                }
            }
        }

        let attempts = self.node_count().max(1);
        for _ in 0..attempts {
            let guard = self.lb.select(client_ip)?;
            if self.is_available(&guard.endpoint()) {
                if let (Some(table), Some(key)) = (&self.session, session_key) {
                    table.bind(key, Arc::from(guard.endpoint()));
                }
                let target = UpstreamTarget {
                    instance: guard.instance.clone(),
                    scheme: self.scheme.clone(),
                    pass_host: self.pass_host.clone(),
                    upstream_host: self.upstream_host.clone(),
                };
                return Some((target, guard));
            }
        }
        None
    }

    /// Availability predicate combining active-health state and the passive
    /// `max_fails` / `fail_timeout` streak for a given node. A node that has
    /// crossed `fail_timeout` since its last failure is given another chance
    /// (its streak is cleared), consistent with nginx's soft-recovery model.
    pub fn is_available(&self, node_key: &str) -> bool {
        if !self.is_node_healthy(node_key) {
            return false;
        }

        let node_cfg = self
            .config
            .nodes
            .iter()
            .find(|n| format!("{}:{}", n.host, n.port) == node_key);
        let (max_fails, fail_timeout) = match node_cfg {
            Some(n) => (n.max_fails, n.fail_timeout),
            None => return true,
        };
        if max_fails == 0 {
            return true;
        }

        let failures = self
            .consecutive_failures
            .get(node_key)
            .map(|v| v.load(Ordering::Relaxed))
            .unwrap_or(0);
        if failures < max_fails {
            return true;
        }

        let last_failure = self
            .last_failure_time
            .get(node_key)
            .map(|v| v.load(Ordering::Relaxed))
            .unwrap_or(0);
        let elapsed = now_unix_secs().saturating_sub(last_failure);
        if elapsed >= fail_timeout {
            self.consecutive_failures
                .entry(node_key.to_string())
                .or_insert_with(|| AtomicU32::new(0))
                .store(0, Ordering::Relaxed);
            return true;
        }

        false
    }

    /// Record an upstream RPC failure against the passive `max_fails` streak.
    pub fn record_health_failure(&self, node_key: &str) {
        self.consecutive_failures
            .entry(node_key.to_string())
            .or_insert_with(|| AtomicU32::new(0))
            .fetch_add(1, Ordering::Relaxed);
        self.last_failure_time
            .entry(node_key.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .store(now_unix_secs(), Ordering::Relaxed);
    }

    /// Record an upstream RPC success, clearing the passive failure streak.
    pub fn record_health_success(&self, node_key: &str) {
        if let Some(entry) = self.consecutive_failures.get(node_key) {
            entry.store(0, Ordering::Relaxed);
        }
    }

    // ---- Active health state ----

    /// A node absent from `active_status` (never probed) or in `Unknown` is
    /// treated as healthy — optimistic default, consistent with the passive
    /// predicate below.
    pub fn is_node_healthy(&self, node_key: &str) -> bool {
        self.active_status
            .get(node_key)
            .map(|v| HealthStatus::from_u8(v.load(Ordering::Relaxed)) != HealthStatus::Down)
            .unwrap_or(true)
    }

    pub fn node_health_status(&self, node_key: &str) -> HealthStatus {
        self.active_status
            .get(node_key)
            .map(|v| HealthStatus::from_u8(v.load(Ordering::Relaxed)))
            .unwrap_or(HealthStatus::Unknown)
    }

    /// Apply one probe outcome to the rise/fall streaks and transition the
    /// node's status if its threshold is met. Both streaks reset to zero on
    /// every transition, so a flapping node must complete a fresh run of
    /// `rise` (or `fall`) consecutive results before flipping again. Returns
    /// `Some(new_status)` only when a transition actually occurred.
    pub fn apply_health_transition(
        &self,
        node_key: &str,
        healthy: bool,
        rise: u32,
        fall: u32,
    ) -> Option<HealthStatus> {
        let current = self.node_health_status(node_key);

        if healthy {
            self.active_fall_streak
                .entry(node_key.to_string())
                .or_insert_with(|| AtomicU32::new(0))
                .store(0, Ordering::Relaxed);
            let streak = self
                .active_rise_streak
                .entry(node_key.to_string())
                .or_insert_with(|| AtomicU32::new(0))
                .fetch_add(1, Ordering::Relaxed)
                + 1;

            if current != HealthStatus::Up && streak >= rise.max(1) {
                self.set_node_status(node_key, HealthStatus::Up);
                return Some(HealthStatus::Up);
            }
        } else {
            self.active_rise_streak
                .entry(node_key.to_string())
                .or_insert_with(|| AtomicU32::new(0))
                .store(0, Ordering::Relaxed);
            let streak = self
                .active_fall_streak
                .entry(node_key.to_string())
                .or_insert_with(|| AtomicU32::new(0))
                .fetch_add(1, Ordering::Relaxed)
                + 1;

            if current != HealthStatus::Down && streak >= fall.max(1) {
                self.set_node_status(node_key, HealthStatus::Down);
                return Some(HealthStatus::Down);
            }
        }

        None
    }

    fn set_node_status(&self, node_key: &str, status: HealthStatus) {
        self.active_status
            .entry(node_key.to_string())
            .or_insert_with(|| AtomicU8::new(HealthStatus::Unknown.as_u8()))
            .store(status.as_u8(), Ordering::Relaxed);
        self.active_rise_streak
            .entry(node_key.to_string())
            .or_insert_with(|| AtomicU32::new(0))
            .store(0, Ordering::Relaxed);
        self.active_fall_streak
            .entry(node_key.to_string())
            .or_insert_with(|| AtomicU32::new(0))
            .store(0, Ordering::Relaxed);
    }

    /// Record one probe outcome into the node's history ring buffer.
    pub fn record_probe_result(&self, node_key: &str, capacity: usize, result: HealthCheckResult) {
        self.health_history
            .entry(node_key.to_string())
            .or_insert_with(|| Mutex::new(HealthCheckHistory::new(capacity)))
            .lock()
            .unwrap()
            .push(result);
    }

    /// Run `f` against a node's probe history, if any has been recorded yet.
    pub fn with_health_history<T>(&self, node_key: &str, f: impl FnOnce(&HealthCheckHistory) -> T) -> Option<T> {
        self.health_history
            .get(node_key)
            .map(|entry| f(&entry.lock().unwrap()))
    }

    /// Administratively force a node's active-health status, bypassing the
    /// probe loop until the next probe result causes a fresh transition.
    pub fn force_node_up(&self, node_key: &str) {
        self.set_node_status(node_key, HealthStatus::Up);
    }

    pub fn force_node_down(&self, node_key: &str) {
        self.set_node_status(node_key, HealthStatus::Down);
    }

    /// All "host:port" keys currently known to this cluster's load balancer.
    pub fn node_keys(&self) -> Vec<String> {
        self.lb
            .get_instances()
            .iter()
            .map(|i| i.endpoint().to_string())
            .collect()
    }

    /// Snapshot of active-health state and recent probe stats for one node.
    pub fn health_report(&self, node_key: &str) -> NodeHealthReport {
        let (total, successful, failed, timeouts, uptime_pct, avg_ms, min_ms, max_ms) = self
            .with_health_history(node_key, |h| {
                (
                    h.total(),
                    h.successful(),
                    h.failed(),
                    h.timeouts(),
                    h.uptime_pct(),
                    h.avg_response_time_ms(),
                    h.min_response_time_ms(),
                    h.max_response_time_ms(),
                )
            })
            .unwrap_or((0, 0, 0, 0, None, None, None, None));

        NodeHealthReport {
            node: node_key.to_string(),
            status: self.node_health_status(node_key),
            rise_streak: self
                .active_rise_streak
                .get(node_key)
                .map(|v| v.load(Ordering::Relaxed))
                .unwrap_or(0),
            fall_streak: self
                .active_fall_streak
                .get(node_key)
                .map(|v| v.load(Ordering::Relaxed))
                .unwrap_or(0),
            total_checks: total,
            successful_checks: successful,
            failed_checks: failed,
            timeouts,
            uptime_pct,
            avg_response_time_ms: avg_ms,
            min_response_time_ms: min_ms,
            max_response_time_ms: max_ms,
        }
    }

    pub fn health_reports(&self) -> Vec<NodeHealthReport> {
        self.node_keys()
            .iter()
            .map(|k| self.health_report(k))
            .collect()
    }

    // ---- Circuit breaker ----

    pub fn circuit_breakers(&self) -> &CircuitBreakerRegistry {
        &self.circuit_breakers
    }

    /// Number of statically configured nodes in this cluster.
    pub fn node_count(&self) -> usize {
        self.config.nodes.len()
    }

    // ---- Stale node cleanup ----

    /// Remove health status, counters, and circuit breaker entries for nodes
    /// that are no longer in the configured node set. This prevents unbounded
    /// growth of DashMaps across config reloads (`update_config`).
    pub fn purge_stale_nodes(&self) {
        let active_keys: HashSet<String> = self
            .config
            .nodes
            .iter()
            .map(|n| format!("{}:{}", n.host, n.port))
            .collect();

        self.active_status.retain(|k, _| active_keys.contains(k));
        self.active_rise_streak
            .retain(|k, _| active_keys.contains(k));
        self.active_fall_streak
            .retain(|k, _| active_keys.contains(k));
        self.health_history.retain(|k, _| active_keys.contains(k));
        self.consecutive_failures
            .retain(|k, _| active_keys.contains(k));
        self.last_failure_time
            .retain(|k, _| active_keys.contains(k));
        self.circuit_breakers.retain_nodes(&active_keys);

        if let Some(table) = &self.session {
            table.sweep_idle();
        }
    }

    // ---- Config update ----

    /// Update the cluster's config. Preserves runtime state (LB counters,
    /// circuit breaker state, health state). Only updates the config snapshot
    /// and refreshes static nodes in the LB if they changed.
    pub fn update_config(&self, new_config: ClusterConfig) -> Self {
        if let Some(table) = &self.session {
            let new_keys: HashSet<String> = new_config
                .nodes
                .iter()
                .map(|n| format!("{}:{}", n.host, n.port))
                .collect();
            for old_node in &self.config.nodes {
                let key = format!("{}:{}", old_node.host, old_node.port);
                if !new_keys.contains(&key) {
                    table.remove_endpoint(&key);
                }
            }
        }

        let new_lb = if new_config.lb_type != self.config.lb_type {
            // LB type changed — must create a new balancer.
            let lb = LoadBalancer::new(&new_config.lb_type);
            if !new_config.nodes.is_empty() {
                lb.update_instances(&new_config.nodes);
            }
            lb
        } else {
            // Same LB type — reuse existing (preserves counters).
            if !new_config.nodes.is_empty() {
                self.lb.update_instances(&new_config.nodes);
            }
            self.lb.clone()
        };

        // Rebuild HTTP client if pool config, TLS, or connect timeout changed.
        let new_client = if new_config.keepalive_pool != self.config.keepalive_pool
            || new_config.tls_verify != self.config.tls_verify
            || new_config.timeout.connect != self.config.timeout.connect
        {
            build_cluster_http_client(
                &new_config.keepalive_pool,
                new_config.tls_verify,
                new_config.timeout.connect,
            )
        } else {
            self.http_client.clone()
        };

        let scheme: Arc<str> = Arc::from(new_config.scheme.as_str());
        let pass_host: Arc<str> = Arc::from(new_config.pass_host.as_str());
        let upstream_host: Option<Arc<str>> = new_config.upstream_host.as_deref().map(Arc::from);

        // Session table is rebuilt only if persistence config actually changed
        // (e.g. idle_timeout_secs); otherwise the live table (with its current
        // bindings) is kept.
        let (session, session_id_header) = match (&self.session, &new_config.session_persistence) {
            (Some(existing), Some(sp)) => (
                Some(existing.clone()),
                sp.session_id_header.as_deref().map(Arc::from),
            ),
            _ => build_session_table(&new_config),
        };

        Self {
            config: Arc::new(new_config),
            scheme,
            pass_host,
            upstream_host,
            http_client: new_client,
            lb: new_lb,
            circuit_breakers: self.circuit_breakers.clone(),
            active_status: self.active_status.clone(),
            active_rise_streak: self.active_rise_streak.clone(),
            active_fall_streak: self.active_fall_streak.clone(),
            health_history: self.health_history.clone(),
            consecutive_failures: self.consecutive_failures.clone(),
            last_failure_time: self.last_failure_time.clone(),
            session,
            session_id_header,
        }
    }
}

/// Build a fresh sticky-session table from config, if session persistence is
/// enabled for this cluster.
fn build_session_table(config: &ClusterConfig) -> (Option<Arc<SessionTable>>, Option<Arc<str>>) {
    match &config.session_persistence {
        Some(sp) => (
            Some(Arc::new(SessionTable::new(sp.idle_timeout_secs))),
            sp.session_id_header.as_deref().map(Arc::from),
        ),
        None => (None, None),
    }
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Central registry of all live clusters. Thread-safe, cheaply cloneable.
#[derive(Clone)]
pub struct ClusterStore {
    clusters: Arc<DashMap<String, Cluster>>,
}

impl Default for ClusterStore {
    fn default() -> Self {
        Self {
            clusters: Arc::new(DashMap::new()),
        }
    }
}

impl ClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cluster by name.
    pub fn get(&self, name: &str) -> Option<Cluster> {
        self.clusters.get(name).map(|entry| entry.value().clone())
    }

    /// Upsert a cluster from config. If the cluster already exists, update its
    /// config while preserving runtime state. If new, create fresh.
    /// Purges stale node entries when nodes change.
    pub fn upsert(&self, config: ClusterConfig) {
        let name = config.name.clone();
        if let Some(existing) = self.clusters.get(&name) {
            let updated = existing.value().update_config(config);
            drop(existing);
            updated.purge_stale_nodes();
            self.clusters.insert(name, updated);
        } else {
            self.clusters.insert(name, Cluster::new(config));
        }
    }

    /// Remove a cluster.
    pub fn remove(&self, name: &str) -> bool {
        self.clusters.remove(name).is_some()
    }

    /// Iterate over all clusters. The callback receives (name, cluster).
    pub fn for_each(&self, mut f: impl FnMut(&str, &Cluster)) {
        for entry in self.clusters.iter() {
            f(entry.key(), entry.value());
        }
    }

    /// Find the first cluster for which `pred` returns true, returning its
    /// name alongside a clone of the cluster handle.
    pub fn for_each_find(&self, mut pred: impl FnMut(&str, &Cluster) -> bool) -> Option<(String, Cluster)> {
        for entry in self.clusters.iter() {
            if pred(entry.key(), entry.value()) {
                return Some((entry.key().clone(), entry.value().clone()));
            }
        }
        None
    }

    /// Initialize from a list of cluster configs.
    pub fn init_from_configs(&self, clusters: &[ClusterConfig]) {
        for config in clusters {
            self.upsert(config.clone());
        }
    }
}

/// Build a hyper `Client` that supports both HTTP and HTTPS upstreams.
///
/// - Plain `http://` connections go through the inner `HttpConnector` directly.
/// - `https://` connections are terminated with rustls (ring backend).
/// - HTTP/2 is negotiated automatically via ALPN for TLS connections;
///   plain HTTP connections stay on HTTP/1.1.
/// - When `tls_verify` is `false` (the default), certificate validation is
///   skipped — suitable for internal / mesh traffic with self-signed certs.
fn build_cluster_http_client(
    pool_cfg: &KeepalivePoolConfig,
    tls_verify: bool,
    connect_timeout_secs: f64,
) -> Client<HttpsConnector<HttpConnector>, BoxBody> {
    let mut http = HttpConnector::new();
    http.set_nodelay(true);
    http.set_keepalive(Some(Duration::from_secs(pool_cfg.idle_timeout)));
    http.set_connect_timeout(Some(Duration::from_secs_f64(connect_timeout_secs)));
    http.enforce_http(false);

    let https = if tls_verify {
        hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http)
    } else {
        let tls_config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth();

        hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http)
    };

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(pool_cfg.idle_timeout))
        .pool_max_idle_per_host(pool_cfg.size)
        .build(https)
}
