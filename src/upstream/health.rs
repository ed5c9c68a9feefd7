use crate::config::ActiveHealthCheck;
use crate::upstream::cluster::{Cluster, ClusterStore};
use futures_util::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Active-health status of one upstream node. `Unknown` is the state before
/// the first probe completes; nodes in this state are treated as selectable
/// (optimistic default), same as the rest of the proxy's availability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Unknown,
    Checking,
    Up,
    Down,
}

impl HealthStatus {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Checking => 1,
            Self::Up => 2,
            Self::Down => 3,
        }
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Checking,
            2 => Self::Up,
            3 => Self::Down,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Checking => "checking",
            Self::Up => "up",
            Self::Down => "down",
        };
        f.write_str(s)
    }
}

/// Outcome of a single probe attempt, kept in each node's ring buffer.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub success: bool,
    pub status_code: Option<u16>,
    pub response_time_ms: u64,
    pub error: Option<String>,
    pub timestamp: u64,
    pub timed_out: bool,
    pub response_size: Option<u64>,
}

/// Fixed-capacity ring buffer of recent probe results for one node.
#[derive(Debug)]
pub struct HealthCheckHistory {
    results: VecDeque<HealthCheckResult>,
    capacity: usize,
}

impl HealthCheckHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            results: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, result: HealthCheckResult) {
        if self.results.len() >= self.capacity {
            self.results.pop_front();
        }
        self.results.push_back(result);
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn successful(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }

    pub fn timeouts(&self) -> usize {
        self.results.iter().filter(|r| r.timed_out).count()
    }

    pub fn min_response_time_ms(&self) -> Option<u64> {
        self.results.iter().map(|r| r.response_time_ms).min()
    }

    pub fn max_response_time_ms(&self) -> Option<u64> {
        self.results.iter().map(|r| r.response_time_ms).max()
    }

    pub fn avg_response_time_ms(&self) -> Option<f64> {
        if self.results.is_empty() {
            return None;
        }
        let sum: u64 = self.results.iter().map(|r| r.response_time_ms).sum();
        Some(sum as f64 / self.results.len() as f64)
    }

    pub fn uptime_pct(&self) -> Option<f64> {
        if self.results.is_empty() {
            return None;
        }
        Some(self.successful() as f64 / self.results.len() as f64 * 100.0)
    }

    pub fn recent(&self) -> impl Iterator<Item = &HealthCheckResult> {
        self.results.iter()
    }
}

/// Run a single round of active health checks across all clusters.
///
/// The caller is responsible for looping / scheduling.
pub async fn run_health_checks(cluster_store: &ClusterStore, client: &reqwest::Client) {
    let mut tasks: Vec<(
        Cluster,
        Arc<ActiveHealthCheck>,
        Vec<crate::config::UpstreamServer>,
    )> = Vec::new();

    cluster_store.for_each(|_name, cluster| {
        let cfg = cluster.config();
        let hc = match &cfg.health_check {
            Some(hc) => hc,
            None => return,
        };

        let active = match &hc.active {
            Some(a) => a,
            None => return,
        };

        if cfg.nodes.is_empty() {
            return;
        }

        tasks.push((cluster.clone(), Arc::new(active.clone()), cfg.nodes.clone()));
    });

    for (cluster, active, nodes) in tasks {
        let concurrency = active.concurrency;

        stream::iter(nodes)
            .map(|node| {
                let client = client.clone();
                let cluster = cluster.clone();
                let active = active.clone();
                async move {
                    check_one_node(&client, &cluster, &active, &node).await;
                }
            })
            .buffer_unordered(concurrency)
            .collect::<()>()
            .await;
    }
}

/// Build a shared HTTP client for health checks.
pub fn build_health_check_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .no_proxy()
        .build()
        .expect("failed to build health check client")
}

/// Run a single probe against one node immediately, outside the regular
/// interval loop. Used by the admin API's on-demand check endpoint.
pub async fn check_node_now(
    cluster_store: &ClusterStore,
    client: &reqwest::Client,
    cluster_name: &str,
    node_key: &str,
) -> Option<HealthCheckResult> {
    let cluster = cluster_store.get(cluster_name)?;
    let active = cluster.config().health_check.as_ref()?.active.as_ref()?.clone();
    let node = cluster
        .config()
        .nodes
        .iter()
        .find(|n| format!("{}:{}", n.host, n.port) == node_key)?
        .clone();

    check_one_node(client, &cluster, &active, &node).await;
    cluster.with_health_history(node_key, |h| h.recent().last().cloned())?
}

async fn check_one_node(
    client: &reqwest::Client,
    cluster: &Cluster,
    active: &ActiveHealthCheck,
    node: &crate::config::UpstreamServer,
) {
    let node_key = format!("{}:{}", node.host, node.port);
    let cluster_name = cluster.name();
    let timeout = Duration::from_secs(active.timeout);

    let result = match active.check_type.as_str() {
        "tcp" | "ping" => probe_tcp(node, active, timeout).await,
        "https" => probe_http(client, node, active, "https", timeout).await,
        _ => probe_http(client, node, active, "http", timeout).await,
    };

    cluster.record_probe_result(&node_key, active.history_size, result.clone());

    if result.success {
        metrics::counter!(
            "gateway_health_check_total",
            "cluster" => cluster_name.to_owned(),
            "upstream" => node_key.clone(),
            "result" => "success",
        )
        .increment(1);
        debug!(
            "health: active: check passed, cluster={}, node={}, rtt_ms={}",
            cluster_name, node_key, result.response_time_ms
        );
    } else {
        metrics::counter!(
            "gateway_health_check_total",
            "cluster" => cluster_name.to_owned(),
            "upstream" => node_key.clone(),
            "result" => "failure",
        )
        .increment(1);
        debug!(
            "health: active: check failed, cluster={}, node={}, error={:?}",
            cluster_name, node_key, result.error
        );
    }

    if let Some(new_status) = cluster.apply_health_transition(&node_key, result.success, active.rise, active.fall) {
        metrics::gauge!(
            "gateway_upstream_health_status",
            "cluster" => cluster_name.to_owned(),
            "upstream" => node_key.clone(),
        )
        .set(if new_status == HealthStatus::Up { 1.0 } else { 0.0 });

        match new_status {
            HealthStatus::Up => {
                metrics::counter!(
                    "gateway_health_check_rise_total",
                    "cluster" => cluster_name.to_owned(),
                    "upstream" => node_key.clone(),
                )
                .increment(1);
                debug!(
                    "health: active: node transitioned to up, cluster={}, node={}",
                    cluster_name, node_key
                );
            }
            HealthStatus::Down => {
                metrics::counter!(
                    "gateway_health_check_fall_total",
                    "cluster" => cluster_name.to_owned(),
                    "upstream" => node_key.clone(),
                )
                .increment(1);
                warn!(
                    "health: active: node transitioned to down, cluster={}, node={}",
                    cluster_name, node_key
                );
            }
            _ => {}
        }
    }
}

async fn probe_http(
    client: &reqwest::Client,
    node: &crate::config::UpstreamServer,
    active: &ActiveHealthCheck,
    scheme: &str,
    timeout: Duration,
) -> HealthCheckResult {
    let probe_port = active.port.unwrap_or(node.port);
    let url = format!("{}://{}:{}{}", scheme, node.host, probe_port, active.path);
    let started = Instant::now();

    let req = match active.method.as_str() {
        "HEAD" => client.head(&url),
        "POST" => client.post(&url),
        _ => client.get(&url),
    };

    match req.timeout(timeout).send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            let elapsed = started.elapsed();
            let mut success = active.healthy_statuses.contains(&status);
            let mut response_size = None;
            let mut error = None;

            if success {
                match resp.text().await {
                    Ok(body) => {
                        response_size = Some(body.len() as u64);
                        if let Some(expect) = &active.expect_body {
                            if !body.contains(expect.as_str()) {
                                success = false;
                                error = Some("body did not contain expected substring".to_string());
                            }
                        }
                    }
                    Err(e) => {
                        success = false;
                        error = Some(e.to_string());
                    }
                }
            }

            HealthCheckResult {
                success,
                status_code: Some(status),
                response_time_ms: elapsed.as_millis() as u64,
                error,
                timestamp: now_unix_secs(),
                timed_out: false,
                response_size,
            }
        }
        Err(e) => HealthCheckResult {
            success: false,
            status_code: None,
            response_time_ms: started.elapsed().as_millis() as u64,
            error: Some(e.to_string()),
            timestamp: now_unix_secs(),
            timed_out: e.is_timeout(),
            response_size: None,
        },
    }
}

/// TCP connect / ping probe. `ping` degrades to a bare TCP connect since a
/// userspace ICMP echo would need raw sockets and elevated privileges.
async fn probe_tcp(
    node: &crate::config::UpstreamServer,
    active: &ActiveHealthCheck,
    timeout: Duration,
) -> HealthCheckResult {
    let probe_port = active.port.unwrap_or(node.port);
    let addr = format!("{}:{}", node.host, probe_port);
    let started = Instant::now();

    match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(_stream)) => HealthCheckResult {
            success: true,
            status_code: None,
            response_time_ms: started.elapsed().as_millis() as u64,
            error: None,
            timestamp: now_unix_secs(),
            timed_out: false,
            response_size: None,
        },
        Ok(Err(e)) => HealthCheckResult {
            success: false,
            status_code: None,
            response_time_ms: started.elapsed().as_millis() as u64,
            error: Some(e.to_string()),
            timestamp: now_unix_secs(),
            timed_out: false,
            response_size: None,
        },
        Err(_) => HealthCheckResult {
            success: false,
            status_code: None,
            response_time_ms: started.elapsed().as_millis() as u64,
            error: Some("connect timed out".to_string()),
            timestamp: now_unix_secs(),
            timed_out: true,
            response_size: None,
        },
    }
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
