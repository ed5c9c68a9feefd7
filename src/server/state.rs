use crate::bandwidth::BandwidthRules;
use crate::cache::ResponseCache;
use crate::config::{GatewayConfig, ServerBlock};
use crate::metrics::Metrics;
use crate::push::PushHub;
use crate::routing::RouteTable;
use crate::upstream::ClusterStore;
use anyhow::Result;
use arc_swap::ArcSwap;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Sub-states — each represents a cohesive domain boundary.
// Consumers should depend on the narrowest sub-state they need.
// ---------------------------------------------------------------------------

/// Routing domain: route table and instance count for distributed rate limiting.
#[derive(Clone)]
pub struct RoutingState {
    pub route_table: Arc<ArcSwap<RouteTable>>,
    instance_count: Option<Arc<AtomicU32>>,
    /// Snapshot of server blocks currently loaded from the static config file.
    domains: Arc<ArcSwap<Vec<ServerBlock>>>,
}

impl RoutingState {
    pub fn domain_count(&self) -> usize {
        self.domains.load().len()
    }

    pub fn route_count(&self) -> usize {
        self.domains.load().iter().map(|d| d.routes.len()).sum()
    }

    pub fn domains(&self) -> arc_swap::Guard<Arc<Vec<ServerBlock>>> {
        self.domains.load()
    }
}

// ---------------------------------------------------------------------------
// GatewayState — root aggregate composed of sub-states.
// ---------------------------------------------------------------------------

/// Shared gateway state, cheaply cloneable.
///
/// Composed of domain-specific sub-states. Pass the narrowest sub-state
/// to each subsystem to avoid leaking unrelated dependencies.
///
/// Configuration is loaded once at startup from a static file — there is no
/// watch loop and no incremental upsert/delete path. A changed config file
/// takes effect only after restart.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<ArcSwap<GatewayConfig>>,
    pub metrics: Metrics,
    pub routing: RoutingState,
    pub upstream: ClusterStore,
    /// Shared client for on-demand health probes triggered from the admin API.
    pub health_client: reqwest::Client,
    pub cache: Arc<ResponseCache>,
    pub bandwidth_rules: Arc<BandwidthRules>,
    pub push: Arc<PushHub>,
}

impl GatewayState {
    pub async fn new(config: GatewayConfig) -> Result<Self> {
        let instance_count: Option<Arc<AtomicU32>> = None;

        let cluster_store = ClusterStore::new();
        cluster_store.init_from_configs(&config.http.upstream_groups);

        let route_table = RouteTable::new(&config.http.server_blocks, instance_count.clone());
        let metrics = Metrics::install();
        metrics::gauge!("gateway_config_routes_total")
            .set(config.total_route_count() as f64);

        let domains = config.http.server_blocks.clone();
        let cache = Arc::new(ResponseCache::new(config.http.cache.clone()));
        let bandwidth_rules = Arc::new(BandwidthRules::compile(&config.http.bandwidth_rules)?);
        let push = Arc::new(PushHub::new(config.push.clone()));

        Ok(Self {
            config: Arc::new(ArcSwap::new(Arc::new(config))),
            metrics,
            routing: RoutingState {
                route_table: Arc::new(ArcSwap::new(Arc::new(route_table))),
                instance_count,
                domains: Arc::new(ArcSwap::new(Arc::new(domains))),
            },
            upstream: cluster_store,
            health_client: crate::upstream::build_health_check_client(),
            cache,
            bandwidth_rules,
            push,
        })
    }
}
