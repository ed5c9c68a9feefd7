use super::types::*;
use super::GatewayConfig;
use std::path::Path;

fn route(uri: &str, cluster: &str) -> LocationBlock {
    LocationBlock {
        id: String::new(),
        name: String::new(),
        uri: uri.to_string(),
        methods: vec![],
        headers: vec![],
        priority: 0,
        clusters: vec![WeightedCluster {
            name: cluster.to_string(),
            weight: 100,
        }],
        rate_limit: None,
        cluster_override_header: None,
        request_header_transforms: vec![],
        response_header_transforms: vec![],
        max_body_bytes: None,
        enable_compression: false,
        root: None,
        index: None,
        cache_enabled: None,
        status: 1,
        plugins: None,
    }
}

fn server(name: &str, hosts: Vec<&str>, routes: Vec<LocationBlock>) -> ServerBlock {
    ServerBlock {
        name: name.to_string(),
        hosts: hosts.into_iter().map(|h| h.to_string()).collect(),
        listen: vec![],
        root: None,
        index: vec![],
        gzip: None,
        cache_enabled: None,
        routes,
    }
}

fn cluster(name: &str) -> ClusterConfig {
    ClusterConfig {
        name: name.to_string(),
        nodes: vec![UpstreamServer {
            host: "127.0.0.1".to_string(),
            port: 8080,
            weight: 100,
            metadata: Default::default(),
            max_fails: 1,
            fail_timeout: 10,
            max_conns: 0,
        }],
        ..ClusterConfig::default()
    }
}

#[test]
fn test_load_json_config() {
    let json = r#"{
        "http": {
            "server_blocks": [{
                "name": "test",
                "hosts": ["api.example.com"],
                "routes": [{
                    "name": "catch-all",
                    "uri": "/*",
                    "clusters": [{"name": "backend", "weight": 100}]
                }]
            }],
            "upstream_groups": [{
                "name": "backend",
                "type": "roundrobin",
                "nodes": [{"host": "127.0.0.1", "port": 8081, "weight": 100}]
            }]
        }
    }"#;
    let tmp = std::env::temp_dir().join("janus_test_config.json");
    std::fs::write(&tmp, json).unwrap();
    let cfg = GatewayConfig::load(&tmp).unwrap();
    assert_eq!(cfg.http.server_blocks.len(), 1);
    assert_eq!(cfg.http.upstream_groups.len(), 1);
    assert_eq!(cfg.http.server_blocks[0].name, "test");
    std::fs::remove_file(&tmp).ok();
}

#[test]
fn test_validate_empty_hosts_fails() {
    let mut cfg = GatewayConfig::default();
    cfg.http.server_blocks = vec![server("bad", vec![], vec![])];
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_empty_host_entry_fails() {
    let mut cfg = GatewayConfig::default();
    cfg.http.server_blocks = vec![server("bad", vec![""], vec![])];
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_empty_uri_fails() {
    let mut cfg = GatewayConfig::default();
    cfg.http.upstream_groups = vec![cluster("c1")];
    cfg.http.server_blocks = vec![server("test", vec!["example.com"], vec![route("", "c1")])];
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_unknown_cluster_reference_fails() {
    let mut cfg = GatewayConfig::default();
    cfg.http.server_blocks = vec![server(
        "test",
        vec!["example.com"],
        vec![route("/*", "does-not-exist")],
    )];
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_zero_weight_node_fails() {
    let mut cfg = GatewayConfig::default();
    let mut c = cluster("c1");
    c.nodes[0].weight = 0;
    cfg.http.upstream_groups = vec![c];
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_unknown_lb_type_fails() {
    let mut cfg = GatewayConfig::default();
    let mut c = cluster("c1");
    c.lb_type = "magic".to_string();
    cfg.http.upstream_groups = vec![c];
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_valid_config() {
    let mut cfg = GatewayConfig::default();
    cfg.http.upstream_groups = vec![cluster("c1")];
    cfg.http.server_blocks = vec![server("test", vec!["example.com"], vec![route("/*", "c1")])];
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_total_route_count() {
    let mut cfg = GatewayConfig::default();
    cfg.http.upstream_groups = vec![cluster("c")];
    cfg.http.server_blocks = vec![
        server(
            "d1",
            vec!["a.com"],
            vec![route("/a", "c"), route("/b", "c")],
        ),
        server("d2", vec!["b.com"], vec![route("/c", "c")]),
    ];
    assert_eq!(cfg.total_route_count(), 3);
}

#[test]
fn test_total_route_count_excludes_disabled() {
    let mut cfg = GatewayConfig::default();
    cfg.http.upstream_groups = vec![cluster("c")];
    let mut disabled = route("/a", "c");
    disabled.status = 0;
    cfg.http.server_blocks = vec![server(
        "d1",
        vec!["a.com"],
        vec![disabled, route("/b", "c")],
    )];
    assert_eq!(cfg.total_route_count(), 1);
}

#[test]
fn test_deserialize_defaults() {
    let toml_str = r#"
[http]
server_header = "custom-gateway"
"#;
    let cfg: GatewayConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(cfg.http.server_header, "custom-gateway");
    assert!(cfg.http.server_blocks.is_empty());
    assert!(!cfg.http.cache.enabled);
    assert_eq!(cfg.admin.listen, "0.0.0.0:9090");
}

#[test]
fn test_cluster_config_serde() {
    let json = r#"{
        "name": "backend",
        "type": "least_request",
        "timeout": {"connect": 3.0, "send": 5.0, "read": 10.0},
        "scheme": "https",
        "pass_host": "rewrite",
        "upstream_host": "api.internal",
        "nodes": [
            {"host": "10.0.0.1", "port": 8080, "weight": 100},
            {"host": "10.0.0.2", "port": 8080, "weight": 50}
        ],
        "keepalive_pool": {"idle_timeout": 30, "requests": 500, "size": 64},
        "retry": {"count": 3, "retry_on_statuses": [502, 503]},
        "circuit_breaker": {"failure_threshold": 10, "success_threshold": 3, "open_duration_secs": 60}
    }"#;
    let cluster: ClusterConfig = serde_json::from_str(json).unwrap();
    assert_eq!(cluster.name, "backend");
    assert_eq!(cluster.lb_type, "least_request");
    assert_eq!(cluster.scheme, "https");
    assert_eq!(cluster.pass_host, "rewrite");
    assert_eq!(cluster.upstream_host, Some("api.internal".to_string()));
    assert_eq!(cluster.nodes.len(), 2);
    assert_eq!(cluster.timeout.connect, 3.0);
    assert_eq!(cluster.timeout.read, 10.0);
    assert_eq!(cluster.keepalive_pool.size, 64);
    assert_eq!(cluster.retry.as_ref().unwrap().count, 3);
    assert_eq!(
        cluster.circuit_breaker.as_ref().unwrap().failure_threshold,
        10
    );
}

#[test]
fn test_rate_limit_config_serde() {
    let json =
        r#"{"mode": "count", "count": 1000, "time_window": 60, "key": "route", "rejected_code": 503}"#;
    let rl: RateLimitConfig = serde_json::from_str(json).unwrap();
    assert_eq!(rl.mode, "count");
    assert_eq!(rl.count, Some(1000));
    assert_eq!(rl.time_window, Some(60));
    assert_eq!(rl.key, "route");
    assert_eq!(rl.rejected_code, 503);
}

#[test]
fn test_header_matcher_defaults() {
    let json = r#"{"name": "X-Canary", "value": "true"}"#;
    let hm: HeaderMatcher = serde_json::from_str(json).unwrap();
    assert_eq!(hm.match_type, "exact");
    assert!(!hm.invert);
}

#[test]
fn test_unsupported_format() {
    let tmp = std::env::temp_dir().join("janus_test.yml");
    std::fs::write(&tmp, "key: value").unwrap();
    assert!(GatewayConfig::load(&tmp).is_err());
    std::fs::remove_file(&tmp).ok();
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let cfg = GatewayConfig::load(Path::new("/nonexistent/janus-config.toml")).unwrap();
    assert!(cfg.http.server_blocks.is_empty());
}
