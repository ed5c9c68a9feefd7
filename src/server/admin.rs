use super::GatewayState;
use crate::upstream::NodeHealthReport;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

fn json_response(status: u16, body: impl Into<Bytes>) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(full_body(body))
        .unwrap()
}

fn not_found() -> Response<BoxBody> {
    json_response(404, r#"{"error":"not found"}"#)
}

fn wants_text(req: &Request<Incoming>) -> bool {
    req.uri()
        .query()
        .map(|q| q.split('&').any(|kv| kv == "format=text"))
        .unwrap_or(false)
}

fn report_to_json(r: &NodeHealthReport) -> serde_json::Value {
    serde_json::json!({
        "node": r.node,
        "status": r.status.to_string(),
        "rise_streak": r.rise_streak,
        "fall_streak": r.fall_streak,
        "total_checks": r.total_checks,
        "successful_checks": r.successful_checks,
        "failed_checks": r.failed_checks,
        "timeouts": r.timeouts,
        "uptime_pct": r.uptime_pct,
        "avg_response_time_ms": r.avg_response_time_ms,
        "min_response_time_ms": r.min_response_time_ms,
        "max_response_time_ms": r.max_response_time_ms,
    })
}

fn report_to_text(cluster: &str, r: &NodeHealthReport) -> String {
    format!(
        "{} {} {} rise={} fall={} checks={} ok={} fail={} uptime={}\n",
        cluster,
        r.node,
        r.status,
        r.rise_streak,
        r.fall_streak,
        r.total_checks,
        r.successful_checks,
        r.failed_checks,
        r.uptime_pct
            .map(|p| format!("{:.1}%", p))
            .unwrap_or_else(|| "n/a".to_string()),
    )
}

pub async fn handle_admin(
    req: Request<Incoming>,
    state: GatewayState,
) -> Result<Response<BoxBody>, hyper::Error> {
    let path = req.uri().path().to_string();
    let text = wants_text(&req);

    if let Some(rest) = path.strip_prefix("/health/server/") {
        return Ok(handle_server_health(&req, &state, rest, text).await);
    }

    if let Some(name) = path.strip_prefix("/health/upstream/") {
        return Ok(handle_upstream_health(&state, name, text));
    }

    match path.as_str() {
        "/health" | "/healthz" => Ok(handle_overview_health(&state, text)),

        "/ready" | "/readyz" => {
            let cfg = state.config.load();
            let route_count = cfg.total_route_count();
            Ok(Response::builder()
                .status(200)
                .body(full_body(format!(
                    r#"{{"status":"ready","domains":{},"total_routes":{}}}"#,
                    cfg.http.server_blocks.len(),
                    route_count,
                )))
                .unwrap())
        }

        "/metrics" => {
            let body = state.metrics.render();
            Ok(Response::builder()
                .status(200)
                .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
                .body(full_body(body))
                .unwrap())
        }

        "/domains" => {
            let cfg = state.config.load();
            let domains: Vec<serde_json::Value> = cfg
                .http
                .server_blocks
                .iter()
                .map(|d| {
                    serde_json::json!({
                        "name": d.name,
                        "hosts": d.hosts,
                        "routes": d.routes.iter().map(|r| {
                            serde_json::json!({
                                "name": r.name,
                                "uri": r.uri,
                                "methods": r.methods,
                                "headers": r.headers.iter().map(|h| {
                                    serde_json::json!({
                                        "name": h.name,
                                        "value": h.value,
                                        "match_type": h.match_type,
                                        "invert": h.invert,
                                    })
                                }).collect::<Vec<_>>(),
                                "priority": r.priority,
                                "clusters": r.clusters.iter().map(|c| {
                                    serde_json::json!({"name": c.name, "weight": c.weight})
                                }).collect::<Vec<_>>(),
                            })
                        }).collect::<Vec<_>>(),
                    })
                })
                .collect();

            let body = serde_json::to_string_pretty(&domains).unwrap_or_default();
            Ok(Response::builder()
                .status(200)
                .header("content-type", "application/json")
                .body(full_body(body))
                .unwrap())
        }

        "/routes" => {
            let table = state.routing.route_table.load();
            let routes: Vec<serde_json::Value> = table
                .all_routes()
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "name": r.name,
                        "uri": r.uri,
                        "priority": r.priority,
                        "clusters": r.cluster_selector.clusters().iter().map(|c| {
                            serde_json::json!({"name": c.name, "weight": c.weight})
                        }).collect::<Vec<_>>(),
                    })
                })
                .collect();

            let body = serde_json::to_string_pretty(&routes).unwrap_or_default();
            Ok(Response::builder()
                .status(200)
                .header("content-type", "application/json")
                .body(full_body(body))
                .unwrap())
        }

        _ => Ok(not_found()),
    }
}

/// `GET /health` — liveness plus an aggregate view of every cluster's nodes.
fn handle_overview_health(state: &GatewayState, text: bool) -> Response<BoxBody> {
    let mut clusters: Vec<(String, Vec<NodeHealthReport>)> = Vec::new();
    state.upstream.for_each(|name, cluster| {
        clusters.push((name.to_string(), cluster.health_reports()));
    });

    if text {
        let mut body = String::from("status: ok\n");
        for (name, reports) in &clusters {
            for r in reports {
                body.push_str(&report_to_text(name, r));
            }
        }
        return Response::builder()
            .status(200)
            .header("content-type", "text/plain")
            .body(full_body(body))
            .unwrap();
    }

    let upstreams: Vec<serde_json::Value> = clusters
        .iter()
        .map(|(name, reports)| {
            serde_json::json!({
                "cluster": name,
                "nodes": reports.iter().map(report_to_json).collect::<Vec<_>>(),
            })
        })
        .collect();

    json_response(
        200,
        serde_json::json!({"status": "ok", "upstreams": upstreams}).to_string(),
    )
}

/// `GET /health/upstream/<name>` — per-cluster node health.
fn handle_upstream_health(state: &GatewayState, name: &str, text: bool) -> Response<BoxBody> {
    let cluster = match state.upstream.get(name) {
        Some(c) => c,
        None => return not_found(),
    };
    let reports = cluster.health_reports();

    if text {
        let mut body = String::new();
        for r in &reports {
            body.push_str(&report_to_text(name, r));
        }
        return Response::builder()
            .status(200)
            .header("content-type", "text/plain")
            .body(full_body(body))
            .unwrap();
    }

    json_response(
        200,
        serde_json::json!({
            "cluster": name,
            "nodes": reports.iter().map(report_to_json).collect::<Vec<_>>(),
        })
        .to_string(),
    )
}

/// `GET|POST /health/server/<host>:<port>[/check|/enable|/disable]` — find the
/// node across every cluster (a "host:port" key is unique within a cluster,
/// not necessarily across the whole gateway, so the first cluster containing
/// it wins).
async fn handle_server_health(
    req: &Request<Incoming>,
    state: &GatewayState,
    rest: &str,
    text: bool,
) -> Response<BoxBody> {
    let (node_key, action) = match rest.rsplit_once('/') {
        Some((key, action)) if matches!(action, "check" | "enable" | "disable") => {
            (key.to_string(), Some(action))
        }
        _ => (rest.to_string(), None),
    };

    let cluster = state
        .upstream
        .for_each_find(|_name, cluster| cluster.node_keys().iter().any(|k| k == &node_key));
    let (cluster_name, cluster) = match cluster {
        Some(v) => v,
        None => return not_found(),
    };

    match (req.method(), action) {
        (&Method::POST, Some("enable")) => {
            cluster.force_node_up(&node_key);
            json_response(200, r#"{"status":"ok"}"#)
        }
        (&Method::POST, Some("disable")) => {
            cluster.force_node_down(&node_key);
            json_response(200, r#"{"status":"ok"}"#)
        }
        (&Method::POST, Some("check")) => {
            let result =
                crate::upstream::check_node_now(&state.upstream, &state.health_client, &cluster_name, &node_key)
                    .await;
            match result {
                Some(r) => json_response(
                    200,
                    serde_json::json!({
                        "node": node_key,
                        "success": r.success,
                        "status_code": r.status_code,
                        "response_time_ms": r.response_time_ms,
                        "error": r.error,
                    })
                    .to_string(),
                ),
                None => json_response(503, r#"{"error":"no active health check configured"}"#),
            }
        }
        (&Method::GET, None) => {
            let report = cluster.health_report(&node_key);
            if text {
                Response::builder()
                    .status(200)
                    .header("content-type", "text/plain")
                    .body(full_body(report_to_text(&cluster_name, &report)))
                    .unwrap()
            } else {
                json_response(200, report_to_json(&report).to_string())
            }
        }
        _ => not_found(),
    }
}
