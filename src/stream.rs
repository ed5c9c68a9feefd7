//! TCP/UDP L4 stream proxy.
//!
//! Grounded on `examples/original_source/src/stream/stream.c` for the
//! accept-then-splice shape and the UDP ephemeral session table, reusing
//! C6's `Cluster::select_upstream` for backend choice (same idiom as
//! `proxy/handler.rs`'s `select_healthy_node`) so stream listeners share
//! load-balancing and availability tracking with the HTTP path.

use crate::config::types::StreamListenerConfig;
use crate::upstream::ClusterStore;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

const UDP_BUFFER_BYTES: usize = 64 * 1024;
const UDP_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Spawn one acceptor/forwarder task per configured listener. Each listener
/// runs independently; a bind failure on one does not prevent the others
/// from starting.
pub fn spawn_listeners(
    listeners: &[StreamListenerConfig],
    clusters: ClusterStore,
    shutdown: Arc<Notify>,
) {
    for cfg in listeners {
        let cfg = cfg.clone();
        let clusters = clusters.clone();
        let shutdown = shutdown.clone();
        match cfg.protocol.as_str() {
            "udp" => {
                tokio::spawn(async move {
                    if let Err(e) = run_udp_listener(cfg, clusters, shutdown).await {
                        error!("stream: udp listener failed, error={}", e);
                    }
                });
            }
            _ => {
                tokio::spawn(async move {
                    if let Err(e) = run_tcp_listener(cfg, clusters, shutdown).await {
                        error!("stream: tcp listener failed, error={}", e);
                    }
                });
            }
        }
    }
}

fn pick_backend(
    clusters: &ClusterStore,
    upstream_name: &str,
) -> Option<(String, crate::upstream::RequestGuard)> {
    let cluster = clusters.get(upstream_name)?;
    let (target, guard) = cluster.select_upstream(None, None)?;
    Some((target.instance.endpoint().to_string(), guard))
}

async fn run_tcp_listener(
    cfg: StreamListenerConfig,
    clusters: ClusterStore,
    shutdown: Arc<Notify>,
) -> anyhow::Result<()> {
    let addr: SocketAddr = cfg.listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(
        "stream: tcp listening, addr={}, upstream={}",
        addr, cfg.upstream
    );

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.notified() => {
                info!("stream: tcp: stop accepting, addr={}", addr);
                return Ok(());
            }
        };

        let (client, peer) = match accepted {
            Ok(v) => v,
            Err(e) => {
                warn!("stream: tcp accept failed, addr={}, error={}", addr, e);
                continue;
            }
        };

        metrics::counter!("gateway_stream_connections_total", "protocol" => "tcp").increment(1);

        let cfg = cfg.clone();
        let clusters = clusters.clone();
        tokio::spawn(async move {
            if let Err(e) = forward_tcp(client, peer, &cfg, &clusters).await {
                debug!(
                    "stream: tcp session ended, peer={}, upstream={}, error={}",
                    peer, cfg.upstream, e
                );
            }
        });
    }
}

async fn forward_tcp(
    mut client: TcpStream,
    peer: SocketAddr,
    cfg: &StreamListenerConfig,
    clusters: &ClusterStore,
) -> anyhow::Result<()> {
    let (backend_addr, guard) = pick_backend(clusters, &cfg.upstream)
        .ok_or_else(|| anyhow::anyhow!("no backend available for upstream '{}'", cfg.upstream))?;

    let connect = tokio::time::timeout(
        Duration::from_millis(cfg.connect_timeout_ms),
        TcpStream::connect(&backend_addr),
    )
    .await;

    let mut backend = match connect {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            if let Some(cluster) = clusters.get(&cfg.upstream) {
                cluster.record_health_failure(&backend_addr);
                cluster.lb().record_failure(&backend_addr);
            }
            return Err(anyhow::anyhow!("connect to {} failed: {}", backend_addr, e));
        }
        Err(_) => {
            if let Some(cluster) = clusters.get(&cfg.upstream) {
                cluster.record_health_failure(&backend_addr);
                cluster.lb().record_failure(&backend_addr);
            }
            return Err(anyhow::anyhow!("connect to {} timed out", backend_addr));
        }
    };

    debug!(
        "stream: tcp session started, peer={}, backend={}",
        peer, backend_addr
    );

    let result = tokio::io::copy_bidirectional(&mut client, &mut backend).await;
    drop(guard);

    match result {
        Ok((from_client, from_backend)) => {
            if let Some(cluster) = clusters.get(&cfg.upstream) {
                cluster.lb().record_success(&backend_addr);
            }
            debug!(
                "stream: tcp session closed, peer={}, backend={}, client_to_backend={}B, backend_to_client={}B",
                peer, backend_addr, from_client, from_backend
            );
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

struct UdpSession {
    backend_addr: SocketAddr,
    last_seen: Instant,
}

/// Per-packet UDP forwarding. The listener socket receives from any client
/// and, per source address, keeps one ephemeral "connected" socket to the
/// chosen backend so backend replies can be routed back to the right
/// client. Idle sessions are evicted by a periodic sweep.
async fn run_udp_listener(
    cfg: StreamListenerConfig,
    clusters: ClusterStore,
    shutdown: Arc<Notify>,
) -> anyhow::Result<()> {
    let addr: SocketAddr = cfg.listen.parse()?;
    let socket = Arc::new(UdpSocket::bind(addr).await?);
    info!(
        "stream: udp listening, addr={}, upstream={}",
        addr, cfg.upstream
    );

    let sessions: Arc<DashMap<SocketAddr, UdpSession>> = Arc::new(DashMap::new());
    let idle_timeout = Duration::from_secs(cfg.udp_session_idle_secs.max(1));

    spawn_udp_sweeper(sessions.clone(), idle_timeout, shutdown.clone());

    let mut buf = vec![0u8; UDP_BUFFER_BYTES];
    loop {
        let received = tokio::select! {
            result = socket.recv_from(&mut buf) => result,
            _ = shutdown.notified() => {
                info!("stream: udp: stop receiving, addr={}", addr);
                return Ok(());
            }
        };

        let (len, client_addr) = match received {
            Ok(v) => v,
            Err(e) => {
                warn!("stream: udp recv failed, addr={}, error={}", addr, e);
                continue;
            }
        };

        let backend_addr = match resolve_udp_backend(&sessions, client_addr, &clusters, &cfg.upstream) {
            Some(addr) => addr,
            None => {
                warn!(
                    "stream: udp no backend available, upstream={}, client={}",
                    cfg.upstream, client_addr
                );
                continue;
            }
        };

        if let Err(e) = socket.send_to(&buf[..len], backend_addr).await {
            warn!(
                "stream: udp forward failed, backend={}, error={}",
                backend_addr, e
            );
        }
    }
}

fn resolve_udp_backend(
    sessions: &DashMap<SocketAddr, UdpSession>,
    client_addr: SocketAddr,
    clusters: &ClusterStore,
    upstream_name: &str,
) -> Option<SocketAddr> {
    if let Some(mut session) = sessions.get_mut(&client_addr) {
        session.last_seen = Instant::now();
        return Some(session.backend_addr);
    }

    let (endpoint, guard) = pick_backend(clusters, upstream_name)?;
    drop(guard);
    let backend_addr: SocketAddr = endpoint.parse().ok()?;
    sessions.insert(
        client_addr,
        UdpSession {
            backend_addr,
            last_seen: Instant::now(),
        },
    );
    metrics::counter!("gateway_stream_connections_total", "protocol" => "udp").increment(1);
    Some(backend_addr)
}

fn spawn_udp_sweeper(
    sessions: Arc<DashMap<SocketAddr, UdpSession>>,
    idle_timeout: Duration,
    shutdown: Arc<Notify>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(UDP_SWEEP_INTERVAL) => {}
                _ = shutdown.notified() => return,
            }
            let now = Instant::now();
            sessions.retain(|_, session| now.duration_since(session.last_seen) < idle_timeout);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_session_table_evicts_stale_entries() {
        let sessions: DashMap<SocketAddr, UdpSession> = DashMap::new();
        let addr: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        sessions.insert(
            addr,
            UdpSession {
                backend_addr: "127.0.0.1:9100".parse().unwrap(),
                last_seen: Instant::now() - Duration::from_secs(120),
            },
        );
        sessions.retain(|_, s| Instant::now().duration_since(s.last_seen) < Duration::from_secs(60));
        assert!(sessions.is_empty());
    }
}
