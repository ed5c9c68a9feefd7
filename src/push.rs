//! Server-Sent Events push server.
//!
//! Grounded on the teacher's `DashMap`-guarded shared-state idiom
//! (`upstream/cluster.rs`'s `ClusterStore`): a `PushHub` keyed by channel
//! name, each channel holding a `DashMap<ClientId, mpsc::Sender<PushEvent>>`.
//! Per-client delivery is a bounded queue with drop-oldest-on-overflow;
//! the response body streams frames off the receiver side using the same
//! `stream::unfold`-over-a-channel bridge used for compression bodies.

use crate::config::types::PushConfig;
use crate::proxy::context::{empty_body, BoxBody};
use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use http::{HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Frame, Incoming};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

const WELCOME_EVENT: &str = "welcome";
const HEARTBEAT_EVENT: &str = "heartbeat";

/// One SSE payload: `id`/`event`/`retry` are optional header lines, `data`
/// may be multi-line (each line gets its own `data: ` prefix per the wire
/// format).
#[derive(Debug, Clone)]
pub struct PushEvent {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
    pub retry_ms: Option<u32>,
}

impl PushEvent {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: None,
            event: Some(event.into()),
            data: data.into(),
            retry_ms: None,
        }
    }

    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.data.len() + 32);
        if let Some(id) = &self.id {
            buf.put_slice(b"id: ");
            buf.put_slice(id.as_bytes());
            buf.put_u8(b'\n');
        }
        if let Some(event) = &self.event {
            buf.put_slice(b"event: ");
            buf.put_slice(event.as_bytes());
            buf.put_u8(b'\n');
        }
        if let Some(retry) = self.retry_ms {
            buf.put_slice(b"retry: ");
            buf.put_slice(retry.to_string().as_bytes());
            buf.put_u8(b'\n');
        }
        for line in self.data.split('\n') {
            buf.put_slice(b"data: ");
            buf.put_slice(line.as_bytes());
            buf.put_u8(b'\n');
        }
        buf.put_u8(b'\n');
        buf.freeze()
    }
}

type ClientId = u64;

/// Registry of channels, each a set of subscribed clients' send queues.
pub struct PushHub {
    config: PushConfig,
    channels: DashMap<String, DashMap<ClientId, mpsc::Sender<PushEvent>>>,
    next_client_id: AtomicU64,
    total_subscribers: AtomicU64,
}

impl PushHub {
    pub fn new(config: PushConfig) -> Self {
        Self {
            config,
            channels: DashMap::new(),
            next_client_id: AtomicU64::new(1),
            total_subscribers: AtomicU64::new(0),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn path(&self) -> &str {
        &self.config.path
    }

    /// Register a new subscriber to `channel`, returning its id and the
    /// receiving half of its bounded queue. The queue depth comes from
    /// config; overflow is handled by the sender (drop-oldest, see
    /// `publish`).
    fn subscribe(&self, channel: &str) -> (ClientId, mpsc::Receiver<PushEvent>) {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.queue_depth.max(1));
        self.channels
            .entry(channel.to_string())
            .or_default()
            .insert(id, tx);
        self.total_subscribers.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!("gateway_push_clients_active").increment(1.0);
        (id, rx)
    }

    fn unsubscribe(&self, channel: &str, id: ClientId) {
        if let Some(subs) = self.channels.get(channel) {
            subs.remove(&id);
        }
        self.total_subscribers.fetch_sub(1, Ordering::Relaxed);
        metrics::gauge!("gateway_push_clients_active").decrement(1.0);
    }

    /// Broadcast `event` to every subscriber of `channel`. A full client
    /// queue drops the event for that client rather than blocking or
    /// evicting the subscription — a slow reader loses events, not its
    /// connection.
    pub fn publish(&self, channel: &str, event: PushEvent) -> usize {
        let Some(subs) = self.channels.get(channel) else {
            return 0;
        };
        let mut delivered = 0;
        for entry in subs.iter() {
            if entry.value().try_send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        if delivered > 0 {
            metrics::counter!("gateway_push_messages_total").increment(delivered as u64);
        }
        delivered
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn subscriber_count(&self) -> u64 {
        self.total_subscribers.load(Ordering::Relaxed)
    }
}

/// Route an incoming request to the push server if it targets the
/// configured SSE path; `None` means the caller should proceed with normal
/// proxy handling.
pub fn handle_push_request(
    hub: &Arc<PushHub>,
    req: &Request<Incoming>,
) -> Option<Response<BoxBody>> {
    if !hub.enabled() || req.uri().path() != hub.path() {
        return None;
    }
    if req.method() != Method::GET {
        return Some(
            Response::builder()
                .status(StatusCode::METHOD_NOT_ALLOWED)
                .body(empty_body())
                .unwrap(),
        );
    }

    let channel = req
        .uri()
        .query()
        .and_then(|q| {
            q.split('&')
                .find_map(|kv| kv.strip_prefix("channel="))
                .map(|v| v.to_string())
        })
        .unwrap_or_else(|| "default".to_string());

    Some(subscribe_response(hub.clone(), channel))
}

fn subscribe_response(hub: Arc<PushHub>, channel: String) -> Response<BoxBody> {
    let (client_id, rx) = hub.subscribe(&channel);
    let heartbeat = std::time::Duration::from_secs(hub.config.heartbeat_secs.max(1));

    let welcome = PushEvent {
        id: Some(client_id.to_string()),
        event: Some(WELCOME_EVENT.to_string()),
        data: format!(r#"{{"client_id":{client_id},"channel":"{channel}"}}"#),
        retry_ms: None,
    };

    let body = stream_client_body(hub, channel, client_id, welcome, rx, heartbeat);

    Response::builder()
        .status(StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "text/event-stream")
        .header(http::header::CACHE_CONTROL, "no-cache")
        .header(http::header::CONNECTION, "keep-alive")
        .header("access-control-allow-origin", HeaderValue::from_static("*"))
        .body(body)
        .unwrap()
}

/// Subscription guard: unregisters the client from its channel when the
/// response body future is dropped (client disconnect, server shutdown).
struct SubscriptionGuard {
    hub: Arc<PushHub>,
    channel: String,
    client_id: ClientId,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.channel, self.client_id);
    }
}

enum StreamState {
    Welcome(PushEvent),
    Live,
}

fn stream_client_body(
    hub: Arc<PushHub>,
    channel: String,
    client_id: ClientId,
    welcome: PushEvent,
    rx: mpsc::Receiver<PushEvent>,
    heartbeat: std::time::Duration,
) -> BoxBody {
    let guard = Arc::new(SubscriptionGuard {
        hub,
        channel,
        client_id,
    });
    let ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);

    let stream = futures_util::stream::unfold(
        (StreamState::Welcome(welcome), rx, ticker, guard),
        |(state, mut rx, mut ticker, guard)| async move {
            if let StreamState::Welcome(event) = state {
                let frame: Result<Frame<Bytes>, hyper::Error> = Ok(Frame::data(event.encode()));
                return Some((frame, (StreamState::Live, rx, ticker, guard)));
            }

            tokio::select! {
                biased;
                msg = rx.recv() => match msg {
                    Some(event) => {
                        let frame: Result<Frame<Bytes>, hyper::Error> = Ok(Frame::data(event.encode()));
                        Some((frame, (StreamState::Live, rx, ticker, guard)))
                    }
                    None => None,
                },
                _ = ticker.tick() => {
                    let ping = PushEvent {
                        id: None,
                        event: Some(HEARTBEAT_EVENT.to_string()),
                        data: String::from(": ping"),
                        retry_ms: None,
                    };
                    let frame: Result<Frame<Bytes>, hyper::Error> = Ok(Frame::data(ping.encode()));
                    Some((frame, (StreamState::Live, rx, ticker, guard)))
                }
            }
        },
    );

    BodyExt::boxed(StreamBody::new(stream))
}
