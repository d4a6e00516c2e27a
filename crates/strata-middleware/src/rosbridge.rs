//! rosbridge-compatible WebSocket front end.
//!
//! [`RosbridgeServer`]:
//!
//! 1. **Ingests** rosbridge v2 `publish` frames on the four input topics,
//!    decodes the carried `DistanceMapSlice` / `PointCloud2` and publishes it
//!    onto the internal [`EventBus`].
//!
//! 2. **Serves** fused output: every connected client receives the combined
//!    slice and cloud topics as `publish` frames. Clients may additionally
//!    `subscribe` to the diagnostics topic, or `unsubscribe` from anything.
//!
//! Only the `publish`, `subscribe` and `unsubscribe` ops are interpreted;
//! other ops (`advertise`, `call_service`, …) are accepted and ignored.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use strata_types::{DistanceMapSlice, Event, EventPayload, Layer, PointCloud2, StrataError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::bus::{EventBus, Topic, TopicNames, TopicReceiver};

/// Maximum number of cells accepted in a single slice.
///
/// Slices declaring or carrying more cells are rejected before they reach the
/// bus.
pub const MAX_SLICE_CELLS: usize = 4096 * 4096;

/// Maximum byte length of a single point cloud payload.
pub const MAX_CLOUD_BYTES: usize = 64 * 1024 * 1024; // 64 MiB

/// Pause after a failed `accept` (e.g. file descriptors exhausted).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Topics a client receives without asking.
const DEFAULT_CLIENT_TOPICS: [Topic; 2] = [Topic::CombinedSlice, Topic::CombinedCloud];

/// Outcome of one client frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOp {
    /// A message was decoded and published on the bus.
    Published(Topic),
    Subscribed(Topic),
    Unsubscribed(Topic),
    /// The frame was well-formed but not actionable (unknown topic, other op).
    Ignored,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ClientFrame {
    Publish {
        topic: String,
        msg: serde_json::Value,
    },
    Subscribe {
        topic: String,
    },
    Unsubscribe {
        topic: String,
    },
    #[serde(other)]
    Other,
}

/// Bridge between rosbridge WebSocket clients and the internal [`EventBus`].
#[derive(Clone)]
pub struct RosbridgeServer {
    bus: Arc<EventBus>,
    topics: Arc<TopicNames>,
}

impl RosbridgeServer {
    /// Create a new server backed by `bus`, mapping ROS names via `topics`.
    pub fn new(bus: Arc<EventBus>, topics: TopicNames) -> Self {
        Self {
            bus,
            topics: Arc::new(topics),
        }
    }

    // -----------------------------------------------------------------------
    // Ingest helpers
    // -----------------------------------------------------------------------

    /// Publish a slice on the input topic for `layer`.
    pub fn ingest_map_slice(
        &self,
        layer: Layer,
        slice: DistanceMapSlice,
    ) -> Result<usize, StrataError> {
        // ── Input validation ───────────────────────────────────────────────
        let cells = slice.cell_count().max(slice.data.len());
        if cells > MAX_SLICE_CELLS {
            return Err(StrataError::Parsing(format!(
                "{layer:?} slice has {cells} cells, exceeding the limit of {MAX_SLICE_CELLS}"
            )));
        }
        let topic = Topic::slice(layer);
        let event = Event::new(self.source_for(topic), EventPayload::MapSlice(slice));
        self.bus.publish_to(topic, event)
    }

    /// Publish a point cloud on the input topic for `layer`.
    pub fn ingest_point_cloud(
        &self,
        layer: Layer,
        cloud: PointCloud2,
    ) -> Result<usize, StrataError> {
        // ── Input validation ───────────────────────────────────────────────
        let declared = (cloud.point_step as usize)
            .saturating_mul(cloud.width as usize)
            .saturating_mul(cloud.height as usize);
        let bytes = declared.max(cloud.data.len());
        if bytes > MAX_CLOUD_BYTES {
            return Err(StrataError::Parsing(format!(
                "{layer:?} cloud is {bytes} bytes, exceeding the limit of {MAX_CLOUD_BYTES}"
            )));
        }
        let topic = Topic::cloud(layer);
        let event = Event::new(self.source_for(topic), EventPayload::PointCloud(cloud));
        self.bus.publish_to(topic, event)
    }

    fn source_for(&self, topic: Topic) -> String {
        format!("strata-middleware::rosbridge{}", self.topics.name_of(topic))
    }

    // -----------------------------------------------------------------------
    // Frame handling
    // -----------------------------------------------------------------------

    /// Interpret one text frame from a client.
    ///
    /// `subscriptions` is the calling client's topic set and is updated by
    /// `subscribe` / `unsubscribe` frames.
    pub fn handle_incoming_ws_message(
        &self,
        text: &str,
        subscriptions: &mut HashSet<Topic>,
    ) -> Result<ClientOp, StrataError> {
        let frame: ClientFrame = serde_json::from_str(text)
            .map_err(|e| StrataError::Serialization(format!("bad rosbridge frame: {e}")))?;

        match frame {
            ClientFrame::Publish { topic, msg } => {
                let Some(resolved) = self.topics.resolve(&topic) else {
                    debug!(%topic, "publish on unknown topic ignored");
                    return Ok(ClientOp::Ignored);
                };
                match resolved {
                    Topic::AboveGroundSlice | Topic::BelowGroundSlice => {
                        let slice = decode::<DistanceMapSlice>(&topic, msg)?;
                        let layer = layer_of(resolved);
                        self.publish_ingest(resolved, self.ingest_map_slice(layer, slice))
                    }
                    Topic::AboveGroundCloud | Topic::BelowGroundCloud => {
                        let cloud = decode::<PointCloud2>(&topic, msg)?;
                        let layer = layer_of(resolved);
                        self.publish_ingest(resolved, self.ingest_point_cloud(layer, cloud))
                    }
                    _ => {
                        debug!(%topic, "clients may not publish on output topics");
                        Ok(ClientOp::Ignored)
                    }
                }
            }
            ClientFrame::Subscribe { topic } => match self.topics.resolve(&topic) {
                Some(resolved) if !resolved.is_inbound() => {
                    subscriptions.insert(resolved);
                    Ok(ClientOp::Subscribed(resolved))
                }
                _ => {
                    debug!(%topic, "subscribe to unservable topic ignored");
                    Ok(ClientOp::Ignored)
                }
            },
            ClientFrame::Unsubscribe { topic } => match self.topics.resolve(&topic) {
                Some(resolved) if subscriptions.remove(&resolved) => {
                    Ok(ClientOp::Unsubscribed(resolved))
                }
                _ => Ok(ClientOp::Ignored),
            },
            ClientFrame::Other => Ok(ClientOp::Ignored),
        }
    }

    /// A message with no consumer on the bus is not a client error.
    fn publish_ingest(
        &self,
        topic: Topic,
        result: Result<usize, StrataError>,
    ) -> Result<ClientOp, StrataError> {
        match result {
            Ok(_) => Ok(ClientOp::Published(topic)),
            Err(StrataError::Channel(e)) => {
                debug!(?topic, error = %e, "inbound message had no consumer");
                Ok(ClientOp::Published(topic))
            }
            Err(e) => Err(e),
        }
    }

    /// Render `event` as a rosbridge `publish` frame on `topic`.
    pub fn encode_publish(&self, topic: Topic, event: &Event) -> Result<String, StrataError> {
        let msg = match &event.payload {
            EventPayload::MapSlice(slice) => serde_json::to_value(slice),
            EventPayload::PointCloud(cloud) => serde_json::to_value(cloud),
            EventPayload::Diagnostic(text) => Ok(json!({ "data": text })),
        }
        .map_err(|e| StrataError::Serialization(e.to_string()))?;

        let frame = json!({
            "op": "publish",
            "topic": self.topics.name_of(topic),
            "msg": msg,
        });
        serde_json::to_string(&frame).map_err(|e| StrataError::Serialization(e.to_string()))
    }

    // -----------------------------------------------------------------------
    // WebSocket server
    // -----------------------------------------------------------------------

    /// Start the WebSocket server on `addr`.
    ///
    /// Runs until the listener cannot be bound.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Io`] if the TCP listener cannot be bound.
    pub async fn run_ws_server(self, addr: SocketAddr) -> Result<(), StrataError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StrataError::Io(format!("ws bind error on {addr}: {e}")))?;
        info!(%addr, "rosbridge server listening");
        self.serve(listener).await
    }

    /// Accept clients on an already-bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), StrataError> {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_ws_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "ws client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "ws accept error");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    async fn handle_ws_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), StrataError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| StrataError::Serialization(format!("ws handshake from {peer}: {e}")))?;
        info!(peer = %peer, "rosbridge client connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut subscriptions: HashSet<Topic> = DEFAULT_CLIENT_TOPICS.into_iter().collect();
        let mut slices = self.bus.subscribe_to(Topic::CombinedSlice);
        let mut clouds = self.bus.subscribe_to(Topic::CombinedCloud);
        let mut diagnostics = self.bus.subscribe_to(Topic::Diagnostics);

        loop {
            tokio::select! {
                // Forward bus output to the WebSocket client.
                result = slices.recv() => {
                    if !self.forward(&mut ws_tx, &slices, result, &subscriptions, peer).await? {
                        break;
                    }
                }
                result = clouds.recv() => {
                    if !self.forward(&mut ws_tx, &clouds, result, &subscriptions, peer).await? {
                        break;
                    }
                }
                result = diagnostics.recv() => {
                    if !self.forward(&mut ws_tx, &diagnostics, result, &subscriptions, peer).await? {
                        break;
                    }
                }
                // Handle incoming WebSocket frames.
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(_)) => break,
                        Some(Ok(Message::Text(text))) => {
                            match self.handle_incoming_ws_message(text.as_str(), &mut subscriptions) {
                                Ok(op) => debug!(peer = %peer, ?op, "client frame handled"),
                                Err(e) => warn!(peer = %peer, error = %e, "rejected client frame"),
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        info!(peer = %peer, "rosbridge client disconnected");
        Ok(())
    }

    /// Send one received bus event to the client. Returns `false` once the
    /// connection or the bus is gone.
    async fn forward<S>(
        &self,
        ws_tx: &mut S,
        rx: &TopicReceiver,
        result: Result<Event, RecvError>,
        subscriptions: &HashSet<Topic>,
        peer: SocketAddr,
    ) -> Result<bool, StrataError>
    where
        S: Sink<Message> + Unpin,
    {
        let topic = rx.topic();
        match result {
            Ok(event) => {
                if !subscriptions.contains(&topic) {
                    return Ok(true);
                }
                let frame = self.encode_publish(topic, &event)?;
                Ok(ws_tx.send(Message::Text(frame.into())).await.is_ok())
            }
            Err(RecvError::Lagged(n)) => {
                warn!(peer = %peer, ?topic, lagged_by = n, "ws client lagged");
                Ok(true)
            }
            Err(RecvError::Closed) => Ok(false),
        }
    }
}

fn layer_of(topic: Topic) -> Layer {
    match topic {
        Topic::BelowGroundSlice | Topic::BelowGroundCloud => Layer::Below,
        _ => Layer::Above,
    }
}

fn decode<T: serde::de::DeserializeOwned>(topic: &str, msg: serde_json::Value) -> Result<T, StrataError> {
    serde_json::from_value(msg)
        .map_err(|e| StrataError::Parsing(format!("bad message on {topic}: {e}")))
}
