//! Composition root that wires the fusion stages onto the event bus.
//!
//! [`CombineNode`] owns at most one grid stage and one point stage, each
//! built from the enable flags in [`NodeConfig`]:
//!
//! * **Below-ground traffic** – slices and clouds on the below-ground topics
//!   refresh the matching stage's cache and produce no output.
//!
//! * **Above-ground traffic** – slices and clouds on the above-ground topics
//!   are fused against the cache and re-published on
//!   [`Topic::CombinedSlice`] / [`Topic::CombinedCloud`].
//!
//! Messages addressed to a disabled stage are dropped.

use std::sync::Arc;

use strata_fusion::{GridFusionConfig, GridFusionEngine, LayerFusion, PointFusionEngine};
use strata_types::{DistanceMapSlice, Event, EventPayload, PointCloud2};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, Topic, TopicReceiver};

/// Source tag stamped on every event this node publishes.
pub const NODE_SOURCE: &str = "strata-middleware::combine_node";

type GridStage = Box<dyn LayerFusion<Message = DistanceMapSlice>>;
type PointStage = Box<dyn LayerFusion<Message = PointCloud2>>;

/// Startup flags selecting which stages the node assembles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeConfig {
    pub enable_grid_fusion: bool,
    pub enable_point_fusion: bool,
    pub grid: GridFusionConfig,
}

/// A message arriving on one of the four input topics.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    AboveSlice(DistanceMapSlice),
    BelowSlice(DistanceMapSlice),
    AboveCloud(PointCloud2),
    BelowCloud(PointCloud2),
}

impl InboundMessage {
    /// Pair a bus event with the topic it arrived on.
    ///
    /// Returns `None` when the payload does not fit the topic.
    pub fn from_event(topic: Topic, event: Event) -> Option<Self> {
        match (topic, event.payload) {
            (Topic::AboveGroundSlice, EventPayload::MapSlice(m)) => Some(Self::AboveSlice(m)),
            (Topic::BelowGroundSlice, EventPayload::MapSlice(m)) => Some(Self::BelowSlice(m)),
            (Topic::AboveGroundCloud, EventPayload::PointCloud(c)) => Some(Self::AboveCloud(c)),
            (Topic::BelowGroundCloud, EventPayload::PointCloud(c)) => Some(Self::BelowCloud(c)),
            _ => None,
        }
    }
}

/// A fused message ready for publication.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    CombinedSlice(DistanceMapSlice),
    CombinedCloud(PointCloud2),
}

impl OutboundMessage {
    /// Bus topic this message is published on.
    pub fn topic(&self) -> Topic {
        match self {
            OutboundMessage::CombinedSlice(_) => Topic::CombinedSlice,
            OutboundMessage::CombinedCloud(_) => Topic::CombinedCloud,
        }
    }

    pub fn into_event(self) -> Event {
        let payload = match self {
            OutboundMessage::CombinedSlice(m) => EventPayload::MapSlice(m),
            OutboundMessage::CombinedCloud(c) => EventPayload::PointCloud(c),
        };
        Event::new(NODE_SOURCE, payload)
    }
}

/// The fusion node.
#[derive(Default)]
pub struct CombineNode {
    grid: Option<GridStage>,
    points: Option<PointStage>,
}

impl CombineNode {
    /// A node with no stages; every message is dropped until stages are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble the stages enabled in `config`.
    pub fn from_config(config: &NodeConfig) -> Self {
        let mut node = Self::new();
        if config.enable_grid_fusion {
            node = node.with_grid_stage(Box::new(GridFusionEngine::new(config.grid)));
        }
        if config.enable_point_fusion {
            node = node.with_point_stage(Box::new(PointFusionEngine::new()));
        }
        node
    }

    pub fn with_grid_stage(mut self, stage: GridStage) -> Self {
        self.grid = Some(stage);
        self
    }

    pub fn with_point_stage(mut self, stage: PointStage) -> Self {
        self.points = Some(stage);
        self
    }

    pub fn grid_enabled(&self) -> bool {
        self.grid.is_some()
    }

    pub fn points_enabled(&self) -> bool {
        self.points.is_some()
    }

    /// One-line summary of the assembled stages.
    pub fn describe(&self) -> String {
        let state = |on: bool| if on { "on" } else { "off" };
        format!(
            "combine node: grid fusion {}, point fusion {}",
            state(self.grid_enabled()),
            state(self.points_enabled()),
        )
    }

    /// Route one inbound message.
    ///
    /// Below-ground messages update a cache and yield `None`; above-ground
    /// messages yield the message to publish.
    pub fn handle(&self, msg: InboundMessage) -> Option<OutboundMessage> {
        match msg {
            InboundMessage::BelowSlice(slice) => {
                let Some(stage) = &self.grid else {
                    debug!("grid fusion disabled; dropping below-ground slice");
                    return None;
                };
                if slice.data.is_empty() {
                    debug!("ignoring empty below-ground slice");
                    return None;
                }
                stage.update_below(slice);
                None
            }
            InboundMessage::BelowCloud(cloud) => {
                let Some(stage) = &self.points else {
                    debug!("point fusion disabled; dropping below-ground cloud");
                    return None;
                };
                if cloud.data.is_empty() {
                    debug!("ignoring empty below-ground cloud");
                    return None;
                }
                stage.update_below(cloud);
                None
            }
            InboundMessage::AboveSlice(slice) => {
                let Some(stage) = &self.grid else {
                    debug!("grid fusion disabled; dropping above-ground slice");
                    return None;
                };
                let (fused, outcome) = stage.fuse_above(slice);
                debug!(stage = stage.name(), %outcome, "above-ground slice processed");
                Some(OutboundMessage::CombinedSlice(fused))
            }
            InboundMessage::AboveCloud(cloud) => {
                let Some(stage) = &self.points else {
                    debug!("point fusion disabled; dropping above-ground cloud");
                    return None;
                };
                let (fused, outcome) = stage.fuse_above(cloud);
                debug!(stage = stage.name(), %outcome, "above-ground cloud processed");
                Some(OutboundMessage::CombinedCloud(fused))
            }
        }
    }

    /// Route one bus event received on `topic`.
    pub fn handle_event(&self, topic: Topic, event: Event) -> Option<OutboundMessage> {
        let source = event.source.clone();
        match InboundMessage::from_event(topic, event) {
            Some(msg) => self.handle(msg),
            None => {
                warn!(?topic, %source, "event payload does not match its topic; dropping");
                None
            }
        }
    }

    /// Subscribe to the input topics and drive the node on a new task.
    ///
    /// Subscriptions are taken before this returns, so anything published
    /// afterwards is seen by the node.
    pub fn spawn(self: Arc<Self>, bus: Arc<EventBus>) -> JoinHandle<()> {
        let inputs = Inputs::subscribe(&bus);
        tokio::spawn(async move { self.drive(&bus, inputs).await })
    }

    /// Drive the node on the current task until the bus shuts down.
    pub async fn run(self: Arc<Self>, bus: Arc<EventBus>) {
        let inputs = Inputs::subscribe(&bus);
        self.drive(&bus, inputs).await;
    }

    async fn drive(&self, bus: &EventBus, mut inputs: Inputs) {
        info!("{}", self.describe());
        let _ = bus.publish_to(
            Topic::Diagnostics,
            Event::new(NODE_SOURCE, EventPayload::Diagnostic(self.describe())),
        );

        loop {
            // Below-ground updates are drained ahead of above-ground fusion
            // when both are ready.
            let (topic, result) = tokio::select! {
                biased;
                r = inputs.below_slice.recv() => (inputs.below_slice.topic(), r),
                r = inputs.below_cloud.recv() => (inputs.below_cloud.topic(), r),
                r = inputs.above_slice.recv() => (inputs.above_slice.topic(), r),
                r = inputs.above_cloud.recv() => (inputs.above_cloud.topic(), r),
            };

            match result {
                Ok(event) => {
                    let Some(out) = self.handle_event(topic, event) else {
                        continue;
                    };
                    let out_topic = out.topic();
                    if let Err(e) = bus.publish_to(out_topic, out.into_event()) {
                        debug!(topic = ?out_topic, error = %e, "fused output not delivered");
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(?topic, lagged_by = n, "combine node lagged; messages dropped");
                }
                Err(RecvError::Closed) => {
                    info!("event bus closed; combine node stopping");
                    break;
                }
            }
        }
    }
}

struct Inputs {
    above_slice: TopicReceiver,
    below_slice: TopicReceiver,
    above_cloud: TopicReceiver,
    below_cloud: TopicReceiver,
}

impl Inputs {
    fn subscribe(bus: &EventBus) -> Self {
        Self {
            above_slice: bus.subscribe_to(Topic::AboveGroundSlice),
            below_slice: bus.subscribe_to(Topic::BelowGroundSlice),
            above_cloud: bus.subscribe_to(Topic::AboveGroundCloud),
            below_cloud: bus.subscribe_to(Topic::BelowGroundCloud),
        }
    }
}
