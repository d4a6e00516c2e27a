//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! Traffic is partitioned into seven [`Topic`] lanes:
//!
//! | Topic | Default ROS name | Traffic |
//! |---|---|---|
//! | [`Topic::AboveGroundSlice`] | `/nvblox_node/static_map_slice` | above-ground ESDF slices |
//! | [`Topic::BelowGroundSlice`] | `/nvblox_node/static_map_slice2` | below-ground ESDF slices |
//! | [`Topic::AboveGroundCloud`] | `/nvblox_node/static_esdf_pointcloud` | above-ground ESDF clouds |
//! | [`Topic::BelowGroundCloud`] | `/nvblox_node/static_esdf_pointcloud2` | below-ground ESDF clouds |
//! | [`Topic::CombinedSlice`] | `/nvblox_node/combined_esdf` | fused slices |
//! | [`Topic::CombinedCloud`] | `/nvblox_node/combined_esdf_pointcloud` | fused clouds |
//! | [`Topic::Diagnostics`] | `/strata/diagnostics` | operator status lines |

use serde::{Deserialize, Serialize};
use strata_types::{Event, Layer, StrataError};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
pub const DEFAULT_CAPACITY: usize = 256;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    AboveGroundSlice,
    BelowGroundSlice,
    AboveGroundCloud,
    BelowGroundCloud,
    CombinedSlice,
    CombinedCloud,
    Diagnostics,
}

impl Topic {
    /// Every topic, inbound first.
    pub const ALL: [Topic; 7] = [
        Topic::AboveGroundSlice,
        Topic::BelowGroundSlice,
        Topic::AboveGroundCloud,
        Topic::BelowGroundCloud,
        Topic::CombinedSlice,
        Topic::CombinedCloud,
        Topic::Diagnostics,
    ];

    /// Inbound slice topic for `layer`.
    pub fn slice(layer: Layer) -> Self {
        match layer {
            Layer::Above => Topic::AboveGroundSlice,
            Layer::Below => Topic::BelowGroundSlice,
        }
    }

    /// Inbound cloud topic for `layer`.
    pub fn cloud(layer: Layer) -> Self {
        match layer {
            Layer::Above => Topic::AboveGroundCloud,
            Layer::Below => Topic::BelowGroundCloud,
        }
    }

    /// True for the four topics external producers publish on.
    pub fn is_inbound(self) -> bool {
        matches!(
            self,
            Topic::AboveGroundSlice
                | Topic::BelowGroundSlice
                | Topic::AboveGroundCloud
                | Topic::BelowGroundCloud
        )
    }
}

// ---------------------------------------------------------------------------
// ROS topic names
// ---------------------------------------------------------------------------

/// External (ROS) names of each [`Topic`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicNames {
    pub above_slice: String,
    pub below_slice: String,
    pub above_cloud: String,
    pub below_cloud: String,
    pub combined_slice: String,
    pub combined_cloud: String,
    pub diagnostics: String,
}

impl Default for TopicNames {
    fn default() -> Self {
        Self {
            above_slice: "/nvblox_node/static_map_slice".to_string(),
            below_slice: "/nvblox_node/static_map_slice2".to_string(),
            above_cloud: "/nvblox_node/static_esdf_pointcloud".to_string(),
            below_cloud: "/nvblox_node/static_esdf_pointcloud2".to_string(),
            combined_slice: "/nvblox_node/combined_esdf".to_string(),
            combined_cloud: "/nvblox_node/combined_esdf_pointcloud".to_string(),
            diagnostics: "/strata/diagnostics".to_string(),
        }
    }
}

impl TopicNames {
    /// ROS name carried by `topic`.
    pub fn name_of(&self, topic: Topic) -> &str {
        match topic {
            Topic::AboveGroundSlice => &self.above_slice,
            Topic::BelowGroundSlice => &self.below_slice,
            Topic::AboveGroundCloud => &self.above_cloud,
            Topic::BelowGroundCloud => &self.below_cloud,
            Topic::CombinedSlice => &self.combined_slice,
            Topic::CombinedCloud => &self.combined_cloud,
            Topic::Diagnostics => &self.diagnostics,
        }
    }

    /// Map a ROS name back onto a [`Topic`].
    pub fn resolve(&self, name: &str) -> Option<Topic> {
        Topic::ALL.into_iter().find(|&t| self.name_of(t) == name)
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    above_slice: broadcast::Sender<Event>,
    below_slice: broadcast::Sender<Event>,
    above_cloud: broadcast::Sender<Event>,
    below_cloud: broadcast::Sender<Event>,
    combined_slice: broadcast::Sender<Event>,
    combined_cloud: broadcast::Sender<Event>,
    diagnostics: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    ///
    /// # Panics
    ///
    /// Panics when `capacity` is zero (a [`broadcast`] requirement).
    pub fn new(capacity: usize) -> Self {
        Self {
            above_slice: broadcast::channel(capacity).0,
            below_slice: broadcast::channel(capacity).0,
            above_cloud: broadcast::channel(capacity).0,
            below_cloud: broadcast::channel(capacity).0,
            combined_slice: broadcast::channel(capacity).0,
            combined_cloud: broadcast::channel(capacity).0,
            diagnostics: broadcast::channel(capacity).0,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event, or
    /// [`StrataError::Channel`] when nobody is listening on the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, StrataError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| StrataError::Channel(format!("No subscribers for topic {topic:?}")))
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live receivers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::AboveGroundSlice => &self.above_slice,
            Topic::BelowGroundSlice => &self.below_slice,
            Topic::AboveGroundCloud => &self.above_cloud,
            Topic::BelowGroundCloud => &self.below_cloud,
            Topic::CombinedSlice => &self.combined_slice,
            Topic::CombinedCloud => &self.combined_cloud,
            Topic::Diagnostics => &self.diagnostics,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}
