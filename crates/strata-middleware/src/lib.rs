//! `strata-middleware` – transport around the fusion engines.
//!
//! Moves ESDF slices and clouds between rosbridge clients, the internal bus
//! and the fusion stages without interpreting their contents.
//!
//! # Modules
//!
//! - [`bus`] – Typed, topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels, plus the ROS topic-name mapping.
//! - [`combine_node`] – Composition root: assembles the enabled fusion stages
//!   and drives them from the bus.
//! - [`rosbridge`] – rosbridge v2 WebSocket endpoint feeding the input topics
//!   and streaming the combined topics back out.

pub mod bus;
pub mod combine_node;
pub mod rosbridge;

pub use bus::{EventBus, Topic, TopicNames, TopicReceiver};
pub use combine_node::{CombineNode, InboundMessage, NodeConfig, OutboundMessage};
pub use rosbridge::{ClientOp, RosbridgeServer};
