//! # brokerlink-types
//!
//! Core data types shared by the brokerlink client services and transports.
//! Everything a transport hands to the client, and everything the client
//! hands back to callers, is defined here.
//!
//! ## Types
//!
//! - [`ConsumedMessage`] / [`MessageId`]: a record as delivered by the broker
//! - [`FlowOutput`]: a record the output monitor classified as application output
//! - [`TopicStats`] / [`StatsSnapshot`]: per-topic counters exposed by the monitor
//!
//! ## Features
//!
//! - `serde`: serialization of every type via serde
//!
//! ## Example
//!
//! ```rust
//! use brokerlink_types::{StatsSnapshot, TopicStats};
//!
//! let snapshot = StatsSnapshot::builder()
//!     .timestamp_ms(1_703_160_000_000)
//!     .topic(TopicStats::builder("orders").count(3).flow_outputs(1).build())
//!     .build();
//!
//! assert_eq!(snapshot.total_messages(), 3);
//! assert_eq!(snapshot.total_flow_outputs(), 1);
//! ```

mod flow;
mod message;
mod snapshot;
mod stats;
mod version;

pub use flow::*;
pub use message::*;
pub use snapshot::*;
pub use stats::*;
pub use version::*;

/// Current schema version of [`StatsSnapshot`].
pub const SCHEMA_VERSION: u32 = 1;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
