//! Flow outputs - records the output monitor classified as application output.

use crate::{ConsumedMessage, MessageId};

/// A consumed message classified as a flow output.
///
/// Produced by a classifier inside the output monitor and emitted once to
/// the monitor's listeners. Nothing retains it after emission.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowOutput {
    /// Identifier of the flow that produced the record.
    pub flow: String,

    /// Stage within the flow, when the payload names one.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub stage: Option<String>,

    /// The record the output was classified from.
    pub message: ConsumedMessage,
}

impl FlowOutput {
    pub fn new(flow: impl Into<String>, message: ConsumedMessage) -> Self {
        Self {
            flow: flow.into(),
            stage: None,
            message,
        }
    }

    /// Attach a stage identifier.
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Identity of the originating record.
    pub fn source(&self) -> MessageId {
        self.message.id()
    }

    /// Topic of the originating record.
    pub fn topic(&self) -> &str {
        &self.message.topic
    }
}
