//! Deciding which records are flow outputs.

use brokerlink_types::{ConsumedMessage, FlowOutput};
use serde_json::Value;
use thiserror::Error;

/// Errors raised while classifying a record.
#[derive(Debug, Error)]
pub enum ClassificationError {
    /// The flow field is present but has an unusable type.
    #[error("Field '{field}' must be a string or number, found {found}")]
    InvalidField { field: String, found: &'static str },

    /// Raised by a custom classifier.
    #[error("{0}")]
    Custom(String),

    /// The classifier panicked.
    #[error("Classifier panicked: {0}")]
    Panicked(String),
}

/// Decides whether a record is a flow output.
///
/// Returning `Ok(None)` means the record is ordinary traffic. Closures of
/// the form `|message: &ConsumedMessage| -> Result<Option<FlowOutput>, _>`
/// implement this trait.
pub trait FlowClassifier: Send + Sync + 'static {
    fn classify(&self, message: &ConsumedMessage) -> Result<Option<FlowOutput>, ClassificationError>;
}

impl<F> FlowClassifier for F
where
    F: Fn(&ConsumedMessage) -> Result<Option<FlowOutput>, ClassificationError> + Send + Sync + 'static,
{
    fn classify(&self, message: &ConsumedMessage) -> Result<Option<FlowOutput>, ClassificationError> {
        self(message)
    }
}

/// Classifies JSON objects that carry a flow identifier field.
///
/// With the defaults, `{"flowId": "checkout", "stage": "paid"}` is a flow
/// output of flow `checkout` at stage `paid`. Records without the field,
/// empty payloads, payloads that are not JSON and JSON values other than
/// objects are ordinary traffic. Only a flow field of the wrong type is an
/// error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonFieldClassifier {
    flow_field: String,
    stage_field: Option<String>,
}

impl JsonFieldClassifier {
    pub const DEFAULT_FLOW_FIELD: &'static str = "flowId";
    pub const DEFAULT_STAGE_FIELD: &'static str = "stage";

    pub fn new(flow_field: impl Into<String>) -> Self {
        Self {
            flow_field: flow_field.into(),
            stage_field: None,
        }
    }

    pub fn with_stage_field(mut self, stage_field: impl Into<String>) -> Self {
        self.stage_field = Some(stage_field.into());
        self
    }

    pub fn flow_field(&self) -> &str {
        &self.flow_field
    }

    pub fn stage_field(&self) -> Option<&str> {
        self.stage_field.as_deref()
    }
}

impl Default for JsonFieldClassifier {
    fn default() -> Self {
        Self::new(Self::DEFAULT_FLOW_FIELD).with_stage_field(Self::DEFAULT_STAGE_FIELD)
    }
}

impl FlowClassifier for JsonFieldClassifier {
    fn classify(&self, message: &ConsumedMessage) -> Result<Option<FlowOutput>, ClassificationError> {
        let payload = match message.value.as_deref() {
            Some(payload) if !payload.is_empty() => payload,
            _ => return Ok(None),
        };

        let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(payload) else {
            return Ok(None);
        };

        let flow = match fields.get(&self.flow_field) {
            None | Some(Value::Null) => return Ok(None),
            Some(field) => scalar(field).ok_or_else(|| ClassificationError::InvalidField {
                field: self.flow_field.clone(),
                found: kind(field),
            })?,
        };

        let mut output = FlowOutput::new(flow, message.clone());
        if let Some(stage) = self
            .stage_field
            .as_ref()
            .and_then(|name| fields.get(name))
            .and_then(scalar)
        {
            output = output.with_stage(stage);
        }
        Ok(Some(output))
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(value: &str) -> ConsumedMessage {
        ConsumedMessage::new("flows", 0, 0, value)
    }

    #[test]
    fn object_with_flow_field_matches() {
        let classifier = JsonFieldClassifier::default();

        let output = classifier
            .classify(&message(r#"{"flowId":"checkout","stage":"paid"}"#))
            .unwrap()
            .unwrap();

        assert_eq!(output.flow, "checkout");
        assert_eq!(output.stage.as_deref(), Some("paid"));
        assert_eq!(output.topic(), "flows");
    }

    #[test]
    fn numeric_flow_ids_are_accepted() {
        let classifier = JsonFieldClassifier::default();

        let output = classifier.classify(&message(r#"{"flowId":42}"#)).unwrap().unwrap();

        assert_eq!(output.flow, "42");
        assert_eq!(output.stage, None);
    }

    #[test]
    fn ordinary_traffic_is_not_a_flow_output() {
        let classifier = JsonFieldClassifier::default();

        for payload in [
            r#"{"orderId":1}"#,
            r#"{"flowId":null}"#,
            "[1,2]",
            "\"text\"",
            "",
            "text",
            "order 1 created",
            "{not json",
        ] {
            assert!(classifier.classify(&message(payload)).unwrap().is_none(), "{}", payload);
        }

        let mut tombstone = message("");
        tombstone.value = None;
        assert!(classifier.classify(&tombstone).unwrap().is_none());
    }

    #[test]
    fn flow_field_of_wrong_type_is_an_error() {
        let classifier = JsonFieldClassifier::default();

        assert!(matches!(
            classifier.classify(&message(r#"{"flowId":["a"]}"#)),
            Err(ClassificationError::InvalidField { found: "array", .. })
        ));

        let err = classifier.classify(&message(r#"{"flowId":true}"#)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Field 'flowId' must be a string or number, found boolean"
        );
    }

    #[test]
    fn custom_field_names() {
        let classifier = JsonFieldClassifier::new("pipeline");

        let output = classifier
            .classify(&message(r#"{"pipeline":"etl","stage":"load"}"#))
            .unwrap()
            .unwrap();

        assert_eq!(output.flow, "etl");
        assert_eq!(output.stage, None);
    }

    #[test]
    fn closures_are_classifiers() {
        let classifier = |message: &ConsumedMessage| -> Result<Option<FlowOutput>, ClassificationError> {
            Ok(message
                .value_str()
                .filter(|v| v.starts_with("flow:"))
                .map(|v| FlowOutput::new(&v[5..], message.clone())))
        };

        assert_eq!(
            classifier.classify(&message("flow:ingest")).unwrap().unwrap().flow,
            "ingest"
        );
        assert!(classifier.classify(&message("noise")).unwrap().is_none());
    }
}
