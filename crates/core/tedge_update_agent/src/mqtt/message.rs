//! Message envelopes layered over raw MQTT v5 publishes.
//!
//! The wire protocol puts everything that matters for routing and
//! correlation into MQTT v5 user properties and the standard correlation
//! data / content-type properties, rather than wrapping every payload in
//! an envelope object. `mt` (message type) is what [`crate::router`]
//! dispatches on; `pid` is a protocol-id validation field that is always
//! `"1"` on the wire and carries no correlation meaning. Correlating a
//! response with the request that caused it is the job of the standard
//! MQTT v5 Correlation Data property, read back out through
//! [`InboundMessage::correlation_id`].

use bytes::Bytes;

pub const PROP_MESSAGE_TYPE: &str = "mt";
pub const PROP_PROTOCOL_ID: &str = "pid";
pub const PROP_RESULT_CODE: &str = "resultcode";
pub const PROP_EXTENDED_RESULT_CODE: &str = "extendedresultcode";

/// The only protocol id this agent ever sends or accepts.
pub const PROTOCOL_ID: &str = "1";

/// A message received from the broker, with the user properties we care
/// about already picked out.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub message_type: Option<String>,
    pub protocol_id: Option<String>,
    pub content_type: Option<String>,
    pub correlation_data: Option<Bytes>,
    pub result_code: Option<i32>,
    pub extended_result_code: Option<i64>,
}

impl InboundMessage {
    pub fn from_parts(
        topic: String,
        payload: Bytes,
        user_properties: Vec<(String, String)>,
        content_type: Option<String>,
        correlation_data: Option<Bytes>,
    ) -> Self {
        let mut message_type = None;
        let mut protocol_id = None;
        let mut result_code = None;
        let mut extended_result_code = None;

        for (key, value) in user_properties {
            match key.as_str() {
                PROP_MESSAGE_TYPE => message_type = Some(value),
                PROP_PROTOCOL_ID => protocol_id = Some(value),
                PROP_RESULT_CODE => result_code = value.parse().ok(),
                PROP_EXTENDED_RESULT_CODE => extended_result_code = value.parse().ok(),
                _ => {}
            }
        }

        InboundMessage {
            topic,
            payload,
            message_type,
            protocol_id,
            content_type,
            correlation_data,
            result_code,
            extended_result_code,
        }
    }

    /// `true` if this message carries the one protocol id this agent
    /// understands; anything else (or a missing `pid`) is dropped before
    /// it ever reaches a topic module.
    pub fn has_valid_protocol_id(&self) -> bool {
        self.protocol_id.as_deref() == Some(PROTOCOL_ID)
    }

    /// The correlation id is carried on the wire as its own ASCII bytes
    /// (see [`OutboundMessage::with_correlation_id`]), not re-encoded.
    pub fn correlation_id(&self) -> Option<String> {
        self.correlation_data
            .as_ref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

/// A message to publish, built up fluently before handing it to the
/// channel.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub message_type: &'static str,
    pub content_type: Option<String>,
    pub correlation_data: Option<Bytes>,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, message_type: &'static str, payload: Vec<u8>) -> Self {
        OutboundMessage {
            topic: topic.into(),
            payload,
            message_type,
            content_type: Some("application/json".to_string()),
            correlation_data: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: &str) -> Self {
        self.correlation_data = Some(Bytes::from(correlation_id.as_bytes().to_vec()));
        self
    }

    pub fn user_properties(&self) -> Vec<(String, String)> {
        vec![
            (PROP_MESSAGE_TYPE.to_string(), self.message_type.to_string()),
            (PROP_PROTOCOL_ID.to_string(), PROTOCOL_ID.to_string()),
        ]
    }
}
