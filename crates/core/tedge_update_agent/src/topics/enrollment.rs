//! Enrollment: the first handshake with the cloud, establishing the
//! `external_device_id` every other topic module's scoped topics depend
//! on.

use clock::Timestamp;
use serde::Serialize;
use std::collections::HashMap;

use crate::config::OperationTimeoutsConfig;
use crate::ids::new_correlation_id;
use crate::mqtt::channel::MqttChannel;
use crate::mqtt::message::{InboundMessage, OutboundMessage};
use crate::operation::{seconds, DoWorkOutcome, Operation, OperationContext, OperationState, RetryCategory};
use crate::state_store::StateStore;
use crate::topics::{ENROLLMENT_REQUEST_TOPIC, ENROLLMENT_RESPONSE_TOPIC, MT_ENROLLMENT_REQUEST, MT_ENROLLMENT_RESPONSE};

#[derive(Serialize)]
struct EnrollmentRequestBody<'a> {
    manufacturer: &'a str,
    model: &'a str,
    #[serde(flatten)]
    additional_device_properties: &'a HashMap<String, serde_json::Value>,
}

pub struct EnrollmentOperation {
    ctx: OperationContext,
    manufacturer: String,
    model: String,
    additional_device_properties: HashMap<String, serde_json::Value>,
    timeouts: OperationTimeoutsConfig,
    request_sent_this_attempt: bool,
    external_device_id: Option<String>,
}

impl EnrollmentOperation {
    pub fn new(
        now: Timestamp,
        manufacturer: String,
        model: String,
        additional_device_properties: HashMap<String, serde_json::Value>,
        timeouts: OperationTimeoutsConfig,
    ) -> Self {
        EnrollmentOperation {
            ctx: OperationContext::idle(now, timeouts.retry.clone()),
            manufacturer,
            model,
            additional_device_properties,
            timeouts,
            request_sent_this_attempt: false,
            external_device_id: None,
        }
    }

    /// Starts a fresh enrollment request, unless one is already in
    /// flight. Re-arms from `Completed`/`Failure`/`Expired` just as
    /// readily as from `Idle`, since the whole point of re-requesting is
    /// recovering from one of those terminal states.
    pub fn request(&mut self, now: Timestamp) {
        if self.ctx.is_in_progress() {
            return;
        }
        self.request_sent_this_attempt = false;
        self.ctx.start(now, self.timeouts.overall_timeout(), new_correlation_id());
    }

    /// Forces the next `request()` call to start a new attempt even if
    /// this operation currently believes itself `Completed`. Called when
    /// an `enr_cn` change notification arrives.
    pub fn force_refresh(&mut self) {
        if !self.ctx.is_in_progress() {
            self.ctx.state = OperationState::Idle;
        }
    }

    /// Called by the router when an `enr_resp` message arrives.
    ///
    /// Returns `true` if this message was the response this operation was
    /// waiting for (the router stops looking for another handler once
    /// that happens).
    pub fn handle_response(&mut self, msg: &InboundMessage, store: &StateStore) -> bool {
        if !self.ctx.is_in_progress() {
            return false;
        }
        if msg.correlation_id().as_deref() != Some(self.ctx.correlation_id.as_str()) {
            return false;
        }

        if msg.result_code == Some(0) {
            if let Ok(body) = serde_json::from_slice::<serde_json::Value>(&msg.payload) {
                if let Some(device_id) = body.get("externalDeviceId").and_then(|v| v.as_str()) {
                    self.external_device_id = Some(device_id.to_string());
                    store.set_enrolled(device_id.to_string());
                }
            }
            self.ctx.state = OperationState::Completed;
        } else {
            self.ctx.state = OperationState::Failure;
        }
        true
    }

    pub fn external_device_id(&self) -> Option<&str> {
        self.external_device_id.as_deref()
    }

    pub fn is_enrolled(&self) -> bool {
        self.external_device_id.is_some()
    }
}

#[async_trait::async_trait]
impl Operation for EnrollmentOperation {
    fn ctx(&self) -> &OperationContext {
        &self.ctx
    }

    fn ctx_mut(&mut self) -> &mut OperationContext {
        &mut self.ctx
    }

    async fn do_work(&mut self, now: Timestamp, channel: &MqttChannel) -> DoWorkOutcome {
        if self.is_enrolled() {
            return DoWorkOutcome::Success;
        }

        if self.request_sent_this_attempt {
            // We already sent a request and the ack-wait timeout elapsed
            // (next_execution_time is only reached once that much time
            // has passed) without a response: treat it as a transient
            // failure so the retry skeleton backs off and tries again.
            self.request_sent_this_attempt = false;
            return DoWorkOutcome::Retry(RetryCategory::ClientTransient);
        }

        let body = EnrollmentRequestBody {
            manufacturer: &self.manufacturer,
            model: &self.model,
            additional_device_properties: &self.additional_device_properties,
        };
        let payload = match serde_json::to_vec(&body) {
            Ok(payload) => payload,
            Err(_) => return DoWorkOutcome::Fatal,
        };

        let outbound = OutboundMessage::new(ENROLLMENT_REQUEST_TOPIC, MT_ENROLLMENT_REQUEST, payload)
            .with_correlation_id(&self.ctx.correlation_id);

        match channel
            .publish(
                &outbound.topic,
                outbound.payload.clone(),
                outbound.user_properties(),
                outbound.content_type.clone(),
                outbound.correlation_data.clone(),
            )
            .await
        {
            Ok(()) => {
                self.request_sent_this_attempt = true;
                self.ctx.next_execution_time = now + seconds(self.timeouts.ack_wait_timeout());
                DoWorkOutcome::Pending
            }
            Err(_) => DoWorkOutcome::Retry(RetryCategory::ClientTransient),
        }
    }

    fn on_abandoned(&mut self, _now: Timestamp) {
        self.request_sent_this_attempt = false;
    }
}

pub fn response_topic() -> &'static str {
    ENROLLMENT_RESPONSE_TOPIC
}

pub fn is_enrollment_response(message_type: Option<&str>) -> bool {
    message_type == Some(MT_ENROLLMENT_RESPONSE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn timeouts() -> OperationTimeoutsConfig {
        OperationTimeoutsConfig::default()
    }

    fn response(correlation_data: Option<Bytes>, result_code: Option<i32>, payload: Bytes) -> InboundMessage {
        InboundMessage {
            topic: ENROLLMENT_RESPONSE_TOPIC.to_string(),
            payload,
            message_type: Some(MT_ENROLLMENT_RESPONSE.to_string()),
            protocol_id: Some("1".to_string()),
            content_type: None,
            correlation_data,
            result_code,
            extended_result_code: None,
        }
    }

    #[test]
    fn request_moves_from_idle_to_in_progress() {
        let now = clock::WallClock.now();
        let mut op = EnrollmentOperation::new(now, "acme".into(), "widget".into(), HashMap::new(), timeouts());
        assert!(op.ctx().is_idle());
        op.request(now);
        assert!(op.ctx().is_in_progress());
    }

    #[test]
    fn handle_response_ignores_mismatched_correlation_id() {
        let now = clock::WallClock.now();
        let mut op = EnrollmentOperation::new(now, "acme".into(), "widget".into(), HashMap::new(), timeouts());
        op.request(now);
        let store = StateStore::new();

        let msg = response(Some(Bytes::from_static(b"not-the-right-id")), Some(0), Bytes::from_static(b"{}"));

        assert!(!op.handle_response(&msg, &store));
        assert!(!store.is_device_enrolled());
    }

    #[test]
    fn handle_response_enrolls_and_completes_on_success() {
        let now = clock::WallClock.now();
        let mut op = EnrollmentOperation::new(now, "acme".into(), "widget".into(), HashMap::new(), timeouts());
        op.request(now);
        let correlation_id = op.ctx().correlation_id.clone();
        let store = StateStore::new();

        let payload = Bytes::from(serde_json::to_vec(&serde_json::json!({"externalDeviceId": "device-42"})).unwrap());
        let msg = response(Some(Bytes::from(correlation_id.into_bytes())), Some(0), payload);

        assert!(op.handle_response(&msg, &store));
        assert!(store.is_device_enrolled());
        assert_eq!(op.external_device_id(), Some("device-42"));
        assert_eq!(op.ctx().state, OperationState::Completed);
    }

    #[test]
    fn force_refresh_re_arms_a_completed_operation() {
        let now = clock::WallClock.now();
        let mut op = EnrollmentOperation::new(now, "acme".into(), "widget".into(), HashMap::new(), timeouts());
        op.ctx.state = OperationState::Completed;
        op.force_refresh();
        assert!(op.ctx().is_idle());
        op.request(now);
        assert!(op.ctx().is_in_progress());
    }
}
