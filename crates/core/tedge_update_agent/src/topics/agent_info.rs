//! Agent-info reporting: tells the cloud which update-service instance is
//! running on the now-enrolled device, along with the same compatibility
//! properties enrollment sent. Runs once enrollment has completed, on the
//! device-scoped topic prefix.

use clock::Timestamp;
use serde::Serialize;
use std::collections::HashMap;

use crate::config::OperationTimeoutsConfig;
use crate::ids::new_correlation_id;
use crate::mqtt::channel::MqttChannel;
use crate::mqtt::message::{InboundMessage, OutboundMessage};
use crate::operation::{seconds, DoWorkOutcome, Operation, OperationContext, OperationState, RetryCategory};
use crate::state_store::StateStore;
use crate::topics::{agent_info_request_topic, agent_info_response_topic, MT_AGENT_INFO_REQUEST, MT_AGENT_INFO_RESPONSE};

#[derive(Serialize)]
struct CompatProperties<'a> {
    manufacturer: &'a str,
    model: &'a str,
    #[serde(flatten)]
    additional_device_properties: &'a HashMap<String, serde_json::Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AgentInfoRequestBody<'a> {
    sn: String,
    compat_properties: CompatProperties<'a>,
}

pub struct AgentInfoOperation {
    ctx: OperationContext,
    request_topic: String,
    response_topic: String,
    service_instance: String,
    manufacturer: String,
    model: String,
    additional_device_properties: HashMap<String, serde_json::Value>,
    timeouts: OperationTimeoutsConfig,
    request_sent_this_attempt: bool,
    reported: bool,
}

impl AgentInfoOperation {
    pub fn new(
        now: Timestamp,
        device_prefix: &str,
        service_instance: String,
        manufacturer: String,
        model: String,
        additional_device_properties: HashMap<String, serde_json::Value>,
        timeouts: OperationTimeoutsConfig,
    ) -> Self {
        AgentInfoOperation {
            ctx: OperationContext::idle(now, timeouts.retry.clone()),
            request_topic: agent_info_request_topic(device_prefix),
            response_topic: agent_info_response_topic(device_prefix),
            service_instance,
            manufacturer,
            model,
            additional_device_properties,
            timeouts,
            request_sent_this_attempt: false,
            reported: false,
        }
    }

    pub fn response_topic(&self) -> &str {
        &self.response_topic
    }

    /// Starts a fresh agent-info request unless one is already in
    /// flight; re-arms from any terminal state the same way enrollment
    /// does.
    pub fn request(&mut self, now: Timestamp) {
        if self.ctx.is_in_progress() {
            return;
        }
        self.request_sent_this_attempt = false;
        self.ctx.start(now, self.timeouts.overall_timeout(), new_correlation_id());
    }

    /// Forces the next `request()` to run again even from `Completed`,
    /// and clears the locally cached "already reported" flag so `do_work`
    /// stops short-circuiting. Called on `enr_cn`, since a fresh
    /// enrollment round invalidates whatever agent-info was reported
    /// against the old one.
    pub fn force_refresh(&mut self) {
        self.reported = false;
        if !self.ctx.is_in_progress() {
            self.ctx.state = OperationState::Idle;
        }
    }

    pub fn handle_response(&mut self, msg: &InboundMessage, store: &StateStore) -> bool {
        if !self.ctx.is_in_progress() {
            return false;
        }
        if msg.correlation_id().as_deref() != Some(self.ctx.correlation_id.as_str()) {
            return false;
        }
        if msg.result_code == Some(0) {
            store.set_agent_info_reported(self.service_instance.clone());
            self.reported = true;
            self.ctx.state = OperationState::Completed;
        } else {
            self.ctx.state = OperationState::Failure;
        }
        true
    }
}

#[async_trait::async_trait]
impl Operation for AgentInfoOperation {
    fn ctx(&self) -> &OperationContext {
        &self.ctx
    }

    fn ctx_mut(&mut self) -> &mut OperationContext {
        &mut self.ctx
    }

    async fn do_work(&mut self, now: Timestamp, channel: &MqttChannel) -> DoWorkOutcome {
        if self.reported {
            return DoWorkOutcome::Success;
        }

        if self.request_sent_this_attempt {
            self.request_sent_this_attempt = false;
            return DoWorkOutcome::Retry(RetryCategory::ClientTransient);
        }

        let body = AgentInfoRequestBody {
            sn: now.unix_timestamp().to_string(),
            compat_properties: CompatProperties {
                manufacturer: &self.manufacturer,
                model: &self.model,
                additional_device_properties: &self.additional_device_properties,
            },
        };
        let payload = match serde_json::to_vec(&body) {
            Ok(payload) => payload,
            Err(_) => return DoWorkOutcome::Fatal,
        };

        let outbound = OutboundMessage::new(self.request_topic.clone(), MT_AGENT_INFO_REQUEST, payload)
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

pub fn is_agent_info_response(message_type: Option<&str>) -> bool {
    message_type == Some(MT_AGENT_INFO_RESPONSE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn op(now: Timestamp) -> AgentInfoOperation {
        AgentInfoOperation::new(
            now,
            "dr/du/device-1",
            "svc-1".into(),
            "acme".into(),
            "widget".into(),
            HashMap::new(),
            OperationTimeoutsConfig::default(),
        )
    }

    fn response(topic: &str, correlation_data: Option<Bytes>, result_code: Option<i32>) -> InboundMessage {
        InboundMessage {
            topic: topic.to_string(),
            payload: Bytes::from_static(b"{}"),
            message_type: Some(MT_AGENT_INFO_RESPONSE.to_string()),
            protocol_id: Some("1".to_string()),
            content_type: None,
            correlation_data,
            result_code,
            extended_result_code: None,
        }
    }

    #[test]
    fn reports_agent_info_only_after_response_with_success_code() {
        let now = clock::WallClock.now();
        let mut op = op(now);
        op.request(now);
        let correlation_id = op.ctx().correlation_id.clone();
        let store = StateStore::new();

        let failure = response(op.response_topic(), Some(Bytes::from(correlation_id.clone().into_bytes())), Some(1));
        assert!(op.handle_response(&failure, &store));
        assert!(!store.is_agent_info_reported());
        assert_eq!(op.ctx().state, OperationState::Failure);
    }

    #[test]
    fn handle_response_completes_the_operation_on_success() {
        let now = clock::WallClock.now();
        let mut op = op(now);
        op.request(now);
        let correlation_id = op.ctx().correlation_id.clone();
        let store = StateStore::new();

        let success = response(op.response_topic(), Some(Bytes::from(correlation_id.into_bytes())), Some(0));
        assert!(op.handle_response(&success, &store));
        assert!(store.is_agent_info_reported());
        assert_eq!(op.ctx().state, OperationState::Completed);
        assert!(op.reported);
    }

    #[test]
    fn force_refresh_clears_the_reported_flag() {
        let now = clock::WallClock.now();
        let mut op = op(now);
        op.reported = true;
        op.ctx.state = OperationState::Completed;
        op.force_refresh();
        assert!(!op.reported);
        assert!(op.ctx().is_idle());
    }
}
