//! Update requests: the agent polling the cloud for an applicable update,
//! piggy-backing its most recently finished status report as the poll
//! payload, and fanning any returned manifest out to the update worker.
//!
//! This follows the same agent-initiated request/response shape as
//! enrollment and agent-info reporting — the agent originates `upd_req`
//! and correlates the `upd_resp` reply against the `correlationId` it
//! generated — with one twist: it is never a one-shot. Once a round
//! finishes (empty "nothing to do" response, rejected manifest, or a
//! manifest handed off to the worker) the operation waits out
//! `operation_interval_secs` and polls again, each poll carrying whatever
//! report is most current at the time.

use clock::Timestamp;

use crate::config::OperationTimeoutsConfig;
use crate::ids::new_correlation_id;
use crate::mqtt::channel::MqttChannel;
use crate::mqtt::message::{InboundMessage, OutboundMessage};
use crate::operation::{seconds, DoWorkOutcome, Operation, OperationContext, OperationState, RetryCategory};
use crate::reporting::ReportingMessage;
use crate::state_store::StateStore;
use crate::topics::{update_request_topic, update_response_topic, MT_UPDATE_REQUEST, MT_UPDATE_RESPONSE};
use crate::worker::{WorkItem, WorkQueue};
use crate::workflow;

pub struct UpdateRequestOperation {
    ctx: OperationContext,
    request_topic: String,
    response_topic: String,
    timeouts: OperationTimeoutsConfig,
    request_sent_this_attempt: bool,
    /// The report piggy-backed on the next `upd_req` poll.
    pending_report: ReportingMessage,
    /// The workflow id currently being executed by the update worker, if
    /// any; a `upd_resp` repeating this id is a duplicate delivery, not a
    /// new manifest.
    in_flight_workflow_id: Option<String>,
    /// The workflow id the worker most recently finished, so a duplicate
    /// `upd_resp` or `WorkResult` doesn't get re-run or re-reported.
    last_completed_workflow_id: Option<String>,
    next_poll_time: Timestamp,
}

impl UpdateRequestOperation {
    pub fn new(now: Timestamp, device_prefix: &str, timeouts: OperationTimeoutsConfig) -> Self {
        UpdateRequestOperation {
            ctx: OperationContext::idle(now, timeouts.retry.clone()),
            request_topic: update_request_topic(device_prefix),
            response_topic: update_response_topic(device_prefix),
            timeouts,
            request_sent_this_attempt: false,
            pending_report: ReportingMessage::idle(),
            in_flight_workflow_id: None,
            last_completed_workflow_id: None,
            next_poll_time: now,
        }
    }

    pub fn response_topic(&self) -> &str {
        &self.response_topic
    }

    /// `true` once the poll interval since the last finished round has
    /// elapsed and no request is currently in flight.
    pub fn is_ready_to_poll(&self, now: Timestamp) -> bool {
        !self.ctx.is_in_progress() && now >= self.next_poll_time
    }

    /// Starts the next poll, unless one is already running.
    pub fn request(&mut self, now: Timestamp) {
        if self.ctx.is_in_progress() {
            return;
        }
        self.request_sent_this_attempt = false;
        self.ctx.start(now, self.timeouts.overall_timeout(), new_correlation_id());
    }

    /// Makes the operation poll again immediately, skipping whatever is
    /// left of the current interval. Called on `upd_cn`.
    pub fn force_refresh(&mut self, now: Timestamp) {
        self.next_poll_time = now;
        if !self.ctx.is_in_progress() {
            self.ctx.state = OperationState::Idle;
        }
    }

    /// Called by the router when a `upd_resp` message arrives. Returns
    /// `true` if this was the response this operation was waiting for.
    pub fn handle_response(&mut self, msg: &InboundMessage, now: Timestamp, store: &StateStore, work_queue: &WorkQueue) -> bool {
        if !self.ctx.is_in_progress() {
            return false;
        }
        if msg.correlation_id().as_deref() != Some(self.ctx.correlation_id.as_str()) {
            return false;
        }

        if msg.result_code.is_some() && msg.result_code != Some(0) {
            // Gating violation: the cloud no longer considers this device
            // enrolled. Drop both flags together so enrollment and
            // agent-info reporting restart from scratch.
            store.reset_enrollment();
            self.pending_report = ReportingMessage::rejected(String::new(), "device is not enrolled");
            self.finish_round(now);
            return true;
        }

        match serde_json::from_slice::<serde_json::Value>(&msg.payload) {
            Ok(serde_json::Value::Object(ref map)) if map.is_empty() => {
                // No applicable update; leave the pending report as-is so
                // a still-unacknowledged prior result keeps being
                // reported until the cloud confirms it saw it.
            }
            Ok(_) => match workflow::parse(&msg.payload) {
                Ok(parsed) => self.accept_manifest(parsed, work_queue),
                Err(error) => self.pending_report = ReportingMessage::rejected(String::new(), error.to_string()),
            },
            Err(error) => self.pending_report = ReportingMessage::rejected(String::new(), error.to_string()),
        }

        self.finish_round(now);
        true
    }

    fn accept_manifest(&mut self, parsed: workflow::WorkflowHandle, work_queue: &WorkQueue) {
        let workflow_id = parsed.workflow_id.clone();

        if self.in_flight_workflow_id.as_deref() == Some(workflow_id.as_str()) {
            // Already being worked; this upd_resp is a duplicate/retried
            // delivery of a manifest already queued.
            return;
        }
        if self.last_completed_workflow_id.as_deref() == Some(workflow_id.as_str()) {
            // Already finished; nothing new to do, the last report for
            // this id keeps riding along until the cloud stops resending
            // the same manifest.
            return;
        }

        self.pending_report = ReportingMessage::download_started(workflow_id.clone());
        self.in_flight_workflow_id = Some(workflow_id);
        work_queue.push(WorkItem { workflow: parsed });
    }

    fn finish_round(&mut self, now: Timestamp) {
        self.ctx.state = OperationState::Completed;
        self.next_poll_time = now + seconds(self.timeouts.operation_interval());
    }

    /// Called when the update worker finishes a workflow; the resulting
    /// report rides along on the next poll.
    pub fn handle_work_result(&mut self, workflow_id: String, report: ReportingMessage) {
        if self.in_flight_workflow_id.as_deref() != Some(workflow_id.as_str()) {
            // A duplicate or stale result for a workflow this operation
            // no longer considers in flight.
            return;
        }
        self.in_flight_workflow_id = None;
        self.last_completed_workflow_id = Some(workflow_id);
        self.pending_report = report;
    }
}

#[async_trait::async_trait]
impl Operation for UpdateRequestOperation {
    fn ctx(&self) -> &OperationContext {
        &self.ctx
    }

    fn ctx_mut(&mut self) -> &mut OperationContext {
        &mut self.ctx
    }

    async fn do_work(&mut self, now: Timestamp, channel: &MqttChannel) -> DoWorkOutcome {
        if self.request_sent_this_attempt {
            self.request_sent_this_attempt = false;
            return DoWorkOutcome::Retry(RetryCategory::ClientTransient);
        }

        let outbound = OutboundMessage::new(self.request_topic.clone(), MT_UPDATE_REQUEST, self.pending_report.to_payload())
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

pub fn is_update_response(message_type: Option<&str>) -> bool {
    message_type == Some(MT_UPDATE_RESPONSE)
}
