//! Message router: validates the protocol id, then dispatches an inbound
//! message to whichever topic module's response handler is waiting for
//! it, keyed on `mt`.

use clock::Timestamp;

use crate::mqtt::message::InboundMessage;
use crate::state_store::StateStore;
use crate::topics::{AgentInfoOperation, EnrollmentOperation, UpdateRequestOperation};
use crate::topics::{MT_AGENT_INFO_RESPONSE, MT_ENROLLMENT_CHANGE, MT_ENROLLMENT_RESPONSE, MT_UPDATE_CHANGE, MT_UPDATE_RESPONSE};
use crate::worker::WorkQueue;

/// Routes one inbound message to the topic module it belongs to.
///
/// Returns `false` if the message was dropped outright (a bad protocol
/// id) or no registered handler claimed it (an unknown `mt`, or a
/// response that arrived after its operation already gave up); the
/// caller just logs and moves on.
#[allow(clippy::too_many_arguments)]
pub fn route(
    msg: &InboundMessage,
    now: Timestamp,
    store: &StateStore,
    enrollment: &mut EnrollmentOperation,
    agent_info: &mut AgentInfoOperation,
    update_request: &mut UpdateRequestOperation,
    work_queue: &WorkQueue,
) -> bool {
    if !msg.has_valid_protocol_id() {
        return false;
    }

    match msg.message_type.as_deref() {
        Some(MT_ENROLLMENT_RESPONSE) => enrollment.handle_response(msg, store),
        Some(MT_ENROLLMENT_CHANGE) => {
            // An unsolicited push telling the agent its enrollment is no
            // longer current: drop both gating flags and force a fresh
            // enrollment/agent-info round.
            store.reset_enrollment();
            enrollment.force_refresh();
            agent_info.force_refresh();
            true
        }
        Some(MT_AGENT_INFO_RESPONSE) => agent_info.handle_response(msg, store),
        Some(MT_UPDATE_RESPONSE) => update_request.handle_response(msg, now, store, work_queue),
        Some(MT_UPDATE_CHANGE) => {
            update_request.force_refresh(now);
            true
        }
        _ => false,
    }
}
