//! The three topic modules: enrollment, agent-info reporting, and update
//! requests. Each is a thin [`crate::operation::Operation`] wired to its
//! own request/response pair of MQTT v5 message types. A change
//! notification (`enr_cn`, `upd_cn`) arrives on the same topic as its
//! request/response pair's response side, since dispatch is keyed on `mt`
//! rather than topic.

pub mod agent_info;
pub mod enrollment;
pub mod update_request;

pub use agent_info::AgentInfoOperation;
pub use enrollment::EnrollmentOperation;
pub use update_request::UpdateRequestOperation;

/// Device-scoped base topic, e.g. `dr/du/{external_device_id}`.
///
/// Before enrollment completes there is no `external_device_id` yet, so
/// enrollment itself runs on a fixed, unscoped topic; every other topic
/// module waits for enrollment and then subscribes under the scoped
/// prefix.
pub fn device_scoped_prefix(external_device_id: &str) -> String {
    format!("dr/du/{external_device_id}")
}

pub const ENROLLMENT_REQUEST_TOPIC: &str = "dr/du/enrollment";
pub const ENROLLMENT_RESPONSE_TOPIC: &str = "dr/du/enrollment/response";

pub fn agent_info_request_topic(prefix: &str) -> String {
    format!("{prefix}/ainfo")
}

pub fn agent_info_response_topic(prefix: &str) -> String {
    format!("{prefix}/ainfo/response")
}

pub fn update_request_topic(prefix: &str) -> String {
    format!("{prefix}/upd")
}

pub fn update_response_topic(prefix: &str) -> String {
    format!("{prefix}/upd/response")
}

pub const MT_ENROLLMENT_REQUEST: &str = "enr_req";
pub const MT_ENROLLMENT_RESPONSE: &str = "enr_resp";
pub const MT_ENROLLMENT_CHANGE: &str = "enr_cn";
pub const MT_AGENT_INFO_REQUEST: &str = "ainfo_req";
pub const MT_AGENT_INFO_RESPONSE: &str = "ainfo_resp";
pub const MT_UPDATE_REQUEST: &str = "upd_req";
pub const MT_UPDATE_RESPONSE: &str = "upd_resp";
pub const MT_UPDATE_CHANGE: &str = "upd_cn";
