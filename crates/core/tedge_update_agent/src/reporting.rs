//! The status-reporting JSON body piggy-backed on the next `upd_req` poll
//! as an update request makes progress.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::handler::HandlerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportState {
    Idle,
    DownloadStarted,
    DeploymentInProgress,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub result_code: i32,
    pub extended_result_code: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_details: Option<String>,
}

impl StepResult {
    pub fn ok() -> Self {
        StepResult {
            result_code: 0,
            extended_result_code: 0,
            result_details: None,
        }
    }

    pub fn from_error(error: &HandlerError) -> Self {
        StepResult {
            result_code: 1,
            extended_result_code: error.extended_result_code,
            result_details: Some(error.message.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastInstallResult {
    pub result_code: i32,
    pub extended_result_code: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_results: Option<BTreeMap<String, StepResult>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportingMessage {
    pub state: ReportState,
    pub workflow_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_update_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_install_result: Option<LastInstallResult>,
}

impl ReportingMessage {
    /// Nothing to report: no poll response has produced work yet.
    pub fn idle() -> Self {
        ReportingMessage {
            state: ReportState::Idle,
            workflow_id: String::new(),
            installed_update_id: None,
            last_install_result: None,
        }
    }

    /// A workflow whose `IsInstalled` check came back positive for every
    /// component: no download/install/apply work was needed.
    pub fn already_installed(workflow_id: impl Into<String>, step_results: BTreeMap<String, StepResult>) -> Self {
        ReportingMessage {
            state: ReportState::Idle,
            workflow_id: workflow_id.into(),
            installed_update_id: None,
            last_install_result: Some(LastInstallResult {
                result_code: 0,
                extended_result_code: 0,
                result_details: None,
                step_results: Some(step_results),
            }),
        }
    }

    pub fn download_started(workflow_id: impl Into<String>) -> Self {
        ReportingMessage {
            state: ReportState::DownloadStarted,
            workflow_id: workflow_id.into(),
            installed_update_id: None,
            last_install_result: None,
        }
    }

    pub fn deployment_in_progress(workflow_id: impl Into<String>) -> Self {
        ReportingMessage {
            state: ReportState::DeploymentInProgress,
            workflow_id: workflow_id.into(),
            installed_update_id: None,
            last_install_result: None,
        }
    }

    pub fn succeeded(workflow_id: impl Into<String>, step_results: BTreeMap<String, StepResult>) -> Self {
        let workflow_id = workflow_id.into();
        ReportingMessage {
            installed_update_id: Some(workflow_id.clone()),
            state: ReportState::Succeeded,
            workflow_id,
            last_install_result: Some(LastInstallResult {
                result_code: 0,
                extended_result_code: 0,
                result_details: None,
                step_results: Some(step_results),
            }),
        }
    }

    pub fn failed(workflow_id: impl Into<String>, extended_result_code: i64, result_details: impl Into<String>, step_results: BTreeMap<String, StepResult>) -> Self {
        ReportingMessage {
            state: ReportState::Failed,
            workflow_id: workflow_id.into(),
            installed_update_id: None,
            last_install_result: Some(LastInstallResult {
                result_code: 1,
                extended_result_code,
                result_details: Some(result_details.into()),
                step_results: Some(step_results),
            }),
        }
    }

    /// A `upd_resp` that was rejected outright: a gating violation or a
    /// manifest that failed to parse, before any component ever reached
    /// the worker.
    pub fn rejected(workflow_id: impl Into<String>, reason: impl Into<String>) -> Self {
        ReportingMessage {
            state: ReportState::Failed,
            workflow_id: workflow_id.into(),
            installed_update_id: None,
            last_install_result: Some(LastInstallResult {
                result_code: 1,
                extended_result_code: 0,
                result_details: Some(reason.into()),
                step_results: None,
            }),
        }
    }

    pub fn to_payload(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("ReportingMessage always serializes")
    }
}
