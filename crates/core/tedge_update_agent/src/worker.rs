//! The update worker: a dedicated OS thread that executes one workflow
//! (all of its components, in order) at a time, off the async tick loop.
//!
//! Grounded on `plugin_sm`'s `PluginManager`: applying an update can mean
//! shelling out to a package manager or flashing firmware, both blocking
//! calls with no natural `.await` point, so they run on their own thread
//! rather than as a tokio task that would stall the runtime's worker
//! threads. `WorkQueue` is a thin wrapper around `std::sync::mpsc`
//! precisely because `recv_timeout` gives the "block for up to N, then
//! come back and check for shutdown" behaviour the design calls
//! `GetNextWork(timeout)`.

use std::collections::BTreeMap;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::handler::{ContentHandler, HandlerError, HandlerRegistry, InstallCheck};
use crate::reporting::{ReportingMessage, StepResult};
use crate::workflow::WorkflowHandle;

#[derive(Debug, Clone)]
pub struct WorkItem {
    pub workflow: WorkflowHandle,
}

#[derive(Debug, Clone)]
pub struct WorkResult {
    pub workflow_id: String,
    pub report: ReportingMessage,
}

/// Producer-side handle to the worker's input queue.
pub struct WorkQueue {
    tx: std_mpsc::Sender<WorkItem>,
}

impl WorkQueue {
    pub fn push(&self, item: WorkItem) {
        // The worker thread only ever disconnects on agent shutdown, at
        // which point there is nothing useful left to do with a failed
        // send.
        let _ = self.tx.send(item);
    }
}

const GET_NEXT_WORK_TIMEOUT: Duration = Duration::from_millis(500);

/// Spawns the worker thread, returning the queue producers post work to
/// and the channel results arrive on, plus the thread's join handle.
pub fn spawn(registry: HandlerRegistry) -> (WorkQueue, tokio::sync::mpsc::UnboundedReceiver<WorkResult>, JoinHandle<()>) {
    let (work_tx, work_rx) = std_mpsc::channel::<WorkItem>();
    let (result_tx, result_rx) = tokio::sync::mpsc::unbounded_channel::<WorkResult>();

    let handle = std::thread::Builder::new()
        .name("tedge-update-worker".to_string())
        .spawn(move || run(registry, work_rx, result_tx))
        .expect("failed to spawn update worker thread");

    (WorkQueue { tx: work_tx }, result_rx, handle)
}

fn run(
    registry: HandlerRegistry,
    work_rx: std_mpsc::Receiver<WorkItem>,
    result_tx: tokio::sync::mpsc::UnboundedSender<WorkResult>,
) {
    let mut last_completed_workflow_id: Option<String> = None;

    loop {
        match work_rx.recv_timeout(GET_NEXT_WORK_TIMEOUT) {
            Ok(item) => {
                if last_completed_workflow_id.as_deref() == Some(item.workflow.workflow_id.as_str()) {
                    // A duplicate delivery of a workflow already finished;
                    // ignore rather than re-run or re-report it.
                    continue;
                }

                let report = process_workflow(&registry, &item.workflow);
                last_completed_workflow_id = Some(item.workflow.workflow_id.clone());

                let result = WorkResult {
                    workflow_id: item.workflow.workflow_id,
                    report,
                };
                if result_tx.send(result).is_err() {
                    return;
                }
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std_mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Walks every component of a workflow through
/// `IsInstalled → Download → Install → Apply`, aggregating one step
/// result per component. The first failing stage stops the whole
/// workflow; a component already installed skips straight past
/// download/install/apply.
fn process_workflow(registry: &HandlerRegistry, workflow: &WorkflowHandle) -> ReportingMessage {
    let mut step_results = BTreeMap::new();
    let mut any_work_done = false;

    for (index, component) in workflow.components.iter().enumerate() {
        let step_key = format!("step_{index}");

        let handler = match registry.get(&component.handler) {
            Some(handler) => handler,
            None => {
                let error = HandlerError::new(0, format!("no content handler registered for '{}'", component.handler));
                step_results.insert(step_key, StepResult::from_error(&error));
                return ReportingMessage::failed(workflow.workflow_id.clone(), error.extended_result_code, error.message, step_results);
            }
        };

        match handler.is_installed(component) {
            Ok(InstallCheck::Installed) => {
                step_results.insert(step_key, StepResult::ok());
                continue;
            }
            Ok(InstallCheck::NotInstalled) => {}
            Err(error) => {
                step_results.insert(step_key, StepResult::from_error(&error));
                return ReportingMessage::failed(workflow.workflow_id.clone(), error.extended_result_code, error.message, step_results);
            }
        }

        any_work_done = true;

        if let Err(error) = run_stage(handler, component, ContentHandler::download) {
            step_results.insert(step_key, StepResult::from_error(&error));
            return ReportingMessage::failed(workflow.workflow_id.clone(), error.extended_result_code, error.message, step_results);
        }
        if let Err(error) = run_stage(handler, component, ContentHandler::install) {
            step_results.insert(step_key, StepResult::from_error(&error));
            return ReportingMessage::failed(workflow.workflow_id.clone(), error.extended_result_code, error.message, step_results);
        }
        if let Err(error) = run_stage(handler, component, ContentHandler::apply) {
            step_results.insert(step_key, StepResult::from_error(&error));
            return ReportingMessage::failed(workflow.workflow_id.clone(), error.extended_result_code, error.message, step_results);
        }

        step_results.insert(step_key, StepResult::ok());
    }

    if any_work_done {
        ReportingMessage::succeeded(workflow.workflow_id.clone(), step_results)
    } else {
        ReportingMessage::already_installed(workflow.workflow_id.clone(), step_results)
    }
}

fn run_stage(
    handler: &dyn ContentHandler,
    component: &crate::workflow::ComponentManifest,
    stage: fn(&dyn ContentHandler, &crate::workflow::ComponentManifest) -> Result<(), HandlerError>,
) -> Result<(), HandlerError> {
    stage(handler, component)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::GenericHandler;
    use crate::workflow::ComponentManifest;

    fn workflow(workflow_id: &str) -> WorkflowHandle {
        WorkflowHandle {
            workflow_id: workflow_id.to_string(),
            components: vec![ComponentManifest {
                component_id: "fw".to_string(),
                handler: "generic".to_string(),
                properties: serde_json::Value::Null,
            }],
        }
    }

    #[test]
    fn processes_a_pushed_workflow_and_reports_success() {
        let mut registry = HandlerRegistry::new();
        registry.register(Box::new(GenericHandler));
        let (queue, mut results, _handle) = spawn(registry);

        queue.push(WorkItem { workflow: workflow("wf-1") });

        let result = results.blocking_recv().expect("worker should produce a result");
        assert_eq!(result.workflow_id, "wf-1");
        assert_eq!(result.report.state, crate::reporting::ReportState::Succeeded);
    }

    #[test]
    fn a_duplicate_workflow_id_is_silently_ignored() {
        let mut registry = HandlerRegistry::new();
        registry.register(Box::new(GenericHandler));
        let (queue, mut results, _handle) = spawn(registry);

        queue.push(WorkItem { workflow: workflow("wf-1") });
        let first = results.blocking_recv().unwrap();
        assert_eq!(first.workflow_id, "wf-1");

        queue.push(WorkItem { workflow: workflow("wf-1") });
        queue.push(WorkItem { workflow: workflow("wf-2") });

        let second = results.blocking_recv().unwrap();
        assert_eq!(second.workflow_id, "wf-2");
    }

    #[test]
    fn unregistered_handler_fails_the_workflow() {
        let registry = HandlerRegistry::new();
        let mut wf = workflow("wf-3");
        wf.components[0].handler = "firmware".to_string();
        let report = process_workflow(&registry, &wf);
        assert_eq!(report.state, crate::reporting::ReportState::Failed);
    }
}
