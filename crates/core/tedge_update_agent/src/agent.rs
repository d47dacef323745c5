//! `AgentCore`: wires the state store, MQTT channel, the three topic
//! modules and the update worker into one tick loop.
//!
//! This is the one place in the crate that deliberately does *not*
//! follow `tedge_actors`: the design calls for a single struct driven
//! by an explicit tick, not a graph of actors exchanging messages
//! through mailboxes. Every other module here is still built the way
//! the rest of thin-edge.io builds things; this is just the seam where
//! the two styles would otherwise collide.

use std::sync::Arc;
use std::time::Duration;

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::mqtt::channel::MqttChannel;
use crate::operation;
use crate::persist::StateRepository;
use crate::restart;
use crate::router;
use crate::state_store::{StateSnapshot, StateStore};
use crate::topics;
use crate::topics::{AgentInfoOperation, EnrollmentOperation, UpdateRequestOperation};
use crate::worker;

const TICK_PERIOD: Duration = Duration::from_millis(100);

pub struct AgentCore {
    config: AgentConfig,
    store: Arc<StateStore>,
    state_repo: StateRepository,
}

impl AgentCore {
    pub fn new(config: AgentConfig, snapshot: StateSnapshot) -> Self {
        let state_repo = StateRepository::new(config.state_dir.clone());
        AgentCore {
            store: Arc::new(StateStore::from_snapshot(snapshot)),
            config,
            state_repo,
        }
    }

    /// Runs the agent until a termination signal arrives. With `once`
    /// set, runs exactly one tick and returns: used by integration tests
    /// that want to control the clock themselves instead of running
    /// forever.
    pub async fn run(mut self, once: bool) -> Result<(), AgentError> {
        let client_id = format!(
            "tedge-update-agent-{}",
            self.store.external_device_id().unwrap_or_else(|| whoami::fallible::hostname().unwrap_or_else(|_| "unknown".to_string()))
        );
        let (mut channel, _event_loop_handle) =
            MqttChannel::connect(&client_id, &self.config.mqtt_broker, topics::ENROLLMENT_RESPONSE_TOPIC.to_string())?;

        let registry = crate::handler::HandlerRegistry::new();
        let mut registry = registry;
        registry.register(Box::new(crate::handler::GenericHandler));
        let (work_queue, mut work_results, _worker_handle) = worker::spawn(registry);
        self.store.set_work_queue(Arc::new(work_queue));

        let now = clock::WallClock.now();
        let mut enrollment = EnrollmentOperation::new(
            now,
            self.config.manufacturer.clone(),
            self.config.model.clone(),
            self.config.additional_device_properties.clone(),
            self.config.enr_req.clone(),
        );
        let mut agent_info: Option<AgentInfoOperation> = None;
        let mut update_request: Option<UpdateRequestOperation> = None;

        match restart::has_rebooted(&self.config.state_dir) {
            Ok(true) => tracing::info!("Device has rebooted since the agent last ran"),
            Ok(false) => {}
            Err(error) => tracing::warn!(%error, "Could not determine whether the device has rebooted"),
        }
        if let Err(error) = restart::create_restart_marker(&self.config.state_dir) {
            tracing::warn!(%error, "Could not write the restart marker file");
        }

        let mut last_persisted = self.store.snapshot();
        let mut term_signals = tedge_utils::signals::TermSignals::new(None);
        let mut interval = tokio::time::interval(TICK_PERIOD);

        loop {
            let tick = term_signals.might_interrupt(interval.tick()).await;
            if tick.is_err() {
                tracing::info!("Received termination signal, shutting down");
                break;
            }

            self.tick(&mut channel, &mut enrollment, &mut agent_info, &mut update_request, &mut work_results)
                .await?;

            let snapshot = self.store.snapshot();
            if snapshot != last_persisted {
                self.state_repo.store(&snapshot).await?;
                last_persisted = snapshot;
            }

            if once {
                break;
            }
        }

        Ok(())
    }

    async fn tick(
        &self,
        channel: &mut MqttChannel,
        enrollment: &mut EnrollmentOperation,
        agent_info: &mut Option<AgentInfoOperation>,
        update_request: &mut Option<UpdateRequestOperation>,
        work_results: &mut tokio::sync::mpsc::UnboundedReceiver<worker::WorkResult>,
    ) -> Result<(), AgentError> {
        let now = clock::WallClock.now();
        let inbound = channel.tick(std::time::Instant::now()).await;

        if !self.store.is_device_enrolled() {
            enrollment.request(now);
        }
        operation::tick(enrollment, now, channel).await;

        if agent_info.is_none() {
            if let Some(device_id) = self.store.external_device_id() {
                let prefix = topics::device_scoped_prefix(&device_id);
                let _ = channel
                    .subscribe_additional(topics::agent_info_response_topic(&prefix))
                    .await;
                let _ = channel.subscribe_additional(topics::update_response_topic(&prefix)).await;

                *agent_info = Some(AgentInfoOperation::new(
                    now,
                    &prefix,
                    self.service_instance_name(),
                    self.config.manufacturer.clone(),
                    self.config.model.clone(),
                    self.config.additional_device_properties.clone(),
                    self.config.ainfo_req.clone(),
                ));
                *update_request = Some(UpdateRequestOperation::new(now, &prefix, self.config.upd_req.clone()));
            }
        }

        if let Some(agent_info) = agent_info.as_mut() {
            if !self.store.is_agent_info_reported() {
                agent_info.request(now);
            }
            operation::tick(agent_info, now, channel).await;
        }

        for msg in &inbound {
            match (agent_info.as_mut(), update_request.as_mut()) {
                (Some(agent_info), Some(update_request)) => {
                    let work_queue = self.store.work_queue().expect("work queue set before first tick");
                    router::route(msg, now, &self.store, enrollment, agent_info, update_request, &work_queue);
                }
                _ => {
                    if msg.has_valid_protocol_id() {
                        enrollment.handle_response(msg, &self.store);
                    }
                }
            }
        }

        while let Ok(result) = work_results.try_recv() {
            if let Some(update_request) = update_request.as_mut() {
                update_request.handle_work_result(result.workflow_id, result.report);
            }
        }

        if let Some(update_request) = update_request.as_mut() {
            if update_request.is_ready_to_poll(now) {
                update_request.request(now);
            }
            operation::tick(update_request, now, channel).await;
        }

        Ok(())
    }

    fn service_instance_name(&self) -> String {
        format!("{}-{}", self.config.manufacturer, self.config.model).to_lowercase()
    }
}
