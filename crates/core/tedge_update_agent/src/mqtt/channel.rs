//! The MQTT v5 channel: connection lifecycle, publish/subscribe, and
//! classifying broker responses into retry categories.
//!
//! Grounded on `mqtt_channel`'s `Connection`: a background task owns the
//! actual network I/O (`rumqttc`'s event loop insists on driving itself to
//! completion continuously) and forwards everything interesting to the
//! foreground over a channel. The foreground side stays a plain struct
//! with a `tick` method rather than an actor: `tedge_actors`'s mailboxes
//! are built for a graph of independent services passing typed messages,
//! and here there is exactly one writer and one synchronous-feeling
//! consumer, so a `tokio::sync::mpsc` queue drained every tick is simpler
//! and avoids depending on a second async-runtime abstraction on top of
//! `tokio`.

use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, DisconnectReasonCode, Publish, PublishProperties, PubAckReason};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop, Incoming, MqttOptions};
use rumqttc::{TlsConfiguration, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::MqttBrokerConfig;
use crate::error::AgentError;
use crate::mqtt::message::InboundMessage;
use crate::operation::RetryCategory;

fn build_tls_config(broker: &MqttBrokerConfig) -> Result<rustls::ClientConfig, AgentError> {
    let mut root_store = if broker.use_os_certs {
        certificate::parse_root_certificate::root_store_from_os_certs()?
    } else {
        rustls::RootCertStore::empty()
    };

    if let Some(ca_file) = &broker.ca_file {
        certificate::parse_root_certificate::add_certs_from_file(&mut root_store, ca_file)?;
    }
    if let Some(ca_dir) = &broker.ca_dir {
        certificate::parse_root_certificate::add_certs_from_directory(&mut root_store, ca_dir)?;
    }

    let builder = rustls::ClientConfig::builder().with_root_certificates(root_store);

    let config = match (&broker.client_cert_file, &broker.client_key_file) {
        (Some(cert_file), Some(key_file)) => {
            let chain = certificate::parse_root_certificate::read_cert_chain(cert_file)?;
            let key = certificate::parse_root_certificate::read_pvt_key(key_file)?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(certificate::CertificateError::Rustls)?
        }
        _ => builder.with_no_client_auth(),
    };

    Ok(config)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unknown,
    Connecting,
    Connected,
    Disconnected,
}

/// How badly a disconnect or connection error should worry the agent.
///
/// Mirrors how [`crate::operation::RetryCategory`] splits failures, but at
/// the transport layer: network blips and "broker restarting" deserve a
/// plain reconnect-and-retry, while "bad credentials" or "not authorized"
/// will never succeed by trying again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCategory {
    Transient,
    NonRecoverable,
    Other,
}

pub fn classify_disconnect(reason: DisconnectReasonCode) -> DisconnectCategory {
    use DisconnectReasonCode::*;
    match reason {
        NormalDisconnection | ServerShuttingDown | KeepAliveTimeout | ServerBusy | ConnectionRateExceeded => {
            DisconnectCategory::Transient
        }
        NotAuthorized | BadAuthenticationMethod | TopicNameInvalid | PacketTooLarge | PayloadFormatInvalid => {
            DisconnectCategory::NonRecoverable
        }
        _ => DisconnectCategory::Other,
    }
}

pub fn classify_connect_failure(code: ConnectReturnCode) -> DisconnectCategory {
    use ConnectReturnCode::*;
    match code {
        Success => DisconnectCategory::Other,
        ServerBusy | ServerUnavailable | ServerShuttingDown => DisconnectCategory::Transient,
        NotAuthorized | BadUserNamePassword | Banned | ClientIdentifierNotValid => DisconnectCategory::NonRecoverable,
        _ => DisconnectCategory::Other,
    }
}

/// Maps the reason code on a QoS-1 PUBACK to the retry category the
/// operation that sent the publish should use.
pub fn classify_puback(reason: PubAckReason) -> Result<(), RetryCategory> {
    use PubAckReason::*;
    match reason {
        Success | NoMatchingSubscribers => Ok(()),
        UnspecifiedError | ImplementationSpecificError | QuotaExceeded => Err(RetryCategory::ServiceTransient),
        NotAuthorized | TopicNameInvalid | PayloadFormatInvalid => Err(RetryCategory::NonRecoverable),
        PacketIdentifierInUse => Err(RetryCategory::ClientTransient),
    }
}

/// Something that happened on the wire, picked off the background event
/// loop task and handed to [`MqttChannel::tick`].
pub enum ChannelEvent {
    ConnAck { code: ConnectReturnCode },
    SubAck,
    PubAck { pkid: u16, reason: PubAckReason },
    Publish(InboundMessage),
    Disconnect { reason: DisconnectReasonCode },
    ConnectionError(String),
}

pub struct MqttChannel {
    state: ChannelState,
    client: AsyncClient,
    events_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    subscribe_filter: String,
    subscribed: bool,
    suppressed_until: Option<std::time::Instant>,
}

const DOWORK_SUPPRESSION: Duration = Duration::from_secs(60);
/// Bounds how many queued events a single tick drains, keeping each tick
/// bounded the way a fixed-size poll of the underlying library would be.
const MAX_EVENTS_PER_TICK: usize = 64;

impl MqttChannel {
    pub fn connect(
        client_id: &str,
        broker: &MqttBrokerConfig,
        subscribe_filter: String,
    ) -> Result<(Self, JoinHandle<()>), crate::error::AgentError> {
        let mut options = MqttOptions::new(client_id, broker.host.clone(), broker.port);
        options.set_keep_alive(Duration::from_secs(broker.keep_alive_secs));
        options.set_clean_start(true);

        if let (Some(username), Some(password)) = (&broker.username, &broker.password) {
            options.set_credentials(username.clone(), password.clone());
        }

        let wants_tls = broker.use_os_certs || broker.ca_file.is_some() || broker.ca_dir.is_some();
        if wants_tls {
            let tls_config = build_tls_config(broker)?;
            options.set_transport(Transport::Tls(TlsConfiguration::Rustls(Arc::new(tls_config))));
        }

        let (client, event_loop) = AsyncClient::new(options, 64);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_event_loop(event_loop, events_tx));

        Ok((
            MqttChannel {
                state: ChannelState::Unknown,
                client,
                events_rx,
                subscribe_filter,
                subscribed: false,
                suppressed_until: None,
            },
            handle,
        ))
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Drains whatever the background event-loop task has queued up,
    /// bounded so a burst of traffic can't starve the rest of the tick.
    ///
    /// Returns the inbound publishes that arrived this tick; connection
    /// lifecycle events are applied to `self.state` directly.
    pub async fn tick(&mut self, now: std::time::Instant) -> Vec<InboundMessage> {
        let mut inbound = Vec::new();

        if let Some(until) = self.suppressed_until {
            if now < until {
                return inbound;
            }
            self.suppressed_until = None;
        }

        for _ in 0..MAX_EVENTS_PER_TICK {
            let event = match self.events_rx.try_recv() {
                Ok(event) => event,
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.state = ChannelState::Disconnected;
                    break;
                }
            };

            match event {
                ChannelEvent::ConnAck { code } => {
                    if matches!(code, ConnectReturnCode::Success) {
                        self.state = ChannelState::Connected;
                        if !self.subscribed {
                            let _ = self
                                .client
                                .subscribe(self.subscribe_filter.clone(), QoS::AtMostOnce)
                                .await;
                        }
                    } else if classify_connect_failure(code) == DisconnectCategory::NonRecoverable {
                        self.state = ChannelState::Disconnected;
                        self.suppressed_until = Some(now + DOWORK_SUPPRESSION);
                    } else {
                        self.state = ChannelState::Connecting;
                    }
                }
                ChannelEvent::SubAck => self.subscribed = true,
                ChannelEvent::Publish(msg) => inbound.push(msg),
                ChannelEvent::Disconnect { reason } => {
                    self.state = ChannelState::Disconnected;
                    self.subscribed = false;
                    if classify_disconnect(reason) == DisconnectCategory::NonRecoverable {
                        self.suppressed_until = Some(now + DOWORK_SUPPRESSION);
                    }
                }
                ChannelEvent::ConnectionError(_) => {
                    self.state = ChannelState::Disconnected;
                    self.subscribed = false;
                }
                ChannelEvent::PubAck { pkid, reason } => {
                    // A PUBACK only confirms the broker accepted the publish
                    // at the transport level; the topic modules correlate
                    // their actual request/response pairs through the
                    // `pid`/correlation-data user properties on the next
                    // inbound message, not through the MQTT packet id. A
                    // failing reason here is still worth logging since it
                    // explains a request that otherwise looks like it just
                    // timed out.
                    if let Err(category) = classify_puback(reason) {
                        tracing::warn!(pkid, ?category, ?reason, "publish was not accepted by the broker");
                    }
                }
            }
        }

        if matches!(self.state, ChannelState::Unknown) {
            self.state = ChannelState::Connecting;
        }

        inbound
    }

    /// Subscribes to an additional filter discovered at runtime, e.g. the
    /// device-scoped topics that only become known once enrollment
    /// completes.
    pub async fn subscribe_additional(&self, topic_filter: String) -> Result<(), rumqttc::v5::ClientError> {
        self.client.subscribe(topic_filter, QoS::AtMostOnce).await
    }

    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        user_properties: Vec<(String, String)>,
        content_type: Option<String>,
        correlation_data: Option<Bytes>,
    ) -> Result<(), rumqttc::v5::ClientError> {
        let properties = PublishProperties {
            correlation_data,
            content_type,
            user_properties,
            ..Default::default()
        };
        self.client
            .publish_with_properties(topic, QoS::AtLeastOnce, false, payload, properties)
            .await
    }
}

async fn run_event_loop(mut event_loop: EventLoop, events_tx: mpsc::UnboundedSender<ChannelEvent>) {
    loop {
        let notification = match event_loop.poll().await {
            Ok(notification) => notification,
            Err(error) => {
                if events_tx.send(ChannelEvent::ConnectionError(error.to_string())).is_err() {
                    return;
                }
                continue;
            }
        };

        let event = match notification {
            Event::Incoming(Incoming::ConnAck(connack)) => Some(ChannelEvent::ConnAck { code: connack.code }),
            Event::Incoming(Incoming::SubAck(_)) => Some(ChannelEvent::SubAck),
            Event::Incoming(Incoming::PubAck(puback)) => Some(ChannelEvent::PubAck {
                pkid: puback.pkid,
                reason: puback.reason,
            }),
            Event::Incoming(Incoming::Publish(publish)) => Some(ChannelEvent::Publish(inbound_from_publish(publish))),
            Event::Incoming(Incoming::Disconnect(disconnect)) => Some(ChannelEvent::Disconnect {
                reason: disconnect.reason_code,
            }),
            _ => None,
        };

        if let Some(event) = event {
            if events_tx.send(event).is_err() {
                return;
            }
        }
    }
}

fn inbound_from_publish(publish: Publish) -> InboundMessage {
    let properties = publish.properties.unwrap_or_default();
    InboundMessage::from_parts(
        String::from_utf8_lossy(&publish.topic).into_owned(),
        publish.payload,
        properties.user_properties,
        properties.content_type,
        properties.correlation_data,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_disconnect_reasons_are_classified_transient() {
        assert_eq!(
            classify_disconnect(DisconnectReasonCode::KeepAliveTimeout),
            DisconnectCategory::Transient
        );
    }

    #[test]
    fn auth_disconnect_reasons_are_non_recoverable() {
        assert_eq!(
            classify_disconnect(DisconnectReasonCode::NotAuthorized),
            DisconnectCategory::NonRecoverable
        );
    }

    #[test]
    fn successful_puback_is_not_a_retry_category() {
        assert!(classify_puback(PubAckReason::Success).is_ok());
    }

    #[test]
    fn quota_exceeded_puback_is_service_transient() {
        assert_eq!(
            classify_puback(PubAckReason::QuotaExceeded),
            Err(RetryCategory::ServiceTransient)
        );
    }

    #[test]
    fn not_authorized_puback_is_non_recoverable() {
        assert_eq!(
            classify_puback(PubAckReason::NotAuthorized),
            Err(RetryCategory::NonRecoverable)
        );
    }
}
