//! Glue between the `rumqttc` event loop and the dispatch channel.
//!
//! The client library owns the wire protocol, TCP transport and keep-alive
//! handling. This module builds the client from our config, polls the event
//! loop in a dedicated task, and translates the packets the lifecycle cares
//! about into [`BrokerEvent`]s.

use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::runtime::{BrokerEvent, RuntimeEvent};
use crate::session::DisconnectReason;

/// Pause between polls after a connection error, so a dead broker does not
/// spin the loop. Retrying at all is the client library's own policy; the
/// dispatch layer never re-issues anything.
const RECONNECT_PAUSE: Duration = Duration::from_secs(2);

/// Request queue depth towards the client.
pub(crate) const CLIENT_CAPACITY: usize = 100;

/// Builds the broker client. No connection is attempted until the returned
/// event loop is polled.
pub fn broker_client(config: &NodeConfig) -> (AsyncClient, EventLoop) {
    let mut options = MqttOptions::new(
        config.broker.client_id.clone(),
        config.broker.host.clone(),
        config.broker.port,
    );
    options.set_keep_alive(Duration::from_secs(config.broker.keep_alive_secs));
    if let (Some(user), Some(password)) = (&config.broker.username, &config.broker.password) {
        options.set_credentials(user.clone(), password.clone());
    }

    AsyncClient::new(options, CLIENT_CAPACITY)
}

/// Polls the event loop until shutdown, forwarding translated events into the
/// dispatch channel. Handing the event loop to this task is what actually
/// opens the connection.
pub async fn poll_broker(
    mut eventloop: EventLoop,
    events: mpsc::Sender<RuntimeEvent>,
    cancel: CancellationToken,
) {
    info!("Opening broker connection");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Broker poll task stopping");
                return;
            }
            polled = eventloop.poll() => match polled {
                Ok(event) => {
                    if let Some(broker_event) = translate(&event) {
                        if events.send(RuntimeEvent::Broker(broker_event)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(error) => {
                    warn!("MQTT connection error: {error}");
                    let reason = classify(&error);
                    if events
                        .send(RuntimeEvent::Broker(BrokerEvent::Lost { reason }))
                        .await
                        .is_err()
                    {
                        return;
                    }
                    tokio::time::sleep(RECONNECT_PAUSE).await;
                }
            }
        }
    }
}

/// Maps an event-loop event onto the lifecycle's broker events. Outgoing
/// traffic and protocol chatter (pings, QoS 2 legs) are not ours to handle.
pub fn translate(event: &Event) -> Option<BrokerEvent> {
    match event {
        Event::Incoming(Packet::ConnAck(ack)) => Some(BrokerEvent::Established {
            session_present: ack.session_present,
        }),
        Event::Incoming(Packet::SubAck(ack)) => Some(BrokerEvent::SubscribeAck {
            pkid: ack.pkid,
            codes: ack.return_codes.clone(),
        }),
        Event::Incoming(Packet::UnsubAck(ack)) => {
            Some(BrokerEvent::UnsubscribeAck { pkid: ack.pkid })
        }
        Event::Incoming(Packet::PubAck(ack)) => Some(BrokerEvent::PublishAck { pkid: ack.pkid }),
        Event::Incoming(Packet::Publish(publish)) => Some(BrokerEvent::Message {
            topic: publish.topic.clone(),
            payload: publish.payload.to_vec(),
            qos: publish.qos as u8,
        }),
        Event::Incoming(Packet::Disconnect) => Some(BrokerEvent::Lost {
            reason: DisconnectReason::Unknown,
        }),
        _ => None,
    }
}

/// Classifies a connection error into the fixed disconnect-reason taxonomy.
pub fn classify(error: &ConnectionError) -> DisconnectReason {
    match error {
        ConnectionError::Io(_)
        | ConnectionError::NetworkTimeout
        | ConnectionError::FlushTimeout => DisconnectReason::TcpFailure,
        ConnectionError::Tls(_) => DisconnectReason::TlsFailure,
        ConnectionError::ConnectionRefused(code) => match code {
            ConnectReturnCode::RefusedProtocolVersion => DisconnectReason::BadProtocolVersion,
            ConnectReturnCode::BadClientId => DisconnectReason::IdentifierRejected,
            ConnectReturnCode::ServiceUnavailable => DisconnectReason::ServerUnavailable,
            ConnectReturnCode::BadUserNamePassword => DisconnectReason::BadCredentials,
            ConnectReturnCode::NotAuthorized => DisconnectReason::NotAuthorized,
            _ => DisconnectReason::Unknown,
        },
        _ => DisconnectReason::Unknown,
    }
}
