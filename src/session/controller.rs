use std::fmt;

use rumqttc::{QoS, SubscribeReasonCode};
use tracing::{debug, info, warn};

use crate::link::LinkState;

/// Lifecycle of the one logical broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

/// Why the session ended. Surfaced for observability only; no reason triggers
/// an automatic reconnect from this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    TcpFailure,
    BadProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadCredentials,
    NotAuthorized,
    TlsFailure,
    Unknown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DisconnectReason::TcpFailure => "TCP failure",
            DisconnectReason::BadProtocolVersion => "bad protocol version",
            DisconnectReason::IdentifierRejected => "identifier rejected",
            DisconnectReason::ServerUnavailable => "server unavailable",
            DisconnectReason::BadCredentials => "bad credentials",
            DisconnectReason::NotAuthorized => "not authorized",
            DisconnectReason::TlsFailure => "TLS failure",
            DisconnectReason::Unknown => "unknown",
        };
        write!(f, "{}", text)
    }
}

/// Requested side effect of a state transition. Executed by the runtime
/// against the broker client; the controller itself performs no I/O.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open the broker connection.
    Connect,
    Publish {
        topic: String,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    },
    Subscribe {
        topic: String,
        qos: QoS,
    },
}

/// State machine for the broker session.
///
/// Drives exactly one session: connect requests gated on link state, a single
/// announce publish per established session, and log-only handling of loss
/// and acknowledgment events.
#[derive(Debug)]
pub struct SessionController {
    state: SessionState,
    client_id: String,
    status_topic: String,
}

impl SessionController {
    pub fn new(client_id: impl Into<String>, status_topic: impl Into<String>) -> Self {
        Self {
            state: SessionState::Idle,
            client_id: client_id.into(),
            status_topic: status_topic.into(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Requests a broker connection. No-op unless the link is up and no
    /// attempt is already connecting or connected, so at most one attempt is
    /// ever in flight.
    pub fn connect(&mut self, link: LinkState) -> Vec<Effect> {
        if link != LinkState::Connected {
            warn!("Ignoring connect request, link is down");
            return Vec::new();
        }
        match self.state {
            SessionState::Connecting | SessionState::Connected => {
                debug!(
                    "Ignoring redundant connect request in state {:?}",
                    self.state
                );
                Vec::new()
            }
            SessionState::Idle | SessionState::Disconnected => {
                info!("Starting MQTT connection as '{}'", self.client_id);
                self.state = SessionState::Connecting;
                vec![Effect::Connect]
            }
        }
    }

    /// The broker accepted the session. Emits the announce publish.
    ///
    /// `session_present` tells whether the broker kept subscription state
    /// from an earlier session; it is logged here and forwarded to the
    /// application behavior, which decides whether to re-subscribe.
    pub fn on_established(&mut self, session_present: bool) -> Vec<Effect> {
        info!(
            "{} connected to MQTT (session present: {})",
            self.client_id, session_present
        );
        self.state = SessionState::Connected;

        let announce = format!("{} connected", self.client_id);
        vec![Effect::Publish {
            topic: self.status_topic.clone(),
            qos: QoS::AtLeastOnce,
            retain: false,
            payload: announce.into_bytes(),
        }]
    }

    /// The session ended. Log only; reconnection is driven by the transport's
    /// own retry policy or by the next link trigger.
    pub fn on_lost(&mut self, reason: DisconnectReason) {
        warn!("MQTT disconnected: {}", reason);
        self.state = SessionState::Disconnected;
    }

    /// Subscribe acknowledgment. Packet id 0 signals a failed subscribe
    /// (rejected by the broker or never dispatched); no retry either way.
    pub fn on_subscribe_ack(&self, pkid: u16, codes: &[SubscribeReasonCode]) {
        if pkid == 0 {
            warn!("Subscribe failed");
            return;
        }
        for code in codes {
            match code {
                SubscribeReasonCode::Success(qos) => {
                    info!("Subscribed (packet {pkid}, granted QoS {:?})", qos);
                }
                SubscribeReasonCode::Failure => {
                    warn!("Subscribe rejected by broker (packet {pkid})");
                }
            }
        }
    }

    /// Unsubscribe acknowledgment, same zero/nonzero convention.
    pub fn on_unsubscribe_ack(&self, pkid: u16) {
        if pkid == 0 {
            warn!("Unsubscribe failed");
        } else {
            info!("Unsubscribed (packet {pkid})");
        }
    }

    /// Publish acknowledgment, same zero/nonzero convention. Observational
    /// only; a failed publish is not re-sent.
    pub fn on_publish_ack(&self, pkid: u16) {
        if pkid == 0 {
            warn!("Publish failed");
        } else {
            debug!("Publish acknowledged (packet {pkid})");
        }
    }
}
