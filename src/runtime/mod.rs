//! Event dispatch runtime.
//!
//! Everything that can happen to a node is expressed as one [`RuntimeEvent`]:
//! link notifications, broker events translated from the `rumqttc` event
//! loop, and periodic timer ticks. A single dispatcher task consumes them in
//! order, so all link/session/application state has exactly one writer and
//! needs no locking.
//!
//! ```text
//! link events  ─┐
//! broker poll  ─┼──▶ mpsc ──▶ Dispatcher (statum state machine) ──▶ effects
//! ticker       ─┘                                                against the
//!                                                                AsyncClient
//! ```
//!
//! The dispatcher never blocks on the network: effects are queued into the
//! client and acknowledged asynchronously, and the `rumqttc` event loop is
//! polled by its own task (`transport`).

pub mod dispatcher;
pub mod transport;

pub use dispatcher::RuntimeHandle;

use thiserror::Error;
use tokio::task::JoinError;

use crate::link::LinkEvent;
use crate::session::DisconnectReason;

/// Broker-level event, translated from the `rumqttc` event loop.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    Established {
        session_present: bool,
    },
    Lost {
        reason: DisconnectReason,
    },
    SubscribeAck {
        pkid: u16,
        codes: Vec<rumqttc::SubscribeReasonCode>,
    },
    UnsubscribeAck {
        pkid: u16,
    },
    PublishAck {
        pkid: u16,
    },
    Message {
        topic: String,
        payload: Vec<u8>,
        qos: u8,
    },
}

/// One event for the dispatch loop.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    Link(LinkEvent),
    Broker(BrokerEvent),
    Tick { now_ms: u32 },
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// All event producers are gone; the loop cannot make progress.
    #[error("Event channel closed")]
    ChannelClosed,

    /// Cooperative shutdown, not a fault.
    #[error("Runtime stopped")]
    Stopped,

    #[error("Runtime task failed: {0}")]
    Join(#[from] JoinError),
}
