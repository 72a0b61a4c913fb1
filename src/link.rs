//! Link monitor: bridges link-layer connectivity events into session
//! connect triggers.
//!
//! The link layer itself (association, address acquisition, reassociation
//! after loss) is entirely the operating system's business. This module only
//! observes the discrete events it reports and remembers whether the link is
//! currently usable. No event here is an error and none triggers a retry.

use std::net::IpAddr;
use tracing::{info, warn};

/// Connectivity notification from the external link layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link is associated and has an address.
    AddressAcquired { addr: Option<IpAddr> },
    /// The link went down. Reassociation is the link layer's job.
    Disassociated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connected,
}

/// Tracks the current link state and decides when a broker connection
/// attempt should be triggered.
#[derive(Debug, Default)]
pub struct LinkMonitor {
    state: LinkState,
}

impl LinkMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Processes one link event. Returns `true` when the session layer should
    /// attempt a broker connection.
    pub fn observe(&mut self, event: &LinkEvent) -> bool {
        match event {
            LinkEvent::AddressAcquired { addr } => {
                match addr {
                    Some(addr) => info!("Link up, address {addr}"),
                    None => info!("Link up"),
                }
                self.state = LinkState::Connected;
                true
            }
            LinkEvent::Disassociated => {
                warn!("Link down");
                self.state = LinkState::Disconnected;
                false
            }
        }
    }
}
