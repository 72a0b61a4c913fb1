use chrono::{DateTime, Local};

use crate::link::LinkState;
use crate::session::SessionState;

/// Snapshot of the session for diagnostics, broadcast over a watch channel
/// by the runtime after every dispatched event.
#[derive(Debug, Clone, Default)]
pub struct SessionStatus {
    pub link_state: LinkState,
    pub session_state: SessionState,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_error: Option<String>,
    pub last_activity: Option<DateTime<Local>>,
}

impl SessionStatus {
    pub fn touch(&mut self) {
        self.last_activity = Some(Local::now());
    }
}
