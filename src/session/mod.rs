//! # Session Lifecycle
//!
//! Manages the node's single logical session with the MQTT broker.
//!
//! ## Module Architecture
//!
//! ```text
//! session/
//! ├── controller.rs - Session state machine and broker event handling
//! └── status.rs     - Observable session status for diagnostics
//! ```
//!
//! ## Design
//!
//! The controller is a pure state machine: broker events go in, [`Effect`]
//! values come out, and a transport layer elsewhere turns those effects into
//! actual client calls. This keeps the lifecycle rules testable without a
//! broker on the other end:
//!
//! - A connect attempt is only issued while the link is up, and never while
//!   a previous attempt is still connecting or connected.
//! - Every successful connect is announced exactly once on the status topic.
//! - Session loss and acknowledgment failures are surfaced in the log and
//!   nowhere else; recovery is left to the link and transport layers.

pub mod controller;
pub mod status;

pub use controller::{DisconnectReason, Effect, SessionController, SessionState};
pub use status::SessionStatus;
