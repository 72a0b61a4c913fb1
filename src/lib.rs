//! # pubsub-node
//!
//! Shared library for a pair of small MQTT nodes: a `publisher` that pushes an
//! incrementing counter to a data topic on a fixed period, and a `subscriber`
//! that drives a digital output pin from messages on a control topic.
//!
//! The MQTT protocol, transport and reconnection machinery all live in
//! `rumqttc`; this crate only owns the connection-and-session lifecycle that
//! sits on top of it:
//!
//! ```text
//! link events ──▶ LinkMonitor ──▶ SessionController ──▶ announce publish
//!                                      │
//! broker events ───────────────────────┤
//!                                      ▼
//! timer ticks ─────────────────▶ Behavior (counter / switch)
//! ```
//!
//! All three event sources are funneled through one dispatch loop (see
//! [`runtime`]), so link state, session state and application state are only
//! ever touched from a single task.

pub mod behavior;
pub mod config;
pub mod link;
pub mod runtime;
pub mod session;
