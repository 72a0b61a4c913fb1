//! Application behaviors layered on top of the session lifecycle.
//!
//! A [`Behavior`] is what makes one node a publisher and the other a
//! subscriber; everything below it (link monitoring, session control, event
//! dispatch) is shared. Behaviors run inside the single dispatch loop, so
//! their hooks must return promptly and may hold their state without locks.

pub mod counter;
pub mod switch;

pub use counter::{CounterPublisher, PublishTimer};
pub use switch::{GpioSwitch, Switch, SwitchSubscriber};

use crate::session::Effect;

/// Hooks the runtime calls into as events are dispatched. All hooks default
/// to doing nothing, so a behavior only implements what it reacts to.
pub trait Behavior: Send + 'static {
    /// Short name for startup logging.
    fn name(&self) -> &'static str;

    /// The broker accepted the session. `session_present` is true when the
    /// broker kept subscription state from a previous session.
    fn on_session_established(&mut self, session_present: bool) -> Vec<Effect> {
        let _ = session_present;
        Vec::new()
    }

    /// Periodic tick with the current monotonic millisecond count. The tick
    /// counter wraps; elapsed-time math must use wrapping subtraction.
    fn on_tick(&mut self, now_ms: u32) -> Vec<Effect> {
        let _ = now_ms;
        Vec::new()
    }

    /// One inbound message, payload already decoded and trimmed.
    fn on_message(&mut self, topic: &str, payload: &str, qos: u8) -> Vec<Effect> {
        let _ = (topic, payload, qos);
        Vec::new()
    }
}
