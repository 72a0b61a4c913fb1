//! Subscriber behavior: maps control-topic messages onto a binary output pin.

use rumqttc::QoS;
use thiserror::Error;
use tracing::{debug, info};

use crate::behavior::Behavior;
use crate::session::Effect;

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("GPIO unavailable: {0}")]
    Gpio(#[from] rppal::gpio::Error),
}

/// A binary actuator with two discrete states and no debouncing.
pub trait Switch: Send + 'static {
    fn set(&mut self, on: bool);
    fn is_on(&self) -> bool;
}

/// Real output pin via the GPIO character device. Initialized off.
pub struct GpioSwitch {
    pin: rppal::gpio::OutputPin,
    on: bool,
}

impl GpioSwitch {
    pub fn new(pin: u8) -> Result<Self, SwitchError> {
        let mut pin = rppal::gpio::Gpio::new()?.get(pin)?.into_output();
        pin.set_low();
        Ok(Self { pin, on: false })
    }
}

impl Switch for GpioSwitch {
    fn set(&mut self, on: bool) {
        if on {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        self.on = on;
    }

    fn is_on(&self) -> bool {
        self.on
    }
}

/// Pure payload mapping for the control topic: `"0"` off, `"1"` on, anything
/// else ignored with no error and no output change.
pub fn control_action(payload: &str) -> Option<bool> {
    match payload {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

/// Subscribes to the control topic and drives the switch from it.
pub struct SwitchSubscriber {
    control_topic: String,
    switch: Box<dyn Switch>,
}

impl SwitchSubscriber {
    pub fn new(control_topic: impl Into<String>, switch: Box<dyn Switch>) -> Self {
        Self {
            control_topic: control_topic.into(),
            switch,
        }
    }
}

impl Behavior for SwitchSubscriber {
    fn name(&self) -> &'static str {
        "switch subscriber"
    }

    fn on_session_established(&mut self, session_present: bool) -> Vec<Effect> {
        // The broker kept our subscriptions from a previous session, no need
        // to ask again.
        if session_present {
            info!(
                "Session resumed, subscription to [{}] already present",
                self.control_topic
            );
            return Vec::new();
        }
        info!("Subscribing to [{}] (QoS 1)", self.control_topic);
        vec![Effect::Subscribe {
            topic: self.control_topic.clone(),
            qos: QoS::AtLeastOnce,
        }]
    }

    fn on_message(&mut self, topic: &str, payload: &str, qos: u8) -> Vec<Effect> {
        if topic != self.control_topic {
            debug!("Ignoring message on [{topic}] (QoS {qos})");
            return Vec::new();
        }
        match control_action(payload) {
            Some(on) => {
                self.switch.set(on);
                info!("LED {}", if on { "ON" } else { "OFF" });
            }
            None => debug!("Ignoring control payload '{payload}'"),
        }
        Vec::new()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::Switch;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Test double that records its state and how often it was driven.
    pub struct RecordingSwitch {
        pub on: Arc<AtomicBool>,
        pub changes: Arc<AtomicUsize>,
    }

    impl RecordingSwitch {
        pub fn new() -> (Self, Arc<AtomicBool>, Arc<AtomicUsize>) {
            let on = Arc::new(AtomicBool::new(false));
            let changes = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    on: on.clone(),
                    changes: changes.clone(),
                },
                on,
                changes,
            )
        }
    }

    impl Switch for RecordingSwitch {
        fn set(&mut self, on: bool) {
            self.on.store(on, Ordering::SeqCst);
            self.changes.fetch_add(1, Ordering::SeqCst);
        }

        fn is_on(&self) -> bool {
            self.on.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::RecordingSwitch;
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn mapping_is_exhaustive() {
        assert_eq!(control_action("0"), Some(false));
        assert_eq!(control_action("1"), Some(true));
        assert_eq!(control_action(""), None);
        assert_eq!(control_action("2"), None);
        assert_eq!(control_action("on"), None);
    }

    #[test]
    fn control_messages_drive_the_switch() {
        let (switch, on, _) = RecordingSwitch::new();
        let mut subscriber = SwitchSubscriber::new("ESP/led", Box::new(switch));

        subscriber.on_message("ESP/led", "1", 1);
        assert!(on.load(Ordering::SeqCst));

        subscriber.on_message("ESP/led", "0", 1);
        assert!(!on.load(Ordering::SeqCst));
    }

    #[test]
    fn unknown_payloads_leave_the_switch_alone() {
        let (switch, on, changes) = RecordingSwitch::new();
        let mut subscriber = SwitchSubscriber::new("ESP/led", Box::new(switch));

        subscriber.on_message("ESP/led", "1", 1);
        subscriber.on_message("ESP/led", "brighter", 1);
        subscriber.on_message("ESP/led", "", 0);

        assert!(on.load(Ordering::SeqCst));
        assert_eq!(changes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn foreign_topics_are_ignored() {
        let (switch, on, changes) = RecordingSwitch::new();
        let mut subscriber = SwitchSubscriber::new("ESP/led", Box::new(switch));

        subscriber.on_message("ESP/other", "1", 1);
        assert!(!on.load(Ordering::SeqCst));
        assert_eq!(changes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn fresh_session_subscribes_resumed_session_does_not() {
        let (switch, _, _) = RecordingSwitch::new();
        let mut subscriber = SwitchSubscriber::new("ESP/led", Box::new(switch));

        let effects = subscriber.on_session_established(false);
        assert_eq!(
            effects,
            vec![Effect::Subscribe {
                topic: "ESP/led".to_string(),
                qos: QoS::AtLeastOnce,
            }]
        );

        assert!(subscriber.on_session_established(true).is_empty());
    }
}
