//! Publisher behavior: a free-running counter published on a fixed period.

use rumqttc::QoS;
use tracing::{debug, info};

use crate::behavior::Behavior;
use crate::session::Effect;

/// Elapsed-time polling over a wrapping u32 millisecond domain.
///
/// `now.wrapping_sub(last)` stays correct across overflow, so the timer keeps
/// firing on schedule when the tick counter rolls over (about every 49 days).
#[derive(Debug, Clone)]
pub struct PublishTimer {
    period_ms: u32,
    last_ms: u32,
}

impl PublishTimer {
    pub fn new(period_ms: u32) -> Self {
        Self {
            period_ms,
            last_ms: 0,
        }
    }

    /// True once per elapsed period; resets the reference tick when due.
    pub fn due(&mut self, now_ms: u32) -> bool {
        if now_ms.wrapping_sub(self.last_ms) >= self.period_ms {
            self.last_ms = now_ms;
            true
        } else {
            false
        }
    }
}

/// Publishes an incrementing counter to the data topic once per period.
pub struct CounterPublisher {
    topic: String,
    timer: PublishTimer,
    counter: u16,
}

impl CounterPublisher {
    pub fn new(topic: impl Into<String>, interval_ms: u32) -> Self {
        Self {
            topic: topic.into(),
            timer: PublishTimer::new(interval_ms),
            counter: 0,
        }
    }
}

impl Behavior for CounterPublisher {
    fn name(&self) -> &'static str {
        "counter publisher"
    }

    fn on_tick(&mut self, now_ms: u32) -> Vec<Effect> {
        if !self.timer.due(now_ms) {
            return Vec::new();
        }

        // Natural u16 wraparound, no upper-bound handling.
        self.counter = self.counter.wrapping_add(1);
        info!(
            "Publishing counter={} to [{}] (QoS 1)",
            self.counter, self.topic
        );
        vec![Effect::Publish {
            topic: self.topic.clone(),
            qos: QoS::AtLeastOnce,
            retain: false,
            payload: self.counter.to_string().into_bytes(),
        }]
    }

    fn on_message(&mut self, topic: &str, payload: &str, qos: u8) -> Vec<Effect> {
        // The publisher subscribes to nothing; anything delivered anyway is
        // only logged.
        debug!("Unexpected message on [{topic}] (QoS {qos}): {payload}");
        Vec::new()
    }
}
