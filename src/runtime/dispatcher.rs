//! The dispatch state machine and the handle that runs it.
//!
//! One cycle of the machine consumes one [`RuntimeEvent`]:
//!
//! ```text
//! Waiting ──next_event──▶ Dispatching ──dispatch──▶ Executing ──execute──▶ Waiting
//! ```
//!
//! `dispatch` is where all state lives: it feeds the event to the link
//! monitor, session controller and behavior, collecting the effects they
//! request. `execute` then runs those effects against the broker client.
//! Since the whole cycle happens on one task, none of that state is shared.

use std::time::{Duration, Instant};

use rumqttc::{AsyncClient, EventLoop};
use statum::{machine, state};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::behavior::Behavior;
use crate::config::NodeConfig;
use crate::link::{LinkEvent, LinkMonitor};
use crate::runtime::{transport, BrokerEvent, RuntimeError, RuntimeEvent};
use crate::session::{Effect, SessionController, SessionStatus};

/// Granularity of the periodic tick fed to behaviors.
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Depth of the runtime event queue.
const EVENT_QUEUE_DEPTH: usize = 100;

/// Effects collected from one dispatched event.
#[derive(Debug, Clone, Default)]
pub struct EffectBatch {
    pub effects: Vec<Effect>,
}

#[state]
#[derive(Debug, Clone)]
pub enum DispatchState {
    Waiting,
    Dispatching(RuntimeEvent),
    Executing(EffectBatch),
}

#[machine]
pub struct Dispatcher<S: DispatchState> {
    event_rx: mpsc::Receiver<RuntimeEvent>,
    event_tx: mpsc::Sender<RuntimeEvent>,
    link: LinkMonitor,
    session: SessionController,
    behavior: Box<dyn Behavior>,
    client: AsyncClient,
    // Taken by the broker poll task on the first Connect effect; None while
    // the connection is running, which is the "one attempt in flight" guard.
    eventloop: Option<EventLoop>,
    status: SessionStatus,
    status_tx: watch::Sender<SessionStatus>,
    cancel: CancellationToken,
}

impl Dispatcher<Waiting> {
    pub fn create(
        config: &NodeConfig,
        behavior: Box<dyn Behavior>,
        event_tx: mpsc::Sender<RuntimeEvent>,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        status_tx: watch::Sender<SessionStatus>,
        cancel: CancellationToken,
    ) -> Self {
        let (client, eventloop) = transport::broker_client(config);
        let session =
            SessionController::new(&config.broker.client_id, &config.topics.status);
        debug!(
            "Created dispatcher for broker {}:{}",
            config.broker.host, config.broker.port
        );

        Self::new(
            event_rx,
            event_tx,
            LinkMonitor::new(),
            session,
            behavior,
            client,
            Some(eventloop),
            SessionStatus::default(),
            status_tx,
            cancel,
        )
    }

    /// Waits for the next event or for shutdown.
    pub async fn next_event(mut self) -> Result<Dispatcher<Dispatching>, RuntimeError> {
        let cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Dispatcher received shutdown");
                Err(RuntimeError::Stopped)
            }
            received = self.event_rx.recv() => match received {
                Some(event) => Ok(self.transition_with(event)),
                None => Err(RuntimeError::ChannelClosed),
            }
        }
    }
}

impl Dispatcher<Dispatching> {
    /// Routes the event through link monitor, session controller and
    /// behavior, collecting the effects they request.
    pub fn dispatch(mut self) -> Result<Dispatcher<Executing>, RuntimeError> {
        let event = match self.get_state_data() {
            Some(event) => event.clone(),
            None => {
                warn!("No event in state data, this should not happen");
                return Ok(self.transition_with(EffectBatch::default()));
            }
        };

        let mut effects = Vec::new();
        match event {
            RuntimeEvent::Link(link_event) => {
                if self.link.observe(&link_event) {
                    effects.extend(self.session.connect(self.link.state()));
                }
            }
            RuntimeEvent::Broker(broker_event) => match broker_event {
                BrokerEvent::Established { session_present } => {
                    effects.extend(self.session.on_established(session_present));
                    effects.extend(self.behavior.on_session_established(session_present));
                    // A healthy session supersedes whatever fault ended the
                    // previous one.
                    self.status.last_error = None;
                    self.status.touch();
                }
                BrokerEvent::Lost { reason } => {
                    self.session.on_lost(reason);
                    self.status.last_error = Some(reason.to_string());
                }
                BrokerEvent::SubscribeAck { pkid, codes } => {
                    self.session.on_subscribe_ack(pkid, &codes);
                }
                BrokerEvent::UnsubscribeAck { pkid } => {
                    self.session.on_unsubscribe_ack(pkid);
                }
                BrokerEvent::PublishAck { pkid } => {
                    self.session.on_publish_ack(pkid);
                }
                BrokerEvent::Message {
                    topic,
                    payload,
                    qos,
                } => {
                    let text = String::from_utf8_lossy(&payload);
                    let trimmed = text.trim();
                    info!("Message received [{topic}] (QoS {qos}): {trimmed}");
                    self.status.messages_received += 1;
                    self.status.touch();
                    effects.extend(self.behavior.on_message(&topic, trimmed, qos));
                }
            },
            RuntimeEvent::Tick { now_ms } => {
                effects.extend(self.behavior.on_tick(now_ms));
            }
        }

        self.status.link_state = self.link.state();
        self.status.session_state = self.session.state();

        Ok(self.transition_with(EffectBatch { effects }))
    }
}

impl Dispatcher<Executing> {
    /// Runs the collected effects against the broker client and publishes a
    /// status snapshot.
    ///
    /// Effects are fire-and-forget: requests are queued into the client
    /// without waiting, and a full queue (broker down, nothing draining it)
    /// is the same local failure a zero packet id signals, so it is logged
    /// and never retried. The dispatch loop itself must never stall here.
    pub fn execute(mut self) -> Dispatcher<Waiting> {
        let batch = self.get_state_data().cloned().unwrap_or_default();

        for effect in batch.effects {
            match effect {
                Effect::Connect => self.start_poller(),
                Effect::Publish {
                    topic,
                    qos,
                    retain,
                    payload,
                } => match self.client.try_publish(topic, qos, retain, payload) {
                    Ok(()) => {
                        self.status.messages_sent += 1;
                        self.status.touch();
                    }
                    Err(error) => warn!("Publish failed: {error}"),
                },
                Effect::Subscribe { topic, qos } => {
                    if let Err(error) = self.client.try_subscribe(topic, qos) {
                        warn!("Subscribe failed: {error}");
                    }
                }
            }
        }

        // Nobody listening to status is fine.
        let _ = self.status_tx.send(self.status.clone());

        self.transition()
    }

    fn start_poller(&mut self) {
        match self.eventloop.take() {
            Some(eventloop) => {
                let events = self.event_tx.clone();
                let cancel = self.cancel.clone();
                tokio::spawn(transport::poll_broker(eventloop, events, cancel));
            }
            // Already handed over; the running connection is kept alive by
            // the client library itself.
            None => debug!("Broker connection already running"),
        }
    }
}

/// Drives the dispatcher until shutdown or a fatal channel error.
pub async fn run(mut dispatcher: Dispatcher<Waiting>) -> Result<(), RuntimeError> {
    info!("Entering dispatch loop");
    loop {
        let dispatching = match dispatcher.next_event().await {
            Ok(dispatching) => dispatching,
            Err(RuntimeError::Stopped) => {
                info!("Dispatch loop stopped");
                return Ok(());
            }
            Err(error) => return Err(error),
        };
        let executing = dispatching.dispatch()?;
        dispatcher = executing.execute();
    }
}

fn spawn_ticker(events: mpsc::Sender<RuntimeEvent>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let start = Instant::now();
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    // Truncating to u32 gives the wrapping millisecond domain
                    // the publish timer expects.
                    let now_ms = start.elapsed().as_millis() as u32;
                    if events.send(RuntimeEvent::Tick { now_ms }).await.is_err() {
                        return;
                    }
                }
            }
        }
    });
}

/// Public interface for spawning and stopping the runtime.
pub struct RuntimeHandle {
    event_tx: mpsc::Sender<RuntimeEvent>,
    status_rx: watch::Receiver<SessionStatus>,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), RuntimeError>>,
}

impl RuntimeHandle {
    /// Builds the dispatcher and spawns it together with its ticker task.
    pub fn spawn(config: &NodeConfig, behavior: Box<dyn Behavior>) -> Self {
        info!("Spawning runtime with {} behavior", behavior.name());

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let cancel = CancellationToken::new();

        let dispatcher = Dispatcher::create(
            config,
            behavior,
            event_tx.clone(),
            event_rx,
            status_tx,
            cancel.clone(),
        );

        spawn_ticker(event_tx.clone(), cancel.clone());
        let task = tokio::spawn(run(dispatcher));

        Self {
            event_tx,
            status_rx,
            cancel,
            task,
        }
    }

    /// Feeds one link-layer event into the dispatch loop.
    pub async fn link_event(&self, event: LinkEvent) -> Result<(), RuntimeError> {
        self.event_tx
            .send(RuntimeEvent::Link(event))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Watch channel with the latest session status snapshot.
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    /// Stops the dispatcher and all helper tasks.
    pub async fn shutdown(self) -> Result<(), RuntimeError> {
        info!("Stopping runtime");
        self.cancel.cancel();
        self.task.await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::switch::testutil::RecordingSwitch;
    use crate::behavior::{CounterPublisher, SwitchSubscriber};
    use crate::link::LinkState;
    use crate::session::{DisconnectReason, SessionState};
    use std::sync::atomic::Ordering;

    struct Harness {
        event_tx: mpsc::Sender<RuntimeEvent>,
        status_rx: watch::Receiver<SessionStatus>,
        cancel: CancellationToken,
    }

    fn dispatcher_with(behavior: Box<dyn Behavior>) -> (Dispatcher<Waiting>, Harness) {
        let config = NodeConfig::default();
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let cancel = CancellationToken::new();
        let dispatcher = Dispatcher::create(
            &config,
            behavior,
            event_tx.clone(),
            event_rx,
            status_tx,
            cancel.clone(),
        );
        (
            dispatcher,
            Harness {
                event_tx,
                status_rx,
                cancel,
            },
        )
    }

    async fn cycle(dispatcher: Dispatcher<Waiting>) -> Dispatcher<Waiting> {
        let dispatching = dispatcher.next_event().await.unwrap();
        let executing = dispatching.dispatch().unwrap();
        executing.execute()
    }

    #[tokio::test]
    async fn link_up_moves_session_to_connecting() {
        let (switch, _, _) = RecordingSwitch::new();
        let behavior = Box::new(SwitchSubscriber::new("ESP/led", Box::new(switch)));
        let (dispatcher, harness) = dispatcher_with(behavior);

        harness
            .event_tx
            .send(RuntimeEvent::Link(LinkEvent::AddressAcquired { addr: None }))
            .await
            .unwrap();
        let _dispatcher = cycle(dispatcher).await;

        let status = harness.status_rx.borrow().clone();
        assert_eq!(status.link_state, LinkState::Connected);
        assert_eq!(status.session_state, SessionState::Connecting);
    }

    #[tokio::test]
    async fn established_session_announces_and_subscribes() {
        let (switch, on, _) = RecordingSwitch::new();
        let behavior = Box::new(SwitchSubscriber::new("ESP/led", Box::new(switch)));
        let (mut dispatcher, harness) = dispatcher_with(behavior);

        harness
            .event_tx
            .send(RuntimeEvent::Broker(BrokerEvent::Established {
                session_present: false,
            }))
            .await
            .unwrap();
        dispatcher = cycle(dispatcher).await;

        let status = harness.status_rx.borrow().clone();
        assert_eq!(status.session_state, SessionState::Connected);
        // Exactly the announce publish; the subscribe is not a message.
        assert_eq!(status.messages_sent, 1);

        // Whitespace around the command is trimmed away before mapping.
        harness
            .event_tx
            .send(RuntimeEvent::Broker(BrokerEvent::Message {
                topic: "ESP/led".to_string(),
                payload: b" 1 ".to_vec(),
                qos: 1,
            }))
            .await
            .unwrap();
        let _dispatcher = cycle(dispatcher).await;

        assert!(on.load(Ordering::SeqCst));
        let status = harness.status_rx.borrow().clone();
        assert_eq!(status.messages_received, 1);
    }

    #[tokio::test]
    async fn ticks_drive_the_counter_publisher() {
        let behavior = Box::new(CounterPublisher::new("ESP/test", 1000));
        let (mut dispatcher, harness) = dispatcher_with(behavior);

        for now_ms in [100, 1000, 2000] {
            harness
                .event_tx
                .send(RuntimeEvent::Tick { now_ms })
                .await
                .unwrap();
            dispatcher = cycle(dispatcher).await;
        }

        // First tick was inside the period, the other two published.
        let status = harness.status_rx.borrow().clone();
        assert_eq!(status.messages_sent, 2);
    }

    #[tokio::test]
    async fn failed_publish_ack_changes_nothing() {
        let behavior = Box::new(CounterPublisher::new("ESP/test", 1000));
        let (mut dispatcher, harness) = dispatcher_with(behavior);

        harness
            .event_tx
            .send(RuntimeEvent::Broker(BrokerEvent::Established {
                session_present: false,
            }))
            .await
            .unwrap();
        dispatcher = cycle(dispatcher).await;

        harness
            .event_tx
            .send(RuntimeEvent::Broker(BrokerEvent::PublishAck { pkid: 0 }))
            .await
            .unwrap();
        let _dispatcher = cycle(dispatcher).await;

        let status = harness.status_rx.borrow().clone();
        assert_eq!(status.session_state, SessionState::Connected);
        assert_eq!(status.messages_sent, 1);
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn session_loss_is_recorded_not_retried() {
        let behavior = Box::new(CounterPublisher::new("ESP/test", 1000));
        let (mut dispatcher, harness) = dispatcher_with(behavior);

        harness
            .event_tx
            .send(RuntimeEvent::Broker(BrokerEvent::Established {
                session_present: false,
            }))
            .await
            .unwrap();
        dispatcher = cycle(dispatcher).await;

        harness
            .event_tx
            .send(RuntimeEvent::Broker(BrokerEvent::Lost {
                reason: DisconnectReason::ServerUnavailable,
            }))
            .await
            .unwrap();
        let _dispatcher = cycle(dispatcher).await;

        let status = harness.status_rx.borrow().clone();
        assert_eq!(status.session_state, SessionState::Disconnected);
        assert_eq!(status.last_error.as_deref(), Some("server unavailable"));
    }

    #[tokio::test]
    async fn full_request_queue_never_stalls_dispatch() {
        // With no connection draining the client's request queue, publishes
        // past its capacity must fail locally and be logged, never block the
        // dispatch cycle.
        let behavior = Box::new(CounterPublisher::new("ESP/test", 1));
        let (mut dispatcher, harness) = dispatcher_with(behavior);

        let overflow = transport::CLIENT_CAPACITY as u32 + 10;
        let event_tx = harness.event_tx.clone();
        let cycles = tokio::time::timeout(Duration::from_secs(5), async move {
            for now_ms in 1..=overflow {
                event_tx.send(RuntimeEvent::Tick { now_ms }).await.unwrap();
                dispatcher = cycle(dispatcher).await;
            }
        });
        cycles.await.expect("dispatch cycle stalled on a full queue");

        // Only what fit into the queue counts as sent; the rest was dropped.
        let status = harness.status_rx.borrow().clone();
        assert_eq!(status.messages_sent, transport::CLIENT_CAPACITY);
    }

    #[tokio::test]
    async fn reestablishment_clears_last_error() {
        let behavior = Box::new(CounterPublisher::new("ESP/test", 1000));
        let (mut dispatcher, harness) = dispatcher_with(behavior);

        harness
            .event_tx
            .send(RuntimeEvent::Broker(BrokerEvent::Lost {
                reason: DisconnectReason::TcpFailure,
            }))
            .await
            .unwrap();
        dispatcher = cycle(dispatcher).await;
        assert_eq!(
            harness.status_rx.borrow().last_error.as_deref(),
            Some("TCP failure")
        );

        harness
            .event_tx
            .send(RuntimeEvent::Broker(BrokerEvent::Established {
                session_present: true,
            }))
            .await
            .unwrap();
        let _dispatcher = cycle(dispatcher).await;

        let status = harness.status_rx.borrow().clone();
        assert_eq!(status.session_state, SessionState::Connected);
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn run_stops_cleanly_on_cancel() {
        let behavior = Box::new(CounterPublisher::new("ESP/test", 1000));
        let (dispatcher, harness) = dispatcher_with(behavior);

        let task = tokio::spawn(run(dispatcher));
        harness.cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }
}
