use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use stagebloom::config::LifecycleConfig;
use stagebloom::workflows::lifecycle::{
    BusError, DispatchError, EventBus, InMemoryLifecycleStore, LifecycleEvent, Mailer,
    Notification, OutboundEmail, PushNotifier, SideEffectDispatcher, SystemClock,
    TransitionEngine,
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Hands committed events to the background dispatcher task.
#[derive(Clone)]
pub(crate) struct ChannelEventBus {
    sender: UnboundedSender<LifecycleEvent>,
}

impl ChannelEventBus {
    pub(crate) fn new() -> (Self, UnboundedReceiver<LifecycleEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventBus for ChannelEventBus {
    fn publish(&self, event: LifecycleEvent) -> Result<(), BusError> {
        self.sender.send(event).map_err(|_| BusError::Closed)
    }
}

/// Keeps published events in memory; used by the one-shot CLI commands.
#[derive(Default)]
pub(crate) struct CollectingBus {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl CollectingBus {
    pub(crate) fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventBus for CollectingBus {
    fn publish(&self, event: LifecycleEvent) -> Result<(), BusError> {
        self.events
            .lock()
            .map_err(|_| BusError::Unavailable("event log poisoned".to_string()))?
            .push(event);
        Ok(())
    }
}

/// Stands in for SMTP. Credentials are never written to the log.
#[derive(Default)]
pub(crate) struct LoggingMailer;

impl Mailer for LoggingMailer {
    fn send(&self, email: &OutboundEmail) -> Result<(), DispatchError> {
        info!(
            template = ?email.template,
            to = %email.to,
            placeholders = email.placeholders.len(),
            carries_credentials = email.password.is_some(),
            "email sent"
        );
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct LoggingNotifier;

impl PushNotifier for LoggingNotifier {
    fn push(&self, notification: &Notification) -> Result<(), DispatchError> {
        info!(
            recipient = %notification.recipient,
            title = %notification.title,
            sequence = notification.event_sequence,
            "push notification sent"
        );
        Ok(())
    }
}

pub(crate) type ServiceEngine = TransitionEngine<InMemoryLifecycleStore, ChannelEventBus>;
pub(crate) type ServiceDispatcher =
    SideEffectDispatcher<InMemoryLifecycleStore, LoggingMailer, LoggingNotifier>;

/// Engine, dispatcher and the channel between them, before the dispatcher task starts.
pub(crate) struct LifecycleRuntime {
    pub(crate) engine: Arc<ServiceEngine>,
    pub(crate) dispatcher: Arc<ServiceDispatcher>,
    receiver: UnboundedReceiver<LifecycleEvent>,
}

impl LifecycleRuntime {
    pub(crate) fn new(config: LifecycleConfig) -> Self {
        let store = Arc::new(InMemoryLifecycleStore::new());
        let (bus, receiver) = ChannelEventBus::new();
        let engine = Arc::new(TransitionEngine::new(
            store.clone(),
            Arc::new(bus),
            Arc::new(SystemClock),
            config,
        ));
        let dispatcher = Arc::new(SideEffectDispatcher::new(
            store,
            Arc::new(LoggingMailer),
            Arc::new(LoggingNotifier),
        ));
        Self {
            engine,
            dispatcher,
            receiver,
        }
    }

    /// Drain the event channel until every engine handle is dropped.
    pub(crate) fn spawn_dispatcher(self) -> (Arc<ServiceEngine>, JoinHandle<()>) {
        let Self {
            engine,
            dispatcher,
            mut receiver,
        } = self;
        let handle = tokio::spawn(async move {
            let mut undelivered = VecDeque::new();
            while let Some(event) = receiver.recv().await {
                undelivered.push_back(event);
                drain_in_order(&mut undelivered, |event| {
                    dispatcher.dispatch(event).map(|_| ())
                });
                if dispatcher.pending_failures() > 0 {
                    match dispatcher.retry_failed() {
                        Ok(recovered) if recovered > 0 => {
                            info!(recovered, "queued side effects delivered")
                        }
                        Ok(_) => {}
                        Err(error) => warn!(%error, "side effect retry failed"),
                    }
                }
            }
            drain_in_order(&mut undelivered, |event| dispatcher.dispatch(event).map(|_| ()));
            if !undelivered.is_empty() {
                warn!(
                    undelivered = undelivered.len(),
                    "dispatcher stopped with undelivered events"
                );
            }
            info!("event channel closed; dispatcher stopped");
        });
        (engine, handle)
    }
}

/// Dispatch queued events oldest first. A failure keeps that event and every later one queued.
pub(crate) fn drain_in_order<F>(queue: &mut VecDeque<LifecycleEvent>, mut dispatch: F) -> usize
where
    F: FnMut(&LifecycleEvent) -> Result<(), DispatchError>,
{
    let mut delivered = 0;
    while let Some(event) = queue.front() {
        match dispatch(event) {
            Ok(()) => {
                queue.pop_front();
                delivered += 1;
            }
            Err(error) => {
                warn!(
                    sequence = event.sequence,
                    queued = queue.len(),
                    %error,
                    "event dispatch failed; retrying with the next delivery"
                );
                break;
            }
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stagebloom::workflows::lifecycle::{EventKind, EventSubject};

    fn event(sequence: u64) -> LifecycleEvent {
        LifecycleEvent {
            sequence,
            kind: EventKind::CandidateRegistered {
                email: "amira@example.org".to_string(),
            },
            subject: EventSubject::default(),
            actor_id: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn channel_bus_reports_a_closed_receiver() {
        let (bus, receiver) = ChannelEventBus::new();
        assert!(bus.publish(event(1)).is_ok());
        drop(receiver);
        assert!(matches!(bus.publish(event(2)), Err(BusError::Closed)));
    }

    #[test]
    fn collecting_bus_keeps_publication_order() {
        let bus = CollectingBus::default();
        bus.publish(event(1)).expect("published");
        bus.publish(event(2)).expect("published");
        let sequences: Vec<u64> = bus.events().iter().map(|event| event.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[test]
    fn failed_dispatch_is_retried_before_later_events() {
        let mut queue = VecDeque::from(vec![event(1)]);
        let mut seen = Vec::new();
        let mut healthy = false;

        let delivered = drain_in_order(&mut queue, |event| {
            seen.push(event.sequence);
            if healthy {
                Ok(())
            } else {
                Err(DispatchError::Poisoned)
            }
        });
        assert_eq!(delivered, 0);
        assert_eq!(queue.len(), 1);

        healthy = true;
        queue.push_back(event(2));
        let delivered = drain_in_order(&mut queue, |event| {
            seen.push(event.sequence);
            if healthy {
                Ok(())
            } else {
                Err(DispatchError::Poisoned)
            }
        });
        assert_eq!(delivered, 2);
        assert!(queue.is_empty());
        assert_eq!(seen, vec![1, 1, 2]);
    }

    #[tokio::test]
    async fn dispatcher_task_stops_when_the_engine_is_dropped() {
        let runtime = LifecycleRuntime::new(LifecycleConfig::default());
        let dispatcher = runtime.dispatcher.clone();
        let (engine, handle) = runtime.spawn_dispatcher();
        engine
            .register_candidate(
                &stagebloom::workflows::lifecycle::Actor::Anonymous,
                stagebloom::workflows::lifecycle::NewAccount {
                    email: "amira@example.org".to_string(),
                    full_name: "Amira Gharbi".to_string(),
                },
            )
            .expect("registered");
        drop(engine);
        handle.await.expect("dispatcher task joins");
        assert_eq!(dispatcher.last_sequence(), 1);
    }
}
