//! Hub coordinator
//!
//! The hub owns the participant registry and every session's outbound queue
//! sender. All register, unregister and broadcast requests arrive as events on
//! one mailbox and are applied one at a time by a single control loop, so the
//! participant set never sees concurrent mutation.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{ParticipantRegistry, SessionId};
use crate::config::RelayConfig;

/// Errors returned by [`HubHandle`] operations
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Hub is not running")]
    Closed,
}

/// Result type for hub operations
pub type HubResult<T> = Result<T, HubError>;

/// Relayed message body, shared between all recipients of one broadcast
pub type Payload = Arc<[u8]>;

/// Item waiting in a session's outbound queue
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Queued by the hub right after registration; carries the registry as it
    /// stood once the session was added
    Announce(Vec<SessionId>),
    /// A relayed broadcast
    Payload(Payload),
}

/// What the hub keeps for a registered session
#[derive(Debug)]
pub struct SessionHandle {
    pub id: SessionId,
    pub outbound: mpsc::Sender<Outbound>,
}

impl SessionHandle {
    pub fn new(id: SessionId, outbound: mpsc::Sender<Outbound>) -> Self {
        Self { id, outbound }
    }
}

/// Events consumed by the hub control loop
#[derive(Debug)]
pub enum HubEvent {
    /// Add a session to the live set
    Register(SessionHandle),
    /// Remove a session and close its outbound queue
    Unregister(SessionId),
    /// Fan a payload out to every live session
    Broadcast { origin: SessionId, payload: Payload },
    /// Report the registry contents
    Participants(oneshot::Sender<Vec<SessionId>>),
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Sessions the payload was queued for
    pub delivered: usize,
    /// Sessions skipped because their queue was full
    pub dropped: usize,
}

/// Cloneable sender side of the hub mailbox
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    async fn send(&self, event: HubEvent) -> HubResult<()> {
        self.tx.send(event).await.map_err(|_| HubError::Closed)
    }

    /// Register a session
    pub async fn register(&self, session: SessionHandle) -> HubResult<()> {
        self.send(HubEvent::Register(session)).await
    }

    /// Unregister a session; a no-op if it is already gone
    pub async fn unregister(&self, id: SessionId) -> HubResult<()> {
        self.send(HubEvent::Unregister(id)).await
    }

    /// Submit a payload for fan-out
    pub async fn broadcast(&self, origin: SessionId, payload: Payload) -> HubResult<()> {
        self.send(HubEvent::Broadcast { origin, payload }).await
    }

    /// Current participant ids, in registration order
    pub async fn participants(&self) -> HubResult<Vec<SessionId>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(HubEvent::Participants(reply_tx)).await?;
        reply_rx.await.map_err(|_| HubError::Closed)
    }
}

/// The broadcast hub
pub struct Hub {
    mailbox: mpsc::Receiver<HubEvent>,
    sessions: HashMap<SessionId, mpsc::Sender<Outbound>>,
    registry: ParticipantRegistry,
    echo_to_sender: bool,
}

impl Hub {
    /// Create a hub and the handle used to reach it
    pub fn new(mailbox_capacity: usize, echo_to_sender: bool) -> (Self, HubHandle) {
        let (tx, mailbox) = mpsc::channel(mailbox_capacity);
        let hub = Self {
            mailbox,
            sessions: HashMap::new(),
            registry: ParticipantRegistry::new(),
            echo_to_sender,
        };
        (hub, HubHandle { tx })
    }

    /// Create a hub from relay configuration
    pub fn from_config(config: &RelayConfig) -> (Self, HubHandle) {
        Self::new(config.mailbox_capacity, config.echo_to_sender)
    }

    /// Run the control loop on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process events until every [`HubHandle`] has been dropped
    pub async fn run(mut self) {
        debug!("Hub control loop started");
        while let Some(event) = self.mailbox.recv().await {
            self.handle_event(event);
        }
        if self.registry.is_empty() {
            debug!("Hub control loop stopped");
        } else {
            debug!(
                "Hub control loop stopped with {} participants",
                self.registry.len()
            );
        }
    }

    /// Apply one event
    pub fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register(session) => self.register(session),
            HubEvent::Unregister(id) => self.unregister(id),
            HubEvent::Broadcast { origin, payload } => {
                self.broadcast(origin, payload);
            }
            HubEvent::Participants(reply) => {
                let _ = reply.send(self.registry.snapshot());
            }
        }
    }

    fn register(&mut self, session: SessionHandle) {
        let SessionHandle { id, outbound } = session;

        if !self.registry.insert(id) {
            // Dropping the duplicate sender closes its queue
            warn!("Session {} is already registered, ignoring", id);
            return;
        }

        let participants = self.registry.snapshot();
        if outbound.try_send(Outbound::Announce(participants)).is_err() {
            debug!("Session {} queue unavailable at registration", id);
        }
        self.sessions.insert(id, outbound);

        info!(
            "Participant {} joined: {}",
            id,
            format_ids(self.registry.ids())
        );
    }

    fn unregister(&mut self, id: SessionId) {
        // Dropping the sender closes the queue; the outbound loop drains and exits
        if self.sessions.remove(&id).is_none() {
            debug!("Session {} already unregistered", id);
            return;
        }
        self.registry.remove(id);

        info!(
            "Participant {} left: {}",
            id,
            format_ids(self.registry.ids())
        );
    }

    /// Queue a payload on every live session
    ///
    /// A full queue drops the payload for that session only; the hub never waits.
    fn broadcast(&self, origin: SessionId, payload: Payload) -> Delivery {
        let mut delivery = Delivery::default();

        for id in self.registry.ids() {
            if *id == origin && !self.echo_to_sender {
                continue;
            }
            let Some(outbound) = self.sessions.get(id) else {
                continue;
            };

            match outbound.try_send(Outbound::Payload(Arc::clone(&payload))) {
                Ok(()) => delivery.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Session {} outbound queue full, dropping broadcast", id);
                    delivery.dropped += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Session {} is shutting down, skipping broadcast", id);
                }
            }
        }

        debug!(
            "Broadcast of {} bytes from {} queued for {} sessions ({} dropped)",
            payload.len(),
            origin,
            delivery.delivered,
            delivery.dropped
        );
        delivery
    }
}

fn format_ids(ids: &[SessionId]) -> String {
    let joined: Vec<String> = ids.iter().map(SessionId::to_string).collect();
    format!("[{}]", joined.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: u64) -> SessionId {
        SessionId::new(value)
    }

    fn payload(text: &str) -> Payload {
        Arc::from(text.as_bytes())
    }

    fn join(hub: &mut Hub, value: u64, capacity: usize) -> mpsc::Receiver<Outbound> {
        let (tx, rx) = mpsc::channel(capacity);
        hub.handle_event(HubEvent::Register(SessionHandle::new(id(value), tx)));
        rx
    }

    #[test]
    fn test_register_primes_announcement() {
        let (mut hub, _handle) = Hub::new(16, true);
        let mut a = join(&mut hub, 0, 8);
        let mut b = join(&mut hub, 1, 8);

        assert_eq!(a.try_recv().unwrap(), Outbound::Announce(vec![id(0)]));
        assert_eq!(b.try_recv().unwrap(), Outbound::Announce(vec![id(0), id(1)]));
        assert_eq!(hub.sessions.len(), 2);
    }

    #[test]
    fn test_registry_tracks_register_and_unregister() {
        let (mut hub, _handle) = Hub::new(16, true);
        let _a = join(&mut hub, 0, 8);
        let _b = join(&mut hub, 1, 8);
        let _c = join(&mut hub, 2, 8);

        hub.handle_event(HubEvent::Unregister(id(1)));
        assert_eq!(hub.registry.ids(), &[id(0), id(2)]);

        let _d = join(&mut hub, 3, 8);
        hub.handle_event(HubEvent::Unregister(id(0)));
        assert_eq!(hub.registry.ids(), &[id(2), id(3)]);
        assert_eq!(hub.sessions.len(), 2);
    }

    #[test]
    fn test_duplicate_register_ignored() {
        let (mut hub, _handle) = Hub::new(16, true);
        let _first = join(&mut hub, 0, 8);
        let mut second = join(&mut hub, 0, 8);

        assert_eq!(hub.registry.ids(), &[id(0)]);
        // The rejected sender was dropped, so its queue is closed
        assert!(matches!(
            second.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_double_unregister_is_noop() {
        let (mut hub, _handle) = Hub::new(16, true);
        let _a = join(&mut hub, 0, 8);
        let _b = join(&mut hub, 1, 8);

        hub.handle_event(HubEvent::Unregister(id(0)));
        let after_once = hub.registry.clone();
        hub.handle_event(HubEvent::Unregister(id(0)));

        assert_eq!(&hub.registry, &after_once);
        assert_eq!(hub.registry.ids(), &[id(1)]);
    }

    #[test]
    fn test_unregister_closes_queue_after_drain() {
        let (mut hub, _handle) = Hub::new(16, true);
        let mut a = join(&mut hub, 0, 8);
        hub.handle_event(HubEvent::Broadcast {
            origin: id(0),
            payload: payload("last"),
        });
        hub.handle_event(HubEvent::Unregister(id(0)));

        assert!(matches!(a.try_recv(), Ok(Outbound::Announce(_))));
        assert_eq!(a.try_recv().unwrap(), Outbound::Payload(payload("last")));
        assert!(matches!(
            a.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_broadcast_reaches_every_session() {
        let (mut hub, _handle) = Hub::new(16, true);
        let mut queues: Vec<_> = (0..3).map(|n| join(&mut hub, n, 8)).collect();

        let delivery = hub.broadcast(id(0), payload("hello world"));
        assert_eq!(
            delivery,
            Delivery {
                delivered: 3,
                dropped: 0
            }
        );

        for queue in queues.iter_mut() {
            assert!(matches!(queue.try_recv(), Ok(Outbound::Announce(_))));
            assert_eq!(
                queue.try_recv().unwrap(),
                Outbound::Payload(payload("hello world"))
            );
        }
    }

    #[test]
    fn test_broadcast_without_echo() {
        let (mut hub, _handle) = Hub::new(16, false);
        let mut a = join(&mut hub, 0, 8);
        let mut b = join(&mut hub, 1, 8);

        let delivery = hub.broadcast(id(0), payload("hi"));
        assert_eq!(delivery.delivered, 1);

        assert!(matches!(a.try_recv(), Ok(Outbound::Announce(_))));
        assert!(a.try_recv().is_err());
        assert!(matches!(b.try_recv(), Ok(Outbound::Announce(_))));
        assert_eq!(b.try_recv().unwrap(), Outbound::Payload(payload("hi")));
    }

    #[test]
    fn test_full_queue_drops_only_for_that_session() {
        let (mut hub, _handle) = Hub::new(16, true);
        // Capacity 1 is taken by the announcement, which nobody reads
        let mut slow = join(&mut hub, 0, 1);
        let mut fast = join(&mut hub, 1, 8);
        assert!(matches!(fast.try_recv(), Ok(Outbound::Announce(_))));

        for n in 0..3 {
            let delivery = hub.broadcast(id(1), payload(&format!("msg {}", n)));
            assert_eq!(
                delivery,
                Delivery {
                    delivered: 1,
                    dropped: 1
                }
            );
        }

        for n in 0..3 {
            assert_eq!(
                fast.try_recv().unwrap(),
                Outbound::Payload(payload(&format!("msg {}", n)))
            );
        }
        // The slow session kept its oldest item; newer broadcasts were dropped
        assert!(matches!(slow.try_recv(), Ok(Outbound::Announce(_))));
        assert!(slow.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_skips_closed_queue() {
        let (mut hub, _handle) = Hub::new(16, true);
        let gone = join(&mut hub, 0, 8);
        let mut alive = join(&mut hub, 1, 8);
        drop(gone);

        let delivery = hub.broadcast(id(1), payload("still here"));
        assert_eq!(delivery.delivered, 1);
        assert!(matches!(alive.try_recv(), Ok(Outbound::Announce(_))));
        assert_eq!(
            alive.try_recv().unwrap(),
            Outbound::Payload(payload("still here"))
        );
    }

    #[tokio::test]
    async fn test_handle_round_trip_through_control_loop() {
        let (hub, handle) = Hub::new(16, true);
        let task = hub.spawn();

        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, _rx_b) = mpsc::channel(8);
        handle.register(SessionHandle::new(id(0), tx_a)).await.unwrap();
        handle.register(SessionHandle::new(id(1), tx_b)).await.unwrap();
        handle.broadcast(id(1), payload("ping")).await.unwrap();
        handle.unregister(id(1)).await.unwrap();
        handle.unregister(id(1)).await.unwrap();

        assert_eq!(handle.participants().await.unwrap(), vec![id(0)]);
        assert_eq!(rx_a.recv().await, Some(Outbound::Announce(vec![id(0)])));
        assert_eq!(rx_a.recv().await, Some(Outbound::Payload(payload("ping"))));

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_reports_closed_hub() {
        let (hub, handle) = Hub::new(4, true);
        drop(hub);

        let result = handle.unregister(id(0)).await;
        assert!(matches!(result, Err(HubError::Closed)));
        assert!(matches!(handle.participants().await, Err(HubError::Closed)));
    }
}
