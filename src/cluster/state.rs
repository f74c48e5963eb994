//! This file contains the [`LoadBalancerState`] data structure.
//! It holds the load balancer's view of which backends are alive and which applications each of
//! them serves.
//!
//! The state is driven exclusively by membership events coming from the gossip transport
//! (see [`super::event`]). Each event is decoded and applied inside a single critical section, so
//! two events for the same peer can never interleave into a lost or duplicated entry.
//!
//! After every change the full map is published through a [`watch`] channel. The config
//! generator consumes it at its own pace (see [`crate::generator::run_generation_loop`]), which
//! means a slow render never holds up membership processing. Publishing always happens while the
//! lock is held so the last published value is always the latest state.
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc::UnboundedReceiver, watch};
use tracing::{event, instrument, Level};

use super::{
    event::{EventDelegate, EventKind, MembershipEvent, Node},
    metadata,
};
use crate::{
    error::{Error, Result},
    types::{Upstream, UpstreamApplicationMap},
};

/// What happened to a single membership event
#[derive(Debug, PartialEq, Eq)]
pub enum EventOutcome {
    /// The map was changed and the new aggregate published
    Applied,
    /// Undecodable metadata or a non-backend peer - nothing changed
    Ignored,
}

#[derive(Clone)]
pub struct LoadBalancerState {
    inner: Arc<Mutex<StateInner>>,
}

impl std::fmt::Debug for LoadBalancerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.try_lock() {
            Ok(inner) => {
                write!(f, "LoadBalancerState: {:?}", inner)
            }
            Err(_) => {
                write!(f, "Unable to acquire lock for logging at this time...")
            }
        }
    }
}

struct StateInner {
    members: UpstreamApplicationMap,
    notifier: watch::Sender<UpstreamApplicationMap>,
}

impl std::fmt::Debug for StateInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (upstream, applications) in self.members.iter() {
            write!(f, "\n{:?} -> {:?}", upstream, applications)?;
        }

        Ok(())
    }
}

impl StateInner {
    fn publish(&self) {
        self.notifier.send_replace(self.members.clone());
    }
}

impl Default for LoadBalancerState {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancerState {
    pub fn new() -> Self {
        let (notifier, _) = watch::channel(UpstreamApplicationMap::new());
        Self {
            inner: Arc::new(Mutex::new(StateInner {
                members: UpstreamApplicationMap::new(),
                notifier,
            })),
        }
    }

    fn acquire_lock(&self) -> Result<MutexGuard<StateInner>> {
        if let Ok(guard) = self.inner.lock() {
            Ok(guard)
        } else {
            Err(Error::Logic {
                reason: "Unable to acquire lock".to_string(),
            })
        }
    }

    /// Returns a receiver that observes every published aggregate. The receiver starts out
    /// holding the current value, already marked as changed.
    pub fn subscribe(&self) -> Result<watch::Receiver<UpstreamApplicationMap>> {
        let guard = self.acquire_lock()?;
        let mut receiver = guard.notifier.subscribe();
        receiver.mark_changed();
        Ok(receiver)
    }

    pub fn snapshot(&self) -> Result<UpstreamApplicationMap> {
        let guard = self.acquire_lock()?;
        Ok(guard.members.clone())
    }

    pub fn knows_upstream(&self, upstream: &Upstream) -> Result<bool> {
        let guard = self.acquire_lock()?;
        Ok(guard.members.contains_key(upstream))
    }

    /// Applies a single membership event.
    ///
    /// Undecodable metadata is logged and ignored: a bad update never evicts what was previously
    /// known about that peer.
    pub fn handle_event(&self, membership_event: &MembershipEvent) -> Result<EventOutcome> {
        let node = &membership_event.node;
        let mut guard = self.acquire_lock()?;

        let node_metadata = match metadata::decode(&node.meta) {
            Ok(node_metadata) => node_metadata,
            Err(err) => {
                event!(
                    Level::WARN,
                    "couldn't parse metadata of node {} ({}): {}",
                    node.name,
                    node.addr,
                    err
                );
                return Ok(EventOutcome::Ignored);
            }
        };

        if !node_metadata.is_backend() {
            event!(
                Level::DEBUG,
                "ignoring {:?} event for {} node {}",
                membership_event.kind,
                node_metadata.kind,
                node.name
            );
            return Ok(EventOutcome::Ignored);
        }

        let key = node.upstream();
        match membership_event.kind {
            EventKind::Joined | EventKind::Updated => {
                guard.members.remove(&key);
                event!(
                    Level::INFO,
                    "backend {} ({}) advertises {} application(s)",
                    key.name,
                    key.address,
                    node_metadata.applications.len()
                );
                guard.members.insert(key, node_metadata.applications);
            }
            EventKind::Left => {
                event!(Level::INFO, "backend {} ({}) left", key.name, key.address);
                guard.members.remove(&key);
            }
        }

        guard.publish();
        Ok(EventOutcome::Applied)
    }

    fn handle_or_log(&self, membership_event: MembershipEvent) {
        if let Err(err) = self.handle_event(&membership_event) {
            event!(
                Level::ERROR,
                "unable to apply membership event {:?}: {}",
                membership_event.kind,
                err
            );
        }
    }

    /// Drains the queue fed by a [`super::event::ChannelEventDelegate`] until every sender is gone.
    #[instrument(level = "debug", skip(events))]
    pub async fn run(self, mut events: UnboundedReceiver<MembershipEvent>) {
        while let Some(membership_event) = events.recv().await {
            self.handle_or_log(membership_event);
        }

        event!(Level::INFO, "membership event queue closed");
    }
}

impl EventDelegate for LoadBalancerState {
    fn notify_join(&self, node: &Node) {
        self.handle_or_log(MembershipEvent::joined(node.clone()));
    }

    fn notify_leave(&self, node: &Node) {
        self.handle_or_log(MembershipEvent::left(node.clone()));
    }

    fn notify_update(&self, node: &Node) {
        self.handle_or_log(MembershipEvent::updated(node.clone()));
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        net::{IpAddr, Ipv4Addr},
    };

    use bytes::Bytes;
    use quickcheck::{Arbitrary, Gen};
    use rand::{seq::SliceRandom, Rng};

    use super::{EventOutcome, LoadBalancerState};
    use crate::{
        cluster::{
            event::{ChannelEventDelegate, EventDelegate, EventKind, MembershipEvent, Node},
            metadata::{encode, tests::random_application, NodeMetadata},
        },
        types::{Application, Upstream},
    };

    fn backend_node(name: &str, last_octet: u8, applications: Vec<Application>) -> Node {
        Node {
            name: name.to_string(),
            addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)),
            port: 9999,
            meta: encode(&NodeMetadata::backend(applications)).unwrap(),
        }
    }

    fn load_balancer_node(name: &str) -> Node {
        Node {
            name: name.to_string(),
            addr: IpAddr::V4(Ipv4Addr::new(10, 0, 1, 1)),
            port: 9999,
            meta: encode(&NodeMetadata::load_balancer()).unwrap(),
        }
    }

    #[test]
    fn join_update_leave_lifecycle() {
        let state = LoadBalancerState::new();
        let first = vec![random_application()];
        let second = vec![random_application(), random_application()];

        let node = backend_node("a", 1, first.clone());
        assert_eq!(
            state.handle_event(&MembershipEvent::joined(node.clone())).unwrap(),
            EventOutcome::Applied
        );
        assert_eq!(state.snapshot().unwrap()[&node.upstream()], first);

        let updated = backend_node("a", 1, second.clone());
        state.notify_update(&updated);
        let snapshot = state.snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[&node.upstream()], second);

        state.notify_leave(&updated);
        assert!(state.snapshot().unwrap().is_empty());
    }

    #[test]
    fn duplicate_join_keeps_a_single_entry() {
        let state = LoadBalancerState::new();
        let node = backend_node("a", 1, vec![random_application()]);

        state.notify_join(&node);
        state.notify_join(&node);

        assert_eq!(state.snapshot().unwrap().len(), 1);
    }

    #[test]
    fn load_balancers_are_not_tracked() {
        let state = LoadBalancerState::new();
        assert_eq!(
            state
                .handle_event(&MembershipEvent::joined(load_balancer_node("lb")))
                .unwrap(),
            EventOutcome::Ignored
        );
        assert!(state.snapshot().unwrap().is_empty());
    }

    #[test]
    fn bad_update_does_not_evict_previous_state() {
        let state = LoadBalancerState::new();
        let applications = vec![random_application()];
        let node = backend_node("a", 1, applications.clone());
        state.notify_join(&node);

        let mut corrupted = node.clone();
        corrupted.meta = Bytes::from_static(b"\x00garbage");
        assert_eq!(
            state
                .handle_event(&MembershipEvent::updated(corrupted.clone()))
                .unwrap(),
            EventOutcome::Ignored
        );
        assert_eq!(
            state
                .handle_event(&MembershipEvent::left(corrupted))
                .unwrap(),
            EventOutcome::Ignored
        );

        assert_eq!(state.snapshot().unwrap()[&node.upstream()], applications);
    }

    #[test]
    fn leave_of_unknown_backend_still_publishes() {
        let state = LoadBalancerState::new();
        let mut receiver = state.subscribe().unwrap();
        receiver.borrow_and_update();

        state.notify_leave(&backend_node("ghost", 9, vec![random_application()]));
        assert!(receiver.has_changed().unwrap());
        assert!(receiver.borrow_and_update().is_empty());
    }

    #[test]
    fn subscribers_observe_the_latest_aggregate() {
        let state = LoadBalancerState::new();
        let mut receiver = state.subscribe().unwrap();
        assert!(receiver.has_changed().unwrap());
        assert!(receiver.borrow_and_update().is_empty());

        let node = backend_node("a", 1, vec![random_application()]);
        state.notify_join(&node);
        state.notify_join(&backend_node("b", 2, vec![random_application()]));

        assert!(receiver.has_changed().unwrap());
        let published = receiver.borrow_and_update().clone();
        assert_eq!(published, state.snapshot().unwrap());
        assert_eq!(published.len(), 2);
    }

    #[tokio::test]
    async fn run_drains_the_channel_delegate() {
        let state = LoadBalancerState::new();
        let (delegate, receiver) = ChannelEventDelegate::new();
        let handle = tokio::spawn(state.clone().run(receiver));

        delegate.notify_join(&backend_node("a", 1, vec![random_application()]));
        delegate.notify_join(&backend_node("b", 2, vec![random_application()]));
        delegate.notify_leave(&backend_node("a", 1, vec![random_application()]));
        drop(delegate);
        handle.await.unwrap();

        let snapshot = state.snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key(&Upstream::new("b", "10.0.0.2")));
    }

    #[tokio::test]
    async fn concurrent_events_for_distinct_peers() {
        let state = LoadBalancerState::new();
        let mut handles = Vec::new();
        for i in 0..32u8 {
            let state = state.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let node = backend_node(&format!("node-{}", i), i, vec![random_application()]);
                state.notify_join(&node);
                if i % 2 == 0 {
                    state.notify_leave(&node);
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = state.snapshot().unwrap();
        assert_eq!(snapshot.len(), 16);
        for (upstream, _) in snapshot {
            let index: u8 = upstream.name.trim_start_matches("node-").parse().unwrap();
            assert_eq!(index % 2, 1);
        }
    }

    #[derive(Debug, Clone)]
    struct EventSequence {
        events: Vec<MembershipEvent>,
    }

    impl Arbitrary for EventSequence {
        fn arbitrary(_: &mut Gen) -> Self {
            let mut rng = rand::thread_rng();
            let n_events = rng.gen_range(1..40);
            let events = (0..n_events)
                .map(|_| {
                    let peer = rng.gen_range(0..6u8);
                    let node = if peer == 5 {
                        load_balancer_node("lb")
                    } else {
                        let n_apps = rng.gen_range(0..3);
                        backend_node(
                            &format!("node-{}", peer),
                            peer,
                            (0..n_apps).map(|_| random_application()).collect(),
                        )
                    };
                    let kind = *[EventKind::Joined, EventKind::Updated, EventKind::Left]
                        .choose(&mut rng)
                        .unwrap();
                    MembershipEvent { kind, node }
                })
                .collect();

            Self { events }
        }
    }

    /// The aggregate after replaying a sequence contains exactly the backends whose latest event
    /// was a join or an update, each with its latest application list. Shuffling events while
    /// keeping the per-peer order must not change the outcome.
    #[quickcheck]
    fn aggregate_tracks_latest_event_per_peer(input: EventSequence) {
        let mut expected = HashMap::new();
        for membership_event in input.events.iter() {
            let decoded = crate::cluster::metadata::decode(&membership_event.node.meta).unwrap();
            if !decoded.is_backend() {
                continue;
            }
            let key = membership_event.node.upstream();
            match membership_event.kind {
                EventKind::Joined | EventKind::Updated => {
                    expected.insert(key, decoded.applications);
                }
                EventKind::Left => {
                    expected.remove(&key);
                }
            }
        }

        let state = LoadBalancerState::new();
        for membership_event in input.events.iter() {
            state.handle_event(membership_event).unwrap();
        }
        assert_eq!(state.snapshot().unwrap(), expected);

        // interleave peers differently while keeping each peer's own order
        let mut per_peer: HashMap<Upstream, Vec<MembershipEvent>> = HashMap::new();
        for membership_event in input.events.iter() {
            per_peer
                .entry(membership_event.node.upstream())
                .or_default()
                .push(membership_event.clone());
        }
        let mut queues: Vec<Vec<MembershipEvent>> = per_peer
            .into_values()
            .map(|mut events| {
                events.reverse();
                events
            })
            .collect();

        let reordered = LoadBalancerState::new();
        let mut rng = rand::thread_rng();
        while !queues.is_empty() {
            let index = rng.gen_range(0..queues.len());
            if let Some(membership_event) = queues[index].pop() {
                reordered.handle_event(&membership_event).unwrap();
            }
            if queues[index].is_empty() {
                queues.swap_remove(index);
            }
        }
        assert_eq!(reordered.snapshot().unwrap(), expected);
    }
}
