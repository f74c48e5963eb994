//! Inbound side of the gossip transport integration.
//!
//! The transport reports membership changes through [`EventDelegate`]. Those callbacks can fire
//! concurrently from several transport threads, so [`ChannelEventDelegate`] turns each one into a
//! [`MembershipEvent`] and hands it to a single consumer (see [`super::state::LoadBalancerState::run`]).
use std::net::IpAddr;

use bytes::Bytes;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{event, Level};

use crate::types::Upstream;

/// A cluster member as reported by the gossip transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub addr: IpAddr,
    pub port: u16,
    pub meta: Bytes,
}

impl Node {
    /// The key this node is tracked under. IPv6 addresses are bracketed so they can be used
    /// directly in `host:port` pairs.
    pub fn upstream(&self) -> Upstream {
        let address = match self.addr {
            IpAddr::V4(addr) => addr.to_string(),
            IpAddr::V6(addr) => format!("[{}]", addr),
        };

        Upstream::new(self.name.clone(), address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Joined,
    Left,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipEvent {
    pub kind: EventKind,
    pub node: Node,
}

impl MembershipEvent {
    pub fn joined(node: Node) -> Self {
        Self {
            kind: EventKind::Joined,
            node,
        }
    }

    pub fn left(node: Node) -> Self {
        Self {
            kind: EventKind::Left,
            node,
        }
    }

    pub fn updated(node: Node) -> Self {
        Self {
            kind: EventKind::Updated,
            node,
        }
    }
}

/// Membership callbacks invoked by the gossip transport.
pub trait EventDelegate: Send + Sync {
    fn notify_join(&self, node: &Node);
    fn notify_leave(&self, node: &Node);
    fn notify_update(&self, node: &Node);
}

/// Forwards every callback into an unbounded queue so the transport thread never waits on
/// state mutation or config generation.
#[derive(Debug, Clone)]
pub struct ChannelEventDelegate {
    sender: UnboundedSender<MembershipEvent>,
}

impl ChannelEventDelegate {
    pub fn new() -> (Self, UnboundedReceiver<MembershipEvent>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn forward(&self, event: MembershipEvent) {
        if let Err(err) = self.sender.send(event) {
            event!(
                Level::WARN,
                "dropping membership event, consumer is gone: {:?}",
                err.0
            );
        }
    }
}

impl EventDelegate for ChannelEventDelegate {
    fn notify_join(&self, node: &Node) {
        self.forward(MembershipEvent::joined(node.clone()));
    }

    fn notify_leave(&self, node: &Node) {
        self.forward(MembershipEvent::left(node.clone()));
    }

    fn notify_update(&self, node: &Node) {
        self.forward(MembershipEvent::updated(node.clone()));
    }
}
