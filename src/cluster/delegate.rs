//! Delegates hand the gossip transport the metadata blob it attaches to this node.
//!
//! The transport also offers hooks for user messages, piggy-backed broadcasts and full state
//! exchange. Neither node kind uses them, so the trait ships no-op defaults for all of them.
use bytes::Bytes;
use tracing::{event, Level};

use super::metadata::{self, NodeMetadata, MAX_METADATA_SIZE};
use crate::{
    config::BackendConfig,
    error::{Error, Result},
};

/// Outbound side of the gossip transport integration.
///
/// Implementations are called from the transport's own worker threads and must never block.
pub trait Delegate: Send + Sync {
    /// Returns the metadata blob advertised for this node. `limit` is the maximum size the
    /// transport is willing to carry.
    fn node_meta(&self, limit: usize) -> Bytes;

    fn notify_msg(&self, _msg: &[u8]) {}

    fn get_broadcasts(&self, _overhead: usize, _limit: usize) -> Vec<Bytes> {
        Vec::new()
    }

    fn local_state(&self, _join: bool) -> Bytes {
        Bytes::new()
    }

    fn merge_remote_state(&self, _buf: &[u8], _join: bool) {}
}

fn checked_meta(metadata: &Bytes, limit: usize) -> Bytes {
    if metadata.len() > limit {
        event!(
            Level::WARN,
            "node metadata is {} bytes but the transport only accepts {}",
            metadata.len(),
            limit
        );
    }

    metadata.clone()
}

/// Backend nodes advertise the applications they serve. The blob is computed once since
/// applications never change while the process runs.
#[derive(Debug, Clone)]
pub struct BackendDelegate {
    metadata: Bytes,
}

impl BackendDelegate {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        config.validate()?;

        let metadata = metadata::encode(&NodeMetadata::backend(config.applications.clone()))?;
        if metadata.len() > MAX_METADATA_SIZE {
            return Err(Error::Config {
                reason: format!(
                    "encoded backend metadata is {} bytes, the limit is {} - advertise fewer applications",
                    metadata.len(),
                    MAX_METADATA_SIZE
                ),
            });
        }

        event!(
            Level::DEBUG,
            "backend metadata encoded into {} bytes",
            metadata.len()
        );

        Ok(Self { metadata })
    }
}

impl Delegate for BackendDelegate {
    fn node_meta(&self, limit: usize) -> Bytes {
        checked_meta(&self.metadata, limit)
    }
}

/// Load balancers only advertise their kind so that other load balancers can skip them.
#[derive(Debug, Clone)]
pub struct LoadBalancerDelegate {
    metadata: Bytes,
}

impl LoadBalancerDelegate {
    pub fn new() -> Result<Self> {
        Ok(Self {
            metadata: metadata::encode(&NodeMetadata::load_balancer())?,
        })
    }
}

impl Delegate for LoadBalancerDelegate {
    fn node_meta(&self, limit: usize) -> Bytes {
        checked_meta(&self.metadata, limit)
    }
}
