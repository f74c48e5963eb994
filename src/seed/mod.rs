//! Seed providers bootstrap a node into the gossip cluster.
//!
//! A freshly started node has no peer to gossip with, so it asks a [`Provider`] for a list of
//! [`Seeds`] to join. Load balancers also periodically push their own address through the same
//! provider (see [`crate::pusher`]) so that nodes started later can find them.
//!
//! Variants are picked once from configuration through [`ProviderConfig::build`]:
//!  - `noop`: no seeds, nothing is pushed. The node starts a fresh cluster.
//!  - `manual`: a single pinned address from configuration. Pushing is a no-op.
//!  - `s3`: a small json document stored in an object store bucket.
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{error::Result, resolver::IpResolver};

pub mod manual;
pub mod mock;
pub mod noop;
pub mod s3;

pub use manual::{ManualConfig, ManualProvider};
pub use noop::NoopProvider;
pub use s3::{S3Config, S3Provider};

/// Gossip port used when a seed doesn't specify one
pub const DEFAULT_PORT: &str = "9999";

/// Object key used by stores when no other is configured
pub const DEFAULT_KEY: &str = "meshlb";

/// Details for a node to connect to a load balancer without multicast or another kind of
/// service discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Seed {
    pub address: String,
    pub port: String,
}

impl Seed {
    pub fn new(address: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: port.into(),
        }
    }

    /// `address:port`, ready to hand to the gossip transport
    pub fn join_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// The document exchanged with the seed store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seeds {
    #[serde(default)]
    pub seeds: Vec<Seed>,
}

impl Seeds {
    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    pub fn contains(&self, seed: &Seed) -> bool {
        self.seeds.iter().any(|s| s == seed)
    }

    pub fn join_addrs(&self) -> Vec<String> {
        self.seeds.iter().map(Seed::join_addr).collect()
    }
}

/// Abstracts fetching and publishing seeds so nodes don't depend on any one hosting platform.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns the currently published seeds. An empty list means there is no cluster yet.
    async fn fetch_seed(&self) -> Result<Seeds>;
    /// Publishes this node's address (as found by `resolver`) and gossip `port`.
    async fn push_seed(&self, resolver: &dyn IpResolver, port: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "type")]
pub enum ProviderConfig {
    Noop,
    Manual(ManualConfig),
    S3(S3Config),
}

impl ProviderConfig {
    /// Validates the variant's configuration and constructs the provider.
    pub fn build(&self) -> Result<Arc<dyn Provider>> {
        Ok(match self {
            ProviderConfig::Noop => Arc::new(NoopProvider),
            ProviderConfig::Manual(config) => Arc::new(ManualProvider::new(config.clone())?),
            ProviderConfig::S3(config) => Arc::new(S3Provider::new(config.clone())?),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProviderConfig::Noop => "noop",
            ProviderConfig::Manual(_) => "manual",
            ProviderConfig::S3(_) => "s3",
        }
    }
}
