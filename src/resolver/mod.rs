//! IP resolvers find the externally reachable address a load balancer publishes as a seed.
//!
//! IPv6 addresses are always returned bracketed (`[fd00::1]`) so the result can be used as-is in
//! a `host:port` pair.
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod ec2;
pub mod ipv6;

pub use ec2::Ec2IpResolver;
pub use ipv6::Ipv6UnicastResolver;

#[async_trait]
pub trait IpResolver: Send + Sync {
    async fn resolve_ip(&self) -> Result<String>;
}

/// Always returns the same address. Useful for dry runs and hosts with a static address.
#[derive(Debug, Clone)]
pub struct FixedIpResolver {
    address: String,
}

impl FixedIpResolver {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl Default for FixedIpResolver {
    fn default() -> Self {
        Self::new("[fd02:c0df:1500:1::10]")
    }
}

#[async_trait]
impl IpResolver for FixedIpResolver {
    async fn resolve_ip(&self) -> Result<String> {
        Ok(self.address.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "type")]
pub enum ResolverConfig {
    Ipv6Unicast,
    Ec2,
    Fixed { address: String },
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::Ipv6Unicast
    }
}

impl ResolverConfig {
    pub fn build(&self) -> Result<Arc<dyn IpResolver>> {
        Ok(match self {
            ResolverConfig::Ipv6Unicast => Arc::new(Ipv6UnicastResolver::new()?),
            ResolverConfig::Ec2 => Arc::new(Ec2IpResolver::new()?),
            ResolverConfig::Fixed { address } => Arc::new(FixedIpResolver::new(address.clone())),
        })
    }
}
