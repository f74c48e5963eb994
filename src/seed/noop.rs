use async_trait::async_trait;

use super::{Provider, Seeds};
use crate::{error::Result, resolver::IpResolver};

/// Never returns seeds and never pushes. Used for nodes that start a brand new cluster.
#[derive(Debug, Clone, Default)]
pub struct NoopProvider;

#[async_trait]
impl Provider for NoopProvider {
    async fn fetch_seed(&self) -> Result<Seeds> {
        Ok(Seeds::default())
    }

    async fn push_seed(&self, _resolver: &dyn IpResolver, _port: &str) -> Result<()> {
        Ok(())
    }
}
