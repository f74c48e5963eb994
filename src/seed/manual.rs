use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Provider, Seed, Seeds, DEFAULT_PORT};
use crate::{
    error::{Error, Result},
    resolver::IpResolver,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ManualConfig {
    pub ip: String,
    pub port: Option<String>,
}

/// Always returns the address pinned in configuration.
#[derive(Debug, Clone)]
pub struct ManualProvider {
    seed: Seed,
}

impl ManualProvider {
    pub fn new(config: ManualConfig) -> Result<Self> {
        if config.ip.is_empty() {
            return Err(Error::Config {
                reason: "missing required 'ip' in manual provider config".to_string(),
            });
        }

        let port = match config.port {
            Some(port) if !port.is_empty() => port,
            _ => DEFAULT_PORT.to_string(),
        };

        Ok(Self {
            seed: Seed::new(config.ip, port),
        })
    }
}

#[async_trait]
impl Provider for ManualProvider {
    async fn fetch_seed(&self) -> Result<Seeds> {
        Ok(Seeds {
            seeds: vec![self.seed.clone()],
        })
    }

    /// A pinned seed is never discovered dynamically, so there is nothing to publish.
    async fn push_seed(&self, _resolver: &dyn IpResolver, _port: &str) -> Result<()> {
        Ok(())
    }
}
