//! Node configuration, loaded from a json file.
//!
//! A node is either a load balancer (`lb: true`, requires a `load-balancer` section) or a backend
//! (requires a `backend` section listing the applications it serves).
use std::{path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    generator::{GeneratorConfig, GeneratorOutput},
    resolver::ResolverConfig,
    seed::{ProviderConfig, DEFAULT_PORT},
    types::Application,
};

fn default_port() -> String {
    DEFAULT_PORT.to_string()
}

fn default_bind_address() -> String {
    "::".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeConfig {
    #[serde(default)]
    pub lb: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Gossip port, also the port published as seed
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default)]
    pub provider: Option<ProviderConfig>,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub load_balancer: Option<LoadBalancerConfig>,
    #[serde(default)]
    pub backend: Option<BackendConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LoadBalancerConfig {
    pub push_period_secs: u64,
    pub push_jitter_ms: u64,
    pub generator: GeneratorConfig,
    pub generator_stdout: bool,
    pub generator_target: Option<PathBuf>,
    pub settle_ms: u64,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            push_period_secs: 60,
            push_jitter_ms: 5000,
            generator: GeneratorConfig::default(),
            generator_stdout: false,
            generator_target: None,
            settle_ms: 5000,
        }
    }
}

impl LoadBalancerConfig {
    pub fn push_period(&self) -> Duration {
        Duration::from_secs(self.push_period_secs)
    }

    pub fn push_jitter(&self) -> Duration {
        Duration::from_millis(self.push_jitter_ms)
    }

    pub fn output(&self) -> GeneratorOutput {
        GeneratorOutput {
            print_stdout: self.generator_stdout,
            target: self.generator_target.clone(),
            settle: Duration::from_millis(self.settle_ms),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BackendConfig {
    pub applications: Vec<Application>,
}

impl BackendConfig {
    pub fn validate(&self) -> Result<()> {
        if self.applications.is_empty() {
            return Err(Error::Config {
                reason: "a backend must serve at least one application".to_string(),
            });
        }

        for application in self.applications.iter() {
            application.validate()?;
        }

        Ok(())
    }
}

impl NodeConfig {
    /// Reads and validates the configuration at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| Error::Config {
            reason: format!("unable to read config file {} - {}", path.display(), e),
        })?;

        let config: NodeConfig = serde_json::from_str(&contents).map_err(|e| Error::Config {
            reason: format!("invalid config file {} - {}", path.display(), e),
        })?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port.parse::<u16>().is_err() {
            return Err(Error::Config {
                reason: format!("invalid gossip port '{}'", self.port),
            });
        }

        if let Some(provider) = self.provider.as_ref() {
            provider.build()?;
        }

        if self.lb {
            let Some(load_balancer) = self.load_balancer.as_ref() else {
                return Err(Error::Config {
                    reason: "load balancer nodes require a 'load-balancer' section".to_string(),
                });
            };
            load_balancer.generator.build()?;
        } else {
            let Some(backend) = self.backend.as_ref() else {
                return Err(Error::Config {
                    reason: "backend nodes require a 'backend' section".to_string(),
                });
            };
            backend.validate()?;
        }

        Ok(())
    }

    pub fn provider(&self) -> ProviderConfig {
        self.provider.clone().unwrap_or(ProviderConfig::Noop)
    }
}
