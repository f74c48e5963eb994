//! Generators turn the load balancer's [`UpstreamApplicationMap`] into reverse proxy
//! configuration and reload the proxy afterwards.
//!
//! [`run_generation_loop`] is the single consumer of the aggregate published by
//! [`crate::cluster::state::LoadBalancerState`]. It renders one configuration at a time, so a
//! slow render or reload only delays the next generation and never membership processing.
//! Failures are logged and the cycle is skipped: the proxy keeps running with the previous,
//! still valid, configuration.
use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{event, instrument, Level};

use crate::{
    error::Result,
    types::{Application, UpstreamApplicationMap},
};

pub mod nginx;
pub mod null;

pub use nginx::{NginxConfig, NginxGenerator};
pub use null::NullGenerator;

/// Produces proxy configuration for the backends currently known to the load balancer.
#[async_trait]
pub trait Generator: Send + Sync {
    fn generate_config(&self, upstreams: &UpstreamApplicationMap) -> Result<String>;
    async fn handle_restart(&self) -> Result<()>;
}

/// Inverts the aggregate: every distinct application with the (sorted, deduplicated) addresses of
/// the upstreams advertising it.
pub fn application_map(upstreams: &UpstreamApplicationMap) -> HashMap<Application, Vec<String>> {
    let mut applications: HashMap<Application, Vec<String>> = HashMap::new();
    for (upstream, advertised) in upstreams.iter() {
        for application in advertised {
            applications
                .entry(application.clone())
                .or_default()
                .push(upstream.address.clone());
        }
    }

    for addresses in applications.values_mut() {
        addresses.sort();
        addresses.dedup();
    }

    applications
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "type")]
pub enum GeneratorConfig {
    Null,
    Nginx(NginxConfig),
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self::Null
    }
}

impl GeneratorConfig {
    pub fn build(&self) -> Result<Arc<dyn Generator>> {
        Ok(match self {
            GeneratorConfig::Null => Arc::new(NullGenerator),
            GeneratorConfig::Nginx(config) => Arc::new(NginxGenerator::new(config.clone())?),
        })
    }
}

/// Where rendered configuration goes
#[derive(Debug, Clone)]
pub struct GeneratorOutput {
    /// Print every rendered configuration to stdout
    pub print_stdout: bool,
    /// File the configuration is written to. The proxy is only restarted when this is set.
    pub target: Option<PathBuf>,
    /// Wait applied before each generation so bursts of membership churn coalesce
    pub settle: Duration,
}

impl Default for GeneratorOutput {
    fn default() -> Self {
        Self {
            print_stdout: false,
            target: None,
            settle: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum GenerationResult {
    /// Rendered but not written anywhere
    Rendered,
    /// Written to the target and the proxy restarted
    Applied,
}

/// One generation cycle: render, emit, write and restart.
pub async fn generate_and_apply(
    generator: &dyn Generator,
    upstreams: &UpstreamApplicationMap,
    output: &GeneratorOutput,
) -> Result<GenerationResult> {
    let config = generator.generate_config(upstreams)?;

    if output.print_stdout {
        println!("{}", config);
    }

    let Some(target) = output.target.as_ref() else {
        return Ok(GenerationResult::Rendered);
    };

    tokio::fs::write(target, config.as_bytes()).await?;
    generator.handle_restart().await?;
    event!(
        Level::INFO,
        "applied configuration for {} upstream(s) to {}",
        upstreams.len(),
        target.display()
    );

    Ok(GenerationResult::Applied)
}

/// Regenerates configuration every time a new aggregate is published. Returns once the
/// publishing side is dropped.
#[instrument(level = "debug", skip(generator, updates))]
pub async fn run_generation_loop(
    generator: Arc<dyn Generator>,
    mut updates: watch::Receiver<UpstreamApplicationMap>,
    output: GeneratorOutput,
) {
    loop {
        if updates.changed().await.is_err() {
            event!(Level::INFO, "aggregate publisher closed, stopping generation");
            return;
        }

        tokio::time::sleep(output.settle).await;
        let upstreams = updates.borrow_and_update().clone();

        if let Err(err) = generate_and_apply(generator.as_ref(), &upstreams, &output).await {
            event!(
                Level::ERROR,
                "skipping generation cycle, previous configuration stays active: {}",
                err
            );
        }
    }
}
