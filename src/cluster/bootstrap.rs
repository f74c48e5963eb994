//! Joining the gossip cluster at startup.
//!
//! Seeds are fetched from the configured [`Provider`] and handed to the transport. Nodes of a
//! fleet usually boot together, so the seed store may not have been populated yet: the whole
//! fetch-then-join sequence is retried a few times before giving up.
use std::time::Duration;

use async_trait::async_trait;
use tracing::{event, Level};

use crate::{
    error::{Error, Result},
    seed::Provider,
};

pub const INIT_ATTEMPTS: usize = 3;
pub const INIT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// The part of the gossip transport used for bootstrapping.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Contacts every `host:port` in `addrs` and returns how many were reached.
    async fn join(&self, addrs: Vec<String>) -> Result<usize>;
}

async fn join_once(cluster: &dyn Cluster, provider: &dyn Provider) -> Result<usize> {
    let seeds = provider.fetch_seed().await?;
    if seeds.is_empty() {
        event!(Level::INFO, "no seeds published yet, starting a new cluster");
        return Ok(0);
    }

    let reached = cluster.join(seeds.join_addrs()).await?;
    event!(
        Level::INFO,
        "joined cluster through {} of {} seed(s)",
        reached,
        seeds.seeds.len()
    );
    Ok(reached)
}

/// Fetches seeds and joins them, retrying up to `attempts` times with `delay` in between.
/// The last error is returned once every attempt failed.
pub async fn join_from_seed(
    cluster: &dyn Cluster,
    provider: &dyn Provider,
    attempts: usize,
    delay: Duration,
) -> Result<usize> {
    let mut last_err = Error::Logic {
        reason: "join_from_seed called with zero attempts".to_string(),
    };

    for attempt in 1..=attempts {
        match join_once(cluster, provider).await {
            Ok(reached) => return Ok(reached),
            Err(err) => {
                event!(
                    Level::WARN,
                    "attempt {} to initialise from seed failed: {}",
                    attempt,
                    err
                );
                last_err = err;
            }
        }

        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }

    Err(last_err)
}
