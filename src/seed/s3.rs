//! Object store backed [`Provider`].
//!
//! Seeds live in a single json document (see [`Seeds`]) stored under a well known key.
//! Load balancers need read and write access to the object, everything else only reads it.
//!
//! A missing object simply means no load balancer has published itself yet, so it is treated
//! as an empty seed list rather than an error. Every store call is bounded by a timeout so a
//! stalled store can't hang node startup.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{aws::AmazonS3Builder, path::Path, ObjectStore, PutPayload};
use serde::{Deserialize, Serialize};
use tracing::{event, Level};

use super::{Provider, Seed, Seeds, DEFAULT_KEY};
use crate::{
    error::{Error, Result},
    resolver::IpResolver,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub key: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl S3Config {
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(Error::Config {
                reason: "missing required 'bucket' in s3 provider config".to_string(),
            });
        }

        if self.region.is_empty() {
            return Err(Error::Config {
                reason: "missing required 'region' in s3 provider config".to_string(),
            });
        }

        Ok(())
    }
}

pub struct S3Provider {
    store: Arc<dyn ObjectStore>,
    key: Path,
    timeout: Duration,
}

impl std::fmt::Debug for S3Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "S3Provider {{ store: {}, key: {} }}", self.store, self.key)
    }
}

impl S3Provider {
    /// Builds a provider talking to a real bucket. Credentials are picked up from the usual
    /// `AWS_*` environment variables.
    pub fn new(config: S3Config) -> Result<Self> {
        config.validate()?;

        let store = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .build()
            .map_err(|e| Error::Config {
                reason: format!("unable to configure s3 seed store - {}", e),
            })?;

        let timeout = config
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT);

        Ok(Self::with_store(Arc::new(store), config.key, timeout))
    }

    /// Builds a provider on top of any [`ObjectStore`].
    pub fn with_store(store: Arc<dyn ObjectStore>, key: Option<String>, timeout: Duration) -> Self {
        let key = match key {
            Some(key) if !key.is_empty() => key,
            _ => DEFAULT_KEY.to_string(),
        };

        Self {
            store,
            key: Path::from(key),
            timeout,
        }
    }

    /// Downloads the raw seed document. `None` means the object doesn't exist yet.
    async fn download(&self) -> Result<Option<Bytes>> {
        let download = async {
            match self.store.get(&self.key).await {
                Ok(result) => result.bytes().await.map(Some).map_err(Error::from),
                Err(object_store::Error::NotFound { .. }) => Ok(None),
                Err(err) => Err(Error::from(err)),
            }
        };

        tokio::time::timeout(self.timeout, download).await?
    }

    async fn upload(&self, seeds: &Seeds) -> Result<()> {
        let body = serde_json::to_vec(seeds)?;
        tokio::time::timeout(
            self.timeout,
            self.store.put(&self.key, PutPayload::from(body)),
        )
        .await??;

        Ok(())
    }
}

#[async_trait]
impl Provider for S3Provider {
    async fn fetch_seed(&self) -> Result<Seeds> {
        let Some(raw) = self.download().await? else {
            event!(Level::INFO, "no seed document at '{}' yet", self.key);
            return Ok(Seeds::default());
        };

        event!(Level::DEBUG, "downloaded {} bytes of seed document", raw.len());
        serde_json::from_slice(&raw).map_err(|e| Error::Io {
            reason: format!("unable to parse downloaded seed - {}", e),
        })
    }

    /// Fetches the current document, merges this node's address into it and uploads it again.
    /// Pushing an address that is already present is a no-op.
    async fn push_seed(&self, resolver: &dyn IpResolver, port: &str) -> Result<()> {
        let own = Seed::new(resolver.resolve_ip().await?, port);

        let mut seeds = match self.download().await? {
            Some(raw) => serde_json::from_slice::<Seeds>(&raw).unwrap_or_else(|err| {
                event!(
                    Level::WARN,
                    "unable to parse downloaded seed, overwriting it: {}",
                    err
                );
                Seeds::default()
            }),
            None => Seeds::default(),
        };

        if seeds.contains(&own) {
            event!(
                Level::DEBUG,
                "skipping seed push, {} is already published",
                own.join_addr()
            );
            return Ok(());
        }

        seeds.seeds.push(own);
        self.upload(&seeds).await?;
        event!(Level::INFO, "pushed seed to '{}'", self.key);

        Ok(())
    }
}
