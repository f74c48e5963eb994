//! Mock implementation for [`Provider`]
//!
//! Faults are injected per operation through [`MockProviderBuilder`] and every call is counted,
//! so tests can assert on retries and backoff without touching a real seed store.
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

use async_trait::async_trait;

use super::{Provider, Seed, Seeds};
use crate::{
    error::{Error, Result},
    resolver::IpResolver,
    test_utils::fault::{Fault, When},
};

#[derive(Debug, Default)]
pub struct Stats {
    pub n_calls: AtomicUsize,
}

impl Stats {
    fn record(&self) -> usize {
        self.n_calls.fetch_add(1, Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.n_calls.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct MockProviderStats {
    pub fetch: Stats,
    pub push: Stats,
}

#[derive(Debug, Clone, Default)]
pub struct MockProviderFaults {
    pub fetch: Fault,
    pub push: Fault,
}

/// Keeps seeds in memory. Successful pushes append the resolved address.
#[derive(Debug)]
pub struct MockProvider {
    pub faults: MockProviderFaults,
    pub stats: MockProviderStats,
    seeds: Mutex<Seeds>,
}

impl MockProvider {
    pub fn seeds(&self) -> Seeds {
        self.seeds.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn fetch_seed(&self) -> Result<Seeds> {
        let call = self.stats.fetch.record();
        if self.faults.fetch.triggers(call) {
            return Err(Error::Io {
                reason: "Mocked error on fetch_seed".to_string(),
            });
        }

        Ok(self.seeds())
    }

    async fn push_seed(&self, resolver: &dyn IpResolver, port: &str) -> Result<()> {
        let call = self.stats.push.record();
        if self.faults.push.triggers(call) {
            return Err(Error::Io {
                reason: "Mocked error on push_seed".to_string(),
            });
        }

        let seed = Seed::new(resolver.resolve_ip().await?, port);
        let mut guard = self.seeds.lock().unwrap();
        if !guard.contains(&seed) {
            guard.seeds.push(seed);
        }

        Ok(())
    }
}

pub struct MockProviderBuilder {
    faults: MockProviderFaults,
    seeds: Seeds,
}

impl Default for MockProviderBuilder {
    fn default() -> Self {
        let faults = MockProviderFaults {
            fetch: Fault { when: When::Never },
            push: Fault { when: When::Never },
        };

        Self {
            faults,
            seeds: Seeds::default(),
        }
    }
}

impl MockProviderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fetch_fault(mut self, when: When) -> Self {
        self.faults.fetch = Fault { when };
        self
    }

    pub fn with_push_fault(mut self, when: When) -> Self {
        self.faults.push = Fault { when };
        self
    }

    pub fn with_seeds(mut self, seeds: Vec<Seed>) -> Self {
        self.seeds = Seeds { seeds };
        self
    }

    pub fn build(self) -> MockProvider {
        MockProvider {
            faults: self.faults,
            stats: Default::default(),
            seeds: Mutex::new(self.seeds),
        }
    }
}
