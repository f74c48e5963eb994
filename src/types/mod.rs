//! Plain data types shared by every node kind.
//!
//! An [`Application`] is a routable service advertised by a backend. An [`Upstream`] is a peer
//! as seen by the gossip transport. The load balancer keeps an [`UpstreamApplicationMap`]
//! relating the two.
use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Port 80 always serves the HTTP -> HTTPS redirect listener.
pub const RESERVED_LISTEN_PORT: &str = "80";

/// Application is a service running on a backend. Backends advertise their applications
/// through node metadata and load balancers turn them into proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Application {
    pub name: String,
    // BTreeSet keeps domains sorted and deduplicated so rendering is deterministic
    pub domains: BTreeSet<String>,
    pub listen_port: String,
    pub application_port: String,
    pub protocol: String,
}

impl Application {
    pub fn new<I, S>(
        name: impl Into<String>,
        domains: I,
        listen_port: impl Into<String>,
        application_port: impl Into<String>,
        protocol: impl Into<String>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let application = Self {
            name: name.into(),
            domains: domains.into_iter().map(Into::into).collect(),
            listen_port: listen_port.into(),
            application_port: application_port.into(),
            protocol: protocol.into(),
        };
        application.validate()?;

        Ok(application)
    }

    /// Checks the invariants every configured application must hold.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config {
                reason: "application name must not be empty".to_string(),
            });
        }

        if self.domains.is_empty() {
            return Err(Error::Config {
                reason: format!("application '{}' must have at least one domain", self.name),
            });
        }

        if self.listen_port == RESERVED_LISTEN_PORT {
            return Err(Error::Config {
                reason: format!(
                    "application '{}' can't listen on port {}, it is reserved for the http redirect",
                    self.name, RESERVED_LISTEN_PORT
                ),
            });
        }

        Ok(())
    }

    /// Joins all domains with the given separator, in sorted order.
    pub fn domain_string(&self, separator: &str) -> String {
        self.domains
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(separator)
    }
}

/// Upstream is a condensed version of a backend: the name the gossip transport gave it and the
/// address traffic should be routed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Upstream {
    pub name: String,
    pub address: String,
}

impl Upstream {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Every known backend peer and the applications it advertises.
pub type UpstreamApplicationMap = HashMap<Upstream, Vec<Application>>;
