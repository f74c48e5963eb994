use std::{
    net::{IpAddr, Ipv6Addr},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use tracing::{event, Level};

use super::IpResolver;
use crate::error::{Error, Result};

/// How many times a cached address is handed out before interfaces are scanned again
const MAX_CACHED_USES: usize = 10;

/// Resolves the first IPv6 global unicast address found on this host's interfaces.
///
/// The address is resolved at construction time and cached. After [`MAX_CACHED_USES`] uses the
/// interfaces are scanned again, which may fail if the address went away.
pub struct Ipv6UnicastResolver {
    cache: Mutex<CachedAddress>,
    enumerate_fn: fn() -> Result<String>,
}

struct CachedAddress {
    address: String,
    uses: usize,
}

impl std::fmt::Debug for Ipv6UnicastResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.cache.try_lock() {
            Ok(cache) => write!(f, "Ipv6UnicastResolver({})", cache.address),
            Err(_) => write!(f, "Ipv6UnicastResolver(<locked>)"),
        }
    }
}

impl Ipv6UnicastResolver {
    pub fn new() -> Result<Self> {
        Self::new_with_enumerate_fn(enumerate_ipv6_unicast_address)
    }

    pub fn new_with_enumerate_fn(enumerate_fn: fn() -> Result<String>) -> Result<Self> {
        let address = enumerate_fn()?;
        Ok(Self {
            cache: Mutex::new(CachedAddress { address, uses: 0 }),
            enumerate_fn,
        })
    }

    fn acquire_lock(&self) -> Result<MutexGuard<CachedAddress>> {
        self.cache.lock().map_err(|_| Error::Logic {
            reason: "Unable to acquire lock".to_string(),
        })
    }
}

#[async_trait]
impl IpResolver for Ipv6UnicastResolver {
    async fn resolve_ip(&self) -> Result<String> {
        let mut guard = self.acquire_lock()?;
        guard.uses += 1;

        if guard.uses > MAX_CACHED_USES {
            event!(
                Level::DEBUG,
                "re-resolving ipv6 unicast address after {} cached uses",
                MAX_CACHED_USES
            );
            guard.uses = 0;
            guard.address = (self.enumerate_fn)()?;
        }

        Ok(guard.address.clone())
    }
}

/// Unicast, not link-local, not loopback and not an embedded IPv4 address.
fn is_global_unicast(addr: &Ipv6Addr) -> bool {
    !addr.is_unspecified()
        && !addr.is_loopback()
        && !addr.is_multicast()
        && (addr.segments()[0] & 0xffc0) != 0xfe80
        && addr.to_ipv4_mapped().is_none()
}

fn first_global_unicast<I>(addrs: I) -> Option<Ipv6Addr>
where
    I: IntoIterator<Item = IpAddr>,
{
    addrs.into_iter().find_map(|addr| match addr {
        IpAddr::V6(addr) if is_global_unicast(&addr) => Some(addr),
        _ => None,
    })
}

/// Scans every interface and returns the first global unicast IPv6 address, bracketed.
pub fn enumerate_ipv6_unicast_address() -> Result<String> {
    let interfaces = local_ip_address::list_afinet_netifas().map_err(|e| Error::Io {
        reason: format!("unable to list network interfaces - {}", e),
    })?;

    let addr = first_global_unicast(interfaces.into_iter().map(|(_, addr)| addr)).ok_or(
        Error::Io {
            reason: "couldn't resolve an IPv6 global unicast address".to_string(),
        },
    )?;

    let resolved = format!("[{}]", addr);
    event!(Level::INFO, "resolved ipv6 address: {}", resolved);
    Ok(resolved)
}
