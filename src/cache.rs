//! The resolver cache consumed by the client.
//!
//! Resolved addresses are kept in a cache keyed by domain name and address
//! family so repeated lookups do not touch the session at all. The cache
//! is an external collaborator: the engine only ever calls [lookup] and
//! [insert] through the [ResolverCache] trait and leaves replacement and
//! expiry policy to the implementation.
//!
//! [MokaCache] is a policy free adapter over [moka]'s synchronous cache
//! that honors the TTL handed to [insert] through a per-entry expiry. Any
//! other implementation, including one shared with other resolvers of the
//! host system, can be used instead.
//!
//! [lookup]: ResolverCache::lookup
//! [insert]: ResolverCache::insert

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use crate::msg::AddressFamily;
use moka::sync::Cache;
use moka::Expiry;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Default number of entries kept by [MokaCache].
const DEF_CACHE_ENTRIES: u64 = 100;

//------------ ResolverCache -------------------------------------------------

/// A cache of resolved addresses.
pub trait ResolverCache: Send + Sync {
    /// Look up a cached address for `name`.
    ///
    /// Only entries stored for the same address family match.
    fn lookup(&self, name: &str, family: AddressFamily) -> Option<IpAddr>;

    /// Insert a resolved address, valid for `ttl`.
    fn insert(
        &self,
        name: &str,
        family: AddressFamily,
        addr: IpAddr,
        ttl: Duration,
    );
}

//------------ MokaCache -----------------------------------------------------

/// A [ResolverCache] backed by an in-process [moka] cache.
#[derive(Clone)]
pub struct MokaCache {
    /// The underlying cache. The TTL is stored with the address so the
    /// expiry policy can read it back.
    cache: Cache<(String, AddressFamily), (IpAddr, Duration)>,
}

impl MokaCache {
    /// Creates a cache with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEF_CACHE_ENTRIES)
    }

    /// Creates a cache that keeps at most `entries` addresses.
    pub fn with_capacity(entries: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(entries)
                .expire_after(TtlExpiry)
                .build(),
        }
    }
}

impl Default for MokaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverCache for MokaCache {
    fn lookup(&self, name: &str, family: AddressFamily) -> Option<IpAddr> {
        self.cache
            .get(&(name.to_string(), family))
            .map(|(addr, _)| addr)
    }

    fn insert(
        &self,
        name: &str,
        family: AddressFamily,
        addr: IpAddr,
        ttl: Duration,
    ) {
        if ttl.is_zero() {
            return;
        }
        self.cache.insert((name.to_string(), family), (addr, ttl));
    }
}

//------------ TtlExpiry -----------------------------------------------------

/// Expires each entry after the TTL stored with it.
struct TtlExpiry;

impl Expiry<(String, AddressFamily), (IpAddr, Duration)> for TtlExpiry {
    fn expire_after_create(
        &self,
        _key: &(String, AddressFamily),
        value: &(IpAddr, Duration),
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.1)
    }
}

//============ Tests =========================================================
