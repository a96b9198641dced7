//! Source IPs suspected of not being genuine relay endpoints.
//!
//! Entries expire on their own. The retry loop writes entries through
//! [`AddressBlacklist`]; [`CurlTransport`](crate::transport::CurlTransport)
//! reads them back through [`IpBlacklist::is_blacklisted`] before reusing a
//! pooled connection or dialling an address.

use crate::body::Body;
use crate::transport::RemoteAddr;
use http::Response;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteAddrError {
    #[error("response does not record its remote address")]
    Unknown,
}

/// Blacklist manager used by the retry loop when a response looks forged.
pub trait AddressBlacklist: Send + Sync {
    /// Address of the peer that produced `response`.
    fn remote_addr(&self, response: &Response<Body>) -> Result<SocketAddr, RemoteAddrError>;

    /// Refuse `ip` until `expiry`.
    fn blacklist(&self, ip: IpAddr, expiry: Instant);
}

/// In-memory expiring blacklist.
#[derive(Debug, Default)]
pub struct IpBlacklist {
    entries: Mutex<HashMap<IpAddr, Instant>>,
}

impl IpBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `ip` is listed and its entry has not expired.
    pub fn is_blacklisted(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.retain(|_, expiry| *expiry > now);
        entries.contains_key(&ip)
    }

    /// Expiry of the entry for `ip`, expired or not.
    pub fn expiry(&self, ip: IpAddr) -> Option<Instant> {
        self.lock().get(&ip).copied()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|expiry| **expiry > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<IpAddr, Instant>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AddressBlacklist for IpBlacklist {
    fn remote_addr(&self, response: &Response<Body>) -> Result<SocketAddr, RemoteAddrError> {
        response
            .extensions()
            .get::<RemoteAddr>()
            .map(|RemoteAddr(addr)| *addr)
            .ok_or(RemoteAddrError::Unknown)
    }

    fn blacklist(&self, ip: IpAddr, expiry: Instant) {
        let mut entries = self.lock();
        // Keep the later expiry if the address is already listed.
        let slot = entries.entry(ip).or_insert(expiry);
        if *slot < expiry {
            *slot = expiry;
        }
    }
}
