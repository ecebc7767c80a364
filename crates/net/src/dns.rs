//! Name resolution for outbound connections.
//!
//! [`Resolve`] is the seam the connector goes through, so callers can plug
//! caching or test resolvers. [`DnsResolver`] is the default implementation
//! over the runtime's resolver thread pool.

use std::net::IpAddr;

use async_trait::async_trait;
use tokio::net::lookup_host;

use crate::protocol::ConnectionError;
use crate::utils::ensure;

/// Resolves a host name to candidate addresses.
///
/// Implementations report failures as [`ConnectionError::Dns`]; an empty
/// result set is an error, never an empty `Vec`.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ConnectionError>;
}

/// System resolver backed by `tokio::net::lookup_host`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DnsResolver;

#[async_trait]
impl Resolve for DnsResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ConnectionError> {
        // the port is irrelevant for resolution, any value satisfies ToSocketAddrs
        let addrs = lookup_host((host, 0)).await.map_err(|e| ConnectionError::dns(host, e))?;
        let ips: Vec<IpAddr> = addrs.map(|addr| addr.ip()).collect();
        ensure!(!ips.is_empty(), ConnectionError::dns_empty(host));
        Ok(ips)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_localhost() {
        let ips = DnsResolver.resolve("localhost").await.unwrap();
        assert!(!ips.is_empty());
        assert!(ips.iter().all(|ip| ip.is_loopback()));
    }

    #[tokio::test]
    async fn unknown_host_is_a_dns_error() {
        let result = DnsResolver.resolve("host.invalid").await;
        assert!(matches!(result, Err(ConnectionError::Dns { .. })));
    }
}
