//! The `ServerContext` holds the state shared across the server: the
//! authority, the cache, the outgoing client and the configuration. All
//! collaborators are plain fields so tests and embedders can inject their
//! own; `ServerContext::new` assembles the network-backed defaults.

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::dns::authority::Authority;
use crate::dns::cache::SynchronizedCache;
use crate::dns::client::{DnsClient, DnsNetworkClient, NetworkTransport, TransportConfig};
use crate::dns::resolve::{
    DnsResolver, ForwardingDnsResolver, RecursiveDnsResolver, ResolverConfig,
};
use crate::dns::server::ServerConfig;

pub struct ServerStatistics {
    pub tcp_query_count: AtomicUsize,
    pub udp_query_count: AtomicUsize,
}

impl ServerStatistics {
    pub fn get_tcp_query_count(&self) -> usize {
        self.tcp_query_count.load(Ordering::Acquire)
    }

    pub fn get_udp_query_count(&self) -> usize {
        self.udp_query_count.load(Ordering::Acquire)
    }
}

/// DNS resolution strategy
#[derive(Clone, Debug, PartialEq)]
pub enum ResolveStrategy {
    /// Perform recursive resolution starting from the root servers
    Recursive,
    /// Forward all queries to an upstream DNS server
    Forward { host: IpAddr, port: u16 },
}

pub struct ServerContext {
    pub authority: Authority,
    pub cache: Arc<SynchronizedCache>,
    pub client: Arc<dyn DnsClient>,
    pub resolve_strategy: ResolveStrategy,
    pub allow_recursive: bool,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub statistics: ServerStatistics,
    pub resolver_config: ResolverConfig,
    pub server_config: ServerConfig,
}

impl Default for ServerContext {
    fn default() -> Self {
        ServerContext::new()
    }
}

impl ServerContext {
    pub fn new() -> ServerContext {
        let resolver_config = ResolverConfig::default();

        let transport_config = TransportConfig {
            timeout: resolver_config.timeout,
            retry_count: resolver_config.retry_count,
            ..TransportConfig::default()
        };
        let transport = Arc::new(NetworkTransport::new(transport_config.clone()));

        ServerContext {
            authority: Authority::new(),
            cache: Arc::new(SynchronizedCache::new()),
            client: Arc::new(DnsNetworkClient::with_transport(transport, transport_config)),
            resolve_strategy: ResolveStrategy::Recursive,
            allow_recursive: true,
            enable_udp: true,
            enable_tcp: true,
            statistics: ServerStatistics {
                tcp_query_count: AtomicUsize::new(0),
                udp_query_count: AtomicUsize::new(0),
            },
            resolver_config,
            server_config: ServerConfig::default(),
        }
    }

    pub fn create_resolver(&self, ptr: Arc<ServerContext>) -> Box<dyn DnsResolver> {
        match self.resolve_strategy {
            ResolveStrategy::Recursive => Box::new(RecursiveDnsResolver::new(ptr)),
            ResolveStrategy::Forward { host, port } => {
                Box::new(ForwardingDnsResolver::new(ptr, (host, port)))
            }
        }
    }
}

#[cfg(test)]
pub mod tests {

    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use super::*;
    use crate::dns::client::tests::{DnsStubClient, StubCallback};

    pub fn create_test_context(callback: Box<StubCallback>) -> Arc<ServerContext> {
        Arc::new(ServerContext {
            authority: Authority::new(),
            cache: Arc::new(SynchronizedCache::new()),
            client: Arc::new(DnsStubClient::new(callback)),
            resolve_strategy: ResolveStrategy::Recursive,
            allow_recursive: true,
            enable_udp: true,
            enable_tcp: true,
            statistics: ServerStatistics {
                tcp_query_count: AtomicUsize::new(0),
                udp_query_count: AtomicUsize::new(0),
            },
            resolver_config: ResolverConfig::default(),
            server_config: ServerConfig::default(),
        })
    }
}
