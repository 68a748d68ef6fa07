//! Resolver implementations providing different strategies for answering
//! incoming queries
//!
//! `RecursiveDnsResolver` walks the hierarchy from the root servers,
//! following referrals and CNAME chains with bounded work.
//! `ForwardingDnsResolver` hands the question to a single upstream server
//! instead. Both consult the authority first and share the response cache.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use derive_more::{Display, Error, From};

use crate::dns::context::ServerContext;
use crate::dns::protocol::{
    DnsPacket, ProtocolError, QueryClass, QueryType, ResultCode,
};
use crate::dns::records::RData;

/// Upper bound on outer iterations of the resolution loop.
const MAX_ITERATIONS: usize = 32;

/// Upper bound on CNAME redirects for a single query.
const MAX_CNAME_DEPTH: usize = 16;

/// The 13 IANA root name servers.
pub const ROOT_SERVERS: [(&str, Ipv4Addr); 13] = [
    ("a.root-servers.net", Ipv4Addr::new(198, 41, 0, 4)),
    ("b.root-servers.net", Ipv4Addr::new(192, 228, 79, 201)),
    ("c.root-servers.net", Ipv4Addr::new(192, 33, 4, 12)),
    ("d.root-servers.net", Ipv4Addr::new(199, 7, 91, 13)),
    ("e.root-servers.net", Ipv4Addr::new(192, 203, 230, 10)),
    ("f.root-servers.net", Ipv4Addr::new(192, 5, 5, 241)),
    ("g.root-servers.net", Ipv4Addr::new(192, 112, 36, 4)),
    ("h.root-servers.net", Ipv4Addr::new(128, 63, 2, 53)),
    ("i.root-servers.net", Ipv4Addr::new(192, 36, 148, 17)),
    ("j.root-servers.net", Ipv4Addr::new(192, 58, 128, 30)),
    ("k.root-servers.net", Ipv4Addr::new(193, 0, 14, 129)),
    ("l.root-servers.net", Ipv4Addr::new(199, 7, 83, 42)),
    ("m.root-servers.net", Ipv4Addr::new(202, 12, 27, 33)),
];

#[derive(Debug, Display, From, Error)]
pub enum ResolveError {
    Client(crate::dns::client::ClientError),
    Cache(crate::dns::cache::CacheError),
    Protocol(ProtocolError),
    CnameLoop,
    IterationLimit,
    NoReachableNameserver,
}

type Result<T> = std::result::Result<T, ResolveError>;

#[derive(Clone, Debug)]
pub struct ResolverConfig {
    pub timeout: Duration,
    pub retry_count: usize,
    pub use_cache: bool,
    pub root_servers: Vec<IpAddr>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            timeout: Duration::from_secs(5),
            retry_count: 3,
            use_cache: true,
            root_servers: ROOT_SERVERS
                .iter()
                .map(|&(_, addr)| IpAddr::V4(addr))
                .collect(),
        }
    }
}

/// Trait for DNS resolution strategies
///
/// `resolve` answers from the authority when possible, then from the
/// cache, and only then performs the strategy-specific work. The typed
/// helpers post-filter the answer section into decoded payloads; an
/// empty-but-valid answer is an empty list, not an error.
#[async_trait]
pub trait DnsResolver: Send {
    fn get_context(&self) -> Arc<ServerContext>;

    async fn resolve(
        &mut self,
        qname: &str,
        qtype: QueryType,
        qclass: QueryClass,
        recursive: bool,
    ) -> Result<DnsPacket> {
        log::debug!("attempting to resolve {} {:?}", qname, qtype);

        if let QueryType::Unknown(_) = qtype {
            let mut packet = DnsPacket::new();
            packet.header.rescode = ResultCode::NOTIMP;
            return Ok(packet);
        }

        let context = self.get_context();

        if let Some(qr) = context.authority.query(qname, qtype, qclass) {
            return Ok(qr);
        }

        if qclass != QueryClass::In {
            // Only internet-class questions recurse.
            let mut packet = DnsPacket::new();
            packet.header.rescode = ResultCode::NOTIMP;
            return Ok(packet);
        }

        if !recursive || !context.allow_recursive {
            // Not authoritative for the name and recursion is not offered.
            let mut packet = DnsPacket::new();
            packet.header.rescode = ResultCode::NXDOMAIN;
            return Ok(packet);
        }

        if context.resolver_config.use_cache {
            if let Some(qr) = context.cache.lookup(qname, qtype, QueryClass::In) {
                return Ok(qr);
            }
        }

        self.perform(qname, qtype).await
    }

    async fn perform(&mut self, qname: &str, qtype: QueryType) -> Result<DnsPacket>;

    async fn resolve_a(&mut self, qname: &str) -> Result<Vec<Ipv4Addr>> {
        let response = self
            .resolve(qname, QueryType::A, QueryClass::In, true)
            .await?;
        Ok(response
            .answers
            .iter()
            .filter_map(|rec| match rec.rdata {
                RData::A { addr } => Some(addr),
                _ => None,
            })
            .collect())
    }

    async fn resolve_aaaa(&mut self, qname: &str) -> Result<Vec<Ipv6Addr>> {
        let response = self
            .resolve(qname, QueryType::Aaaa, QueryClass::In, true)
            .await?;
        Ok(response
            .answers
            .iter()
            .filter_map(|rec| match rec.rdata {
                RData::Aaaa { addr } => Some(addr),
                _ => None,
            })
            .collect())
    }

    async fn resolve_mx(&mut self, qname: &str) -> Result<Vec<(u16, String)>> {
        let response = self
            .resolve(qname, QueryType::Mx, QueryClass::In, true)
            .await?;
        let mut exchanges: Vec<(u16, String)> = response
            .answers
            .iter()
            .filter_map(|rec| match rec.rdata {
                RData::Mx {
                    priority,
                    ref host,
                } => Some((priority, host.clone())),
                _ => None,
            })
            .collect();
        exchanges.sort();
        Ok(exchanges)
    }

    async fn resolve_ns(&mut self, qname: &str) -> Result<Vec<String>> {
        let response = self
            .resolve(qname, QueryType::Ns, QueryClass::In, true)
            .await?;
        Ok(response
            .answers
            .iter()
            .filter_map(|rec| match rec.rdata {
                RData::Ns { ref host } => Some(host.clone()),
                _ => None,
            })
            .collect())
    }

    async fn resolve_cname(&mut self, qname: &str) -> Result<Vec<String>> {
        let response = self
            .resolve(qname, QueryType::Cname, QueryClass::In, true)
            .await?;
        Ok(response
            .answers
            .iter()
            .filter_map(|rec| match rec.rdata {
                RData::Cname { ref host } => Some(host.clone()),
                _ => None,
            })
            .collect())
    }

    async fn resolve_txt(&mut self, qname: &str) -> Result<Vec<Vec<String>>> {
        let response = self
            .resolve(qname, QueryType::Txt, QueryClass::In, true)
            .await?;
        Ok(response
            .answers
            .iter()
            .filter_map(|rec| match rec.rdata {
                RData::Txt { ref strings } => Some(strings.clone()),
                _ => None,
            })
            .collect())
    }
}

/// A forwarding DNS resolver
///
/// This resolver uses an external DNS server to service a query
pub struct ForwardingDnsResolver {
    context: Arc<ServerContext>,
    server: (IpAddr, u16),
}

impl ForwardingDnsResolver {
    pub fn new(context: Arc<ServerContext>, server: (IpAddr, u16)) -> ForwardingDnsResolver {
        ForwardingDnsResolver { context, server }
    }
}

#[async_trait]
impl DnsResolver for ForwardingDnsResolver {
    fn get_context(&self) -> Arc<ServerContext> {
        self.context.clone()
    }

    async fn perform(&mut self, qname: &str, qtype: QueryType) -> Result<DnsPacket> {
        let result = self
            .context
            .client
            .send_query(qname, qtype, self.server, true)
            .await?;

        if self.context.resolver_config.use_cache {
            self.context
                .cache
                .store(qname, qtype, QueryClass::In, &result)?;
        }

        Ok(result)
    }
}

/// A recursive DNS resolver
///
/// This resolver answers any request by walking down from the root
/// servers of the internet.
pub struct RecursiveDnsResolver {
    context: Arc<ServerContext>,
}

impl RecursiveDnsResolver {
    pub fn new(context: Arc<ServerContext>) -> RecursiveDnsResolver {
        RecursiveDnsResolver { context }
    }

    /// Ask each candidate in turn; the first usable response wins. Servers
    /// that fail, or answer with a server-side error code, are skipped.
    async fn query_nameservers(
        &self,
        qname: &str,
        qtype: QueryType,
        servers: &[IpAddr],
    ) -> Result<DnsPacket> {
        for &server in servers {
            log::debug!("attempting lookup of {:?} {} with ns {}", qtype, qname, server);

            match self
                .context
                .client
                .send_query(qname, qtype, (server, 53), true)
                .await
            {
                Ok(response) => match response.header.rescode {
                    ResultCode::SERVFAIL
                    | ResultCode::REFUSED
                    | ResultCode::NOTIMP
                    | ResultCode::FORMERR => {
                        log::debug!(
                            "{} answered {:?} - trying next server",
                            server,
                            response.header.rescode
                        );
                    }
                    _ => return Ok(response),
                },
                Err(e) => {
                    log::debug!("query against {} failed: {}", server, e);
                }
            }
        }

        Err(ResolveError::NoReachableNameserver)
    }
}

#[async_trait]
impl DnsResolver for RecursiveDnsResolver {
    fn get_context(&self) -> Arc<ServerContext> {
        self.context.clone()
    }

    async fn perform(&mut self, qname: &str, qtype: QueryType) -> Result<DnsPacket> {
        let context = self.get_context();
        let use_cache = context.resolver_config.use_cache;

        let mut nameservers = context.resolver_config.root_servers.clone();
        let mut qname = qname.to_lowercase();
        let mut cname_depth = 0;

        for _ in 0..MAX_ITERATIONS {
            if use_cache {
                if let Some(cached) = context.cache.lookup(&qname, qtype, QueryClass::In) {
                    return Ok(cached);
                }
            }

            let response = self.query_nameservers(&qname, qtype, &nameservers).await?;

            if response.header.rescode == ResultCode::NXDOMAIN {
                return Err(ResolveError::Protocol(ProtocolError::NameError));
            }

            if response.has_answer(&qname, qtype) {
                if use_cache {
                    context.cache.store(&qname, qtype, QueryClass::In, &response)?;
                }
                return Ok(response);
            }

            if let Some(target) = response.cname_target(&qname) {
                cname_depth += 1;
                if cname_depth > MAX_CNAME_DEPTH {
                    return Err(ResolveError::CnameLoop);
                }

                log::debug!("following CNAME from {} to {}", qname, target);
                qname = target.to_lowercase();
                // Start over from the roots for the new name.
                nameservers = context.resolver_config.root_servers.clone();
                continue;
            }

            let referral = response.referral_hosts(&qname);
            if !referral.is_empty() {
                // Glue in the additional section saves a lookup.
                let mut next: Vec<IpAddr> = Vec::new();
                for host in &referral {
                    next.extend(response.glue_for(host));
                }

                if next.is_empty() {
                    for host in &referral {
                        match self.resolve(host, QueryType::A, QueryClass::In, true).await {
                            Ok(ns_response) => {
                                next.extend(ns_response.answer_a_records(host));
                                if !next.is_empty() {
                                    break;
                                }
                            }
                            Err(e) => {
                                log::debug!("failed to resolve name server {}: {}", host, e);
                            }
                        }
                    }
                }

                if !next.is_empty() {
                    nameservers = next;
                    continue;
                }
            }

            // No answer, no chain to follow, nowhere further to go.
            return Err(ResolveError::Protocol(ProtocolError::NameError));
        }

        Err(ResolveError::IterationLimit)
    }
}
