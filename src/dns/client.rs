//! Client for sending DNS queries to other servers
//!
//! Two seams live here. `DnsTransport` is the byte-level contract the
//! engine consumes: one request datagram or stream exchange against an
//! endpoint. `DnsClient` sits above it and speaks in packets: it assigns a
//! random transaction id, verifies the id on the way back, and retries
//! truncated UDP responses over TCP.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use derive_more::{Display, Error, From};
use rand::random;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use crate::dns::buffer::{BytePacketBuffer, DecodeError, PacketBuffer};
use crate::dns::netutil::{read_packet_length, write_packet_length};
use crate::dns::protocol::{DnsPacket, DnsQuestion, QueryType};

/// The largest plain UDP response we are prepared to receive.
const MAX_UDP_PACKET: usize = 512;

#[derive(Debug, Display, Error)]
pub enum TransportError {
    Timeout,
    NoRoute,
    ConnectionRefused,
    PeerReset,
    Io(std::io::Error),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::Timeout,
            ErrorKind::ConnectionRefused => TransportError::ConnectionRefused,
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                TransportError::PeerReset
            }
            _ => TransportError::Io(err),
        }
    }
}

#[derive(Debug, Display, From, Error)]
pub enum ClientError {
    Decode(DecodeError),
    Transport(TransportError),
    IdMismatch,
    LookupFailed,
}

type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proto {
    Udp,
    Tcp,
}

/// A remote name server endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub addr: IpAddr,
    pub port: u16,
    pub proto: Proto,
}

impl Endpoint {
    pub fn udp(addr: IpAddr, port: u16) -> Endpoint {
        Endpoint {
            addr,
            port,
            proto: Proto::Udp,
        }
    }

    pub fn tcp(addr: IpAddr, port: u16) -> Endpoint {
        Endpoint {
            addr,
            port,
            proto: Proto::Tcp,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub retry_count: usize,
    pub use_udp: bool,
    pub use_tcp: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            timeout: Duration::from_secs(5),
            retry_count: 3,
            use_udp: true,
            use_tcp: true,
        }
    }
}

/// The byte-level transport contract: send one encoded message to an
/// endpoint and return the peer's bytes. This is the only async boundary
/// the engine depends on; socket management stays behind it.
#[async_trait]
pub trait DnsTransport: Send + Sync {
    async fn send(
        &self,
        request: &[u8],
        endpoint: Endpoint,
    ) -> std::result::Result<Vec<u8>, TransportError>;
}

/// Tokio-backed transport. Every in-flight UDP request owns an ephemeral
/// socket, so responses cannot cross between queries; TCP connections are
/// opened per request. Each attempt runs under the configured timeout, and
/// failed attempts are retried up to `retry_count` times.
pub struct NetworkTransport {
    config: TransportConfig,
}

impl NetworkTransport {
    pub fn new(config: TransportConfig) -> NetworkTransport {
        NetworkTransport { config }
    }

    async fn udp_exchange(
        &self,
        request: &[u8],
        endpoint: Endpoint,
    ) -> std::result::Result<Vec<u8>, TransportError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        let target = endpoint.socket_addr();
        socket.send_to(request, target).await?;

        let exchange = async {
            let mut buf = vec![0u8; MAX_UDP_PACKET];
            loop {
                let (len, src) = socket.recv_from(&mut buf).await?;
                if src == target {
                    buf.truncate(len);
                    return Ok(buf);
                }
                log::debug!("dropping datagram from unexpected peer {}", src);
            }
        };

        match timeout(self.config.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn tcp_exchange(
        &self,
        request: &[u8],
        endpoint: Endpoint,
    ) -> std::result::Result<Vec<u8>, TransportError> {
        let exchange = async {
            let mut stream = TcpStream::connect(endpoint.socket_addr()).await?;

            write_packet_length(&mut stream, request.len()).await?;
            stream.write_all(request).await?;
            stream.flush().await?;

            let len = read_packet_length(&mut stream).await? as usize;
            let mut response = vec![0u8; len];
            stream.read_exact(&mut response).await?;

            Ok(response)
        };

        match timeout(self.config.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }
}

impl Default for NetworkTransport {
    fn default() -> Self {
        NetworkTransport::new(TransportConfig::default())
    }
}

#[async_trait]
impl DnsTransport for NetworkTransport {
    async fn send(
        &self,
        request: &[u8],
        endpoint: Endpoint,
    ) -> std::result::Result<Vec<u8>, TransportError> {
        let attempts = self.config.retry_count.max(1);
        let mut last_err = TransportError::Timeout;

        for attempt in 0..attempts {
            let result = match endpoint.proto {
                Proto::Udp => self.udp_exchange(request, endpoint).await,
                Proto::Tcp => self.tcp_exchange(request, endpoint).await,
            };

            match result {
                Ok(response) => return Ok(response),
                Err(e) => {
                    log::debug!(
                        "attempt {}/{} against {} failed: {}",
                        attempt + 1,
                        attempts,
                        endpoint.socket_addr(),
                        e
                    );
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }
}

/// The packet-level client interface.
#[async_trait]
pub trait DnsClient: Send + Sync {
    async fn send_query(
        &self,
        qname: &str,
        qtype: QueryType,
        server: (IpAddr, u16),
        recursive: bool,
    ) -> Result<DnsPacket>;
}

/// Sends queries through a `DnsTransport`, UDP first. Every query carries
/// a fresh random transaction id; a response with any other id is
/// discarded. A truncated UDP response is retried over TCP.
pub struct DnsNetworkClient {
    transport: Arc<dyn DnsTransport>,
    config: TransportConfig,
}

impl DnsNetworkClient {
    pub fn new() -> DnsNetworkClient {
        let config = TransportConfig::default();
        DnsNetworkClient {
            transport: Arc::new(NetworkTransport::new(config.clone())),
            config,
        }
    }

    pub fn with_transport(
        transport: Arc<dyn DnsTransport>,
        config: TransportConfig,
    ) -> DnsNetworkClient {
        DnsNetworkClient { transport, config }
    }

    fn build_query(qname: &str, qtype: QueryType, recursive: bool) -> DnsPacket {
        let mut packet = DnsPacket::new();
        packet.header.id = random::<u16>();
        packet.header.recursion_desired = recursive;
        packet
            .questions
            .push(DnsQuestion::new(qname.to_string(), qtype));
        packet
    }

    fn check_id(expected: u16, response: DnsPacket) -> Result<DnsPacket> {
        if response.header.id != expected {
            log::warn!(
                "discarding response: transaction id {} does not match {}",
                response.header.id,
                expected
            );
            return Err(ClientError::IdMismatch);
        }
        Ok(response)
    }
}

impl Default for DnsNetworkClient {
    fn default() -> Self {
        DnsNetworkClient::new()
    }
}

#[async_trait]
impl DnsClient for DnsNetworkClient {
    async fn send_query(
        &self,
        qname: &str,
        qtype: QueryType,
        server: (IpAddr, u16),
        recursive: bool,
    ) -> Result<DnsPacket> {
        let mut packet = Self::build_query(qname, qtype, recursive);
        let id = packet.header.id;

        if self.config.use_udp {
            let mut req_buffer = BytePacketBuffer::new();
            packet.write(&mut req_buffer, 512)?;

            let endpoint = Endpoint::udp(server.0, server.1);
            match self.transport.send(&req_buffer.buf[..req_buffer.pos], endpoint).await {
                Ok(bytes) => {
                    let response = Self::check_id(id, DnsPacket::from_bytes(&bytes)?)?;
                    if !response.header.truncated_message || !self.config.use_tcp {
                        return Ok(response);
                    }
                    log::info!("truncated response from {} - retrying over TCP", server.0);
                }
                Err(e) => {
                    if !self.config.use_tcp {
                        return Err(ClientError::Transport(e));
                    }
                    log::debug!("udp query against {} failed: {} - trying TCP", server.0, e);
                }
            }
        }

        if self.config.use_tcp {
            let request = packet.to_bytes()?;
            let endpoint = Endpoint::tcp(server.0, server.1);
            let bytes = self.transport.send(&request, endpoint).await?;
            return Self::check_id(id, DnsPacket::from_bytes(&bytes)?);
        }

        Err(ClientError::LookupFailed)
    }
}
