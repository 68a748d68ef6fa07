//! The authoritative responder and the UDP and TCP server runtimes
//!
//! `execute_query` turns one parsed request into a response packet: it
//! echoes the questions, answers each one independently through the
//! configured resolver, and folds failures into the response code. The
//! servers own the sockets, decode inbound bytes, and convert undecodable
//! requests into FORMERR replies when the transaction id survives.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use derive_more::{Display, Error, From};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::dns::buffer::BytePacketBuffer;
use crate::dns::context::ServerContext;
use crate::dns::netutil::{read_packet_length, write_packet_length};
use crate::dns::protocol::{DnsPacket, ProtocolError, ResultCode};
use crate::dns::resolve::ResolveError;

#[derive(Debug, Display, From, Error)]
pub enum ServerError {
    Io(std::io::Error),
}

type Result<T> = std::result::Result<T, ServerError>;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_host: String,
    pub bind_port: u16,
    pub max_connections: usize,
    pub timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_host: "0.0.0.0".to_string(),
            bind_port: 53,
            max_connections: 128,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Common trait for DNS servers
#[async_trait]
pub trait DnsServer {
    /// Bind and start listening.
    ///
    /// This method must NOT block. Servers spawn tasks to handle requests
    /// and return once their socket is bound.
    async fn run_server(self) -> Result<()>;
}

/// Build the skeleton of a response: same id and opcode as the request,
/// RD echoed, RA reflecting whether this server offers recursion.
fn build_response_packet(context: &Arc<ServerContext>, request: &DnsPacket) -> DnsPacket {
    let mut packet = DnsPacket::new();
    packet.header.id = request.header.id;
    packet.header.opcode = request.header.opcode;
    packet.header.recursion_desired = request.header.recursion_desired;
    packet.header.recursion_available = context.allow_recursive;
    packet.header.response = true;
    packet
}

/// Synthesize a FORMERR reply for a request that failed to decode, if the
/// transaction id can still be recovered from the first two octets.
pub fn formerr_response(raw: &[u8]) -> Option<DnsPacket> {
    if raw.len() < 2 {
        return None;
    }

    let mut packet = DnsPacket::new();
    packet.header.id = ((raw[0] as u16) << 8) | (raw[1] as u16);
    packet.header.response = true;
    packet.header.rescode = ResultCode::FORMERR;

    Some(packet)
}

/// Answer a request. This always produces a packet, even when resolution
/// fails, since the client deserves a reply either way.
///
/// Multiple questions are legal per RFC 1035; each is answered on its own
/// and the sections are concatenated. The AA bit survives only if every
/// question was served from authoritative data.
pub async fn execute_query(context: Arc<ServerContext>, request: &DnsPacket) -> DnsPacket {
    let mut packet = build_response_packet(&context, request);

    if request.questions.is_empty() {
        log::info!("request without questions - FORMERR");
        packet.header.rescode = ResultCode::FORMERR;
        return packet;
    }

    let mut authoritative = true;
    for question in &request.questions {
        packet.questions.push(question.clone());

        let mut resolver = context.create_resolver(context.clone());
        let outcome = resolver
            .resolve(
                &question.name,
                question.qtype,
                question.class,
                request.header.recursion_desired,
            )
            .await;

        match outcome {
            Ok(result) => {
                if !result.header.authoritative_answer {
                    authoritative = false;
                }
                if packet.header.rescode == ResultCode::NOERROR {
                    packet.header.rescode = result.header.rescode;
                }
                packet.answers.extend(result.answers);
                packet.authorities.extend(result.authorities);
                packet.resources.extend(result.resources);
            }
            Err(ResolveError::Protocol(ProtocolError::NameError)) => {
                authoritative = false;
                if packet.header.rescode == ResultCode::NOERROR {
                    packet.header.rescode = ResultCode::NXDOMAIN;
                }
            }
            Err(e) => {
                log::warn!(
                    "failed to resolve {:?} {}: {}",
                    question.qtype,
                    question.name,
                    e
                );
                authoritative = false;
                if packet.header.rescode == ResultCode::NOERROR {
                    packet.header.rescode = ResultCode::SERVFAIL;
                }
            }
        }
    }

    packet.header.authoritative_answer = authoritative;

    packet
}

/// The UDP server. One task per inbound datagram.
pub struct DnsUdpServer {
    context: Arc<ServerContext>,
}

impl DnsUdpServer {
    pub fn new(context: Arc<ServerContext>) -> DnsUdpServer {
        DnsUdpServer { context }
    }

    async fn handle_request(
        context: Arc<ServerContext>,
        socket: Arc<UdpSocket>,
        data: Vec<u8>,
        src: SocketAddr,
    ) {
        let mut response = match DnsPacket::from_bytes(&data) {
            Ok(request) => execute_query(context, &request).await,
            Err(e) => {
                log::info!("failed to parse UDP query packet: {}", e);
                match formerr_response(&data) {
                    Some(packet) => packet,
                    // Not even an id to echo; drop the datagram.
                    None => return,
                }
            }
        };

        let mut res_buffer = BytePacketBuffer::new();
        match response.write(&mut res_buffer, 512) {
            Ok(()) => {
                if let Err(e) = socket.send_to(&res_buffer.buf[..res_buffer.pos], src).await {
                    log::info!("failed to send response to {}: {}", src, e);
                }
            }
            Err(e) => {
                log::info!("failed to encode response: {}", e);
            }
        }
    }
}

#[async_trait]
impl DnsServer for DnsUdpServer {
    async fn run_server(self) -> Result<()> {
        let config = &self.context.server_config;
        let socket = UdpSocket::bind((config.bind_host.as_str(), config.bind_port)).await?;
        log::info!("listening for UDP queries on {}", socket.local_addr()?);

        let socket = Arc::new(socket);
        let context = self.context.clone();

        tokio::spawn(async move {
            loop {
                let mut buf = [0u8; 512];
                let (len, src) = match socket.recv_from(&mut buf).await {
                    Ok(x) => x,
                    Err(e) => {
                        log::info!("failed to read from UDP socket: {}", e);
                        continue;
                    }
                };

                context
                    .statistics
                    .udp_query_count
                    .fetch_add(1, Ordering::Release);

                let context = context.clone();
                let socket = socket.clone();
                tokio::spawn(async move {
                    DnsUdpServer::handle_request(context, socket, buf[..len].to_vec(), src).await;
                });
            }
        });

        Ok(())
    }
}

/// The TCP server. Connections are capped by a semaphore; each connection
/// may carry several length-prefixed queries in sequence.
pub struct DnsTcpServer {
    context: Arc<ServerContext>,
}

impl DnsTcpServer {
    pub fn new(context: Arc<ServerContext>) -> DnsTcpServer {
        DnsTcpServer { context }
    }

    async fn handle_stream(context: Arc<ServerContext>, mut stream: TcpStream) {
        loop {
            let len = match read_packet_length(&mut stream).await {
                Ok(x) => x as usize,
                Err(_) => return,
            };

            let mut data = vec![0u8; len];
            if stream.read_exact(&mut data).await.is_err() {
                return;
            }

            context
                .statistics
                .tcp_query_count
                .fetch_add(1, Ordering::Release);

            let mut response = match DnsPacket::from_bytes(&data) {
                Ok(request) => execute_query(context.clone(), &request).await,
                Err(e) => {
                    log::info!("failed to parse TCP query packet: {}", e);
                    match formerr_response(&data) {
                        Some(packet) => packet,
                        None => return,
                    }
                }
            };

            let bytes = match response.to_bytes() {
                Ok(x) => x,
                Err(e) => {
                    log::info!("failed to encode response: {}", e);
                    return;
                }
            };

            if write_packet_length(&mut stream, bytes.len()).await.is_err() {
                return;
            }
            if stream.write_all(&bytes).await.is_err() {
                return;
            }
            let _ = stream.flush().await;
        }
    }
}

#[async_trait]
impl DnsServer for DnsTcpServer {
    async fn run_server(self) -> Result<()> {
        let config = &self.context.server_config;
        let listener = TcpListener::bind((config.bind_host.as_str(), config.bind_port)).await?;
        log::info!("listening for TCP queries on {}", listener.local_addr()?);

        let limit = Arc::new(Semaphore::new(config.max_connections));
        let conn_timeout = config.timeout;
        let context = self.context.clone();

        tokio::spawn(async move {
            loop {
                let (stream, src) = match listener.accept().await {
                    Ok(x) => x,
                    Err(e) => {
                        log::info!("failed to accept TCP connection: {}", e);
                        continue;
                    }
                };

                let permit = match limit.clone().acquire_owned().await {
                    Ok(x) => x,
                    Err(_) => return,
                };

                log::debug!("accepted TCP connection from {}", src);

                let context = context.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if timeout(conn_timeout, DnsTcpServer::handle_stream(context, stream))
                        .await
                        .is_err()
                    {
                        log::debug!("TCP connection from {} timed out", src);
                    }
                });
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::dns::authority::Zone;
    use crate::dns::client::ClientError;
    use crate::dns::context::tests::create_test_context;
    use crate::dns::protocol::{DnsQuestion, DnsRecord, QueryType};
    use crate::dns::records::RData;

    fn question_packet(qname: &str, qtype: QueryType, rd: bool) -> DnsPacket {
        let mut packet = DnsPacket::new();
        packet.header.id = 4711;
        packet.header.recursion_desired = rd;
        packet
            .questions
            .push(DnsQuestion::new(qname.to_string(), qtype));
        packet
    }

    fn add_test_zone(context: &Arc<ServerContext>) {
        let zone = Zone::builder("test.com")
            .soa("ns1.test.com", "admin.test.com", 1, 3600, 1800, 604800, 60)
            .a("www.test.com", "192.168.1.2".parse().unwrap(), 3600)
            .build();
        context.authority.add_zone(zone).unwrap();
    }

    #[tokio::test]
    async fn test_authoritative_response_flags() {
        let mut context = create_test_context(Box::new(|_, _, _, _| {
            panic!("no recursion expected");
        }));
        Arc::get_mut(&mut context).unwrap().allow_recursive = false;
        add_test_zone(&context);

        let request = question_packet("www.test.com", QueryType::A, true);
        let response = execute_query(context, &request).await;

        assert_eq!(4711, response.header.id);
        assert!(response.header.response);
        assert!(response.header.authoritative_answer);
        assert!(!response.header.recursion_available);
        assert!(response.header.recursion_desired);
        assert_eq!(ResultCode::NOERROR, response.header.rescode);
        assert_eq!(1, response.questions.len());
        assert_eq!(1, response.answers.len());
    }

    #[tokio::test]
    async fn test_recursive_response_flags() {
        let mut context = create_test_context(Box::new(|qname, _, _, _| {
            let mut packet = DnsPacket::new();
            packet.answers.push(DnsRecord::new(
                qname,
                3600,
                RData::A {
                    addr: "10.0.0.1".parse().unwrap(),
                },
            ));
            Ok(packet)
        }));
        Arc::get_mut(&mut context)
            .unwrap()
            .resolver_config
            .root_servers = vec!["127.0.0.1".parse().unwrap()];

        let request = question_packet("elsewhere.org", QueryType::A, true);
        let response = execute_query(context, &request).await;

        assert!(!response.header.authoritative_answer);
        assert!(response.header.recursion_available);
        assert_eq!(1, response.answers.len());
    }

    #[tokio::test]
    async fn test_unknown_name_without_recursion_is_nxdomain() {
        let mut context = create_test_context(Box::new(|_, _, _, _| {
            panic!("no recursion expected");
        }));
        Arc::get_mut(&mut context).unwrap().allow_recursive = false;
        add_test_zone(&context);

        let request = question_packet("www.other.org", QueryType::A, true);
        let response = execute_query(context, &request).await;

        assert_eq!(ResultCode::NXDOMAIN, response.header.rescode);
        assert!(response.answers.is_empty());
    }

    #[tokio::test]
    async fn test_resolution_failure_is_servfail() {
        let mut context =
            create_test_context(Box::new(|_, _, _, _| Err(ClientError::LookupFailed)));
        Arc::get_mut(&mut context)
            .unwrap()
            .resolver_config
            .root_servers = vec!["127.0.0.1".parse().unwrap()];

        let request = question_packet("unreachable.org", QueryType::A, true);
        let response = execute_query(context, &request).await;

        assert_eq!(ResultCode::SERVFAIL, response.header.rescode);
    }

    #[tokio::test]
    async fn test_upstream_nxdomain_maps_to_nxdomain() {
        let mut context = create_test_context(Box::new(|_, _, _, _| {
            let mut packet = DnsPacket::new();
            packet.header.rescode = ResultCode::NXDOMAIN;
            Ok(packet)
        }));
        Arc::get_mut(&mut context)
            .unwrap()
            .resolver_config
            .root_servers = vec!["127.0.0.1".parse().unwrap()];

        let request = question_packet("gone.example.com", QueryType::A, true);
        let response = execute_query(context, &request).await;

        assert_eq!(ResultCode::NXDOMAIN, response.header.rescode);
    }

    #[tokio::test]
    async fn test_empty_question_section_is_formerr() {
        let context = create_test_context(Box::new(|_, _, _, _| Ok(DnsPacket::new())));

        let mut request = DnsPacket::new();
        request.header.id = 99;

        let response = execute_query(context, &request).await;

        assert_eq!(99, response.header.id);
        assert_eq!(ResultCode::FORMERR, response.header.rescode);
    }

    #[tokio::test]
    async fn test_multiple_questions_answered_independently() {
        let context = create_test_context(Box::new(|_, _, _, _| {
            panic!("no recursion expected");
        }));
        add_test_zone(&context);

        let mut request = question_packet("www.test.com", QueryType::A, false);
        request
            .questions
            .push(DnsQuestion::new("test.com".to_string(), QueryType::Soa));

        let response = execute_query(context, &request).await;

        assert_eq!(2, response.questions.len());
        assert_eq!(2, response.answers.len());
        assert!(response.header.authoritative_answer);
    }

    #[test]
    fn test_formerr_response_recovers_id() {
        let packet = formerr_response(&[0xAB, 0xCD, 0xFF]).unwrap();
        assert_eq!(0xABCD, packet.header.id);
        assert_eq!(ResultCode::FORMERR, packet.header.rescode);
        assert!(packet.header.response);

        // A single octet holds no id; nothing to reply to.
        assert!(formerr_response(&[0xAB]).is_none());
    }
}
