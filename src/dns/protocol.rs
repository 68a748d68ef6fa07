//! Implements the DNS protocol in a transport agnostic fashion

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use derive_more::{Display, Error};
use serde_derive::{Deserialize, Serialize};

use crate::dns::buffer::{DecodeError, PacketBuffer, VectorPacketBuffer};
use crate::dns::records::RData;

type Result<T> = std::result::Result<T, DecodeError>;

/// `QueryType` represents the requested record type of a query
///
/// The `Unknown` variant carries the numeric id of an unrecognized type so
/// it survives into the reply. A number converts to a `QueryType` through
/// `from_num`, and back through `to_num`.
#[derive(PartialEq, Eq, Debug, Clone, Hash, Copy, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QueryType {
    Unknown(u16),
    A,     // 1
    Ns,    // 2
    Cname, // 5
    Soa,   // 6
    Wks,   // 11
    Ptr,   // 12
    Hinfo, // 13
    Mx,    // 15
    Txt,   // 16
    Aaaa,  // 28
    Any,   // 255
}

impl QueryType {
    pub fn to_num(&self) -> u16 {
        match *self {
            QueryType::Unknown(x) => x,
            QueryType::A => 1,
            QueryType::Ns => 2,
            QueryType::Cname => 5,
            QueryType::Soa => 6,
            QueryType::Wks => 11,
            QueryType::Ptr => 12,
            QueryType::Hinfo => 13,
            QueryType::Mx => 15,
            QueryType::Txt => 16,
            QueryType::Aaaa => 28,
            QueryType::Any => 255,
        }
    }

    pub fn from_num(num: u16) -> QueryType {
        match num {
            1 => QueryType::A,
            2 => QueryType::Ns,
            5 => QueryType::Cname,
            6 => QueryType::Soa,
            11 => QueryType::Wks,
            12 => QueryType::Ptr,
            13 => QueryType::Hinfo,
            15 => QueryType::Mx,
            16 => QueryType::Txt,
            28 => QueryType::Aaaa,
            255 => QueryType::Any,
            _ => QueryType::Unknown(num),
        }
    }
}

/// The class of a question or record. In practice this is always `In`.
#[derive(PartialEq, Eq, Debug, Clone, Hash, Copy, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QueryClass {
    In, // 1
    Cs, // 2
    Ch, // 3
    Hs, // 4
    Any, // 255
    Unknown(u16),
}

impl QueryClass {
    pub fn to_num(&self) -> u16 {
        match *self {
            QueryClass::In => 1,
            QueryClass::Cs => 2,
            QueryClass::Ch => 3,
            QueryClass::Hs => 4,
            QueryClass::Any => 255,
            QueryClass::Unknown(x) => x,
        }
    }

    pub fn from_num(num: u16) -> QueryClass {
        match num {
            1 => QueryClass::In,
            2 => QueryClass::Cs,
            3 => QueryClass::Ch,
            4 => QueryClass::Hs,
            255 => QueryClass::Any,
            _ => QueryClass::Unknown(num),
        }
    }
}

/// The result code of a response, as carried in the low four header bits
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ResultCode {
    #[default]
    NOERROR = 0,
    FORMERR = 1,
    SERVFAIL = 2,
    NXDOMAIN = 3,
    NOTIMP = 4,
    REFUSED = 5,
}

impl ResultCode {
    pub fn from_num(num: u8) -> ResultCode {
        match num {
            1 => ResultCode::FORMERR,
            2 => ResultCode::SERVFAIL,
            3 => ResultCode::NXDOMAIN,
            4 => ResultCode::NOTIMP,
            5 => ResultCode::REFUSED,
            _ => ResultCode::NOERROR,
        }
    }
}

/// Errors a peer reports through the response code of a reply
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// NXDOMAIN, the queried name does not exist
    NameError,
    ServerFailure,
    Refused,
    NotImplemented,
    FormatError,
}

impl ProtocolError {
    pub fn from_rescode(code: ResultCode) -> Option<ProtocolError> {
        match code {
            ResultCode::NOERROR => None,
            ResultCode::FORMERR => Some(ProtocolError::FormatError),
            ResultCode::SERVFAIL => Some(ProtocolError::ServerFailure),
            ResultCode::NXDOMAIN => Some(ProtocolError::NameError),
            ResultCode::NOTIMP => Some(ProtocolError::NotImplemented),
            ResultCode::REFUSED => Some(ProtocolError::Refused),
        }
    }

    pub fn rescode(&self) -> ResultCode {
        match *self {
            ProtocolError::NameError => ResultCode::NXDOMAIN,
            ProtocolError::ServerFailure => ResultCode::SERVFAIL,
            ProtocolError::Refused => ResultCode::REFUSED,
            ProtocolError::NotImplemented => ResultCode::NOTIMP,
            ProtocolError::FormatError => ResultCode::FORMERR,
        }
    }
}

/// A TTL wrapper that is transparent to equality, ordering and hashing, so
/// record identity ignores the TTL.
#[derive(Copy, Clone, Debug, Eq, Serialize, Deserialize)]
pub struct TransientTtl(pub u32);

impl PartialEq<TransientTtl> for TransientTtl {
    fn eq(&self, _: &TransientTtl) -> bool {
        true
    }
}

impl PartialOrd<TransientTtl> for TransientTtl {
    fn partial_cmp(&self, other: &TransientTtl) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TransientTtl {
    fn cmp(&self, _: &TransientTtl) -> Ordering {
        Ordering::Equal
    }
}

impl Hash for TransientTtl {
    fn hash<H>(&self, _: &mut H)
    where
        H: Hasher,
    {
        // purposely left empty
    }
}

/// True when `suffix` is a label-wise suffix of `name`. The empty name, the
/// root, is a suffix of every name. Comparison ignores ASCII case.
pub fn name_is_suffix(suffix: &str, name: &str) -> bool {
    if suffix.is_empty() {
        return true;
    }

    let suffix_labels = suffix.split('.').rev();
    let mut name_labels = name.split('.').rev();

    for expected in suffix_labels {
        match name_labels.next() {
            Some(actual) if actual.eq_ignore_ascii_case(expected) => {}
            _ => return false,
        }
    }

    true
}

/// Representation of a DNS header
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16, // 16 bits

    pub recursion_desired: bool,    // 1 bit
    pub truncated_message: bool,    // 1 bit
    pub authoritative_answer: bool, // 1 bit
    pub opcode: u8,                 // 4 bits
    pub response: bool,             // 1 bit

    pub rescode: ResultCode, // 4 bits
    pub z: u8,               // 3 bits, reserved; zero on send, preserved on receive
    pub recursion_available: bool, // 1 bit

    pub questions: u16,             // 16 bits
    pub answers: u16,               // 16 bits
    pub authoritative_entries: u16, // 16 bits
    pub resource_entries: u16,      // 16 bits
}

impl DnsHeader {
    pub fn new() -> DnsHeader {
        DnsHeader::default()
    }

    pub fn binary_len(&self) -> usize {
        12
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_u16(self.id)?;

        buffer.write_u8(
            (self.recursion_desired as u8)
                | ((self.truncated_message as u8) << 1)
                | ((self.authoritative_answer as u8) << 2)
                | (self.opcode << 3)
                | ((self.response as u8) << 7),
        )?;

        buffer.write_u8(
            (self.rescode as u8)
                | ((self.z & 0x07) << 4)
                | ((self.recursion_available as u8) << 7),
        )?;

        buffer.write_u16(self.questions)?;
        buffer.write_u16(self.answers)?;
        buffer.write_u16(self.authoritative_entries)?;
        buffer.write_u16(self.resource_entries)?;

        Ok(())
    }

    pub fn read<T: PacketBuffer>(&mut self, buffer: &mut T) -> Result<()> {
        self.id = buffer.read_u16()?;

        let flags = buffer.read_u16()?;
        let a = (flags >> 8) as u8;
        let b = (flags & 0xFF) as u8;
        self.recursion_desired = (a & (1 << 0)) > 0;
        self.truncated_message = (a & (1 << 1)) > 0;
        self.authoritative_answer = (a & (1 << 2)) > 0;
        self.opcode = (a >> 3) & 0x0F;
        self.response = (a & (1 << 7)) > 0;

        self.rescode = ResultCode::from_num(b & 0x0F);
        self.z = (b >> 4) & 0x07;
        self.recursion_available = (b & (1 << 7)) > 0;

        self.questions = buffer.read_u16()?;
        self.answers = buffer.read_u16()?;
        self.authoritative_entries = buffer.read_u16()?;
        self.resource_entries = buffer.read_u16()?;

        Ok(())
    }
}

/// Representation of a DNS question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: QueryType,
    pub class: QueryClass,
}

impl DnsQuestion {
    pub fn new(name: String, qtype: QueryType) -> DnsQuestion {
        DnsQuestion {
            name,
            qtype,
            class: QueryClass::In,
        }
    }

    pub fn binary_len(&self) -> usize {
        self.name
            .split('.')
            .filter(|x| !x.is_empty())
            .map(|x| x.len() + 1)
            .sum::<usize>()
            + 1
            + 4
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_qname(&self.name)?;
        buffer.write_u16(self.qtype.to_num())?;
        buffer.write_u16(self.class.to_num())?;

        Ok(())
    }

    pub fn read<T: PacketBuffer>(&mut self, buffer: &mut T) -> Result<()> {
        buffer.read_qname(&mut self.name)?;
        self.qtype = QueryType::from_num(buffer.read_u16()?);
        self.class = QueryClass::from_num(buffer.read_u16()?);

        Ok(())
    }
}

impl fmt::Display for DnsQuestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?} {:?}", self.name, self.class, self.qtype)
    }
}

/// A resource record: an owner name, class and TTL around a typed payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DnsRecord {
    pub name: String,
    pub class: QueryClass,
    pub ttl: TransientTtl,
    pub rdata: RData,
}

impl DnsRecord {
    pub fn new(name: &str, ttl: u32, rdata: RData) -> DnsRecord {
        DnsRecord {
            name: name.to_lowercase(),
            class: QueryClass::In,
            ttl: TransientTtl(ttl),
            rdata,
        }
    }

    pub fn query_type(&self) -> QueryType {
        self.rdata.query_type()
    }

    pub fn get_ttl(&self) -> u32 {
        self.ttl.0
    }

    pub fn read<T: PacketBuffer>(buffer: &mut T) -> Result<DnsRecord> {
        let mut name = String::new();
        buffer.read_qname(&mut name)?;

        let qtype = QueryType::from_num(buffer.read_u16()?);
        let class = QueryClass::from_num(buffer.read_u16()?);
        let ttl = buffer.read_u32()?;
        let data_len = buffer.read_u16()?;

        let rdata_start = buffer.pos();
        if data_len > 0 {
            // The whole payload must lie inside the message.
            buffer.get(rdata_start + data_len as usize - 1)?;
        }
        let rdata = RData::read(buffer, qtype, data_len)?;

        // The payload parser may stop short of rdlength when the record
        // carries trailing data; the framing position is authoritative.
        buffer.seek(rdata_start + data_len as usize)?;

        Ok(DnsRecord {
            name,
            class,
            ttl: TransientTtl(ttl),
            rdata,
        })
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<usize> {
        let start_pos = buffer.pos();

        buffer.write_qname(&self.name)?;
        buffer.write_u16(self.query_type().to_num())?;
        buffer.write_u16(self.class.to_num())?;
        buffer.write_u32(self.ttl.0)?;

        // Reserve rdlength and patch it once the payload is written.
        let size_pos = buffer.pos();
        buffer.write_u16(0)?;

        self.rdata.write(buffer)?;

        let size = buffer.pos() - (size_pos + 2);
        buffer.set_u16(size_pos, size as u16)?;

        Ok(buffer.pos() - start_pos)
    }
}

impl fmt::Display for DnsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:?} {}",
            self.name, self.ttl.0, self.class, self.rdata
        )
    }
}

/// Representation of a complete DNS packet
///
/// This is the work horse of the engine. A packet is read and written in a
/// single operation, and passes between the network facing components, the
/// resolver, the cache and the authority.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsPacket {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    pub authorities: Vec<DnsRecord>,
    pub resources: Vec<DnsRecord>,
}

impl DnsPacket {
    pub fn new() -> DnsPacket {
        DnsPacket::default()
    }

    pub fn from_buffer<T: PacketBuffer>(buffer: &mut T) -> Result<DnsPacket> {
        let mut result = DnsPacket::new();
        result.header.read(buffer)?;

        // Once the header is in, running out of buffer means the counts
        // promised more entries than the message holds.
        let section_err = |e| match e {
            DecodeError::Truncated => DecodeError::SectionCountMismatch,
            other => other,
        };

        for _ in 0..result.header.questions {
            let mut question = DnsQuestion::new(String::new(), QueryType::Unknown(0));
            question.read(buffer).map_err(section_err)?;
            result.questions.push(question);
        }

        for _ in 0..result.header.answers {
            let rec = DnsRecord::read(buffer).map_err(section_err)?;
            result.answers.push(rec);
        }
        for _ in 0..result.header.authoritative_entries {
            let rec = DnsRecord::read(buffer).map_err(section_err)?;
            result.authorities.push(rec);
        }
        for _ in 0..result.header.resource_entries {
            let rec = DnsRecord::read(buffer).map_err(section_err)?;
            result.resources.push(rec);
        }

        Ok(result)
    }

    pub fn from_bytes(data: &[u8]) -> Result<DnsPacket> {
        let mut buffer = VectorPacketBuffer::from_bytes(data);
        DnsPacket::from_buffer(&mut buffer)
    }

    /// Write the packet, reconciling the header counts with the section
    /// vectors. Records that would push the encoding past `max_size` are
    /// dropped and the TC bit is set instead.
    pub fn write<T: PacketBuffer>(&mut self, buffer: &mut T, max_size: usize) -> Result<()> {
        let mut test_buffer = VectorPacketBuffer::new();

        let mut size = self.header.binary_len();
        for question in &self.questions {
            size += question.binary_len();
            question.write(&mut test_buffer)?;
        }

        let mut record_count = self.answers.len() + self.authorities.len() + self.resources.len();

        let mut answers = 0;
        let mut authorities = 0;
        let mut resources = 0;
        for (i, rec) in self
            .answers
            .iter()
            .chain(self.authorities.iter())
            .chain(self.resources.iter())
            .enumerate()
        {
            size += rec.write(&mut test_buffer)?;
            if size > max_size {
                record_count = i;
                self.header.truncated_message = true;
                break;
            } else if i < self.answers.len() {
                answers += 1;
            } else if i < self.answers.len() + self.authorities.len() {
                authorities += 1;
            } else {
                resources += 1;
            }
        }

        self.header.questions = self.questions.len() as u16;
        self.header.answers = answers;
        self.header.authoritative_entries = authorities;
        self.header.resource_entries = resources;

        self.header.write(buffer)?;

        for question in &self.questions {
            question.write(buffer)?;
        }

        for rec in self
            .answers
            .iter()
            .chain(self.authorities.iter())
            .chain(self.resources.iter())
            .take(record_count)
        {
            rec.write(buffer)?;
        }

        Ok(())
    }

    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        let mut buffer = VectorPacketBuffer::new();
        self.write(&mut buffer, 0xFFFF)?;
        Ok(buffer.buffer)
    }

    /// True when the answer section holds a record of the requested type
    /// for `qname`. A question for `Any` accepts any answer type.
    pub fn has_answer(&self, qname: &str, qtype: QueryType) -> bool {
        self.answers.iter().any(|rec| {
            rec.name.eq_ignore_ascii_case(qname)
                && (qtype == QueryType::Any || rec.query_type() == qtype)
        })
    }

    /// The target of a CNAME answer for `qname`, if one is present.
    pub fn cname_target(&self, qname: &str) -> Option<String> {
        self.answers.iter().find_map(|rec| match rec.rdata {
            RData::Cname { ref host } if rec.name.eq_ignore_ascii_case(qname) => {
                Some(host.clone())
            }
            _ => None,
        })
    }

    /// Hosts of NS records in the authority section that delegate a zone
    /// covering `qname`.
    pub fn referral_hosts(&self, qname: &str) -> Vec<String> {
        self.authorities
            .iter()
            .filter_map(|rec| match rec.rdata {
                RData::Ns { ref host } if name_is_suffix(&rec.name, qname) => Some(host.clone()),
                _ => None,
            })
            .collect()
    }

    /// Glue addresses from the additional section for a name server host.
    pub fn glue_for(&self, host: &str) -> Vec<IpAddr> {
        self.resources
            .iter()
            .filter_map(|rec| match rec.rdata {
                RData::A { addr } if rec.name.eq_ignore_ascii_case(host) => {
                    Some(IpAddr::V4(addr))
                }
                _ => None,
            })
            .collect()
    }

    /// IPv4 addresses answered for `host`.
    pub fn answer_a_records(&self, host: &str) -> Vec<IpAddr> {
        self.answers
            .iter()
            .filter_map(|rec| match rec.rdata {
                RData::A { addr } if rec.name.eq_ignore_ascii_case(host) => {
                    Some(IpAddr::V4(addr))
                }
                _ => None,
            })
            .collect()
    }
}
