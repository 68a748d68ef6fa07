//! Typed views over record payloads
//!
//! The framing layer treats RDATA as opaque bytes; this module gives each
//! supported type its canonical binary shape. Payloads decode in two modes:
//! inside a full message, where embedded names may use compression
//! pointers, or from a standalone rdata slice.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use serde_derive::{Deserialize, Serialize};

use crate::dns::buffer::{DecodeError, PacketBuffer, VectorPacketBuffer};
use crate::dns::protocol::QueryType;

type Result<T> = std::result::Result<T, DecodeError>;

/// The payload of a resource record
///
/// Decoding never fails on an unrecognized type; the raw bytes are carried
/// in the `Unknown` variant together with the numeric type code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RData {
    A {
        addr: Ipv4Addr,
    }, // 1
    Ns {
        host: String,
    }, // 2
    Cname {
        host: String,
    }, // 5
    Soa {
        m_name: String,
        r_name: String,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    }, // 6
    Wks {
        addr: Ipv4Addr,
        protocol: u8,
        bitmap: Vec<u8>,
    }, // 11
    Ptr {
        host: String,
    }, // 12
    Hinfo {
        cpu: String,
        os: String,
    }, // 13
    Mx {
        priority: u16,
        host: String,
    }, // 15
    Txt {
        strings: Vec<String>,
    }, // 16
    Aaaa {
        addr: Ipv6Addr,
    }, // 28
    Unknown {
        qtype: u16,
        data: Vec<u8>,
    },
}

impl RData {
    pub fn query_type(&self) -> QueryType {
        match *self {
            RData::A { .. } => QueryType::A,
            RData::Ns { .. } => QueryType::Ns,
            RData::Cname { .. } => QueryType::Cname,
            RData::Soa { .. } => QueryType::Soa,
            RData::Wks { .. } => QueryType::Wks,
            RData::Ptr { .. } => QueryType::Ptr,
            RData::Hinfo { .. } => QueryType::Hinfo,
            RData::Mx { .. } => QueryType::Mx,
            RData::Txt { .. } => QueryType::Txt,
            RData::Aaaa { .. } => QueryType::Aaaa,
            RData::Unknown { qtype, .. } => QueryType::Unknown(qtype),
        }
    }

    /// Decode a payload of `qtype` within a full message buffer, where
    /// embedded names may point back into earlier parts of the message.
    pub fn read<T: PacketBuffer>(buffer: &mut T, qtype: QueryType, data_len: u16) -> Result<RData> {
        match qtype {
            QueryType::A => {
                if data_len != 4 {
                    return Err(DecodeError::Truncated);
                }
                let addr = Ipv4Addr::from(buffer.read_u32()?);

                Ok(RData::A { addr })
            }
            QueryType::Aaaa => {
                if data_len != 16 {
                    return Err(DecodeError::Truncated);
                }
                let mut segments = [0u16; 8];
                for segment in &mut segments {
                    *segment = buffer.read_u16()?;
                }

                Ok(RData::Aaaa {
                    addr: Ipv6Addr::from(segments),
                })
            }
            QueryType::Ns => {
                let mut host = String::new();
                buffer.read_qname(&mut host)?;

                Ok(RData::Ns { host })
            }
            QueryType::Cname => {
                let mut host = String::new();
                buffer.read_qname(&mut host)?;

                Ok(RData::Cname { host })
            }
            QueryType::Ptr => {
                let mut host = String::new();
                buffer.read_qname(&mut host)?;

                Ok(RData::Ptr { host })
            }
            QueryType::Mx => {
                if data_len < 2 {
                    return Err(DecodeError::Truncated);
                }
                let priority = buffer.read_u16()?;
                let mut host = String::new();
                buffer.read_qname(&mut host)?;

                Ok(RData::Mx { priority, host })
            }
            QueryType::Soa => {
                let mut m_name = String::new();
                buffer.read_qname(&mut m_name)?;

                let mut r_name = String::new();
                buffer.read_qname(&mut r_name)?;

                let serial = buffer.read_u32()?;
                let refresh = buffer.read_u32()?;
                let retry = buffer.read_u32()?;
                let expire = buffer.read_u32()?;
                let minimum = buffer.read_u32()?;

                Ok(RData::Soa {
                    m_name,
                    r_name,
                    serial,
                    refresh,
                    retry,
                    expire,
                    minimum,
                })
            }
            QueryType::Txt => {
                // One or more length-prefixed character strings, packed to
                // exactly rdlength octets.
                let mut strings = Vec::new();
                let end = buffer.pos() + data_len as usize;
                while buffer.pos() < end {
                    let len = buffer.read()? as usize;
                    if buffer.pos() + len > end {
                        return Err(DecodeError::Truncated);
                    }
                    let pos = buffer.pos();
                    let bytes = buffer.get_range(pos, len)?;
                    strings.push(String::from_utf8_lossy(bytes).to_string());
                    buffer.step(len)?;
                }

                Ok(RData::Txt { strings })
            }
            QueryType::Hinfo => {
                // Two character strings, both confined to rdlength.
                if data_len < 2 {
                    return Err(DecodeError::Truncated);
                }
                let end = buffer.pos() + data_len as usize;

                let cpu_len = buffer.read()? as usize;
                if buffer.pos() + cpu_len >= end {
                    return Err(DecodeError::Truncated);
                }
                let pos = buffer.pos();
                let cpu = String::from_utf8_lossy(buffer.get_range(pos, cpu_len)?).to_string();
                buffer.step(cpu_len)?;

                let os_len = buffer.read()? as usize;
                if buffer.pos() + os_len > end {
                    return Err(DecodeError::Truncated);
                }
                let pos = buffer.pos();
                let os = String::from_utf8_lossy(buffer.get_range(pos, os_len)?).to_string();
                buffer.step(os_len)?;

                Ok(RData::Hinfo { cpu, os })
            }
            QueryType::Wks => {
                if data_len < 5 {
                    return Err(DecodeError::Truncated);
                }
                let addr = Ipv4Addr::from(buffer.read_u32()?);
                let protocol = buffer.read()?;

                let bitmap_len = data_len as usize - 5;
                let pos = buffer.pos();
                let bitmap = buffer.get_range(pos, bitmap_len)?.to_vec();
                buffer.step(bitmap_len)?;

                Ok(RData::Wks {
                    addr,
                    protocol,
                    bitmap,
                })
            }
            QueryType::Any | QueryType::Unknown(_) => {
                let pos = buffer.pos();
                let data = buffer.get_range(pos, data_len as usize)?.to_vec();
                buffer.step(data_len as usize)?;

                Ok(RData::Unknown {
                    qtype: qtype.to_num(),
                    data,
                })
            }
        }
    }

    /// Write the payload into a packet buffer. Embedded names take part in
    /// the buffer's name compression. The caller frames the rdlength.
    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        match *self {
            RData::A { ref addr } => {
                for octet in addr.octets() {
                    buffer.write_u8(octet)?;
                }
            }
            RData::Aaaa { ref addr } => {
                for segment in addr.segments() {
                    buffer.write_u16(segment)?;
                }
            }
            RData::Ns { ref host } | RData::Cname { ref host } | RData::Ptr { ref host } => {
                buffer.write_qname(host)?;
            }
            RData::Mx { priority, ref host } => {
                buffer.write_u16(priority)?;
                buffer.write_qname(host)?;
            }
            RData::Soa {
                ref m_name,
                ref r_name,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                buffer.write_qname(m_name)?;
                buffer.write_qname(r_name)?;
                buffer.write_u32(serial)?;
                buffer.write_u32(refresh)?;
                buffer.write_u32(retry)?;
                buffer.write_u32(expire)?;
                buffer.write_u32(minimum)?;
            }
            RData::Txt { ref strings } => {
                for s in strings {
                    write_character_string(buffer, s.as_bytes())?;
                }
            }
            RData::Hinfo { ref cpu, ref os } => {
                write_character_string(buffer, cpu.as_bytes())?;
                write_character_string(buffer, os.as_bytes())?;
            }
            RData::Wks {
                ref addr,
                protocol,
                ref bitmap,
            } => {
                for octet in addr.octets() {
                    buffer.write_u8(octet)?;
                }
                buffer.write_u8(protocol)?;
                for b in bitmap {
                    buffer.write_u8(*b)?;
                }
            }
            RData::Unknown { ref data, .. } => {
                log::debug!("writing unknown record type as raw bytes");
                for b in data {
                    buffer.write_u8(*b)?;
                }
            }
        }

        Ok(())
    }

    /// Parse a standalone rdata slice, outside of any message. Embedded
    /// names must be uncompressed in this mode.
    pub fn from_rdata(qtype: QueryType, data: &[u8]) -> Option<RData> {
        let mut buffer = VectorPacketBuffer::from_bytes(data);
        RData::read(&mut buffer, qtype, data.len() as u16).ok()
    }

    /// Emit the canonical standalone encoding of the payload, with no
    /// compression pointers.
    pub fn to_rdata(&self) -> Vec<u8> {
        let mut buffer = VectorPacketBuffer::plain();
        match self.write(&mut buffer) {
            Ok(()) => buffer.buffer,
            // Only an oversize character string can fail here.
            Err(_) => Vec::new(),
        }
    }
}

impl fmt::Display for RData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RData::A { addr } => write!(f, "A {}", addr),
            RData::Aaaa { addr } => write!(f, "AAAA {}", addr),
            RData::Ns { ref host } => write!(f, "NS {}", host),
            RData::Cname { ref host } => write!(f, "CNAME {}", host),
            RData::Ptr { ref host } => write!(f, "PTR {}", host),
            RData::Mx { priority, ref host } => write!(f, "MX {} {}", priority, host),
            RData::Soa {
                ref m_name,
                ref r_name,
                serial,
                ..
            } => write!(f, "SOA {} {} {}", m_name, r_name, serial),
            RData::Txt { ref strings } => {
                write!(f, "TXT")?;
                for s in strings {
                    write!(f, " \"{}\"", s)?;
                }
                Ok(())
            }
            RData::Hinfo { ref cpu, ref os } => write!(f, "HINFO \"{}\" \"{}\"", cpu, os),
            RData::Wks {
                addr, protocol, ..
            } => write!(f, "WKS {} {}", addr, protocol),
            RData::Unknown { qtype, ref data } => write!(f, "TYPE{} ({} octets)", qtype, data.len()),
        }
    }
}

fn write_character_string<T: PacketBuffer>(buffer: &mut T, data: &[u8]) -> Result<()> {
    if data.len() > 255 {
        return Err(DecodeError::InvalidLabelLength);
    }

    buffer.write_u8(data.len() as u8)?;
    for b in data {
        buffer.write_u8(*b)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {

    use super::*;

    fn roundtrip(rdata: RData, qtype: QueryType) {
        let encoded = rdata.to_rdata();
        assert_eq!(Some(rdata), RData::from_rdata(qtype, &encoded));
    }

    #[test]
    fn test_a_rdata() {
        let rdata = RData::A {
            addr: Ipv4Addr::new(192, 168, 1, 1),
        };
        assert_eq!(vec![0xC0, 0xA8, 0x01, 0x01], rdata.to_rdata());
        roundtrip(rdata, QueryType::A);

        // Exactly four octets, nothing else.
        assert_eq!(None, RData::from_rdata(QueryType::A, &[1, 2, 3]));
        assert_eq!(None, RData::from_rdata(QueryType::A, &[1, 2, 3, 4, 5]));
    }

    #[test]
    fn test_aaaa_rdata() {
        let rdata = RData::Aaaa {
            addr: "2001:db8::1".parse().unwrap(),
        };
        roundtrip(rdata.clone(), QueryType::Aaaa);

        if let RData::Aaaa { addr } = rdata {
            assert_eq!("2001:db8::1", addr.to_string());
        }

        assert_eq!(None, RData::from_rdata(QueryType::Aaaa, &[0; 15]));
    }

    #[test]
    fn test_all_zero_ipv6_is_double_colon() {
        let rdata = RData::from_rdata(QueryType::Aaaa, &[0; 16]).unwrap();
        if let RData::Aaaa { addr } = rdata {
            assert_eq!("::", addr.to_string());
            assert_eq!([0u8; 16], addr.octets());
        } else {
            panic!("expected AAAA");
        }
    }

    #[test]
    fn test_mx_rdata() {
        roundtrip(
            RData::Mx {
                priority: 10,
                host: "mail.example.com".to_string(),
            },
            QueryType::Mx,
        );

        // Requires at least the preference field.
        assert_eq!(None, RData::from_rdata(QueryType::Mx, &[0]));
    }

    #[test]
    fn test_soa_rdata() {
        roundtrip(
            RData::Soa {
                m_name: "ns1.example.com".to_string(),
                r_name: "admin.example.com".to_string(),
                serial: 2023120101,
                refresh: 3600,
                retry: 1800,
                expire: 604800,
                minimum: 3600,
            },
            QueryType::Soa,
        );
    }

    #[test]
    fn test_txt_rdata() {
        let strings = vec![
            "v=spf1".to_string(),
            "include:_spf.test.com".to_string(),
            "~all".to_string(),
        ];
        let rdata = RData::Txt {
            strings: strings.clone(),
        };
        let encoded = rdata.to_rdata();

        match RData::from_rdata(QueryType::Txt, &encoded) {
            Some(RData::Txt { strings: decoded }) => assert_eq!(strings, decoded),
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_txt_empty_forms() {
        // The empty list encodes to zero octets.
        let empty_list = RData::Txt { strings: vec![] };
        assert!(empty_list.to_rdata().is_empty());

        // A single empty character string is one zero octet, and the two
        // forms stay distinct through a roundtrip.
        let empty_string = RData::Txt {
            strings: vec![String::new()],
        };
        assert_eq!(vec![0u8], empty_string.to_rdata());
        assert_eq!(
            Some(empty_string),
            RData::from_rdata(QueryType::Txt, &[0u8])
        );
        assert_eq!(Some(empty_list), RData::from_rdata(QueryType::Txt, &[]));
    }

    #[test]
    fn test_hinfo_rdata() {
        roundtrip(
            RData::Hinfo {
                cpu: "AMD64".to_string(),
                os: "Linux".to_string(),
            },
            QueryType::Hinfo,
        );
    }

    #[test]
    fn test_hinfo_cannot_read_past_its_rdata() {
        // The cpu string claims five octets but the record is only four
        // long; the trailing bytes belong to whatever follows in the
        // message and must not leak into the payload.
        let data = [5, b'a', b'b', b'c', 1, b'z', 1, b'z'];
        let mut buffer = VectorPacketBuffer::from_bytes(&data);

        assert_eq!(
            Err(DecodeError::Truncated),
            RData::read(&mut buffer, QueryType::Hinfo, 4)
        );

        // Same for the second string.
        let data = [1, b'a', 4, b'x', b'y', b'z', b'w', b'q'];
        let mut buffer = VectorPacketBuffer::from_bytes(&data);

        assert_eq!(
            Err(DecodeError::Truncated),
            RData::read(&mut buffer, QueryType::Hinfo, 6)
        );
    }

    #[test]
    fn test_ptr_rdata() {
        roundtrip(
            RData::Ptr {
                host: "host.example.com".to_string(),
            },
            QueryType::Ptr,
        );
    }

    #[test]
    fn test_wks_rdata() {
        roundtrip(
            RData::Wks {
                addr: Ipv4Addr::new(10, 0, 0, 1),
                protocol: 6,
                bitmap: vec![0b1000_0000, 0b0010_0000],
            },
            QueryType::Wks,
        );

        assert_eq!(None, RData::from_rdata(QueryType::Wks, &[10, 0, 0, 1]));
    }

    #[test]
    fn test_unknown_rdata_preserved() {
        let rdata = RData::Unknown {
            qtype: 99,
            data: vec![1, 2, 3, 4],
        };
        let encoded = rdata.to_rdata();
        assert_eq!(vec![1, 2, 3, 4], encoded);
        assert_eq!(
            Some(rdata),
            RData::from_rdata(QueryType::Unknown(99), &encoded)
        );
    }
}
