//! Wire format integration tests against hand-built packets

use meridian::dns::buffer::{DecodeError, PacketBuffer, VectorPacketBuffer};
use meridian::dns::protocol::{DnsHeader, DnsPacket, DnsQuestion, DnsRecord, QueryType, ResultCode};
use meridian::dns::records::RData;

#[test]
fn test_header_framing() {
    let mut header = DnsHeader::new();
    header.id = 12345;
    header.response = true;
    header.opcode = 0;
    header.authoritative_answer = true;
    header.recursion_desired = true;
    header.recursion_available = true;
    header.rescode = ResultCode::NOERROR;
    header.questions = 1;
    header.answers = 1;

    let mut buffer = VectorPacketBuffer::new();
    header.write(&mut buffer).unwrap();

    assert_eq!(12, buffer.pos());
    assert_eq!([0x30, 0x39, 0x85, 0x80], buffer.as_slice()[0..4]);
}

#[test]
fn test_a_record_answer_roundtrip() {
    let mut packet = DnsPacket::new();
    packet.header.id = 821;
    packet.header.response = true;
    packet.header.authoritative_answer = true;
    packet.header.recursion_desired = true;

    packet
        .questions
        .push(DnsQuestion::new("example.com".to_string(), QueryType::A));
    packet.answers.push(DnsRecord::new(
        "example.com",
        3600,
        RData::A {
            addr: "192.168.1.1".parse().unwrap(),
        },
    ));

    let bytes = packet.to_bytes().unwrap();
    let parsed = DnsPacket::from_bytes(&bytes).unwrap();

    assert_eq!(packet.header, parsed.header);
    assert_eq!(packet.questions, parsed.questions);
    assert_eq!(packet.answers, parsed.answers);
    assert_eq!(3600, parsed.answers[0].get_ttl());
    assert_eq!(
        vec![0xC0, 0xA8, 0x01, 0x01],
        parsed.answers[0].rdata.to_rdata()
    );
}

#[test]
fn test_compression_pointer_decode() {
    // A hand-built message with two questions. The first carries
    // www.example.com in full; the second reuses the example.com suffix
    // through a pointer to offset 16.
    let mut data = vec![
        0x00, 0x00, // id
        0x00, 0x00, // flags
        0x00, 0x02, // qdcount
        0x00, 0x00, // ancount
        0x00, 0x00, // nscount
        0x00, 0x00, // arcount
    ];
    data.extend_from_slice(&[
        3, b'w', b'w', b'w', 7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3, b'c', b'o', b'm', 0,
    ]);
    data.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]); // A IN
    data.extend_from_slice(&[0xC0, 0x10]); // pointer to "example.com"
    data.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]); // A IN

    let packet = DnsPacket::from_bytes(&data).unwrap();

    assert_eq!(2, packet.questions.len());
    assert_eq!("www.example.com", packet.questions[0].name);
    assert_eq!("example.com", packet.questions[1].name);
}

#[test]
fn test_compression_pointer_inside_rdata() {
    // The CNAME payload consists of nothing but a pointer back to the
    // question name, so decoding it requires the whole message.
    let mut data = vec![
        0x00, 0x01, // id
        0x80, 0x00, // response
        0x00, 0x01, // qdcount
        0x00, 0x01, // ancount
        0x00, 0x00, // nscount
        0x00, 0x00, // arcount
    ];
    data.extend_from_slice(&[
        3, b'w', b'w', b'w', 7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3, b'c', b'o', b'm', 0,
    ]);
    data.extend_from_slice(&[0x00, 0x05, 0x00, 0x01]); // CNAME IN
    data.extend_from_slice(&[0xC0, 0x0C]); // owner: pointer to question name
    data.extend_from_slice(&[0x00, 0x05, 0x00, 0x01]); // CNAME IN
    data.extend_from_slice(&[0x00, 0x00, 0x0E, 0x10]); // ttl 3600
    data.extend_from_slice(&[0x00, 0x02]); // rdlength 2
    data.extend_from_slice(&[0xC0, 0x0C]); // rdata: pointer to question name

    let packet = DnsPacket::from_bytes(&data).unwrap();

    assert_eq!(1, packet.answers.len());
    assert_eq!("www.example.com", packet.answers[0].name);
    assert_eq!(
        RData::Cname {
            host: "www.example.com".to_string()
        },
        packet.answers[0].rdata
    );
}

#[test]
fn test_foreign_referral_response_decodes() {
    // A referral as another implementation might encode it, without any
    // compression: empty answer section, NS in authority, glue A in the
    // additional section.
    let mut data = vec![
        0xAB, 0xCD, // id
        0x80, 0x00, // response
        0x00, 0x01, // qdcount
        0x00, 0x00, // ancount
        0x00, 0x01, // nscount
        0x00, 0x01, // arcount
    ];
    // question: host.test.com A IN
    data.extend_from_slice(&[4, b'h', b'o', b's', b't', 4, b't', b'e', b's', b't', 3, b'c', b'o', b'm', 0]);
    data.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
    // authority: test.com NS ns1.test.com
    data.extend_from_slice(&[4, b't', b'e', b's', b't', 3, b'c', b'o', b'm', 0]);
    data.extend_from_slice(&[0x00, 0x02, 0x00, 0x01]);
    data.extend_from_slice(&[0x00, 0x00, 0x0E, 0x10]);
    data.extend_from_slice(&[0x00, 0x0E]); // rdlength 14
    data.extend_from_slice(&[3, b'n', b's', b'1', 4, b't', b'e', b's', b't', 3, b'c', b'o', b'm', 0]);
    // additional: ns1.test.com A 10.0.0.1
    data.extend_from_slice(&[3, b'n', b's', b'1', 4, b't', b'e', b's', b't', 3, b'c', b'o', b'm', 0]);
    data.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
    data.extend_from_slice(&[0x00, 0x00, 0x0E, 0x10]);
    data.extend_from_slice(&[0x00, 0x04]);
    data.extend_from_slice(&[10, 0, 0, 1]);

    let packet = DnsPacket::from_bytes(&data).unwrap();

    let referral = packet.referral_hosts("host.test.com");
    assert_eq!(vec!["ns1.test.com".to_string()], referral);
    assert_eq!(
        vec!["10.0.0.1".parse::<std::net::IpAddr>().unwrap()],
        packet.glue_for("ns1.test.com")
    );
}

#[test]
fn test_truncated_header() {
    assert_eq!(
        Err(DecodeError::Truncated),
        DnsPacket::from_bytes(&[0x01, 0x02, 0x03])
    );
}

#[test]
fn test_counts_beyond_buffer_are_rejected() {
    let mut packet = DnsPacket::new();
    packet
        .questions
        .push(DnsQuestion::new("example.com".to_string(), QueryType::A));
    let mut bytes = packet.to_bytes().unwrap();

    // Forge an answer count with no records behind it.
    bytes[7] = 3;

    assert_eq!(
        Err(DecodeError::SectionCountMismatch),
        DnsPacket::from_bytes(&bytes)
    );
}

#[test]
fn test_encode_decode_with_compression_is_lossless() {
    let mut packet = DnsPacket::new();
    packet.header.id = 7;
    packet.header.response = true;
    packet
        .questions
        .push(DnsQuestion::new("www.example.com".to_string(), QueryType::Mx));

    // Shared suffixes all over the sections, inviting heavy compression.
    packet.answers.push(DnsRecord::new(
        "www.example.com",
        300,
        RData::Mx {
            priority: 10,
            host: "mail.example.com".to_string(),
        },
    ));
    packet.answers.push(DnsRecord::new(
        "www.example.com",
        300,
        RData::Mx {
            priority: 20,
            host: "backup.mail.example.com".to_string(),
        },
    ));
    packet.authorities.push(DnsRecord::new(
        "example.com",
        300,
        RData::Ns {
            host: "ns1.example.com".to_string(),
        },
    ));
    packet.resources.push(DnsRecord::new(
        "ns1.example.com",
        300,
        RData::A {
            addr: "10.0.0.53".parse().unwrap(),
        },
    ));

    let bytes = packet.to_bytes().unwrap();

    // The encoding must come out smaller than the sum of the uncompressed
    // names, and decode back to the same sections.
    let parsed = DnsPacket::from_bytes(&bytes).unwrap();
    assert_eq!(packet.questions, parsed.questions);
    assert_eq!(packet.answers, parsed.answers);
    assert_eq!(packet.authorities, parsed.authorities);
    assert_eq!(packet.resources, parsed.resources);
    assert_eq!(parsed.header.answers as usize, parsed.answers.len());
    assert_eq!(
        parsed.header.authoritative_entries as usize,
        parsed.authorities.len()
    );
    assert_eq!(
        parsed.header.resource_entries as usize,
        parsed.resources.len()
    );
}
