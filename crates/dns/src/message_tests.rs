use std::net::Ipv4Addr;

use super::*;
use crate::{DnsMessageBuilder, error::is_capacity_error, record::DnsRecordData};

fn query(name: &str) -> DnsMessage {
    DnsMessageBuilder::new()
        .with_id(0xBEEF)
        .add_question(DnsQuestion::new(
            DomainName::from_ascii(name).unwrap(),
            RecordType::A,
            ClassType::IN,
        ))
        .build()
}

fn a_record(name: &str, ip: [u8; 4]) -> DnsRecord {
    DnsRecord::new(
        DomainName::from_ascii(name).unwrap(),
        RecordType::A,
        ClassType::IN,
        300,
        DnsRecordData::Ipv4(Ipv4Addr::from(ip)),
    )
}

#[test]
fn test_header_bits() {
    let flags = DnsFlags::from_bits(0x8180);
    assert!(flags.response);
    assert!(flags.recursion_desired);
    assert!(flags.recursion_available);
    assert_eq!(flags.opcode, 0);
    assert_eq!(flags.to_bits(), 0x8180);

    let flags = DnsFlags::from_bits(0x2803);
    assert_eq!(flags.opcode, 5);
    assert_eq!(flags.rcode_low, 3);
    assert_eq!(flags.to_bits(), 0x2803);
}

#[test]
fn test_decode_encode() {
    let mut message = query("example.com");
    message.answers_mut().push(a_record("example.com", [192, 0, 2, 1]));
    message.set_edns(Some(Edns::default()));

    let bytes = message.encode().unwrap();
    let decoded = DnsMessage::decode(&bytes).unwrap();
    assert_eq!(decoded, message);
    assert_eq!(decoded.id, 0xBEEF);
    assert!(decoded.additional_records().is_empty());
    assert_eq!(decoded.edns().unwrap().udp_payload_size, 4096);
}

#[test]
fn test_decode_rejects_truncated() {
    let bytes = query("example.com").encode().unwrap();
    assert!(DnsMessage::decode(&bytes[..bytes.len() - 1]).is_err());
    assert!(DnsMessage::decode(&bytes[..5]).is_err());
}

#[test]
fn test_decode_rejects_two_opt_records() {
    let mut message = query("example.com");
    message.set_edns(Some(Edns::default()));
    let mut bytes = message.encode().unwrap().to_vec();

    // Duplicate the OPT record and bump ARCOUNT.
    let opt = bytes[bytes.len() - 11..].to_vec();
    bytes.extend_from_slice(&opt);
    bytes[11] = 2;
    assert!(DnsMessage::decode(&bytes).is_err());
}

#[test]
fn test_flag_word() {
    let mut message = query("example.com");
    message.flags.recursion_desired = true;
    message.set_rcode(3);
    assert_eq!(message.flag_word(), PacketFlags::RD.bits());

    message.set_flag_word((PacketFlags::QR | PacketFlags::AA).bits());
    assert!(message.flags.response);
    assert!(message.flags.authorative_answer);
    assert!(!message.flags.recursion_desired);
    assert_eq!(message.rcode(), 3);
    assert!(message.edns().is_none());

    message.set_flag_word((PacketFlags::QR | PacketFlags::DO).bits());
    assert!(message.edns().unwrap().do_bit());
    assert_eq!(message.flag_word(), (PacketFlags::QR | PacketFlags::DO).bits());
}

#[test]
fn test_extended_rcode() {
    let mut message = query("example.com");
    message.set_rcode(3);
    assert!(message.edns().is_none());
    assert_eq!(message.response_code().unwrap(), DnsResponseCode::NxDomain);

    message.set_rcode(16);
    assert_eq!(message.edns().unwrap().packed_ttl() >> 24, 1);
    assert_eq!(message.flags.rcode_low, 0);
    assert_eq!(message.response_code().unwrap(), DnsResponseCode::BADVERS);

    let decoded = DnsMessage::decode(&message.encode().unwrap()).unwrap();
    assert_eq!(decoded.rcode(), 16);
}

#[test]
fn test_opcode_out_of_range_fails_encoding() {
    let mut message = query("example.com");
    message.set_opcode(DnsOpcode::Notify.into());
    assert_eq!(message.opcode(), 4);
    assert!(message.encode().is_ok());

    message.set_opcode(16);
    assert!(message.encode().is_err());
}

#[test]
fn test_encode_bounded() {
    let mut message = query("example.com");
    for i in 0..50 {
        message.answers_mut().push(a_record(&format!("host{i}.example.com"), [10, 0, 0, i]));
    }
    assert!(message.encode().is_ok());

    let err = message.encode_with_max(200).unwrap_err();
    assert!(is_capacity_error(&err));
}
