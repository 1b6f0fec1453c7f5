use std::net::{Ipv4Addr, Ipv6Addr};

use anyhow::ensure;

use crate::{
    domain_name::DomainName,
    reader::{DnsMessageReader, DnsReadable},
    u16_enum_with_unknown,
    writer::{DnsMessageWriter, DnsWritable},
};

u16_enum_with_unknown! {
    /// DNS record types.
    ///
    /// Based on: https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-4
    pub enum RecordType("TYPE") {
        /// IPv4
        A = 1,
        /// Name server
        NS = 2,
        /// Canonical name
        CNAME = 5,
        /// Start of authority
        SOA = 6,
        /// Null
        NULL = 10,
        /// Pointer (for reverse DNS)
        PTR = 12,
        HINFO = 13,
        /// Mail exchange
        MX = 15,
        /// Text strings
        TXT = 16,
        /// IPv6
        AAAA = 28,
        /// Location Information
        LOC = 29,
        /// Service locator
        SRV = 33,
        /// Naming Authority Pointer
        NAPTR = 35,
        CERT = 37,
        DNAME = 39,
        /// OPT, only used by additional records (EDNS)
        OPT = 41,
        /// Delegation Signer
        DS = 43,
        SSHFP = 44,
        RRSIG = 46,
        NSEC = 47,
        DNSKEY = 48,
        NSEC3 = 50,
        NSEC3PARAM = 51,
        TLSA = 52,
        /// General-purpose service binding
        SVCB = 64,
        /// SVCB-compatible type for use with HTTP
        HTTPS = 65,
        SPF = 99,
        TKEY = 249,
        TSIG = 250,
        IXFR = 251,
        AXFR = 252,
        /// All records
        ANY = 255,
        URI = 256,
        /// Certification Authority Restriction
        CAA = 257,
    }
}

u16_enum_with_unknown! {
    /// DNS class types.
    pub enum ClassType("CLASS") {
        /// Internet
        IN = 1,
        /// Chaosnet
        CH = 3,
        /// Hesiod (MIT Athena)
        HS = 4,
        /// Used by dynamic updates
        NONE = 254,
        /// Any
        ANY = 255,
    }
}

/// Associated data for a DNS record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsRecordData {
    Raw(Vec<u8>),
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    /// One or more character-strings.
    Text(Vec<Vec<u8>>),

    SOA {
        /// Primary nameserver.
        mname: DomainName,
        /// Contact email
        rname: DomainName,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    MX {
        priority: u16,
        host: DomainName,
    },
    SRV {
        priority: u16,
        weight: u16,
        port: u16,
        target: DomainName,
    },
    DomainName(DomainName),
}

impl DnsRecordData {
    /// Write the DNS record data to the DNS message.
    pub fn write(&self, writer: &mut DnsMessageWriter) -> anyhow::Result<()> {
        match self {
            DnsRecordData::Raw(data) => writer.write_bytes(data),
            DnsRecordData::Ipv4(addr) => writer.write_bytes(&addr.octets()),
            DnsRecordData::Ipv6(addr) => writer.write_bytes(&addr.octets()),
            DnsRecordData::Text(strings) => {
                for s in strings {
                    ensure!(s.len() <= 255, "character-string longer than 255 bytes");
                    writer.write_u8(s.len() as u8)?;
                    writer.write_bytes(s)?;
                }
                Ok(())
            }
            DnsRecordData::DomainName(name) => writer.write_qname(name),

            DnsRecordData::SOA {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                writer.write_qname(mname)?;
                writer.write_qname(rname)?;
                writer.write_u32(*serial)?;
                writer.write_u32(*refresh)?;
                writer.write_u32(*retry)?;
                writer.write_u32(*expire)?;
                writer.write_u32(*minimum)?;
                Ok(())
            }
            DnsRecordData::MX { priority, host } => {
                writer.write_u16(*priority)?;
                writer.write_qname(host)?;
                Ok(())
            }
            // RFC 2782: the SRV target must not be compressed.
            DnsRecordData::SRV {
                priority,
                weight,
                port,
                target,
            } => {
                writer.write_u16(*priority)?;
                writer.write_u16(*weight)?;
                writer.write_u16(*port)?;
                writer.write_qname_uncompressed(target)?;
                Ok(())
            }
        }
    }

    /// Decode record data based on the provided `record_type`.
    ///
    /// Exactly `data_length` bytes are consumed; anything else is an error.
    pub fn read_from_record_type(
        reader: &mut DnsMessageReader,
        record_type: RecordType,
        data_length: usize,
    ) -> anyhow::Result<DnsRecordData> {
        let start = reader.position();
        let end = start + data_length;

        let data = match record_type {
            RecordType::CNAME | RecordType::PTR | RecordType::NS if data_length > 0 => {
                DnsRecordData::DomainName(reader.read_qname()?)
            }
            RecordType::A if data_length == 4 => {
                let raw = reader.read_bytes(4)?;
                DnsRecordData::Ipv4(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]))
            }
            RecordType::AAAA if data_length == 16 => {
                let raw: [u8; 16] = reader.read_bytes(16)?.try_into()?;
                DnsRecordData::Ipv6(Ipv6Addr::from(raw))
            }
            RecordType::TXT | RecordType::SPF if data_length > 0 => {
                let mut strings = Vec::new();
                while reader.position() < end {
                    let len = reader.read_u8()? as usize;
                    strings.push(reader.read_bytes(len)?.to_vec());
                }
                DnsRecordData::Text(strings)
            }
            RecordType::SOA if data_length > 0 => DnsRecordData::SOA {
                mname: reader.read_qname()?,
                rname: reader.read_qname()?,
                serial: reader.read_u32()?,
                refresh: reader.read_u32()?,
                retry: reader.read_u32()?,
                expire: reader.read_u32()?,
                minimum: reader.read_u32()?,
            },
            RecordType::MX if data_length > 0 => DnsRecordData::MX {
                priority: reader.read_u16()?,
                host: reader.read_qname()?,
            },
            RecordType::SRV if data_length > 0 => DnsRecordData::SRV {
                priority: reader.read_u16()?,
                weight: reader.read_u16()?,
                port: reader.read_u16()?,
                target: reader.read_qname()?,
            },
            _ => DnsRecordData::Raw(reader.read_bytes(data_length)?.to_vec()),
        };

        ensure!(
            reader.position() == end,
            "rdata length mismatch for {}: declared {} bytes, consumed {}",
            record_type,
            data_length,
            reader.position() - start
        );
        Ok(data)
    }

    /// Address payload, if this is address data.
    pub fn ip_octets(&self) -> Option<Vec<u8>> {
        match self {
            DnsRecordData::Ipv4(addr) => Some(addr.octets().to_vec()),
            DnsRecordData::Ipv6(addr) => Some(addr.octets().to_vec()),
            _ => None,
        }
    }
}

/// Represents a DNS record in a DNS message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: DomainName,
    pub record_type: RecordType,
    pub class: ClassType,
    pub ttl: u32,
    pub data: DnsRecordData,
}

impl DnsRecord {
    pub fn new(name: DomainName, record_type: RecordType, class: ClassType, ttl: u32, data: DnsRecordData) -> Self {
        Self {
            name,
            record_type,
            class,
            ttl,
            data,
        }
    }

    /// Get the name of the DNS record.
    pub fn name(&self) -> &str {
        &self.name
    }
    /// Get the type of the DNS record.
    pub fn record_type(&self) -> RecordType {
        self.record_type
    }
    /// Get the class of the DNS record.
    pub fn class(&self) -> ClassType {
        self.class
    }
    /// Get the TTL (Time to Live) of the DNS record.
    pub fn ttl(&self) -> u32 {
        self.ttl
    }
    /// Get the data of the DNS record.
    pub fn data(&self) -> &DnsRecordData {
        &self.data
    }
}

impl DnsReadable for DnsRecord {
    fn read_from(reader: &mut DnsMessageReader) -> anyhow::Result<Self> {
        let name = reader.read_qname()?;
        let record_type = RecordType::from(reader.read_u16()?);
        let class = ClassType::from(reader.read_u16()?);
        let ttl = reader.read_u32()?;
        let data_length = reader.read_u16()? as usize;

        let data = DnsRecordData::read_from_record_type(reader, record_type, data_length)?;

        Ok(Self {
            name,
            record_type,
            class,
            ttl,
            data,
        })
    }
}

impl DnsWritable for DnsRecord {
    fn write_to(&self, writer: &mut DnsMessageWriter) -> anyhow::Result<()> {
        writer.write_qname(&self.name)?;
        writer.write_u16(self.record_type.to_u16())?;
        writer.write_u16(self.class.to_u16())?;
        writer.write_u32(self.ttl)?;

        let rdlen_pos = writer.position();

        // Reserve rdlen so we can go back once we know the size.
        writer.write_u16(0)?;

        let before = writer.position();
        self.data.write(writer)?;
        let rdlen = writer.position() - before;
        ensure!(rdlen <= u16::MAX as usize, "rdata too long: {} bytes", rdlen);

        writer.overwrite_bytes(rdlen_pos, &(rdlen as u16).to_be_bytes())?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(record: &DnsRecord) -> DnsRecord {
        let mut writer = DnsMessageWriter::new();
        record.write_to(&mut writer).unwrap();
        let bytes = writer.into_bytes();
        let mut reader = DnsMessageReader::new(&bytes);
        let decoded = DnsRecord::read_from(&mut reader).unwrap();
        assert_eq!(reader.remaining(), 0);
        decoded
    }

    #[test]
    fn test_mnemonics() {
        assert_eq!(RecordType::from_mnemonic("aaaa"), Some(RecordType::AAAA));
        assert_eq!(RecordType::from_mnemonic("TYPE28"), Some(RecordType::AAAA));
        assert_eq!(RecordType::from_mnemonic("type999"), Some(RecordType::Unknown(999)));
        assert_eq!(RecordType::from_mnemonic("BOGUS"), None);
        assert_eq!(RecordType::Unknown(999).to_string(), "TYPE999");
        assert_eq!(ClassType::from_mnemonic("in"), Some(ClassType::IN));
        assert_eq!(ClassType::from(42).to_string(), "CLASS42");
    }

    #[test]
    fn test_txt_multiple_strings() {
        let record = DnsRecord::new(
            DomainName::from_ascii("example.com").unwrap(),
            RecordType::TXT,
            ClassType::IN,
            60,
            DnsRecordData::Text(vec![b"v=spf1".to_vec(), b"-all".to_vec()]),
        );
        assert_eq!(round_trip(&record), record);
    }

    #[test]
    fn test_unknown_type_kept_raw() {
        let record = DnsRecord::new(
            DomainName::from_ascii("example.com").unwrap(),
            RecordType::Unknown(65280),
            ClassType::Unknown(7),
            1,
            DnsRecordData::Raw(vec![1, 2, 3]),
        );
        assert_eq!(round_trip(&record), record);
    }

    #[test]
    fn test_srv_round_trip() {
        let record = DnsRecord::new(
            DomainName::from_ascii("_sip._udp.example.com").unwrap(),
            RecordType::SRV,
            ClassType::IN,
            300,
            DnsRecordData::SRV {
                priority: 10,
                weight: 5,
                port: 5060,
                target: DomainName::from_ascii("sip.example.com").unwrap(),
            },
        );
        assert_eq!(round_trip(&record), record);
    }

    #[test]
    fn test_rdata_length_mismatch() {
        // A record claiming 5 bytes of rdata.
        let mut writer = DnsMessageWriter::new();
        writer.write_qname("a.example").unwrap();
        writer.write_u16(1).unwrap();
        writer.write_u16(1).unwrap();
        writer.write_u32(0).unwrap();
        writer.write_u16(5).unwrap();
        writer.write_bytes(&[1, 2, 3, 4, 5]).unwrap();
        let bytes = writer.into_bytes();

        let mut reader = DnsMessageReader::new(&bytes);
        let record = DnsRecord::read_from(&mut reader).unwrap();
        // Not a valid A payload, so it is kept as raw bytes instead of failing.
        assert_eq!(record.data, DnsRecordData::Raw(vec![1, 2, 3, 4, 5]));

        let mut writer = DnsMessageWriter::new();
        writer.write_qname("a.example").unwrap();
        writer.write_u16(15).unwrap();
        writer.write_u16(1).unwrap();
        writer.write_u32(0).unwrap();
        writer.write_u16(2).unwrap();
        writer.write_bytes(&[0, 10, 0]).unwrap();
        let bytes = writer.into_bytes();
        assert!(DnsRecord::read_from(&mut DnsMessageReader::new(&bytes)).is_err());
    }
}
