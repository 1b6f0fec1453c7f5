use anyhow::ensure;
use bitflags::bitflags;
use bytes::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    DNS_MAX_PACKET_SIZE,
    domain_name::DomainName,
    edns::Edns,
    reader::{DnsMessageReader, DnsReadable},
    record::{ClassType, DnsRecord, RecordType},
    writer::{DnsMessageWriter, DnsWritable},
};

bitflags! {
    /// The 32-bit flag word exposed to hooks.
    ///
    /// The low half mirrors the header flag bits (opcode and rcode excluded), the high half
    /// holds the EDNS extended flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PacketFlags: u32 {
        const QR = 1 << 15;
        const AA = 1 << 10;
        const TC = 1 << 9;
        const RD = 1 << 8;
        const RA = 1 << 7;
        const Z = 1 << 6;
        const AD = 1 << 5;
        const CD = 1 << 4;
        const DO = 1 << 31;
    }
}

impl PacketFlags {
    /// Header bits that belong to the flag word.
    pub const HEADER_MASK: u16 = 0x87F0;
}

/// Represents a DNS message.
/// This struct encapsulates the various components of a DNS message and does not represent the full wire structure.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DnsMessage {
    /// Transaction id
    pub id: u16,
    /// Flags
    pub flags: DnsFlags,
    /// Questions in the DNS message
    questions: Vec<DnsQuestion>,
    /// Answers in the DNS message
    answers: Vec<DnsRecord>,
    /// Authority records in the DNS message
    authority_records: Vec<DnsRecord>,
    /// Additional records in the DNS message, without the OPT record
    additional_records: Vec<DnsRecord>,
    /// EDNS
    edns: Option<Edns>,
}

impl DnsMessage {
    pub fn new(
        id: u16,
        flags: DnsFlags,
        questions: Vec<DnsQuestion>,
        answers: Vec<DnsRecord>,
        authority_records: Vec<DnsRecord>,
        additional_records: Vec<DnsRecord>,
    ) -> Self {
        Self {
            id,
            flags,
            questions,
            answers,
            authority_records,
            additional_records,
            edns: None,
        }
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<Self> {
        let mut reader = DnsMessageReader::new(data);

        let id = reader.read_u16()?;
        let flags = DnsFlags::read_from(&mut reader)?;

        let number_of_questions = reader.read_u16()?; // QDCOUNT
        let number_of_answers = reader.read_u16()?; // ANCOUNT
        let number_of_authority_records = reader.read_u16()?; // NSCOUNT
        let number_of_additional_records = reader.read_u16()?; // ARCOUNT

        let mut questions = Vec::with_capacity(number_of_questions as usize);
        for _ in 0..number_of_questions {
            questions.push(DnsQuestion::read_from(&mut reader)?);
        }

        let mut answers = Vec::with_capacity(number_of_answers as usize);
        for _ in 0..number_of_answers {
            answers.push(DnsRecord::read_from(&mut reader)?);
        }

        let mut authority_records = Vec::with_capacity(number_of_authority_records as usize);
        for _ in 0..number_of_authority_records {
            authority_records.push(DnsRecord::read_from(&mut reader)?);
        }

        let mut additional_records = Vec::with_capacity(number_of_additional_records as usize);
        let mut edns: Option<Edns> = None;

        for _ in 0..number_of_additional_records {
            let start = reader.position();
            let owner = reader.read_qname()?;
            let rtype = RecordType::from(reader.read_u16()?);

            // Handle EDNS
            if rtype == RecordType::OPT {
                ensure!(owner.is_root(), "OPT record with non-root owner '{}'", owner);
                ensure!(edns.is_none(), "more than one OPT record");
                edns = Some(Edns::read_from(&mut reader)?);
            } else {
                // Not OPT: handle as normal record.
                reader.seek(start)?;
                additional_records.push(DnsRecord::read_from(&mut reader)?);
            }
        }

        Ok(Self {
            id,
            flags,
            questions,
            answers,
            authority_records,
            additional_records,
            edns,
        })
    }

    /// Encode, bounded by the maximum packet size.
    pub fn encode(&self) -> anyhow::Result<Bytes> {
        self.encode_with_max(DNS_MAX_PACKET_SIZE)
    }

    pub fn encode_with_max(&self, max_len: usize) -> anyhow::Result<Bytes> {
        let mut writer = DnsMessageWriter::new_with_max(max_len);

        // ID
        writer.write_u16(self.id)?;

        // Flags
        self.flags.write_to(&mut writer)?;

        let additional_count = self.additional_records.len() + usize::from(self.edns.is_some());
        for count in [
            self.questions.len(), // QDCOUNT
            self.answers.len(), // ANCOUNT
            self.authority_records.len(), // NSCOUNT
            additional_count, // ARCOUNT
        ] {
            ensure!(count <= u16::MAX as usize, "too many entries in a section: {}", count);
            writer.write_u16(count as u16)?;
        }

        for question in &self.questions {
            question.write_to(&mut writer)?;
        }

        for record in self
            .answers
            .iter()
            .chain(&self.authority_records)
            .chain(&self.additional_records)
        {
            record.write_to(&mut writer)?;
        }

        if let Some(edns) = &self.edns {
            edns.write_to(&mut writer)?;
        }

        Ok(writer.into_bytes())
    }

    /// Questions
    pub fn questions(&self) -> &[DnsQuestion] {
        &self.questions
    }

    pub fn questions_mut(&mut self) -> &mut Vec<DnsQuestion> {
        &mut self.questions
    }

    /// Answers
    pub fn answers(&self) -> &[DnsRecord] {
        &self.answers
    }

    pub fn answers_mut(&mut self) -> &mut Vec<DnsRecord> {
        &mut self.answers
    }

    /// Authority records
    pub fn authority_records(&self) -> &[DnsRecord] {
        &self.authority_records
    }

    pub fn authority_records_mut(&mut self) -> &mut Vec<DnsRecord> {
        &mut self.authority_records
    }

    /// Additional records
    pub fn additional_records(&self) -> &[DnsRecord] {
        &self.additional_records
    }

    pub fn additional_records_mut(&mut self) -> &mut Vec<DnsRecord> {
        &mut self.additional_records
    }

    /// Answer, authority and additional records, in that order.
    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut DnsRecord> {
        self.answers
            .iter_mut()
            .chain(self.authority_records.iter_mut())
            .chain(self.additional_records.iter_mut())
    }

    /// EDNS
    pub fn edns(&self) -> Option<&Edns> {
        self.edns.as_ref()
    }

    pub fn edns_mut(&mut self) -> Option<&mut Edns> {
        self.edns.as_mut()
    }

    pub fn set_edns(&mut self, edns: Option<Edns>) {
        self.edns = edns;
    }

    /// The hook-facing 32-bit flag word.
    pub fn flag_word(&self) -> u32 {
        let header = (self.flags.to_bits() & PacketFlags::HEADER_MASK) as u32;
        let extended = self.edns.as_ref().map(|e| e.flags).unwrap_or(0) as u32;
        header | (extended << 16)
    }

    /// Replace the flag word. Opcode and rcode are left alone; setting extended flags on a
    /// message without EDNS adds an OPT record.
    pub fn set_flag_word(&mut self, word: u32) {
        let header = self.flags.to_bits();
        let header = (header & !PacketFlags::HEADER_MASK) | (word as u16 & PacketFlags::HEADER_MASK);
        let opcode = self.flags.opcode;
        self.flags = DnsFlags::from_bits(header);
        // to_bits truncates the opcode.
        self.flags.opcode = opcode;

        let extended = (word >> 16) as u16;
        match self.edns.as_mut() {
            Some(edns) => edns.flags = extended,
            None if extended != 0 => {
                self.edns = Some(Edns {
                    flags: extended,
                    ..Default::default()
                })
            }
            None => {}
        }
    }

    // Set the response code
    pub fn set_response_code(&mut self, response_code: DnsResponseCode) {
        let full: u16 = response_code.into();
        self.set_rcode(full as u8);
    }

    /// Response code
    pub fn response_code(&self) -> anyhow::Result<DnsResponseCode> {
        let code = DnsResponseCode::try_from(self.rcode() as u16)?;
        Ok(code)
    }

    /// Raw response code, extended bits from EDNS included.
    pub fn rcode(&self) -> u8 {
        let low = self.flags.rcode_low & 0x0F;
        let high = self.edns.as_ref().map(|e| e.extended_rcode).unwrap_or(0);
        (high << 4) | low
    }

    /// Set the raw response code. Values above 15 need EDNS to carry the high bits.
    pub fn set_rcode(&mut self, rcode: u8) {
        self.flags.rcode_low = rcode & 0x0F;
        let high = rcode >> 4;
        match self.edns.as_mut() {
            Some(edns) => edns.extended_rcode = high,
            None if high != 0 => {
                self.edns = Some(Edns {
                    extended_rcode: high,
                    ..Default::default()
                })
            }
            None => {}
        }
    }

    pub fn opcode(&self) -> u8 {
        self.flags.opcode
    }

    /// Set the opcode. Not validated here; encoding rejects values above 15.
    pub fn set_opcode(&mut self, opcode: u8) {
        self.flags.opcode = opcode;
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct DnsFlags {
    /// Query or Response
    pub response: bool,
    /// Opcode, raw
    pub opcode: u8,
    /// Authoritative Answer
    pub authorative_answer: bool,
    /// Truncated, indicates that this message was truncated due to length greater than 512 bytes
    pub truncated: bool,
    /// Recursion Desired, indicates that the client desires recursive resolution
    pub recursion_desired: bool,
    /// Recursion Available, indicates that the server supports recursive resolution
    pub recursion_available: bool,
    /// Z flag, reserved for future use, must be zero in all queries and responses
    pub(crate) z: bool,
    /// Authentic Data, indicates that the response is authentic
    pub authentic_data: bool,
    /// Checking Disabled, indicates that the server is not performing DNSSEC validation
    pub checking_disabled: bool,
    // Lower part of the response code.
    pub(crate) rcode_low: u8,
}

impl DnsFlags {
    pub fn from_bits(bits: u16) -> Self {
        Self {
            response: (bits >> 15) & 0x1 != 0,
            opcode: ((bits >> 11) & 0xF) as u8,
            authorative_answer: (bits >> 10) & 0x1 != 0,
            truncated: (bits >> 9) & 0x1 != 0,
            recursion_desired: (bits >> 8) & 0x1 != 0,
            recursion_available: (bits >> 7) & 0x1 != 0,
            z: (bits >> 6) & 0x1 != 0,
            authentic_data: (bits >> 5) & 0x1 != 0,
            checking_disabled: (bits >> 4) & 0x1 != 0,
            rcode_low: (bits & 0x0F) as u8,
        }
    }

    /// Header word. The opcode is truncated to 4 bits; use `write_to` to have it checked.
    pub fn to_bits(&self) -> u16 {
        ((self.response as u16) << 15)
            | (((self.opcode & 0x0F) as u16) << 11)
            | ((self.authorative_answer as u16) << 10)
            | ((self.truncated as u16) << 9)
            | ((self.recursion_desired as u16) << 8)
            | ((self.recursion_available as u16) << 7)
            | ((self.z as u16) << 6)
            | ((self.authentic_data as u16) << 5)
            | ((self.checking_disabled as u16) << 4)
            | (self.rcode_low & 0x0F) as u16
    }
}

impl DnsReadable for DnsFlags {
    fn read_from(reader: &mut DnsMessageReader) -> anyhow::Result<Self> {
        Ok(Self::from_bits(reader.read_u16()?))
    }
}

impl DnsWritable for DnsFlags {
    fn write_to(&self, writer: &mut DnsMessageWriter) -> anyhow::Result<()> {
        ensure!(self.opcode <= 0x0F, "opcode {} does not fit in 4 bits", self.opcode);
        writer.write_u16(self.to_bits())
    }
}

/// Dns response code
///
/// Based on: https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-6
#[derive(Debug, Copy, Clone, Default, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum DnsResponseCode {
    /// No error, the request was successful
    #[default]
    NoError = 0,
    /// Format error, the request was malformed
    FormatError = 1,
    /// Server failure, the server encountered an error while processing the request
    ServerFailure = 2,
    /// Non-existent domain, the requested domain does not exist
    NxDomain = 3,
    /// Not Implemented
    NotImp = 4,
    /// Query refused
    Refused = 5,
    /// Name Exists when it should not
    YXDomain = 6,
    /// RR Set Exists when it should not
    YXRRSet = 7,
    /// RR Set that should exist does not
    NXRRSet = 8,
    /// Not Authorized
    NotAuth = 9,
    /// Name not contained in zone
    NotZone = 10,
    /// DSO-TYPE Not Implemented
    DSOTYPENI = 11,
    /// Bad OPT Version
    BADVERS = 16,
    /// Key not recognized
    BADKEY = 17,
    /// Signature out of time window
    BADTIME = 18,
    /// Bad TKEY Mode
    BADMODE = 19,
    /// Duplicate key name
    BADNAME = 20,
    /// Algorithm not supported
    BADALG = 21,
    /// Bad Truncation
    BADTRUNC = 22,
    /// Bad/missing Server Cookie
    BADCOOKIE = 23,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum DnsOpcode {
    /// Standard query
    #[default]
    Query = 0,
    /// Inverse query, obsolete
    IQuery = 1,
    /// Server status request, obsolete
    Status = 2,
    /// Zone change notification
    Notify = 4,
    /// Dynamic update
    Update = 5,
}

/// Represents a DNS question in a DNS message.
#[derive(Debug, Clone, PartialEq)]
pub struct DnsQuestion {
    /// The domain name being queried
    pub qname: DomainName,
    /// The type of the query (e.g., A, AAAA, CNAME)
    pub qtype: RecordType,
    /// The class of the query (e.g., IN for Internet)
    pub qclass: ClassType,
}

impl DnsQuestion {
    pub fn new(qname: DomainName, qtype: RecordType, qclass: ClassType) -> Self {
        Self { qname, qtype, qclass }
    }
}

impl DnsReadable for DnsQuestion {
    fn read_from(reader: &mut DnsMessageReader) -> anyhow::Result<Self> {
        let qname = reader.read_qname()?;
        let qtype = RecordType::from(reader.read_u16()?);
        let qclass = ClassType::from(reader.read_u16()?);

        Ok(Self { qname, qtype, qclass })
    }
}

impl DnsWritable for DnsQuestion {
    fn write_to(&self, writer: &mut DnsMessageWriter) -> anyhow::Result<()> {
        writer.write_qname(&self.qname)?;
        writer.write_u16(self.qtype.to_u16())?;
        writer.write_u16(self.qclass.to_u16())?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod message_tests;
