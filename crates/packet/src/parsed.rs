use edgehook_abi::{DNS_MAX_PACKET_SIZE, ErrorKind, HookError, Result, ffi::NAME_BUF_LEN};
use edgehook_dns::{DnsMessage, DnsQuestion, DnsRecord, RawName};
use tracing::debug;

use crate::{PacketOps, RecordVisitor, Section, cursor::RecordCursor, write_name};

/// Host-owned message handed to hooks by mutable borrow.
///
/// Structural changes bump a generation counter; cursors remember the generation they were
/// created at and refuse to act once it moved.
#[derive(Debug, Clone)]
pub struct ParsedPacket {
    message: DnsMessage,
    generation: u64,
}

impl ParsedPacket {
    pub fn new(message: DnsMessage) -> Self {
        Self { message, generation: 0 }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let message = DnsMessage::decode(bytes).map_err(|e| HookError::from_codec(e, ErrorKind::Parse))?;
        Ok(Self::new(message))
    }

    pub fn message(&self) -> &DnsMessage {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut DnsMessage {
        self.generation += 1;
        &mut self.message
    }

    pub fn into_message(self) -> DnsMessage {
        self.message
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn bump_generation(&mut self) {
        self.generation += 1;
    }

    pub(crate) fn section(&self, section: Section) -> &[DnsRecord] {
        match section {
            Section::Answer => self.message.answers(),
            Section::Nameservers => self.message.authority_records(),
            Section::Additional => self.message.additional_records(),
            Section::Edns => &[],
        }
    }

    pub(crate) fn section_mut(&mut self, section: Section) -> Option<&mut Vec<DnsRecord>> {
        match section {
            Section::Answer => Some(self.message.answers_mut()),
            Section::Nameservers => Some(self.message.authority_records_mut()),
            Section::Additional => Some(self.message.additional_records_mut()),
            Section::Edns => None,
        }
    }

    pub(crate) fn raw_message_mut(&mut self) -> &mut DnsMessage {
        &mut self.message
    }

    fn section_len(&self, section: Section) -> usize {
        match section {
            Section::Edns => self.message.edns().map(|e| e.options.len()).unwrap_or(0),
            other => self.section(other).len(),
        }
    }
}

impl PacketOps for ParsedPacket {
    fn flags(&self) -> u32 {
        self.message.flag_word()
    }

    fn set_flags(&mut self, flags: u32) {
        self.message.set_flag_word(flags);
    }

    fn rcode(&self) -> u8 {
        self.message.rcode()
    }

    fn set_rcode(&mut self, rcode: u8) {
        self.message.set_rcode(rcode);
    }

    fn opcode(&self) -> u8 {
        self.message.opcode()
    }

    fn set_opcode(&mut self, opcode: u8) {
        self.message.set_opcode(opcode);
    }

    fn iter_section(&mut self, section: Section, visit: &mut RecordVisitor<'_>) {
        let mut index = 0;
        while index < self.section_len(section) {
            let generation = self.generation;
            let keep_going = visit(&mut RecordCursor::new(self, section, index, generation));
            // A delete removed the current record, so the next one now sits at `index`.
            if self.generation == generation {
                index += 1;
            }
            if !keep_going {
                debug!(%section, index, "iteration stopped by visitor");
                break;
            }
        }
    }

    fn add_to_question(&mut self, text: &str) -> Result<()> {
        let question: DnsQuestion = text.parse().map_err(|e| HookError::from_codec(e, ErrorKind::Parse))?;
        self.message.questions_mut().push(question);
        Ok(())
    }

    fn add_record(&mut self, section: Section, text: &str) -> Result<()> {
        let record: DnsRecord = text.parse().map_err(|e| HookError::from_codec(e, ErrorKind::Parse))?;
        let records = self
            .section_mut(section)
            .ok_or_else(|| HookError::protocol("records cannot be added to the EDNS section"))?;
        records.push(record);
        Ok(())
    }

    fn raw_packet(&self, buf: &mut [u8]) -> Result<usize> {
        let bytes = self
            .message
            .encode_with_max(DNS_MAX_PACKET_SIZE)
            .map_err(|e| HookError::from_codec(e, ErrorKind::ProtocolViolation))?;
        if bytes.len() > buf.len() {
            return Err(HookError::capacity(format!(
                "packet is {} bytes, buffer holds {}",
                bytes.len(),
                buf.len()
            )));
        }
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    fn question(&self, name: &mut [u8; NAME_BUF_LEN]) -> Result<(usize, u16)> {
        let question = self
            .message
            .questions()
            .first()
            .ok_or_else(|| HookError::not_found("packet has no question"))?;
        let len = write_name(&question.qname.to_fqdn(), name)?;
        Ok((len, question.qtype.to_u16()))
    }

    fn rename_with_raw_names(&mut self, target: &[u8], source: &[u8], match_suffix: bool) -> Result<()> {
        let target = RawName::from_wire(target).map_err(|e| HookError::from_codec(e, ErrorKind::Parse))?;
        let source = RawName::from_wire(source).map_err(|e| HookError::from_codec(e, ErrorKind::Parse))?;
        let renamed = self
            .message
            .rename(&target, &source, match_suffix)
            .map_err(|e| HookError::from_codec(e, ErrorKind::Parse))?;
        debug!(%source, %target, match_suffix, renamed, "names rewritten");
        Ok(())
    }

    fn raw_name_from_str(&self, name: &str, out: &mut [u8; NAME_BUF_LEN]) -> Result<usize> {
        crate::raw_name_from_str(name, out)
    }
}

#[cfg(test)]
#[path = "parsed_tests.rs"]
mod parsed_tests;
