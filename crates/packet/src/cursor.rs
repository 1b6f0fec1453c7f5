use std::net::{Ipv4Addr, Ipv6Addr};

use edgehook_abi::{ErrorKind, HookError, Result, ffi::NAME_BUF_LEN};
use edgehook_dns::{DnsRecord, DnsRecordData, DomainName, EdnsOption, RawName, RecordType};
use tracing::debug;

use crate::{ParsedPacket, RecordOps, Section, write_name};

/// Handle on one record of a [`ParsedPacket`]: a section, an index, and the generation the
/// index was taken at.
pub(crate) struct RecordCursor<'a> {
    packet: &'a mut ParsedPacket,
    section: Section,
    index: usize,
    generation: u64,
}

impl<'a> RecordCursor<'a> {
    pub(crate) fn new(packet: &'a mut ParsedPacket, section: Section, index: usize, generation: u64) -> Self {
        Self {
            packet,
            section,
            index,
            generation,
        }
    }

    fn check(&self) -> Result<()> {
        if self.packet.generation() != self.generation {
            debug!(section = %self.section, index = self.index, "stale cursor rejected");
            return Err(HookError::protocol("cursor used after its record was deleted"));
        }
        Ok(())
    }

    fn is_edns(&self) -> bool {
        self.section == Section::Edns
    }

    fn record(&self) -> Result<&DnsRecord> {
        self.check()?;
        self.packet
            .section(self.section)
            .get(self.index)
            .ok_or_else(|| HookError::protocol(format!("no record at {} #{}", self.section, self.index)))
    }

    fn record_mut(&mut self) -> Result<&mut DnsRecord> {
        self.check()?;
        let (section, index) = (self.section, self.index);
        self.packet
            .section_mut(section)
            .and_then(|records| records.get_mut(index))
            .ok_or_else(|| HookError::protocol(format!("no record at {} #{}", section, index)))
    }

    fn option(&self) -> Result<&EdnsOption> {
        self.check()?;
        self.packet
            .message()
            .edns()
            .and_then(|edns| edns.options.get(self.index))
            .ok_or_else(|| HookError::protocol(format!("no EDNS option #{}", self.index)))
    }

    fn edns_lacks(&self, what: &str) -> HookError {
        HookError::protocol(format!("EDNS options have no {}", what))
    }

    fn replace_name(&mut self, raw: RawName) -> Result<()> {
        let name = DomainName::from_raw(&raw).map_err(|e| HookError::from_codec(e, ErrorKind::Parse))?;
        self.record_mut()?.name = name;
        Ok(())
    }
}

impl RecordOps for RecordCursor<'_> {
    fn name(&self, buf: &mut [u8; NAME_BUF_LEN]) -> Result<usize> {
        if self.is_edns() {
            self.option()?;
            return write_name(".", buf);
        }
        write_name(&self.record()?.name.to_fqdn(), buf)
    }

    fn rr_type(&self) -> Result<u16> {
        if self.is_edns() {
            return Ok(self.option()?.code.to_u16());
        }
        Ok(self.record()?.record_type.to_u16())
    }

    fn rr_class(&self) -> Result<u16> {
        if self.is_edns() {
            self.option()?;
            return Ok(self.packet.message().edns().map(|e| e.udp_payload_size).unwrap_or_default());
        }
        Ok(self.record()?.class.to_u16())
    }

    fn rr_ttl(&self) -> Result<u32> {
        if self.is_edns() {
            self.option()?;
            return Ok(self.packet.message().edns().map(|e| e.packed_ttl()).unwrap_or_default());
        }
        Ok(self.record()?.ttl)
    }

    fn set_rr_ttl(&mut self, ttl: u32) -> Result<()> {
        if self.is_edns() {
            self.option()?;
            if let Some(edns) = self.packet.raw_message_mut().edns_mut() {
                edns.set_packed_ttl(ttl);
            }
            return Ok(());
        }
        self.record_mut()?.ttl = ttl;
        Ok(())
    }

    fn rr_ip(&self, buf: &mut [u8]) -> Result<usize> {
        if self.is_edns() {
            self.option()?;
            return Err(self.edns_lacks("address"));
        }
        let record = self.record()?;
        let octets = record
            .data
            .ip_octets()
            .ok_or_else(|| HookError::protocol(format!("{} record has no address", record.record_type)))?;
        if octets.len() > buf.len() {
            return Err(HookError::capacity(format!(
                "address is {} bytes, buffer holds {}",
                octets.len(),
                buf.len()
            )));
        }
        buf[..octets.len()].copy_from_slice(&octets);
        Ok(octets.len())
    }

    fn set_rr_ip(&mut self, ip: &[u8]) -> Result<()> {
        if self.is_edns() {
            self.option()?;
            return Err(self.edns_lacks("address"));
        }
        let record = self.record_mut()?;
        record.data = match (&record.data, ip.len()) {
            (DnsRecordData::Ipv4(_), 4) => DnsRecordData::Ipv4(Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3])),
            (DnsRecordData::Ipv6(_), 16) => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(ip);
                DnsRecordData::Ipv6(Ipv6Addr::from(octets))
            }
            (DnsRecordData::Ipv4(_) | DnsRecordData::Ipv6(_), len) => {
                let want = if record.record_type == RecordType::A { 4 } else { 16 };
                return Err(HookError::parse(format!(
                    "{} record needs a {}-byte address, got {}",
                    record.record_type, want, len
                )));
            }
            _ => {
                return Err(HookError::protocol(format!(
                    "{} record has no address",
                    record.record_type
                )));
            }
        };
        Ok(())
    }

    fn set_raw_name(&mut self, raw_name: &[u8]) -> Result<()> {
        if self.is_edns() {
            self.option()?;
            return Err(self.edns_lacks("owner name"));
        }
        self.check()?;
        let raw = RawName::from_wire(raw_name).map_err(|e| HookError::from_codec(e, ErrorKind::Parse))?;
        self.replace_name(raw)
    }

    fn set_name(&mut self, name: &str, default_zone_raw: &[u8]) -> Result<()> {
        if self.is_edns() {
            self.option()?;
            return Err(self.edns_lacks("owner name"));
        }
        self.check()?;

        let codec = |e| HookError::from_codec(e, ErrorKind::Parse);
        let raw = if name.ends_with('.') {
            RawName::from_str_name(name).map_err(codec)?
        } else {
            if default_zone_raw.is_empty() {
                return Err(HookError::parse(format!(
                    "relative name '{}' needs a default zone",
                    name
                )));
            }
            let zone = RawName::from_wire(default_zone_raw).map_err(codec)?;
            RawName::from_str_name(name).map_err(codec)?.join(&zone).map_err(codec)?
        };
        self.replace_name(raw)
    }

    fn delete(&mut self) -> Result<()> {
        self.check()?;
        let (section, index) = (self.section, self.index);
        if section == Section::Edns {
            let removed = self
                .packet
                .raw_message_mut()
                .edns_mut()
                .filter(|edns| index < edns.options.len())
                .map(|edns| edns.options.remove(index));
            if removed.is_none() {
                return Err(HookError::protocol(format!("no EDNS option #{}", index)));
            }
        } else {
            let records = self
                .packet
                .section_mut(section)
                .filter(|records| index < records.len())
                .ok_or_else(|| HookError::protocol(format!("no record at {} #{}", section, index)))?;
            records.remove(index);
        }
        self.packet.bump_generation();
        debug!(%section, index, "record deleted");
        Ok(())
    }
}
