//! Read/mutate view over one DNS message, as handed to hooks.

mod cursor;
mod parsed;

use std::fmt::{Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use edgehook_abi::{DNS_MAX_PACKET_SIZE, ErrorKind, HookError, Result, ffi::NAME_BUF_LEN};
use edgehook_dns::RawName;

pub use parsed::ParsedPacket;

/// Record sections a hook can walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Answer,
    Nameservers,
    Additional,
    /// EDNS options, exposed as pseudo-records.
    Edns,
}

impl Display for Section {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Section::Answer => "answer",
            Section::Nameservers => "nameservers",
            Section::Additional => "additional",
            Section::Edns => "edns",
        })
    }
}

/// Visitor handed to the section iterators. Returning `false` stops the walk.
pub type RecordVisitor<'v> = dyn FnMut(&mut dyn RecordOps) -> bool + 'v;

/// Operations on the record under an iteration cursor.
///
/// A cursor is only valid inside the visitor call that received it, and becomes stale once
/// its record is deleted; further use fails with `ProtocolViolation`.
///
/// For EDNS options the type is the option code, the class the advertised UDP payload size,
/// and the TTL the OPT record's packed extended-rcode/version/flags word.
pub trait RecordOps {
    /// Write the owner name as NUL-terminated text with a trailing dot, returning its length.
    fn name(&self, buf: &mut [u8; NAME_BUF_LEN]) -> Result<usize>;
    fn rr_type(&self) -> Result<u16>;
    fn rr_class(&self) -> Result<u16>;
    fn rr_ttl(&self) -> Result<u32>;
    fn set_rr_ttl(&mut self, ttl: u32) -> Result<()>;

    /// Copy the 4 or 16 address bytes into `buf`, returning how many were written.
    fn rr_ip(&self, buf: &mut [u8]) -> Result<usize>;

    /// Replace the address. The length must match the record type.
    fn set_rr_ip(&mut self, ip: &[u8]) -> Result<()>;

    /// Replace the owner name with an uncompressed wire-form name.
    fn set_raw_name(&mut self, raw_name: &[u8]) -> Result<()>;

    /// Replace the owner name from text. Names without a trailing dot are relative to
    /// `default_zone_raw`, which must then be a non-empty wire-form name.
    fn set_name(&mut self, name: &str, default_zone_raw: &[u8]) -> Result<()>;

    /// Remove the record. The cursor is stale afterwards.
    fn delete(&mut self) -> Result<()>;

    fn name_string(&self) -> Result<String> {
        let mut buf = [0u8; NAME_BUF_LEN];
        let len = self.name(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
    }

    fn ip_addr(&self) -> Result<IpAddr> {
        let mut buf = [0u8; 16];
        match self.rr_ip(&mut buf)? {
            4 => Ok(IpAddr::V4(Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]))),
            16 => Ok(IpAddr::V6(Ipv6Addr::from(buf))),
            len => Err(HookError::protocol(format!("unexpected address length {}", len))),
        }
    }
}

/// Operations a hook can perform on the packet it was given.
pub trait PacketOps {
    /// Header flag bits in the low half, EDNS extended flags in the high half.
    fn flags(&self) -> u32;
    fn set_flags(&mut self, flags: u32);
    fn rcode(&self) -> u8;
    fn set_rcode(&mut self, rcode: u8);
    fn opcode(&self) -> u8;
    fn set_opcode(&mut self, opcode: u8);

    /// Walk a section in wire order.
    ///
    /// The visitor may modify or delete the current record; a deleted record is not counted
    /// and the walk continues with the record that followed it.
    fn iter_section(&mut self, section: Section, visit: &mut RecordVisitor<'_>);

    /// Parse `<name> [class] <type>` and append it to the question section.
    fn add_to_question(&mut self, text: &str) -> Result<()>;

    /// Parse a textual record and append it to `section`.
    fn add_record(&mut self, section: Section, text: &str) -> Result<()>;

    /// Serialize into `buf`, returning the length. Never writes a truncated packet.
    fn raw_packet(&self, buf: &mut [u8]) -> Result<usize>;

    /// Write the first question's name like [`RecordOps::name`], returning its length and type.
    fn question(&self, name: &mut [u8; NAME_BUF_LEN]) -> Result<(usize, u16)>;

    /// Rewrite `source` into `target` across the packet. Both are wire-form names.
    fn rename_with_raw_names(&mut self, target: &[u8], source: &[u8], match_suffix: bool) -> Result<()>;

    /// Encode a textual name into wire form, returning the length.
    fn raw_name_from_str(&self, name: &str, out: &mut [u8; NAME_BUF_LEN]) -> Result<usize>;

    fn iter_answer(&mut self, visit: &mut RecordVisitor<'_>) {
        self.iter_section(Section::Answer, visit)
    }

    fn iter_nameservers(&mut self, visit: &mut RecordVisitor<'_>) {
        self.iter_section(Section::Nameservers, visit)
    }

    fn iter_additional(&mut self, visit: &mut RecordVisitor<'_>) {
        self.iter_section(Section::Additional, visit)
    }

    fn iter_edns(&mut self, visit: &mut RecordVisitor<'_>) {
        self.iter_section(Section::Edns, visit)
    }

    fn add_to_answer(&mut self, text: &str) -> Result<()> {
        self.add_record(Section::Answer, text)
    }

    fn add_to_nameservers(&mut self, text: &str) -> Result<()> {
        self.add_record(Section::Nameservers, text)
    }

    fn add_to_additional(&mut self, text: &str) -> Result<()> {
        self.add_record(Section::Additional, text)
    }

    fn question_name(&self) -> Result<(String, u16)> {
        let mut buf = [0u8; NAME_BUF_LEN];
        let (len, rr_type) = self.question(&mut buf)?;
        Ok((String::from_utf8_lossy(&buf[..len]).into_owned(), rr_type))
    }

    fn to_wire(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; DNS_MAX_PACKET_SIZE];
        let len = self.raw_packet(&mut buf)?;
        buf.truncate(len);
        Ok(buf)
    }

    /// Rename using textual names.
    fn rename(&mut self, target: &str, source: &str, match_suffix: bool) -> Result<()> {
        let mut target_raw = [0u8; NAME_BUF_LEN];
        let target_len = self.raw_name_from_str(target, &mut target_raw)?;
        let mut source_raw = [0u8; NAME_BUF_LEN];
        let source_len = self.raw_name_from_str(source, &mut source_raw)?;
        self.rename_with_raw_names(&target_raw[..target_len], &source_raw[..source_len], match_suffix)
    }
}

/// Encode `name` into `out` as an uncompressed wire-form name.
pub fn raw_name_from_str(name: &str, out: &mut [u8; NAME_BUF_LEN]) -> Result<usize> {
    let raw = RawName::from_str_name(name).map_err(|e| HookError::from_codec(e, ErrorKind::Parse))?;
    let bytes = raw.as_bytes();
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(bytes.len())
}

/// Copy `text` into a name buffer and NUL-terminate it.
pub(crate) fn write_name(text: &str, buf: &mut [u8; NAME_BUF_LEN]) -> Result<usize> {
    let bytes = text.as_bytes();
    if bytes.len() >= NAME_BUF_LEN {
        return Err(HookError::capacity(format!(
            "name is {} bytes, at most {} fit",
            bytes.len(),
            NAME_BUF_LEN - 1
        )));
    }
    buf[..bytes.len()].copy_from_slice(bytes);
    buf[bytes.len()] = 0;
    Ok(bytes.len())
}
