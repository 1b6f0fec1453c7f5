use anyhow::ensure;

use crate::{
    reader::{DnsMessageReader, DnsReadable},
    u16_enum_with_unknown,
    writer::{DnsMessageWriter, DnsWritable},
};

/// Represents EDNS (Extension Mechanisms for DNS) information in a DNS message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edns {
    /// Max UDP payload size sender can handle
    pub udp_payload_size: u16,
    /// High bits of RCODE (ttl[31:24])
    pub(crate) extended_rcode: u8,
    /// EDNS version - must be 0.
    pub version: u8,
    /// Extended flags (DO is the top bit)
    pub flags: u16,
    /// Edns options, in wire order
    pub options: Vec<EdnsOption>,
}

impl Default for Edns {
    fn default() -> Self {
        Self {
            udp_payload_size: 4096,
            extended_rcode: 0,
            version: 0,
            flags: 0,
            options: vec![],
        }
    }
}

impl Edns {
    const DO_BIT: u16 = 0x8000;

    // Get the do bit
    pub fn do_bit(&self) -> bool {
        self.flags & Self::DO_BIT != 0
    }

    // Set the do bit
    pub fn set_do_bit(&mut self, v: bool) {
        if v {
            self.flags |= Self::DO_BIT;
        } else {
            self.flags &= !Self::DO_BIT
        }
    }

    /// The OPT record's TTL field: ext_rcode | version | flags.
    pub fn packed_ttl(&self) -> u32 {
        ((self.extended_rcode as u32) << 24) | ((self.version as u32) << 16) | self.flags as u32
    }

    pub fn set_packed_ttl(&mut self, ttl: u32) {
        self.extended_rcode = (ttl >> 24) as u8;
        self.version = (ttl >> 16) as u8;
        self.flags = ttl as u16;
    }
}

/// Reads everything after the OPT owner name and type.
impl DnsReadable for Edns {
    fn read_from(reader: &mut DnsMessageReader) -> anyhow::Result<Self> {
        let udp_payload_size = reader.read_u16()?;

        let mut edns = Edns {
            udp_payload_size,
            ..Default::default()
        };
        edns.set_packed_ttl(reader.read_u32()?);

        // RDLEN + options;
        let rdlen = reader.read_u16()? as usize;
        let opts_end = reader.position() + rdlen;

        while reader.position() < opts_end {
            edns.options.push(EdnsOption::read_from(reader)?);
        }
        ensure!(
            reader.position() == opts_end,
            "EDNS options overrun OPT rdata: end={} pos={}",
            opts_end,
            reader.position()
        );
        Ok(edns)
    }
}

/// Writes the complete OPT pseudo-record.
impl DnsWritable for Edns {
    fn write_to(&self, writer: &mut DnsMessageWriter) -> anyhow::Result<()> {
        writer.write_u8(0)?; // root owner name
        writer.write_u16(crate::RecordType::OPT.to_u16())?;
        writer.write_u16(self.udp_payload_size)?;
        writer.write_u32(self.packed_ttl())?;

        let rdlen_pos = writer.position();
        writer.write_u16(0)?;
        let before = writer.position();
        for option in &self.options {
            option.write_to(writer)?;
        }
        let rdlen = writer.position() - before;
        ensure!(rdlen <= u16::MAX as usize, "EDNS options too long: {} bytes", rdlen);
        writer.overwrite_bytes(rdlen_pos, &(rdlen as u16).to_be_bytes())?;
        Ok(())
    }
}

u16_enum_with_unknown! {
    /// EDNS Option codes
    ///
    /// Based on: https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-11
    pub enum EdnsOptionCode("OPT") {
        /// Apple's DNS Long-Lived Queries Protocol (RFC 8764)
        LLQ = 1,
        /// Update Lease (RFC 9664)
        UpdateLease = 2,
        /// DNS Name Server Identifier (NSID) Option
        NSID = 3,
        /// Client Subnet in DNS Queries (RFC 7871)
        ClientSubnet = 8,
        /// EDNS expire (RFC 7314)
        Expire = 9,
        /// EDNS Cookie (RFC 7873)
        Cookie = 10,
        /// EDNS TCP Keep Alive (RFC 7828)
        TcpKeepAlive = 11,
        /// EDNS Padding (7830)
        Padding = 12,
        /// Extended DNS error (RFC 8914)
        ExtendedDnsError = 15,
    }
}

/// EDNS option. The payload is kept as received and only interpreted on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdnsOption {
    pub code: EdnsOptionCode,
    pub data: Vec<u8>,
}

impl EdnsOption {
    pub fn new(code: EdnsOptionCode, data: Vec<u8>) -> Self {
        Self { code, data }
    }

    /// Interpret the payload.
    pub fn parsed(&self) -> anyhow::Result<EdnsOptionData> {
        let len = self.data.len();
        let mut reader = DnsMessageReader::new(&self.data);

        let data = match self.code {
            EdnsOptionCode::ClientSubnet => {
                ensure!(len >= 4, "ECS option too short (must be at least 4 bytes)");
                let family = reader.read_u16()?;
                let source_prefix = reader.read_u8()?;
                let scope_prefix = reader.read_u8()?;
                let address_size = (source_prefix as usize).div_ceil(8);
                let address = reader.read_bytes(address_size)?.to_vec();
                EdnsOptionData::ClientSubnet {
                    family,
                    source_prefix,
                    scope_prefix,
                    address,
                }
            }
            EdnsOptionCode::TcpKeepAlive => {
                ensure!(len == 0 || len == 2, "invalid TCP Keepalive option length: {}", len);
                let timeout = if len == 2 { Some(reader.read_u16()?) } else { None };
                EdnsOptionData::Timeout(timeout)
            }
            EdnsOptionCode::Padding => EdnsOptionData::Padding(len as u16),
            EdnsOptionCode::ExtendedDnsError => {
                ensure!(len >= 2, "extended dns error length too short");
                let info_code = reader.read_u16()?;
                let rest = reader.read_bytes(len - 2)?;
                let extra_text = (!rest.is_empty()).then(|| String::from_utf8_lossy(rest).into_owned());
                EdnsOptionData::ExtendedError { info_code, extra_text }
            }
            _ => EdnsOptionData::Raw(self.data.clone()),
        };

        ensure!(reader.remaining() == 0, "trailing bytes in EDNS option {}", self.code);
        Ok(data)
    }
}

impl DnsReadable for EdnsOption {
    fn read_from(reader: &mut DnsMessageReader) -> anyhow::Result<Self> {
        let code = EdnsOptionCode::from(reader.read_u16()?);
        let len = reader.read_u16()? as usize;
        let data = reader.read_bytes(len)?.to_vec();
        Ok(Self { code, data })
    }
}

impl DnsWritable for EdnsOption {
    fn write_to(&self, writer: &mut DnsMessageWriter) -> anyhow::Result<()> {
        ensure!(self.data.len() <= u16::MAX as usize, "EDNS option too long");
        writer.write_u16(self.code.to_u16())?;
        writer.write_u16(self.data.len() as u16)?;
        writer.write_bytes(&self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdnsOptionData {
    /// Client Subnet
    ClientSubnet {
        family: u16,
        source_prefix: u8,
        scope_prefix: u8,
        address: Vec<u8>,
    },

    // Timeout in units of 100ms.
    Timeout(Option<u16>),

    // Padding
    Padding(u16),

    // Extended Dns Error (RFC 8914 info code)
    ExtendedError { info_code: u16, extra_text: Option<String> },

    // Raw data
    Raw(Vec<u8>),
}
