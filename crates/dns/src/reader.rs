use anyhow::{bail, ensure};

use crate::{DNS_MAX_HOSTNAME_LEN, domain_name::DomainName, raw_name::RawName};

/// Upper bound on compression pointers followed for one name.
const MAX_POINTER_HOPS: usize = 64;

/// A reader for DNS messages that allows reading various components
pub struct DnsMessageReader<'a> {
    /// Internal buffer containing the DNS message.
    buffer: &'a [u8],
    /// Position in bytes.
    position: usize,
}

impl<'a> DnsMessageReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Seek to a position inside the buffer.
    pub fn seek(&mut self, pos: usize) -> anyhow::Result<()> {
        let len = self.buffer.len();
        ensure!(pos <= len, "seek out of bounds: pos={} len={}", pos, len);
        self.position = pos;
        Ok(())
    }

    #[inline]
    fn need(&self, need: usize, what: &str) -> anyhow::Result<()> {
        let rem = self.remaining();
        ensure!(
            need <= rem,
            "buffer underflow at pos {} while reading {}: need {} bytes, have {}",
            self.position,
            what,
            need,
            rem
        );
        Ok(())
    }

    /// Read a single byte from the DNS message.
    pub fn read_u8(&mut self) -> anyhow::Result<u8> {
        self.need(1, "u8")?;
        let byte = self.buffer[self.position];
        self.position += 1;
        Ok(byte)
    }

    /// Read a u16 from the DNS message.
    pub fn read_u16(&mut self) -> anyhow::Result<u16> {
        self.need(2, "u16")?;
        let bytes = &self.buffer[self.position..self.position + 2];
        self.position += 2;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Read a u32 from the DNS message.
    pub fn read_u32(&mut self) -> anyhow::Result<u32> {
        self.need(4, "u32")?;
        let data = &self.buffer[self.position..self.position + 4];
        self.position += 4;
        Ok(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
    }

    /// Read a possibly compressed name and return it in uncompressed wire form.
    ///
    /// The reader ends up right after the name as it appears in the message, i.e. after the
    /// first compression pointer if there is one.
    pub fn read_raw_name(&mut self) -> anyhow::Result<RawName> {
        let mut pos = self.position;
        let mut resume_at: Option<usize> = None;
        let mut hops = 0;
        let mut out: Vec<u8> = Vec::with_capacity(32);

        loop {
            let Some(&length) = self.buffer.get(pos) else {
                bail!("qname out of bounds at pos {} (buf len {})", pos, self.buffer.len());
            };

            match length & 0xC0 {
                0xC0 => {
                    ensure!(pos + 1 < self.buffer.len(), "truncated compression pointer at pos {}", pos);
                    let offset = (((length as usize) & 0x3F) << 8) | self.buffer[pos + 1] as usize;

                    // Pointers must go backwards, which also rules out loops.
                    ensure!(
                        offset < pos,
                        "compression pointer at pos {} does not point backwards (offset {})",
                        pos,
                        offset
                    );
                    hops += 1;
                    ensure!(hops <= MAX_POINTER_HOPS, "too many compression pointers in name");

                    resume_at.get_or_insert(pos + 2);
                    pos = offset;
                }
                0x00 if length == 0 => {
                    out.push(0);
                    self.position = resume_at.unwrap_or(pos + 1);
                    break;
                }
                0x00 => {
                    let label_len = length as usize;
                    ensure!(
                        pos + 1 + label_len <= self.buffer.len(),
                        "label overruns buffer at pos {}: need {} bytes, have {}",
                        pos + 1,
                        label_len,
                        self.buffer.len().saturating_sub(pos + 1)
                    );
                    out.extend_from_slice(&self.buffer[pos..pos + 1 + label_len]);
                    ensure!(
                        out.len() < DNS_MAX_HOSTNAME_LEN,
                        "decompressed name exceeds {} bytes",
                        DNS_MAX_HOSTNAME_LEN
                    );
                    pos += 1 + label_len;
                }
                other => bail!("unsupported label type 0x{:02x} at pos {}", other, pos),
            }
        }

        RawName::from_wire(&out)
    }

    /// Read a DNS name (qname) from the message.
    pub fn read_qname(&mut self) -> anyhow::Result<DomainName> {
        let raw = self.read_raw_name()?;
        DomainName::from_raw(&raw)
    }

    /// Read an uncompressed dns name from the next `len` bytes.
    ///
    /// This function is mainly intended for EDNS where compression is forbidden.
    pub fn read_qname_uncompressed(&mut self, len: usize) -> anyhow::Result<DomainName> {
        ensure!(len > 0, "read_qname_uncompressed called with len = 0");
        self.need(len, "uncompressed qname")?;

        let bytes = &self.buffer[self.position..self.position + len];
        let raw = RawName::from_wire(bytes)?;
        self.position += len;

        DomainName::from_raw(&raw)
    }

    /// Read a specified number of bytes from the DNS message.
    pub fn read_bytes(&mut self, length: usize) -> anyhow::Result<&'a [u8]> {
        self.need(length, "raw bytes")?;
        let data = &self.buffer[self.position..self.position + length];
        self.position += length;
        Ok(data)
    }

    #[inline]
    /// Current reading position in the buffer.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Return the number of unread bytes remaining in the reader's buffer.
    ///
    /// # Examples
    ///
    /// ```
    /// use edgehook_dns::reader::DnsMessageReader;
    /// let buf = [0u8, 1, 2];
    /// let mut r = DnsMessageReader::new(&buf);
    /// assert_eq!(r.remaining(), 3);
    /// r.seek(1).unwrap();
    /// assert_eq!(r.remaining(), 2);
    /// ```
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }
}

/// Trait for types that can be directly parsed from a DNS message.
pub trait DnsReadable: Sized {
    fn read_from(reader: &mut DnsMessageReader) -> anyhow::Result<Self>;
}

#[cfg(test)]
mod tests {
    use super::DnsMessageReader;
    use crate::{DnsMessageWriter, domain_name::DomainName};

    #[test]
    fn test_read_qname_uncompressed() {
        let dname = DomainName::from_user("mail.google.com").unwrap();
        let mut writer = DnsMessageWriter::new();
        writer.write_qname_uncompressed(&dname).unwrap();

        let bytes = writer.into_bytes();
        let mut reader = DnsMessageReader::new(&bytes);
        let decoded = reader.read_qname_uncompressed(bytes.len()).unwrap();

        assert_eq!(dname, decoded);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_read_integers() {
        let data = [42u8, 0x12, 0x34, 0x12, 0x34, 0x56, 0x78];
        let mut reader = DnsMessageReader::new(&data);

        assert_eq!(reader.read_u8().unwrap(), 42);
        assert_eq!(reader.read_u16().unwrap(), 0x1234);
        assert_eq!(reader.read_u32().unwrap(), 0x12345678);
        assert!(reader.read_u8().is_err());
    }

    #[test]
    fn test_buffer_underflow_keeps_position() {
        let data = [1, 2];
        let mut reader = DnsMessageReader::new(&data);

        assert!(reader.read_u32().is_err());
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.read_u16().unwrap(), 0x0102);
    }

    #[test]
    fn test_read_bytes_and_seek() {
        let data = [1, 2, 3, 4, 5];
        let mut reader = DnsMessageReader::new(&data);

        assert_eq!(reader.read_bytes(3).unwrap(), &[1, 2, 3]);
        assert_eq!(reader.position(), 3);
        assert!(reader.read_bytes(3).is_err());

        reader.seek(0).unwrap();
        assert_eq!(reader.read_u8().unwrap(), 1);
        reader.seek(5).unwrap();
        assert_eq!(reader.remaining(), 0);
        assert!(reader.seek(6).is_err());
    }

    #[test]
    fn test_read_qname_simple() {
        let data = vec![7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3, b'c', b'o', b'm', 0];
        let mut reader = DnsMessageReader::new(&data);

        let name = reader.read_qname().unwrap();
        assert_eq!(name.as_str(), "example.com");
        assert_eq!(reader.position(), data.len());
    }

    #[test]
    fn test_read_qname_root() {
        let data = vec![0];
        let mut reader = DnsMessageReader::new(&data);
        assert_eq!(reader.read_qname().unwrap(), DomainName::root());
    }

    #[test]
    fn test_read_qname_with_compression() {
        // "example.com" at offset 0, then "www" + pointer to offset 0, then a trailing byte.
        let mut data = vec![7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3, b'c', b'o', b'm', 0];
        data.extend_from_slice(&[3, b'w', b'w', b'w', 0xC0, 0x00, 0xAB]);

        let mut reader = DnsMessageReader::new(&data);
        assert_eq!(reader.read_qname().unwrap().as_str(), "example.com");

        let raw = reader.read_raw_name().unwrap();
        assert_eq!(raw.to_text(), "www.example.com.");
        assert_eq!(reader.read_u8().unwrap(), 0xAB);
    }

    #[test]
    fn test_read_qname_pointer_loops_rejected() {
        // Points to itself.
        let data = vec![0xC0, 0x00];
        assert!(DnsMessageReader::new(&data).read_qname().is_err());

        // Points forward.
        let data = vec![0xC0, 0x02, 0x00];
        assert!(DnsMessageReader::new(&data).read_qname().is_err());
    }

    #[test]
    fn test_read_qname_out_of_bounds() {
        let data = vec![10, b'a', b'b', b'c'];
        assert!(DnsMessageReader::new(&data).read_qname().is_err());

        let data = vec![0xC0];
        assert!(DnsMessageReader::new(&data).read_qname().is_err());
    }

    #[test]
    fn test_read_qname_uncompressed_rejects_pointers_and_extra_bytes() {
        let data = vec![0xC0, 0x00, 0x00];
        assert!(DnsMessageReader::new(&data).read_qname_uncompressed(3).is_err());

        let data = vec![3, b'c', b'o', b'm'];
        assert!(DnsMessageReader::new(&data).read_qname_uncompressed(4).is_err());

        let data = vec![3, b'c', b'o', b'm', 0, 99];
        assert!(DnsMessageReader::new(&data).read_qname_uncompressed(6).is_err());
    }

    #[test]
    fn test_multiple_labels_in_qname() {
        #[rustfmt::skip]
        let data = vec![
            4, b'm', b'a', b'i', b'l',
            7, b'e', b'x', b'a', b'm', b'p', b'l', b'e',
            3, b'c', b'o', b'm',
            0,
        ];
        let mut reader = DnsMessageReader::new(&data);
        assert_eq!(reader.read_qname().unwrap().as_str(), "mail.example.com");
    }
}
