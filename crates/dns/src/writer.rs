use std::collections::HashMap;

use anyhow::ensure;
use bytes::{BufMut, Bytes, BytesMut};

use crate::{DNS_MAX_HOSTNAME_LEN, DNS_MAX_PACKET_SIZE, error::CapacityError};

/// Compression pointers can only address the first 16 KiB of a message.
const MAX_POINTER_OFFSET: usize = 0x3FFF;

pub struct DnsMessageWriter {
    buf: BytesMut,
    max_len: usize,
    /// Lowercased name suffix -> offset of its first occurrence.
    suffixes: HashMap<String, u16>,
}

impl DnsMessageWriter {
    /// Create a new DNS message writer with a custom maximum length.
    pub fn new_with_max(max_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(max_len.min(512)), // 512 is min dns message payload size.
            max_len,
            suffixes: HashMap::new(),
        }
    }

    /// Create a new DNS message writer bounded by the maximum packet size.
    pub fn new() -> Self {
        Self::new_with_max(DNS_MAX_PACKET_SIZE)
    }

    #[inline]
    fn ensure_space(&mut self, need: usize, what: &'static str) -> anyhow::Result<()> {
        let cur = self.buf.len();
        let new_len = cur
            .checked_add(need)
            .ok_or_else(|| anyhow::anyhow!("length overflow"))?;
        if new_len > self.max_len {
            return Err(CapacityError::BufferOverflow {
                what,
                need,
                current: cur,
                max: self.max_len,
            }
            .into());
        }
        if new_len > self.buf.capacity() {
            // grow but never beyond max_len
            self.buf.reserve(new_len - self.buf.len());
        }
        Ok(())
    }

    /// Write a u8 to the buffer.
    pub fn write_u8(&mut self, value: u8) -> anyhow::Result<()> {
        self.ensure_space(1, "u8")?;
        self.buf.put_u8(value);
        Ok(())
    }

    /// Write a u16 to the buffer.
    pub fn write_u16(&mut self, value: u16) -> anyhow::Result<()> {
        self.ensure_space(2, "u16")?;
        self.buf.put_u16(value);
        Ok(())
    }

    /// Write a u32 to the buffer.
    pub fn write_u32(&mut self, value: u32) -> anyhow::Result<()> {
        self.ensure_space(4, "u32")?;
        self.buf.put_u32(value);
        Ok(())
    }

    /// Split a textual name into labels and check the RFC 1035 limits.
    fn labels(qname: &str) -> anyhow::Result<Vec<&str>> {
        if qname == "." || qname.is_empty() {
            return Ok(Vec::new());
        }
        let labels: Vec<&str> = qname.trim_end_matches('.').split('.').collect();
        let mut total = 1; // for the final zero
        for label in &labels {
            ensure!(!label.is_empty(), "empty label in qname '{}'", qname);
            ensure!(label.len() <= 63, "label '{}' exceeds 63 bytes", label);
            total += 1 + label.len();
        }
        if total > DNS_MAX_HOSTNAME_LEN {
            return Err(CapacityError::NameTooLong {
                len: total,
                max: DNS_MAX_HOSTNAME_LEN,
            }
            .into());
        }
        Ok(labels)
    }

    /// Write a qname, pointing at a previously written suffix where possible.
    pub fn write_qname(&mut self, qname: &str) -> anyhow::Result<()> {
        let labels = Self::labels(qname)?;

        let lowered: Vec<String> = labels.iter().map(|l| l.to_ascii_lowercase()).collect();
        let suffix_key = |i: usize| lowered[i..].join(".");

        // Find the longest suffix already present in the message.
        let mut split = labels.len();
        let mut pointer = None;
        for i in 0..labels.len() {
            if let Some(&offset) = self.suffixes.get(&suffix_key(i)) {
                split = i;
                pointer = Some(offset);
                break;
            }
        }

        let need: usize = labels[..split].iter().map(|l| 1 + l.len()).sum::<usize>()
            + if pointer.is_some() { 2 } else { 1 };
        self.ensure_space(need, "qname")?;

        for (i, label) in labels[..split].iter().enumerate() {
            let pos = self.buf.len();
            if pos <= MAX_POINTER_OFFSET {
                self.suffixes.entry(suffix_key(i)).or_insert(pos as u16);
            }
            self.buf.put_u8(label.len() as u8);
            self.buf.extend_from_slice(label.as_bytes());
        }

        match pointer {
            Some(offset) => self.buf.put_u16(0xC000 | offset),
            None => self.buf.put_u8(0), // terminator
        }
        Ok(())
    }

    /// Write a qname without compression and without making it a compression target.
    pub fn write_qname_uncompressed(&mut self, qname: &str) -> anyhow::Result<()> {
        let labels = Self::labels(qname)?;
        let need: usize = labels.iter().map(|l| 1 + l.len()).sum::<usize>() + 1;
        self.ensure_space(need, "qname")?;
        for label in labels {
            self.buf.put_u8(label.len() as u8);
            self.buf.extend_from_slice(label.as_bytes());
        }
        self.buf.put_u8(0);
        Ok(())
    }

    /// Write raw bytes to the buffer.
    pub fn write_bytes(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.ensure_space(data.len(), "raw bytes")?;
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Overwrite already written bytes, e.g. a length placeholder.
    pub fn overwrite_bytes(&mut self, pos: usize, data: &[u8]) -> anyhow::Result<()> {
        let end = pos
            .checked_add(data.len())
            .ok_or_else(|| anyhow::anyhow!("length overflow"))?;
        ensure!(
            end <= self.buf.len(),
            "overwrite out of bounds: pos={} len={} written={}",
            pos,
            data.len(),
            self.buf.len()
        );
        self.buf[pos..end].copy_from_slice(data);
        Ok(())
    }

    /// Get the underlying buffer.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    /// Number of bytes written so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.buf.len()
    }
}

impl Default for DnsMessageWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Trait for types that can be written to a DNS message.
pub trait DnsWritable {
    fn write_to(&self, writer: &mut DnsMessageWriter) -> anyhow::Result<()>;
}
