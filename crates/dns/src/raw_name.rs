use std::fmt::{Display, Formatter};

use anyhow::{bail, ensure};

use crate::{DNS_MAX_HOSTNAME_LEN, error::CapacityError};

/// A domain name in uncompressed wire form: length-prefixed labels followed by the root label.
///
/// Case is preserved, so a name encoded from text decodes back to the same text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawName(Vec<u8>);

impl RawName {
    pub fn root() -> Self {
        Self(vec![0])
    }

    pub(crate) fn from_validated(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Encode a textual host name. A single trailing dot is accepted; `""` and `"."` are the root.
    pub fn from_str_name(name: &str) -> anyhow::Result<Self> {
        if name.is_empty() || name == "." {
            return Ok(Self::root());
        }
        let trimmed = name.strip_suffix('.').unwrap_or(name);

        let mut bytes = Vec::with_capacity(trimmed.len() + 2);
        for label in trimmed.split('.') {
            ensure!(!label.is_empty(), "empty label in name '{}'", name);
            ensure!(label.len() <= 63, "label '{}' exceeds 63 bytes", label);
            bytes.push(label.len() as u8);
            bytes.extend_from_slice(label.as_bytes());
        }
        bytes.push(0);

        if bytes.len() > DNS_MAX_HOSTNAME_LEN {
            return Err(CapacityError::NameTooLong {
                len: bytes.len(),
                max: DNS_MAX_HOSTNAME_LEN,
            }
            .into());
        }
        Ok(Self(bytes))
    }

    /// Validate bytes already in wire form. Compression pointers are rejected.
    pub fn from_wire(bytes: &[u8]) -> anyhow::Result<Self> {
        ensure!(!bytes.is_empty(), "empty raw name");
        if bytes.len() > DNS_MAX_HOSTNAME_LEN {
            return Err(CapacityError::NameTooLong {
                len: bytes.len(),
                max: DNS_MAX_HOSTNAME_LEN,
            }
            .into());
        }

        let mut pos = 0;
        loop {
            let Some(&len) = bytes.get(pos) else {
                bail!("unterminated raw name");
            };
            if len == 0 {
                break;
            }
            ensure!(len & 0xC0 == 0, "compression pointer (0x{:02x}) in raw name", len);
            pos += 1 + len as usize;
        }
        ensure!(
            pos + 1 == bytes.len(),
            "trailing bytes after raw name: end={} len={}",
            pos + 1,
            bytes.len()
        );
        Ok(Self(bytes.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.len() == 1
    }

    /// Labels from left to right, root label excluded.
    pub fn labels(&self) -> Labels<'_> {
        Labels { bytes: &self.0, pos: 0 }
    }

    /// Fully qualified text form, `"."` for the root.
    pub fn to_text(&self) -> String {
        if self.is_root() {
            return ".".to_string();
        }
        let mut out = String::with_capacity(self.0.len());
        for label in self.labels() {
            out.push_str(&String::from_utf8_lossy(label));
            out.push('.');
        }
        out
    }

    /// Append `suffix` to this name (which is treated as relative).
    pub fn join(&self, suffix: &RawName) -> anyhow::Result<RawName> {
        let len = self.0.len() - 1 + suffix.0.len();
        if len > DNS_MAX_HOSTNAME_LEN {
            return Err(CapacityError::NameTooLong {
                len,
                max: DNS_MAX_HOSTNAME_LEN,
            }
            .into());
        }
        let mut bytes = Vec::with_capacity(len);
        bytes.extend_from_slice(&self.0[..self.0.len() - 1]);
        bytes.extend_from_slice(&suffix.0);
        Ok(Self(bytes))
    }

    /// Replace `source` in this name with `target`.
    ///
    /// With `match_suffix` the source may match any label-aligned suffix; otherwise the whole
    /// name must match. Labels compare ASCII case-insensitively. Returns `Ok(None)` when the
    /// name does not match.
    pub fn replace(&self, source: &RawName, target: &RawName, match_suffix: bool) -> anyhow::Result<Option<RawName>> {
        ensure!(!source.is_root() && !target.is_root(), "empty name");

        let (name_len, source_len) = (self.0.len(), source.0.len());
        if name_len < source_len || (!match_suffix && name_len != source_len) {
            return Ok(None);
        }

        // The source must start on a label boundary of this name.
        let offset = name_len - source_len;
        let mut pos = 0;
        while pos < offset {
            pos += 1 + self.0[pos] as usize;
        }
        if pos != offset {
            return Ok(None);
        }

        if !self.0[offset..].eq_ignore_ascii_case(&source.0) {
            return Ok(None);
        }

        let len = offset + target.0.len();
        if len > DNS_MAX_HOSTNAME_LEN {
            return Err(CapacityError::NameTooLong {
                len,
                max: DNS_MAX_HOSTNAME_LEN,
            }
            .into());
        }

        let mut bytes = Vec::with_capacity(len);
        bytes.extend_from_slice(&self.0[..offset]);
        bytes.extend_from_slice(&target.0);
        Ok(Some(Self(bytes)))
    }
}

impl AsRef<[u8]> for RawName {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for RawName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// Iterator over the labels of a [`RawName`].
pub struct Labels<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for Labels<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let len = *self.bytes.get(self.pos)? as usize;
        if len == 0 {
            return None;
        }
        let label = &self.bytes[self.pos + 1..self.pos + 1 + len];
        self.pos += 1 + len;
        Some(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_capacity_error;

    fn raw(s: &str) -> RawName {
        RawName::from_str_name(s).unwrap()
    }

    #[test]
    fn test_text_round_trip() {
        let name = raw("example.com.");
        assert_eq!(
            name.as_bytes(),
            &[7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3, b'c', b'o', b'm', 0]
        );
        assert_eq!(name.to_text(), "example.com.");
        assert_eq!(raw("Mixed.Case").to_text(), "Mixed.Case.");
        assert_eq!(raw(".").to_text(), ".");
    }

    #[test]
    fn test_rejects_bad_text() {
        assert!(RawName::from_str_name("a..b").is_err());
        assert!(RawName::from_str_name(&"a".repeat(64)).is_err());

        let long = vec!["abcdefghi"; 26].join(".");
        let err = RawName::from_str_name(&long).unwrap_err();
        assert!(is_capacity_error(&err));
    }

    #[test]
    fn test_from_wire() {
        let name = RawName::from_wire(&[3, b'f', b'o', b'o', 0]).unwrap();
        assert_eq!(name.to_text(), "foo.");

        assert!(RawName::from_wire(&[]).is_err());
        assert!(RawName::from_wire(&[3, b'f', b'o']).is_err());
        assert!(RawName::from_wire(&[3, b'f', b'o', b'o', 0, 1]).is_err());
        assert!(RawName::from_wire(&[0xC0, 0x0C]).is_err());
    }

    #[test]
    fn test_join() {
        let joined = raw("www").join(&raw("example.com")).unwrap();
        assert_eq!(joined.to_text(), "www.example.com.");
        assert_eq!(raw("www").join(&RawName::root()).unwrap().to_text(), "www.");
    }

    #[test]
    fn test_replace_exact() {
        let name = raw("example.com");
        let out = name.replace(&raw("EXAMPLE.com"), &raw("example.net"), false).unwrap();
        assert_eq!(out.unwrap().to_text(), "example.net.");

        let sub = raw("www.example.com");
        assert!(sub.replace(&raw("example.com"), &raw("example.net"), false).unwrap().is_none());
    }

    #[test]
    fn test_replace_suffix() {
        let name = raw("www.example.com");
        let out = name.replace(&raw("example.com"), &raw("internal.lan"), true).unwrap();
        assert_eq!(out.unwrap().to_text(), "www.internal.lan.");

        // "ample.com" is a byte suffix but not a label suffix.
        let out = name.replace(&raw("ample.com"), &raw("x.y"), true).unwrap();
        assert!(out.is_none());

        let out = raw("com").replace(&raw("example.com"), &raw("x"), true).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn test_replace_errors() {
        let name = raw("www.example.com");
        assert!(name.replace(&RawName::root(), &raw("x"), true).is_err());

        let long_target = raw(&(vec!["abcdefghi"; 25].join(".") + ".ab"));
        let err = name.replace(&raw("example.com"), &long_target, true).unwrap_err();
        assert!(is_capacity_error(&err));
    }
}
