use std::fmt::{Display, Formatter};
use std::hash::Hash;
use std::ops::Deref;
use std::sync::Arc;

use idna::AsciiDenyList;

use crate::raw_name::RawName;

/// A wrapper type for domain names.
/// The input is stored as lowercase, without the trailing dot, to allow case-insensitive comparisons.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct DomainName(Arc<str>);

impl DomainName {
    /// The root name.
    pub fn root() -> Self {
        Self(Arc::from("."))
    }

    /// Create a new DomainName from an ASCII string.
    /// The domain name is validated according to RFC 1035.
    ///
    /// NOTE: This function does not support Unicode domain names and should only be called with ASCII input.
    pub fn from_ascii(s: impl AsRef<str>) -> anyhow::Result<Self> {
        let mut str: String = s.as_ref().into();

        // Handle root
        if str == "." || str.is_empty() {
            return Ok(Self::root());
        }

        // Remove trailing dot if present.
        if str.ends_with('.') {
            str.pop();
        }

        // The wire form adds one length byte in front and the root label at the end.
        if str.len() + 2 > crate::DNS_MAX_HOSTNAME_LEN {
            anyhow::bail!("domain name too long (bytes): {}", str);
        }

        for label in str.split('.') {
            // No empty labels allowed (except for root, which is handled above).
            if label.is_empty() {
                anyhow::bail!("empty domain label in: {}", str);
            }

            // Every label must be between 1 and 63 characters long (RFC 1035).
            if label.len() > 63 {
                anyhow::bail!("domain label too long: {}", label);
            }
        }

        str.make_ascii_lowercase();

        Ok(Self(Arc::from(str)))
    }

    /// Create a new DomainName from a user input string.
    /// This function supports Unicode domain names and performs IDNA conversion.
    pub fn from_user(s: impl AsRef<str>) -> anyhow::Result<Self> {
        let input = s.as_ref().trim();

        if input == "." {
            return Ok(Self::root());
        }

        let name = input.strip_suffix('.').unwrap_or(input);

        // IDNA to ASCII
        let ascii = idna::domain_to_ascii_cow(name.as_bytes(), AsciiDenyList::URL)
            .map_err(|_| anyhow::anyhow!("invalid IDNA domain: {}", input))?;

        Self::from_ascii(&ascii)
    }

    /// Decode a wire-form name label by label.
    ///
    /// Labels the dotted form cannot carry (an embedded `.`, bytes outside printable ASCII) are
    /// rejected rather than rewritten.
    pub fn from_raw(raw: &RawName) -> anyhow::Result<Self> {
        if raw.is_root() {
            return Ok(Self::root());
        }

        let mut str = String::with_capacity(raw.len());
        for label in raw.labels() {
            if let Some(&byte) = label.iter().find(|&&b| b == b'.' || !(b' '..=b'~').contains(&b)) {
                anyhow::bail!("label byte 0x{:02x} has no text form in: {}", byte, raw.to_text());
            }
            if !str.is_empty() {
                str.push('.');
            }
            // Checked above: every byte is printable ASCII.
            str.extend(label.iter().map(|&b| b.to_ascii_lowercase() as char));
        }

        Ok(Self(Arc::from(str)))
    }

    /// Encode to the uncompressed wire form.
    pub fn to_raw(&self) -> RawName {
        let mut bytes = Vec::with_capacity(self.0.len() + 2);
        if !self.is_root() {
            for label in self.0.split('.') {
                bytes.push(label.len() as u8);
                bytes.extend_from_slice(label.as_bytes());
            }
        }
        bytes.push(0);
        RawName::from_validated(bytes)
    }

    /// Fully qualified text form, with the trailing dot.
    pub fn to_fqdn(&self) -> String {
        if self.is_root() {
            return ".".to_string();
        }
        format!("{}.", self.0)
    }

    pub fn is_root(&self) -> bool {
        &*self.0 == "."
    }

    /// Get the string representation of the DomainName.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for DomainName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for DomainName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_name_creation() {
        let dn = DomainName::from_ascii("Example.com.").unwrap();
        assert_eq!(dn.as_str(), "example.com");

        let dn2 = DomainName::from_ascii("sub.domain.example.com").unwrap();
        assert_eq!(dn2.as_str(), "sub.domain.example.com");

        assert!(DomainName::from_ascii("a".repeat(256)).is_err());
        assert!(DomainName::from_ascii("label..example.com").is_err());
        assert!(DomainName::from_ascii("a".repeat(64) + ".com").is_err());
    }

    #[test]
    fn test_root_forms() {
        assert!(DomainName::from_ascii(".").unwrap().is_root());
        assert!(DomainName::from_ascii("").unwrap().is_root());
        assert_eq!(DomainName::root().to_fqdn(), ".");
        assert_eq!(DomainName::root().to_raw().as_bytes(), &[0]);
    }

    #[test]
    fn test_raw_conversion() {
        let dn = DomainName::from_ascii("www.Example.com").unwrap();
        let raw = dn.to_raw();
        assert_eq!(raw.as_bytes()[0], 3);
        assert_eq!(raw.len(), 17);
        assert_eq!(DomainName::from_raw(&raw).unwrap(), dn);
        assert_eq!(dn.to_fqdn(), "www.example.com.");
    }

    #[test]
    fn test_from_raw_keeps_labels() {
        let raw = RawName::from_wire(&[3, b'W', b'w', b'W', 4, b' ', b'a', b'b', b' ', 0]).unwrap();
        let dn = DomainName::from_raw(&raw).unwrap();
        assert_eq!(dn.as_str(), "www. ab ");
        assert_eq!(dn.to_raw().as_bytes(), &[3, b'w', b'w', b'w', 4, b' ', b'a', b'b', b' ', 0]);

        assert!(DomainName::from_raw(&RawName::root()).unwrap().is_root());
    }

    #[test]
    fn test_from_raw_rejects_untextable_labels() {
        let dotted = RawName::from_wire(&[3, b'a', b'.', b'b', 3, b'c', b'o', b'm', 0]).unwrap();
        assert!(DomainName::from_raw(&dotted).is_err());

        let binary = RawName::from_wire(&[2, 0xff, b'a', 3, b'c', b'o', b'm', 0]).unwrap();
        assert!(DomainName::from_raw(&binary).is_err());

        let control = RawName::from_wire(&[1, 0x07, 0]).unwrap();
        assert!(DomainName::from_raw(&control).is_err());
    }

    #[test]
    fn test_from_ascii_does_not_trim() {
        let dn = DomainName::from_ascii(" a.com").unwrap();
        assert_eq!(dn.as_str(), " a.com");
        assert_eq!(dn.to_raw().as_bytes()[..3], [2, b' ', b'a']);
    }

    #[test]
    fn test_from_user_idna() {
        let dn = DomainName::from_user("bücher.example").unwrap();
        assert_eq!(dn.as_str(), "xn--bcher-kva.example");
    }
}
