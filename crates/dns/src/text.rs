//! Presentation-format parsing for resource records and questions.
//!
//! Records: `<name> [ttl] [class] <type> <rdata...>`, questions: `<name> [class] <type>`.
//! TTL defaults to 0 and class to IN. Any type accepts the RFC 3597 form `\# <len> <hex>`.

use std::fmt::{Display, Formatter, Write};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use anyhow::{Context, anyhow, bail, ensure};

use crate::{
    domain_name::DomainName,
    message::DnsQuestion,
    reader::DnsMessageReader,
    record::{ClassType, DnsRecord, DnsRecordData, RecordType},
};

impl FromStr for DnsRecord {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens = tokenize(s)?;
        let mut tokens = tokens.iter().map(Vec::as_slice).peekable();

        let name = parse_name(next_text(&mut tokens, "owner name")?)?;

        let mut ttl = 0;
        if let Some(token) = tokens.peek().copied().and_then(|t| std::str::from_utf8(t).ok())
            && !token.is_empty()
            && token.bytes().all(|b| b.is_ascii_digit())
        {
            ttl = token.parse::<u32>().with_context(|| format!("invalid ttl '{}'", token))?;
            tokens.next();
        }

        let mut class = ClassType::IN;
        let mut type_token = next_text(&mut tokens, "record type")?;
        if let Some(parsed) = ClassType::from_mnemonic(type_token)
            && tokens.peek().is_some()
        {
            class = parsed;
            type_token = next_text(&mut tokens, "record type")?;
        }
        let record_type =
            RecordType::from_mnemonic(type_token).ok_or_else(|| anyhow!("unknown record type '{}'", type_token))?;

        let rdata: Vec<&[u8]> = tokens.collect();
        let data = parse_rdata(record_type, &rdata)?;

        Ok(DnsRecord::new(name, record_type, class, ttl, data))
    }
}

impl FromStr for DnsQuestion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens = tokenize(s)?;
        let texts = tokens
            .iter()
            .map(|t| std::str::from_utf8(t).map_err(|_| anyhow!("question text is not UTF-8")))
            .collect::<anyhow::Result<Vec<&str>>>()?;

        let (name, class, qtype) = match texts.as_slice() {
            [name, qtype] => (*name, ClassType::IN, *qtype),
            [name, class, qtype] => {
                let class = ClassType::from_mnemonic(class).ok_or_else(|| anyhow!("unknown class '{}'", class))?;
                (*name, class, *qtype)
            }
            _ => bail!("expected '<name> [class] <type>', got '{}'", s),
        };
        let qtype = RecordType::from_mnemonic(qtype).ok_or_else(|| anyhow!("unknown record type '{}'", qtype))?;

        Ok(DnsQuestion::new(parse_name(name)?, qtype, class))
    }
}

fn next_text<'a>(tokens: &mut impl Iterator<Item = &'a [u8]>, what: &str) -> anyhow::Result<&'a str> {
    let token = tokens.next().ok_or_else(|| anyhow!("missing {}", what))?;
    std::str::from_utf8(token).map_err(|_| anyhow!("{} is not UTF-8", what))
}

fn parse_name(token: &str) -> anyhow::Result<DomainName> {
    DomainName::from_ascii(token).with_context(|| format!("invalid name '{}'", token))
}

fn parse_rdata(record_type: RecordType, rdata: &[&[u8]]) -> anyhow::Result<DnsRecordData> {
    if rdata.first() == Some(&&b"\\#"[..]) {
        return parse_generic(record_type, &rdata[1..]);
    }

    let texts = || utf8_tokens(rdata);

    let data = match record_type {
        RecordType::A => match texts()?.as_slice() {
            [addr] => DnsRecordData::Ipv4(Ipv4Addr::from_str(addr).with_context(|| format!("invalid IPv4 '{}'", addr))?),
            _ => bail!("A record expects one address"),
        },
        RecordType::AAAA => match texts()?.as_slice() {
            [addr] => DnsRecordData::Ipv6(Ipv6Addr::from_str(addr).with_context(|| format!("invalid IPv6 '{}'", addr))?),
            _ => bail!("AAAA record expects one address"),
        },
        RecordType::NS | RecordType::CNAME | RecordType::PTR => match texts()?.as_slice() {
            [target] => DnsRecordData::DomainName(parse_name(target)?),
            _ => bail!("{} record expects one name", record_type),
        },
        RecordType::MX => match texts()?.as_slice() {
            [priority, host] => DnsRecordData::MX {
                priority: parse_int(priority, "MX priority")?,
                host: parse_name(host)?,
            },
            _ => bail!("MX record expects '<priority> <host>'"),
        },
        RecordType::SRV => match texts()?.as_slice() {
            [priority, weight, port, target] => DnsRecordData::SRV {
                priority: parse_int(priority, "SRV priority")?,
                weight: parse_int(weight, "SRV weight")?,
                port: parse_int(port, "SRV port")?,
                target: parse_name(target)?,
            },
            _ => bail!("SRV record expects '<priority> <weight> <port> <target>'"),
        },
        RecordType::SOA => match texts()?.as_slice() {
            [mname, rname, serial, refresh, retry, expire, minimum] => DnsRecordData::SOA {
                mname: parse_name(mname)?,
                rname: parse_name(rname)?,
                serial: parse_int(serial, "SOA serial")?,
                refresh: parse_int(refresh, "SOA refresh")?,
                retry: parse_int(retry, "SOA retry")?,
                expire: parse_int(expire, "SOA expire")?,
                minimum: parse_int(minimum, "SOA minimum")?,
            },
            _ => bail!("SOA record expects 7 fields"),
        },
        RecordType::TXT | RecordType::SPF => {
            ensure!(!rdata.is_empty(), "{} record expects at least one string", record_type);
            let mut strings = Vec::with_capacity(rdata.len());
            for s in rdata {
                ensure!(s.len() <= 255, "character-string longer than 255 bytes");
                strings.push(s.to_vec());
            }
            DnsRecordData::Text(strings)
        }
        other => bail!("no text format for {}; use '\\# <len> <hex>'", other),
    };
    Ok(data)
}

/// RFC 3597 `\# <len> <hex...>`. The payload is decoded as the typed rdata when possible.
fn parse_generic(record_type: RecordType, rdata: &[&[u8]]) -> anyhow::Result<DnsRecordData> {
    let (len, hex) = rdata
        .split_first()
        .ok_or_else(|| anyhow!("generic rdata is missing its length"))?;
    let len: usize = parse_int(std::str::from_utf8(len)?, "rdata length")?;

    let hex: Vec<u8> = hex.concat();
    ensure!(hex.len() % 2 == 0, "odd number of hex digits");
    let bytes = hex
        .chunks(2)
        .map(|pair| {
            let digits = std::str::from_utf8(pair)?;
            u8::from_str_radix(digits, 16).with_context(|| format!("invalid hex '{}'", digits))
        })
        .collect::<anyhow::Result<Vec<u8>>>()?;
    ensure!(
        bytes.len() == len,
        "generic rdata length mismatch: declared {} bytes, got {}",
        len,
        bytes.len()
    );

    let mut reader = DnsMessageReader::new(&bytes);
    DnsRecordData::read_from_record_type(&mut reader, record_type, len)
}

fn utf8_tokens<'a>(rdata: &[&'a [u8]]) -> anyhow::Result<Vec<&'a str>> {
    rdata
        .iter()
        .map(|t| std::str::from_utf8(t).map_err(|_| anyhow!("rdata is not UTF-8")))
        .collect()
}

fn parse_int<T: FromStr>(token: &str, what: &str) -> anyhow::Result<T> {
    token.parse().map_err(|_| anyhow!("invalid {} '{}'", what, token))
}

/// Split on whitespace. Double quotes group a token; inside them `\"`, `\\` and `\DDD` are
/// recognised.
fn tokenize(s: &str) -> anyhow::Result<Vec<Vec<u8>>> {
    let mut tokens = Vec::new();
    let mut bytes = s.bytes().peekable();

    while let Some(&b) = bytes.peek() {
        if b.is_ascii_whitespace() {
            bytes.next();
            continue;
        }

        let mut token = Vec::new();
        if b == b'"' {
            bytes.next();
            loop {
                match bytes.next() {
                    None => bail!("unterminated quoted string"),
                    Some(b'"') => break,
                    Some(b'\\') => {
                        let escaped = bytes.next().ok_or_else(|| anyhow!("dangling escape"))?;
                        if escaped.is_ascii_digit() {
                            let d2 = bytes.next().filter(u8::is_ascii_digit);
                            let d3 = bytes.next().filter(u8::is_ascii_digit);
                            let (Some(d2), Some(d3)) = (d2, d3) else {
                                bail!("\\DDD escape needs three digits");
                            };
                            let value = (escaped - b'0') as u16 * 100 + (d2 - b'0') as u16 * 10 + (d3 - b'0') as u16;
                            ensure!(value <= 255, "\\DDD escape out of range");
                            token.push(value as u8);
                        } else {
                            token.push(escaped);
                        }
                    }
                    Some(other) => token.push(other),
                }
            }
        } else {
            while let Some(&b) = bytes.peek() {
                if b.is_ascii_whitespace() {
                    break;
                }
                token.push(b);
                bytes.next();
            }
        }
        tokens.push(token);
    }
    Ok(tokens)
}

impl Display for DnsRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {} ",
            self.name.to_fqdn(),
            self.ttl,
            self.class,
            self.record_type
        )?;
        match &self.data {
            DnsRecordData::Ipv4(ip) => write!(f, "{}", ip),
            DnsRecordData::Ipv6(ip) => write!(f, "{}", ip),
            DnsRecordData::DomainName(name) => f.write_str(&name.to_fqdn()),
            DnsRecordData::MX { priority, host } => write!(f, "{} {}", priority, host.to_fqdn()),
            DnsRecordData::SRV {
                priority,
                weight,
                port,
                target,
            } => write!(f, "{} {} {} {}", priority, weight, port, target.to_fqdn()),
            DnsRecordData::SOA {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => write!(
                f,
                "{} {} {} {} {} {} {}",
                mname.to_fqdn(),
                rname.to_fqdn(),
                serial,
                refresh,
                retry,
                expire,
                minimum
            ),
            DnsRecordData::Text(strings) => {
                for (i, s) in strings.iter().enumerate() {
                    if i > 0 {
                        f.write_char(' ')?;
                    }
                    write_quoted(f, s)?;
                }
                Ok(())
            }
            DnsRecordData::Raw(bytes) => {
                write!(f, "\\# {}", bytes.len())?;
                if !bytes.is_empty() {
                    f.write_char(' ')?;
                }
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

fn write_quoted(f: &mut Formatter<'_>, s: &[u8]) -> std::fmt::Result {
    f.write_char('"')?;
    for &b in s {
        match b {
            b'"' | b'\\' => write!(f, "\\{}", b as char)?,
            0x20..=0x7E => f.write_char(b as char)?,
            _ => write!(f, "\\{:03}", b)?,
        }
    }
    f.write_char('"')
}
