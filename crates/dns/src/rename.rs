use anyhow::ensure;

use crate::{
    domain_name::DomainName,
    message::DnsMessage,
    raw_name::RawName,
    record::{DnsRecord, DnsRecordData},
};

/// Rewrites names matching `source` into `target`, counting the names it changed.
struct Renamer<'a> {
    source: &'a RawName,
    target: &'a RawName,
    match_suffix: bool,
    renamed: usize,
}

impl Renamer<'_> {
    fn name(&mut self, name: &mut DomainName) -> anyhow::Result<()> {
        if let Some(raw) = name.to_raw().replace(self.source, self.target, self.match_suffix)? {
            *name = DomainName::from_raw(&raw)?;
            self.renamed += 1;
        }
        Ok(())
    }

    fn record(&mut self, record: &mut DnsRecord) -> anyhow::Result<()> {
        self.name(&mut record.name)?;
        match &mut record.data {
            DnsRecordData::DomainName(name) => self.name(name),
            DnsRecordData::MX { host, .. } => self.name(host),
            DnsRecordData::SRV { target, .. } => self.name(target),
            DnsRecordData::SOA { mname, rname, .. } => {
                self.name(mname)?;
                self.name(rname)
            }
            DnsRecordData::Raw(_) | DnsRecordData::Ipv4(_) | DnsRecordData::Ipv6(_) | DnsRecordData::Text(_) => Ok(()),
        }
    }
}

impl DnsMessage {
    /// Replace `source` with `target` in every owner name and embedded rdata name.
    ///
    /// With `match_suffix`, any label-aligned suffix equal to `source` is replaced; otherwise only
    /// whole names. Matching ignores ASCII case. The message is left untouched on error.
    pub fn rename(&mut self, target: &RawName, source: &RawName, match_suffix: bool) -> anyhow::Result<usize> {
        ensure!(!source.is_root() && !target.is_root(), "empty name");

        let mut renamer = Renamer {
            source,
            target,
            match_suffix,
            renamed: 0,
        };
        let mut renamed = self.clone();

        for question in renamed.questions_mut() {
            renamer.name(&mut question.qname)?;
        }
        for record in renamed.records_mut() {
            renamer.record(record)?;
        }

        *self = renamed;
        Ok(renamer.renamed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        DnsMessageBuilder, DnsQuestion,
        error::is_capacity_error,
        record::{ClassType, RecordType},
    };

    fn raw(s: &str) -> RawName {
        RawName::from_str_name(s).unwrap()
    }

    fn message() -> DnsMessage {
        DnsMessageBuilder::new()
            .add_question("www.example.com A".parse::<DnsQuestion>().unwrap())
            .add_answer("www.example.com 60 CNAME edge.example.com".parse().unwrap())
            .add_answer("edge.example.com 60 A 192.0.2.7".parse().unwrap())
            .add_authority_record("example.com 60 SOA ns.example.com admin.example.com 1 2 3 4 5".parse().unwrap())
            .add_additional_record("mail.example.org 60 MX 5 mx.example.com".parse().unwrap())
            .build()
    }

    #[test]
    fn test_suffix_rename_covers_rdata() {
        let mut msg = message();
        let count = msg.rename(&raw("example.net"), &raw("Example.COM"), true).unwrap();

        assert_eq!(msg.questions()[0].qname.as_str(), "www.example.net");
        assert_eq!(
            msg.answers()[0].data,
            DnsRecordData::DomainName(DomainName::from_ascii("edge.example.net").unwrap())
        );
        assert_eq!(msg.answers()[1].name.as_str(), "edge.example.net");
        assert!(matches!(
            &msg.authority_records()[0].data,
            DnsRecordData::SOA { mname, rname, .. } if mname.as_str() == "ns.example.net" && rname.as_str() == "admin.example.net"
        ));
        // Owner stays, exchange host is renamed.
        assert_eq!(msg.additional_records()[0].name.as_str(), "mail.example.org");
        assert_eq!(count, 8);
    }

    #[test]
    fn test_exact_rename() {
        let mut msg = message();
        let count = msg.rename(&raw("origin.internal"), &raw("edge.example.com"), false).unwrap();
        assert_eq!(count, 2);
        assert_eq!(msg.answers()[1].name.as_str(), "origin.internal");
        assert_eq!(msg.questions()[0].qname.as_str(), "www.example.com");
    }

    #[test]
    fn test_no_match_leaves_message() {
        let mut msg = message();
        let before = msg.clone();
        assert_eq!(msg.rename(&raw("a.b"), &raw("nothing.here"), true).unwrap(), 0);
        assert_eq!(msg, before);
    }

    #[test]
    fn test_failure_is_atomic() {
        let mut msg = message();
        let before = msg.clone();
        let long = raw(&(vec!["abcdefghi"; 25].join(".") + ".ab"));
        let err = msg.rename(&long, &raw("example.com"), true).unwrap_err();
        assert!(is_capacity_error(&err));
        assert_eq!(msg, before);

        assert!(msg.rename(&RawName::root(), &raw("example.com"), true).is_err());
        assert_eq!(msg.questions()[0].qtype, RecordType::A);
        assert_eq!(msg.questions()[0].qclass, ClassType::IN);
    }
}
