pub mod builder;
pub mod domain_name;
pub mod edns;
pub mod error;
mod macros;
pub mod message;
pub mod raw_name;
pub mod reader;
pub mod record;
pub mod rename;
pub mod text;
pub mod writer;

pub use builder::DnsMessageBuilder;
pub use domain_name::DomainName;
pub use edns::{Edns, EdnsOption, EdnsOptionCode, EdnsOptionData};
pub use error::{CapacityError, is_capacity_error};
pub use message::{DnsFlags, DnsMessage, DnsOpcode, DnsQuestion, DnsResponseCode, PacketFlags};
pub use raw_name::RawName;
pub use reader::DnsMessageReader;
pub use record::{ClassType, DnsRecord, DnsRecordData, RecordType};
pub use writer::DnsMessageWriter;

/// Longest wire-form name, root label included.
pub const DNS_MAX_HOSTNAME_LEN: usize = 255;

/// Largest message we serialize.
pub const DNS_MAX_PACKET_SIZE: usize = 8192;
