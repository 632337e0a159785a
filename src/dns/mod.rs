pub mod compress;
pub mod edns;
pub mod header;
pub mod name;
pub mod packet;
pub mod question;
pub mod rdata;
pub mod rrset;
pub mod tsig;

pub use header::Header;
pub use name::Name;
pub use packet::{PacketWriter, ParsedPacket};
pub use question::Question;
pub use rrset::{Rr, RrSet};

pub type Type = u16;
pub type Class = u16;

/// a host address
pub const TYPE_A: Type = 1;

/// an authoritative name server
pub const TYPE_NS: Type = 2;

/// the canonical name for an alias
pub const TYPE_CNAME: Type = 5;

/// marks the start of a zone of authority
pub const TYPE_SOA: Type = 6;

/// a domain name pointer
pub const TYPE_PTR: Type = 12;

/// mail exchange
pub const TYPE_MX: Type = 15;

/// text strings
pub const TYPE_TXT: Type = 16;

/// IPv6 host address
pub const TYPE_AAAA: Type = 28;

/// server selection
///
/// ref: https://www.rfc-editor.org/rfc/rfc2782
pub const TYPE_SRV: Type = 33;

/// EDNS pseudo record
pub const TYPE_OPT: Type = 41;

/// delegation signer
pub const TYPE_DS: Type = 43;

/// DNSSEC signature
pub const TYPE_RRSIG: Type = 46;

/// authenticated denial of existence
pub const TYPE_NSEC: Type = 47;

/// DNSSEC public key
pub const TYPE_DNSKEY: Type = 48;

/// hashed authenticated denial of existence
///
/// ref: https://www.rfc-editor.org/rfc/rfc5155
pub const TYPE_NSEC3: Type = 50;

/// NSEC3 parameters, present at the zone apex
pub const TYPE_NSEC3PARAM: Type = 51;

/// transaction signature, last record of a signed message
///
/// ref: https://www.rfc-editor.org/rfc/rfc8945
pub const TYPE_TSIG: Type = 250;

/// for QType
pub const TYPE_IXFR: Type = 251;

/// for QType
pub const TYPE_AXFR: Type = 252;

/// for QType
///
/// ref: https://www.rfc-editor.org/rfc/rfc8482
pub const TYPE_ANY: Type = 255;

/// the Internet
pub const CLASS_IN: Class = 1;
/// the CHAOS class
pub const CLASS_CH: Class = 3;
/// for QClass
pub const CLASS_ANY: Class = 255;
/// class field of an unsigned TSIG RR
pub const CLASS_NONE: Class = 254;

pub const OPCODE_QUERY: u8 = 0;
pub const OPCODE_NOTIFY: u8 = 4;
pub const OPCODE_UPDATE: u8 = 5;

pub const RCODE_NOERROR: u8 = 0;
pub const RCODE_FORMERR: u8 = 1;
pub const RCODE_SERVFAIL: u8 = 2;
pub const RCODE_NXDOMAIN: u8 = 3;
pub const RCODE_NOTIMP: u8 = 4;
pub const RCODE_REFUSED: u8 = 5;
pub const RCODE_NOTAUTH: u8 = 9;

/// TSIG extended error codes, carried in the TSIG RDATA
pub const TSIG_ERR_BADSIG: u16 = 16;
pub const TSIG_ERR_BADKEY: u16 = 17;
pub const TSIG_ERR_BADTIME: u16 = 18;

/// payload limit for plain UDP responses without EDNS
pub const MAX_UDP_PAYLOAD: usize = 512;
