/*!
RDATA is stored as an opaque byte span in uncompressed wire form.  Its
interpretation is driven by a type descriptor table mapping each RR
type to the sequence of fields its RDATA carries; unknown types fall
back to a single opaque field.  The descriptors decide which spans are
domain names (and whether those may be compressed on the wire), which
lets one walker serve canonical ordering, name interning and message
serialisation for every type alike.
*/

use std::cmp::Ordering;
use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::ops::Range;
use std::sync::Arc;

use once_cell::sync::Lazy;

use super::name::Name;
use super::{
    Type, TYPE_A, TYPE_AAAA, TYPE_CNAME, TYPE_DNSKEY, TYPE_DS, TYPE_MX, TYPE_NS, TYPE_NSEC,
    TYPE_NSEC3, TYPE_NSEC3PARAM, TYPE_PTR, TYPE_RRSIG, TYPE_SOA, TYPE_SRV, TYPE_TSIG, TYPE_TXT,
};
use crate::errors::ProtoError;

/// One field of an RDATA layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// a domain name that may carry a compression pointer on the wire
    CompressedDname,
    /// a domain name emitted verbatim, never compressed
    UncompressedDname,
    /// a domain name that also never participates as a compression target
    LiteralDname,
    U8,
    U16,
    U32,
    /// 48-bit integer (TSIG time signed)
    U48,
    Ipv4,
    Ipv6,
    /// one-octet length prefix plus that many octets
    Blob8,
    /// two-octet length prefix plus that many octets
    Blob16,
    /// everything up to the end of the RDATA
    Remainder,
}

impl FieldKind {
    pub fn is_dname(self) -> bool {
        matches!(
            self,
            FieldKind::CompressedDname | FieldKind::UncompressedDname | FieldKind::LiteralDname
        )
    }
}

const OPAQUE: &[FieldKind] = &[FieldKind::Remainder];

static DESCRIPTORS: Lazy<HashMap<Type, &'static [FieldKind]>> = Lazy::new(|| {
    use FieldKind::*;
    let mut m: HashMap<Type, &'static [FieldKind]> = HashMap::new();
    m.insert(TYPE_A, &[Ipv4]);
    m.insert(TYPE_NS, &[CompressedDname]);
    m.insert(TYPE_CNAME, &[CompressedDname]);
    m.insert(
        TYPE_SOA,
        &[CompressedDname, CompressedDname, U32, U32, U32, U32, U32],
    );
    m.insert(TYPE_PTR, &[CompressedDname]);
    m.insert(TYPE_MX, &[U16, CompressedDname]);
    m.insert(TYPE_TXT, &[Remainder]);
    m.insert(TYPE_AAAA, &[Ipv6]);
    m.insert(TYPE_SRV, &[U16, U16, U16, UncompressedDname]);
    m.insert(TYPE_DS, &[U16, U8, U8, Remainder]);
    m.insert(
        TYPE_RRSIG,
        &[U16, U8, U8, U32, U32, U32, U16, LiteralDname, Remainder],
    );
    m.insert(TYPE_NSEC, &[LiteralDname, Remainder]);
    m.insert(TYPE_DNSKEY, &[U16, U8, U8, Remainder]);
    m.insert(TYPE_NSEC3, &[U8, U8, U16, Blob8, Blob8, Remainder]);
    m.insert(TYPE_NSEC3PARAM, &[U8, U8, U16, Blob8]);
    m.insert(TYPE_TSIG, &[LiteralDname, U48, U16, Blob16, U16, U16, Blob16]);
    m
});

/// Field layout for `rtype`; unknown types are a single opaque span.
pub fn descriptor(rtype: Type) -> &'static [FieldKind] {
    DESCRIPTORS.get(&rtype).copied().unwrap_or(OPAQUE)
}

/// Iterate `(kind, span)` over uncompressed RDATA bytes.
pub fn fields(rtype: Type, bytes: &[u8]) -> FieldIter<'_> {
    FieldIter {
        desc: descriptor(rtype),
        bytes,
        pos: 0,
        idx: 0,
        failed: false,
    }
}

pub struct FieldIter<'a> {
    desc: &'static [FieldKind],
    bytes: &'a [u8],
    pos: usize,
    idx: usize,
    failed: bool,
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = Result<(FieldKind, Range<usize>), ProtoError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.idx == self.desc.len() {
            if self.pos != self.bytes.len() {
                self.failed = true;
                return Some(Err(ProtoError::Malformed("trailing octets in rdata")));
            }
            return None;
        }
        let kind = self.desc[self.idx];
        self.idx += 1;
        match field_range(kind, self.bytes, self.pos) {
            Ok(range) => {
                self.pos = range.end;
                Some(Ok((kind, range)))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

fn field_range(kind: FieldKind, bytes: &[u8], pos: usize) -> Result<Range<usize>, ProtoError> {
    let fixed = |n: usize| -> Result<Range<usize>, ProtoError> {
        if pos + n > bytes.len() {
            Err(ProtoError::Malformed("truncated rdata field"))
        } else {
            Ok(pos..pos + n)
        }
    };
    match kind {
        FieldKind::U8 => fixed(1),
        FieldKind::U16 => fixed(2),
        FieldKind::U32 | FieldKind::Ipv4 => fixed(4),
        FieldKind::U48 => fixed(6),
        FieldKind::Ipv6 => fixed(16),
        FieldKind::Blob8 => {
            let len = *bytes
                .get(pos)
                .ok_or(ProtoError::Malformed("truncated rdata field"))? as usize;
            fixed(1 + len)
        }
        FieldKind::Blob16 => {
            if pos + 2 > bytes.len() {
                return Err(ProtoError::Malformed("truncated rdata field"));
            }
            let len = u16::from_be_bytes([bytes[pos], bytes[pos + 1]]) as usize;
            fixed(2 + len)
        }
        FieldKind::Remainder => Ok(pos..bytes.len()),
        FieldKind::CompressedDname | FieldKind::UncompressedDname | FieldKind::LiteralDname => {
            let mut p = pos;
            loop {
                let b = *bytes
                    .get(p)
                    .ok_or(ProtoError::Malformed("truncated domain name in rdata"))?;
                if b == 0 {
                    p += 1;
                    break;
                }
                if b > 63 {
                    return Err(ProtoError::Malformed("compressed name in stored rdata"));
                }
                p += 1 + b as usize;
            }
            Ok(pos..p)
        }
    }
}

/// Canonical RDATA form per RFC 4034 section 6.2: dname spans are
/// case-folded, every other octet is kept verbatim.
pub fn canonical(rtype: Type, bytes: &[u8]) -> Result<Vec<u8>, ProtoError> {
    let mut out = bytes.to_vec();
    for field in fields(rtype, bytes) {
        let (kind, range) = field?;
        if kind.is_dname() {
            out[range].make_ascii_lowercase();
        }
    }
    Ok(out)
}

/// Ordering of two RDATA values of the same type in canonical form.
/// Undecodable values fall back to a plain byte comparison.
pub fn canonical_cmp(rtype: Type, a: &[u8], b: &[u8]) -> Ordering {
    match (canonical(rtype, a), canonical(rtype, b)) {
        (Ok(ca), Ok(cb)) => ca.cmp(&cb),
        _ => a.cmp(b),
    }
}

/**
A single RDATA value: the uncompressed wire span plus the parsed
domain-name targets of its dname fields, in field order.

The targets start out as freshly parsed names; when the owning zone is
adjusted, targets that resolve inside the zone are replaced by the
zone's interned representative so that delegation and alias chasing
reach the target node without a copy.
*/
#[derive(Debug, Clone)]
pub struct Rdata {
    wire: Vec<u8>,
    dnames: Vec<Arc<Name>>,
}

impl Rdata {
    /// Parse from uncompressed bytes (zone data, changesets).
    pub fn parse(rtype: Type, bytes: &[u8]) -> Result<Self, ProtoError> {
        let mut dnames = Vec::new();
        for field in fields(rtype, bytes) {
            let (kind, range) = field?;
            if kind.is_dname() {
                dnames.push(Arc::new(Name::from_wire(&bytes[range])?));
            }
        }
        Ok(Rdata {
            wire: bytes.to_vec(),
            dnames,
        })
    }

    /// Parse out of a full message, decompressing dname fields that carry
    /// pointers.  `span` is the RDATA range within `msg`.
    pub fn from_message(rtype: Type, msg: &[u8], span: Range<usize>) -> Result<Self, ProtoError> {
        let mut wire = Vec::with_capacity(span.len());
        let mut dnames = Vec::new();
        let mut pos = span.start;
        for kind in descriptor(rtype) {
            if pos > span.end {
                return Err(ProtoError::Malformed("truncated rdata field"));
            }
            if kind.is_dname() {
                let (name, used) = Name::parse(msg, pos)?;
                pos += used;
                wire.extend_from_slice(name.wire());
                dnames.push(Arc::new(name));
            } else {
                let range = field_range(*kind, &msg[..span.end], pos)?;
                wire.extend_from_slice(&msg[range.clone()]);
                pos = range.end;
            }
        }
        if pos != span.end {
            return Err(ProtoError::Malformed("trailing octets in rdata"));
        }
        Ok(Rdata { wire, dnames })
    }

    pub fn wire(&self) -> &[u8] {
        &self.wire
    }

    pub fn dnames(&self) -> &[Arc<Name>] {
        &self.dnames
    }

    /// Swap the dname target at `idx` for the zone's interned name.
    pub fn set_dname(&mut self, idx: usize, name: Arc<Name>) {
        self.dnames[idx] = name;
    }

    pub fn canonical(&self, rtype: Type) -> Vec<u8> {
        canonical(rtype, &self.wire).unwrap_or_else(|_| self.wire.clone())
    }
}

impl PartialEq for Rdata {
    fn eq(&self, other: &Self) -> bool {
        self.wire == other.wire
    }
}

impl Eq for Rdata {}

impl From<Ipv4Addr> for Rdata {
    fn from(addr: Ipv4Addr) -> Self {
        Rdata {
            wire: addr.octets().to_vec(),
            dnames: Vec::new(),
        }
    }
}

impl From<Ipv6Addr> for Rdata {
    fn from(addr: Ipv6Addr) -> Self {
        Rdata {
            wire: addr.octets().to_vec(),
            dnames: Vec::new(),
        }
    }
}

/// Type covered by an RRSIG RDATA (its leading 16-bit field).
pub fn rrsig_type_covered(rdata: &[u8]) -> Option<Type> {
    if rdata.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([rdata[0], rdata[1]]))
}

fn soa_u32_field(rdata: &[u8], index: usize) -> Option<u32> {
    let mut pos = 0usize;
    for _ in 0..2 {
        loop {
            let b = *rdata.get(pos)?;
            pos += 1;
            if b == 0 {
                break;
            }
            pos += b as usize;
        }
    }
    pos += index * 4;
    let raw: [u8; 4] = rdata.get(pos..pos + 4)?.try_into().ok()?;
    Some(u32::from_be_bytes(raw))
}

/// SERIAL field of an SOA RDATA.
pub fn soa_serial(rdata: &[u8]) -> Option<u32> {
    soa_u32_field(rdata, 0)
}

/// MINIMUM field of an SOA RDATA, the negative-answer TTL bound.
pub fn soa_minimum(rdata: &[u8]) -> Option<u32> {
    soa_u32_field(rdata, 4)
}

/// Build an NSEC/NSEC3 type bit map (RFC 4034 section 4.1.2) from a
/// sorted-or-not list of present types.
pub fn type_bitmap(types: &[Type]) -> Vec<u8> {
    let mut sorted: Vec<Type> = types.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut out = Vec::new();
    let mut window = 0u8;
    let mut bits = [0u8; 32];
    let mut max_octet = 0usize;
    let mut dirty = false;

    let mut flush = |window: u8, bits: &mut [u8; 32], max_octet: &mut usize, out: &mut Vec<u8>| {
        out.push(window);
        out.push(*max_octet as u8 + 1);
        out.extend_from_slice(&bits[..*max_octet + 1]);
        *bits = [0u8; 32];
        *max_octet = 0;
    };

    for t in sorted {
        let w = (t >> 8) as u8;
        if dirty && w != window {
            flush(window, &mut bits, &mut max_octet, &mut out);
            dirty = false;
        }
        window = w;
        let low = (t & 0xFF) as usize;
        bits[low / 8] |= 0x80 >> (low % 8);
        max_octet = max_octet.max(low / 8);
        dirty = true;
    }
    if dirty {
        flush(window, &mut bits, &mut max_octet, &mut out);
    }
    out
}

/// Membership test against a wire-form type bit map.
pub fn bitmap_contains(bitmap: &[u8], rtype: Type) -> bool {
    let want_window = (rtype >> 8) as u8;
    let low = (rtype & 0xFF) as usize;
    let mut pos = 0usize;
    while pos + 2 <= bitmap.len() {
        let window = bitmap[pos];
        let len = bitmap[pos + 1] as usize;
        if window == want_window {
            let octet = low / 8;
            if octet >= len || pos + 2 + octet >= bitmap.len() {
                return false;
            }
            return bitmap[pos + 2 + octet] & (0x80 >> (low % 8)) != 0;
        }
        pos += 2 + len;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{TYPE_MX, TYPE_NS, TYPE_SOA};
    use hex_literal::hex;

    #[test]
    fn test_fields_mx() {
        // preference 10, exchange "mail.example."
        let rdata = [
            0x00, 0x0A, 0x04, b'm', b'a', b'i', b'l', 0x07, b'e', b'x', b'a', b'm', b'p', b'l',
            b'e', 0x00,
        ];
        let parts: Vec<_> = fields(TYPE_MX, &rdata).collect::<Result<_, _>>().unwrap();
        assert_eq!(2, parts.len());
        assert_eq!((FieldKind::U16, 0..2), parts[0]);
        assert_eq!((FieldKind::CompressedDname, 2..16), parts[1]);
    }

    #[test]
    fn test_fields_truncated() {
        let rdata = [0x00]; // half a preference field
        assert!(fields(TYPE_MX, &rdata).any(|f| f.is_err()));
    }

    #[test]
    fn test_canonical_folds_names_only() {
        let rdata = [0x00, 0x0A, 0x04, b'M', b'A', b'I', b'L', 0x00];
        let canon = canonical(TYPE_MX, &rdata).unwrap();
        assert_eq!(&[0x00, 0x0A, 0x04, b'm', b'a', b'i', b'l', 0x00], &canon[..]);
    }

    #[test]
    fn test_rdata_parse_collects_dnames() {
        let rdata = Rdata::parse(TYPE_NS, b"\x03ns1\x07example\x03com\x00").unwrap();
        assert_eq!(1, rdata.dnames().len());
        assert_eq!("ns1.example.com.", rdata.dnames()[0].to_string());
    }

    #[test]
    fn test_rdata_from_message_decompresses() {
        // message: "example.com." at 0, NS rdata "ns1" + pointer at 13
        let msg = [
            0x07, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0x03, b'c', b'o', b'm', 0x00, //
            0x03, b'n', b's', b'1', 0xC0, 0x00,
        ];
        let rdata = Rdata::from_message(TYPE_NS, &msg, 13..19).unwrap();
        assert_eq!(b"\x03ns1\x07example\x03com\x00", rdata.wire());
        assert_eq!("ns1.example.com.", rdata.dnames()[0].to_string());
    }

    #[test]
    fn test_soa_fields() {
        let mut rdata = Vec::new();
        rdata.extend_from_slice(b"\x03ns1\x07example\x00");
        rdata.extend_from_slice(b"\x05admin\x07example\x00");
        for v in [2024u32, 7200, 3600, 1209600, 300] {
            rdata.extend_from_slice(&v.to_be_bytes());
        }
        assert_eq!(Some(2024), soa_serial(&rdata));
        assert_eq!(Some(300), soa_minimum(&rdata));
        assert!(fields(TYPE_SOA, &rdata).all(|f| f.is_ok()));
    }

    #[test]
    fn test_type_bitmap_roundtrip() {
        use crate::dns::{TYPE_A, TYPE_AAAA, TYPE_RRSIG, TYPE_TXT};
        let map = type_bitmap(&[TYPE_A, TYPE_TXT, TYPE_AAAA, TYPE_RRSIG]);
        for t in [TYPE_A, TYPE_TXT, TYPE_AAAA, TYPE_RRSIG] {
            assert!(bitmap_contains(&map, t), "type {} missing", t);
        }
        assert!(!bitmap_contains(&map, TYPE_NS));
        assert!(!bitmap_contains(&map, 1234));
    }

    #[test]
    fn test_unknown_type_is_opaque() {
        let rdata = Rdata::parse(4242, &hex!("DEADBEEF")).unwrap();
        assert!(rdata.dnames().is_empty());
        assert_eq!(&hex!("DEADBEEF"), rdata.wire());
    }
}
