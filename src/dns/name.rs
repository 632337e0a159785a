use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::errors::ProtoError;

/// the sum of all label octets and label lengths is limited to 255
pub const MAX_NAME_LEN: usize = 255;

/// Labels must be 63 characters or less.
pub const MAX_LABEL_LEN: usize = 63;

const MAX_POINTER_JUMPS: usize = 128;

/**
A domain name in wire form: a sequence of length-prefixed labels
terminated by the zero-length root label, never compressed.

By convention, domain names can be stored with arbitrary case, but
domain name comparisons for all present domain functions are done in a
case-insensitive manner, assuming an ASCII character set.  `Eq`,
`Hash` and `Ord` all follow that rule; `Ord` is the canonical DNSSEC
ordering of RFC 4034 section 6.1 (labels compared right to left), so a
`BTreeMap` keyed by `Name` walks a zone in canonical order.

Names are immutable after construction; within a zone one `Arc<Name>`
representative per owner is shared between the tree and the records
that reference it.
*/
#[derive(Debug, Clone)]
pub struct Name {
    wire: Box<[u8]>,
    label_count: u8,
}

impl Name {
    pub fn root() -> Self {
        Name {
            wire: Box::new([0]),
            label_count: 0,
        }
    }

    /// Parse a possibly-compressed name out of a full message, starting at
    /// `pos`.  Returns the name and the number of octets the name occupies
    /// at `pos` (up to and including the first pointer, if any).
    ///
    /// Pointers may only point backwards, and at most 128 jumps are
    /// followed before the name is rejected.
    pub fn parse(msg: &[u8], pos: usize) -> Result<(Self, usize), ProtoError> {
        let mut wire = Vec::with_capacity(32);
        let mut label_count = 0u8;
        let mut jumps = 0usize;
        let mut cursor = pos;
        let mut consumed = None;

        loop {
            let b = *msg
                .get(cursor)
                .ok_or(ProtoError::Malformed("truncated domain name"))?;
            if b & 0b1100_0000 == 0b1100_0000 {
                let lo = *msg
                    .get(cursor + 1)
                    .ok_or(ProtoError::Malformed("truncated compression pointer"))?;
                let target = (((b & 0b0011_1111) as usize) << 8) | lo as usize;
                if target >= cursor {
                    return Err(ProtoError::Malformed("forward compression pointer"));
                }
                jumps += 1;
                if jumps > MAX_POINTER_JUMPS {
                    return Err(ProtoError::Malformed("too many compression pointers"));
                }
                if consumed.is_none() {
                    consumed = Some(cursor + 2 - pos);
                }
                cursor = target;
            } else if b == 0 {
                wire.push(0);
                if wire.len() > MAX_NAME_LEN {
                    return Err(ProtoError::Malformed("domain name exceeds 255 octets"));
                }
                let used = consumed.unwrap_or_else(|| cursor + 1 - pos);
                return Ok((
                    Name {
                        wire: wire.into_boxed_slice(),
                        label_count,
                    },
                    used,
                ));
            } else if b as usize <= MAX_LABEL_LEN {
                let end = cursor + 1 + b as usize;
                if end > msg.len() {
                    return Err(ProtoError::Malformed("truncated label"));
                }
                wire.extend_from_slice(&msg[cursor..end]);
                if wire.len() + 1 > MAX_NAME_LEN {
                    return Err(ProtoError::Malformed("domain name exceeds 255 octets"));
                }
                label_count += 1;
                cursor = end;
            } else {
                return Err(ProtoError::Malformed("reserved label type"));
            }
        }
    }

    /// Build from an already-uncompressed wire form, e.g. a dname span
    /// inside stored RDATA.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, ProtoError> {
        let (name, used) = Self::parse(bytes, 0)?;
        if used != bytes.len() {
            return Err(ProtoError::Malformed("trailing octets after domain name"));
        }
        Ok(name)
    }

    /// Wire form the caller guarantees is a well-formed label sequence;
    /// for compiled-in names where construction must not be fallible.
    pub(crate) fn from_wire_unchecked(wire: &[u8], label_count: u8) -> Self {
        Name {
            wire: wire.into(),
            label_count,
        }
    }

    /// Build from presentation form.  A missing trailing dot is accepted;
    /// escapes are not (the seed loader and tests have no use for them).
    pub fn from_text(text: &str) -> Result<Self, ProtoError> {
        let text = text.trim();
        if text.is_empty() || text == "." {
            return Ok(Name::root());
        }
        let text = text.strip_suffix('.').unwrap_or(text);

        let mut wire = Vec::with_capacity(text.len() + 2);
        let mut label_count = 0u8;
        for label in text.split('.') {
            if label.is_empty() {
                return Err(ProtoError::Malformed("empty label"));
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(ProtoError::Malformed("label exceeds 63 octets"));
            }
            wire.push(label.len() as u8);
            wire.extend_from_slice(label.as_bytes());
            label_count += 1;
        }
        wire.push(0);
        if wire.len() > MAX_NAME_LEN {
            return Err(ProtoError::TooLong);
        }
        Ok(Name {
            wire: wire.into_boxed_slice(),
            label_count,
        })
    }

    /// `prefix` labels followed by all of `suffix`.
    pub fn concat(prefix: &Name, suffix: &Name) -> Result<Self, ProtoError> {
        let mut wire = Vec::with_capacity(prefix.wire.len() - 1 + suffix.wire.len());
        wire.extend_from_slice(&prefix.wire[..prefix.wire.len() - 1]);
        wire.extend_from_slice(&suffix.wire);
        if wire.len() > MAX_NAME_LEN {
            return Err(ProtoError::TooLong);
        }
        Ok(Name {
            wire: wire.into_boxed_slice(),
            label_count: prefix.label_count + suffix.label_count,
        })
    }

    /// `*.<parent>`
    pub fn wildcard_of(parent: &Name) -> Result<Self, ProtoError> {
        let star = Name {
            wire: Box::new([1, b'*', 0]),
            label_count: 1,
        };
        Self::concat(&star, parent)
    }

    pub fn wire(&self) -> &[u8] {
        &self.wire
    }

    pub fn len(&self) -> usize {
        self.wire.len()
    }

    pub fn is_root(&self) -> bool {
        self.label_count == 0
    }

    pub fn label_count(&self) -> usize {
        self.label_count as usize
    }

    pub fn is_wildcard(&self) -> bool {
        self.wire.len() >= 2 && self.wire[0] == 1 && self.wire[1] == b'*'
    }

    /// Labels left to right, as raw bodies without the length octet.
    pub fn labels(&self) -> LabelIter<'_> {
        LabelIter { rest: &self.wire }
    }

    /// The name with its `n` leftmost labels removed.
    pub fn skip_labels(&self, n: usize) -> Name {
        let n = n.min(self.label_count as usize);
        let mut pos = 0usize;
        for _ in 0..n {
            pos += 1 + self.wire[pos] as usize;
        }
        Name {
            wire: self.wire[pos..].into(),
            label_count: self.label_count - n as u8,
        }
    }

    /// The immediate parent name, or `None` at the root.
    pub fn parent(&self) -> Option<Name> {
        if self.is_root() {
            None
        } else {
            Some(self.skip_labels(1))
        }
    }

    /// Case-fold ASCII letters in label bodies, in place.
    pub fn make_lower(&mut self) {
        let mut pos = 0usize;
        while self.wire[pos] != 0 {
            let len = self.wire[pos] as usize;
            for b in &mut self.wire[pos + 1..pos + 1 + len] {
                b.make_ascii_lowercase();
            }
            pos += 1 + len;
        }
    }

    /// RFC 4034 section 6.1 canonical ordering: labels compared right to
    /// left, case-insensitively, with the absence of a label sorting first.
    pub fn canonical_cmp(&self, other: &Name) -> Ordering {
        let (ao, an) = self.label_offsets();
        let (bo, bn) = other.label_offsets();
        let common = an.min(bn);
        for i in 1..=common {
            let la = self.label_body(ao[an - i] as usize);
            let lb = other.label_body(bo[bn - i] as usize);
            match cmp_label(la, lb) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        an.cmp(&bn)
    }

    /// Longest common suffix of `self` and `other`, in labels.
    pub fn matched_labels(&self, other: &Name) -> usize {
        let (ao, an) = self.label_offsets();
        let (bo, bn) = other.label_offsets();
        let common = an.min(bn);
        for i in 1..=common {
            let la = self.label_body(ao[an - i] as usize);
            let lb = other.label_body(bo[bn - i] as usize);
            if cmp_label(la, lb) != Ordering::Equal {
                return i - 1;
            }
        }
        common
    }

    /// True iff `self` equals `other` or ends with it on label boundaries.
    pub fn is_subdomain(&self, other: &Name) -> bool {
        self.matched_labels(other) == other.label_count as usize
    }

    fn label_offsets(&self) -> ([u8; 128], usize) {
        let mut offsets = [0u8; 128];
        let mut n = 0usize;
        let mut pos = 0usize;
        while self.wire[pos] != 0 {
            offsets[n] = pos as u8;
            n += 1;
            pos += 1 + self.wire[pos] as usize;
        }
        (offsets, n)
    }

    fn label_body(&self, offset: usize) -> &[u8] {
        let len = self.wire[offset] as usize;
        &self.wire[offset + 1..offset + 1 + len]
    }
}

fn cmp_label(a: &[u8], b: &[u8]) -> Ordering {
    let n = a.len().min(b.len());
    for i in 0..n {
        match a[i].to_ascii_lowercase().cmp(&b[i].to_ascii_lowercase()) {
            Ordering::Equal => continue,
            unequal => return unequal,
        }
    }
    a.len().cmp(&b.len())
}

pub struct LabelIter<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for LabelIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let len = self.rest[0] as usize;
        if len == 0 {
            return None;
        }
        let body = &self.rest[1..1 + len];
        self.rest = &self.rest[1 + len..];
        Some(body)
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        // length octets are <= 63 and therefore never ASCII letters, so
        // folding the whole wire form is safe
        self.wire.eq_ignore_ascii_case(&other.wire)
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.wire.iter() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical_cmp(other)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str(".");
        }
        for label in self.labels() {
            for &b in label {
                if b.is_ascii_graphic() && b != b'.' {
                    write!(f, "{}", b as char)?;
                } else {
                    write!(f, "\\{:03}", b)?;
                }
            }
            f.write_str(".")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_name_parse() {
        // google com
        let raw = hex!("06 676f6f676c65 03 636f6d 00");
        let (name, used) = Name::parse(&raw, 0).unwrap();
        assert_eq!(12, used);
        assert_eq!(2, name.label_count());
        assert_eq!("google.com.", name.to_string());

        // truncated
        assert!(Name::parse(&raw[..11], 0).is_err());
    }

    #[test]
    fn test_name_parse_pointer() {
        // "com" at 0, "www" + pointer to 0 at 5
        let raw = [
            0x03, b'c', b'o', b'm', 0x00, //
            0x03, b'w', b'w', b'w', 0xC0, 0x00,
        ];
        let (name, used) = Name::parse(&raw, 5).unwrap();
        assert_eq!(6, used);
        assert_eq!("www.com.", name.to_string());
    }

    #[test]
    fn test_name_parse_rejects_forward_pointer() {
        let raw = [0xC0, 0x04, 0x00, 0x00, 0x03, b'c', b'o', b'm', 0x00];
        assert!(Name::parse(&raw, 0).is_err());
    }

    #[test]
    fn test_name_parse_rejects_pointer_loop() {
        // two pointers chasing each other
        let raw = [0x00, 0x00, 0xC0, 0x04, 0xC0, 0x02];
        assert!(Name::parse(&raw, 2).is_err());
    }

    #[test]
    fn test_name_from_text() {
        let name = Name::from_text("www.Example.COM.").unwrap();
        assert_eq!(3, name.label_count());
        assert_eq!(name, Name::from_text("WWW.example.com").unwrap());
        assert!(Name::from_text("a..b").is_err());
        assert!(Name::from_text(".").unwrap().is_root());
    }

    #[test]
    fn test_canonical_order() {
        // the ordering example of RFC 4034 section 6.1
        let sorted = [
            "example.",
            "a.example.",
            "yljkjljk.a.example.",
            "Z.a.example.",
            "zABC.a.EXAMPLE.",
            "z.example.",
            "*.z.example.",
        ];
        let names: Vec<Name> = sorted.iter().map(|s| Name::from_text(s).unwrap()).collect();
        for pair in names.windows(2) {
            assert_eq!(
                Ordering::Less,
                pair[0].canonical_cmp(&pair[1]),
                "{} < {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_subdomain() {
        let apex = Name::from_text("example.com.").unwrap();
        let www = Name::from_text("www.example.com.").unwrap();
        let other = Name::from_text("example.org.").unwrap();
        assert!(www.is_subdomain(&apex));
        assert!(apex.is_subdomain(&apex));
        assert!(!apex.is_subdomain(&www));
        assert!(!other.is_subdomain(&apex));
        assert!(www.is_subdomain(&Name::root()));
        assert_eq!(0, www.matched_labels(&other));
    }

    #[test]
    fn test_matched_labels() {
        let a = Name::from_text("x.sub.example.com.").unwrap();
        let b = Name::from_text("y.sub.example.com.").unwrap();
        assert_eq!(3, a.matched_labels(&b));
    }

    #[test]
    fn test_skip_labels_and_parent() {
        let name = Name::from_text("a.b.example.com.").unwrap();
        assert_eq!("b.example.com.", name.skip_labels(1).to_string());
        assert_eq!("example.com.", name.skip_labels(2).to_string());
        assert_eq!("b.example.com.", name.parent().unwrap().to_string());
        assert!(Name::root().parent().is_none());
    }

    #[test]
    fn test_concat_too_long() {
        let label63 = "a".repeat(63);
        let long = Name::from_text(&format!("{0}.{0}.{0}", label63)).unwrap();
        let tail = Name::from_text(&format!("{}.com", label63)).unwrap();
        assert_eq!(Err(ProtoError::TooLong), Name::concat(&long, &tail));
    }

    #[test]
    fn test_wildcard() {
        let parent = Name::from_text("wild.example.com.").unwrap();
        let star = Name::wildcard_of(&parent).unwrap();
        assert!(star.is_wildcard());
        assert_eq!("*.wild.example.com.", star.to_string());
    }

    #[test]
    fn test_make_lower() {
        let mut name = Name::from_text("WwW.ExAmPlE.CoM.").unwrap();
        name.make_lower();
        assert_eq!(b"\x03www\x07example\x03com\x00", name.wire());
    }
}
