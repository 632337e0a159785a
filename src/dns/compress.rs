use super::name::Name;

/// Pointer targets are 14 bits wide.
const MAX_POINTER: usize = 0x3FFF;

/**
Per-packet name compression state.

Every name written into the message registers each of its label
suffixes together with the buffer offset that suffix starts at.  A
later name is scanned suffix-by-suffix against the table; the longest
match is emitted as a pointer after the unmatched leading labels.
Matching is case-insensitive and always on whole-label boundaries.
*/
#[derive(Debug, Default)]
pub struct NameCompressor {
    entries: Vec<(Vec<u8>, u16)>,
}

impl NameCompressor {
    pub fn new() -> Self {
        NameCompressor {
            entries: Vec::new(),
        }
    }

    /// Serialise `name` at the current end of `out`.  With `compress`
    /// false the name is still remembered as a pointer target but is
    /// written in full.
    pub fn write_name(&mut self, out: &mut Vec<u8>, name: &Name, compress: bool) {
        let start = out.len();
        let wire = name.wire();

        let mut label_offs = Vec::with_capacity(name.label_count());
        let mut pos = 0usize;
        while wire[pos] != 0 {
            label_offs.push(pos);
            pos += 1 + wire[pos] as usize;
        }

        if compress {
            for (i, &off) in label_offs.iter().enumerate() {
                if let Some(ptr) = self.lookup(&wire[off..]) {
                    out.extend_from_slice(&wire[..off]);
                    out.extend_from_slice(&(0xC000u16 | ptr).to_be_bytes());
                    self.remember(wire, &label_offs[..i], start);
                    return;
                }
            }
        }
        out.extend_from_slice(wire);
        self.remember(wire, &label_offs, start);
    }

    fn lookup(&self, suffix: &[u8]) -> Option<u16> {
        self.entries
            .iter()
            .find(|(s, _)| s.eq_ignore_ascii_case(suffix))
            .map(|(_, o)| *o)
    }

    fn remember(&mut self, wire: &[u8], label_offs: &[usize], start: usize) {
        for &off in label_offs {
            let abs = start + off;
            if abs > MAX_POINTER {
                continue;
            }
            if self.lookup(&wire[off..]).is_none() {
                self.entries.push((wire[off..].to_vec(), abs as u16));
            }
        }
    }

    /// Forget every target at or past `offset`; used when a record that
    /// did not fit is rolled back out of the buffer.
    pub fn truncate_to(&mut self, offset: usize) {
        self.entries.retain(|(_, o)| (*o as usize) < offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_name_points_at_first() {
        let mut compr = NameCompressor::new();
        let mut out = vec![0u8; 12]; // pretend header
        let first = Name::from_text("example.com.").unwrap();
        let second = Name::from_text("www.example.com.").unwrap();

        compr.write_name(&mut out, &first, true);
        let after_first = out.len();
        compr.write_name(&mut out, &second, true);

        // "www" label plus a pointer back to offset 12
        assert_eq!(
            &[0x03, b'w', b'w', b'w', 0xC0, 12],
            &out[after_first..]
        );
    }

    #[test]
    fn test_match_is_case_insensitive() {
        let mut compr = NameCompressor::new();
        let mut out = Vec::new();
        compr.write_name(&mut out, &Name::from_text("Example.COM.").unwrap(), true);
        let mark = out.len();
        compr.write_name(&mut out, &Name::from_text("mail.example.com.").unwrap(), true);
        assert_eq!(&[0x04, b'm', b'a', b'i', b'l', 0xC0, 0], &out[mark..]);
    }

    #[test]
    fn test_no_partial_label_match() {
        let mut compr = NameCompressor::new();
        let mut out = Vec::new();
        compr.write_name(&mut out, &Name::from_text("ns.example.com.").unwrap(), true);
        let mark = out.len();
        // "xample.com" is a substring but not a label suffix
        compr.write_name(&mut out, &Name::from_text("xample.com.").unwrap(), true);
        // only "com" may be shared
        assert_eq!(
            &[0x06, b'x', b'a', b'm', b'p', b'l', b'e', 0xC0, 11],
            &out[mark..]
        );
    }

    #[test]
    fn test_truncate_to_forgets_targets() {
        let mut compr = NameCompressor::new();
        let mut out = Vec::new();
        compr.write_name(&mut out, &Name::from_text("a.example.").unwrap(), true);
        let mark = out.len();
        compr.write_name(&mut out, &Name::from_text("b.example.").unwrap(), true);
        out.truncate(mark);
        compr.truncate_to(mark);
        // nothing may point past the rollback point any more
        compr.write_name(&mut out, &Name::from_text("b.example.").unwrap(), true);
        assert!(out.len() > mark + 2, "must not be a bare dangling pointer");
    }
}
