use std::sync::Arc;

use super::compress::NameCompressor;
use super::name::Name;
use super::{Class, Type};
use crate::errors::ProtoError;

/**
The question section is used to carry the "question" in most queries,
i.e., the parameters that define what is being asked.
# Question Structure:
```shell
                                1  1  1  1  1  1
  0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                                               |
/                     QNAME                     /
/                                               /
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                     QTYPE                     |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
|                     QCLASS                    |
+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
```
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub qname: Arc<Name>,
    pub qtype: Type,
    pub qclass: Class,
}

impl Question {
    pub fn new(qname: Arc<Name>, qtype: Type, qclass: Class) -> Self {
        Question {
            qname,
            qtype,
            qclass,
        }
    }

    /// Parse one question entry out of a message at `pos`; returns the
    /// entry and the number of octets consumed.
    pub fn parse(msg: &[u8], pos: usize) -> Result<(Self, usize), ProtoError> {
        let (qname, used) = Name::parse(msg, pos)?;
        let fixed = pos + used;
        let raw = msg
            .get(fixed..fixed + 4)
            .ok_or(ProtoError::Malformed("truncated question"))?;
        let qtype = u16::from_be_bytes([raw[0], raw[1]]);
        let qclass = u16::from_be_bytes([raw[2], raw[3]]);
        Ok((
            Question {
                qname: Arc::new(qname),
                qtype,
                qclass,
            },
            used + 4,
        ))
    }

    pub fn to_wire(&self, out: &mut Vec<u8>, compr: &mut NameCompressor) {
        compr.write_name(out, &self.qname, true);
        out.extend_from_slice(&self.qtype.to_be_bytes());
        out.extend_from_slice(&self.qclass.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{CLASS_IN, TYPE_A};

    #[test]
    fn test_question_roundtrip() {
        let q = Question::new(
            Arc::new(Name::from_text("www.example.com.").unwrap()),
            TYPE_A,
            CLASS_IN,
        );
        let mut out = Vec::new();
        let mut compr = NameCompressor::new();
        q.to_wire(&mut out, &mut compr);

        let (parsed, used) = Question::parse(&out, 0).unwrap();
        assert_eq!(out.len(), used);
        assert_eq!(q, parsed);
    }

    #[test]
    fn test_question_truncated() {
        let raw = [0x03, b'w', b'w', b'w', 0x00, 0x00];
        assert!(Question::parse(&raw, 0).is_err());
    }
}
