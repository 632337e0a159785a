/*!
# DNS Message:
```shell
+---------------------+
|        Header       |
+---------------------+
|       Question      | the question for the name server
+---------------------+
|        Answer       | RRs answering the question
+---------------------+
|      Authority      | RRs pointing toward an authority
+---------------------+
|      Additional     | RRs holding additional information
```

Serialisation and parsing keep separate cursors: a `PacketWriter` only
ever appends (`written` is its buffer length) and a `ParsedPacket`
only ever consumes; the two are never meaningful on the same value.

The writer is a one-way state machine over the sections.  A record
that does not fit the size budget sets the TC flag and is dropped
without error, unless the caller demanded `PUT_NOTRUNC`, in which case
the overflow is a hard `NoSpace`.
*/

use std::sync::Arc;

use super::compress::NameCompressor;
use super::edns::Edns;
use super::header::{Header, HEADER_LEN};
use super::name::Name;
use super::question::Question;
use super::rdata::Rdata;
use super::rrset::RrSet;
use super::tsig::Tsig;
use super::{Class, Type, TYPE_OPT, TYPE_TSIG};
use crate::errors::ProtoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Section {
    Answer,
    Authority,
    Additional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum WriterState {
    Empty,
    Question,
    Answer,
    Authority,
    Additional,
    Frozen,
}

impl Section {
    fn state(self) -> WriterState {
        match self {
            Section::Answer => WriterState::Answer,
            Section::Authority => WriterState::Authority,
            Section::Additional => WriterState::Additional,
        }
    }

    fn index(self) -> usize {
        match self {
            Section::Answer => 0,
            Section::Authority => 1,
            Section::Additional => 2,
        }
    }
}

/// the record must fit; overflow is an error instead of truncation
pub const PUT_NOTRUNC: u8 = 0b0000_0001;
/// skip the record if a set with the same owner and type was written
pub const PUT_CHECKDUP: u8 = 0b0000_0010;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Written,
    /// dropped for space, TC set
    Truncated,
    /// dropped as a duplicate under `PUT_CHECKDUP`
    Duplicate,
}

pub struct PacketWriter {
    buf: Vec<u8>,
    max: usize,
    reserved: usize,
    header: Header,
    state: WriterState,
    section: Option<Section>,
    section_start: usize,
    counts: [u16; 3],
    compr: NameCompressor,
    seen: Vec<(Arc<Name>, Type)>,
}

impl PacketWriter {
    pub fn new(header: Header, max: usize) -> Self {
        PacketWriter {
            buf: vec![0; HEADER_LEN],
            max,
            reserved: 0,
            header,
            state: WriterState::Empty,
            section: None,
            section_start: HEADER_LEN,
            counts: [0; 3],
            compr: NameCompressor::new(),
            seen: Vec::new(),
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    fn budget(&self) -> usize {
        self.max.saturating_sub(self.reserved)
    }

    /// Hold back space at the end of the budget, e.g. for a TSIG RR that
    /// is appended after the packet is frozen.
    pub fn reserve(&mut self, octets: usize) {
        self.reserved += octets;
    }

    /// Give reserved space back, right before writing what it was held
    /// for.
    pub fn release(&mut self, octets: usize) {
        self.reserved = self.reserved.saturating_sub(octets);
    }

    pub fn put_question(&mut self, question: &Question) -> Result<(), ProtoError> {
        if self.state != WriterState::Empty {
            return Err(ProtoError::SectionOrder);
        }
        question.to_wire(&mut self.buf, &mut self.compr);
        self.header.with_qdcount(1);
        self.state = WriterState::Question;
        Ok(())
    }

    /// Open `section`; sections may only advance.
    pub fn begin(&mut self, section: Section) -> Result<(), ProtoError> {
        let next = section.state();
        if next <= self.state {
            return Err(ProtoError::SectionOrder);
        }
        self.state = next;
        self.section = Some(section);
        self.section_start = self.buf.len();
        Ok(())
    }

    /// Serialise a whole RRSet into the current section.
    pub fn put(&mut self, rrset: &RrSet, flags: u8) -> Result<PutOutcome, ProtoError> {
        let section = self.section.ok_or(ProtoError::SectionOrder)?;
        if flags & PUT_CHECKDUP != 0 {
            let dup = self
                .seen
                .iter()
                .any(|(n, t)| *t == rrset.rtype() && n == rrset.owner());
            if dup {
                return Ok(PutOutcome::Duplicate);
            }
        }

        let mark = self.buf.len();
        let budget = self.budget();
        match rrset.to_wire(&mut self.buf, budget, &mut self.compr) {
            Ok(_) => {
                self.counts[section.index()] += rrset.len() as u16;
                self.seen.push((rrset.owner().clone(), rrset.rtype()));
                Ok(PutOutcome::Written)
            }
            Err(ProtoError::NoSpace) => {
                self.buf.truncate(mark);
                self.compr.truncate_to(mark);
                if flags & PUT_NOTRUNC != 0 {
                    Err(ProtoError::NoSpace)
                } else {
                    self.header.with_tc(true);
                    Ok(PutOutcome::Truncated)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Drop everything written into the current section, e.g. the whole
    /// ADDITIONAL section once TC has been set.
    pub fn rollback_section(&mut self) {
        if let Some(section) = self.section {
            self.buf.truncate(self.section_start);
            self.compr.truncate_to(self.section_start);
            self.counts[section.index()] = 0;
        }
    }

    /// Emit the EDNS OPT pseudo record.  It belongs to ADDITIONAL and
    /// must precede a TSIG RR.
    pub fn put_edns(&mut self, edns: &Edns) -> Result<(), ProtoError> {
        if self.state != WriterState::Additional {
            return Err(ProtoError::SectionOrder);
        }
        let mark = self.buf.len();
        edns.to_wire(&mut self.buf);
        if self.buf.len() > self.budget() {
            self.buf.truncate(mark);
            return Err(ProtoError::NoSpace);
        }
        self.counts[Section::Additional.index()] += 1;
        Ok(())
    }

    /// Freeze the packet and reconcile the header counts with the
    /// records actually written.
    pub fn finalise(mut self) -> Vec<u8> {
        self.header
            .with_ancount(self.counts[0])
            .with_nscount(self.counts[1])
            .with_arcount(self.counts[2]);
        self.state = WriterState::Frozen;
        self.buf[..HEADER_LEN].copy_from_slice(self.header.bytes());
        self.buf
    }
}

/// One record as it appeared on the wire, rdata decompressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRr {
    pub owner: Arc<Name>,
    pub rtype: Type,
    pub class: Class,
    pub ttl: u32,
    pub rdata: Rdata,
}

/// A fully parsed message.  The validation rules of the core apply:
/// at most one question, at most one OPT anywhere, a TSIG only as the
/// final record of ADDITIONAL, and no trailing octets.
#[derive(Debug)]
pub struct ParsedPacket {
    pub header: Header,
    pub question: Option<Question>,
    pub answer: Vec<ParsedRr>,
    pub authority: Vec<ParsedRr>,
    pub additional: Vec<ParsedRr>,
    pub edns: Option<Edns>,
    /// the TSIG plus the message offset its RR starts at
    pub tsig: Option<(Tsig, usize)>,
}

impl ParsedPacket {
    pub fn parse(msg: &[u8]) -> Result<Self, ProtoError> {
        if msg.len() < HEADER_LEN {
            return Err(ProtoError::Malformed("message shorter than header"));
        }
        let mut raw = [0u8; HEADER_LEN];
        raw.copy_from_slice(&msg[..HEADER_LEN]);
        let header = Header::from(raw);

        if header.qdcount() > 1 {
            return Err(ProtoError::Malformed("more than one question"));
        }

        let mut pos = HEADER_LEN;
        let question = if header.qdcount() == 1 {
            let (q, used) = Question::parse(msg, pos)?;
            pos += used;
            Some(q)
        } else {
            None
        };

        let mut packet = ParsedPacket {
            header,
            question,
            answer: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
            edns: None,
            tsig: None,
        };

        for _ in 0..packet.header.ancount() {
            let (rr, used, _) = parse_rr(msg, pos)?;
            pos += used;
            if rr.rtype == TYPE_OPT || rr.rtype == TYPE_TSIG {
                return Err(ProtoError::Malformed("meta record outside additional"));
            }
            packet.answer.push(rr);
        }
        for _ in 0..packet.header.nscount() {
            let (rr, used, _) = parse_rr(msg, pos)?;
            pos += used;
            if rr.rtype == TYPE_OPT || rr.rtype == TYPE_TSIG {
                return Err(ProtoError::Malformed("meta record outside additional"));
            }
            packet.authority.push(rr);
        }

        let arcount = packet.header.arcount();
        for i in 0..arcount {
            let (rr, used, start) = parse_rr(msg, pos)?;
            pos += used;
            match rr.rtype {
                TYPE_OPT => {
                    if packet.edns.is_some() {
                        return Err(ProtoError::Malformed("more than one opt record"));
                    }
                    packet.edns = Some(Edns::from_rr_fields(rr.class, rr.ttl, rr.rdata.wire()));
                }
                TYPE_TSIG => {
                    if i != arcount - 1 {
                        return Err(ProtoError::Malformed("tsig is not the final record"));
                    }
                    let tsig = Tsig::from_rr(rr.owner, &rr.rdata)?;
                    packet.tsig = Some((tsig, start));
                }
                _ => packet.additional.push(rr),
            }
        }

        if pos != msg.len() {
            return Err(ProtoError::Malformed("trailing octets after message"));
        }
        Ok(packet)
    }
}

fn parse_rr(msg: &[u8], pos: usize) -> Result<(ParsedRr, usize, usize), ProtoError> {
    let start = pos;
    let (owner, used) = Name::parse(msg, pos)?;
    let mut at = pos + used;
    let fixed = msg
        .get(at..at + 10)
        .ok_or(ProtoError::Malformed("truncated record header"))?;
    let rtype = u16::from_be_bytes([fixed[0], fixed[1]]);
    let class = u16::from_be_bytes([fixed[2], fixed[3]]);
    let ttl = u32::from_be_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);
    let rdlen = u16::from_be_bytes([fixed[8], fixed[9]]) as usize;
    at += 10;
    if at + rdlen > msg.len() {
        return Err(ProtoError::Malformed("truncated rdata"));
    }
    let rdata = Rdata::from_message(rtype, msg, at..at + rdlen)?;
    at += rdlen;
    Ok((
        ParsedRr {
            owner: Arc::new(owner),
            rtype,
            class,
            ttl,
            rdata,
        },
        at - start,
        start,
    ))
}
