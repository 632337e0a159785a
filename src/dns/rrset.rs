use std::sync::Arc;

use super::compress::NameCompressor;
use super::name::Name;
use super::rdata::{self, FieldKind, Rdata};
use super::{Class, Type};
use crate::errors::ProtoError;

/// A single resource record: `(owner, type, class, ttl, rdata)`.
#[derive(Debug, Clone)]
pub struct Rr {
    pub owner: Arc<Name>,
    pub rtype: Type,
    pub class: Class,
    pub ttl: u32,
    pub rdata: Rdata,
}

/**
All records sharing `(owner, type, class)`, with their RDATA kept in
canonical order, plus the RRSIG set covering them when the zone is
signed.  Every RDATA in the set carries the same TTL; a push with a
smaller TTL renormalises the whole set to the minimum.
*/
#[derive(Debug, Clone)]
pub struct RrSet {
    owner: Arc<Name>,
    rtype: Type,
    class: Class,
    ttl: u32,
    rdatas: Vec<Rdata>,
    rrsigs: Option<Arc<RrSet>>,
}

impl RrSet {
    pub fn new(owner: Arc<Name>, rtype: Type, class: Class, ttl: u32) -> Self {
        RrSet {
            owner,
            rtype,
            class,
            ttl,
            rdatas: Vec::new(),
            rrsigs: None,
        }
    }

    pub fn from_rr(rr: Rr) -> Self {
        let mut set = RrSet::new(rr.owner, rr.rtype, rr.class, rr.ttl);
        set.push(rr.rdata, rr.ttl);
        set
    }

    pub fn owner(&self) -> &Arc<Name> {
        &self.owner
    }

    pub fn rtype(&self) -> Type {
        self.rtype
    }

    pub fn class(&self) -> Class {
        self.class
    }

    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    pub fn rdatas(&self) -> &[Rdata] {
        &self.rdatas
    }

    pub fn rdatas_mut(&mut self) -> &mut [Rdata] {
        &mut self.rdatas
    }

    pub fn len(&self) -> usize {
        self.rdatas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rdatas.is_empty()
    }

    pub fn rrsigs(&self) -> Option<&Arc<RrSet>> {
        self.rrsigs.as_ref()
    }

    pub fn set_rrsigs(&mut self, sigs: Option<Arc<RrSet>>) {
        self.rrsigs = sigs;
    }

    /// Give the set a different owner, e.g. when a wildcard set is
    /// synthesised under the query name.
    pub fn set_owner(&mut self, owner: Arc<Name>) {
        self.owner = owner;
    }

    /// Insert one RDATA in canonical position.  Returns false (and keeps
    /// the set unchanged apart from TTL normalisation) on a duplicate.
    pub fn push(&mut self, rdata: Rdata, ttl: u32) -> bool {
        if self.rdatas.is_empty() {
            self.ttl = ttl;
        } else {
            self.ttl = self.ttl.min(ttl);
        }
        match self
            .rdatas
            .binary_search_by(|r| rdata::canonical_cmp(self.rtype, r.wire(), rdata.wire()))
        {
            Ok(_) => false,
            Err(at) => {
                self.rdatas.insert(at, rdata);
                true
            }
        }
    }

    /// Remove the RDATA equal to `rdata` in canonical form.
    pub fn remove(&mut self, rdata: &Rdata) -> bool {
        match self
            .rdatas
            .binary_search_by(|r| rdata::canonical_cmp(self.rtype, r.wire(), rdata.wire()))
        {
            Ok(at) => {
                self.rdatas.remove(at);
                true
            }
            Err(_) => false,
        }
    }

    /// Union with `other`; the TTL becomes the minimum of the two sets.
    /// Signatures are left alone.  Returns the number of duplicates that
    /// were dropped.
    pub fn merge(&mut self, other: &RrSet) -> usize {
        let mut duplicates = 0usize;
        for rdata in &other.rdatas {
            if !self.push(rdata.clone(), other.ttl) {
                duplicates += 1;
            }
        }
        duplicates
    }

    /// Serialise the whole set into `out`, in canonical RDATA order.
    /// Domain names inside the RDATA are compressed only when the field
    /// kind allows it.  Fails with `NoSpace` when the result would
    /// exceed `max`; the caller rolls the buffer back.
    pub fn to_wire(
        &self,
        out: &mut Vec<u8>,
        max: usize,
        compr: &mut NameCompressor,
    ) -> Result<usize, ProtoError> {
        let start = out.len();
        for rdata in &self.rdatas {
            compr.write_name(out, &self.owner, true);
            out.extend_from_slice(&self.rtype.to_be_bytes());
            out.extend_from_slice(&self.class.to_be_bytes());
            out.extend_from_slice(&self.ttl.to_be_bytes());
            let rdlen_at = out.len();
            out.extend_from_slice(&[0, 0]);

            let mut dname_idx = 0usize;
            for field in rdata::fields(self.rtype, rdata.wire()) {
                let (kind, span) = field?;
                if kind.is_dname() {
                    let name = &rdata.dnames()[dname_idx];
                    dname_idx += 1;
                    if kind == FieldKind::CompressedDname {
                        compr.write_name(out, name, true);
                    } else {
                        out.extend_from_slice(name.wire());
                    }
                } else {
                    out.extend_from_slice(&rdata.wire()[span]);
                }
            }

            let rdlen = (out.len() - rdlen_at - 2) as u16;
            out[rdlen_at..rdlen_at + 2].copy_from_slice(&rdlen.to_be_bytes());

            if out.len() > max {
                return Err(ProtoError::NoSpace);
            }
        }
        Ok(out.len() - start)
    }
}
