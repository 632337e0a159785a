/*!
Applying a changeset to a published zone builds the next version
beside it: the node arena is copied shallowly (names and RRsets stay
shared through `Arc`), only the nodes the changeset touches are
materialised anew, and the adjust pass then re-derives flags and
links.  The base version is never modified, so readers that still
hold it keep a coherent snapshot.
*/

use tracing::info;

use super::contents::ZoneContents;
use crate::dns::rdata;
use crate::dns::rrset::Rr;
use crate::dns::TYPE_SOA;
use crate::errors::ZoneError;

/// An ordered pair of record collections to apply atomically, with
/// optional SOA markers delimiting the serial transition.
#[derive(Debug, Default, Clone)]
pub struct Changeset {
    pub remove: Vec<Rr>,
    pub add: Vec<Rr>,
    /// SOA of the version this changeset applies to
    pub soa_from: Option<Rr>,
    /// SOA of the version this changeset produces
    pub soa_to: Option<Rr>,
}

impl Changeset {
    /// The SOA that will end up at the apex: the explicit `soa_to`
    /// marker, or an SOA among the additions.
    fn new_soa(&self) -> Option<&Rr> {
        self.soa_to
            .as_ref()
            .or_else(|| self.add.iter().find(|rr| rr.rtype == TYPE_SOA))
    }
}

/// RFC 1982 sequence-space comparison: is `a` ahead of `b`?
pub fn serial_gt(a: u32, b: u32) -> bool {
    let diff = a.wrapping_sub(b);
    diff != 0 && diff < 0x8000_0000
}

/// Produce the successor of `base` under `changeset`.  The result has
/// been adjusted and is ready to publish; `base` is untouched.
pub fn apply(base: &ZoneContents, changeset: &Changeset) -> Result<ZoneContents, ZoneError> {
    let current = base
        .serial()
        .ok_or(ZoneError::ConstraintViolation("zone has no SOA"))?;

    if let Some(soa_from) = &changeset.soa_from {
        let expected = rdata::soa_serial(soa_from.rdata.wire())
            .ok_or(ZoneError::ConstraintViolation("bad soa rdata in changeset"))?;
        if expected != current {
            return Err(ZoneError::ConstraintViolation(
                "changeset does not apply to this zone version",
            ));
        }
    }

    let new_soa = changeset.new_soa();
    let next_serial = match new_soa {
        Some(rr) => rdata::soa_serial(rr.rdata.wire())
            .ok_or(ZoneError::ConstraintViolation("bad soa rdata in changeset"))?,
        None => current,
    };
    if !serial_gt(next_serial, current) {
        return Err(ZoneError::SerialNotAdvancing {
            current,
            next: next_serial,
        });
    }

    let removes_apex_soa = changeset
        .remove
        .iter()
        .any(|rr| rr.rtype == TYPE_SOA && &rr.owner == base.apex_name());
    if removes_apex_soa && new_soa.is_none() {
        return Err(ZoneError::ConstraintViolation(
            "changeset removes the apex SOA without replacement",
        ));
    }

    let mut next = base.clone();
    for rr in &changeset.remove {
        if rr.rtype == TYPE_SOA && &rr.owner == base.apex_name() {
            continue; // replaced wholesale below
        }
        next.remove_rr(rr);
    }
    for rr in &changeset.add {
        if rr.rtype == TYPE_SOA && &rr.owner == base.apex_name() {
            continue;
        }
        next.insert_rr(rr.clone())?;
    }
    if let Some(soa) = new_soa {
        next.replace_soa(soa)?;
    }

    next.adjust()?;
    info!(
        apex = %next.apex_name(),
        from = current,
        to = next_serial,
        "zone update applied"
    );
    Ok(next)
}
