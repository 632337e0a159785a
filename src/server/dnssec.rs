/*!
Denial-of-existence proofs for negative and referral answers
(RFC 4035 section 3.1.3, RFC 5155 section 7.2).

In an NSEC3 zone the closest-encloser proof for NXDOMAIN is up to
three records: the NSEC3 matching the closest encloser, the one
covering the next-closer name, and the one covering the wildcard at
the encloser.  In small zones those can coincide, so every proof
record is written with duplicate suppression.
*/

use crate::dns::name::Name;
use crate::dns::packet::{PacketWriter, PutOutcome, PUT_CHECKDUP};
use crate::dns::rrset::RrSet;
use crate::dns::{TYPE_NSEC, TYPE_NSEC3};
use crate::errors::ProtoError;
use crate::zone::contents::ZoneContents;
use crate::zone::node::NodeId;

/// Write a set and, when the requestor set DO, the RRSIGs bundled
/// with it.
pub fn put_with_sigs(
    writer: &mut PacketWriter,
    set: &RrSet,
    do_bit: bool,
    flags: u8,
) -> Result<PutOutcome, ProtoError> {
    let outcome = writer.put(set, flags)?;
    if do_bit && outcome == PutOutcome::Written {
        if let Some(sigs) = set.rrsigs() {
            writer.put(sigs, flags)?;
        }
    }
    Ok(outcome)
}

fn put_nsec3_of(
    writer: &mut PacketWriter,
    contents: &ZoneContents,
    id: NodeId,
) -> Result<(), ProtoError> {
    if let Some(set) = contents.node(id).rrset(TYPE_NSEC3) {
        put_with_sigs(writer, set, true, PUT_CHECKDUP)?;
    }
    Ok(())
}

fn put_nsec_of(
    writer: &mut PacketWriter,
    contents: &ZoneContents,
    id: NodeId,
) -> Result<(), ProtoError> {
    if let Some(set) = contents.node(id).rrset(TYPE_NSEC) {
        put_with_sigs(writer, set, true, PUT_CHECKDUP)?;
    }
    Ok(())
}

/// Absence of `qtype` at an existing name.  For a wildcard-sourced
/// NODATA the caller passes the encloser so the next-closer cover can
/// complete the proof.
pub fn put_nodata_proof(
    writer: &mut PacketWriter,
    contents: &ZoneContents,
    qname: &Name,
    node: NodeId,
    wildcard_encloser: Option<NodeId>,
) -> Result<(), ProtoError> {
    if contents.nsec3_params().is_some() {
        match contents.node(node).nsec3_node() {
            Some(hashed) => put_nsec3_of(writer, contents, hashed)?,
            None => {
                if let Some(hashed) = contents.nsec3_matching(contents.node(node).owner()) {
                    put_nsec3_of(writer, contents, hashed)?;
                }
            }
        }
        if let Some(encloser) = wildcard_encloser {
            let next_closer = contents.next_closer(qname, encloser);
            if let Some(cover) = contents.nsec3_covering(&next_closer) {
                put_nsec3_of(writer, contents, cover)?;
            }
        }
    } else {
        put_nsec_of(writer, contents, node)?;
    }
    Ok(())
}

/// The closest-encloser proof: encloser exists, next-closer does not,
/// no wildcard covers the query name.
pub fn put_nxdomain_proof(
    writer: &mut PacketWriter,
    contents: &ZoneContents,
    qname: &Name,
    encloser: NodeId,
    previous: NodeId,
) -> Result<(), ProtoError> {
    if contents.nsec3_params().is_some() {
        match contents.node(encloser).nsec3_node() {
            Some(hashed) => put_nsec3_of(writer, contents, hashed)?,
            None => {
                if let Some(hashed) = contents.nsec3_matching(contents.node(encloser).owner()) {
                    put_nsec3_of(writer, contents, hashed)?;
                }
            }
        }
        let next_closer = contents.next_closer(qname, encloser);
        if let Some(cover) = contents.nsec3_covering(&next_closer) {
            put_nsec3_of(writer, contents, cover)?;
        }
        if let Ok(wildcard) = Name::wildcard_of(contents.node(encloser).owner()) {
            if let Some(cover) = contents.nsec3_covering(&wildcard) {
                put_nsec3_of(writer, contents, cover)?;
            }
        }
    } else {
        // the node canonically before qname carries the covering NSEC
        put_nsec_of(writer, contents, previous)?;
        if let Ok(wildcard) = Name::wildcard_of(contents.node(encloser).owner()) {
            let leq = contents.tree().find_less_equal(&wildcard);
            if let Some(cover) = leq.node {
                put_nsec_of(writer, contents, cover)?;
            }
        }
    }
    Ok(())
}

/// A synthesised wildcard answer proves there was no exact match by
/// covering the next-closer name.
pub fn put_wildcard_answer_proof(
    writer: &mut PacketWriter,
    contents: &ZoneContents,
    qname: &Name,
    encloser: NodeId,
) -> Result<(), ProtoError> {
    if contents.nsec3_params().is_some() {
        let next_closer = contents.next_closer(qname, encloser);
        if let Some(cover) = contents.nsec3_covering(&next_closer) {
            put_nsec3_of(writer, contents, cover)?;
        }
    } else {
        let leq = contents.tree().find_less_equal(qname);
        if let Some(cover) = leq.node {
            put_nsec_of(writer, contents, cover)?;
        }
    }
    Ok(())
}

/// An unsigned delegation in a signed zone proves the DS absence at
/// the cut.
pub fn put_ds_absence_proof(
    writer: &mut PacketWriter,
    contents: &ZoneContents,
    cut: NodeId,
) -> Result<(), ProtoError> {
    if contents.nsec3_params().is_some() {
        match contents.node(cut).nsec3_node() {
            Some(hashed) => put_nsec3_of(writer, contents, hashed)?,
            None => {
                if let Some(hashed) = contents.nsec3_matching(contents.node(cut).owner()) {
                    put_nsec3_of(writer, contents, hashed)?;
                }
            }
        }
    } else {
        put_nsec_of(writer, contents, cut)?;
    }
    Ok(())
}
