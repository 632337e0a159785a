/*!
The query state machine: classify the request, resolve it against the
zone snapshot, fill the sections under the DNSSEC rules, finalise.

```shell
BEGIN -> CLASSIFY -> RESOLVE -> ANSWER
                           \-> REFERRAL
                           \-> NODATA
                           \-> NXDOMAIN
                           \-> CNAME chain -> (RESOLVE)
then AUTHORITY -> ADDITIONAL -> SIGN -> DONE
any state -> ERROR (set RCODE) -> DONE
```

One request resolves against exactly one `ZoneContents` snapshot; all
records copied into the response belong to that version.
*/

use std::sync::Arc;

use tracing::debug;

use super::dnssec;
use crate::dns::edns::Edns;
use crate::dns::header::{Header, HEADER_LEN};
use crate::dns::name::Name;
use crate::dns::packet::{
    PacketWriter, ParsedPacket, PutOutcome, Section, PUT_CHECKDUP,
};
use crate::dns::question::Question;
use crate::dns::rrset::RrSet;
use crate::dns::tsig::{self, Tsig, TsigKey, TsigKeyring};
use crate::dns::{
    CLASS_ANY, CLASS_IN, MAX_UDP_PAYLOAD, OPCODE_NOTIFY, OPCODE_QUERY, OPCODE_UPDATE,
    RCODE_FORMERR, RCODE_NOTAUTH, RCODE_NOTIMP, RCODE_NXDOMAIN, RCODE_REFUSED, RCODE_SERVFAIL,
    TYPE_A, TYPE_AAAA, TYPE_ANY, TYPE_AXFR, TYPE_CNAME, TYPE_DS, TYPE_IXFR, TYPE_MX, TYPE_NS,
    TYPE_OPT, TYPE_SOA, TYPE_SRV, TYPE_TSIG,
};
use crate::errors::ProtoError;
use crate::zone::contents::{NameLookup, ZoneContents};
use crate::zone::node::NodeId;
use crate::zone::slot::Catalog;

/// aliases are followed at most this many times within one response
pub const CNAME_CHASE_LIMIT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryKind {
    Normal,
    Axfr,
    Ixfr,
    Notify,
    Update,
    Invalid,
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Answer,
    Nodata {
        node: NodeId,
        wildcard_encloser: Option<NodeId>,
    },
    Nxdomain {
        encloser: NodeId,
        previous: NodeId,
    },
    Referral {
        cut: NodeId,
    },
}

/// Resolves one request buffer into one response buffer against the
/// zones of a catalog.  Owned by the frontend; one instance serves
/// every worker.
pub struct QueryHandler {
    catalog: Arc<Catalog>,
    keyring: Arc<TsigKeyring>,
    udp_payload: u16,
}

impl QueryHandler {
    pub fn new(catalog: Arc<Catalog>, keyring: Arc<TsigKeyring>, udp_payload: u16) -> Self {
        QueryHandler {
            catalog,
            keyring,
            udp_payload: udp_payload.max(MAX_UDP_PAYLOAD as u16),
        }
    }

    /// Turn a request into a response, or `None` when the input does
    /// not deserve one (short garbage, or a response packet).
    pub fn handle(&self, wire: &[u8], transport: Transport, now: u64) -> Option<Vec<u8>> {
        let req = match ParsedPacket::parse(wire) {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, "dropping malformed request");
                return self.formerr_raw(wire);
            }
        };
        if req.header.qr() {
            return None;
        }

        let mut signer: Option<(TsigKey, Tsig)> = None;
        if let Some((req_tsig, offset)) = &req.tsig {
            match tsig::verify_request(wire, *offset, req_tsig, &self.keyring, now) {
                Ok(()) => {
                    if let Some(key) = self.keyring.get(&req_tsig.key_name) {
                        signer = Some((key.clone(), req_tsig.clone()));
                    }
                }
                Err(code) => return Some(self.tsig_refusal(&req, req_tsig, code, now)),
            }
        }

        let Some(question) = req.question.clone() else {
            return Some(self.error_response(&req, RCODE_FORMERR));
        };
        if question.qclass != CLASS_IN && question.qclass != CLASS_ANY {
            return Some(self.error_response(&req, RCODE_REFUSED));
        }

        match classify(&req.header, &question) {
            QueryKind::Normal => {}
            QueryKind::Invalid => return Some(self.error_response(&req, RCODE_FORMERR)),
            QueryKind::Axfr | QueryKind::Ixfr | QueryKind::Notify | QueryKind::Update => {
                return Some(self.error_response(&req, RCODE_NOTIMP));
            }
        }

        let Some(slot) = self.catalog.find(&question.qname) else {
            return Some(self.error_response(&req, RCODE_REFUSED));
        };
        if slot.is_quarantined() {
            return Some(self.error_response(&req, RCODE_SERVFAIL));
        }

        let contents = slot.snapshot();
        match self.resolve(&req, &question, &contents, transport, &signer, now) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                slot.quarantine("response assembly broke an invariant");
                debug!(error = %e, qname = %question.qname, "resolution failed");
                Some(self.error_response(&req, RCODE_SERVFAIL))
            }
        }
    }

    fn resolve(
        &self,
        req: &ParsedPacket,
        question: &Question,
        contents: &ZoneContents,
        transport: Transport,
        signer: &Option<(TsigKey, Tsig)>,
        now: u64,
    ) -> Result<Vec<u8>, ProtoError> {
        let do_bit = req.edns.as_ref().map(|e| e.do_bit).unwrap_or(false);
        let signed = contents.is_signed();
        let max = match transport {
            Transport::Tcp => u16::MAX as usize,
            Transport::Udp => {
                let client = req
                    .edns
                    .as_ref()
                    .map(|e| e.payload as usize)
                    .unwrap_or(MAX_UDP_PAYLOAD);
                client.clamp(MAX_UDP_PAYLOAD, self.udp_payload as usize)
            }
        };

        let mut header = Header::new();
        header
            .with_id(req.header.id())
            .with_qr(true)
            .with_rd(req.header.rd())
            .with_aa(true);
        let mut writer = PacketWriter::new(header, max);

        let opt_reserve = if req.edns.is_some() { 11 } else { 0 };
        let tsig_reserve = signer
            .as_ref()
            .map(|(key, _)| tsig_overhead(key))
            .unwrap_or(0);
        writer.reserve(opt_reserve + tsig_reserve);

        writer.put_question(question)?;
        writer.begin(Section::Answer)?;

        let mut qname = question.qname.clone();
        let qtype = question.qtype;
        let mut chase = 0usize;
        let mut additional_targets: Vec<Arc<Name>> = Vec::new();
        let mut wildcard_proofs: Vec<(Arc<Name>, NodeId)> = Vec::new();

        let outcome = loop {
            match contents.find_name(&qname) {
                // a chased alias left the zone; answer with what we have
                NameLookup::OutOfZone => break Outcome::Answer,

                NameLookup::Match { node } => {
                    let n = contents.node(node);
                    if n.flags().is_non_auth()
                        || (n.flags().is_delegation() && qtype != TYPE_DS)
                    {
                        if let Some(cut) = find_cut(contents, node) {
                            break Outcome::Referral { cut };
                        }
                    }
                    if qtype == TYPE_ANY {
                        if n.is_empty() {
                            break Outcome::Nodata {
                                node,
                                wildcard_encloser: None,
                            };
                        }
                        for set in n.rrsets().values() {
                            put_answer_set(&mut writer, set, do_bit, &mut additional_targets, 0)?;
                        }
                        break Outcome::Answer;
                    }
                    if let Some(set) = n.rrset(qtype) {
                        put_answer_set(&mut writer, set, do_bit, &mut additional_targets, 0)?;
                        break Outcome::Answer;
                    }
                    if let Some(cname) = n.rrset(TYPE_CNAME) {
                        let put = put_answer_set(
                            &mut writer,
                            cname,
                            do_bit,
                            &mut additional_targets,
                            PUT_CHECKDUP,
                        )?;
                        if put == PutOutcome::Duplicate {
                            break Outcome::Answer; // alias loop
                        }
                        let target = cname
                            .rdatas()
                            .first()
                            .and_then(|r| r.dnames().first())
                            .cloned();
                        match target {
                            Some(next)
                                if next.is_subdomain(contents.apex_name())
                                    && chase < CNAME_CHASE_LIMIT =>
                            {
                                chase += 1;
                                qname = next;
                                continue;
                            }
                            _ => break Outcome::Answer,
                        }
                    }
                    break Outcome::Nodata {
                        node,
                        wildcard_encloser: None,
                    };
                }

                NameLookup::Miss { encloser, previous } => {
                    let enc = contents.node(encloser);
                    if enc.flags().is_delegation() || enc.flags().is_non_auth() {
                        if let Some(cut) = find_cut(contents, encloser) {
                            break Outcome::Referral { cut };
                        }
                    }
                    if let Some(wild) = contents.wildcard_at(encloser) {
                        let wnode = contents.node(wild);
                        // wildcard synthesis never promotes a delegation
                        if let Some(set) = wnode.rrset(qtype) {
                            let synth = synthesize(set, &qname);
                            put_answer_set(&mut writer, &synth, do_bit, &mut additional_targets, 0)?;
                            if signed && do_bit {
                                wildcard_proofs.push((qname.clone(), encloser));
                            }
                            break Outcome::Answer;
                        }
                        if let Some(cname) = wnode.rrset(TYPE_CNAME) {
                            let synth = synthesize(cname, &qname);
                            let put = put_answer_set(
                                &mut writer,
                                &synth,
                                do_bit,
                                &mut additional_targets,
                                PUT_CHECKDUP,
                            )?;
                            if signed && do_bit {
                                wildcard_proofs.push((qname.clone(), encloser));
                            }
                            if put == PutOutcome::Duplicate {
                                break Outcome::Answer;
                            }
                            let target = synth
                                .rdatas()
                                .first()
                                .and_then(|r| r.dnames().first())
                                .cloned();
                            match target {
                                Some(next)
                                    if next.is_subdomain(contents.apex_name())
                                        && chase < CNAME_CHASE_LIMIT =>
                                {
                                    chase += 1;
                                    qname = next;
                                    continue;
                                }
                                _ => break Outcome::Answer,
                            }
                        }
                        break Outcome::Nodata {
                            node: wild,
                            wildcard_encloser: Some(encloser),
                        };
                    }
                    break Outcome::Nxdomain { encloser, previous };
                }
            }
        };

        writer.begin(Section::Authority)?;
        for (synth_qname, encloser) in &wildcard_proofs {
            dnssec::put_wildcard_answer_proof(&mut writer, contents, synth_qname, *encloser)?;
        }
        match outcome {
            Outcome::Answer => {}
            Outcome::Nodata {
                node,
                wildcard_encloser,
            } => {
                put_soa(&mut writer, contents, signed && do_bit)?;
                if signed && do_bit {
                    dnssec::put_nodata_proof(
                        &mut writer,
                        contents,
                        &question.qname,
                        node,
                        wildcard_encloser,
                    )?;
                }
            }
            Outcome::Nxdomain { encloser, previous } => {
                writer.header_mut().with_rcode(RCODE_NXDOMAIN);
                put_soa(&mut writer, contents, signed && do_bit)?;
                if signed && do_bit {
                    dnssec::put_nxdomain_proof(
                        &mut writer,
                        contents,
                        &question.qname,
                        encloser,
                        previous,
                    )?;
                }
            }
            Outcome::Referral { cut } => {
                writer.header_mut().with_aa(false);
                let cut_node = contents.node(cut);
                if let Some(ns) = cut_node.rrset(TYPE_NS) {
                    writer.put(ns, 0)?;
                    collect_targets(ns, &mut additional_targets);
                }
                if signed && do_bit {
                    if let Some(ds) = cut_node.rrset(TYPE_DS) {
                        dnssec::put_with_sigs(&mut writer, ds, true, 0)?;
                    } else {
                        dnssec::put_ds_absence_proof(&mut writer, contents, cut)?;
                    }
                }
            }
        }

        writer.begin(Section::Additional)?;
        if !writer.header().tc() {
            'additional: for target in &additional_targets {
                if !target.is_subdomain(contents.apex_name()) {
                    continue; // never chase out of bailiwick
                }
                let Some(id) = contents.tree().get(target) else {
                    continue;
                };
                for rtype in [TYPE_A, TYPE_AAAA] {
                    if let Some(set) = contents.node(id).rrset(rtype) {
                        let put = dnssec::put_with_sigs(&mut writer, set, do_bit, PUT_CHECKDUP)?;
                        if put == PutOutcome::Truncated {
                            break 'additional;
                        }
                    }
                }
            }
            if writer.header().tc() {
                // truncation drops the whole section, not just the rest
                writer.rollback_section();
            }
        }
        writer.release(opt_reserve);
        if req.edns.is_some() {
            writer.put_edns(&Edns::new(self.udp_payload))?;
        }

        let mut bytes = writer.finalise();
        if let Some((key, req_tsig)) = signer {
            tsig::sign_response(&mut bytes, key, req_tsig, now, 0)?;
        }
        Ok(bytes)
    }

    /// A minimal RCODE-only reply echoing id, opcode, RD, question and
    /// EDNS presence.
    fn error_response(&self, req: &ParsedPacket, rcode: u8) -> Vec<u8> {
        let mut header = Header::new();
        header
            .with_id(req.header.id())
            .with_qr(true)
            .with_opcode(req.header.opcode())
            .with_rd(req.header.rd())
            .with_rcode(rcode);
        let mut writer = PacketWriter::new(header, MAX_UDP_PAYLOAD);
        if let Some(question) = &req.question {
            let _ = writer.put_question(question);
        }
        if req.edns.is_some() {
            let _ = writer.begin(Section::Additional);
            let _ = writer.put_edns(&Edns::new(self.udp_payload));
        }
        writer.finalise()
    }

    /// FORMERR for a buffer that did not parse, when at least the
    /// header is there to echo.
    fn formerr_raw(&self, wire: &[u8]) -> Option<Vec<u8>> {
        if wire.len() < HEADER_LEN {
            return None;
        }
        let mut raw = [0u8; HEADER_LEN];
        raw.copy_from_slice(&wire[..HEADER_LEN]);
        let req_header = Header::from(raw);
        if req_header.qr() {
            return None;
        }
        let mut header = Header::new();
        header
            .with_id(req_header.id())
            .with_qr(true)
            .with_opcode(req_header.opcode())
            .with_rd(req_header.rd())
            .with_rcode(RCODE_FORMERR);
        Some(PacketWriter::new(header, MAX_UDP_PAYLOAD).finalise())
    }

    /// NOTAUTH carrying the TSIG error code, RFC 8945 section 5.2.
    fn tsig_refusal(&self, req: &ParsedPacket, req_tsig: &Tsig, code: u16, now: u64) -> Vec<u8> {
        let mut bytes = self.error_response(req, RCODE_NOTAUTH);
        let key = self
            .keyring
            .get(&req_tsig.key_name)
            .cloned()
            .unwrap_or_else(|| TsigKey {
                name: req_tsig.key_name.clone(),
                algorithm: req_tsig.algorithm.clone(),
                secret: Vec::new(),
            });
        if tsig::sign_response(&mut bytes, &key, req_tsig, now, code).is_err() {
            debug!("failed to attach tsig error to refusal");
        }
        bytes
    }
}

fn classify(header: &Header, question: &Question) -> QueryKind {
    match header.opcode() {
        OPCODE_QUERY => match question.qtype {
            TYPE_AXFR => QueryKind::Axfr,
            TYPE_IXFR => QueryKind::Ixfr,
            TYPE_OPT | TYPE_TSIG => QueryKind::Invalid,
            _ => QueryKind::Normal,
        },
        OPCODE_NOTIFY => QueryKind::Notify,
        OPCODE_UPDATE => QueryKind::Update,
        _ => QueryKind::Invalid,
    }
}

/// The topmost delegation at or above `id`; where the referral points.
fn find_cut(contents: &ZoneContents, mut id: NodeId) -> Option<NodeId> {
    loop {
        let node = contents.node(id);
        if node.flags().is_delegation() && !node.flags().is_non_auth() {
            return Some(id);
        }
        id = node.parent()?;
    }
}

fn put_answer_set(
    writer: &mut PacketWriter,
    set: &RrSet,
    do_bit: bool,
    targets: &mut Vec<Arc<Name>>,
    flags: u8,
) -> Result<PutOutcome, ProtoError> {
    let outcome = dnssec::put_with_sigs(writer, set, do_bit, flags)?;
    if outcome == PutOutcome::Written {
        collect_targets(set, targets);
    }
    Ok(outcome)
}

fn collect_targets(set: &RrSet, targets: &mut Vec<Arc<Name>>) {
    if matches!(set.rtype(), TYPE_NS | TYPE_MX | TYPE_SRV) {
        for rdata in set.rdatas() {
            for name in rdata.dnames() {
                targets.push(name.clone());
            }
        }
    }
}

fn put_soa(
    writer: &mut PacketWriter,
    contents: &ZoneContents,
    with_sigs: bool,
) -> Result<(), ProtoError> {
    if let Some(soa) = contents.apex().rrset(TYPE_SOA) {
        if with_sigs {
            dnssec::put_with_sigs(writer, soa, true, 0)?;
        } else {
            writer.put(soa, 0)?;
        }
    }
    Ok(())
}

/// A wildcard set under the query name: owner swapped, rdata shared in
/// value, signatures re-owned alongside.
fn synthesize(set: &Arc<RrSet>, owner: &Arc<Name>) -> RrSet {
    let mut synth = (**set).clone();
    synth.set_owner(owner.clone());
    let sigs = set.rrsigs().map(|sigs| {
        let mut re_owned = (**sigs).clone();
        re_owned.set_owner(owner.clone());
        Arc::new(re_owned)
    });
    synth.set_rrsigs(sigs);
    synth
}

/// Worst-case size of the TSIG RR appended after finalise.
fn tsig_overhead(key: &TsigKey) -> usize {
    key.name.len() + 10 + key.algorithm.len() + 6 + 2 + 2 + 32 + 2 + 2 + 2
}
