/*!
An immutable-once-published snapshot of a zone: the apex, the plain
and NSEC3 trees over one node arena, and the NSEC3 parameters.

Readers hold an `Arc<ZoneContents>` and traverse without locking; a
writer builds the next version beside it and swaps it in atomically
(see `slot`).  Before a version becomes publishable it runs the
adjust pass, in this order:

1. NSEC3 parameters are loaded from the apex NSEC3PARAM RRset.
2. Every rdata domain-name field that resolves inside the zone is
   swapped for the zone's interned owner name (identity sharing).
3. A canonical walk sets node flags (apex, delegation point,
   non-authoritative, empty non-terminal), parent links, and for each
   authoritative node the link to its NSEC3 node.

The pass is idempotent: a second run recomputes the same values.
*/

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::node::{Node, NodeFlags, NodeId};
use super::nsec3::{self, Nsec3Params, NSEC3_HASH_SHA1};
use super::tree::ZoneTree;
use crate::dns::name::Name;
use crate::dns::rdata;
use crate::dns::rrset::{Rr, RrSet};
use crate::dns::{
    Type, TYPE_DNSKEY, TYPE_NS, TYPE_NSEC3, TYPE_NSEC3PARAM, TYPE_RRSIG, TYPE_SOA,
};
use crate::errors::ZoneError;

#[derive(Debug, Clone)]
pub struct ZoneContents {
    arena: Vec<Node>,
    apex: NodeId,
    tree: ZoneTree,
    nsec3_tree: ZoneTree,
    nsec3: Option<Nsec3Params>,
}

/// Result of the closest-encloser search for a query name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameLookup {
    Match {
        node: NodeId,
    },
    /// No exact match: the longest existing ancestor and the canonical
    /// predecessor of the query name.
    Miss {
        encloser: NodeId,
        previous: NodeId,
    },
    OutOfZone,
}

impl ZoneContents {
    pub fn new(origin: Arc<Name>) -> Self {
        let mut tree = ZoneTree::new();
        let apex_node = Node::new(origin.clone());
        tree.insert(origin, 0).ok();
        ZoneContents {
            arena: vec![apex_node],
            apex: 0,
            tree,
            nsec3_tree: ZoneTree::new(),
            nsec3: None,
        }
    }

    pub fn apex_id(&self) -> NodeId {
        self.apex
    }

    pub fn apex(&self) -> &Node {
        &self.arena[self.apex]
    }

    pub fn apex_name(&self) -> &Arc<Name> {
        self.arena[self.apex].owner()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.arena[id]
    }

    pub fn tree(&self) -> &ZoneTree {
        &self.tree
    }

    pub fn nsec3_tree(&self) -> &ZoneTree {
        &self.nsec3_tree
    }

    pub fn nsec3_params(&self) -> Option<&Nsec3Params> {
        self.nsec3.as_ref()
    }

    pub fn node_count(&self) -> usize {
        self.tree.len()
    }

    pub fn serial(&self) -> Option<u32> {
        let soa = self.apex().rrset(TYPE_SOA)?;
        rdata::soa_serial(soa.rdatas().first()?.wire())
    }

    pub fn is_signed(&self) -> bool {
        let apex = self.apex();
        apex.has_type(TYPE_DNSKEY)
            || apex
                .rrset(TYPE_SOA)
                .map(|soa| soa.rrsigs().is_some())
                .unwrap_or(false)
    }

    /// Add one record.  NSEC3 records (and their signatures) go into
    /// the hashed-name tree; everything else lands in the plain tree,
    /// creating empty non-terminal intermediates as needed.
    pub fn insert_rr(&mut self, rr: Rr) -> Result<(), ZoneError> {
        if !rr.owner.is_subdomain(self.apex_name()) {
            return Err(ZoneError::OutOfZone);
        }
        let hashed_side = nsec3_sided(&rr);
        let id = self.find_or_create(&rr.owner, hashed_side)?;
        let node = &mut self.arena[id];
        match node.rrsets_mut().entry(rr.rtype) {
            Entry::Occupied(mut occupied) => {
                Arc::make_mut(occupied.get_mut()).push(rr.rdata, rr.ttl);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(RrSet::from_rr(rr)));
            }
        }
        Ok(())
    }

    /// Remove one record; empty RRsets are dropped, and nodes that end
    /// up empty with no descendants are pruned (stranded empty
    /// non-terminals included).
    pub fn remove_rr(&mut self, rr: &Rr) -> bool {
        let hashed_side = nsec3_sided(rr);
        let tree = if hashed_side {
            &self.nsec3_tree
        } else {
            &self.tree
        };
        let Some(id) = tree.get(&rr.owner) else {
            return false;
        };
        let node = &mut self.arena[id];
        let Some(set_arc) = node.rrsets_mut().get_mut(&rr.rtype) else {
            return false;
        };
        let set = Arc::make_mut(set_arc);
        let removed = set.remove(&rr.rdata);
        if set.is_empty() {
            node.rrsets_mut().remove(&rr.rtype);
        }
        if removed {
            self.prune(&rr.owner, hashed_side);
        }
        removed
    }

    /// Replace the apex SOA RRset wholesale.
    pub(crate) fn replace_soa(&mut self, rr: &Rr) -> Result<(), ZoneError> {
        if &rr.owner != self.apex_name() {
            return Err(ZoneError::ConstraintViolation("soa owner is not the apex"));
        }
        let owner = self.apex_name().clone();
        let mut set = RrSet::new(owner, rr.rtype, rr.class, rr.ttl);
        set.push(rr.rdata.clone(), rr.ttl);
        self.arena[self.apex]
            .rrsets_mut()
            .insert(TYPE_SOA, Arc::new(set));
        Ok(())
    }

    fn find_or_create(&mut self, owner: &Arc<Name>, hashed_side: bool) -> Result<NodeId, ZoneError> {
        let tree = if hashed_side {
            &self.nsec3_tree
        } else {
            &self.tree
        };
        if let Some(id) = tree.get(owner) {
            return Ok(id);
        }

        let id = self.arena.len();
        self.arena.push(Node::new(owner.clone()));
        if hashed_side {
            self.nsec3_tree.insert(owner.clone(), id)?;
            return Ok(id);
        }
        self.tree.insert(owner.clone(), id)?;

        // materialise empty non-terminals up to the first existing
        // ancestor, so NODATA/NXDOMAIN decisions stay exact
        let apex_labels = self.apex_name().label_count();
        let mut ancestor = owner.parent();
        while let Some(name) = ancestor {
            if name.label_count() <= apex_labels || self.tree.get(&name).is_some() {
                break;
            }
            let ent_id = self.arena.len();
            let interned = Arc::new(name.clone());
            self.arena.push(Node::new(interned.clone()));
            self.tree.insert(interned, ent_id)?;
            ancestor = name.parent();
        }
        Ok(id)
    }

    fn prune(&mut self, owner: &Name, hashed_side: bool) {
        let apex_labels = self.apex_name().label_count();
        let mut name = owner.clone();
        loop {
            let tree = if hashed_side {
                &self.nsec3_tree
            } else {
                &self.tree
            };
            let Some(id) = tree.get(&name) else { break };
            if id == self.apex {
                break;
            }
            if !self.arena[id].is_empty() || self.has_descendants(&name, hashed_side) {
                break;
            }
            if hashed_side {
                self.nsec3_tree.remove(&name);
            } else {
                self.tree.remove(&name);
            }
            match name.parent() {
                Some(parent) if parent.label_count() > apex_labels => name = parent,
                _ => break,
            }
        }
    }

    fn has_descendants(&self, name: &Name, hashed_side: bool) -> bool {
        let tree = if hashed_side {
            &self.nsec3_tree
        } else {
            &self.tree
        };
        tree.next_after(name)
            .map(|id| self.arena[id].owner().is_subdomain(name))
            .unwrap_or(false)
    }

    /// Closest-encloser search: `find_less_equal` on the plain tree,
    /// then a parent walk from the predecessor until an ancestor of the
    /// query name is reached.  Terminates at the apex for every name in
    /// bailiwick.
    pub fn find_name(&self, qname: &Name) -> NameLookup {
        if !qname.is_subdomain(self.apex_name()) {
            return NameLookup::OutOfZone;
        }
        let leq = self.tree.find_less_equal(qname);
        let Some(at_or_before) = leq.node else {
            return NameLookup::OutOfZone;
        };
        if leq.matched {
            return NameLookup::Match { node: at_or_before };
        }

        let mut encloser = at_or_before;
        while !qname.is_subdomain(self.arena[encloser].owner()) {
            match self.arena[encloser].parent() {
                Some(parent) => encloser = parent,
                None => break,
            }
        }
        NameLookup::Miss {
            encloser,
            previous: at_or_before,
        }
    }

    /// `*.<encloser>` if present.
    pub fn wildcard_at(&self, encloser: NodeId) -> Option<NodeId> {
        let star = Name::wildcard_of(self.arena[encloser].owner()).ok()?;
        self.tree.get(&star)
    }

    /// One more label of `qname` than the encloser owns.
    pub fn next_closer(&self, qname: &Name, encloser: NodeId) -> Name {
        let encloser_labels = self.arena[encloser].owner().label_count();
        qname.skip_labels(qname.label_count() - encloser_labels - 1)
    }

    /// NSEC3 node whose owner is `H(name).<apex>`, if any.
    pub fn nsec3_matching(&self, name: &Name) -> Option<NodeId> {
        let params = self.nsec3.as_ref()?;
        let hashed = nsec3::hashed_owner(name, params, self.apex_name()).ok()?;
        self.nsec3_tree.get(&hashed)
    }

    /// NSEC3 node canonically covering `H(name).<apex>` (strict
    /// predecessor, circular).
    pub fn nsec3_covering(&self, name: &Name) -> Option<NodeId> {
        let params = self.nsec3.as_ref()?;
        let hashed = nsec3::hashed_owner(name, params, self.apex_name()).ok()?;
        self.nsec3_tree.previous(&hashed)
    }

    /// The adjust pass; see the module documentation for the phases.
    pub fn adjust(&mut self) -> Result<(), ZoneError> {
        self.bundle_rrsigs();
        self.load_nsec3_params()?;
        self.intern_rdata_names();
        self.link_and_flag()?;
        debug!(
            apex = %self.apex_name(),
            nodes = self.node_count(),
            nsec3 = self.nsec3.is_some(),
            "zone adjusted"
        );
        Ok(())
    }

    /// Move loose RRSIG sets into the signature bundle of the set they
    /// cover.  Signatures whose covered set is absent stay where they
    /// are.
    fn bundle_rrsigs(&mut self) {
        let ids: Vec<NodeId> = self
            .tree
            .iter()
            .map(|(_, id)| id)
            .chain(self.nsec3_tree.iter().map(|(_, id)| id))
            .collect();

        for id in ids {
            let node = &mut self.arena[id];
            let Some(loose) = node.rrsets_mut().remove(&TYPE_RRSIG) else {
                continue;
            };

            let mut by_covered: BTreeMap<Type, RrSet> = BTreeMap::new();
            let mut unmatched = RrSet::new(
                loose.owner().clone(),
                TYPE_RRSIG,
                loose.class(),
                loose.ttl(),
            );
            for sig in loose.rdatas() {
                let Some(covered) = rdata::rrsig_type_covered(sig.wire()) else {
                    unmatched.push(sig.clone(), loose.ttl());
                    continue;
                };
                if node.has_type(covered) {
                    by_covered
                        .entry(covered)
                        .or_insert_with(|| {
                            RrSet::new(
                                loose.owner().clone(),
                                TYPE_RRSIG,
                                loose.class(),
                                loose.ttl(),
                            )
                        })
                        .push(sig.clone(), loose.ttl());
                } else {
                    unmatched.push(sig.clone(), loose.ttl());
                }
            }

            for (covered, sigs) in by_covered {
                if let Some(target) = node.rrsets_mut().get_mut(&covered) {
                    Arc::make_mut(target).set_rrsigs(Some(Arc::new(sigs)));
                }
            }
            if !unmatched.is_empty() {
                node.rrsets_mut().insert(TYPE_RRSIG, Arc::new(unmatched));
            }
        }
    }

    fn load_nsec3_params(&mut self) -> Result<(), ZoneError> {
        let params = match self.arena[self.apex].rrset(TYPE_NSEC3PARAM) {
            Some(set) if !set.is_empty() => {
                Some(Nsec3Params::from_rdata(set.rdatas()[0].wire())?)
            }
            _ => None,
        };
        if let Some(p) = &params {
            if p.algorithm != NSEC3_HASH_SHA1 {
                return Err(ZoneError::ConstraintViolation(
                    "unsupported nsec3 hash algorithm",
                ));
            }
        }
        self.nsec3 = params;
        Ok(())
    }

    /// Swap every in-zone rdata dname target for the interned owner of
    /// the node it resolves to.  Copy-on-write: a shared RRset is only
    /// cloned when one of its targets actually changes.
    fn intern_rdata_names(&mut self) {
        let ids: Vec<NodeId> = self
            .tree
            .iter()
            .map(|(_, id)| id)
            .chain(self.nsec3_tree.iter().map(|(_, id)| id))
            .collect();

        let mut replacements: Vec<(NodeId, Type, usize, usize, Arc<Name>)> = Vec::new();
        for id in &ids {
            let node = &self.arena[*id];
            for (rtype, set) in node.rrsets() {
                for (rdata_at, rdata) in set.rdatas().iter().enumerate() {
                    for (dname_at, target) in rdata.dnames().iter().enumerate() {
                        let Some(target_id) = self.tree.get(target) else {
                            continue;
                        };
                        let interned = self.arena[target_id].owner();
                        if !Arc::ptr_eq(target, interned) {
                            replacements.push((*id, *rtype, rdata_at, dname_at, interned.clone()));
                        }
                    }
                }
            }
        }

        for (id, rtype, rdata_at, dname_at, interned) in replacements {
            if let Some(set_arc) = self.arena[id].rrsets_mut().get_mut(&rtype) {
                let set = Arc::make_mut(set_arc);
                set.rdatas_mut()[rdata_at].set_dname(dname_at, interned);
            }
        }
    }

    /// Canonical walk: parent links, node flags, NSEC3 links.
    fn link_and_flag(&mut self) -> Result<(), ZoneError> {
        let apex_name = self.apex_name().clone();
        let ids: Vec<NodeId> = self.tree.iter().map(|(_, id)| id).collect();

        for id in ids {
            let (parent, flags, nsec3_link) = {
                let node = &self.arena[id];
                let owner = node.owner();

                let parent = if id == self.apex {
                    None
                } else {
                    let pname = owner
                        .parent()
                        .ok_or(ZoneError::InvariantViolation("node above the apex"))?;
                    let pid = self
                        .tree
                        .get(&pname)
                        .ok_or(ZoneError::InvariantViolation("missing parent node"))?;
                    Some(pid)
                };

                let mut flags = NodeFlags::default();
                if id == self.apex {
                    flags.set_apex();
                }
                let under_cut = parent
                    .map(|p| {
                        let pf = self.arena[p].flags();
                        pf.is_delegation() || pf.is_non_auth()
                    })
                    .unwrap_or(false);
                if under_cut {
                    flags.set_non_auth();
                } else if id != self.apex && node.has_type(TYPE_NS) {
                    flags.set_delegation();
                }
                if node.is_empty() {
                    flags.set_empty_non_terminal();
                }

                let nsec3_link = match &self.nsec3 {
                    Some(params) if !flags.is_non_auth() => {
                        nsec3::hashed_owner(owner, params, &apex_name)
                            .ok()
                            .and_then(|hashed| self.nsec3_tree.get(&hashed))
                    }
                    _ => None,
                };

                (parent, flags, nsec3_link)
            };

            let node = &mut self.arena[id];
            node.set_parent(parent);
            node.set_flags(flags);
            node.set_nsec3_node(nsec3_link);
        }
        Ok(())
    }
}

fn nsec3_sided(rr: &Rr) -> bool {
    rr.rtype == TYPE_NSEC3
        || (rr.rtype == TYPE_RRSIG
            && rdata::rrsig_type_covered(rr.rdata.wire()) == Some(TYPE_NSEC3))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::rdata::Rdata;
    use crate::dns::{CLASS_IN, TYPE_A};
    use std::net::Ipv4Addr;

    fn name(text: &str) -> Arc<Name> {
        Arc::new(Name::from_text(text).unwrap())
    }

    fn a_rr(owner: &str, addr: [u8; 4]) -> Rr {
        Rr {
            owner: name(owner),
            rtype: TYPE_A,
            class: CLASS_IN,
            ttl: 300,
            rdata: Rdata::from(Ipv4Addr::from(addr)),
        }
    }

    fn ns_rr(owner: &str, target: &str) -> Rr {
        let mut wire = Vec::new();
        wire.extend_from_slice(Name::from_text(target).unwrap().wire());
        Rr {
            owner: name(owner),
            rtype: TYPE_NS,
            class: CLASS_IN,
            ttl: 300,
            rdata: Rdata::parse(TYPE_NS, &wire).unwrap(),
        }
    }

    fn soa_rr(owner: &str, serial: u32) -> Rr {
        let mut wire = Vec::new();
        wire.extend_from_slice(Name::from_text("ns1.example.com.").unwrap().wire());
        wire.extend_from_slice(Name::from_text("admin.example.com.").unwrap().wire());
        for v in [serial, 7200, 3600, 1209600, 300] {
            wire.extend_from_slice(&v.to_be_bytes());
        }
        Rr {
            owner: name(owner),
            rtype: TYPE_SOA,
            class: CLASS_IN,
            ttl: 3600,
            rdata: Rdata::parse(TYPE_SOA, &wire).unwrap(),
        }
    }

    fn fixture() -> ZoneContents {
        let mut zone = ZoneContents::new(name("example.com."));
        zone.insert_rr(soa_rr("example.com.", 1)).unwrap();
        zone.insert_rr(ns_rr("example.com.", "ns1.example.com.")).unwrap();
        zone.insert_rr(a_rr("ns1.example.com.", [192, 0, 2, 53])).unwrap();
        zone.insert_rr(a_rr("www.example.com.", [192, 0, 2, 1])).unwrap();
        zone.insert_rr(ns_rr("sub.example.com.", "ns1.sub.example.com.")).unwrap();
        zone.insert_rr(a_rr("ns1.sub.example.com.", [192, 0, 2, 2])).unwrap();
        zone.insert_rr(a_rr("a.b.example.com.", [192, 0, 2, 3])).unwrap();
        zone.adjust().unwrap();
        zone
    }

    #[test]
    fn test_insert_out_of_zone() {
        let mut zone = ZoneContents::new(name("example.com."));
        assert_eq!(
            Err(ZoneError::OutOfZone),
            zone.insert_rr(a_rr("www.example.org.", [192, 0, 2, 1]))
        );
    }

    #[test]
    fn test_owners_stay_in_bailiwick() {
        let zone = fixture();
        for (owner, _) in zone.tree().iter() {
            assert!(owner.is_subdomain(zone.apex_name()));
        }
    }

    #[test]
    fn test_empty_non_terminal_created() {
        let zone = fixture();
        let ent = zone.tree().get(&Name::from_text("b.example.com.").unwrap());
        let id = ent.expect("intermediate node must exist");
        assert!(zone.node(id).flags().is_empty_non_terminal());

        match zone.find_name(&Name::from_text("b.example.com.").unwrap()) {
            NameLookup::Match { .. } => {}
            other => panic!("expected a match, got {:?}", other),
        }
    }

    #[test]
    fn test_flags_after_adjust() {
        let zone = fixture();
        assert!(zone.apex().flags().is_apex());
        assert!(!zone.apex().flags().is_delegation());

        let sub = zone.tree().get(&Name::from_text("sub.example.com.").unwrap()).unwrap();
        assert!(zone.node(sub).flags().is_delegation());

        let glue = zone
            .tree()
            .get(&Name::from_text("ns1.sub.example.com.").unwrap())
            .unwrap();
        assert!(zone.node(glue).flags().is_non_auth());

        let www = zone.tree().get(&Name::from_text("www.example.com.").unwrap()).unwrap();
        assert!(!zone.node(www).flags().is_non_auth());
        assert_eq!(Some(zone.apex_id()), zone.node(www).parent());
    }

    #[test]
    fn test_interning_shares_identity() {
        let zone = fixture();
        let ns = zone.apex().rrset(TYPE_NS).unwrap();
        let target = &ns.rdatas()[0].dnames()[0];
        let ns1 = zone.tree().get(&Name::from_text("ns1.example.com.").unwrap()).unwrap();
        assert!(Arc::ptr_eq(target, zone.node(ns1).owner()));
    }

    #[test]
    fn test_adjust_is_idempotent() {
        let mut zone = fixture();
        let flags_before: Vec<_> = zone.tree().iter().map(|(_, id)| zone.node(id).flags()).collect();
        let parents_before: Vec<_> = zone.tree().iter().map(|(_, id)| zone.node(id).parent()).collect();
        let ns_target_before = {
            let ns = zone.apex().rrset(TYPE_NS).unwrap();
            ns.rdatas()[0].dnames()[0].clone()
        };

        zone.adjust().unwrap();

        let flags_after: Vec<_> = zone.tree().iter().map(|(_, id)| zone.node(id).flags()).collect();
        let parents_after: Vec<_> = zone.tree().iter().map(|(_, id)| zone.node(id).parent()).collect();
        let ns_target_after = {
            let ns = zone.apex().rrset(TYPE_NS).unwrap();
            ns.rdatas()[0].dnames()[0].clone()
        };

        assert_eq!(flags_before, flags_after);
        assert_eq!(parents_before, parents_after);
        assert!(Arc::ptr_eq(&ns_target_before, &ns_target_after));
    }

    #[test]
    fn test_find_name_closest_encloser() {
        let zone = fixture();
        match zone.find_name(&Name::from_text("nope.example.com.").unwrap()) {
            NameLookup::Miss { encloser, .. } => {
                assert_eq!(zone.apex_id(), encloser);
            }
            other => panic!("expected a miss, got {:?}", other),
        }

        match zone.find_name(&Name::from_text("deep.under.b.example.com.").unwrap()) {
            NameLookup::Miss { encloser, .. } => {
                assert_eq!("b.example.com.", zone.node(encloser).owner().to_string());
                let next_closer =
                    zone.next_closer(&Name::from_text("deep.under.b.example.com.").unwrap(), encloser);
                assert_eq!("under.b.example.com.", next_closer.to_string());
            }
            other => panic!("expected a miss, got {:?}", other),
        }

        assert_eq!(
            NameLookup::OutOfZone,
            zone.find_name(&Name::from_text("www.example.org.").unwrap())
        );
    }

    #[test]
    fn test_remove_prunes_empty_branches() {
        let mut zone = fixture();
        assert!(zone.remove_rr(&a_rr("a.b.example.com.", [192, 0, 2, 3])));
        assert!(zone.tree().get(&Name::from_text("a.b.example.com.").unwrap()).is_none());
        // the stranded empty non-terminal goes too
        assert!(zone.tree().get(&Name::from_text("b.example.com.").unwrap()).is_none());
        // repeated removal reports false
        assert!(!zone.remove_rr(&a_rr("a.b.example.com.", [192, 0, 2, 3])));
    }
}
