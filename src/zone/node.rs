use std::collections::BTreeMap;
use std::sync::Arc;

use crate::dns::name::Name;
use crate::dns::rrset::RrSet;
use crate::dns::Type;

/// Index of a node within its `ZoneContents` arena.  Links between
/// nodes (`parent`, `nsec3_node`) are stored as these indices, so they
/// are weak by construction and never outlive their own zone version.
pub type NodeId = usize;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NodeFlags(u8);

impl NodeFlags {
    const APEX: u8 = 0b0001;
    const DELEGATION: u8 = 0b0010;
    const NON_AUTH: u8 = 0b0100;
    const EMPTY_NON_TERMINAL: u8 = 0b1000;

    pub fn is_apex(self) -> bool {
        self.0 & Self::APEX != 0
    }

    pub fn set_apex(&mut self) {
        self.0 |= Self::APEX;
    }

    /// a non-apex node with an NS RRset; authority below it is ceded
    pub fn is_delegation(self) -> bool {
        self.0 & Self::DELEGATION != 0
    }

    pub fn set_delegation(&mut self) {
        self.0 |= Self::DELEGATION;
    }

    /// below a zone cut (glue territory)
    pub fn is_non_auth(self) -> bool {
        self.0 & Self::NON_AUTH != 0
    }

    pub fn set_non_auth(&mut self) {
        self.0 |= Self::NON_AUTH;
    }

    /// carries no RRsets of its own, exists only because of descendants
    pub fn is_empty_non_terminal(self) -> bool {
        self.0 & Self::EMPTY_NON_TERMINAL != 0
    }

    pub fn set_empty_non_terminal(&mut self) {
        self.0 |= Self::EMPTY_NON_TERMINAL;
    }
}

/// One owner name and its RRsets.  Cloning a node is shallow: the
/// owner and the sets are shared, which is what lets a zone update
/// copy the arena cheaply.
#[derive(Debug, Clone)]
pub struct Node {
    owner: Arc<Name>,
    rrsets: BTreeMap<Type, Arc<RrSet>>,
    flags: NodeFlags,
    parent: Option<NodeId>,
    nsec3_node: Option<NodeId>,
}

impl Node {
    pub fn new(owner: Arc<Name>) -> Self {
        Node {
            owner,
            rrsets: BTreeMap::new(),
            flags: NodeFlags::default(),
            parent: None,
            nsec3_node: None,
        }
    }

    pub fn owner(&self) -> &Arc<Name> {
        &self.owner
    }

    pub fn rrset(&self, rtype: Type) -> Option<&Arc<RrSet>> {
        self.rrsets.get(&rtype)
    }

    pub fn has_type(&self, rtype: Type) -> bool {
        self.rrsets.contains_key(&rtype)
    }

    pub fn rrsets(&self) -> &BTreeMap<Type, Arc<RrSet>> {
        &self.rrsets
    }

    pub(crate) fn rrsets_mut(&mut self) -> &mut BTreeMap<Type, Arc<RrSet>> {
        &mut self.rrsets
    }

    pub fn types(&self) -> Vec<Type> {
        self.rrsets.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rrsets.is_empty()
    }

    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    pub(crate) fn set_flags(&mut self, flags: NodeFlags) {
        self.flags = flags;
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: Option<NodeId>) {
        self.parent = parent;
    }

    /// The node in the NSEC3 tree whose owner is the hashed form of
    /// this node's owner; only meaningful when the zone has NSEC3
    /// parameters.
    pub fn nsec3_node(&self) -> Option<NodeId> {
        self.nsec3_node
    }

    pub(crate) fn set_nsec3_node(&mut self, id: Option<NodeId>) {
        self.nsec3_node = id;
    }
}
