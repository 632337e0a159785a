/*!
Read-side protection for zone swaps.

A `ZoneSlot` holds the currently published `ZoneContents` behind an
atomic pointer.  Readers take a full `Arc` snapshot and traverse with
no lock at all; a writer builds the next version, takes the per-zone
writer mutex, and publishes with one pointer store.  A superseded
version lives for exactly as long as the last straggling reader keeps
its `Arc` alive, which is the whole grace period.
*/

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use tracing::{error, info};

use super::contents::ZoneContents;
use super::update::{self, Changeset};
use crate::dns::name::Name;
use crate::errors::ZoneError;

pub struct ZoneSlot {
    origin: Arc<Name>,
    current: ArcSwap<ZoneContents>,
    write_lock: Mutex<()>,
    quarantined: AtomicBool,
}

impl ZoneSlot {
    pub fn new(contents: ZoneContents) -> Self {
        ZoneSlot {
            origin: contents.apex_name().clone(),
            current: ArcSwap::from_pointee(contents),
            write_lock: Mutex::new(()),
            quarantined: AtomicBool::new(false),
        }
    }

    pub fn origin(&self) -> &Arc<Name> {
        &self.origin
    }

    /// The snapshot a request resolves against; coherent for as long
    /// as the caller holds it.
    pub fn snapshot(&self) -> Arc<ZoneContents> {
        self.current.load_full()
    }

    /// Atomically swap in a new version.
    pub fn publish(&self, contents: Arc<ZoneContents>) {
        info!(apex = %self.origin, serial = ?contents.serial(), "zone published");
        self.current.store(contents);
    }

    /// Serialised writer path: apply a changeset against the current
    /// version and publish the result.
    pub fn update(&self, changeset: &Changeset) -> Result<(), ZoneError> {
        let _writer = self
            .write_lock
            .lock()
            .map_err(|_| ZoneError::InvariantViolation("zone writer lock poisoned"))?;
        let base = self.snapshot();
        let next = update::apply(&base, changeset)?;
        self.publish(Arc::new(next));
        Ok(())
    }

    /// Taken out of service after an internal invariant broke; queries
    /// answer SERVFAIL until the writer repairs and republishes.
    pub fn quarantine(&self, reason: &str) {
        error!(apex = %self.origin, reason, "zone quarantined");
        self.quarantined.store(true, Ordering::Release);
    }

    pub fn is_quarantined(&self) -> bool {
        self.quarantined.load(Ordering::Acquire)
    }
}

/// The set of served zones, selected by longest apex suffix of the
/// query name.  Built at startup and passed around explicitly.
#[derive(Default)]
pub struct Catalog {
    zones: BTreeMap<Arc<Name>, Arc<ZoneSlot>>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog {
            zones: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, slot: Arc<ZoneSlot>) {
        self.zones.insert(slot.origin().clone(), slot);
    }

    /// The zone whose apex is the longest suffix of `qname`, if any.
    pub fn find(&self, qname: &Name) -> Option<&Arc<ZoneSlot>> {
        for skip in 0..=qname.label_count() {
            let suffix = qname.skip_labels(skip);
            if let Some(slot) = self.zones.get(&suffix) {
                return Some(slot);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ZoneSlot>> + '_ {
        self.zones.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::name::Name;
    use crate::dns::rdata::Rdata;
    use crate::dns::rrset::Rr;
    use crate::dns::{CLASS_IN, TYPE_A, TYPE_SOA};
    use std::net::Ipv4Addr;

    fn name(text: &str) -> Arc<Name> {
        Arc::new(Name::from_text(text).unwrap())
    }

    fn soa_rr(origin: &str, serial: u32) -> Rr {
        let mut wire = Vec::new();
        wire.extend_from_slice(Name::from_text("ns1.example.com.").unwrap().wire());
        wire.extend_from_slice(Name::from_text("admin.example.com.").unwrap().wire());
        for v in [serial, 7200, 3600, 1209600, 300] {
            wire.extend_from_slice(&v.to_be_bytes());
        }
        Rr {
            owner: name(origin),
            rtype: TYPE_SOA,
            class: CLASS_IN,
            ttl: 3600,
            rdata: Rdata::parse(TYPE_SOA, &wire).unwrap(),
        }
    }

    fn zone(origin: &str, serial: u32) -> ZoneContents {
        let mut z = ZoneContents::new(name(origin));
        z.insert_rr(soa_rr(origin, serial)).unwrap();
        z.adjust().unwrap();
        z
    }

    #[test]
    fn test_snapshot_survives_publish() {
        let slot = ZoneSlot::new(zone("example.com.", 1));
        let old = slot.snapshot();
        slot.publish(Arc::new(zone("example.com.", 2)));
        // the straggler still reads version 1; new readers see 2
        assert_eq!(Some(1), old.serial());
        assert_eq!(Some(2), slot.snapshot().serial());
    }

    #[test]
    fn test_update_applies_changesets_in_order() {
        let slot = ZoneSlot::new(zone("example.com.", 1));
        for serial in 2..=5u32 {
            let changeset = Changeset {
                add: vec![Rr {
                    owner: name(&format!("h{}.example.com.", serial)),
                    rtype: TYPE_A,
                    class: CLASS_IN,
                    ttl: 60,
                    rdata: Rdata::from(Ipv4Addr::new(192, 0, 2, serial as u8)),
                }],
                soa_to: Some(soa_rr("example.com.", serial)),
                ..Default::default()
            };
            slot.update(&changeset).unwrap();
        }
        // with no concurrent readers the visible version is exactly the
        // final update's
        let current = slot.snapshot();
        assert_eq!(Some(5), current.serial());
        assert_eq!(5, current.tree().len()); // apex plus four hosts
    }

    #[test]
    fn test_catalog_longest_suffix_wins() {
        let mut catalog = Catalog::new();
        catalog.insert(Arc::new(ZoneSlot::new(zone("example.com.", 1))));
        catalog.insert(Arc::new(ZoneSlot::new(zone("sub.example.com.", 1))));

        let inner = catalog
            .find(&Name::from_text("www.sub.example.com.").unwrap())
            .unwrap();
        assert_eq!("sub.example.com.", inner.origin().to_string());

        let outer = catalog.find(&Name::from_text("www.example.com.").unwrap()).unwrap();
        assert_eq!("example.com.", outer.origin().to_string());

        assert!(catalog.find(&Name::from_text("www.example.org.").unwrap()).is_none());
    }

    #[test]
    fn test_quarantine_flag() {
        let slot = ZoneSlot::new(zone("example.com.", 1));
        assert!(!slot.is_quarantined());
        slot.quarantine("dangling nsec3 link");
        assert!(slot.is_quarantined());
    }
}
