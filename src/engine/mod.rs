//! The damping engine proper: penalty bookkeeping, the reuse wheel and
//! non-reuse sweeps, and the per-family configuration lifecycle.
//!
//! All mutation is synchronous on one logical execution context; the
//! timer tasks in [`timer`] and the route-event handlers dispatch onto
//! the same engine behind one lock, so none of the list or wheel
//! operations need their own.

pub mod timer;

use std::collections::HashMap;
use std::error;
use std::fmt;

use chrono::{DateTime, Utc};
use log::{debug, info, trace, warn};

use crate::arena::{Arena, LinkSet, ListHead, RecordKey};
use crate::config::{ConfigBlock, ConfigGroup, ConfigSource};
use crate::params::EngineTuning;
use crate::record::{PenaltyRecord, RouteEvent};
use crate::route::{Family, PathAttributes, PeerSort, RouteId, RouteMapEval, RouteStore};
use crate::wheel::ReuseWheel;

/// Penalty added per unreachability event
const UNREACH_FLAP_PENALTY: f64 = 1000.0;

/// What the caller should do with the route after a damping decision
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DampOutcome {
    /// No record is attached; nothing to do
    None,
    /// Process the route normally
    Use,
    /// Keep the route hidden from selection and advertisement
    Damped,
}

#[derive(Debug)]
pub enum DampError {
    /// Rejected threshold set; no partial configuration was applied
    InvalidConfig(String),
    /// Expected list/slot membership was not found
    Inconsistency(&'static str),
}

impl fmt::Display for DampError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Damping Error: ")?;
        match self {
            DampError::InvalidConfig(reason) => write!(f, "{}", reason),
            DampError::Inconsistency(reason) => write!(f, "inconsistent state: {}", reason),
        }
    }
}

impl error::Error for DampError {}

/// Route flap damping engine for one protocol instance.
///
/// Owns every penalty record, the reuse wheel, and the per-family
/// configuration groups. Records are arena-allocated and addressed by
/// stable integer keys; routes are correlated through an index keyed by
/// `(RouteId, Family)` rather than back-pointers.
pub struct DampEngine {
    pub(crate) tuning: EngineTuning,
    pub(crate) records: Arena<PenaltyRecord>,
    pub(crate) blocks: Arena<ConfigBlock>,
    pub(crate) groups: HashMap<Family, ConfigGroup>,
    pub(crate) wheel: ReuseWheel,
    pub(crate) no_reuse: ListHead,
    pub(crate) by_route: HashMap<(RouteId, Family), RecordKey>,
    store: Box<dyn RouteStore + Send>,
    route_maps: Box<dyn RouteMapEval + Send>,
}

impl DampEngine {
    pub fn new(
        tuning: EngineTuning,
        store: Box<dyn RouteStore + Send>,
        route_maps: Box<dyn RouteMapEval + Send>,
    ) -> Self {
        Self {
            wheel: ReuseWheel::new(tuning.wheel_size),
            tuning,
            records: Arena::new(),
            blocks: Arena::new(),
            groups: HashMap::new(),
            no_reuse: ListHead::default(),
            by_route: HashMap::new(),
            store,
            route_maps,
        }
    }

    pub fn tuning(&self) -> &EngineTuning {
        &self.tuning
    }

    // --- Configuration lifecycle -------------------------------------

    /// Enable damping for a family, or replace its existing
    /// configuration. Static parameters are validated before the old
    /// configuration is touched.
    pub fn create_or_update_config(
        &mut self,
        family: Family,
        source: ConfigSource,
    ) -> Result<(), DampError> {
        if let ConfigSource::Static(params) = &source {
            params.validate()?;
        }
        self.delete_config(family);
        let mut group = ConfigGroup::new(source);
        if let ConfigSource::Static(params) = &group.source {
            let block = ConfigBlock::new(*params, &self.tuning);
            group.default_block = Some(self.blocks.insert(block));
        }
        info!("damping enabled for {}", family);
        self.groups.insert(family, group);
        Ok(())
    }

    /// Disable damping for a family, synchronously destroying every
    /// record created under it. Returns whether a configuration
    /// existed.
    pub fn delete_config(&mut self, family: Family) -> bool {
        let group = match self.groups.remove(&family) {
            Some(group) => group,
            None => return false,
        };
        for block_key in group.block_keys() {
            self.release_block(block_key);
        }
        info!("damping disabled for {}", family);
        true
    }

    /// Rebuild a family's decay tables from its current source, e.g.
    /// after an operator edit. Implemented as disable + re-enable, so
    /// existing records are released.
    pub fn restart_config(&mut self, family: Family) -> Result<(), DampError> {
        let source = match self.groups.get(&family) {
            Some(group) => group.source.clone(),
            None => {
                return Err(DampError::InvalidConfig(format!(
                    "damping is not configured for {}",
                    family
                )))
            }
        };
        self.create_or_update_config(family, source)
    }

    /// Drop all flap history for a family, keeping its configuration.
    /// Returns the number of records cleared.
    pub fn clear_flap_stats(&mut self, family: Family) -> usize {
        let keys: Vec<RecordKey> = self
            .by_route
            .iter()
            .filter(|((_, rec_family), _)| *rec_family == family)
            .map(|(_, &key)| key)
            .collect();
        for &key in &keys {
            self.destroy_record(key);
        }
        keys.len()
    }

    /// Drop flap history for a single route
    pub fn clear_route_flap(&mut self, route: &RouteId, family: Family) -> bool {
        match self.by_route.get(&(*route, family)) {
            Some(&key) => {
                self.destroy_record(key);
                true
            }
            None => false,
        }
    }

    // --- Event handlers ----------------------------------------------

    /// The route became unreachable (withdrawn or invalidated)
    pub fn on_unreachable(
        &mut self,
        route: &RouteId,
        family: Family,
        peer_sort: PeerSort,
        attributes: &PathAttributes,
    ) -> DampOutcome {
        self.on_unreachable_at(route, family, peer_sort, attributes, Utc::now())
    }

    pub(crate) fn on_unreachable_at(
        &mut self,
        route: &RouteId,
        family: Family,
        peer_sort: PeerSort,
        attributes: &PathAttributes,
        now: DateTime<Utc>,
    ) -> DampOutcome {
        if let Some(&key) = self.by_route.get(&(*route, family)) {
            return self.flap_existing(key, now);
        }
        if !peer_sort.is_external() {
            return DampOutcome::Use;
        }
        let block_key = match self.resolve_block(family, route, attributes) {
            Some(key) => key,
            None => return DampOutcome::Use,
        };
        // Low-threshold blocks can have a ceiling below the flap
        // increment; the first penalty is clamped like any other
        let penalty = match self.blocks.get(block_key) {
            Some(block) => UNREACH_FLAP_PENALTY.min(block.tables.ceiling),
            None => return DampOutcome::Use,
        };
        let record = PenaltyRecord::new(*route, family, block_key, penalty, now);
        let key = self.records.insert(record);
        self.attach_no_reuse(key);
        if let Some(block) = self.blocks.get_mut(block_key) {
            self.records.push_front(&mut block.records, LinkSet::Cfg, key);
        }
        self.by_route.insert((*route, family), key);
        debug!("damping: tracking {} [{}]", route, family);
        DampOutcome::Use
    }

    /// Penalize an existing record for another unreachability event and
    /// re-home it on the proper list.
    fn flap_existing(&mut self, key: RecordKey, now: DateTime<Utc>) -> DampOutcome {
        let (block_key, penalty, last_update, suppressed) = match self.records.get(key) {
            Some(rec) => (rec.block, rec.penalty, rec.last_update, rec.is_suppressed()),
            None => return DampOutcome::Use,
        };
        let computed = self.blocks.get(block_key).map(|block| {
            let decayed = block
                .tables
                .decay(penalty, now - last_update, RouteEvent::Unreach);
            let penalty = (decayed + UNREACH_FLAP_PENALTY).min(block.tables.ceiling);
            let ticks = block.tables.reuse_offset(penalty, RouteEvent::Unreach);
            (penalty, ticks)
        });
        let (penalty, ticks) = match computed {
            Some(computed) => computed,
            None => {
                self.discard_record(key, DampError::Inconsistency("missing config block"));
                return DampOutcome::Use;
            }
        };
        if let Some(rec) = self.records.get_mut(key) {
            rec.penalty = penalty;
            rec.flap_count += 1;
            rec.last_update = now;
            rec.last_event = RouteEvent::Unreach;
        }
        if let Err(err) = self.detach_sched(key) {
            self.discard_record(key, err);
            return DampOutcome::Use;
        }
        if suppressed {
            let slot = self.wheel.slot_index(ticks);
            if !self.attach_wheel(key, slot) {
                return DampOutcome::Use;
            }
            trace!("damping: flap while suppressed, requeued at slot {}", slot);
            DampOutcome::Damped
        } else {
            self.attach_no_reuse(key);
            DampOutcome::Use
        }
    }

    /// The route was (re-)announced
    pub fn on_reachable(&mut self, route: &RouteId, family: Family) -> DampOutcome {
        self.on_reachable_at(route, family, Utc::now())
    }

    pub(crate) fn on_reachable_at(
        &mut self,
        route: &RouteId,
        family: Family,
        now: DateTime<Utc>,
    ) -> DampOutcome {
        let key = match self.by_route.get(&(*route, family)) {
            Some(&key) => key,
            None => return DampOutcome::None,
        };
        let (block_key, penalty, last_update, suppressed) = match self.records.get(key) {
            Some(rec) => (rec.block, rec.penalty, rec.last_update, rec.is_suppressed()),
            None => return DampOutcome::None,
        };
        let computed = self.blocks.get(block_key).map(|block| {
            let decayed = block
                .tables
                .decay(penalty, now - last_update, RouteEvent::Reach);
            (
                decayed,
                f64::from(block.params.reuse),
                f64::from(block.params.suppress),
                block.tables.floor,
                block.tables.reuse_offset(decayed, RouteEvent::Reach),
            )
        });
        let (decayed, reuse, suppress, floor, ticks) = match computed {
            Some(computed) => computed,
            None => {
                self.discard_record(key, DampError::Inconsistency("missing config block"));
                return DampOutcome::Use;
            }
        };
        if let Some(rec) = self.records.get_mut(key) {
            if decayed < rec.penalty {
                rec.penalty = decayed;
                rec.last_update = now;
            }
            rec.last_event = RouteEvent::Reach;
        }
        if decayed <= floor {
            // The announcement itself restores the route; no callback
            if let Some(rec) = self.records.get_mut(key) {
                rec.suppress_start = None;
            }
            self.destroy_record(key);
            return DampOutcome::Use;
        }
        if suppressed {
            if decayed < reuse {
                if let Some(rec) = self.records.get_mut(key) {
                    rec.suppress_start = None;
                }
                if let Err(err) = self.detach_sched(key) {
                    self.discard_record(key, err);
                    return DampOutcome::Use;
                }
                self.attach_no_reuse(key);
                debug!("damping: reuse threshold reached, route usable again");
                DampOutcome::Use
            } else {
                // Still above reuse; stays in its wheel slot
                DampOutcome::Damped
            }
        } else if decayed < suppress {
            DampOutcome::Use
        } else {
            if let Some(rec) = self.records.get_mut(key) {
                rec.suppress_start = Some(now);
                rec.flap_count += 1;
            }
            if let Err(err) = self.detach_sched(key) {
                self.discard_record(key, err);
                return DampOutcome::Use;
            }
            let slot = self.wheel.slot_index(ticks);
            if !self.attach_wheel(key, slot) {
                return DampOutcome::Use;
            }
            debug!(
                "damping: suppressed at penalty {:.1}, reuse slot {}",
                decayed, slot
            );
            DampOutcome::Damped
        }
    }

    // --- Timer-driven evaluation -------------------------------------

    /// One reuse tick: evict the current wheel slot, advance the wheel,
    /// and re-evaluate every evicted record. Failures are isolated per
    /// record.
    pub fn reuse_tick(&mut self, now: DateTime<Utc>) {
        let detached = self.wheel.take_current();
        let keys = self.records.collect(&detached, LinkSet::Sched);
        if !keys.is_empty() {
            trace!("damping: reuse tick visiting {} records", keys.len());
        }
        for key in keys {
            let snapshot = match self.records.get_mut(key) {
                Some(rec) => {
                    // The whole slot-list was detached; linkage is stale
                    rec.clear_sched_links();
                    rec.wheel_slot = None;
                    (
                        rec.block,
                        rec.penalty,
                        rec.last_update,
                        rec.last_event,
                        rec.route,
                        rec.family,
                    )
                }
                None => continue,
            };
            let (block_key, penalty, last_update, last_event, route, family) = snapshot;
            let computed = self.blocks.get(block_key).map(|block| {
                (
                    block.tables.decay(penalty, now - last_update, last_event),
                    f64::from(block.params.reuse),
                    block.tables.floor,
                )
            });
            let (decayed, reuse, floor) = match computed {
                Some(computed) => computed,
                None => {
                    // Force-unsuppress: destroying a suppressed record
                    // reprocesses its route
                    self.attach_no_reuse(key);
                    self.discard_record(key, DampError::Inconsistency("missing config block"));
                    continue;
                }
            };
            if let Some(rec) = self.records.get_mut(key) {
                if decayed < rec.penalty {
                    rec.penalty = decayed;
                    rec.last_update = now;
                }
            }
            if decayed >= reuse {
                // Not yet reusable; rebucket by the remaining decay time
                let ticks = self
                    .blocks
                    .get(block_key)
                    .map(|block| block.tables.reuse_offset(decayed, last_event))
                    .unwrap_or(0);
                let slot = self.wheel.slot_index(ticks);
                self.attach_wheel(key, slot);
                continue;
            }
            if let Some(rec) = self.records.get_mut(key) {
                rec.suppress_start = None;
            }
            self.attach_no_reuse(key);
            debug!("damping: unsuppressing {} at penalty {:.1}", route, decayed);
            if last_event == RouteEvent::Reach {
                self.store.aggregate_increment(&route, family);
                self.store.reprocess(&route, family);
            }
            if decayed <= floor {
                self.destroy_record(key);
            }
        }
    }

    /// Periodic decay of records that are not currently bucketed in the
    /// wheel. No suppression transition happens here; members of the
    /// non-reuse list are not suppressed.
    pub fn nonreuse_sweep(&mut self, now: DateTime<Utc>) {
        for key in self.records.collect(&self.no_reuse, LinkSet::Sched) {
            let snapshot = match self.records.get(key) {
                Some(rec) => (rec.block, rec.penalty, rec.last_update, rec.last_event),
                None => continue,
            };
            let (block_key, penalty, last_update, last_event) = snapshot;
            let computed = self.blocks.get(block_key).map(|block| {
                (
                    block.tables.decay(penalty, now - last_update, last_event),
                    block.tables.floor,
                )
            });
            match computed {
                Some((decayed, floor)) => {
                    if decayed < penalty {
                        if let Some(rec) = self.records.get_mut(key) {
                            rec.penalty = decayed;
                            rec.last_update = now;
                        }
                    }
                    if decayed <= floor {
                        self.destroy_record(key);
                    }
                }
                None => {
                    self.discard_record(key, DampError::Inconsistency("missing config block"))
                }
            }
        }
    }

    // --- Internals ---------------------------------------------------

    /// Resolve the config block a new record for `route` belongs to,
    /// creating a route-map outcome block on first use.
    fn resolve_block(
        &mut self,
        family: Family,
        route: &RouteId,
        attributes: &PathAttributes,
    ) -> Option<usize> {
        let source = self.groups.get(&family)?.source.clone();
        match source {
            ConfigSource::Static(_) => self.groups.get(&family)?.default_block,
            ConfigSource::RouteMap(name) => {
                let params = self.route_maps.evaluate(&name, &route.prefix, attributes)?;
                if let Err(err) = params.validate() {
                    warn!("damping: route-map {} returned bad parameters: {}", name, err);
                    return None;
                }
                if let Some(&block_key) = self.groups.get(&family)?.outcomes.get(&params) {
                    return Some(block_key);
                }
                let block_key = self.blocks.insert(ConfigBlock::new(params, &self.tuning));
                debug!(
                    "damping: new policy block via route-map {} ({})",
                    name, params
                );
                self.groups
                    .get_mut(&family)?
                    .outcomes
                    .insert(params, block_key);
                Some(block_key)
            }
        }
    }

    /// Detach a record from its current sched membership (wheel slot or
    /// non-reuse list).
    fn detach_sched(&mut self, key: RecordKey) -> Result<(), DampError> {
        let wheel_slot = match self.records.get(key) {
            Some(rec) => rec.wheel_slot,
            None => return Err(DampError::Inconsistency("record is gone")),
        };
        let ok = match wheel_slot {
            Some(slot) => self.records.unlink(self.wheel.slot_mut(slot), LinkSet::Sched, key),
            None => self.records.unlink(&mut self.no_reuse, LinkSet::Sched, key),
        };
        if !ok {
            return Err(DampError::Inconsistency("record not on its expected list"));
        }
        if let Some(rec) = self.records.get_mut(key) {
            rec.wheel_slot = None;
        }
        Ok(())
    }

    fn attach_no_reuse(&mut self, key: RecordKey) -> bool {
        let ok = self.records.push_front(&mut self.no_reuse, LinkSet::Sched, key);
        if let Some(rec) = self.records.get_mut(key) {
            rec.wheel_slot = None;
        }
        ok
    }

    /// Bucket a suppressed record in `slot`. On insertion failure the
    /// record is force-unsuppressed onto the non-reuse list and the
    /// caller reports the route as usable.
    fn attach_wheel(&mut self, key: RecordKey, slot: usize) -> bool {
        if self
            .records
            .push_front(self.wheel.slot_mut(slot), LinkSet::Sched, key)
        {
            if let Some(rec) = self.records.get_mut(key) {
                rec.wheel_slot = Some(slot);
            }
            return true;
        }
        warn!("damping: wheel insertion failed, force-unsuppressing record {}", key);
        if let Some(rec) = self.records.get_mut(key) {
            rec.suppress_start = None;
        }
        self.attach_no_reuse(key);
        false
    }

    /// Remove a record everywhere. A record destroyed while suppressed
    /// transitions its route back to use, so selection is re-run.
    fn destroy_record(&mut self, key: RecordKey) {
        let (route, family, block_key, suppressed) = match self.records.get(key) {
            Some(rec) => (rec.route, rec.family, rec.block, rec.is_suppressed()),
            None => return,
        };
        if self.detach_sched(key).is_err() {
            warn!("damping: stale scheduling membership destroying {}", route);
        }
        let cfg_ok = match self.blocks.get_mut(block_key) {
            Some(block) => self.records.unlink(&mut block.records, LinkSet::Cfg, key),
            None => false,
        };
        if !cfg_ok {
            warn!("damping: stale config membership destroying {}", route);
        }
        self.by_route.remove(&(route, family));
        self.records.remove(key);
        debug!("damping: record destroyed for {}", route);
        if suppressed {
            self.store.aggregate_increment(&route, family);
            self.store.reprocess(&route, family);
        }
    }

    /// Penalty-update failure path: log and destroy, degrading the
    /// route to "not damped" rather than wedging it.
    fn discard_record(&mut self, key: RecordKey, err: DampError) {
        if let Some(rec) = self.records.get(key) {
            warn!("damping: discarding record for {}: {}", rec.route, err);
        }
        self.destroy_record(key);
    }

    /// Destroy every record owned by a block, then the block itself
    fn release_block(&mut self, block_key: usize) {
        let keys = match self.blocks.get(block_key) {
            Some(block) => self.records.collect(&block.records, LinkSet::Cfg),
            None => return,
        };
        for key in keys {
            self.destroy_record(key);
        }
        self.blocks.remove(block_key);
    }
}

#[cfg(test)]
impl DampEngine {
    pub(crate) fn live_records(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn wheel_offset(&self) -> usize {
        self.wheel.offset()
    }

    /// Every live record is on the non-reuse list or in exactly one
    /// wheel slot, matching its own bookkeeping.
    pub(crate) fn check_invariant(&self) {
        let no_reuse_keys = self.records.collect(&self.no_reuse, LinkSet::Sched);
        for key in self.records.keys() {
            let rec = self.records.get(key).unwrap();
            let in_no_reuse = no_reuse_keys.contains(&key);
            let wheel_hits: Vec<usize> = (0..self.wheel.size())
                .filter(|&slot| {
                    self.records
                        .collect(self.wheel.slot(slot), LinkSet::Sched)
                        .contains(&key)
                })
                .collect();
            match rec.wheel_slot {
                Some(slot) => {
                    assert!(!in_no_reuse, "wheel record {} also on non-reuse list", key);
                    assert_eq!(wheel_hits, vec![slot], "record {} slot mismatch", key);
                    assert!(rec.is_suppressed(), "wheel record {} not suppressed", key);
                }
                None => {
                    assert!(in_no_reuse, "record {} on neither list", key);
                    assert!(wheel_hits.is_empty(), "record {} also in wheel", key);
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::params::DampParams;
    use bgp_rs::{AFI, SAFI};
    use ipnetwork::IpNetwork;

    #[derive(Clone, Debug, PartialEq)]
    pub(crate) enum StoreEvent {
        Aggregate(RouteId),
        Reprocess(RouteId),
    }

    #[derive(Clone, Default)]
    pub(crate) struct RecordingStore {
        pub(crate) events: Arc<Mutex<Vec<StoreEvent>>>,
    }

    impl RouteStore for RecordingStore {
        fn aggregate_increment(&mut self, route: &RouteId, _family: Family) {
            self.events.lock().unwrap().push(StoreEvent::Aggregate(*route));
        }
        fn reprocess(&mut self, route: &RouteId, _family: Family) {
            self.events.lock().unwrap().push(StoreEvent::Reprocess(*route));
        }
    }

    /// Route-map stub backed by a shared, mutable name -> params table
    #[derive(Clone, Default)]
    pub(crate) struct MapTable {
        pub(crate) maps: Arc<Mutex<HashMap<String, DampParams>>>,
    }

    impl RouteMapEval for MapTable {
        fn evaluate(
            &self,
            name: &str,
            _prefix: &IpNetwork,
            _attributes: &PathAttributes,
        ) -> Option<DampParams> {
            self.maps.lock().unwrap().get(name).copied()
        }
    }

    pub(crate) struct NullMaps;

    impl RouteMapEval for NullMaps {
        fn evaluate(
            &self,
            _name: &str,
            _prefix: &IpNetwork,
            _attributes: &PathAttributes,
        ) -> Option<DampParams> {
            None
        }
    }

    pub(crate) fn family() -> Family {
        Family::new(AFI::IPV4, SAFI::Unicast)
    }

    pub(crate) fn route(prefix: &str) -> RouteId {
        RouteId {
            prefix: prefix.parse().unwrap(),
            peer: "192.0.2.1".parse().unwrap(),
        }
    }

    pub(crate) fn engine() -> (DampEngine, Arc<Mutex<Vec<StoreEvent>>>) {
        let store = RecordingStore::default();
        let events = Arc::clone(&store.events);
        let engine = DampEngine::new(
            EngineTuning::default(),
            Box::new(store),
            Box::new(NullMaps),
        );
        (engine, events)
    }

    pub(crate) fn engine_with_config() -> (DampEngine, Arc<Mutex<Vec<StoreEvent>>>) {
        let (mut engine, events) = engine();
        engine
            .create_or_update_config(family(), ConfigSource::Static(DampParams::default()))
            .unwrap();
        (engine, events)
    }
}
