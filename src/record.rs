use chrono::{DateTime, Utc};

use crate::arena::{LinkSet, Linked, Links};
use crate::route::{Family, RouteId};

/// Reachability transition last observed for a tracked route
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RouteEvent {
    Reach,
    Unreach,
}

/// Per-route instability history, attached to one route instance for as
/// long as its penalty stays above the owning block's floor.
#[derive(Debug)]
pub(crate) struct PenaltyRecord {
    pub(crate) route: RouteId,
    pub(crate) family: Family,
    // Key of the config block this record was created under; kept for
    // the record's whole lifetime even if route-map resolution would
    // pick a different block later
    pub(crate) block: usize,
    pub(crate) penalty: f64,
    pub(crate) flap_count: u32,
    pub(crate) record_start: DateTime<Utc>,
    pub(crate) last_update: DateTime<Utc>,
    pub(crate) suppress_start: Option<DateTime<Utc>>,
    pub(crate) last_event: RouteEvent,
    // Some(slot) while bucketed in the reuse wheel, None while on the
    // non-reuse list
    pub(crate) wheel_slot: Option<usize>,
    links: [Links; 2],
}

impl PenaltyRecord {
    pub(crate) fn new(
        route: RouteId,
        family: Family,
        block: usize,
        penalty: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            route,
            family,
            block,
            penalty,
            flap_count: 1,
            record_start: now,
            last_update: now,
            suppress_start: None,
            last_event: RouteEvent::Unreach,
            wheel_slot: None,
            links: [Links::default(); 2],
        }
    }

    pub(crate) fn is_suppressed(&self) -> bool {
        self.suppress_start.is_some()
    }

    /// Reset the sched linkage after the owning wheel slot was detached
    /// wholesale by the reuse tick.
    pub(crate) fn clear_sched_links(&mut self) {
        self.links[LinkSet::Sched as usize] = Links::default();
    }
}

impl Linked for PenaltyRecord {
    fn links(&self, set: LinkSet) -> &Links {
        &self.links[set as usize]
    }
    fn links_mut(&mut self, set: LinkSet) -> &mut Links {
        &mut self.links[set as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bgp_rs::{AFI, SAFI};
    use std::net::IpAddr;

    #[test]
    fn test_new_record_state() {
        let route = RouteId {
            prefix: "10.1.0.0/16".parse().unwrap(),
            peer: "192.0.2.1".parse::<IpAddr>().unwrap(),
        };
        let family = Family::new(AFI::IPV4, SAFI::Unicast);
        let rec = PenaltyRecord::new(route, family, 0, 1000.0, Utc::now());
        assert_eq!(rec.flap_count, 1);
        assert_eq!(rec.last_event, RouteEvent::Unreach);
        assert!(!rec.is_suppressed());
        assert!(rec.wheel_slot.is_none());
    }
}
