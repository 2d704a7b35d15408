//! Read-only snapshots for the display/CLI layer. These are the data
//! contract only; any RPC or table rendering lives with the daemon.

use std::net::IpAddr;

use chrono::Duration;
use itertools::Itertools;
use serde::Serialize;

use crate::config::ConfigSource;
use crate::engine::DampEngine;
use crate::record::RouteEvent;
use crate::route::Family;
use crate::utils::{format_elapsed_time, format_time_as_elapsed};

/// One config block's thresholds and computed bounds
#[derive(Debug, Serialize)]
pub struct DampConfigInfo {
    pub family: String,
    pub source: String,
    pub reach_half_life: u32,
    pub unreach_half_life: u32,
    pub reuse: u32,
    pub suppress: u32,
    pub max_suppress: u32,
    pub ceiling: f64,
    pub floor: f64,
    pub tracked_routes: usize,
}

/// One penalty record's flap history
#[derive(Debug, Serialize)]
pub struct FlappedRoute {
    pub prefix: String,
    pub peer: IpAddr,
    pub penalty: f64,
    pub flap_count: u32,
    /// "damped" while suppressed, "history" while only tracked
    pub state: String,
    pub tracked_for: String,
    pub suppressed_for: Option<String>,
    /// Estimated wall time until the record's reuse slot fires
    pub reuse_in: Option<String>,
}

impl DampEngine {
    pub fn show_config(&self, family: Family) -> Vec<DampConfigInfo> {
        let group = match self.groups.get(&family) {
            Some(group) => group,
            None => return vec![],
        };
        let source = match &group.source {
            ConfigSource::Static(_) => "static".to_string(),
            ConfigSource::RouteMap(name) => format!("route-map {}", name),
        };
        group
            .block_keys()
            .into_iter()
            .filter_map(|key| self.blocks.get(key))
            .map(|block| DampConfigInfo {
                family: family.to_string(),
                source: source.clone(),
                reach_half_life: block.params.reach_half_life,
                unreach_half_life: block.params.unreach_half_life,
                reuse: block.params.reuse,
                suppress: block.params.suppress,
                max_suppress: block.params.max_suppress,
                ceiling: block.tables.ceiling,
                floor: block.tables.floor,
                tracked_routes: block.records.len,
            })
            .collect()
    }

    pub fn show_flap_stats(&self, family: Family) -> Vec<FlappedRoute> {
        self.by_route
            .iter()
            .filter(|((_, rec_family), _)| *rec_family == family)
            .filter_map(|(_, &key)| self.records.get(key))
            .map(|rec| {
                let state = if rec.is_suppressed() {
                    "damped"
                } else {
                    match rec.last_event {
                        RouteEvent::Unreach => "history",
                        RouteEvent::Reach => "active",
                    }
                };
                let reuse_in = rec.wheel_slot.map(|slot| {
                    let size = self.wheel.size();
                    let slots = (slot + size - self.wheel.offset()) % size;
                    let seconds = slots as u64 * u64::from(self.tuning.reuse_interval);
                    format_elapsed_time(Duration::seconds(seconds as i64))
                });
                FlappedRoute {
                    prefix: rec.route.prefix.to_string(),
                    peer: rec.route.peer,
                    penalty: rec.penalty,
                    flap_count: rec.flap_count,
                    state: state.to_string(),
                    tracked_for: format_time_as_elapsed(rec.record_start),
                    suppressed_for: rec.suppress_start.map(format_time_as_elapsed),
                    reuse_in,
                }
            })
            .sorted_by(|a, b| a.prefix.cmp(&b.prefix))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{engine, engine_with_config, family, route};
    use crate::engine::DampOutcome;
    use crate::route::{PathAttributes, PeerSort};
    use chrono::{Duration, Utc};

    #[test]
    fn test_show_config_snapshot() {
        let (engine, _) = engine_with_config();
        let infos = engine.show_config(family());
        assert_eq!(infos.len(), 1);
        let info = &infos[0];
        assert_eq!(info.family, "IPv4 Unicast");
        assert_eq!(info.source, "static");
        assert_eq!(info.reuse, 750);
        assert!((info.ceiling - 12_000.0).abs() < 1e-6);
        assert!((info.floor - 375.0).abs() < 1e-6);
        assert_eq!(info.tracked_routes, 0);
    }

    #[test]
    fn test_show_config_unconfigured_family_is_empty() {
        let (engine, _) = engine();
        assert!(engine.show_config(family()).is_empty());
    }

    #[test]
    fn test_show_flap_stats_sorted_and_stateful() {
        let (mut engine, _) = engine_with_config();
        let attrs = PathAttributes::empty();
        let t0 = Utc::now() - Duration::seconds(60);
        for prefix in &["10.9.0.0/16", "10.1.0.0/16"] {
            engine.on_unreachable_at(&route(prefix), family(), PeerSort::External, &attrs, t0);
        }
        // Suppress the second route
        let flapper = route("10.9.0.0/16");
        engine.on_unreachable_at(&flapper, family(), PeerSort::External, &attrs, t0 + Duration::seconds(2));
        assert_eq!(
            engine.on_reachable_at(&flapper, family(), t0 + Duration::seconds(4)),
            DampOutcome::Damped
        );

        let stats = engine.show_flap_stats(family());
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].prefix, "10.1.0.0/16");
        assert_eq!(stats[0].state, "history");
        assert!(stats[0].suppressed_for.is_none());
        assert_eq!(stats[1].prefix, "10.9.0.0/16");
        assert_eq!(stats[1].state, "damped");
        assert!(stats[1].suppressed_for.is_some());
        assert!(stats[1].reuse_in.is_some());
        assert_eq!(stats[1].flap_count, 3);

        let json = serde_json::to_string(&stats[1]).unwrap();
        assert!(json.contains("\"state\":\"damped\""));
    }
}
