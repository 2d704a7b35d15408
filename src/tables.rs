//! Precomputed decay and reuse-index tables for one damping policy.
//!
//! Built once per config block enable; thresholds are validated by the
//! caller before the builder runs, so the math here is unconditional.

use std::f64::consts::LN_2;

use chrono::Duration;

use crate::params::{DampParams, EngineTuning};
use crate::record::RouteEvent;

/// Decay array plus reuse-index lookup for one half-life
#[derive(Debug)]
struct DecaySet {
    // decay[i] is the multiplier after i decay ticks; decay[0] = 1
    decay: Vec<f64>,
    // Maps a (penalty/reuse - 1) bucket to a wheel-slot offset
    reuse_index: Vec<usize>,
    scale: f64,
}

impl DecaySet {
    fn build(half_life: u32, reuse: f64, ceiling: f64, floor: f64, tuning: &EngineTuning) -> Self {
        let decay_tick = f64::from(tuning.sweep_interval.max(1));
        let rate = (-LN_2 / (f64::from(half_life) / decay_tick)).exp();

        // Long enough for the ceiling to decay to the floor
        let span = ((ceiling / floor).ln() / -rate.ln()).ceil() as usize;
        let len = span.max(2).min(tuning.max_decay_len);
        let mut decay = Vec::with_capacity(len);
        decay.push(1.0);
        decay.push(rate);
        for i in 2..len {
            let prev = decay[i - 1];
            decay.push(prev * rate);
        }

        let size = tuning.reuse_index_size.max(1);
        let scale = size as f64 / (ceiling / reuse - 1.0);
        let slots_per_half_life = f64::from(half_life) / f64::from(tuning.reuse_interval);
        let mut reuse_index = Vec::with_capacity(size);
        for i in 0..size {
            let ratio = 1.0 + i as f64 / scale;
            reuse_index.push((slots_per_half_life * ratio.log2()).ceil() as usize);
        }

        Self {
            decay,
            reuse_index,
            scale,
        }
    }
}

#[derive(Debug)]
pub(crate) struct DecayTables {
    pub(crate) ceiling: f64,
    pub(crate) floor: f64,
    reuse_limit: f64,
    reach: DecaySet,
    unreach: DecaySet,
    decay_tick: i64,
}

impl DecayTables {
    pub(crate) fn build(params: &DampParams, tuning: &EngineTuning) -> Self {
        let ceiling = params.ceiling();
        let floor = (f64::from(params.reuse) / 2.0).max(1.0);
        let reuse = f64::from(params.reuse);
        Self {
            ceiling,
            floor,
            reuse_limit: reuse,
            reach: DecaySet::build(params.reach_half_life, reuse, ceiling, floor, tuning),
            unreach: DecaySet::build(params.unreach_half_life, reuse, ceiling, floor, tuning),
            // Floored so a zero sweep interval cannot divide by zero
            decay_tick: i64::from(tuning.sweep_interval.max(1)),
        }
    }

    fn set(&self, event: RouteEvent) -> &DecaySet {
        match event {
            RouteEvent::Reach => &self.reach,
            RouteEvent::Unreach => &self.unreach,
        }
    }

    /// Apply exponential decay for `elapsed` wall time. Beyond the end
    /// of the decay array the penalty has passed the floor regardless,
    /// so it collapses to zero.
    pub(crate) fn decay(&self, penalty: f64, elapsed: Duration, event: RouteEvent) -> f64 {
        let seconds = elapsed.num_seconds();
        if seconds <= 0 {
            return penalty;
        }
        let ticks = (seconds / self.decay_tick) as usize;
        let set = self.set(event);
        if ticks == 0 {
            penalty
        } else if ticks >= set.decay.len() {
            0.0
        } else {
            penalty * set.decay[ticks]
        }
    }

    /// Wheel-slot offset (in reuse ticks from now) at which a penalty
    /// is expected to have decayed to the reuse limit.
    pub(crate) fn reuse_offset(&self, penalty: f64, event: RouteEvent) -> usize {
        let ratio = penalty / self.reuse_limit;
        if ratio <= 1.0 {
            return 0;
        }
        let set = self.set(event);
        let bucket = ((ratio - 1.0) * set.scale) as usize;
        let bucket = bucket.min(set.reuse_index.len() - 1);
        set.reuse_index[bucket]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> DampParams {
        DampParams::default()
    }

    #[test]
    fn test_ceiling_and_floor() {
        let tables = DecayTables::build(&params(), &EngineTuning::default());
        // reuse=750, max_suppress=3600s, unreach half-life=900s: 750 * 2^4
        assert!((tables.ceiling - 12_000.0).abs() < 1e-6);
        assert!((tables.floor - 375.0).abs() < 1e-6);
    }

    #[test]
    fn test_ceiling_covers_suppress_for_valid_thresholds() {
        let tuning = EngineTuning::default();
        let sets = [
            (750, 2000, 900, 900, 3600),
            (500, 3000, 600, 1200, 7200),
            (1, 2, 60, 60, 120),
            (1000, 1001, 1800, 900, 1800),
        ];
        for &(reuse, suppress, reach, unreach, max_suppress) in &sets {
            let params = DampParams {
                reach_half_life: reach,
                unreach_half_life: unreach,
                reuse,
                suppress,
                max_suppress,
            };
            params.validate().unwrap();
            let tables = DecayTables::build(&params, &tuning);
            assert!(
                tables.ceiling >= f64::from(suppress),
                "ceiling {} < suppress {}",
                tables.ceiling,
                suppress
            );
        }
    }

    #[test]
    fn test_decay_array_shape() {
        let tables = DecayTables::build(&params(), &EngineTuning::default());
        for set in &[&tables.reach, &tables.unreach] {
            assert!((set.decay[0] - 1.0).abs() < 1e-12);
            for pair in set.decay.windows(2) {
                assert!(pair[1] < pair[0]);
            }
        }
    }

    #[test]
    fn test_half_life_round_trip() {
        let p = params();
        let tables = DecayTables::build(&p, &EngineTuning::default());
        let decayed = tables.decay(
            1000.0,
            Duration::seconds(i64::from(p.unreach_half_life)),
            RouteEvent::Unreach,
        );
        // One decay-tick of rounding slack
        assert!((decayed - 500.0).abs() < 5.0, "decayed to {}", decayed);
    }

    #[test]
    fn test_zero_sweep_interval_floors_to_one_second() {
        let tuning = EngineTuning {
            sweep_interval: 0,
            ..Default::default()
        };
        let tables = DecayTables::build(&params(), &tuning);
        // Decays at one-second granularity instead of panicking
        let decayed = tables.decay(1000.0, Duration::seconds(900), RouteEvent::Reach);
        assert!((decayed - 500.0).abs() < 1.0, "decayed to {}", decayed);
    }

    #[test]
    fn test_decay_past_array_collapses_to_zero() {
        let tables = DecayTables::build(&params(), &EngineTuning::default());
        let decayed = tables.decay(12_000.0, Duration::seconds(86_400), RouteEvent::Unreach);
        assert_eq!(decayed, 0.0);
    }

    #[test]
    fn test_sub_tick_elapsed_is_identity() {
        let tables = DecayTables::build(&params(), &EngineTuning::default());
        assert_eq!(tables.decay(1000.0, Duration::seconds(2), RouteEvent::Reach), 1000.0);
        assert_eq!(tables.decay(1000.0, Duration::seconds(-5), RouteEvent::Reach), 1000.0);
    }

    #[test]
    fn test_reuse_offset_monotone_in_penalty() {
        let tables = DecayTables::build(&params(), &EngineTuning::default());
        let mut last = 0;
        for penalty in (750..12_000).step_by(250) {
            let offset = tables.reuse_offset(f64::from(penalty), RouteEvent::Reach);
            assert!(offset >= last, "offset shrank at penalty {}", penalty);
            last = offset;
        }
        assert_eq!(tables.reuse_offset(700.0, RouteEvent::Reach), 0);
    }

    #[test]
    fn test_reuse_offset_matches_decay_time() {
        // A penalty of 2000 should be scheduled roughly where it decays
        // below the reuse limit: 900 * log2(2000/750) / 15 ~ 85 slots
        let tables = DecayTables::build(&params(), &EngineTuning::default());
        let offset = tables.reuse_offset(2000.0, RouteEvent::Reach);
        assert!((84..=87).contains(&offset), "offset {}", offset);
    }
}
