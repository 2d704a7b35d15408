use std::f64::consts::LN_2;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::DampError;

struct Defaults {}

impl Defaults {
    fn half_life() -> u32 {
        900
    }
    fn reuse() -> u32 {
        750
    }
    fn suppress() -> u32 {
        2000
    }
    fn max_suppress() -> u32 {
        3600
    }
}

/// One damping policy's thresholds. Durations are in seconds, penalty
/// values in RFC 2439 units. Integer fields keep the set hashable so
/// equal route-map outcomes can share a config block.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct DampParams {
    /// Half-life applied while the route is reachable
    #[serde(default = "Defaults::half_life")]
    pub reach_half_life: u32,
    /// Half-life applied while the route is unreachable
    #[serde(default = "Defaults::half_life")]
    pub unreach_half_life: u32,
    /// Penalty below which a suppressed route becomes reusable
    #[serde(default = "Defaults::reuse")]
    pub reuse: u32,
    /// Penalty at which a reachable route is suppressed
    #[serde(default = "Defaults::suppress")]
    pub suppress: u32,
    /// Longest a route may stay suppressed, in seconds
    #[serde(default = "Defaults::max_suppress")]
    pub max_suppress: u32,
}

impl Default for DampParams {
    fn default() -> Self {
        Self {
            reach_half_life: Defaults::half_life(),
            unreach_half_life: Defaults::half_life(),
            reuse: Defaults::reuse(),
            suppress: Defaults::suppress(),
            max_suppress: Defaults::max_suppress(),
        }
    }
}

impl DampParams {
    /// Highest penalty a record may hold:
    /// `reuse * 2^(max_suppress / unreach_half_life)`
    pub fn ceiling(&self) -> f64 {
        f64::from(self.reuse)
            * ((f64::from(self.max_suppress) / f64::from(self.unreach_half_life)) * LN_2).exp()
    }

    /// Reject threshold sets before any table is built; nothing is
    /// applied for an invalid set.
    pub fn validate(&self) -> Result<(), DampError> {
        if self.reach_half_life == 0 || self.unreach_half_life == 0 {
            return Err(DampError::InvalidConfig("half-life must be non-zero".into()));
        }
        if self.reuse == 0 {
            return Err(DampError::InvalidConfig("reuse limit must be non-zero".into()));
        }
        if self.suppress <= self.reuse {
            return Err(DampError::InvalidConfig(format!(
                "suppress threshold {} must exceed reuse limit {}",
                self.suppress, self.reuse
            )));
        }
        if self.max_suppress == 0 {
            return Err(DampError::InvalidConfig(
                "max-suppress time must be non-zero".into(),
            ));
        }
        if self.ceiling() < f64::from(self.suppress) {
            return Err(DampError::InvalidConfig(format!(
                "max-suppress time {}s is too short to reach the suppress threshold {}",
                self.max_suppress, self.suppress
            )));
        }
        Ok(())
    }
}

impl fmt::Display for DampParams {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "half-life {}s/{}s reuse {} suppress {} max-suppress {}s",
            self.reach_half_life, self.unreach_half_life, self.reuse, self.suppress, self.max_suppress
        )
    }
}

/// Engine-wide timing and sizing knobs. The exact values are not
/// behaviorally load-bearing beyond the invariants they must satisfy,
/// so they are per-engine configuration rather than constants.
#[derive(Clone, Copy, Debug)]
pub struct EngineTuning {
    /// Seconds per reuse-wheel tick
    pub reuse_interval: u32,
    /// Seconds per non-reuse sweep; also the decay-array granularity
    pub sweep_interval: u32,
    /// Number of reuse-wheel slots
    pub wheel_size: usize,
    /// Entries per reuse-index lookup table
    pub reuse_index_size: usize,
    /// Upper bound on decay-array length
    pub max_decay_len: usize,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            reuse_interval: 15,
            sweep_interval: 5,
            wheel_size: 256,
            reuse_index_size: 256,
            max_decay_len: 4096,
        }
    }
}

impl EngineTuning {
    pub fn reuse_period(&self) -> Duration {
        Duration::from_secs(u64::from(self.reuse_interval))
    }

    pub fn sweep_period(&self) -> Duration {
        Duration::from_secs(u64::from(self.sweep_interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let params = DampParams::default();
        params.validate().unwrap();
        assert_eq!(params.reuse, 750);
        assert_eq!(params.suppress, 2000);
    }

    #[test]
    fn test_suppress_below_reuse_rejected() {
        let params = DampParams {
            reuse: 2000,
            suppress: 750,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_unreachable_suppress_threshold_rejected() {
        // Ceiling of 1500 can never reach the suppress threshold
        let params = DampParams {
            max_suppress: 900,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_zero_half_life_rejected() {
        let params = DampParams {
            reach_half_life: 0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_params_from_toml_with_defaults() {
        let params: DampParams = toml::from_str(
            r#"
            reuse = 500
            suppress = 1500
            "#,
        )
        .unwrap();
        assert_eq!(params.reuse, 500);
        assert_eq!(params.suppress, 1500);
        assert_eq!(params.reach_half_life, 900);
        params.validate().unwrap();
    }
}
