//! Damping configuration: one block per concrete parameter set, grouped
//! per address family. A family is configured either with a static
//! parameter set or with a route-map whose outcomes resolve to blocks
//! lazily, cached by parameter value.

use std::collections::HashMap;

use crate::arena::ListHead;
use crate::params::{DampParams, EngineTuning};
use crate::tables::DecayTables;

/// How a family's damping parameters are sourced
#[derive(Clone, Debug)]
pub enum ConfigSource {
    Static(DampParams),
    RouteMap(String),
}

/// One damping policy instance: validated thresholds, the decay tables
/// built from them, and the records created under it
#[derive(Debug)]
pub(crate) struct ConfigBlock {
    pub(crate) params: DampParams,
    pub(crate) tables: DecayTables,
    pub(crate) records: ListHead,
}

impl ConfigBlock {
    pub(crate) fn new(params: DampParams, tuning: &EngineTuning) -> Self {
        Self {
            params,
            tables: DecayTables::build(&params, tuning),
            records: ListHead::default(),
        }
    }
}

/// Per-family configuration group
#[derive(Debug)]
pub(crate) struct ConfigGroup {
    pub(crate) source: ConfigSource,
    /// The single block for `ConfigSource::Static`
    pub(crate) default_block: Option<usize>,
    /// Route-map outcome blocks, keyed by resolved parameter set
    pub(crate) outcomes: HashMap<DampParams, usize>,
}

impl ConfigGroup {
    pub(crate) fn new(source: ConfigSource) -> Self {
        Self {
            source,
            default_block: None,
            outcomes: HashMap::new(),
        }
    }

    pub(crate) fn block_keys(&self) -> Vec<usize> {
        self.default_block
            .iter()
            .copied()
            .chain(self.outcomes.values().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_builds_tables() {
        let block = ConfigBlock::new(DampParams::default(), &EngineTuning::default());
        assert!(block.tables.ceiling > f64::from(block.params.suppress));
        assert!(block.records.is_empty());
    }

    #[test]
    fn test_group_block_keys() {
        let mut group = ConfigGroup::new(ConfigSource::RouteMap("flap-policy".into()));
        assert!(group.block_keys().is_empty());
        group.outcomes.insert(DampParams::default(), 3);
        assert_eq!(group.block_keys(), vec![3]);

        let mut group = ConfigGroup::new(ConfigSource::Static(DampParams::default()));
        group.default_block = Some(1);
        assert_eq!(group.block_keys(), vec![1]);
    }
}
