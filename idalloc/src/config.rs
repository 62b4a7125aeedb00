//! Configuration options for id allocation.

use std::collections::BTreeMap;

use common::StateStorageConfig;
use serde::{Deserialize, Serialize};

use crate::model::IdType;

/// Number of ids requested from the cluster per allocation, by id type.
///
/// Only overrides are stored; types without an entry use
/// [`default_allocation_size`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationSizes(BTreeMap<IdType, u64>);

impl AllocationSizes {
    /// Chunk length used when acquiring ids of `id_type`. Never 0.
    pub fn get(&self, id_type: IdType) -> u64 {
        self.0
            .get(&id_type)
            .copied()
            .unwrap_or_else(|| default_allocation_size(id_type))
            .max(1)
    }

    pub fn with(mut self, id_type: IdType, size: u64) -> Self {
        self.0.insert(id_type, size);
        self
    }
}

/// Built-in chunk length per id type.
pub fn default_allocation_size(id_type: IdType) -> u64 {
    match id_type {
        IdType::Node
        | IdType::Relationship
        | IdType::Property
        | IdType::StringBlock
        | IdType::ArrayBlock
        | IdType::RelationshipGroup
        | IdType::Schema
        | IdType::NodeLabels => 1024,
        IdType::PropertyKeyToken
        | IdType::PropertyKeyTokenName
        | IdType::RelationshipTypeToken
        | IdType::RelationshipTypeTokenName
        | IdType::LabelToken
        | IdType::LabelTokenName => 32,
        IdType::NeoStore => 1,
    }
}

/// Configuration for an id allocation member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chunk lengths for range acquisition.
    pub allocation_sizes: AllocationSizes,

    /// Journal holding the replicated allocation state.
    pub state: StateStorageConfig,

    /// When false, freed ids are never reused.
    /// Default: true.
    pub reuse_freed_ids: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            allocation_sizes: AllocationSizes::default(),
            state: StateStorageConfig {
                name: "id-allocation-state".to_string(),
                ..StateStorageConfig::default()
            },
            reuse_freed_ids: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(IdType::Node, 1024)]
    #[case(IdType::Schema, 1024)]
    #[case(IdType::LabelToken, 32)]
    #[case(IdType::RelationshipTypeTokenName, 32)]
    #[case(IdType::NeoStore, 1)]
    fn should_use_default_allocation_sizes(#[case] id_type: IdType, #[case] expected: u64) {
        assert_eq!(Config::default().allocation_sizes.get(id_type), expected);
    }

    #[test]
    fn should_parse_yaml_with_overrides() {
        // given
        let yaml = r#"
allocation_sizes:
  node: 4096
  label_token: 8
state:
  directory: /var/lib/cluster/state
  name: id-allocation-state
  entries_before_rotation: 50
reuse_freed_ids: false
"#;

        // when
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        // then
        assert_eq!(config.allocation_sizes.get(IdType::Node), 4096);
        assert_eq!(config.allocation_sizes.get(IdType::LabelToken), 8);
        assert_eq!(config.allocation_sizes.get(IdType::Relationship), 1024);
        assert_eq!(config.state.directory, PathBuf::from("/var/lib/cluster/state"));
        assert_eq!(config.state.entries_before_rotation, 50);
        assert!(!config.reuse_freed_ids);
    }

    #[test]
    fn should_fill_missing_fields_with_defaults() {
        // when
        let config: Config = serde_yaml::from_str("reuse_freed_ids: true").unwrap();

        // then
        assert_eq!(config, Config::default());
        assert_eq!(config.state.name, "id-allocation-state");
    }

    #[test]
    fn should_never_hand_out_zero_length_chunks() {
        let sizes = AllocationSizes::default().with(IdType::Node, 0);

        assert_eq!(sizes.get(IdType::Node), 1);
    }
}
