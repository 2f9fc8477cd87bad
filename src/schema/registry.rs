//! Schema Registry - Load resource schemas from JSON
//!
//! This module loads every resource and data source schema from embedded
//! JSON files and provides lookup functions for validation, dispatch and the
//! `schema` command.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

/// Embedded schema JSON files (compiled into the binary)
const SCHEMA_FILES: &[&str] = &[
    include_str!("../schemas/prism.json"),
    include_str!("../schemas/flow.json"),
    include_str!("../schemas/karbon.json"),
    include_str!("../schemas/foundation.json"),
];

/// Value type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    /// Homogeneous list, element described by `elem`
    List,
    /// Nested block, members described by `fields`
    Object,
    /// String to string map (categories)
    Map,
}

impl FieldType {
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::List => "list",
            FieldType::Object => "object",
            FieldType::Map => "map",
        }
    }
}

/// Field definition from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub computed: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub sensitive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Accepted values for string fields
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elem: Option<Box<FieldDef>>,
    #[serde(flatten)]
    pub block: Block,
}

impl FieldDef {
    /// Set only by the remote side
    pub fn is_computed_only(&self) -> bool {
        self.computed && !self.optional && !self.required
    }
}

/// A set of fields plus the cross-field rules that apply to them
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Block {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, FieldDef>,
    /// Groups of fields of which at most one may be set
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Vec<String>>,
    /// Groups of fields of which exactly one must be set
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exactly_one_of: Vec<Vec<String>>,
}

/// Resource or data source schema from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDef {
    pub description: String,
    /// Which API serves the type
    pub api: String,
    #[serde(flatten)]
    pub block: Block,
}

/// Root structure of schemas/*.json
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub resources: HashMap<String, SchemaDef>,
    #[serde(default)]
    pub data_sources: HashMap<String, SchemaDef>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Global registry loaded from JSON
static REGISTRY: OnceLock<SchemaConfig> = OnceLock::new();

/// Get the schema registry (loads from embedded JSON on first access)
pub fn get_registry() -> &'static SchemaConfig {
    REGISTRY.get_or_init(|| {
        let mut final_config = SchemaConfig::default();

        for content in SCHEMA_FILES {
            let partial: SchemaConfig = serde_json::from_str(content)
                .unwrap_or_else(|e| panic!("Failed to parse embedded schema JSON: {}", e));
            final_config.resources.extend(partial.resources);
            final_config.data_sources.extend(partial.data_sources);
        }

        final_config
    })
}

/// Get a resource schema by type name
pub fn get_resource_schema(type_name: &str) -> Option<&'static SchemaDef> {
    get_registry().resources.get(type_name)
}

/// Get a data source schema by type name
pub fn get_data_source_schema(type_name: &str) -> Option<&'static SchemaDef> {
    get_registry().data_sources.get(type_name)
}

/// Get all resource type names, sorted
pub fn get_all_resource_types() -> Vec<&'static str> {
    let mut keys: Vec<&str> = get_registry()
        .resources
        .keys()
        .map(|s| s.as_str())
        .collect();
    keys.sort_unstable();
    keys
}

/// Get all data source type names, sorted
pub fn get_all_data_source_types() -> Vec<&'static str> {
    let mut keys: Vec<&str> = get_registry()
        .data_sources
        .keys()
        .map(|s| s.as_str())
        .collect();
    keys.sort_unstable();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_loads_successfully() {
        let registry = get_registry();
        assert!(
            !registry.resources.is_empty(),
            "Registry should have resources"
        );
        assert!(!registry.data_sources.is_empty());
    }

    #[test]
    fn test_subnet_schema_exists() {
        let schema = get_resource_schema("nutanix_subnet").expect("subnet schema");
        assert_eq!(schema.api, "prism");
        assert!(schema.block.fields["name"].required);
        assert!(schema.block.fields["id"].is_computed_only());
    }

    #[test]
    fn test_every_field_has_a_mode() {
        fn check(path: &str, block: &Block) {
            for (name, field) in &block.fields {
                let path = format!("{}.{}", path, name);
                assert!(
                    field.required || field.optional || field.computed,
                    "{} is neither required, optional nor computed",
                    path
                );
                assert!(!(field.required && field.optional), "{} is both required and optional", path);
                if field.field_type == FieldType::List {
                    let elem = field.elem.as_ref().unwrap_or_else(|| panic!("{} has no elem", path));
                    check(&path, &elem.block);
                }
                check(&path, &field.block);
            }
            for group in block.conflicts.iter().chain(&block.exactly_one_of) {
                for member in group {
                    assert!(block.fields.contains_key(member), "{} names unknown field {}", path, member);
                }
            }
        }

        let registry = get_registry();
        for (name, schema) in registry.resources.iter().chain(&registry.data_sources) {
            check(name, &schema.block);
        }
    }

    #[test]
    fn test_karbon_master_configs_conflict() {
        let schema = get_resource_schema("nutanix_karbon_cluster").unwrap();
        assert!(schema
            .block
            .conflicts
            .iter()
            .any(|g| g.contains(&"active_passive_config".to_string())
                && g.contains(&"external_lb_config".to_string())));
    }

    #[test]
    fn test_cluster_data_source_exactly_one_of() {
        let schema = get_data_source_schema("nutanix_cluster").unwrap();
        assert_eq!(
            schema.block.exactly_one_of,
            vec![vec!["cluster_id".to_string(), "name".to_string()]]
        );
    }
}
