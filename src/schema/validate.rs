//! Configuration document validation
//!
//! Checks a JSON document against a schema before it is deserialized into a
//! typed configuration struct, so that every problem is reported at once and
//! before any remote call.

use super::registry::{Block, FieldDef, FieldType};
use crate::error::{ProviderError, Result};
use serde_json::{Map, Value};

/// Validate a document against a block, collecting every problem
pub fn validate_document(type_name: &str, block: &Block, document: &Value) -> Result<()> {
    let Some(map) = document.as_object() else {
        return Err(ProviderError::validation(format!(
            "{}: configuration must be an object",
            type_name
        )));
    };

    let mut problems = Vec::new();
    check_block("", block, map, &mut problems);

    if problems.is_empty() {
        Ok(())
    } else {
        tracing::debug!("{}: {} validation problem(s)", type_name, problems.len());
        Err(ProviderError::validation(format!(
            "{}: {}",
            type_name,
            problems.join("; ")
        )))
    }
}

fn is_set(map: &Map<String, Value>, key: &str) -> bool {
    map.get(key).map(|v| !v.is_null()).unwrap_or(false)
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn check_block(prefix: &str, block: &Block, map: &Map<String, Value>, problems: &mut Vec<String>) {
    for key in map.keys() {
        if !block.fields.contains_key(key) {
            problems.push(format!("unknown field '{}'", join_path(prefix, key)));
        }
    }

    for (name, field) in &block.fields {
        let path = join_path(prefix, name);
        match map.get(name).filter(|v| !v.is_null()) {
            None if field.required => problems.push(format!("missing required field '{}'", path)),
            None => {}
            Some(_) if field.is_computed_only() => {
                problems.push(format!("'{}' is computed and cannot be set", path))
            }
            Some(value) => check_value(&path, field, value, problems),
        }
    }

    for group in &block.conflicts {
        let set: Vec<&String> = group.iter().filter(|k| is_set(map, k)).collect();
        if set.len() > 1 {
            let names: Vec<String> = set.iter().map(|k| join_path(prefix, k)).collect();
            problems.push(format!("{} are mutually exclusive", names.join(" and ")));
        }
    }

    for group in &block.exactly_one_of {
        let count = group.iter().filter(|k| is_set(map, k)).count();
        if count != 1 {
            let names: Vec<String> = group.iter().map(|k| join_path(prefix, k)).collect();
            problems.push(format!("exactly one of {} must be set", names.join(", ")));
        }
    }
}

fn check_value(path: &str, field: &FieldDef, value: &Value, problems: &mut Vec<String>) {
    let type_ok = match field.field_type {
        FieldType::String => value.is_string(),
        FieldType::Int => value.is_i64() || value.is_u64(),
        FieldType::Float => value.is_number(),
        FieldType::Bool => value.is_boolean(),
        FieldType::List => value.is_array(),
        FieldType::Object => value.is_object(),
        FieldType::Map => value
            .as_object()
            .map(|m| m.values().all(Value::is_string))
            .unwrap_or(false),
    };
    if !type_ok {
        problems.push(format!(
            "'{}' must be of type {}",
            path,
            field.field_type.name()
        ));
        return;
    }

    match field.field_type {
        FieldType::String if !field.allowed.is_empty() => {
            let text = value.as_str().unwrap_or_default();
            if !field.allowed.iter().any(|a| a == text) {
                problems.push(format!(
                    "'{}' must be one of {}, got '{}'",
                    path,
                    field.allowed.join(", "),
                    text
                ));
            }
        }
        FieldType::List => {
            let items = value.as_array().map(Vec::as_slice).unwrap_or_default();
            if let Some(min) = field.min_items {
                if items.len() < min {
                    problems.push(format!("'{}' needs at least {} item(s)", path, min));
                }
            }
            if let Some(elem) = &field.elem {
                for (i, item) in items.iter().enumerate() {
                    check_value(&format!("{}[{}]", path, i), elem, item, problems);
                }
            }
        }
        FieldType::Object => {
            if let Some(map) = value.as_object() {
                check_block(path, &field.block, map, problems);
            }
        }
        _ => {}
    }
}
