//! Field-level helpers for JSON documents.

use serde_json::{Map, Value};

use crate::{Error, Result};

/// Set a nested field, creating intermediate objects as needed.
///
/// Only the addressed key is replaced; sibling keys are untouched, so writers
/// that own disjoint keys never clobber each other.
pub fn set_field(path: &str, doc: &mut Value, field: &[&str], value: Value) -> Result<()> {
    let Some((last, parents)) = field.split_last() else {
        return Err(Error::InvalidField {
            path: path.to_string(),
            field: String::new(),
        });
    };

    let mut current = doc;
    for segment in parents {
        let object = as_object(path, field, current)?;
        current = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    as_object(path, field, current)?.insert(last.to_string(), value);
    Ok(())
}

/// Read a nested field.
pub fn get_field<'a>(doc: &'a Value, field: &[&str]) -> Option<&'a Value> {
    field
        .iter()
        .try_fold(doc, |current, segment| current.get(*segment))
}

fn as_object<'a>(path: &str, field: &[&str], value: &'a mut Value) -> Result<&'a mut Map<String, Value>> {
    value.as_object_mut().ok_or_else(|| Error::InvalidField {
        path: path.to_string(),
        field: field.join("."),
    })
}
