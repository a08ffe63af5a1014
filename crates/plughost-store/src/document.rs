//! Filter matching and update operators shared by the store backends.

use plughost_core::error::{PlugHostError, Result};
use plughost_core::traits::Document;
use serde_json::Value;

/// Top-level field equality; an empty filter matches everything.
pub fn matches(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(k, v)| doc.get(k) == Some(v))
}

/// Apply `{"$set": {...}, "$inc": {...}}` to `doc`; a bare object is a `$set`.
/// Returns whether the document changed.
pub fn apply_update(doc: &mut Document, update: &Document) -> Result<bool> {
    let has_operators = update.keys().any(|k| k.starts_with('$'));
    if !has_operators {
        return Ok(set_fields(doc, update));
    }

    let mut changed = false;
    for (op, fields) in update {
        let fields = fields
            .as_object()
            .ok_or_else(|| PlugHostError::InvalidDocument(format!("{op} expects an object")))?;
        match op.as_str() {
            "$set" => changed |= set_fields(doc, fields),
            "$inc" => {
                for (field, by) in fields {
                    let next = increment(doc.get(field), by)
                        .ok_or_else(|| PlugHostError::InvalidDocument(format!("cannot $inc field '{field}'")))?;
                    doc.insert(field.clone(), next);
                    changed = true;
                }
            }
            other => {
                return Err(PlugHostError::InvalidDocument(format!(
                    "unsupported update operator '{other}'"
                )));
            }
        }
    }
    Ok(changed)
}

/// The document inserted by an upsert: filter fields plus the update.
pub fn upsert_document(filter: &Document, update: &Document) -> Result<Document> {
    let mut doc = filter.clone();
    apply_update(&mut doc, update)?;
    Ok(doc)
}

fn set_fields(doc: &mut Document, fields: &Document) -> bool {
    let mut changed = false;
    for (k, v) in fields {
        if doc.get(k) != Some(v) {
            doc.insert(k.clone(), v.clone());
            changed = true;
        }
    }
    changed
}

fn increment(current: Option<&Value>, by: &Value) -> Option<Value> {
    let current = current.cloned().unwrap_or(Value::from(0));
    if let (Some(a), Some(b)) = (current.as_i64(), by.as_i64()) {
        return Some(Value::from(a.checked_add(b)?));
    }
    let sum = current.as_f64()? + by.as_f64()?;
    serde_json::Number::from_f64(sum).map(Value::Number)
}
