//! Filtering and field-mask merging for the mock store
//!
//! Resources are compared through their JSON form so the same field names
//! used on the wire drive both filters and masks.

use crate::error::InventoryError;
use crate::models::{FieldMask, Page, Resource, ResourceFilter, ResourceKey};
use serde_json::Value;
use std::collections::BTreeMap;

fn body(resource: &Resource) -> Result<Value, InventoryError> {
    let mut value = serde_json::to_value(resource)?;
    Ok(value
        .get_mut("resource")
        .map(Value::take)
        .unwrap_or(Value::Null))
}

fn field_matches(body: &Value, name: &str, expected: &str) -> bool {
    match body.get(name) {
        Some(Value::String(s)) => s == expected,
        Some(Value::Null) | None => expected.is_empty(),
        Some(other) => other.to_string() == expected,
    }
}

pub(crate) fn matching(
    resources: &BTreeMap<ResourceKey, Resource>,
    filter: &ResourceFilter,
) -> Result<Vec<Resource>, InventoryError> {
    let mut out = Vec::new();
    for resource in resources.values() {
        if resource.kind() != filter.kind {
            continue;
        }
        if let Some(tenant_id) = &filter.tenant_id {
            if resource.tenant_id() != tenant_id {
                continue;
            }
        }
        let body = body(resource)?;
        if filter
            .fields
            .iter()
            .all(|(name, value)| field_matches(&body, name, value))
        {
            out.push(resource.clone());
        }
    }
    Ok(out)
}

pub(crate) fn paginate(items: Vec<Resource>, filter: &ResourceFilter) -> Page<Resource> {
    let total = items.len();
    let total_elements = u32::try_from(total).unwrap_or(u32::MAX);
    if filter.limit == 0 {
        return Page {
            items,
            has_next: false,
            total_elements,
        };
    }
    let offset = filter.offset as usize;
    let limit = filter.limit as usize;
    let has_next = offset + limit < total;
    Page {
        items: items.into_iter().skip(offset).take(limit).collect(),
        has_next,
        total_elements,
    }
}

/// Copy the masked fields of `patch` over `existing`
pub(crate) fn merge(
    existing: &Resource,
    patch: &Resource,
    mask: &FieldMask,
) -> Result<Resource, InventoryError> {
    if existing.kind() != patch.kind() {
        return Err(InventoryError::InvalidArgument(format!(
            "cannot update {} with a {} payload",
            existing.kind(),
            patch.kind()
        )));
    }
    let mut merged = serde_json::to_value(existing)?;
    let patch_body = body(patch)?;
    let target = merged
        .get_mut("resource")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| InventoryError::Internal("stored resource has no body".to_string()))?;
    for path in &mask.paths {
        if !target.contains_key(path) {
            return Err(InventoryError::InvalidArgument(format!(
                "unknown field in mask: {path}"
            )));
        }
        let value = patch_body.get(path).cloned().unwrap_or(Value::Null);
        target.insert(path.clone(), value);
    }
    Ok(serde_json::from_value(merged)?)
}
