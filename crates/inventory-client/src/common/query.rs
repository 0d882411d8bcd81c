//! Query utilities for the inventory API
//!
//! Builds collection paths and query strings from a [`ResourceFilter`].

use crate::models::ResourceFilter;

/// Path of the collection holding `filter.kind`, with the filter encoded
/// as query parameters. `suffix` selects a sub-endpoint such as `/keys`.
pub fn collection_path(filter: &ResourceFilter, suffix: &str) -> String {
    let mut params: Vec<(&str, String)> = Vec::new();
    if let Some(tenant_id) = &filter.tenant_id {
        params.push(("tenant_id", tenant_id.clone()));
    }
    for (name, value) in &filter.fields {
        params.push((name.as_str(), value.clone()));
    }
    if filter.limit > 0 {
        params.push(("limit", filter.limit.to_string()));
        params.push(("offset", filter.offset.to_string()));
    }

    let path = format!("/v1/{}{}", filter.kind.collection(), suffix);
    if params.is_empty() {
        path
    } else {
        format!("{}?{}", path, build_query_string(&params))
    }
}

/// Path of a single resource inside a tenant
pub fn resource_path(tenant_id: &str, resource_id: &str) -> String {
    format!(
        "/v1/tenants/{}/resources/{}",
        urlencoding::encode(tenant_id),
        urlencoding::encode(resource_id)
    )
}

/// Build query string from filters
pub fn build_query_string(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}
