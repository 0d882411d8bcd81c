//! Transparent pagination over list and find
//!
//! Pages are requested in fixed batches. A `NotFound` on a page means the
//! remaining resources were deleted while we were paging, so whatever was
//! collected so far is returned instead of an error.

use crate::error::InventoryError;
use crate::inventory_trait::InventoryClientTrait;
use crate::models::{Resource, ResourceFilter, ResourceKey};
use std::collections::HashSet;
use tracing::debug;

/// Number of resources requested per page
pub const BATCH_SIZE: u32 = 100;

/// Collect every resource matching `filter`, deduplicated by key
pub async fn list_all<C>(client: &C, filter: &ResourceFilter) -> Result<Vec<Resource>, InventoryError>
where
    C: InventoryClientTrait + ?Sized,
{
    let mut collected = Vec::new();
    let mut offset = 0;
    loop {
        let page_filter = filter.clone().page(BATCH_SIZE, offset);
        match client.list(&page_filter).await {
            Ok(page) => {
                collected.extend(page.items);
                if !page.has_next {
                    break;
                }
                offset += BATCH_SIZE;
            }
            Err(e) if e.is_not_found() => {
                debug!(
                    "listAll {} stopped at offset {}: {}",
                    filter.kind, offset, e
                );
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(dedup_by_key(collected, Resource::key))
}

/// Collect the key of every resource matching `filter`, deduplicated
pub async fn find_all<C>(client: &C, filter: &ResourceFilter) -> Result<Vec<ResourceKey>, InventoryError>
where
    C: InventoryClientTrait + ?Sized,
{
    let mut collected = Vec::new();
    let mut offset = 0;
    loop {
        let page_filter = filter.clone().page(BATCH_SIZE, offset);
        match client.find(&page_filter).await {
            Ok(page) => {
                collected.extend(page.items);
                if !page.has_next {
                    break;
                }
                offset += BATCH_SIZE;
            }
            Err(e) if e.is_not_found() => {
                debug!(
                    "findAll {} stopped at offset {}: {}",
                    filter.kind, offset, e
                );
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(dedup_by_key(collected, ResourceKey::clone))
}

/// Keep the first occurrence of every key, preserving order
fn dedup_by_key<T, F>(items: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> ResourceKey,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(key(item)))
        .collect()
}
