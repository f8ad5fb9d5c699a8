//! Catalog snapshot extraction and the filtering/formatting applied to it.

mod format;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use state::BannedIds;
use thiserror::Error;
use tracing::{debug, warn};

pub use format::{format_alert, format_listing, format_price, split_message, ALERT_HEADER};

/// Script evaluated in the listing page to obtain the storefront's product metadata.
pub const CATALOG_SCRIPT: &str = "return meta;";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: u64,
    /// Minor currency units.
    pub price: u64,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("page metadata is missing `{0}`")]
    MissingField(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub variants: Vec<ProductVariant>,
    /// Variants dropped because a required field was absent or invalid.
    pub skipped: usize,
}

/// Flattens `products[].variants[]` from the page metadata object.
pub fn parse_snapshot(meta: &Value) -> Result<Snapshot, CatalogError> {
    let products = meta
        .get("products")
        .and_then(Value::as_array)
        .ok_or(CatalogError::MissingField("products"))?;

    let mut snapshot = Snapshot::default();
    for product in products {
        let Some(variants) = product.get("variants").and_then(Value::as_array) else {
            snapshot.skipped += 1;
            continue;
        };
        for variant in variants {
            match parse_variant(variant) {
                Some(v) => snapshot.variants.push(v),
                None => {
                    debug!(%variant, "skipping malformed variant");
                    snapshot.skipped += 1;
                }
            }
        }
    }
    if snapshot.skipped > 0 {
        warn!(skipped = snapshot.skipped, "catalog contained malformed entries");
    }
    Ok(snapshot)
}

fn parse_variant(variant: &Value) -> Option<ProductVariant> {
    Some(ProductVariant {
        id: variant.get("id")?.as_u64()?,
        price: variant.get("price")?.as_u64()?,
        name: variant.get("name")?.as_str()?.to_string(),
    })
}

/// Drops banned variants and orders the rest by ascending price.
pub fn prepare(variants: Vec<ProductVariant>, banned: &BannedIds) -> Vec<ProductVariant> {
    let mut items: Vec<_> = variants
        .into_iter()
        .filter(|v| !banned.contains(v.id))
        .collect();
    items.sort_by_key(|v| v.price);
    items
}

/// Items priced strictly below `threshold` whole currency units.
pub fn below_threshold(items: &[ProductVariant], threshold: u64) -> Vec<&ProductVariant> {
    let limit = threshold.saturating_mul(100);
    items.iter().filter(|v| v.price < limit).collect()
}
