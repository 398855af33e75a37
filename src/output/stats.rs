//! Blob store inventory statistics
//!
//! This module lists what the blob store already holds so operators can see
//! which originals still lack optimized variants.

use crate::blob::{list_all, BlobResult, BlobStore};
use crate::image::{ORIGINALS_PREFIX, VARIANTS_PREFIX};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Contents of the blob store under a prefix
#[derive(Debug, Clone, Default, Serialize)]
pub struct Inventory {
    pub prefix: String,

    /// Total number of keys listed
    pub total_keys: u64,

    /// Number of stored originals
    pub originals: u64,

    /// Number of stored variants per format
    pub variants_by_format: BTreeMap<String, u64>,

    /// Canonical paths of originals that have no variant at all
    pub originals_without_variants: Vec<String>,

    /// Keys that follow neither layout
    pub unrecognized: u64,
}

/// Lists every key under `prefix` and tallies it
///
/// # Arguments
///
/// * `store` - The blob store to list
/// * `prefix` - Key prefix; empty lists the whole store
pub async fn load_inventory(store: &dyn BlobStore, prefix: &str) -> BlobResult<Inventory> {
    let keys = list_all(store, prefix).await?;
    Ok(tally(prefix, &keys))
}

fn tally(prefix: &str, keys: &[String]) -> Inventory {
    let mut inventory = Inventory {
        prefix: prefix.to_string(),
        total_keys: keys.len() as u64,
        ..Inventory::default()
    };

    let mut originals = BTreeSet::new();
    let mut with_variants = BTreeSet::new();

    for key in keys {
        if let Some(path) = key.strip_prefix(ORIGINALS_PREFIX) {
            inventory.originals += 1;
            originals.insert(path.to_string());
        } else if let Some(rest) = key.strip_prefix(VARIANTS_PREFIX) {
            // {format}/{params}/{canonical path}
            let mut parts = rest.splitn(3, '/');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(format), Some(_), Some(path)) => {
                    *inventory
                        .variants_by_format
                        .entry(format.to_string())
                        .or_insert(0) += 1;
                    with_variants.insert(path.to_string());
                }
                _ => inventory.unrecognized += 1,
            }
        } else {
            inventory.unrecognized += 1;
        }
    }

    inventory.originals_without_variants = originals.difference(&with_variants).cloned().collect();
    inventory
}

/// Prints an inventory to stdout in a formatted manner
pub fn print_inventory(inventory: &Inventory) {
    println!("=== Blob Store Inventory ===\n");

    if !inventory.prefix.is_empty() {
        println!("Prefix: {}", inventory.prefix);
    }
    println!("Total keys: {}", inventory.total_keys);
    println!("Originals:  {}", inventory.originals);
    println!();

    println!("Variants by Format:");
    if inventory.variants_by_format.is_empty() {
        println!("  (none)");
    }
    for (format, count) in &inventory.variants_by_format {
        println!("  {}: {}", format, count);
    }
    println!();

    if inventory.unrecognized > 0 {
        println!("Unrecognized keys: {}", inventory.unrecognized);
        println!();
    }

    if !inventory.originals_without_variants.is_empty() {
        println!(
            "Originals Without Variants ({}):",
            inventory.originals_without_variants.len()
        );
        for path in &inventory.originals_without_variants {
            println!("  - {}", path);
        }
    }
}
