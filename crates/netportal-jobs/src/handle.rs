//! Cache-key computation.
//!
//! Jobs for the same table, column set and criteria share one handle and
//! therefore one execution. The handle is a SHA-256 digest over a
//! serialized preimage whose criteria map is key-sorted, so equal inputs
//! always produce equal handles regardless of insertion order.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};
use ulid::Ulid;

use crate::criteria::Criteria;
use crate::error::{Error, Result};
use crate::table::Table;
use crate::value::Value;

/// Version of the handle preimage layout.
const HANDLE_VERSION: u32 = 1;

/// Prefix of handles that are never shared.
pub const UNCACHED_PREFIX: &str = "uncached-";

#[derive(Serialize)]
struct HandlePreimage<'a> {
    version: u32,
    table_id: u64,
    columns: Vec<&'a str>,
    criteria: BTreeMap<&'a str, &'a Value>,
}

/// Computes the cache handle for running `table` with `criteria`.
///
/// Non-cacheable tables and criteria with `ignore_cache` set get a unique
/// handle built from a fresh ULID (current time plus randomness).
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the preimage cannot be serialized.
pub fn compute_handle(table: &Table, criteria: &Criteria) -> Result<String> {
    if !table.is_cacheable() || criteria.ignore_cache() {
        return Ok(format!("{UNCACHED_PREFIX}{}", Ulid::new().to_string().to_lowercase()));
    }

    let normalised = table.handle_criteria(criteria);
    let preimage = HandlePreimage {
        version: HANDLE_VERSION,
        table_id: table.id().get(),
        columns: table.cache_column_names(),
        criteria: normalised.iter().map(|(k, v)| (k.as_str(), v)).collect(),
    };
    let bytes = serde_json::to_vec(&preimage).map_err(|e| Error::Serialization {
        message: format!("failed to serialize handle preimage: {e}"),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(format!("netportal-handle:v{HANDLE_VERSION}:").as_bytes());
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Returns true if `handle` was produced for an uncached job.
#[must_use]
pub fn is_uncached(handle: &str) -> bool {
    handle.starts_with(UNCACHED_PREFIX)
}
