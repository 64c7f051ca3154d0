use crate::error::Result;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Hash a string with SHA256
pub fn hash_data(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Render a value as compact JSON with object keys sorted at every level.
///
/// Going through `serde_json::Value` is what sorts the keys: its map is a
/// `BTreeMap`, so the output does not depend on struct field order.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&value)?)
}

/// Seconds since the unix epoch, with microsecond precision.
pub fn current_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
