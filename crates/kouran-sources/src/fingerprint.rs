//! Outage identity.
//!
//! The id is the MD5 of the compact JSON object
//! `{"date":…,"locality":…,"streets":…,"district":…}` with non-ASCII text
//! written verbatim. The aggregated dataset computes the same value with
//! `JSON.stringify`, so ids agree across sources and implementations.

use serde::Serialize;

/// The only fields that participate in identity. Field order is part of the contract.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FingerprintFields<'a> {
    pub date: &'a str,
    pub locality: &'a str,
    pub streets: &'a str,
    pub district: &'a str,
}

/// 32-character lowercase hex digest.
pub fn fingerprint(fields: &FingerprintFields<'_>) -> String {
    // serde_json only fails on non-string map keys and failing Serialize impls; neither applies.
    let canonical = serde_json::to_string(fields).unwrap_or_default();
    format!("{:x}", md5::compute(canonical.as_bytes()))
}
