//! District → locality seed data.
//!
//! The bot ships a `districts_localities.json` file (`{district: [locality, ...]}`)
//! derived from the historical outage dataset (`{district: [{locality, ...}, ...]}`).

use kouran_core::{KouranError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub type LocalityIndex = BTreeMap<String, Vec<String>>;

/// Read a locality index file.
pub fn load_locality_file(path: &Path) -> Result<LocalityIndex> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| KouranError::SourceFormat(format!("{}: not a locality index: {e}", path.display())))
}

/// Build the index from a dataset dump: sorted, de-duplicated locality names per district.
pub fn build_locality_index(dataset: &serde_json::Value) -> Result<LocalityIndex> {
    let districts = dataset
        .as_object()
        .ok_or_else(|| KouranError::SourceFormat("dataset must be an object keyed by district".into()))?;

    let mut index = LocalityIndex::new();
    for (district, outages) in districts {
        let names: BTreeSet<String> = outages
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|o| o.get("locality").and_then(|l| l.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        index.insert(district.clone(), names.into_iter().collect());
    }
    Ok(index)
}
