//! CEB outage page parser.
//!
//! The page embeds `var arDistrictLocations = {...};`, a JSON object mapping
//! each district to an HTML fragment with one or more
//! `table[id^=table-mauritius]` tables of `date | locality | streets` rows.

use async_trait::async_trait;
use kouran_core::{KouranError, Outage, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use crate::OutageSource;
use crate::date::parse_french_date;
use crate::fingerprint::{FingerprintFields, fingerprint};
use crate::http::get_text;

static DISTRICT_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"var arDistrictLocations\s*=\s*(\{.+\});").expect("assignment pattern is valid")
});

static ROW_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"table[id^="table-mauritius"] tbody tr"#).expect("row selector is valid")
});

static CELL_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td").expect("cell selector is valid"));

/// A table row before identity and date resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub date: String,
    pub locality: String,
    pub streets: String,
    pub district: String,
}

impl RawRow {
    pub fn fields(&self) -> FingerprintFields<'_> {
        FingerprintFields {
            date: &self.date,
            locality: &self.locality,
            streets: &self.streets,
            district: &self.district,
        }
    }
}

/// Source backed by the CEB website.
pub struct CebSource {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl CebSource {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), url, timeout)
    }

    pub fn with_client(client: reqwest::Client, url: &str, timeout: Duration) -> Self {
        Self {
            client,
            url: url.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl OutageSource for CebSource {
    fn name(&self) -> &str {
        "ceb"
    }

    async fn fetch(&self) -> Result<Vec<Outage>> {
        tracing::info!("🌐 Fetching power outage page from {}", self.url);
        let html = get_text(&self.client, &self.url, self.timeout).await?;
        parse_page(&html)
    }
}

/// Pull the district → fragment map out of the page.
pub fn extract_district_data(html: &str) -> Result<Vec<(String, String)>> {
    let caps = DISTRICT_ASSIGNMENT
        .captures(html)
        .ok_or_else(|| KouranError::SourceFormat("arDistrictLocations not found in page".into()))?;

    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&caps[1])
        .map_err(|e| KouranError::SourceFormat(format!("arDistrictLocations is not valid JSON: {e}")))?;

    let mut districts = Vec::with_capacity(object.len());
    for (district, value) in object {
        match value {
            serde_json::Value::String(fragment) => districts.push((district, fragment)),
            other => tracing::warn!(
                "⚠️ District '{district}' has a non-string fragment ({}), skipping",
                json_type(&other)
            ),
        }
    }
    Ok(districts)
}

/// Rows of every outage table in one district fragment.
pub fn parse_district_table(fragment: &str, district: &str) -> Vec<RawRow> {
    let doc = Html::parse_fragment(fragment);
    let mut rows = Vec::new();

    for tr in doc.select(&ROW_SELECTOR) {
        let cells: Vec<String> = tr.select(&CELL_SELECTOR).map(cell_text).collect();
        if cells.len() < 3 {
            continue;
        }
        if cells[0].is_empty() {
            continue;
        }
        rows.push(RawRow {
            date: cells[0].clone(),
            locality: cells[1].clone(),
            streets: cells[2].clone(),
            district: district.to_string(),
        });
    }
    rows
}

/// Parse a full page into outages; bad rows are logged and dropped.
pub fn parse_page(html: &str) -> Result<Vec<Outage>> {
    let districts = extract_district_data(html)?;
    if districts.is_empty() {
        return Err(KouranError::SourceFormat("no district data found in page".into()));
    }
    tracing::info!("🗺️ Found {} districts in CEB data", districts.len());

    let mut outages = Vec::new();
    for (district, fragment) in &districts {
        let rows = parse_district_table(fragment, district);
        let mut seen = HashSet::new();
        let before = outages.len();

        for row in rows {
            // Identity first: date resolution must never influence the id.
            let id = fingerprint(&row.fields());
            if !seen.insert(id.clone()) {
                continue;
            }
            match parse_french_date(&row.date) {
                Ok((from, to)) => outages.push(Outage {
                    id,
                    date: row.date,
                    locality: row.locality,
                    streets: row.streets,
                    district: row.district,
                    from,
                    to,
                }),
                Err(e) => tracing::warn!("⚠️ Skipping outage in {district}: {e}"),
            }
        }
        tracing::debug!("District {district}: {} outages", outages.len() - before);
    }
    Ok(outages)
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().map(str::trim).collect()
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
