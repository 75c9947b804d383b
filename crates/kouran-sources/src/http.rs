//! Shared GET helper: bounded timeout, 2xx required.

use kouran_core::{KouranError, Result};
use std::time::Duration;

pub(crate) async fn get_text(client: &reqwest::Client, url: &str, timeout: Duration) -> Result<String> {
    let resp = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| KouranError::Fetch(format!("GET {url} failed: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(KouranError::Fetch(format!("GET {url} returned {status}")));
    }

    resp.text()
        .await
        .map_err(|e| KouranError::Fetch(format!("reading body of {url} failed: {e}")))
}
