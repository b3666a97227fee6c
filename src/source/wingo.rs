//! WinGo draw-history HTTP source.
//!
//! Endpoint: `{base_url}/{endpoint}/GetHistoryIssuePage.json?pageNo={page}`
//! Response: `{"data": {"list": [{"issueNumber": "...", "number": "7",
//! "color": "green"}, ...]}}`, newest draw first.
//! Auth: none.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::HistorySource;
use crate::types::{Color, OutcomeRecord, StreamConfig};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://draw.ar-lottery01.com/WinGo";

const DEFAULT_TIMEOUT_SECS: u64 = 10;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct HistoryPage {
    #[serde(default)]
    data: Option<HistoryData>,
}

#[derive(Debug, Deserialize)]
struct HistoryData {
    #[serde(default)]
    list: Vec<RawOutcome>,
}

/// One draw as the API returns it. `number` arrives as either a JSON
/// number or a numeric string.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOutcome {
    issue_number: String,
    #[serde(default)]
    number: serde_json::Value,
    #[serde(default)]
    color: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for the WinGo history endpoints.
pub struct WingoClient {
    http: Client,
    base_url: String,
}

impl WingoClient {
    pub fn new(base_url: Option<String>, timeout: Option<Duration>) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout.unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS)))
            .user_agent(concat!("wingo-predictor/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client for history source")?;

        Ok(Self {
            http,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    pub fn page_url(&self, stream: &StreamConfig, page: u32) -> String {
        format!(
            "{}/{}/GetHistoryIssuePage.json?pageNo={page}",
            self.base_url, stream.endpoint
        )
    }
}

#[async_trait]
impl HistorySource for WingoClient {
    async fn fetch_page(&self, stream: &StreamConfig, page: u32) -> Result<Vec<OutcomeRecord>> {
        let url = self.page_url(stream, page);
        debug!(url = %url, "Fetching history page");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("History request failed for {}", stream.endpoint))?;

        if !resp.status().is_success() {
            anyhow::bail!("History source returned {} for {url}", resp.status());
        }

        let body = resp
            .text()
            .await
            .context("Failed to read history response body")?;
        parse_page(&body)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse one page body. Records with an unknown colour are dropped; an
/// unparsable `number` becomes a missing value.
pub fn parse_page(body: &str) -> Result<Vec<OutcomeRecord>> {
    let page: HistoryPage =
        serde_json::from_str(body).context("Failed to parse history page")?;
    let raw = page
        .data
        .context("History page has no `data` object")?
        .list;

    let observed = Utc::now();
    let total = raw.len();
    let records: Vec<OutcomeRecord> = raw
        .into_iter()
        .filter_map(|r| {
            let color = match r.color.parse::<Color>() {
                Ok(c) => c,
                Err(e) => {
                    debug!(issue = %r.issue_number, error = %e, "Skipping malformed record");
                    return None;
                }
            };
            Some(OutcomeRecord {
                number: parse_number(&r.number),
                issue_number: r.issue_number,
                color,
                timestamp: observed,
            })
        })
        .collect();

    if records.len() < total {
        debug!(kept = records.len(), total, "Dropped malformed records");
    }
    Ok(records)
}

/// Numeric value from a JSON number or numeric string.
fn parse_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page_mixed_number_types() {
        let body = r#"{"data": {"list": [
            {"issueNumber": "20240101010", "number": "7", "color": "green"},
            {"issueNumber": "20240101009", "number": 0, "color": "red,violet"},
            {"issueNumber": "20240101008", "number": "x", "color": "RED"}
        ]}, "code": 0}"#;
        let records = parse_page(body).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].number, Some(7.0));
        assert_eq!(records[0].color, Color::Green);
        assert_eq!(records[1].number, Some(0.0));
        assert_eq!(records[1].color, Color::Violet);
        assert_eq!(records[2].number, None);
    }

    #[test]
    fn test_parse_page_skips_unknown_color() {
        let body = r#"{"data": {"list": [
            {"issueNumber": "1", "number": 1, "color": "blue"},
            {"issueNumber": "2", "number": 2, "color": "red"}
        ]}}"#;
        let records = parse_page(body).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].issue_number, "2");
    }

    #[test]
    fn test_parse_page_malformed_body() {
        assert!(parse_page("<html>busy</html>").is_err());
        assert!(parse_page(r#"{"msg": "no data"}"#).is_err());
    }

    #[test]
    fn test_parse_page_empty_list() {
        assert!(parse_page(r#"{"data": {"list": []}}"#).unwrap().is_empty());
    }

    #[test]
    fn test_page_url() {
        let client = WingoClient::new(Some("https://example.com/WinGo/".into()), None).unwrap();
        let stream = StreamConfig::new("30sec", "WinGo_30S", 30);
        assert_eq!(
            client.page_url(&stream, 3),
            "https://example.com/WinGo/WinGo_30S/GetHistoryIssuePage.json?pageNo=3"
        );
    }

    #[test]
    fn test_client_default_base_url() {
        let client = WingoClient::new(None, None).unwrap();
        assert!(client.base_url.starts_with("https://"));
    }
}
