//! History source adapters.
//!
//! Defines the `HistorySource` trait (one page of draws per call) and the
//! page-accumulating `fetch_history` helper shared by the prediction cycle
//! and training. Page failures are transient: the page is skipped and the
//! rest of the window still accumulates.

pub mod wingo;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::types::{OutcomeRecord, StreamConfig};

/// Pages requested concurrently by [`fetch_history`].
pub const PAGE_CONCURRENCY: usize = 4;

/// Abstraction over a paginated outcome history provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Fetch one 1-based page of draws for a stream, newest first.
    async fn fetch_page(&self, stream: &StreamConfig, page: u32) -> Result<Vec<OutcomeRecord>>;
}

/// Accumulate pages `1..=pages`. Failed pages are logged and skipped;
/// repeated issues (pages shifting between requests) keep their first
/// occurrence. The result may be partial or empty but never an error.
pub async fn fetch_history(
    source: &dyn HistorySource,
    stream: &StreamConfig,
    pages: u32,
) -> Vec<OutcomeRecord> {
    let results: Vec<(u32, Result<Vec<OutcomeRecord>>)> = stream::iter(1..=pages)
        .map(|page| async move { (page, source.fetch_page(stream, page).await) })
        .buffered(PAGE_CONCURRENCY)
        .collect()
        .await;

    let mut seen = HashSet::new();
    let mut history = Vec::new();
    let mut failed = 0u32;
    for (page, result) in results {
        match result {
            Ok(records) => {
                for record in records {
                    if seen.insert(record.issue_number.clone()) {
                        history.push(record);
                    }
                }
            }
            Err(e) => {
                failed += 1;
                warn!(stream = %stream.id, page, error = %e, "History page failed, skipping");
            }
        }
    }

    debug!(
        stream = %stream.id,
        pages,
        failed,
        records = history.len(),
        "History fetched"
    );
    history
}
