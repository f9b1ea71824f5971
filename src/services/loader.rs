use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

use crate::{
    models::{InteractionRecord, NewInteraction},
    services::index_manager::IndexManager,
};

/// Records ingested per writer-lock acquisition while seeding
const SEED_BATCH_SIZE: usize = 1_000;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SeedReport {
    pub accepted: usize,
    pub rejected: usize,
}

/// Parses JSON-lines interaction records, skipping malformed lines
///
/// Blank lines are ignored. Rejected lines are logged and counted; the loader
/// does not retry them.
pub fn parse_seed_lines(contents: &str, now: DateTime<Utc>) -> (Vec<NewInteraction>, usize) {
    let mut accepted = Vec::new();
    let mut rejected = 0;

    for (line_number, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed = serde_json::from_str::<InteractionRecord>(line)
            .map_err(|e| e.to_string())
            .and_then(|record| record.validate(now).map_err(|e| e.to_string()));
        match parsed {
            Ok(interaction) => accepted.push(interaction),
            Err(error) => {
                rejected += 1;
                tracing::warn!(line = line_number + 1, error = %error, "Skipping seed record");
            }
        }
    }

    (accepted, rejected)
}

/// Loads a seed file into the manager
///
/// When incremental updates are off the index is rebuilt once at the end,
/// after any rebuild a stale read kicked off meanwhile has finished.
pub async fn load_seed_file(
    manager: &IndexManager,
    path: &Path,
    incremental_updates: bool,
) -> anyhow::Result<SeedReport> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read seed file {}: {}", path.display(), e))?;

    let (interactions, rejected) = parse_seed_lines(&contents, Utc::now());
    let accepted = interactions.len();

    let mut remaining = interactions.into_iter().peekable();
    while remaining.peek().is_some() {
        let batch: Vec<NewInteraction> = remaining.by_ref().take(SEED_BATCH_SIZE).collect();
        manager.ingest(batch).await;
    }

    if !incremental_updates {
        manager.rebuild_when_idle().await?;
    }

    tracing::info!(
        path = %path.display(),
        accepted,
        rejected,
        "Seed interactions loaded"
    );

    Ok(SeedReport { accepted, rejected })
}
