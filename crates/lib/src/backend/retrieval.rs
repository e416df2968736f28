//! Keyword retrieval over a JSON events file, used as prompt context.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// One entry of the events file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventRecord {
    pub title: String,
    pub date: String,
    pub description: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("failed to read events file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid events JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub fn load_events(path: &Path) -> Result<Vec<EventRecord>, RetrievalError> {
    let bytes = std::fs::read(path).map_err(|source| RetrievalError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| RetrievalError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn searchable_text(event: &EventRecord) -> String {
    format!("{} {}", event.title, event.description).to_lowercase()
}

/// Rank events by how many query words (longer than one byte) they contain.
/// A query with no usable words returns the first `limit` events unranked.
pub fn search_events<'a>(
    events: &'a [EventRecord],
    query: &str,
    limit: usize,
) -> Vec<&'a EventRecord> {
    let query = query.to_lowercase();
    let words: Vec<&str> = query.split_whitespace().filter(|w| w.len() > 1).collect();
    if words.is_empty() {
        return events.iter().take(limit).collect();
    }
    let mut scored: Vec<(usize, &EventRecord)> = events
        .iter()
        .map(|e| {
            let text = searchable_text(e);
            (words.iter().filter(|w| text.contains(*w)).count(), e)
        })
        .filter(|(n, _)| *n > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().take(limit).map(|(_, e)| e).collect()
}

pub fn format_events(events: &[&EventRecord]) -> String {
    if events.is_empty() {
        return "(No relevant events found.)".to_string();
    }
    events
        .iter()
        .map(|e| format!("- {} ({}) {}", e.title, e.date, e.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Load, rank, and format in one go.
pub fn retrieve_context(path: &Path, query: &str, limit: usize) -> Result<String, RetrievalError> {
    let events = load_events(path)?;
    Ok(format_events(&search_events(&events, query, limit)))
}
