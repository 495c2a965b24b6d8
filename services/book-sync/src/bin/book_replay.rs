//! Rebuild a book from a snapshot file and an events file.
//!
//! Usage: `book-replay <snapshot.json> <events.json> [depth]`

use anyhow::{bail, Context};
use book_sync::{BookSession, JsonFileSource, Query, SessionError};
use chrono::Utc;
use types::time::TimeWindow;

const DEFAULT_DEPTH: usize = 20;

fn main() -> Result<(), anyhow::Error> {
    // Logs on stderr; stdout carries the depth JSON
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (snapshot_path, events_path) = match args.as_slice() {
        [snapshot, events, ..] => (snapshot, events),
        _ => bail!("usage: book-replay <snapshot.json> <events.json> [depth]"),
    };
    let depth = match args.get(2) {
        Some(raw) => raw.parse().with_context(|| format!("invalid depth: {}", raw))?,
        None => DEFAULT_DEPTH,
    };

    tracing::info!(snapshot = %snapshot_path, events = %events_path, "Starting book replay");

    let source = JsonFileSource::new(snapshot_path, events_path);
    let mut session = BookSession::new(source);

    let query = Query::new("file", "file", TimeWindow::unbounded());
    match session.load_snapshot(query) {
        Ok(book) => tracing::info!(levels = book.len(), "Snapshot ready"),
        Err(e) if e.is_informational() => {
            tracing::warn!(state = e.label(), "{}", e);
            return Ok(());
        }
        Err(e) => return Err(e).context("loading snapshot"),
    }

    match session.apply_new_events(Utc::now()) {
        Ok(stats) => tracing::info!(
            applied = stats.events_applied,
            discarded = stats.events_discarded,
            position = %stats.position,
            "Events merged"
        ),
        Err(e) if e.is_informational() => tracing::info!(state = e.label(), "{}", e),
        Err(SessionError::NoTimeBound) => {
            tracing::warn!("Snapshot carries no timestamps; showing it unchanged")
        }
        Err(e) => return Err(e).context("applying events"),
    }

    let view = session
        .depth(depth)
        .context("no book held after loading snapshot")?;
    println!("{}", serde_json::to_string_pretty(&view)?);

    Ok(())
}
