//! Dump command implementation.

use super::{format_size, Format};
use cellar_core::{Database, FrameInfo};
use serde::Serialize;
use std::path::Path;

/// One frame as printed by `dump`.
#[derive(Debug, Serialize)]
pub struct FrameRow {
    /// Byte offset of the frame.
    pub offset: u64,
    /// Encoded frame length.
    pub len: u64,
    /// `object`, `root` or `torn`.
    pub kind: &'static str,
    /// Page id, absent for torn frames.
    pub page_id: Option<u64>,
    /// Referenced by a retained version.
    pub live: bool,
}

impl From<&FrameInfo> for FrameRow {
    fn from(frame: &FrameInfo) -> Self {
        Self {
            offset: frame.offset,
            len: frame.len,
            kind: match frame.kind {
                Some(cellar_core::FrameKind::Object) => "object",
                Some(cellar_core::FrameKind::Root) => "root",
                None => "torn",
            },
            page_id: frame.page_id,
            live: frame.live,
        }
    }
}

/// Lists frames starting at index `skip`, at most `limit` of them.
pub fn collect(
    db: &Database,
    skip: usize,
    limit: Option<usize>,
    live_only: bool,
) -> cellar_core::CoreResult<Vec<FrameRow>> {
    let frames = db.scan_frames()?;
    Ok(frames
        .iter()
        .filter(|frame| !live_only || frame.live)
        .skip(skip)
        .take(limit.unwrap_or(usize::MAX))
        .map(FrameRow::from)
        .collect())
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    skip: usize,
    limit: Option<usize>,
    live_only: bool,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open_existing(path)?;
    let rows = collect(&db, skip, limit, live_only)?;
    db.close()?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        Format::Text => {
            println!("{:>10}  {:>10}  {:<6}  {:>8}  live", "offset", "size", "kind", "page");
            for row in &rows {
                let page = row
                    .page_id
                    .map_or_else(|| "-".to_string(), |id| id.to_string());
                println!(
                    "{:>10}  {:>10}  {:<6}  {:>8}  {}",
                    row.offset,
                    format_size(row.len),
                    row.kind,
                    page,
                    if row.live { "yes" } else { "no" }
                );
            }
            println!();
            println!("{} frames", rows.len());
        }
    }
    Ok(())
}
