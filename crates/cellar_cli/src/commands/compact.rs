//! Compact command implementation.

use super::format_size;
use cellar_core::Database;
use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open_existing(path)?;
    let before = db.stats()?;

    println!("Compacting {}", path.display());
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();
    println!("  File size:    {}", format_size(before.file_size));
    println!("  Reclaimable:  {}", format_size(before.reclaimable_bytes));

    if dry_run {
        db.close()?;
        return Ok(());
    }
    if before.reclaimable_bytes == 0 {
        println!();
        println!("No compaction needed - file holds no dead pages");
        db.close()?;
        return Ok(());
    }

    let outcome = db.compact()?;
    db.close()?;
    match outcome {
        Some(stats) => {
            let saved = stats.bytes_before.saturating_sub(stats.bytes_after);
            println!();
            println!("✓ Compaction complete");
            println!("  Pages kept:   {}", stats.pages);
            println!("  Size after:   {}", format_size(stats.bytes_after));
            println!(
                "  Space saved:  {} ({:.1}%)",
                format_size(saved),
                percent(saved, stats.bytes_before)
            );
        }
        None => {
            println!();
            println!("Compaction skipped - older versions are still in use");
        }
    }
    Ok(())
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
