//! Inspect command implementation.

use super::{format_size, Format};
use cellar_core::{Database, DatabaseStats, SchemaDescriptor};
use serde::Serialize;
use std::path::Path;

/// Everything `inspect` reports.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Space, version and count figures.
    #[serde(flatten)]
    pub stats: DatabaseStats,
    /// The schema stored in the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaDescriptor>,
}

/// Collects the inspection result for an open database.
pub fn collect(db: &Database, with_schema: bool) -> cellar_core::CoreResult<InspectResult> {
    Ok(InspectResult {
        stats: db.stats()?,
        schema: with_schema.then(|| db.schema().descriptor().clone()),
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, show_schema: bool, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open_existing(path)?;
    let result = collect(&db, show_schema)?;
    db.close()?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text(&result),
    }
    Ok(())
}

fn print_text(result: &InspectResult) {
    let stats = &result.stats;
    println!("CellarDB Database Inspection");
    println!("============================");
    println!();
    if let Some(path) = &stats.path {
        println!("Path:    {path}");
    }
    println!("Version: {}", stats.version);
    println!(
        "Format:  {}.{}",
        stats.format_version.0, stats.format_version.1
    );
    println!();
    println!("Storage:");
    println!("  File size:    {}", format_size(stats.file_size));
    println!("  Live:         {}", format_size(stats.live_bytes));
    println!("  Reclaimable:  {}", format_size(stats.reclaimable_bytes));
    println!();
    println!("Objects: {}", stats.objects);
    for ty in &stats.types {
        println!("  {:<20} {:>8} objects, {} indexes", ty.name, ty.objects, ty.indexes);
    }

    if let Some(schema) = &result.schema {
        println!();
        println!("Schema:");
        for object_type in &schema.object_types {
            println!("  {}", object_type.name);
            for property in &object_type.properties {
                let mut flags = Vec::new();
                if property.primary_key {
                    flags.push("primary key");
                }
                if property.indexed {
                    flags.push("indexed");
                }
                if property.optional {
                    flags.push("optional");
                }
                if flags.is_empty() {
                    println!("    {}: {}", property.name, property.kind);
                } else {
                    println!("    {}: {} ({})", property.name, property.kind, flags.join(", "));
                }
            }
        }
    }
}
