//! CLI command implementations.

pub mod compact;
pub mod dump;
pub mod inspect;
pub mod verify;

use std::fmt;
use std::str::FromStr;

/// Output format shared by the reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// Human-readable text.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown format '{other}' (expected text or json)")),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// Renders a byte count with a binary unit.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes < KB {
        format!("{bytes} B")
    } else if bytes < MB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use cellar_core::{Database, ObjectSchema, PropertyDescriptor, SchemaDescriptor, Value};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// A closed database file with a few people in it.
    pub(crate) fn sample_database() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.cellar");
        let schema = SchemaDescriptor::new().with_type(
            ObjectSchema::new("Person")
                .property(PropertyDescriptor::string("name").primary_key())
                .property(PropertyDescriptor::int("age").indexed()),
        );
        let db = Database::open(&path, &schema).unwrap();
        for (name, age) in [("Ann", 23), ("Ben", 18)] {
            db.write(|txn| {
                txn.create("Person", vec![Value::from(name), Value::from(age)])?;
                Ok(())
            })
            .unwrap();
        }
        db.write(|txn| {
            let ben = txn.object_for_primary_key("Person", "Ben")?;
            if let Some(ben) = ben {
                txn.set(&ben, "age", 19)?;
            }
            Ok(())
        })
        .unwrap();
        db.close().unwrap();
        (dir, path)
    }

    pub(crate) fn reopen(path: &Path) -> Database {
        Database::open_existing(path).unwrap()
    }

    #[test]
    fn parses_formats() {
        assert_eq!("json".parse::<Format>().unwrap(), Format::Json);
        assert_eq!("TEXT".parse::<Format>().unwrap(), Format::Text);
        assert!("yaml".parse::<Format>().is_err());
    }

    #[test]
    fn sizes_use_binary_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
