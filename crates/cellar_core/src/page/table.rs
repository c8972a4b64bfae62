//! Page tables and version roots.

use crate::error::CoreResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Location of one frame in the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageLocation {
    /// Byte offset of the frame.
    pub offset: u64,
    /// Total frame length.
    pub len: u32,
}

impl PageLocation {
    /// Offset one past the frame's last byte.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + u64::from(self.len)
    }
}

/// Mapping from page id to frame location for one version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageTable {
    pages: BTreeMap<u64, PageLocation>,
}

impl PageTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Location of a page.
    #[must_use]
    pub fn get(&self, page_id: u64) -> Option<PageLocation> {
        self.pages.get(&page_id).copied()
    }

    /// Records a page location, returning the one it replaces.
    pub fn insert(&mut self, page_id: u64, location: PageLocation) -> Option<PageLocation> {
        self.pages.insert(page_id, location)
    }

    /// Removes a page.
    pub fn remove(&mut self, page_id: u64) -> Option<PageLocation> {
        self.pages.remove(&page_id)
    }

    /// Number of pages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Returns true if the table has no pages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Iterates pages in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, PageLocation)> + '_ {
        self.pages.iter().map(|(id, loc)| (*id, *loc))
    }

    /// Sum of the frame lengths.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.pages.values().map(|l| u64::from(l.len)).sum()
    }
}

/// Body of a root frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RootPage {
    pub table: PageTable,
    pub catalog: Vec<u8>,
}

impl RootPage {
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        Ok(cellar_codec::to_cbor(self)?)
    }

    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        Ok(cellar_codec::from_cbor(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_operations() {
        let mut table = PageTable::new();
        assert!(table.is_empty());

        let a = PageLocation { offset: 128, len: 40 };
        let b = PageLocation { offset: 168, len: 60 };
        assert_eq!(table.insert(1, a), None);
        assert_eq!(table.insert(1, b), Some(a));
        table.insert(5, a);

        assert_eq!(table.get(1), Some(b));
        assert_eq!(table.len(), 2);
        assert_eq!(table.total_bytes(), 100);
        assert_eq!(table.iter().map(|(id, _)| id).collect::<Vec<_>>(), vec![1, 5]);

        assert_eq!(table.remove(5), Some(a));
        assert_eq!(table.get(5), None);
        assert_eq!(b.end(), 228);
    }

    #[test]
    fn root_roundtrip() {
        let mut table = PageTable::new();
        table.insert(3, PageLocation { offset: 200, len: 21 });
        let root = RootPage {
            table,
            catalog: vec![1, 2, 3],
        };
        assert_eq!(RootPage::decode(&root.encode().unwrap()).unwrap(), root);
    }
}
