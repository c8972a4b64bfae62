//! Page store.
//!
//! The single data file is a header, two alternating meta slots and an
//! append-only sequence of checksummed frames. See [`format`] for the byte
//! layout and [`PageStore`] for the commit protocol.

pub mod format;
mod store;
mod table;

pub use store::{CompactionStats, FrameInfo, PageStore, SpaceUsage, StagedPages};
pub use table::{PageLocation, PageTable};
