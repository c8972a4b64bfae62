//! Versioned page storage over a single data file.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::page::format::{
    FileHeader, MetaSlot, DATA_START, FILE_MAGIC, HEADER_SIZE, META_A_OFFSET, META_SLOT_SIZE,
};
use crate::page::table::{PageLocation, PageTable, RootPage};
use crate::types::SnapshotVersion;
use cellar_codec::{frame_len, Frame, FrameKind, MIN_FRAME_SIZE};
use cellar_storage::StorageBackend;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Page id used for root frames; object ids start at 1.
const ROOT_PAGE_ID: u64 = 0;

/// Pages written for a version that is not committed yet.
///
/// Obtained from [`PageStore::begin_staging`] and consumed by
/// [`PageStore::commit`] or [`PageStore::discard`].
#[derive(Debug)]
pub struct StagedPages {
    base: SnapshotVersion,
    table: PageTable,
    start: u64,
    written: usize,
    removed: usize,
}

impl StagedPages {
    /// Version the staged pages are based on.
    #[must_use]
    pub fn base(&self) -> SnapshotVersion {
        self.base
    }

    /// Number of pages written so far.
    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }

    /// Number of pages removed so far.
    #[must_use]
    pub fn removed(&self) -> usize {
        self.removed
    }
}

/// Space accounting for the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceUsage {
    /// Current file size.
    pub file_size: u64,
    /// Bytes used by the header, meta slots and frames of retained versions.
    pub live_bytes: u64,
    /// Committed bytes no retained version refers to.
    pub reclaimable_bytes: u64,
}

/// Outcome of a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// File size before compaction.
    pub bytes_before: u64,
    /// File size after compaction.
    pub bytes_after: u64,
    /// Pages carried over.
    pub pages: usize,
}

/// Description of one frame, as listed by [`PageStore::scan_frames`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    /// Frame offset.
    pub offset: u64,
    /// Frame length (declared length when invalid).
    pub len: u64,
    /// Frame kind, if the frame verified.
    pub kind: Option<FrameKind>,
    /// Page id, if the frame verified.
    pub page_id: Option<u64>,
    /// Whether the current version refers to this frame.
    pub live: bool,
}

#[derive(Debug)]
struct RetainedVersion {
    table: Arc<PageTable>,
    root: Option<PageLocation>,
    leases: usize,
}

#[derive(Debug)]
struct StoreState {
    versions: BTreeMap<SnapshotVersion, RetainedVersion>,
    current: SnapshotVersion,
    committed_end: u64,
    catalog: Vec<u8>,
    staging: bool,
}

impl StoreState {
    fn fresh() -> Self {
        let mut versions = BTreeMap::new();
        versions.insert(
            SnapshotVersion::new(0),
            RetainedVersion {
                table: Arc::new(PageTable::new()),
                root: None,
                leases: 0,
            },
        );
        Self {
            versions,
            current: SnapshotVersion::new(0),
            committed_end: DATA_START,
            catalog: Vec::new(),
            staging: false,
        }
    }

    fn drop_if_unused(&mut self, version: SnapshotVersion) {
        if version == self.current {
            return;
        }
        if self.versions.get(&version).is_some_and(|v| v.leases == 0) {
            self.versions.remove(&version);
            debug!(%version, "dropped page table of released version");
        }
    }

    fn current_entry(&self) -> CoreResult<&RetainedVersion> {
        self.versions
            .get(&self.current)
            .ok_or_else(|| CoreError::corruption("current version has no page table"))
    }
}

/// Durable, copy-on-write page storage with versioned snapshots.
///
/// Pages are never overwritten: a commit appends the changed pages and a
/// root frame holding the new page table, then flips the version pointer
/// by writing one of two meta slots. Page tables of older versions are
/// kept while snapshots lease them.
pub struct PageStore {
    backend: Mutex<Box<dyn StorageBackend>>,
    state: Mutex<StoreState>,
    sync_on_commit: bool,
    format_version: (u16, u16),
}

impl PageStore {
    /// Opens a data file, initializing it if empty and recovering the latest
    /// fully committed version otherwise.
    ///
    /// Returns the store and the catalog of the recovered version, or `None`
    /// if nothing was ever committed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` for foreign files or an incompatible major
    /// format version, and `Corruption` when no meta slot is usable.
    pub fn open(
        mut backend: Box<dyn StorageBackend>,
        config: &Config,
    ) -> CoreResult<(Self, Option<Vec<u8>>)> {
        let size = backend.size()?;

        if size < DATA_START {
            let head = backend.read_at(0, size.min(8) as usize)?;
            if !FILE_MAGIC.starts_with(&head) {
                return Err(CoreError::invalid_format("not a CellarDB file"));
            }
            if size > 0 {
                warn!(size, "data file was never committed; reinitializing");
                backend.truncate(0)?;
            }
            Self::initialize(&mut *backend, config)?;
            return Ok((
                Self::with_state(backend, StoreState::fresh(), config, config.format_version),
                None,
            ));
        }

        let header = FileHeader::decode(&backend.read_at(0, HEADER_SIZE)?)?;
        if header.format_version.0 != config.format_version.0 {
            return Err(CoreError::invalid_format(format!(
                "incompatible format version: file is v{}.{}, expected v{}.{}",
                header.format_version.0,
                header.format_version.1,
                config.format_version.0,
                config.format_version.1
            )));
        }

        let slot_bytes = backend.read_at(META_A_OFFSET, 2 * META_SLOT_SIZE)?;
        let mut slots: Vec<MetaSlot> = slot_bytes
            .chunks(META_SLOT_SIZE)
            .filter_map(MetaSlot::decode)
            .filter(|slot| slot.fits(size))
            .collect();
        slots.sort_by(|a, b| b.version.cmp(&a.version));

        let mut chosen = None;
        for (attempt, slot) in slots.iter().enumerate() {
            match Self::load_root(&*backend, slot) {
                Ok(root) => {
                    if attempt > 0 {
                        warn!(version = %slot.version, "newest meta slot unusable; fell back to older version");
                    }
                    chosen = Some((*slot, root));
                    break;
                }
                Err(e) => {
                    warn!(version = %slot.version, error = %e, "rejected meta slot");
                }
            }
        }

        let Some((slot, root)) = chosen else {
            if slot_bytes.iter().all(|b| *b == 0) {
                warn!("data file has no committed version; reinitializing");
                backend.truncate(DATA_START)?;
                let store =
                    Self::with_state(backend, StoreState::fresh(), config, header.format_version);
                return Ok((store, None));
            }
            return Err(CoreError::corruption("no valid meta slot"));
        };

        if size > slot.data_end {
            warn!(
                discarded = size - slot.data_end,
                version = %slot.version,
                "discarding uncommitted data after last commit"
            );
            backend.truncate(slot.data_end)?;
        }

        info!(version = %slot.version, pages = root.table.len(), "recovered committed version");

        let mut versions = BTreeMap::new();
        versions.insert(
            slot.version,
            RetainedVersion {
                table: Arc::new(root.table),
                root: Some(PageLocation {
                    offset: slot.root_offset,
                    len: slot.root_len,
                }),
                leases: 0,
            },
        );
        let state = StoreState {
            versions,
            current: slot.version,
            committed_end: slot.data_end,
            catalog: root.catalog.clone(),
            staging: false,
        };
        Ok((
            Self::with_state(backend, state, config, header.format_version),
            Some(root.catalog),
        ))
    }

    fn with_state(
        backend: Box<dyn StorageBackend>,
        state: StoreState,
        config: &Config,
        format_version: (u16, u16),
    ) -> Self {
        Self {
            backend: Mutex::new(backend),
            state: Mutex::new(state),
            sync_on_commit: config.sync_on_commit,
            format_version,
        }
    }

    /// Format version recorded in the file header.
    #[must_use]
    pub fn format_version(&self) -> (u16, u16) {
        self.format_version
    }

    fn initialize(backend: &mut dyn StorageBackend, config: &Config) -> CoreResult<()> {
        let header = FileHeader {
            format_version: config.format_version,
        };
        let mut image = header.encode().to_vec();
        image.resize(DATA_START as usize, 0);
        backend.append(&image)?;
        backend.sync()?;
        debug!(
            major = config.format_version.0,
            minor = config.format_version.1,
            "initialized data file"
        );
        Ok(())
    }

    fn load_root(backend: &dyn StorageBackend, slot: &MetaSlot) -> CoreResult<RootPage> {
        let bytes = backend.read_at(slot.root_offset, slot.root_len as usize)?;
        let frame = Frame::decode(&bytes)?;
        if frame.kind != FrameKind::Root {
            return Err(CoreError::corruption(format!(
                "meta slot for {} does not point at a root frame",
                slot.version
            )));
        }
        let root = RootPage::decode(&frame.body)?;
        for (page_id, loc) in root.table.iter() {
            if loc.offset < DATA_START || loc.end() > slot.root_offset {
                return Err(CoreError::corruption(format!(
                    "page {page_id} of {} lies outside committed data",
                    slot.version
                )));
            }
        }
        Ok(root)
    }

    /// The latest committed version (0 before the first commit).
    #[must_use]
    pub fn current_version(&self) -> SnapshotVersion {
        self.state.lock().current
    }

    /// Catalog bytes of the latest committed version.
    #[must_use]
    pub fn catalog(&self) -> Vec<u8> {
        self.state.lock().catalog.clone()
    }

    /// Page table of a retained version.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the version is no longer retained.
    pub fn table(&self, version: SnapshotVersion) -> CoreResult<Arc<PageTable>> {
        self.state
            .lock()
            .versions
            .get(&version)
            .map(|v| Arc::clone(&v.table))
            .ok_or_else(|| CoreError::invalid_operation(format!("{version} is not retained")))
    }

    /// Reads the body of a page as of `version`.
    ///
    /// # Errors
    ///
    /// Returns an error if the version is not retained, the page does not
    /// exist in it, or the frame fails verification.
    pub fn read_page(&self, page_id: u64, version: SnapshotVersion) -> CoreResult<Vec<u8>> {
        let location = self.table(version)?.get(page_id).ok_or_else(|| {
            CoreError::invalid_operation(format!("page {page_id} not present in {version}"))
        })?;
        let bytes = self
            .backend
            .lock()
            .read_at(location.offset, location.len as usize)?;
        let frame = Frame::decode(&bytes)?;
        if frame.kind != FrameKind::Object || frame.page_id != page_id {
            return Err(CoreError::corruption(format!(
                "frame at offset {} is not page {page_id}",
                location.offset
            )));
        }
        Ok(frame.body)
    }

    /// Starts staging pages for the next version.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if another staging is in progress.
    pub fn begin_staging(&self) -> CoreResult<StagedPages> {
        let mut state = self.state.lock();
        if state.staging {
            return Err(CoreError::invalid_operation("pages are already being staged"));
        }
        let table = (*state.current_entry()?.table).clone();

        let mut backend = self.backend.lock();
        if backend.size()? > state.committed_end {
            backend.truncate(state.committed_end)?;
        }
        state.staging = true;

        Ok(StagedPages {
            base: state.current,
            table,
            start: state.committed_end,
            written: 0,
            removed: 0,
        })
    }

    /// Appends a page body beyond the committed end.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be encoded or written.
    pub fn write_page(
        &self,
        staged: &mut StagedPages,
        page_id: u64,
        body: Vec<u8>,
    ) -> CoreResult<PageLocation> {
        let frame = Frame::new(FrameKind::Object, page_id, body).encode()?;
        let offset = self.backend.lock().append(&frame)?;
        let location = PageLocation {
            offset,
            len: frame.len() as u32,
        };
        staged.table.insert(page_id, location);
        staged.written += 1;
        Ok(location)
    }

    /// Removes a page from the staged version.
    pub fn remove_page(&self, staged: &mut StagedPages, page_id: u64) -> bool {
        let removed = staged.table.remove(page_id).is_some();
        if removed {
            staged.removed += 1;
        }
        removed
    }

    /// Commits staged pages as a new version.
    ///
    /// Appends the root frame, syncs, writes the meta slot for the new
    /// version and syncs again. If anything fails the appended bytes are
    /// truncated and the previous version stays current.
    ///
    /// # Errors
    ///
    /// Returns an error if the staging is stale or any write fails.
    pub fn commit(&self, staged: StagedPages, catalog: Vec<u8>) -> CoreResult<SnapshotVersion> {
        let mut state = self.state.lock();
        if !state.staging || staged.base != state.current {
            return Err(CoreError::invalid_operation(
                "staged pages do not extend the current version",
            ));
        }
        let version = state.current.next();
        let start = staged.start;
        let root = RootPage {
            table: staged.table,
            catalog,
        };

        let mut backend = self.backend.lock();
        let written = self.write_root(&mut **backend, version, &root);
        let (location, data_end) = match written {
            Ok(done) => done,
            Err(e) => {
                if let Err(truncate_err) = backend.truncate(start) {
                    warn!(error = %truncate_err, "failed to roll back partial commit");
                }
                state.staging = false;
                return Err(e);
            }
        };
        drop(backend);

        let previous = state.current;
        state.versions.insert(
            version,
            RetainedVersion {
                table: Arc::new(root.table),
                root: Some(location),
                leases: 0,
            },
        );
        state.current = version;
        state.committed_end = data_end;
        state.catalog = root.catalog;
        state.staging = false;
        state.drop_if_unused(previous);

        debug!(%version, data_end, "committed version");
        Ok(version)
    }

    fn write_root(
        &self,
        backend: &mut dyn StorageBackend,
        version: SnapshotVersion,
        root: &RootPage,
    ) -> CoreResult<(PageLocation, u64)> {
        let frame = Frame::new(FrameKind::Root, ROOT_PAGE_ID, root.encode()?).encode()?;
        let offset = backend.append(&frame)?;
        let location = PageLocation {
            offset,
            len: frame.len() as u32,
        };
        let data_end = location.end();
        self.persist(backend)?;

        let slot = MetaSlot {
            version,
            root_offset: location.offset,
            root_len: location.len,
            data_end,
        };
        backend.write_at(MetaSlot::offset_for(version), &slot.encode())?;
        self.persist(backend)?;
        Ok((location, data_end))
    }

    fn persist(&self, backend: &mut dyn StorageBackend) -> CoreResult<()> {
        if self.sync_on_commit {
            backend.sync()?;
        } else {
            backend.flush()?;
        }
        Ok(())
    }

    /// Drops staged pages, truncating the file back to the committed end.
    ///
    /// # Errors
    ///
    /// Returns an error if the truncation fails.
    pub fn discard(&self, staged: StagedPages) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.staging = false;
        let mut backend = self.backend.lock();
        if backend.size()? > staged.start {
            backend.truncate(staged.start)?;
        }
        debug!(pages = staged.written, "discarded staged pages");
        Ok(())
    }

    /// Adds a lease on a retained version.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the version is not retained.
    pub fn acquire(&self, version: SnapshotVersion) -> CoreResult<()> {
        let mut state = self.state.lock();
        let entry = state
            .versions
            .get_mut(&version)
            .ok_or_else(|| CoreError::invalid_operation(format!("{version} is not retained")))?;
        entry.leases += 1;
        Ok(())
    }

    /// Releases a lease; the last release of a superseded version drops its
    /// page table.
    pub fn release(&self, version: SnapshotVersion) {
        let mut state = self.state.lock();
        if let Some(entry) = state.versions.get_mut(&version) {
            entry.leases = entry.leases.saturating_sub(1);
        }
        state.drop_if_unused(version);
    }

    /// Number of versions whose page tables are retained.
    #[must_use]
    pub fn retained_versions(&self) -> usize {
        self.state.lock().versions.len()
    }

    /// Computes live and reclaimable space.
    ///
    /// # Errors
    ///
    /// Returns an error if the file size cannot be read.
    pub fn space(&self) -> CoreResult<SpaceUsage> {
        let state = self.state.lock();
        let file_size = self.backend.lock().size()?;

        let mut frames = BTreeSet::new();
        for retained in state.versions.values() {
            frames.extend(retained.table.iter().map(|(_, loc)| loc));
            frames.extend(retained.root);
        }
        let live_bytes = DATA_START + frames.iter().map(|l| u64::from(l.len)).sum::<u64>();

        Ok(SpaceUsage {
            file_size,
            live_bytes,
            reclaimable_bytes: state.committed_end.saturating_sub(live_bytes),
        })
    }

    /// Rewrites the file so that it holds only the current version.
    ///
    /// Returns `None` without touching the file when an older version is
    /// still leased or nothing was committed yet.
    ///
    /// # Errors
    ///
    /// Returns an error if a page fails verification or the rewrite fails.
    pub fn compact(&self) -> CoreResult<Option<CompactionStats>> {
        let mut state = self.state.lock();
        if state.staging {
            return Err(CoreError::invalid_operation(
                "cannot compact while pages are being staged",
            ));
        }
        if state.versions.len() > 1 {
            debug!(
                retained = state.versions.len(),
                "skipping compaction while older versions are leased"
            );
            return Ok(None);
        }
        let current = state.current;
        let table = {
            let entry = state.current_entry()?;
            if entry.root.is_none() {
                return Ok(None);
            }
            Arc::clone(&entry.table)
        };

        let mut backend = self.backend.lock();
        let bytes_before = backend.size()?;

        let mut image = backend.read_at(0, HEADER_SIZE)?;
        image.resize(DATA_START as usize, 0);

        let mut new_table = PageTable::new();
        for (page_id, loc) in table.iter() {
            let bytes = backend.read_at(loc.offset, loc.len as usize)?;
            Frame::decode(&bytes)?;
            new_table.insert(
                page_id,
                PageLocation {
                    offset: image.len() as u64,
                    len: loc.len,
                },
            );
            image.extend_from_slice(&bytes);
        }

        let root = RootPage {
            table: new_table,
            catalog: state.catalog.clone(),
        };
        let frame = Frame::new(FrameKind::Root, ROOT_PAGE_ID, root.encode()?).encode()?;
        let root_location = PageLocation {
            offset: image.len() as u64,
            len: frame.len() as u32,
        };
        image.extend_from_slice(&frame);

        let slot = MetaSlot {
            version: current,
            root_offset: root_location.offset,
            root_len: root_location.len,
            data_end: image.len() as u64,
        };
        let slot_offset = MetaSlot::offset_for(current) as usize;
        image[slot_offset..slot_offset + META_SLOT_SIZE].copy_from_slice(&slot.encode());

        backend.replace_contents(&image)?;
        drop(backend);

        let pages = root.table.len();
        if let Some(entry) = state.versions.get_mut(&current) {
            entry.table = Arc::new(root.table);
            entry.root = Some(root_location);
        }
        state.committed_end = slot.data_end;

        let stats = CompactionStats {
            bytes_before,
            bytes_after: slot.data_end,
            pages,
        };
        info!(
            version = %current,
            bytes_before,
            bytes_after = stats.bytes_after,
            pages,
            "compacted data file"
        );
        Ok(Some(stats))
    }

    /// Lists every frame between the header and the committed end.
    ///
    /// Scanning stops at the first frame that cannot be delimited.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn scan_frames(&self) -> CoreResult<Vec<FrameInfo>> {
        let state = self.state.lock();
        let entry = state.current_entry()?;
        let live: BTreeSet<u64> = entry
            .table
            .iter()
            .map(|(_, loc)| loc.offset)
            .chain(entry.root.map(|r| r.offset))
            .collect();
        let end = state.committed_end;
        let backend = self.backend.lock();

        let mut frames = Vec::new();
        let mut offset = DATA_START;
        while offset + MIN_FRAME_SIZE as u64 <= end {
            let head = backend.read_at(offset, 4)?;
            let len = match frame_len(&head) {
                Ok(len) if offset + len as u64 <= end => len as u64,
                _ => {
                    frames.push(FrameInfo {
                        offset,
                        len: end - offset,
                        kind: None,
                        page_id: None,
                        live: false,
                    });
                    break;
                }
            };
            let bytes = backend.read_at(offset, len as usize)?;
            let decoded = Frame::decode(&bytes).ok();
            frames.push(FrameInfo {
                offset,
                len,
                kind: decoded.as_ref().map(|f| f.kind),
                page_id: decoded.as_ref().map(|f| f.page_id),
                live: live.contains(&offset),
            });
            offset += len;
        }
        Ok(frames)
    }

    /// Flushes buffered writes to the OS.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&self) -> CoreResult<()> {
        self.backend.lock().flush()?;
        Ok(())
    }

    /// Syncs the file to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&self) -> CoreResult<()> {
        self.backend.lock().sync()?;
        Ok(())
    }
}

impl std::fmt::Debug for PageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PageStore")
            .field("current", &state.current)
            .field("committed_end", &state.committed_end)
            .field("retained", &state.versions.len())
            .finish_non_exhaustive()
    }
}
