//! A page-load task: the parameters of one in-flight disk read, and the
//! pinned buffer it is written into.
//!
//! Grounded on `examples/original_source/scm-task.hpp`/`scm-item.hpp`. The
//! original's `scm_item::operator<` orders first by page index, then by
//! file index; `Task`'s `Ord` below reproduces that, which is what gives
//! the load queue its "coarser pages serviced first" priority (see
//! spec.md §4.5/§9 and `queue.rs`).

use crate::index::PageId;
use crate::raster::PinnedBufferHandle;

/// Tile geometry shared by every task drawn from one `File`.
#[derive(Copy, Clone, Debug)]
pub struct Geometry {
    pub n: u32, // tile pixel size
    pub c: u8,  // channels
    pub b: u8,  // bits per channel
}

/// One page-load request/response. `file_index < 0` is the poison value
/// that terminates a loader thread.
///
/// `mapped` is the pixel address the main thread obtained from
/// `RasterTarget::map_pinned_buffer` before handing the task to `needs`; the
/// loader thread writes scanlines through it and never touches `buffer`
/// itself, matching the ring's single-owner lifecycle (spec.md §4.3: ring ->
/// main (map) -> loader (fill) -> main (upload/unmap) -> ring).
#[derive(Debug)]
pub struct Task {
    pub file_index: i32,
    pub page_id: PageId,
    pub offset: u64,
    pub geometry: Geometry,
    pub buffer: PinnedBufferHandle,
    pub mapped: *mut u8,
    pub dirty: bool,
}

// SAFETY: `mapped` points into a pinned buffer exclusively owned by this
// task for as long as it is in flight between `needs` and `loads` — the main
// thread does not touch it again until the task comes back through `loads`.
unsafe impl Send for Task {}

impl Task {
    pub fn new(
        file_index: i32,
        page_id: PageId,
        offset: u64,
        geometry: Geometry,
        buffer: PinnedBufferHandle,
        mapped: *mut u8,
    ) -> Self {
        Self {
            file_index,
            page_id,
            offset,
            geometry,
            buffer,
            mapped,
            dirty: false,
        }
    }

    /// A poison task that tells one loader thread to exit.
    pub fn poison(ordinal: i32, buffer: PinnedBufferHandle) -> Self {
        Self {
            file_index: -1 - ordinal,
            page_id: PageId(-1 - ordinal as i64),
            offset: 0,
            geometry: Geometry { n: 0, c: 0, b: 0 },
            buffer,
            mapped: std::ptr::null_mut(),
            dirty: false,
        }
    }

    pub fn is_poison(&self) -> bool {
        self.file_index < 0
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.page_id == other.page_id && self.file_index == other.file_index
    }
}
impl Eq for Task {}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.page_id
            .cmp(&other.page_id)
            .then(self.file_index.cmp(&other.file_index))
    }
}
