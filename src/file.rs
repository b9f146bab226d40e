//! `File`: one open SCM pyramid — geometry, sparse page catalog, and the
//! read path from a page id to pixel bytes.
//!
//! Grounded on `examples/original_source/scm-file.{hpp,cpp}` in full.
//! `find_page` has no surviving implementation in the kept source (only
//! its declaration survives in `scm-file.hpp`); it is reconstructed here
//! from the `#if 0`-disabled pyramid-walk block inside the original
//! `scm_file::get_page_sample` — see DESIGN.md.

use std::path::PathBuf;

use anyhow::Result;
use log::{debug, trace, warn};

use crate::container::{Container, TiffContainer};
use crate::index::{self, PageId};
use crate::path::ScmPath;

/// Tile geometry shared by every page in a file.
#[derive(Copy, Clone, Debug)]
pub struct Geometry {
    pub w: u32,
    pub h: u32,
    pub c: u8,
    pub b: u8,
}

/// One open SCM pyramid. Reference-counted by `System`; the handle itself
/// holds no container — loader threads and the sampler each open their own
/// (spec.md §4.2: "loaders re-open the file to preserve thread-local
/// positions").
pub struct File {
    path: PathBuf,
    name: String,
    geometry: Geometry,
    index_array: Vec<u64>,
    offset_array: Vec<u64>,
    min_array: Vec<f32>,
    max_array: Vec<f32>,
}

impl File {
    pub fn open(scm_path: &ScmPath, name: &str) -> Result<Self> {
        let path = scm_path.resolve(name)?;
        let container = TiffContainer::open(&path)?;
        let catalog = container.catalog();

        debug!("File::open {name} -> {path:?} ({}x{}x{}x{})", catalog.w, catalog.h, catalog.c, catalog.b);

        Ok(Self {
            path,
            name: name.to_string(),
            geometry: Geometry {
                w: catalog.w,
                h: catalog.h,
                c: catalog.c,
                b: catalog.b,
            },
            index_array: catalog.index_array.clone(),
            offset_array: catalog.offset_array.clone(),
            min_array: catalog.min_array.clone(),
            max_array: catalog.max_array.clone(),
        })
    }

    /// Opens an independent container handle onto the same path, for use by
    /// a loader thread or sampler.
    pub fn reopen(&self) -> Result<TiffContainer> {
        TiffContainer::open(&self.path)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Binary search of `index_array` for `id`; the position of a hit also
    /// indexes `offset_array`/the extrema arrays.
    fn to_slot(&self, id: PageId) -> Option<usize> {
        self.index_array.binary_search(&(id.raw() as u64)).ok()
    }

    pub fn page_status(&self, id: PageId) -> bool {
        self.to_slot(id).is_some()
    }

    pub fn page_offset(&self, id: PageId) -> u64 {
        self.to_slot(id)
            .and_then(|j| self.offset_array.get(j))
            .copied()
            .unwrap_or(0)
    }

    /// Minimum/maximum normalized value for page `id`, walking to the
    /// nearest ancestor (and ultimately defaulting to `(1.0, 1.0)`) when the
    /// page itself carries no extrema.
    pub fn page_bounds(&self, mut id: PageId) -> (f32, f32) {
        let mut lo = None;
        let mut hi = None;

        loop {
            let slot = self.to_slot(id);
            if lo.is_none() {
                lo = slot.and_then(|j| self.min_array.get(j * self.geometry.c as usize)).copied();
            }
            if hi.is_none() {
                hi = slot.and_then(|j| self.max_array.get(j * self.geometry.c as usize)).copied();
            }
            if lo.is_some() && hi.is_some() {
                break;
            }
            if id.raw() < 6 {
                break;
            }
            id = index::parent(id);
        }

        (lo.unwrap_or(1.0), hi.unwrap_or(1.0))
    }

    /// Reads page `id`'s pixel bytes from `container` into `dst`, expanding
    /// 3-channel 8-bit source data to 4-channel 8-bit with an opaque alpha
    /// and a channel reorder (the only padding case the original
    /// performs); all other `(c, b)` combinations are copied verbatim.
    /// Returns `false` on I/O failure — this is not an error, see spec.md
    /// §7 (the page is simply not loaded this frame).
    pub fn read_page(&self, container: &mut dyn Container, id: PageId, dst: &mut [u8]) -> bool {
        let offset = self.page_offset(id);
        if offset == 0 {
            return false;
        }

        let g = self.geometry;
        if g.c == 3 && g.b == 8 {
            let mut raw = vec![0u8; g.w as usize * g.h as usize * 3];
            if !container.read_page_scanlines(offset, &mut raw) {
                warn!("read_page: scanline read failed for {:?}", id);
                return false;
            }
            for row in 0..g.h as usize {
                for col in 0..g.w as usize {
                    let s = (row * g.w as usize + col) * 3;
                    let d = (row * g.w as usize + col) * 4;
                    dst[d] = raw[s + 2];
                    dst[d + 1] = raw[s + 1];
                    dst[d + 2] = raw[s];
                    dst[d + 3] = 0xFF;
                }
            }
            true
        } else {
            container.read_page_scanlines(offset, dst)
        }
    }

    /// Walks the pyramid downward from root face `face`, following the path
    /// toward normalized face coordinate `(y, x)`, as long as a finer page
    /// is present in the catalog. Returns the deepest available page id
    /// together with `(y, x)` rewritten into that page's own local face
    /// coordinate (matching the original's point-specific descent inside
    /// `get_page_sample`, `#if 0`'d in `scm-file.cpp`).
    pub fn find_page(&self, face: i64, y: f64, x: f64) -> (PageId, f64, f64) {
        let mut n = 1i64;
        let mut l = 1i64;
        let mut id = PageId(face);

        loop {
            let r = (2.0 * n as f64 * y) as i64;
            let c = (2.0 * n as f64 * x) as i64;
            let candidate = index::index(face, l, r, c);

            if self.page_offset(candidate) != 0 {
                id = candidate;
                l += 1;
                n *= 2;
            } else {
                break;
            }
        }

        let local_x = x * n as f64 - (x * n as f64).floor();
        let local_y = y * n as f64 - (y * n as f64).floor();

        trace!("find_page face={face} y={y} x={x} -> {:?}", id);
        (id, local_y, local_x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Packs one 12-byte TIFF IFD entry: tag, field type, count, and the
    /// value left-justified in the 4-byte value field (valid whenever
    /// `count == 1` and the type fits in 4 bytes, which is all this fixture
    /// needs).
    fn ifd_entry(tag: u16, field_type: u16, count: u32, value: u32) -> [u8; 12] {
        let mut b = [0u8; 12];
        b[0..2].copy_from_slice(&tag.to_le_bytes());
        b[2..4].copy_from_slice(&field_type.to_le_bytes());
        b[4..8].copy_from_slice(&count.to_le_bytes());
        b[8..12].copy_from_slice(&value.to_le_bytes());
        b
    }

    const SHORT: u16 = 3;
    const LONG: u16 = 4;

    /// Authors a minimal little-endian, uncompressed, single-page-catalog
    /// TIFF: a baseline 2x2 8-bit grayscale main IFD (so `tiff::Decoder` can
    /// open it) carrying the four private catalog tags, plus one orphan
    /// sub-IFD — reachable only through `TAG_OFFSET_ARRAY`'s byte offset,
    /// never through the main IFD's "next IFD" chain — holding a single
    /// strip of real 2x2 page pixel data. Mirrors the layout
    /// `examples/original_source/scm-file.cpp` reads via
    /// `TIFFSetSubDirectory`.
    fn build_fixture_tiff(page_pixels: [u8; 4]) -> Vec<u8> {
        const MAIN_IFD_OFFSET: u32 = 8;
        const MAIN_ENTRY_COUNT: u32 = 11;
        const MAIN_IFD_SIZE: u32 = 2 + MAIN_ENTRY_COUNT * 12 + 4;
        const MAIN_STRIP_OFFSET: u32 = MAIN_IFD_OFFSET + MAIN_IFD_SIZE; // 146
        const PAGE_STRIP_OFFSET: u32 = MAIN_STRIP_OFFSET + 4; // 150
        const SUB_IFD_OFFSET: u32 = PAGE_STRIP_OFFSET + 4; // 154

        let mut buf = Vec::new();
        buf.extend_from_slice(b"II");
        buf.extend_from_slice(&42u16.to_le_bytes());
        buf.extend_from_slice(&MAIN_IFD_OFFSET.to_le_bytes());
        assert_eq!(buf.len(), MAIN_IFD_OFFSET as usize);

        let entries = [
            ifd_entry(256, SHORT, 1, 2),               // ImageWidth
            ifd_entry(257, SHORT, 1, 2),                // ImageLength
            ifd_entry(258, SHORT, 1, 8),                // BitsPerSample
            ifd_entry(259, SHORT, 1, 1),                // Compression (none)
            ifd_entry(262, SHORT, 1, 1),                // PhotometricInterpretation
            ifd_entry(273, LONG, 1, MAIN_STRIP_OFFSET), // StripOffsets
            ifd_entry(277, SHORT, 1, 1),                // SamplesPerPixel
            ifd_entry(278, SHORT, 1, 2),                // RowsPerStrip
            ifd_entry(279, LONG, 1, 4),                 // StripByteCounts
            ifd_entry(0xFFB1, LONG, 1, 0),              // IndexArray: page id 0
            ifd_entry(0xFFB2, LONG, 1, SUB_IFD_OFFSET),  // OffsetArray: sub-IFD byte offset
        ];
        buf.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        for e in &entries {
            buf.extend_from_slice(e);
        }
        buf.extend_from_slice(&0u32.to_le_bytes()); // no further chained IFD
        assert_eq!(buf.len(), MAIN_STRIP_OFFSET as usize);

        buf.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]); // main image strip, unread by page path
        assert_eq!(buf.len(), PAGE_STRIP_OFFSET as usize);

        buf.extend_from_slice(&page_pixels);
        assert_eq!(buf.len(), SUB_IFD_OFFSET as usize);

        let sub_entries = [
            ifd_entry(273, LONG, 1, PAGE_STRIP_OFFSET), // StripOffsets
            ifd_entry(278, SHORT, 1, 2),                 // RowsPerStrip
        ];
        buf.extend_from_slice(&(sub_entries.len() as u16).to_le_bytes());
        for e in &sub_entries {
            buf.extend_from_slice(e);
        }
        buf.extend_from_slice(&0u32.to_le_bytes());

        buf
    }

    /// Writes an authored fixture TIFF to a scratch path and opens it as a
    /// `File`, the same way `File::open` assembles one from a real
    /// `TiffContainer`'s catalog — exercising the full disk round trip
    /// instead of a hand-built struct.
    fn open_fixture(page_pixels: [u8; 4]) -> (File, TiffContainer, PathBuf) {
        let path = std::env::temp_dir().join(format!(
            "scm-core-test-fixture-{}-{:?}.tif",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::write(&path, build_fixture_tiff(page_pixels)).expect("write fixture TIFF");

        let container = TiffContainer::open(&path).expect("open fixture TIFF");
        let catalog = container.catalog();
        let file = File {
            path: path.clone(),
            name: "fixture".to_string(),
            geometry: Geometry {
                w: catalog.w,
                h: catalog.h,
                c: catalog.c,
                b: catalog.b,
            },
            index_array: catalog.index_array.clone(),
            offset_array: catalog.offset_array.clone(),
            min_array: catalog.min_array.clone(),
            max_array: catalog.max_array.clone(),
        };

        (file, container, path)
    }

    #[test]
    fn read_page_round_trips_authored_tiff_bytes() {
        let pixels = [0x11, 0x22, 0x33, 0x44];
        let (file, mut container, path) = open_fixture(pixels);

        assert_eq!(file.geometry().w, 2);
        assert_eq!(file.geometry().h, 2);
        assert_eq!(file.geometry().c, 1);
        assert_eq!(file.geometry().b, 8);
        assert!(file.page_status(PageId(0)));

        let mut dst = vec![0u8; 4];
        assert!(file.read_page(&mut container, PageId(0), &mut dst));
        assert_eq!(dst, pixels);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn sampler_reads_through_a_reopened_container() {
        use crate::sampler::Sampler;
        use std::sync::Arc;

        // Row 0: [0x00, 0xFF], row 1: [0xFF, 0x00] so the sampler's bilinear
        // blend has somewhere to land besides the corners.
        let (file, _container, path) = open_fixture([0x00, 0xFF, 0xFF, 0x00]);
        let mut sampler = Sampler::new(Arc::new(file)).expect("reopen fixture container");

        // `find_page` always resolves to the root page when the catalog
        // holds no finer descendants, so any unit vector samples page 0.
        let v = nalgebra::Vector3::new(1.0, 0.0, 0.0);
        let k = sampler.get(v);
        assert!((0.0..=1.0).contains(&k));

        let _ = std::fs::remove_file(&path);
    }

    fn fixture(index_array: Vec<u64>, offset_array: Vec<u64>) -> File {
        File {
            path: PathBuf::new(),
            name: "fixture".to_string(),
            geometry: Geometry {
                w: 4,
                h: 4,
                c: 4,
                b: 8,
            },
            index_array,
            offset_array,
            min_array: Vec::new(),
            max_array: Vec::new(),
        }
    }

    #[test]
    fn page_status_is_false_for_missing_page() {
        let f = fixture(vec![0, 1, 2], vec![10, 20, 30]);
        assert!(!f.page_status(PageId(99)));
        assert_eq!(f.page_offset(PageId(99)), 0);
    }

    #[test]
    fn page_status_and_offset_hit() {
        let f = fixture(vec![0, 1, 2], vec![10, 20, 30]);
        assert!(f.page_status(PageId(1)));
        assert_eq!(f.page_offset(PageId(1)), 20);
    }

    #[test]
    fn page_bounds_defaults_when_nothing_found() {
        let f = fixture(vec![0], vec![10]);
        assert_eq!(f.page_bounds(PageId(0)), (1.0, 1.0));
    }
}
