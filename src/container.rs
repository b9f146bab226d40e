//! The on-disk SCM page container: geometry, the sparse page catalog, and
//! scanline-granular reads. Spec.md's Non-goals put TIFF container details
//! out of scope beyond the carrier role, so this is kept behind a small
//! trait — `TiffContainer` is the one shipped implementation.
//!
//! Tag numbers and catalog layout grounded on
//! `examples/original_source/scm-file.cpp` (`0xFFB1..0xFFB4`, TIFF standard
//! tags for width/height/bits/samples).
//!
//! Per-page reads are **not** done through `tiff::decoder::Decoder`'s
//! `seek_to_image`: that method walks the main sequential "next IFD" chain
//! by ordinal position, but `OFFSET_ARRAY`'s entries are the kind of value
//! `scm-file.cpp` hands to `TIFFSetSubDirectory` — literal absolute file
//! byte offsets of orphan sub-IFDs reachable only through this custom tag,
//! not through the chain `seek_to_image` walks. No ordinal index exists
//! that would land on them. Page reads therefore parse the sub-IFD at the
//! given byte offset directly (`read_strip_info` below) and read strips
//! off raw file positions, the same thing `TIFFSetSubDirectory` +
//! `TIFFReadScanline` do underneath. The `tiff` crate is kept for the one
//! thing it's actually suited to here: decoding the main, sequentially
//! reachable IFD's standard and custom tags at open time.

use std::fs::File as FsFile;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result};

pub const TAG_INDEX_ARRAY: u32 = 0xFFB1;
pub const TAG_OFFSET_ARRAY: u32 = 0xFFB2;
pub const TAG_MIN_ARRAY: u32 = 0xFFB3;
pub const TAG_MAX_ARRAY: u32 = 0xFFB4;

/// The four catalog arrays plus base geometry read from a container's
/// metadata at open time.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    pub w: u32,
    pub h: u32,
    pub c: u8,
    pub b: u8,
    /// Page ids present in the file, ascending.
    pub index_array: Vec<u64>,
    /// Byte offset of each page's sub-image, parallel to `index_array`.
    pub offset_array: Vec<u64>,
    /// Packed per-channel minima, `c` samples per page, parallel to
    /// `index_array` (may be shorter — only a prefix of pages carry
    /// extrema in some files, matching the original's independent `ac`).
    pub min_array: Vec<f32>,
    pub max_array: Vec<f32>,
}

/// A page-pyramid container. Opened once per `File`, and again
/// independently by each loader thread and by each `Sampler` — containers
/// are never shared across threads (spec.md §4.2: "loaders re-open the file
/// to preserve thread-local positions").
pub trait Container: Send {
    fn catalog(&self) -> &Catalog;

    /// Seeks to the sub-image at `offset` and reads `h` scanlines of raw
    /// pixel bytes (in the container's native `c`/`b` layout, no padding)
    /// into `dst`. Returns `false` on any I/O or format-mismatch failure.
    fn read_page_scanlines(&mut self, offset: u64, dst: &mut [u8]) -> bool;

    /// Reads scanlines `row_start..row_start+rows.len()` worth of single
    /// rows at the given sub-image offset, one row into each of `rows`
    /// (used by the sampler's two-strip window).
    fn read_scanlines(&mut self, offset: u64, rows: &[u32], out: &mut [&mut [u8]]) -> bool;
}

/// Reads an SCM pyramid stored in a TIFF container's private tags.
pub struct TiffContainer {
    /// A dedicated handle for raw, byte-offset sub-IFD reads, independent
    /// of whatever position the metadata decoder left its own handle at.
    raw: FsFile,
    endian: Endian,
    catalog: Catalog,
}

impl TiffContainer {
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening SCM container {path:?}"))?;
        let mut decoder = tiff::decoder::Decoder::new(file)
            .with_context(|| format!("reading SCM container header {path:?}"))?;

        let (w, h) = decoder.dimensions().context("reading image dimensions")?;
        let bits = decoder
            .read_tag_u32_vec(tiff::tags::Tag::BitsPerSample)
            .unwrap_or_default();
        let b = bits.first().copied().unwrap_or(8) as u8;
        let c = decoder
            .read_tag_u32_vec(tiff::tags::Tag::SamplesPerPixel)
            .ok()
            .and_then(|v| v.first().copied())
            .unwrap_or(1) as u8;

        let index_array = read_u64_tag(&mut decoder, TAG_INDEX_ARRAY);
        let offset_array = read_u64_tag(&mut decoder, TAG_OFFSET_ARRAY);
        let min_array = read_f32_tag(&mut decoder, TAG_MIN_ARRAY, b);
        let max_array = read_f32_tag(&mut decoder, TAG_MAX_ARRAY, b);

        let catalog = Catalog {
            w,
            h,
            c,
            b,
            index_array,
            offset_array,
            min_array,
            max_array,
        };

        let mut raw = std::fs::File::open(path)
            .with_context(|| format!("reopening SCM container {path:?} for raw page reads"))?;
        let endian = Endian::detect(&mut raw)
            .with_context(|| format!("reading TIFF byte-order header {path:?}"))?;

        Ok(Self { raw, endian, catalog })
    }

    /// Scanline byte length implied by the catalog geometry.
    fn scanline_bytes(&self) -> u64 {
        self.catalog.w as u64 * self.catalog.c as u64 * self.catalog.b as u64 / 8
    }

    /// Reads one scanline `row` of a page whose sub-IFD was parsed into
    /// `strips`, directly off the strip's raw file position.
    fn read_row(&mut self, strips: &StripInfo, row: u32, dst: &mut [u8]) -> bool {
        let rows_per_strip = strips.rows_per_strip.max(1) as u64;
        let strip = (row as u64 / rows_per_strip) as usize;
        let Some(&strip_offset) = strips.offsets.get(strip) else {
            return false;
        };
        let row_in_strip = row as u64 % rows_per_strip;
        let scanline_bytes = self.scanline_bytes();
        let file_offset = strip_offset + row_in_strip * scanline_bytes;

        self.raw.seek(SeekFrom::Start(file_offset)).is_ok() && self.raw.read_exact(dst).is_ok()
    }
}

fn read_u64_tag(decoder: &mut tiff::decoder::Decoder<std::fs::File>, tag: u32) -> Vec<u64> {
    decoder
        .read_tag_u32_vec(tiff::tags::Tag::Unknown(tag as u16))
        .map(|v| v.into_iter().map(u64::from).collect())
        .unwrap_or_default()
}

fn read_f32_tag(
    decoder: &mut tiff::decoder::Decoder<std::fs::File>,
    tag: u32,
    bits: u8,
) -> Vec<f32> {
    let raw = decoder
        .read_tag_u32_vec(tiff::tags::Tag::Unknown(tag as u16))
        .unwrap_or_default();
    raw.into_iter()
        .map(|v| match bits {
            8 => (v as u8) as f32 / 255.0,
            16 => (v as u16) as f32 / 65535.0,
            _ => f32::from_bits(v),
        })
        .collect()
}

/// TIFF byte order, read once from the file's 2-byte magic ("II"/"MM") and
/// reused for every raw IFD parse against that file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Endian {
    Little,
    Big,
}

impl Endian {
    fn detect(file: &mut FsFile) -> Result<Self> {
        file.seek(SeekFrom::Start(0))?;
        let mut magic = [0u8; 2];
        file.read_exact(&mut magic)?;
        match &magic {
            b"II" => Ok(Endian::Little),
            b"MM" => Ok(Endian::Big),
            _ => anyhow::bail!("not a TIFF byte-order magic: {magic:?}"),
        }
    }

    fn u16(self, b: &[u8]) -> u16 {
        let a = [b[0], b[1]];
        match self {
            Endian::Little => u16::from_le_bytes(a),
            Endian::Big => u16::from_be_bytes(a),
        }
    }

    fn u32(self, b: &[u8]) -> u32 {
        let a = [b[0], b[1], b[2], b[3]];
        match self {
            Endian::Little => u32::from_le_bytes(a),
            Endian::Big => u32::from_be_bytes(a),
        }
    }
}

/// The strip geometry of one page's sub-IFD needed for scanline addressing:
/// `StripOffsets` (273) and `RowsPerStrip` (278).
struct StripInfo {
    offsets: Vec<u64>,
    rows_per_strip: u32,
}

const TAG_STRIP_OFFSETS: u16 = 273;
const TAG_ROWS_PER_STRIP: u16 = 278;

/// Parses the IFD at absolute byte `offset`, extracting just the strip
/// tags a raw scanline read needs. Mirrors what `TIFFSetSubDirectory` +
/// `TIFFReadScanline` do against a libtiff handle, since `offset` here is
/// that same kind of literal sub-IFD byte position, not a sequential index.
fn read_strip_info(file: &mut FsFile, endian: Endian, offset: u64) -> Result<Option<StripInfo>> {
    file.seek(SeekFrom::Start(offset))?;

    let mut count_buf = [0u8; 2];
    file.read_exact(&mut count_buf)?;
    let entry_count = endian.u16(&count_buf) as usize;

    let mut entries = vec![0u8; entry_count * 12];
    file.read_exact(&mut entries)?;

    let mut offsets = Vec::new();
    let mut rows_per_strip = 0u32;

    for entry in entries.chunks_exact(12) {
        let tag = endian.u16(&entry[0..2]);
        let field_type = endian.u16(&entry[2..4]);
        let count = endian.u32(&entry[4..8]) as usize;
        let value_field = &entry[8..12];

        match tag {
            TAG_STRIP_OFFSETS => {
                offsets = read_ifd_array(file, endian, field_type, count, value_field)?;
            }
            TAG_ROWS_PER_STRIP => {
                let v = read_ifd_array(file, endian, field_type, count, value_field)?;
                rows_per_strip = v.first().copied().unwrap_or(0) as u32;
            }
            _ => {}
        }
    }

    if offsets.is_empty() {
        return Ok(None);
    }
    Ok(Some(StripInfo { offsets, rows_per_strip }))
}

/// Reads a SHORT/LONG-typed IFD value array, following the inline-vs-offset
/// rule every TIFF tag value obeys: if the array fits in the entry's 4-byte
/// value field, it is stored there; otherwise that field is itself a file
/// offset to the array.
fn read_ifd_array(
    file: &mut FsFile,
    endian: Endian,
    field_type: u16,
    count: usize,
    inline: &[u8],
) -> Result<Vec<u64>> {
    let elem_size: usize = match field_type {
        3 => 2, // SHORT
        4 => 4, // LONG
        other => anyhow::bail!("unsupported strip tag field type {other}"),
    };
    let total = elem_size * count;

    let bytes = if total <= 4 {
        inline[..total].to_vec()
    } else {
        let offset = endian.u32(inline) as u64;
        let mut buf = vec![0u8; total];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        buf
    };

    Ok(bytes
        .chunks_exact(elem_size)
        .map(|c| match elem_size {
            2 => endian.u16(c) as u64,
            4 => endian.u32(c) as u64,
            _ => unreachable!(),
        })
        .collect())
}

impl Container for TiffContainer {
    fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn read_page_scanlines(&mut self, offset: u64, dst: &mut [u8]) -> bool {
        let Ok(Some(strips)) = read_strip_info(&mut self.raw, self.endian, offset) else {
            return false;
        };
        let scanline_bytes = self.scanline_bytes() as usize;
        if dst.len() < scanline_bytes * self.catalog.h as usize {
            return false;
        }
        for r in 0..self.catalog.h {
            let start = r as usize * scanline_bytes;
            let end = start + scanline_bytes;
            if !self.read_row(&strips, r, &mut dst[start..end]) {
                return false;
            }
        }
        true
    }

    fn read_scanlines(&mut self, offset: u64, rows: &[u32], out: &mut [&mut [u8]]) -> bool {
        let Ok(Some(strips)) = read_strip_info(&mut self.raw, self.endian, offset) else {
            return false;
        };
        for (row, dst) in rows.iter().zip(out.iter_mut()) {
            if !self.read_row(&strips, *row, dst) {
                return false;
            }
        }
        true
    }
}
