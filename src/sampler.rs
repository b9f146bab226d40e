//! `Sampler`: a per-file point sampler over an independently opened
//! container, with a two-strip window cache so repeated samples near the
//! same vector stay off disk.
//!
//! Grounded on `examples/original_source/scm-sample.cpp` in full. The
//! original keeps one `malloc`'d buffer sized to the whole file and reads
//! individual TIFF strips directly into it at their byte offset; this reads
//! through `Container::read_scanlines` into two owned row buffers instead,
//! since `container.rs`'s trait boundary is the point beyond which this
//! crate does not reach into TIFF strip layout directly.

use anyhow::Result;
use nalgebra::Vector3;
use smallvec::SmallVec;

use crate::container::Container;
use crate::file::File;
use crate::index;
use std::sync::Arc;

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Caches the most recent sample vector and result, plus the two scanlines
/// bracketing it, so that repeated samples along a slowly-moving ray avoid
/// re-reading from disk (spec.md §4.4).
pub struct Sampler {
    file: Arc<File>,
    container: Box<dyn Container>,
    last_v: Vector3<f64>,
    last_k: f32,
    last_offset: u64,
    last_r0: i64,
    last_r1: i64,
    row0: SmallVec<[u8; 256]>,
    row1: SmallVec<[u8; 256]>,
}

impl Sampler {
    pub fn new(file: Arc<File>) -> Result<Self> {
        let container = Box::new(file.reopen()?);
        Ok(Self {
            file,
            container,
            last_v: Vector3::new(0.0, 0.0, 0.0),
            last_k: 1.0,
            last_offset: 0,
            last_r0: -1,
            last_r1: -1,
            row0: SmallVec::new(),
            row1: SmallVec::new(),
        })
    }

    fn lookup(&self, row: &SmallVec<[u8; 256]>, col: i64) -> f32 {
        let g = self.file.geometry();
        if col < 0 || col as u32 >= g.w {
            return 1.0;
        }
        let c = g.c as usize;
        let col = col as usize;
        match g.b {
            8 => row[col * c] as f32 / 255.0,
            16 => {
                let i = col * c * 2;
                u16::from_le_bytes([row[i], row[i + 1]]) as f32 / 65535.0
            }
            32 => {
                let i = col * c * 4;
                f32::from_le_bytes([row[i], row[i + 1], row[i + 2], row[i + 3]])
            }
            _ => 1.0,
        }
    }

    /// Samples the pyramid along unit vector `v`, linearly filtering the
    /// four pixels straddling it in the deepest resident page. Returns the
    /// last cached result, unchanged, if nothing could be read.
    pub fn get(&mut self, v: Vector3<f64>) -> f32 {
        if v == self.last_v {
            return self.last_k;
        }

        let (face, y, x_root) = index::locate(v);
        let x = 1.0 - x_root;

        let (page_id, ly, lx) = self.file.find_page(face, y, x);
        let offset = self.file.page_offset(page_id);
        if offset == 0 {
            return self.last_k;
        }

        let g = self.file.geometry();
        let r = ly * (g.h as f64 - 2.0) + 0.5;
        let c = lx * (g.w as f64 - 2.0) + 0.5;
        let r0 = r.floor() as i64;
        let r1 = r0 + 1;
        let c0 = c.floor() as i64;
        let c1 = c0 + 1;

        if self.last_offset != offset || self.last_r0 != r0 || self.last_r1 != r1 {
            let row_bytes = g.w as usize * g.c as usize * g.b as usize / 8;
            let mut buf0 = vec![0u8; row_bytes];
            let mut buf1 = vec![0u8; row_bytes];

            let ok = self
                .container
                .read_scanlines(offset, &[r0 as u32, r1 as u32], &mut [&mut buf0, &mut buf1]);
            if !ok {
                return self.last_k;
            }

            self.row0 = SmallVec::from_vec(buf0);
            self.row1 = SmallVec::from_vec(buf1);
            self.last_offset = offset;
            self.last_r0 = r0;
            self.last_r1 = r1;
        }

        let s00 = self.lookup(&self.row0, c0) as f64;
        let s01 = self.lookup(&self.row0, c1) as f64;
        let s10 = self.lookup(&self.row1, c0) as f64;
        let s11 = self.lookup(&self.row1, c1) as f64;

        let rr = r - r.floor();
        let cc = c - c.floor();

        self.last_v = v;
        self.last_k = lerp(lerp(s00, s01, cc), lerp(s10, s11, cc), rr) as f32;
        self.last_k
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lerp_interpolates_linearly() {
        assert_eq!(lerp(0.0, 10.0, 0.5), 5.0);
        assert_eq!(lerp(0.0, 10.0, 0.0), 0.0);
        assert_eq!(lerp(0.0, 10.0, 1.0), 10.0);
    }
}
