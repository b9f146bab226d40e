//! `Image`: a normalized view onto one channel of one SCM file, acquired
//! and released through a `System`.
//!
//! Grounded on `examples/original_source/scm-image.cpp` in full.
//! `init_uniforms`/`bind`/`unbind` are dropped entirely: they register and
//! push GLSL uniform locations, which is exactly the concrete-GPU-API
//! surface spec.md's Non-goals exclude. `bind_page` keeps the original's
//! computation (residency lookup, age, atlas-relative offset, tagged with
//! the quadtree depth it was bound at) but returns the result rather than
//! writing it into a per-image uniform array this crate has no reason to
//! know the shape of; `Sphere::draw_page` pushes each returned binding to
//! the host through `RasterTarget::set_page_binding`.

use std::sync::Arc;

use anyhow::Result;
use nalgebra::Vector3;

use crate::index::PageId;
use crate::raster::RasterTarget;
use crate::system::System;

/// What `Sphere::draw` would hand a shader for one image at one traversal
/// depth: which quadtree level it was bound at, whether (and how stale) a
/// texture is resident, and where its cell sits in the atlas.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PageBinding {
    pub depth: u32,
    pub age: f32,
    pub offset: (f32, f32),
}

impl PageBinding {
    /// The binding for a depth with nothing resident: zero age, the
    /// atlas's reserved blank cell.
    pub const fn empty(depth: u32) -> PageBinding {
        PageBinding {
            depth,
            age: 0.0,
            offset: (0.0, 0.0),
        }
    }
}

pub struct Image<R: RasterTarget> {
    sys: Arc<System<R>>,
    scm: String,
    index: i32,
    name: String,
    height: bool,
    channel: i32,
    k0: f32,
    k1: f32,
}

impl<R: RasterTarget + Send + 'static> Image<R> {
    pub fn new(sys: Arc<System<R>>) -> Self {
        Self {
            sys,
            scm: String::new(),
            index: -1,
            name: String::new(),
            height: false,
            channel: -1,
            k0: 0.0,
            k1: 1.0,
        }
    }

    /// Releases the previously configured file, if any, and acquires `s`
    /// unless it is empty. Ripple effects per the original: releasing may
    /// destroy the file and, if its cache class's use count also reaches
    /// zero, shut that cache's loader threads down; acquiring may spawn a
    /// new cache class.
    pub fn set_scm(&mut self, s: &str) -> Result<()> {
        if !self.scm.is_empty() {
            self.sys.release(&self.scm);
        }
        self.scm = s.to_string();
        self.index = if s.is_empty() { -1 } else { self.sys.acquire(s)? };
        Ok(())
    }

    pub fn set_name(&mut self, s: &str) {
        self.height = s == "height";
        self.name = s.to_string();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_height(&self) -> bool {
        self.height
    }

    pub fn set_channel(&mut self, c: i32) {
        self.channel = c;
    }

    pub fn channel(&self) -> i32 {
        self.channel
    }

    pub fn set_normal_min(&mut self, k: f32) {
        self.k0 = k;
    }

    pub fn set_normal_max(&mut self, k: f32) {
        self.k1 = k;
    }

    pub fn normal_min(&self) -> f32 {
        self.k0
    }

    pub fn normal_max(&self) -> f32 {
        self.k1
    }

    /// Normalized sample at `v`; for a height image this is the local
    /// radius.
    pub fn page_sample(&self, v: Vector3<f64>) -> f32 {
        if self.index < 0 {
            self.k1
        } else {
            self.sys.get_page_sample(self.index, v) * (self.k1 - self.k0) + self.k0
        }
    }

    pub fn page_bounds(&self, id: PageId) -> (f32, f32) {
        if self.index < 0 {
            (self.k0, self.k1)
        } else {
            let (r0, r1) = self.sys.get_page_bounds(self.index, id);
            (
                self.k0 + (self.k1 - self.k0) * r0,
                self.k0 + (self.k1 - self.k0) * r1,
            )
        }
    }

    pub fn page_status(&self, id: PageId) -> bool {
        self.index >= 0 && self.sys.get_page_status(self.index, id)
    }

    /// Warms residency for `id` without needing its binding.
    pub fn touch_page(&self, frame: u32, id: PageId) {
        if let Some(cache) = self.sys.get_cache(self.index) {
            let mut touched = 0;
            cache.get_page(self.index, id, frame, &mut touched);
        }
    }

    /// Resolves (or requests) `id`'s atlas residency and computes the
    /// binding a shader would composite from at traversal depth `depth`.
    pub fn bind_page(&self, depth: u32, frame: u32, id: PageId) -> PageBinding {
        let Some(cache) = self.sys.get_cache(self.index) else {
            return PageBinding::empty(depth);
        };

        let mut touched = 0;
        let slot = cache.get_page(self.index, id, frame, &mut touched);
        if slot == 0 {
            return PageBinding::empty(depth);
        }

        let age = if self.sys.synchronous() {
            ((frame.saturating_sub(touched)) as f32 / 60.0).clamp(0.0, 1.0)
        } else {
            1.0
        };

        let s = cache.grid_size();
        let n = cache.page_size();
        let offset = (
            ((slot % s) * (n + 2) + 1) as f32 / (s * (n + 2)) as f32,
            ((slot / s) * (n + 2) + 1) as f32 / (s * (n + 2)) as f32,
        );

        PageBinding { depth, age, offset }
    }
}

impl<R: RasterTarget> Drop for Image<R> {
    fn drop(&mut self) {
        if !self.scm.is_empty() {
            self.sys.release(&self.scm);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::ScmPath;
    use crate::raster::tests::NullRaster;
    use parking_lot::Mutex;

    fn system() -> Arc<System<NullRaster>> {
        let raster = Arc::new(Mutex::new(NullRaster::default()));
        Arc::new(System::new(raster, ScmPath::new(""), 4))
    }

    #[test]
    fn unconfigured_image_reports_k1_and_no_status() {
        let img: Image<NullRaster> = Image::new(system());
        assert_eq!(img.page_sample(Vector3::new(1.0, 0.0, 0.0)), 1.0);
        assert_eq!(img.page_bounds(PageId(0)), (0.0, 1.0));
        assert!(!img.page_status(PageId(0)));
    }

    #[test]
    fn name_height_sets_the_height_flag() {
        let mut img: Image<NullRaster> = Image::new(system());
        img.set_name("height");
        assert!(img.is_height());
        img.set_name("color");
        assert!(!img.is_height());
    }

    #[test]
    fn normal_range_remaps_bounds() {
        let mut img: Image<NullRaster> = Image::new(system());
        img.set_normal_min(-1.0);
        img.set_normal_max(1.0);
        assert_eq!(img.page_bounds(PageId(0)), (-1.0, 1.0));
    }
}
