//! `Scene`: a set of images sharing a shader, aggregated across the
//! images that serve a given stereo channel.
//!
//! Grounded on `examples/original_source/scm-scene.{hpp,cpp}`.
//! Shader/label/vertex/fragment program bookkeeping (`init_uniforms`,
//! `bind`, `unbind`, `render`, `label`) is dropped — GLSL-program
//! specific, out of spec.md's scope. `page_bounds` is widened from the
//! original's height-image-only answer to a union across every image on
//! the channel; see DESIGN.md Open Question resolution 1.

use nalgebra::Vector3;

use crate::image::{Image, PageBinding};
use crate::index::PageId;
use crate::raster::RasterTarget;

pub struct Scene<R: RasterTarget> {
    name: String,
    images: Vec<Image<R>>,
    height: Option<usize>,
}

impl<R: RasterTarget + Send + 'static> Scene<R> {
    pub fn new() -> Self {
        Self {
            name: String::new(),
            images: Vec::new(),
            height: None,
        }
    }

    pub fn set_name(&mut self, s: &str) {
        self.name = s.to_string();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds `image` to the scene. The first image with `is_height() ==
    /// true` becomes the scene's designated height image.
    pub fn add_image(&mut self, image: Image<R>) {
        if image.is_height() && self.height.is_none() {
            self.height = Some(self.images.len());
        }
        self.images.push(image);
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image(&self, i: usize) -> Option<&Image<R>> {
        self.images.get(i)
    }

    fn of_channel(&self, channel: i32) -> impl Iterator<Item = &Image<R>> {
        self.images.iter().filter(move |img| img.channel() == channel)
    }

    /// Bindings for every image on `channel` at page `id`, at traversal
    /// depth `depth`, in image order.
    pub fn bind_page(&self, channel: i32, depth: u32, frame: u32, id: PageId) -> Vec<PageBinding> {
        self.of_channel(channel).map(|img| img.bind_page(depth, frame, id)).collect()
    }

    pub fn touch_page(&self, channel: i32, frame: u32, id: PageId) {
        for img in self.of_channel(channel) {
            img.touch_page(frame, id);
        }
    }

    /// True if any image on `channel` holds `id` in cache.
    pub fn page_status(&self, channel: i32, id: PageId) -> bool {
        self.of_channel(channel).any(|img| img.page_status(id))
    }

    /// Union of every channel image's normalized range at `id`: the
    /// widest `(r0,r1)` spanning all of them. `(1.0, 1.0)` if the channel
    /// has no images.
    pub fn page_bounds(&self, channel: i32, id: PageId) -> (f32, f32) {
        let mut acc: Option<(f32, f32)> = None;
        for img in self.of_channel(channel) {
            let (r0, r1) = img.page_bounds(id);
            acc = Some(match acc {
                Some((a0, a1)) => (a0.min(r0), a1.max(r1)),
                None => (r0, r1),
            });
        }
        acc.unwrap_or((1.0, 1.0))
    }

    /// Ground-level sample at `v`: the designated height image's
    /// `page_sample`, or `1.0` if this scene has none.
    pub fn ground(&self, v: Vector3<f64>) -> f64 {
        match self.height {
            Some(i) => self.images[i].page_sample(v) as f64,
            None => 1.0,
        }
    }

    /// Lower bound on ground radius across the whole sphere: the height
    /// image's normalization floor, `k0`.
    pub fn min_ground(&self) -> f64 {
        match self.height {
            Some(i) => self.images[i].normal_min() as f64,
            None => 1.0,
        }
    }
}

impl<R: RasterTarget + Send + 'static> Default for Scene<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::ScmPath;
    use crate::raster::tests::NullRaster;
    use crate::system::System;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn system() -> Arc<System<NullRaster>> {
        let raster = Arc::new(Mutex::new(NullRaster::default()));
        Arc::new(System::new(raster, ScmPath::new(""), 4))
    }

    #[test]
    fn empty_scene_reports_defaults() {
        let scene: Scene<NullRaster> = Scene::new();
        assert_eq!(scene.ground(Vector3::new(1.0, 0.0, 0.0)), 1.0);
        assert_eq!(scene.min_ground(), 1.0);
        assert_eq!(scene.page_bounds(0, PageId(0)), (1.0, 1.0));
        assert!(!scene.page_status(0, PageId(0)));
    }

    #[test]
    fn first_height_image_is_designated() {
        let sys = system();
        let mut scene: Scene<NullRaster> = Scene::new();

        let mut color = Image::new(sys.clone());
        color.set_name("color");
        color.set_channel(0);
        scene.add_image(color);

        let mut height = Image::new(sys);
        height.set_name("height");
        height.set_normal_min(0.5);
        height.set_channel(0);
        scene.add_image(height);

        assert_eq!(scene.image_count(), 2);
        assert_eq!(scene.min_ground(), 0.5);
    }

    #[test]
    fn page_bounds_unions_across_channel_images() {
        let sys = system();
        let mut scene: Scene<NullRaster> = Scene::new();

        let mut a = Image::new(sys.clone());
        a.set_channel(0);
        a.set_normal_min(-1.0);
        a.set_normal_max(0.0);
        scene.add_image(a);

        let mut b = Image::new(sys);
        b.set_channel(0);
        b.set_normal_min(0.0);
        b.set_normal_max(2.0);
        scene.add_image(b);

        assert_eq!(scene.page_bounds(0, PageId(0)), (-1.0, 2.0));
    }
}
