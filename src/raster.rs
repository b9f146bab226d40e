//! The abstract raster-target surface the cache and sphere traversal draw
//! through. No concrete GPU API is prescribed (spec.md §1/§6); a host
//! application supplies an implementation of `RasterTarget` backed by
//! whatever graphics API it already uses.
//!
//! Grounded on the shape of the teacher's `gpu` crate: `terrain_geo` calls
//! into a device/surface object it does not own, rather than holding a
//! concrete `wgpu::Device` itself.

use crate::image::PageBinding;

/// Opaque handle to a GPU texture allocated through a `RasterTarget`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TextureHandle(pub u64);

/// Opaque handle to a pinned, CPU-writable upload buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct PinnedBufferHandle(pub u64);

/// Pixel format for an atlas texture, derived from an SCM file's channel
/// count and bit depth.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PixelFormat {
    pub channels: u8,
    pub bits_per_channel: u8,
}

/// One of the sixteen precomputed index-buffer variants selected by the
/// 4-bit absent-neighbor mask in `sphere::draw`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct MeshVariant(pub u8);

/// Abstracts the GPU operations the cache and sphere traversal need: texture
/// allocation, pinned-buffer allocation/mapping, subregion upload, and
/// indexed mesh drawing. Implemented by the host application against its
/// chosen graphics API.
pub trait RasterTarget {
    /// Allocates a square atlas texture of `size_px` on a side in the given
    /// format, filled with zero.
    fn alloc_atlas_texture(&mut self, size_px: u32, format: PixelFormat) -> TextureHandle;

    fn free_texture(&mut self, tex: TextureHandle);

    /// Allocates one pinned upload buffer sized to hold `byte_len` bytes of
    /// pixel data.
    fn alloc_pinned_buffer(&mut self, byte_len: usize) -> PinnedBufferHandle;

    fn free_pinned_buffer(&mut self, buf: PinnedBufferHandle);

    /// Maps a pinned buffer for CPU writes, returning a raw pointer range
    /// the loader thread writes scanlines into.
    fn map_pinned_buffer(&mut self, buf: PinnedBufferHandle) -> *mut u8;

    fn unmap_pinned_buffer(&mut self, buf: PinnedBufferHandle);

    /// Uploads the mapped contents of `buf` into `tex` at `(x, y)`, with the
    /// buffer's pixel dimensions `(w, h)`.
    fn upload_subregion(
        &mut self,
        tex: TextureHandle,
        buf: PinnedBufferHandle,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    );

    /// Binds the vertex grid and draws the given mesh variant.
    fn draw_indexed(&mut self, variant: MeshVariant);

    /// Sets the per-level (scale, offset) texture-transform uniform pair
    /// used by the multi-level quadtree shader.
    fn set_level_uniform(&mut self, level: u32, scale: (f32, f32), offset: (f32, f32));

    /// Binds the shader program associated with one scene.
    fn bind_shader(&mut self, program: u32);

    /// Sets one image's per-level residency binding (age + atlas-relative
    /// offset) for the shader's multi-level texture lookup. `image` is the
    /// image's position within the channel's image list (the same order
    /// `Scene::bind_page` returns); `binding.depth` is the quadtree level
    /// it was computed at. Mirrors `set_level_uniform`'s per-depth
    /// geometry chain, but for per-image atlas residency instead of mesh
    /// transforms.
    fn set_page_binding(&mut self, image: u32, binding: PageBinding);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// A trivial in-memory `RasterTarget` used to exercise the cache and
    /// sphere modules' tests without a real GPU.
    #[derive(Default)]
    pub struct NullRaster {
        next_handle: u64,
        pub buffers: HashMap<u64, Vec<u8>>,
    }

    impl RasterTarget for NullRaster {
        fn alloc_atlas_texture(&mut self, _size_px: u32, _format: PixelFormat) -> TextureHandle {
            self.next_handle += 1;
            TextureHandle(self.next_handle)
        }
        fn free_texture(&mut self, _tex: TextureHandle) {}
        fn alloc_pinned_buffer(&mut self, byte_len: usize) -> PinnedBufferHandle {
            self.next_handle += 1;
            let h = self.next_handle;
            self.buffers.insert(h, vec![0u8; byte_len]);
            PinnedBufferHandle(h)
        }
        fn free_pinned_buffer(&mut self, buf: PinnedBufferHandle) {
            self.buffers.remove(&buf.0);
        }
        fn map_pinned_buffer(&mut self, buf: PinnedBufferHandle) -> *mut u8 {
            self.buffers.get_mut(&buf.0).unwrap().as_mut_ptr()
        }
        fn unmap_pinned_buffer(&mut self, _buf: PinnedBufferHandle) {}
        fn upload_subregion(
            &mut self,
            _tex: TextureHandle,
            _buf: PinnedBufferHandle,
            _x: u32,
            _y: u32,
            _w: u32,
            _h: u32,
        ) {
        }
        fn draw_indexed(&mut self, _variant: MeshVariant) {}
        fn set_level_uniform(&mut self, _level: u32, _scale: (f32, f32), _offset: (f32, f32)) {}
        fn bind_shader(&mut self, _program: u32) {}
        fn set_page_binding(&mut self, _image: u32, _binding: PageBinding) {}
    }

    #[test]
    fn null_raster_round_trips_a_buffer() {
        let mut r = NullRaster::default();
        let buf = r.alloc_pinned_buffer(16);
        let ptr = r.map_pinned_buffer(buf);
        unsafe { *ptr = 7 };
        assert_eq!(r.buffers[&buf.0][0], 7);
    }
}
