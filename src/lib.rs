//! Out-of-core renderer for Spherical Cube Map tiled image pyramids: loads,
//! caches, and serves multi-resolution image data over a subdivided cube
//! sphere, driving a view-adaptive quadtree traversal that is gap-free at
//! every level of detail.
//!
//! The crate has no GPU backend of its own; a host application implements
//! [`raster::RasterTarget`] against whatever graphics API it already uses
//! and drives [`sphere::Sphere::draw`] once per frame.

pub mod cache;
pub mod config;
pub mod container;
pub mod error;
pub mod file;
pub mod geometry;
pub mod image;
pub mod index;
pub mod path;
pub mod queue;
pub mod raster;
pub mod sampler;
pub mod scene;
pub mod set;
pub mod sphere;
pub mod system;
pub mod task;

pub use cache::Cache;
pub use config::{CacheOpts, ScmPathOpts, SphereOpts};
pub use error::ScmError;
pub use image::{Image, PageBinding};
pub use index::PageId;
pub use path::ScmPath;
pub use raster::{MeshVariant, PinnedBufferHandle, PixelFormat, RasterTarget, TextureHandle};
pub use scene::Scene;
pub use sphere::Sphere;
pub use system::System;
