//! `System`: the refcounted file/cache registry and the frame tick — the
//! top-level handle a host application constructs once and shares with
//! every `Image`.
//!
//! Grounded on `examples/original_source/scm-system.{hpp,cpp}`'s
//! `acquire_scm`/`release_scm`/`get_file`/`get_cache`/`get_page_*` family
//! and `cache_param` (the `(n,c,b)` cache-class key). Out of scope here:
//! the scene/step collections, the camera queue, and `render_sphere`/
//! `render_queue` — all GL-calling and out of spec.md's scope (design note
//! 9(c): camera interpolation and scripted flythrough are Non-goals).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::debug;
use nalgebra::Vector3;
use parking_lot::Mutex;

use crate::cache::{Cache, FileRegistry};
use crate::file::File;
use crate::index::PageId;
use crate::path::ScmPath;
use crate::raster::RasterTarget;
use crate::sampler::Sampler;

/// The `(tile pixel size, channels, bits per channel)` compatibility key
/// under which unrelated files share one cache. Grounded on
/// `scm-system.hpp`'s `cache_param`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
struct CacheClass {
    n: u32,
    c: u8,
    b: u8,
}

impl CacheClass {
    fn of(file: &File) -> Self {
        let g = file.geometry();
        Self {
            n: g.w.saturating_sub(2),
            c: g.c,
            b: g.b,
        }
    }
}

struct FileEntry {
    file: Arc<File>,
    uses: u32,
    index: i32,
}

struct CacheEntry<R: RasterTarget> {
    cache: Arc<Cache<R>>,
    uses: u32,
}

struct Registry<R: RasterTarget> {
    by_name: HashMap<String, FileEntry>,
    by_class: HashMap<CacheClass, CacheEntry<R>>,
    /// `index -> (File, Cache)`: the one structure with joint references,
    /// per design note 9 ("neither file nor cache holds a strong reference
    /// to the other").
    reverse: HashMap<i32, (Arc<File>, Arc<Cache<R>>)>,
    samplers: HashMap<i32, Arc<Mutex<Sampler>>>,
    serial: i32,
}

/// Process-wide (well, per-`System`) registry of open SCM files and the
/// caches that back them, plus the frame counter every `Cache::update`
/// advances by.
pub struct System<R: RasterTarget> {
    raster: Arc<Mutex<R>>,
    files: FileRegistry,
    registry: Mutex<Registry<R>>,
    scm_path: ScmPath,
    grid_size: u32,
    frame: AtomicU32,
    synchronous: AtomicBool,
}

impl<R: RasterTarget + Send + 'static> System<R> {
    pub fn new(raster: Arc<Mutex<R>>, scm_path: ScmPath, grid_size: u32) -> Self {
        Self {
            raster,
            files: Arc::new(Mutex::new(HashMap::new())),
            registry: Mutex::new(Registry {
                by_name: HashMap::new(),
                by_class: HashMap::new(),
                reverse: HashMap::new(),
                samplers: HashMap::new(),
                serial: 0,
            }),
            scm_path,
            grid_size,
            frame: AtomicU32::new(0),
            synchronous: AtomicBool::new(false),
        }
    }

    pub fn set_synchronous(&self, sync: bool) {
        self.synchronous.store(sync, Ordering::Release);
    }

    pub fn synchronous(&self) -> bool {
        self.synchronous.load(Ordering::Acquire)
    }

    pub fn frame(&self) -> u32 {
        self.frame.load(Ordering::Acquire)
    }

    /// Opens (or shares) the named SCM file, returning its index. Bumps the
    /// file's use count; a matching number of `release` calls is required
    /// to close it. May construct a new cache class if none of the right
    /// `(n,c,b)` shape is already active.
    pub fn acquire(&self, name: &str) -> Result<i32> {
        let mut reg = self.registry.lock();

        if let Some(entry) = reg.by_name.get_mut(name) {
            entry.uses += 1;
            return Ok(entry.index);
        }

        let file = Arc::new(
            File::open(&self.scm_path, name).with_context(|| format!("acquiring SCM file {name}"))?,
        );
        let class = CacheClass::of(&file);

        let cache = if let Some(entry) = reg.by_class.get_mut(&class) {
            entry.uses += 1;
            entry.cache.clone()
        } else {
            let cache = Arc::new(Cache::new(
                self.raster.clone(),
                self.files.clone(),
                self.grid_size,
                class.n,
                class.c,
                class.b,
            ));
            reg.by_class.insert(
                class,
                CacheEntry {
                    cache: cache.clone(),
                    uses: 1,
                },
            );
            cache
        };

        let index = reg.serial;
        reg.serial += 1;

        self.files.lock().insert(index, file.clone());
        reg.reverse.insert(index, (file.clone(), cache));
        reg.samplers
            .insert(index, Arc::new(Mutex::new(Sampler::new(file.clone())?)));
        reg.by_name.insert(
            name.to_string(),
            FileEntry {
                file,
                uses: 1,
                index,
            },
        );

        debug!("System::acquire {name} -> index {index}");
        Ok(index)
    }

    /// Releases one use of `name`. On the last release, drops the file and,
    /// if its cache class's use count also reaches zero, shuts that cache
    /// down (joining its loader threads and freeing its GPU resources).
    pub fn release(&self, name: &str) {
        let mut reg = self.registry.lock();

        let index = match reg.by_name.get_mut(name) {
            Some(entry) => {
                entry.uses -= 1;
                if entry.uses > 0 {
                    return;
                }
                entry.index
            }
            None => return,
        };

        let entry = reg.by_name.remove(name).expect("checked present above");
        reg.reverse.remove(&index);
        reg.samplers.remove(&index);
        self.files.lock().remove(&index);

        let class = CacheClass::of(&entry.file);
        let mut drained = None;
        if let Some(class_entry) = reg.by_class.get_mut(&class) {
            class_entry.uses -= 1;
            if class_entry.uses == 0 {
                drained = reg.by_class.remove(&class).map(|e| e.cache);
            }
        }
        drop(reg);

        if let Some(cache_arc) = drained {
            match Arc::try_unwrap(cache_arc) {
                Ok(cache) => cache.shutdown(),
                Err(_) => {
                    log::warn!(
                        "System::release: cache class {class:?} reached zero uses but is still referenced, skipping shutdown"
                    );
                }
            }
        }

        debug!("System::release {name}");
    }

    pub fn get_file(&self, index: i32) -> Option<Arc<File>> {
        self.registry.lock().reverse.get(&index).map(|(f, _)| f.clone())
    }

    pub fn get_cache(&self, index: i32) -> Option<Arc<Cache<R>>> {
        self.registry.lock().reverse.get(&index).map(|(_, c)| c.clone())
    }

    /// Samples normalized height/value at `v` through the live `Sampler`
    /// for `index` (not the disabled `File::get_page_sample` path — design
    /// note 9(a) specifies the live sampler as authoritative).
    pub fn get_page_sample(&self, index: i32, v: Vector3<f64>) -> f32 {
        let sampler = self.registry.lock().samplers.get(&index).cloned();
        match sampler {
            Some(s) => s.lock().get(v),
            None => 1.0,
        }
    }

    pub fn get_page_bounds(&self, index: i32, id: PageId) -> (f32, f32) {
        match self.get_file(index) {
            Some(f) => f.page_bounds(id),
            None => (1.0, 1.0),
        }
    }

    pub fn get_page_status(&self, index: i32, id: PageId) -> bool {
        match self.get_file(index) {
            Some(f) => f.page_status(id),
            None => false,
        }
    }

    /// Drains each active cache's completions and advances the frame
    /// counter. `drain` forces a full drain rather than the bounded
    /// per-frame amount (used at shutdown and on synchronous-mode ticks).
    pub fn update_cache(&self, drain: bool) {
        let frame = self.frame.fetch_add(1, Ordering::AcqRel);
        let caches: Vec<_> = self.registry.lock().by_class.values().map(|e| e.cache.clone()).collect();
        for cache in caches {
            cache.update(frame, drain);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::tests::NullRaster;

    fn system() -> System<NullRaster> {
        let raster = Arc::new(Mutex::new(NullRaster::default()));
        System::new(raster, ScmPath::new(""), 4)
    }

    #[test]
    fn acquire_of_missing_file_fails() {
        let sys = system();
        assert!(sys.acquire("does-not-exist.tif").is_err());
    }

    #[test]
    fn unknown_index_reads_as_absent() {
        let sys = system();
        assert!(sys.get_file(42).is_none());
        assert!(sys.get_cache(42).is_none());
        assert_eq!(sys.get_page_bounds(42, PageId(0)), (1.0, 1.0));
        assert!(!sys.get_page_status(42, PageId(0)));
        assert_eq!(sys.get_page_sample(42, Vector3::new(1.0, 0.0, 0.0)), 1.0);
    }

    #[test]
    fn update_cache_with_no_active_caches_just_advances_frame() {
        let sys = system();
        assert_eq!(sys.frame(), 0);
        sys.update_cache(false);
        assert_eq!(sys.frame(), 1);
    }
}
