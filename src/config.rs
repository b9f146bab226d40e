//! Ambient configuration surface: optional-field option structs a host
//! binary can fold into its own `StructOpt` tree to construct a `System`
//! and `Cache` without inventing its own flag names.
//!
//! Grounded on `examples/terrence2-nitrogen/libs/system/gpu/src/detail.rs`'s
//! `DetailLevelOpts` (`Option` fields, a `*_opts()` accessor applying the
//! crate's own default rather than `clap`'s). Not wired to any CLI of its
//! own — command-line parsing is a host concern, not this crate's.

use structopt::StructOpt;

use crate::path::ScmPath;

#[derive(Clone, Debug, StructOpt)]
pub struct ScmPathOpts {
    /// Override the SCMPATH search list (otherwise read from the
    /// environment)
    #[structopt(long)]
    scmpath: Option<String>,
}

impl ScmPathOpts {
    pub fn scm_path(&self) -> ScmPath {
        match &self.scmpath {
            Some(list) => ScmPath::new(list),
            None => ScmPath::from_env(),
        }
    }
}

#[derive(Clone, Debug, StructOpt)]
pub struct CacheOpts {
    /// Atlas grid size, in pages per side (otherwise derived per file)
    #[structopt(long)]
    grid_size: Option<u32>,

    /// Number of loader threads per cache
    #[structopt(long)]
    cache_threads: Option<usize>,

    /// Maximum page loads completed per `Cache::update`
    #[structopt(long)]
    max_loads_per_update: Option<usize>,
}

impl CacheOpts {
    pub fn grid_size(&self) -> u32 {
        self.grid_size.unwrap_or(4)
    }

    pub fn cache_threads(&self) -> usize {
        self.cache_threads.unwrap_or(4)
    }

    pub fn max_loads_per_update(&self) -> usize {
        self.max_loads_per_update.unwrap_or(4)
    }
}

#[derive(Clone, Debug, StructOpt)]
pub struct SphereOpts {
    /// Quad-grid subdivision per page mesh
    #[structopt(long)]
    detail: Option<u32>,

    /// Pixel-size subdivision threshold
    #[structopt(long)]
    limit: Option<f64>,
}

impl SphereOpts {
    pub fn detail(&self) -> u32 {
        self.detail.unwrap_or(32)
    }

    pub fn limit(&self) -> f64 {
        self.limit.unwrap_or(128.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_cache_opts_fall_back_to_defaults() {
        let opts = CacheOpts {
            grid_size: None,
            cache_threads: None,
            max_loads_per_update: None,
        };
        assert_eq!(opts.grid_size(), 4);
        assert_eq!(opts.cache_threads(), 4);
        assert_eq!(opts.max_loads_per_update(), 4);
    }

    #[test]
    fn unset_sphere_opts_fall_back_to_defaults() {
        let opts = SphereOpts { detail: None, limit: None };
        assert_eq!(opts.detail(), 32);
        assert!((opts.limit() - 128.0).abs() < f64::EPSILON);
    }
}
