//! `Sphere`: view-adaptive quadtree traversal over the six cube faces —
//! visibility testing, subdivision, gap-free neighbor selection, and the
//! per-level texture-coordinate chain a multi-resolution composite needs.
//!
//! Grounded on `examples/original_source/scm-sphere.{hpp,cpp}` in full.
//! `init_arrays`/`free_arrays` (GPU buffer object lifetime) are dropped;
//! `init_vertices`/`init_elements` are kept as pure data generators
//! (`init_vertices`/`init_elements` below) a host builds its vertex/index
//! buffers from once at startup, since spec.md's `RasterTarget` has no
//! buffer-upload hook of its own — only `draw_indexed(variant)`, which
//! assumes the mesh already exists. The six per-face orientation matrices
//! (`M[6][9]` in `draw`) are a GLSL uniform upload with no data-model
//! equivalent in this crate's scope, so they are dropped entirely; a host
//! wiring `draw_indexed` to a real shader already knows its own face
//! basis convention.

use std::collections::BTreeSet;
use std::f64::consts::PI;

use nalgebra::{Matrix4, Vector3, Vector4};

use crate::geometry;
use crate::image::PageBinding;
use crate::index::{self, Direction, PageId};
use crate::raster::{MeshVariant, RasterTarget};
use crate::scene::Scene;

fn det(a: Vector3<f64>, b: Vector3<f64>, c: Vector3<f64>) -> f64 {
    a.dot(&b.cross(&c))
}

fn scale(k: f64, t: f64) -> f64 {
    if k < 1.0 {
        (t / k).min(1.0 - (1.0 - t) * k)
    } else {
        (t / k).max(1.0 - (1.0 - t) * k)
    }
}

/// One `(n+1)^2` grid vertex position, shared by every face and mesh
/// variant.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Vertex {
    pub x: f32,
    pub y: f32,
}

/// One index quad. Field order is the quad's vertex winding
/// (`a -> b -> d -> c`), not alphabetical: `a`/`b` are an element's near
/// edge, `c`/`d` its far edge, and a naive `a,b,c,d` reading order would
/// cross the quad's diagonal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Element {
    pub a: u16,
    pub b: u16,
    pub d: u16,
    pub c: u16,
}

/// The `(n+1) x (n+1)` grid of unit-square vertex positions.
pub fn init_vertices(n: u32) -> Vec<Vertex> {
    let mut v = Vec::with_capacity((n as usize + 1) * (n as usize + 1));
    for r in 0..=n {
        for c in 0..=n {
            v.push(Vertex {
                x: c as f32 / n as f32,
                y: r as f32 / n as f32,
            });
        }
    }
    v
}

/// One of the sixteen index-buffer variants for an `n x n` quad grid.
/// `mask` bits 1/2/4/8 mean the north/south/west/east edge's neighbor is
/// one level coarser, so that edge rewinds to avoid a T-junction.
pub fn init_elements(n: u32, mask: u8) -> Vec<Element> {
    let stride = n + 1;
    let n_usize = n as usize;

    let mut e = Vec::with_capacity(n_usize * n_usize);
    for r in 0..n {
        for c in 0..n {
            e.push(Element {
                a: (stride * r + c) as u16,
                b: (stride * r + c + 1) as u16,
                c: (stride * (r + 1) + c) as u16,
                d: (stride * (r + 1) + c + 1) as u16,
            });
        }
    }

    for i in 0..n_usize {
        if mask & 1 != 0 {
            let el = &mut e[i];
            if i & 1 != 0 {
                el.a -= 1;
            } else {
                el.b -= 1;
            }
        }
        if mask & 2 != 0 {
            let el = &mut e[(n_usize - 1) * n_usize + i];
            if i & 1 != 0 {
                el.c += 1;
            } else {
                el.d += 1;
            }
        }
        if mask & 4 != 0 {
            let el = &mut e[i * n_usize];
            if i & 1 != 0 {
                el.a += stride as u16;
            } else {
                el.c += stride as u16;
            }
        }
        if mask & 8 != 0 {
            let el = &mut e[i * n_usize + (n_usize - 1)];
            if i & 1 != 0 {
                el.b -= stride as u16;
            } else {
                el.d -= stride as u16;
            }
        }
    }

    e
}

/// View-adaptive traversal state: subdivision tuning, the spherical zoom
/// warp, and the current frame's resident page set.
pub struct Sphere {
    detail: u32,
    limit: f64,
    zoomv: Vector3<f64>,
    zoomk: f64,
    pages: BTreeSet<PageId>,
}

impl Sphere {
    pub fn new(detail: u32, limit: f64) -> Self {
        Self {
            detail,
            limit,
            zoomv: Vector3::new(0.0, 0.0, -1.0),
            zoomk: 1.0,
            pages: BTreeSet::new(),
        }
    }

    pub fn detail(&self) -> u32 {
        self.detail
    }

    pub fn limit(&self) -> f64 {
        self.limit
    }

    pub fn set_detail(&mut self, d: u32) {
        if d > 0 && d < 256 {
            self.detail = d;
        }
    }

    pub fn set_limit(&mut self, l: f64) {
        if l > 0.0 {
            self.limit = l;
        }
    }

    pub fn set_zoom(&mut self, x: f64, y: f64, z: f64, k: f64) {
        self.zoomv = Vector3::new(x, y, z);
        self.zoomk = k;
    }

    fn is_set(&self, id: PageId) -> bool {
        self.pages.contains(&id)
    }

    /// Warps `v` toward `zoomv` by the configured magnification.
    fn zoom(&self, v: Vector3<f64>) -> Vector3<f64> {
        let d = v.dot(&self.zoomv);
        if d > -1.0 && d < 1.0 {
            let b = scale(self.zoomk, d.acos() / PI) * PI;
            let x = (v - self.zoomv * d).normalize();
            self.zoomv * b.cos() + x * b.sin()
        } else {
            v
        }
    }

    /// On-screen pixel size of page `id`'s outer shell, given the inner
    /// and outer shell radii `r0`/`r1`. Zero if invisible, `f64::INFINITY`
    /// if the zoom warp forces a subdivision regardless of apparent size.
    pub fn view_page(&self, m: &Matrix4<f64>, vw: f64, vh: f64, r0: f64, r1: f64, id: PageId, zoomb: bool) -> f64 {
        let mut c = index::corners(id);

        if zoomb && self.zoomk != 1.0 {
            for v in c.iter_mut() {
                *v = self.zoom(*v);
            }

            if c[0].dot(&c[1]) < 0.0 || c[1].dot(&c[3]) < 0.0 || c[3].dot(&c[2]) < 0.0 || c[2].dot(&c[0]) < 0.0 {
                return f64::INFINITY;
            }
            if det(c[1], c[0], c[2]) < 0.0
                || det(c[1], c[0], c[3]) < 0.0
                || det(c[3], c[1], c[0]) < 0.0
                || det(c[3], c[1], c[2]) < 0.0
                || det(c[2], c[3], c[0]) < 0.0
                || det(c[2], c[3], c[1]) < 0.0
                || det(c[0], c[2], c[1]) < 0.0
                || det(c[0], c[2], c[3]) < 0.0
            {
                return f64::INFINITY;
            }
        }

        let u = c[0] + c[1] + c[2] + c[3];
        let r2 = r1 * u.norm() / c[0].dot(&u);

        let inner: Vec<Vector4<f64>> = c.iter().map(|p| geometry::project(m, p * r0)).collect();
        let outer: Vec<Vector4<f64>> = c.iter().map(|p| geometry::project(m, p * r2)).collect();
        let pts: Vec<Vector4<f64>> = inner.iter().chain(outer.iter()).copied().collect();

        if geometry::all_behind_eye(&pts) {
            return 0.0;
        }
        if geometry::all_beyond(&pts, 2, 1.0) || geometry::all_beyond(&pts, 2, -1.0) {
            return 0.0;
        }
        if geometry::all_beyond(&pts, 1, 1.0) || geometry::all_beyond(&pts, 1, -1.0) {
            return 0.0;
        }
        if geometry::all_beyond(&pts, 0, 1.0) || geometry::all_beyond(&pts, 0, -1.0) {
            return 0.0;
        }

        let edge = |a: usize, b: usize| geometry::edge_length_px(inner[a], inner[b], vw, vh);
        edge(0, 1).max(edge(2, 3)).max(edge(0, 2)).max(edge(1, 3))
    }

    /// Idempotent insert of `id` into the frame's page set. Below root
    /// depth, also inserts the parent and the four neighbor pages that
    /// straddle this page's outer edges, so no two visibly adjacent pages
    /// ever differ by more than one level of detail.
    fn add_page(&mut self, m: &Matrix4<f64>, vw: f64, vh: f64, r0: f64, r1: f64, id: PageId, zoomb: bool) {
        if self.is_set(id) {
            return;
        }
        if self.view_page(m, vw, vh, r0, r1, id, zoomb) <= 0.0 {
            return;
        }

        self.pages.insert(id);

        if id.raw() > 5 {
            let p = index::parent(id);
            self.add_page(m, vw, vh, r0, r1, p, zoomb);

            use Direction::*;
            let (n, s, w, e) = match index::order(id) {
                0 => (index::neighbor(p, North), index::neighbor(id, South), index::neighbor(id, East), index::neighbor(p, West)),
                1 => (index::neighbor(p, North), index::neighbor(id, South), index::neighbor(p, East), index::neighbor(id, West)),
                2 => (index::neighbor(id, North), index::neighbor(p, South), index::neighbor(id, East), index::neighbor(p, West)),
                _ => (index::neighbor(id, North), index::neighbor(p, South), index::neighbor(p, East), index::neighbor(id, West)),
            };
            self.add_page(m, vw, vh, r0, r1, n, zoomb);
            self.add_page(m, vw, vh, r0, r1, s, zoomb);
            self.add_page(m, vw, vh, r0, r1, e, zoomb);
            self.add_page(m, vw, vh, r0, r1, w, zoomb);
        }
    }

    fn prep_page<R: RasterTarget + Send + 'static>(
        &mut self,
        scene: &Scene<R>,
        m: &Matrix4<f64>,
        vw: f64,
        vh: f64,
        channel: i32,
        id: PageId,
        zoomb: bool,
    ) -> bool {
        if !scene.page_status(channel, id) {
            return false;
        }

        let (t0, t1) = scene.page_bounds(channel, id);
        let (r0, r1) = (t0 as f64, t1 as f64);
        let k = self.view_page(m, vw, vh, r0, r1, id, zoomb);

        if k <= 0.0 {
            return false;
        }

        if k > self.limit {
            let children = [index::child(id, 0), index::child(id, 1), index::child(id, 2), index::child(id, 3)];
            let any = children
                .iter()
                .map(|c| self.prep_page(scene, m, vw, vh, channel, *c, zoomb))
                .fold(false, |a, b| a || b);
            if any {
                return true;
            }
        }

        self.add_page(m, vw, vh, r0, r1, id, zoomb);
        true
    }

    /// Rebuilds the frame's resident page set by testing each of the six
    /// root faces for visibility and subdividing as needed.
    pub fn prep<R: RasterTarget + Send + 'static>(&mut self, scene: &Scene<R>, m: &Matrix4<f64>, vw: f64, vh: f64, channel: i32, zoomb: bool) {
        self.pages.clear();
        for face in 0..6 {
            self.prep_page(scene, m, vw, vh, channel, PageId(face), zoomb);
        }
    }

    fn draw_page<R: RasterTarget + Send + 'static>(
        &mut self,
        scene: &Scene<R>,
        raster: &mut R,
        channel: i32,
        depth: u32,
        frame: u32,
        id: PageId,
    ) {
        let bindings: Vec<PageBinding> = scene.bind_page(channel, depth, frame, id);
        for (i, binding) in bindings.into_iter().enumerate() {
            raster.set_page_binding(i as u32, binding);
        }

        let children = [index::child(id, 0), index::child(id, 1), index::child(id, 2), index::child(id, 3)];
        let resident: Vec<bool> = children.iter().map(|c| self.is_set(*c)).collect();

        if resident.iter().any(|&b| b) {
            for (child, &is_resident) in children.iter().zip(resident.iter()) {
                if is_resident {
                    self.draw_page(scene, raster, channel, depth + 1, frame, *child);
                }
            }
            return;
        }

        let r = index::row(id);
        let c = index::col(id);
        let (mut rr, mut cc) = (r, c);

        for l in (0..=depth).rev() {
            let m = 1.0 / (1u64 << (depth - l)) as f32;
            let x = m * c as f32 - cc as f32;
            let y = m * r as f32 - rr as f32;
            raster.set_level_uniform(l, (m, m), (x, y));
            cc /= 2;
            rr /= 2;
        }

        let mask: u8 = if id.raw() < 6 {
            0
        } else {
            (if self.is_set(index::neighbor(id, Direction::North)) { 0 } else { 1 })
                | (if self.is_set(index::neighbor(id, Direction::South)) { 0 } else { 2 })
                | (if self.is_set(index::neighbor(id, Direction::West)) { 0 } else { 4 })
                | (if self.is_set(index::neighbor(id, Direction::East)) { 0 } else { 8 })
        };
        raster.draw_indexed(MeshVariant(mask));
    }

    /// Prepares the frame's page set, warms residency for every page in
    /// it, then recursively draws the six root faces.
    pub fn draw<R: RasterTarget + Send + 'static>(&mut self, scene: &Scene<R>, raster: &mut R, m: &Matrix4<f64>, vw: f64, vh: f64, channel: i32, frame: u32) {
        self.prep(scene, m, vw, vh, channel, true);

        for id in self.pages.clone() {
            scene.touch_page(channel, frame, id);
        }

        for face in 0..6 {
            let id = PageId(face);
            if self.is_set(id) {
                self.draw_page(scene, raster, channel, 0, frame, id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_vertices_covers_unit_square_corners() {
        let v = init_vertices(2);
        assert_eq!(v.len(), 9);
        assert_eq!(v[0], Vertex { x: 0.0, y: 0.0 });
        assert_eq!(v[8], Vertex { x: 1.0, y: 1.0 });
    }

    #[test]
    fn init_elements_with_zero_mask_is_a_plain_grid() {
        let e = init_elements(2, 0);
        assert_eq!(e.len(), 4);
        assert_eq!(e[0], Element { a: 0, b: 1, d: 4, c: 3 });
    }

    #[test]
    fn init_elements_rewinds_north_edge_on_mask_bit() {
        let plain = init_elements(4, 0);
        let rewound = init_elements(4, 1);
        assert_ne!(plain[0].a, rewound[0].a);
        assert_eq!(plain[1].b, rewound[1].b); // odd column: rewind hits `a`, `b` is untouched
    }

    #[test]
    fn scale_below_one_clamps_like_the_original() {
        assert_eq!(scale(0.5, 0.0), 0.0);
        assert_eq!(scale(0.5, 1.0), 1.0);
    }

    #[test]
    fn zoom_of_the_zoom_direction_is_a_fixed_point_at_unit_zoom() {
        let s = Sphere::new(32, 128.0);
        let v = Vector3::new(0.0, 0.0, -1.0);
        let w = s.zoom(v);
        assert!((w - v).norm() < 1e-9);
    }

    #[test]
    fn add_page_is_idempotent() {
        let mut s = Sphere::new(32, 128.0);
        s.pages.insert(PageId(0));
        let before = s.pages.len();
        let m = Matrix4::identity();
        s.add_page(&m, 800.0, 600.0, 1.0, 1.0, PageId(0), false);
        assert_eq!(s.pages.len(), before);
    }
}
