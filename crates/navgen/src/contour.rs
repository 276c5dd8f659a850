//! Contour building: region boundary tracing, simplification and hole
//! merging
//!
//! Each region's boundary is walked to produce a raw integer polyline,
//! simplified against the raw ring, and tessellated along long outer
//! edges. Inner holes are then spliced into their enclosing outline
//! through non-crossing diagonals so every region ends up with a single
//! ring the mesh builder can triangulate.

use glam::Vec3;
use navgen_common::{geometry, Error, Result};

use crate::config::ContourBuildFlags;
use crate::heightfield::{dir_offset_x, dir_offset_z, CompactHeightfield, BORDER_REG};

/// Flag on a contour vertex marking it for removal at tile borders
pub const BORDER_VERTEX: i32 = 0x10000;
/// Flag on a contour vertex lying on the border between two areas
pub const AREA_BORDER: i32 = 0x20000;
/// Mask extracting the neighbour region id from a contour vertex flag field
pub const CONTOUR_REG_MASK: i32 = 0xffff;

/// Runaway guard for the boundary walk
const MAX_WALK_ITERATIONS: usize = 40_000;

#[inline]
fn prev(i: usize, n: usize) -> usize {
    if i >= 1 {
        i - 1
    } else {
        n - 1
    }
}

#[inline]
fn next(i: usize, n: usize) -> usize {
    if i + 1 < n {
        i + 1
    } else {
        0
    }
}

/// The simplified boundary polyline of one region
#[derive(Debug, Clone, Default)]
pub struct Contour {
    /// Vertices packed as `(x, y, z, flags)`; the flag field carries the
    /// neighbour region id plus `BORDER_VERTEX` / `AREA_BORDER` bits
    pub verts: Vec<i32>,
    /// Region id of the contour
    pub region: u16,
    /// Area id of the contour
    pub area: u8,
}

impl Contour {
    /// Number of vertices in the ring
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.verts.len() / 4
    }

    fn reset(&mut self, nverts: usize) {
        self.verts.clear();
        self.verts.reserve(nverts * 4);
        self.region = 0;
        self.area = 0;
    }
}

/// A set of contours produced by one pipeline pass
#[derive(Debug, Default)]
pub struct ContourSet {
    /// Contours in the set; consumed hole contours are left empty
    pub contours: Vec<Contour>,
    /// The minimum bounds of the unpadded grid in world space
    pub bmin: Vec3,
    /// The maximum bounds of the unpadded grid in world space
    pub bmax: Vec3,
    /// Cell size (horizontal resolution)
    pub cell_size: f32,
    /// Cell height (vertical resolution)
    pub cell_height: f32,
    /// Width of the unpadded grid
    pub width: i32,
    /// Height of the unpadded grid
    pub height: i32,
    /// Border padding the source heightfield was built with
    pub border_size: i32,
    /// Simplification error the set was built with
    pub max_error: f32,
}

#[derive(Debug, Clone, Copy, Default)]
struct ContourHole {
    contour: usize,
    min_x: i32,
    min_z: i32,
    leftmost: usize,
}

#[derive(Debug, Clone, Copy)]
struct PotentialDiagonal {
    vert: usize,
    dist: i32,
}

/// Contour builder context. The contour pool and all scratch buffers are
/// retained between invocations.
#[derive(Debug, Default)]
pub struct ContourBuilder {
    set: ContourSet,
    pool: Vec<Contour>,
    flags: Vec<u8>,
    raw_verts: Vec<i32>,
    simplified: Vec<i32>,
    winding: Vec<i8>,
    region_outline: Vec<i32>,
    region_hole_count: Vec<i32>,
    holes: Vec<ContourHole>,
    diagonals: Vec<PotentialDiagonal>,
}

impl ContourBuilder {
    /// Creates a contour builder with an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// The contour set produced by the last build
    pub fn contour_set(&self) -> &ContourSet {
        &self.set
    }

    /// Returns all contours of the previous pass to the pool
    pub fn clear_contour_set(&mut self) {
        self.pool.append(&mut self.set.contours);
    }

    /// Rents a reset contour sized for `nverts` vertices
    fn rent_contour(&mut self, nverts: usize) -> Contour {
        let mut contour = self.pool.pop().unwrap_or_default();
        contour.reset(nverts);
        contour
    }

    /// Traces, simplifies and hole-merges the boundary of every region.
    ///
    /// `max_error` bounds the deviation of the simplified contour from the
    /// raw boundary, `max_edge_len` splits long edges selected by `flags`
    /// (0 disables splitting). Fails only when a region's contours are
    /// malformed: several outlines, or holes without an outline.
    pub fn build_contours(
        &mut self,
        chf: &CompactHeightfield,
        max_error: f32,
        max_edge_len: i32,
        flags: ContourBuildFlags,
    ) -> Result<&ContourSet> {
        let w = chf.width;
        let h = chf.height;
        let border_size = chf.border_size;

        self.clear_contour_set();
        self.set.bmin = chf.bmin;
        self.set.bmax = chf.bmax;
        if border_size > 0 {
            // Undo the padding offset of the source heightfield
            let pad = border_size as f32 * chf.cell_size;
            self.set.bmin.x += pad;
            self.set.bmin.z += pad;
            self.set.bmax.x -= pad;
            self.set.bmax.z -= pad;
        }
        self.set.cell_size = chf.cell_size;
        self.set.cell_height = chf.cell_height;
        self.set.width = w - border_size * 2;
        self.set.height = h - border_size * 2;
        self.set.border_size = border_size;
        self.set.max_error = max_error;

        // Mark boundary edges: bit d is set when the neighbour in
        // direction d belongs to a different region.
        self.flags.clear();
        self.flags.resize(chf.span_count(), 0);
        for z in 0..h {
            for x in 0..w {
                for i in chf.cell_spans(x, z) {
                    let region = chf.spans[i].region;
                    if region == 0 || (region & BORDER_REG) != 0 {
                        self.flags[i] = 0;
                        continue;
                    }
                    let mut res = 0u8;
                    for dir in 0..4 {
                        let mut r = 0;
                        if let Some(ai) = chf.con_index(x, z, i, dir) {
                            r = chf.spans[ai].region;
                        }
                        if r == region {
                            res |= 1 << dir;
                        }
                    }
                    self.flags[i] = res ^ 0xf;
                }
            }
        }

        for z in 0..h {
            for x in 0..w {
                for i in chf.cell_spans(x, z) {
                    if self.flags[i] == 0 || self.flags[i] == 0xf {
                        self.flags[i] = 0;
                        continue;
                    }
                    let region = chf.spans[i].region;
                    if region == 0 || (region & BORDER_REG) != 0 {
                        continue;
                    }
                    let area = chf.areas[i];

                    self.raw_verts.clear();
                    self.simplified.clear();
                    walk_contour(chf, x, z, i, &mut self.flags, &mut self.raw_verts);
                    if self.raw_verts.is_empty() {
                        continue;
                    }

                    simplify_contour(
                        &self.raw_verts,
                        &mut self.simplified,
                        max_error,
                        max_edge_len,
                        flags,
                    );
                    remove_degenerate_segments(&mut self.simplified);

                    if self.simplified.len() / 4 < 3 {
                        continue;
                    }

                    let mut contour = self.rent_contour(self.simplified.len() / 4);
                    contour.verts.extend_from_slice(&self.simplified);
                    if border_size > 0 {
                        // Shift vertices back into unpadded coordinates
                        for v in contour.verts.chunks_exact_mut(4) {
                            v[0] -= border_size;
                            v[2] -= border_size;
                        }
                    }
                    contour.region = region;
                    contour.area = area;
                    self.set.contours.push(contour);
                }
            }
        }

        self.merge_holes(chf.max_regions)?;

        Ok(&self.set)
    }

    /// Splices every hole contour into its region's outline
    fn merge_holes(&mut self, max_regions: u16) -> Result<()> {
        let nconts = self.set.contours.len();
        if nconts == 0 {
            return Ok(());
        }

        // Positive winding marks an outline, negative a hole
        self.winding.clear();
        let mut nholes = 0;
        for contour in &self.set.contours {
            let winding = if geometry::polygon_area2(&contour.verts) < 0 {
                -1
            } else {
                1
            };
            if winding < 0 {
                nholes += 1;
            }
            self.winding.push(winding);
        }
        if nholes == 0 {
            return Ok(());
        }

        let nregions = max_regions as usize + 1;
        self.region_outline.clear();
        self.region_outline.resize(nregions, -1);
        self.region_hole_count.clear();
        self.region_hole_count.resize(nregions, 0);

        for (i, contour) in self.set.contours.iter().enumerate() {
            let region = contour.region as usize;
            if self.winding[i] > 0 {
                if self.region_outline[region] != -1 {
                    return Err(Error::MultipleOutlines(contour.region));
                }
                self.region_outline[region] = i as i32;
            } else {
                self.region_hole_count[region] += 1;
            }
        }

        for region in 0..nregions {
            if self.region_hole_count[region] == 0 {
                continue;
            }
            let outline = self.region_outline[region];
            if outline < 0 {
                return Err(Error::MissingOutline(region as u16));
            }

            self.holes.clear();
            for i in 0..nconts {
                if self.winding[i] < 0 && self.set.contours[i].region as usize == region {
                    self.holes.push(ContourHole {
                        contour: i,
                        min_x: 0,
                        min_z: 0,
                        leftmost: 0,
                    });
                }
            }
            self.merge_region_holes(outline as usize);
        }

        Ok(())
    }

    /// Merges the collected holes into the outline, left to right. A hole
    /// whose every candidate diagonal crosses the outline or another hole
    /// is dropped with a warning.
    fn merge_region_holes(&mut self, outline_idx: usize) {
        for hole in &mut self.holes {
            let verts = &self.set.contours[hole.contour].verts;
            let (min_x, min_z, leftmost) = find_leftmost_vertex(verts);
            hole.min_x = min_x;
            hole.min_z = min_z;
            hole.leftmost = leftmost;
        }
        self.holes
            .sort_by(|a, b| (a.min_x, a.min_z).cmp(&(b.min_x, b.min_z)));

        let mut outline_verts = std::mem::take(&mut self.set.contours[outline_idx].verts);

        for hi in 0..self.holes.len() {
            let hole_idx = self.holes[hi].contour;
            let hole_nverts = self.set.contours[hole_idx].vertex_count();

            let mut index = None;
            let mut best_vertex = self.holes[hi].leftmost;
            for _ in 0..hole_nverts {
                // Collect outline vertices whose cone contains the
                // candidate hole vertex, nearest first.
                self.diagonals.clear();
                let corner = {
                    let verts = &self.set.contours[hole_idx].verts;
                    [
                        verts[best_vertex * 4],
                        verts[best_vertex * 4 + 1],
                        verts[best_vertex * 4 + 2],
                        verts[best_vertex * 4 + 3],
                    ]
                };
                let outline_n = outline_verts.len() / 4;
                for j in 0..outline_n {
                    let pj = &outline_verts[j * 4..j * 4 + 4];
                    let pn = &outline_verts[next(j, outline_n) * 4..];
                    let pp = &outline_verts[prev(j, outline_n) * 4..];
                    if geometry::in_cone(pp, pj, pn, &corner) {
                        let dx = outline_verts[j * 4] - corner[0];
                        let dz = outline_verts[j * 4 + 2] - corner[2];
                        self.diagonals.push(PotentialDiagonal {
                            vert: j,
                            dist: dx * dx + dz * dz,
                        });
                    }
                }
                self.diagonals.sort_by(|a, b| a.dist.cmp(&b.dist));

                // Take the first diagonal that crosses neither the
                // outline nor any remaining hole.
                index = None;
                for diagonal in &self.diagonals {
                    let pt = [
                        outline_verts[diagonal.vert * 4],
                        outline_verts[diagonal.vert * 4 + 1],
                        outline_verts[diagonal.vert * 4 + 2],
                        outline_verts[diagonal.vert * 4 + 3],
                    ];
                    let mut hit = intersect_seg_contour(
                        &pt,
                        &corner,
                        Some(diagonal.vert),
                        &outline_verts,
                    );
                    for hole in &self.holes[hi..] {
                        if hit {
                            break;
                        }
                        hit |= intersect_seg_contour(
                            &pt,
                            &corner,
                            None,
                            &self.set.contours[hole.contour].verts,
                        );
                    }
                    if !hit {
                        index = Some(diagonal.vert);
                        break;
                    }
                }
                if index.is_some() {
                    break;
                }
                best_vertex = (best_vertex + 1) % hole_nverts;
            }

            let Some(index) = index else {
                log::warn!(
                    "failed to find a non-crossing diagonal for a hole in region {}, dropping it",
                    self.set.contours[outline_idx].region
                );
                continue;
            };

            outline_verts = splice_contours(
                &outline_verts,
                &self.set.contours[hole_idx].verts,
                index,
                best_vertex,
            );
            self.set.contours[hole_idx].verts.clear();
        }

        self.set.contours[outline_idx].verts = outline_verts;
    }
}

/// Minimum-x vertex of a packed ring, ties broken towards minimum z
fn find_leftmost_vertex(verts: &[i32]) -> (i32, i32, usize) {
    let mut min_x = verts[0];
    let mut min_z = verts[2];
    let mut leftmost = 0;
    for i in 1..verts.len() / 4 {
        let x = verts[i * 4];
        let z = verts[i * 4 + 2];
        if x < min_x || (x == min_x && z < min_z) {
            min_x = x;
            min_z = z;
            leftmost = i;
        }
    }
    (min_x, min_z, leftmost)
}

/// True if segment d0-d1 crosses any contour edge. Edges incident to
/// `skip_vertex` and edges touching either endpoint are ignored.
fn intersect_seg_contour(d0: &[i32], d1: &[i32], skip_vertex: Option<usize>, verts: &[i32]) -> bool {
    let n = verts.len() / 4;
    for k in 0..n {
        let k1 = next(k, n);
        if let Some(skip) = skip_vertex {
            if k == skip || k1 == skip {
                continue;
            }
        }
        let p0 = &verts[k * 4..k * 4 + 4];
        let p1 = &verts[k1 * 4..k1 * 4 + 4];
        if geometry::vequal(d0, p0)
            || geometry::vequal(d1, p0)
            || geometry::vequal(d0, p1)
            || geometry::vequal(d1, p1)
        {
            continue;
        }
        if geometry::intersect(d0, d1, p0, p1) {
            return true;
        }
    }
    false
}

/// Splices ring b into ring a through the diagonal (ia, ib). Both join
/// vertices are duplicated, so the result has `na + nb + 2` vertices.
fn splice_contours(a: &[i32], b: &[i32], ia: usize, ib: usize) -> Vec<i32> {
    let na = a.len() / 4;
    let nb = b.len() / 4;
    let mut merged = Vec::with_capacity((na + nb + 2) * 4);
    for i in 0..=na {
        let src = ((ia + i) % na) * 4;
        merged.extend_from_slice(&a[src..src + 4]);
    }
    for i in 0..=nb {
        let src = ((ib + i) % nb) * 4;
        merged.extend_from_slice(&b[src..src + 4]);
    }
    merged
}

/// Height of the corner between the current edge and the next, together
/// with the border-vertex classification of the corner.
fn get_corner_height(
    chf: &CompactHeightfield,
    x: i32,
    z: i32,
    i: usize,
    dir: usize,
) -> (i32, bool) {
    let span = &chf.spans[i];
    let mut height = span.y as i32;
    let dirp = (dir + 1) & 0x3;

    // Region and area codes of the four cells meeting at the corner; the
    // area code rides in the high bits so border vertices between two
    // areas survive the comparison below.
    let mut regs = [0u32; 4];
    regs[0] = span.region as u32 | ((chf.areas[i] as u32) << 16);

    if let Some(ai) = chf.con_index(x, z, i, dir) {
        let ax = x + dir_offset_x(dir);
        let az = z + dir_offset_z(dir);
        height = height.max(chf.spans[ai].y as i32);
        regs[1] = chf.spans[ai].region as u32 | ((chf.areas[ai] as u32) << 16);
        if let Some(ai2) = chf.con_index(ax, az, ai, dirp) {
            height = height.max(chf.spans[ai2].y as i32);
            regs[2] = chf.spans[ai2].region as u32 | ((chf.areas[ai2] as u32) << 16);
        }
    }
    if let Some(ai) = chf.con_index(x, z, i, dirp) {
        let ax = x + dir_offset_x(dirp);
        let az = z + dir_offset_z(dirp);
        height = height.max(chf.spans[ai].y as i32);
        regs[3] = chf.spans[ai].region as u32 | ((chf.areas[ai] as u32) << 16);
        if let Some(ai2) = chf.con_index(ax, az, ai, dir) {
            height = height.max(chf.spans[ai2].y as i32);
            regs[2] = chf.spans[ai2].region as u32 | ((chf.areas[ai2] as u32) << 16);
        }
    }

    // The corner is a border vertex if two identical exterior cells in a
    // row are followed by two interior cells of the same area and none of
    // the cells is out of bounds.
    let mut is_border_vertex = false;
    for j in 0..4 {
        let a = j;
        let b = (j + 1) & 0x3;
        let c = (j + 2) & 0x3;
        let d = (j + 3) & 0x3;

        let two_same_exts =
            (regs[a] & regs[b] & BORDER_REG as u32) != 0 && regs[a] == regs[b];
        let two_ints = ((regs[c] | regs[d]) & BORDER_REG as u32) == 0;
        let ints_same_area = (regs[c] >> 16) == (regs[d] >> 16);
        let no_zeros = regs[a] != 0 && regs[b] != 0 && regs[c] != 0 && regs[d] != 0;
        if two_same_exts && two_ints && ints_same_area && no_zeros {
            is_border_vertex = true;
            break;
        }
    }

    (height, is_border_vertex)
}

/// Walks the boundary of a region starting from span `i`, emitting one
/// packed vertex per corner and clearing the visited edge bits.
fn walk_contour(
    chf: &CompactHeightfield,
    mut x: i32,
    mut z: i32,
    mut i: usize,
    flags: &mut [u8],
    points: &mut Vec<i32>,
) {
    // Choose the first boundary edge
    let mut dir = 0;
    while flags[i] & (1 << dir) == 0 {
        dir += 1;
    }

    let start_dir = dir;
    let start_i = i;
    let area = chf.areas[i];

    let mut iter = 0;
    while iter < MAX_WALK_ITERATIONS {
        iter += 1;
        if flags[i] & (1 << dir) != 0 {
            // The edge is a boundary: emit the corner vertex
            let (py, is_border_vertex) = get_corner_height(chf, x, z, i, dir);
            let mut is_area_border = false;
            let mut px = x;
            let mut pz = z;
            match dir {
                0 => pz += 1,
                1 => {
                    px += 1;
                    pz += 1;
                }
                2 => px += 1,
                _ => {}
            }
            let mut r = 0i32;
            if let Some(ai) = chf.con_index(x, z, i, dir) {
                r = chf.spans[ai].region as i32;
                if area != chf.areas[ai] {
                    is_area_border = true;
                }
            }
            if is_border_vertex {
                r |= BORDER_VERTEX;
            }
            if is_area_border {
                r |= AREA_BORDER;
            }
            points.extend_from_slice(&[px, py, pz, r]);

            flags[i] &= !(1 << dir);
            dir = (dir + 1) & 0x3; // Rotate CW
        } else {
            // The edge is connected: step into the neighbour
            let Some(ni) = chf.con_index(x, z, i, dir) else {
                // Should not happen: a connected edge always resolves
                return;
            };
            x += dir_offset_x(dir);
            z += dir_offset_z(dir);
            i = ni;
            dir = (dir + 3) & 0x3; // Rotate CCW
        }

        if i == start_i && dir == start_dir {
            break;
        }
    }
}

/// Simplifies a raw boundary ring. Vertices where the neighbour region
/// changes are mandatory seeds; otherwise the ring is seeded with its
/// lexicographic extremes. Segments are then subdivided until every raw
/// wall or area-border point is within `max_error`, and finally split to
/// `max_edge_len` where the build flags ask for it.
fn simplify_contour(
    points: &[i32],
    simplified: &mut Vec<i32>,
    max_error: f32,
    max_edge_len: i32,
    flags: ContourBuildFlags,
) {
    let pn = points.len() / 4;

    let has_connections = points
        .chunks_exact(4)
        .any(|v| (v[3] & CONTOUR_REG_MASK) != 0);

    if has_connections {
        // The contour has portals to other regions; add a point at every
        // location where the region changes. These portal vertices are
        // mandatory so neighbouring regions simplify to matching edges.
        for i in 0..pn {
            let ii = (i + 1) % pn;
            let different_regs =
                (points[i * 4 + 3] & CONTOUR_REG_MASK) != (points[ii * 4 + 3] & CONTOUR_REG_MASK);
            let area_borders =
                (points[i * 4 + 3] & AREA_BORDER) != (points[ii * 4 + 3] & AREA_BORDER);
            if different_regs || area_borders {
                simplified.extend_from_slice(&[
                    points[i * 4],
                    points[i * 4 + 1],
                    points[i * 4 + 2],
                    i as i32,
                ]);
            }
        }
    }

    if simplified.is_empty() {
        // No portals at all: seed with the lexicographically lowest and
        // highest vertices of the ring.
        let mut llx = points[0];
        let mut lly = points[1];
        let mut llz = points[2];
        let mut lli = 0usize;
        let mut urx = points[0];
        let mut ury = points[1];
        let mut urz = points[2];
        let mut uri = 0usize;
        for i in 0..pn {
            let x = points[i * 4];
            let y = points[i * 4 + 1];
            let z = points[i * 4 + 2];
            if x < llx || (x == llx && z < llz) {
                llx = x;
                lly = y;
                llz = z;
                lli = i;
            }
            if x > urx || (x == urx && z > urz) {
                urx = x;
                ury = y;
                urz = z;
                uri = i;
            }
        }
        simplified.extend_from_slice(&[llx, lly, llz, lli as i32]);
        simplified.extend_from_slice(&[urx, ury, urz, uri as i32]);
    }

    // Add points until all raw points are within error tolerance of the
    // simplified shape.
    let mut i = 0;
    while i < simplified.len() / 4 {
        let sn = simplified.len() / 4;
        let ii = (i + 1) % sn;

        let mut ax = simplified[i * 4];
        let mut az = simplified[i * 4 + 2];
        let ai = simplified[i * 4 + 3] as usize;

        let mut bx = simplified[ii * 4];
        let mut bz = simplified[ii * 4 + 2];
        let bi = simplified[ii * 4 + 3] as usize;

        // Traverse the raw segment in lexicographic order so the maximum
        // deviation comes out identical for both traversal directions.
        let mut maxd = 0.0f32;
        let mut maxi = None;
        let (mut ci, cinc, endi) = if bx > ax || (bx == ax && bz > az) {
            ((ai + 1) % pn, 1usize, bi)
        } else {
            std::mem::swap(&mut ax, &mut bx);
            std::mem::swap(&mut az, &mut bz);
            ((bi + pn - 1) % pn, pn - 1, ai)
        };

        // Only wall and area-border segments are subdivided
        if (points[ci * 4 + 3] & CONTOUR_REG_MASK) == 0 || (points[ci * 4 + 3] & AREA_BORDER) != 0 {
            while ci != endi {
                let d = geometry::dist_pt_seg_sqr(points[ci * 4], points[ci * 4 + 2], ax, az, bx, bz);
                if d > maxd {
                    maxd = d;
                    maxi = Some(ci);
                }
                ci = (ci + cinc) % pn;
            }
        }

        match maxi {
            Some(maxi) if maxd > max_error * max_error => {
                insert_point(simplified, i + 1, points, maxi);
            }
            _ => i += 1,
        }
    }

    // Split long edges
    if max_edge_len > 0 && (flags.tess_wall_edges || flags.tess_area_edges) {
        let mut i = 0;
        while i < simplified.len() / 4 {
            let sn = simplified.len() / 4;
            let ii = (i + 1) % sn;

            let ax = simplified[i * 4];
            let az = simplified[i * 4 + 2];
            let ai = simplified[i * 4 + 3] as usize;

            let bx = simplified[ii * 4];
            let bz = simplified[ii * 4 + 2];
            let bi = simplified[ii * 4 + 3] as usize;

            let mut maxi = None;
            let ci = (ai + 1) % pn;

            let tess = (flags.tess_wall_edges && (points[ci * 4 + 3] & CONTOUR_REG_MASK) == 0)
                || (flags.tess_area_edges && (points[ci * 4 + 3] & AREA_BORDER) != 0);

            if tess {
                let dx = bx - ax;
                let dz = bz - az;
                if dx * dx + dz * dz > max_edge_len * max_edge_len {
                    // Round the midpoint in lexicographic order so the
                    // tessellation is identical for both traversal
                    // directions.
                    let n = if bi < ai { bi + pn - ai } else { bi - ai };
                    if n > 1 {
                        maxi = if bx > ax || (bx == ax && bz > az) {
                            Some((ai + n / 2) % pn)
                        } else {
                            Some((ai + (n + 1) / 2) % pn)
                        };
                    }
                }
            }

            match maxi {
                Some(maxi) => insert_point(simplified, i + 1, points, maxi),
                None => i += 1,
            }
        }
    }

    for i in 0..simplified.len() / 4 {
        // The edge vertex flag is taken from the current raw point, the
        // neighbour region from the next raw point.
        let ai = (simplified[i * 4 + 3] as usize + 1) % pn;
        let bi = simplified[i * 4 + 3] as usize;
        simplified[i * 4 + 3] = (points[ai * 4 + 3] & (CONTOUR_REG_MASK | AREA_BORDER))
            | (points[bi * 4 + 3] & BORDER_VERTEX);
    }
}

/// Inserts raw point `src` into the simplified ring at position `at`
fn insert_point(simplified: &mut Vec<i32>, at: usize, points: &[i32], src: usize) {
    let at = at * 4;
    simplified.splice(
        at..at,
        [
            points[src * 4],
            points[src * 4 + 1],
            points[src * 4 + 2],
            src as i32,
        ],
    );
}

/// Collapses adjacent vertices equal in x and z. Single in-place pass;
/// the last vertex of each run survives.
fn remove_degenerate_segments(simplified: &mut Vec<i32>) {
    let n = simplified.len() / 4;
    if n == 0 {
        return;
    }
    let first = [simplified[0], simplified[1], simplified[2], simplified[3]];
    let mut out = 0;
    for i in 0..n {
        let (nx, nz) = if i + 1 < n {
            (simplified[(i + 1) * 4], simplified[(i + 1) * 4 + 2])
        } else {
            (first[0], first[2])
        };
        if simplified[i * 4] != nx || simplified[i * 4 + 2] != nz {
            for c in 0..4 {
                simplified[out * 4 + c] = simplified[i * 4 + c];
            }
            out += 1;
        }
    }
    simplified.truncate(out * 4);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::{NULL_AREA, WALKABLE_AREA};

    fn single_region_field(width: i32, height: i32, holes: &[(i32, i32)]) -> CompactHeightfield {
        let mut columns = Vec::new();
        for z in 0..height {
            for x in 0..width {
                if holes.contains(&(x, z)) {
                    columns.push(vec![(0u16, NULL_AREA)]);
                } else {
                    columns.push(vec![(0u16, WALKABLE_AREA)]);
                }
            }
        }
        let mut chf = CompactHeightfield::from_columns(
            width,
            height,
            0,
            Vec3::ZERO,
            Vec3::new(width as f32, 1.0, height as f32),
            1.0,
            0.5,
            &columns,
        )
        .unwrap();
        chf.build_links(1);
        for i in 0..chf.spans.len() {
            if chf.areas[i] != NULL_AREA {
                chf.spans[i].region = 1;
            }
        }
        chf.max_regions = 2;
        chf
    }

    fn contour_xz(contour: &Contour) -> Vec<(i32, i32)> {
        contour
            .verts
            .chunks_exact(4)
            .map(|v| (v[0], v[2]))
            .collect()
    }

    #[test]
    fn test_square_region_simplifies_to_corners() {
        let chf = single_region_field(4, 4, &[]);
        let mut builder = ContourBuilder::new();
        let cset = builder
            .build_contours(&chf, 1.0, 0, ContourBuildFlags::default())
            .unwrap();

        assert_eq!(cset.contours.len(), 1);
        let contour = &cset.contours[0];
        assert_eq!(contour.region, 1);
        assert_eq!(contour.vertex_count(), 4);
        let mut corners = contour_xz(contour);
        corners.sort_unstable();
        assert_eq!(corners, vec![(0, 0), (0, 4), (4, 0), (4, 4)]);
        // Outline winding is positive
        assert!(geometry::polygon_area2(&contour.verts) > 0);
    }

    #[test]
    fn test_adjacent_regions_share_portal_vertices() {
        let mut chf = single_region_field(4, 2, &[]);
        // Right half becomes region 2
        for z in 0..2 {
            for x in 2..4 {
                for i in chf.cell_spans(x, z) {
                    chf.spans[i].region = 2;
                }
            }
        }
        chf.max_regions = 3;

        let mut builder = ContourBuilder::new();
        let cset = builder
            .build_contours(&chf, 1.0, 0, ContourBuildFlags::default())
            .unwrap();

        assert_eq!(cset.contours.len(), 2);
        for contour in &cset.contours {
            let corners = contour_xz(contour);
            assert!(corners.contains(&(2, 0)), "missing portal vertex in {corners:?}");
            assert!(corners.contains(&(2, 2)), "missing portal vertex in {corners:?}");
        }
        // Portal edges carry the neighbour region id
        let left = cset.contours.iter().find(|c| c.region == 1).unwrap();
        assert!(left
            .verts
            .chunks_exact(4)
            .any(|v| v[3] & CONTOUR_REG_MASK == 2));
    }

    #[test]
    fn test_hole_is_spliced_into_outline() {
        // 6x6 region with a 2x2 hole in the middle
        let chf = single_region_field(6, 6, &[(2, 2), (3, 2), (2, 3), (3, 3)]);
        let mut builder = ContourBuilder::new();
        let cset = builder
            .build_contours(&chf, 1.0, 0, ContourBuildFlags::default())
            .unwrap();

        // Outline and hole were traced, then merged into one ring of
        // 4 + 4 + 2 vertices; the consumed hole contour is left empty.
        assert_eq!(cset.contours.len(), 2);
        let merged: Vec<_> = cset
            .contours
            .iter()
            .filter(|c| c.vertex_count() > 0)
            .collect();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].vertex_count(), 10);
        assert_eq!(merged[0].region, 1);

        // The hole corners sit inside the outline ring
        let corners = contour_xz(merged[0]);
        assert!(corners.contains(&(2, 2)));
        assert!(corners.contains(&(4, 4)));
    }

    #[test]
    fn test_long_edge_tessellation() {
        let chf = single_region_field(12, 1, &[]);
        let mut builder = ContourBuilder::new();

        let untessellated = builder
            .build_contours(&chf, 1.0, 0, ContourBuildFlags::default())
            .unwrap()
            .contours[0]
            .vertex_count();
        assert_eq!(untessellated, 4);

        let cset = builder
            .build_contours(&chf, 1.0, 4, ContourBuildFlags::default())
            .unwrap();
        let tessellated = cset.contours[0].vertex_count();
        // Each 12-unit wall edge is split down to at most 4-unit pieces
        assert!(tessellated >= 10, "expected tessellated ring, got {tessellated}");
        for window in contour_xz(&cset.contours[0]).windows(2) {
            let dx = window[1].0 - window[0].0;
            let dz = window[1].1 - window[0].1;
            assert!(dx * dx + dz * dz <= 16);
        }
    }

    #[test]
    fn test_degenerate_segment_removal_is_single_pass() {
        let mut ring = vec![
            0, 0, 0, 0, //
            0, 0, 0, 0, //
            5, 0, 0, 0, //
            5, 0, 5, 0, //
            5, 0, 5, 0, //
            0, 0, 5, 0, //
        ];
        remove_degenerate_segments(&mut ring);
        assert_eq!(ring.len() / 4, 4);

        // Wrap-around duplicate collapses too
        let mut ring = vec![
            0, 0, 0, 0, //
            5, 0, 0, 0, //
            5, 0, 5, 0, //
            0, 0, 0, 0, //
        ];
        remove_degenerate_segments(&mut ring);
        assert_eq!(ring.len() / 4, 3);
    }

    #[test]
    fn test_contour_pool_reuse() {
        let chf = single_region_field(4, 4, &[]);
        let mut builder = ContourBuilder::new();
        let first: Vec<i32> = builder
            .build_contours(&chf, 1.0, 0, ContourBuildFlags::default())
            .unwrap()
            .contours[0]
            .verts
            .clone();
        // The second pass rents the pooled contour and must produce the
        // identical ring.
        let second = builder
            .build_contours(&chf, 1.0, 0, ContourBuildFlags::default())
            .unwrap();
        assert_eq!(second.contours[0].verts, first);
    }
}
