//! Polygon mesh building: triangulation, convex merging, edge-vertex
//! removal, adjacency and portal edges
//!
//! Each contour is ear-clipped into triangles, the triangles are merged
//! into convex polygons up to the vertex cap, border-artefact vertices are
//! removed and the resulting holes re-filled, and finally polygon
//! adjacency and portal edges are resolved.

use glam::Vec3;
use navgen_common::{geometry, Error, Result};

use crate::contour::{ContourSet, BORDER_VERTEX};

/// Null index padding polygon vertex and adjacency slots
pub const MESH_NULL_IDX: u16 = 0xffff;

/// Region id of polygons covering more than one source region
pub const MULTIPLE_REGIONS: u16 = 0;

/// Bucket count of the vertex dedup hash
const VERTEX_BUCKET_COUNT: usize = 1 << 12;

/// Bucket count of the shared-edge hash used by the convex merge
const EDGE_BUCKET_COUNT: usize = 256;

/// High bit of a triangulation index marking an ear vertex
const EAR_FLAG: i32 = i32::MIN;
/// Mask recovering the vertex index from a triangulation index
const INDEX_MASK: i32 = 0x0fff_ffff;

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

/// The polygon mesh produced by one pipeline run
#[derive(Debug, Clone, Default)]
pub struct PolyMesh {
    /// Vertices packed as `(x, y, z)` triples in cell units
    pub verts: Vec<u16>,
    /// Per polygon: `nvp` vertex indices then `nvp` adjacency slots, both
    /// padded with `MESH_NULL_IDX`
    pub polys: Vec<u16>,
    /// Region id per polygon
    pub regions: Vec<u16>,
    /// Area id per polygon
    pub areas: Vec<u8>,
    /// Number of vertices
    pub nverts: usize,
    /// Number of polygons
    pub npolys: usize,
    /// Polygon capacity the mesh was built with
    pub max_polys: usize,
    /// Maximum vertices per polygon
    pub nvp: usize,
    /// The minimum bounds of the mesh AABB
    pub bmin: Vec3,
    /// The maximum bounds of the mesh AABB
    pub bmax: Vec3,
    /// Cell size (horizontal resolution)
    pub cell_size: f32,
    /// Cell height (vertical resolution)
    pub cell_height: f32,
    /// Border padding of the source heightfield
    pub border_size: i32,
    /// Simplification error of the source contour set
    pub max_edge_error: f32,
}

impl PolyMesh {
    /// Creates a deep copy of the mesh
    pub fn copy(&self) -> Self {
        self.clone()
    }
}

/// Shared-edge hash map with parallel arrays, keyed on the canonical
/// vertex pair. Resetting the map only rewinds the entry count; the
/// parallel arrays keep their capacity and are overwritten in place.
#[derive(Debug, Default)]
struct EdgeMap {
    heads: Vec<i32>,
    poly: Vec<i32>,
    edge: Vec<i32>,
    v0: Vec<u16>,
    v1: Vec<u16>,
    next: Vec<i32>,
    count: usize,
}

impl EdgeMap {
    #[inline]
    fn bucket(a: u16, b: u16) -> usize {
        (a as usize + b as usize) & (EDGE_BUCKET_COUNT - 1)
    }

    fn reset(&mut self) {
        if self.heads.len() != EDGE_BUCKET_COUNT {
            self.heads.resize(EDGE_BUCKET_COUNT, -1);
        }
        self.heads.fill(-1);
        self.count = 0;
    }

    /// Slot of the edge (a, b) if it was inserted before
    fn find(&self, a: u16, b: u16) -> Option<usize> {
        let mut slot = self.heads[Self::bucket(a, b)];
        while slot != -1 {
            let s = slot as usize;
            if self.v0[s] == a && self.v1[s] == b {
                return Some(s);
            }
            slot = self.next[s];
        }
        None
    }

    fn insert(&mut self, a: u16, b: u16, poly: usize, edge: usize) {
        let bucket = Self::bucket(a, b);
        let slot = self.count;
        if slot < self.poly.len() {
            self.poly[slot] = poly as i32;
            self.edge[slot] = edge as i32;
            self.v0[slot] = a;
            self.v1[slot] = b;
            self.next[slot] = self.heads[bucket];
        } else {
            self.poly.push(poly as i32);
            self.edge.push(edge as i32);
            self.v0.push(a);
            self.v1.push(b);
            self.next.push(self.heads[bucket]);
        }
        self.heads[bucket] = slot as i32;
        self.count += 1;
    }
}

/// Polygon mesh builder context. The edge map and the triangulation
/// scratch are retained between invocations.
#[derive(Debug, Default)]
pub struct PolyMeshBuilder {
    edge_map: EdgeMap,
    indices: Vec<i32>,
    tris: Vec<i32>,
    cont_polys: Vec<u16>,
    first_vert: Vec<i32>,
    next_vert: Vec<i32>,
    vflags: Vec<bool>,
}

impl PolyMeshBuilder {
    /// Creates a poly mesh builder with empty scratch buffers
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a polygon mesh from a contour set. `nvp` caps the vertex
    /// count of merged polygons. Fails when the 16-bit vertex index
    /// space would overflow or vertex removal exceeds the polygon
    /// capacity; a contour that fails to triangulate is skipped with a
    /// warning.
    pub fn build(&mut self, cset: &ContourSet, nvp: usize) -> Result<PolyMesh> {
        let mut max_vertices = 0;
        let mut max_tris = 0;
        let mut max_verts_per_cont = 0;
        for contour in &cset.contours {
            let n = contour.vertex_count();
            if n < 3 {
                continue;
            }
            max_vertices += n;
            max_tris += n - 2;
            max_verts_per_cont = max_verts_per_cont.max(n);
        }

        if max_vertices >= 0xfffe {
            return Err(Error::TooManyVertices(max_vertices));
        }

        let mut mesh = PolyMesh {
            verts: vec![0; max_vertices * 3],
            polys: vec![MESH_NULL_IDX; max_tris * nvp * 2],
            regions: vec![0; max_tris],
            areas: vec![0; max_tris],
            nverts: 0,
            npolys: 0,
            max_polys: max_tris,
            nvp,
            bmin: cset.bmin,
            bmax: cset.bmax,
            cell_size: cset.cell_size,
            cell_height: cset.cell_height,
            border_size: cset.border_size,
            max_edge_error: cset.max_error,
        };

        self.vflags.clear();
        self.vflags.resize(max_vertices, false);
        self.first_vert.clear();
        self.first_vert.resize(VERTEX_BUCKET_COUNT, -1);
        self.next_vert.clear();
        self.next_vert.resize(max_vertices, 0);

        for contour in &cset.contours {
            let n = contour.vertex_count();
            if n < 3 {
                continue;
            }

            // Triangulate the contour
            self.indices.clear();
            self.indices.extend(0..n as i32);
            let mut ntris = triangulate(&contour.verts, &mut self.indices, &mut self.tris);
            if ntris <= 0 {
                // Keep whatever triangles were recovered
                log::warn!("bad triangulation for a contour of region {}", contour.region);
                ntris = -ntris;
            }

            // Add and deduplicate vertices; indices becomes the map from
            // contour vertex to mesh vertex.
            self.indices.clear();
            for v in contour.verts.chunks_exact(4) {
                let idx = add_vertex(
                    v[0] as u16,
                    v[1] as u16,
                    v[2] as u16,
                    &mut mesh.verts,
                    &mut self.first_vert,
                    &mut self.next_vert,
                    &mut mesh.nverts,
                );
                self.indices.push(idx as i32);
                if v[3] & BORDER_VERTEX != 0 {
                    self.vflags[idx as usize] = true;
                }
            }

            // Build initial polygons from the triangles
            self.cont_polys.clear();
            self.cont_polys.resize(max_verts_per_cont * nvp, MESH_NULL_IDX);
            let mut npolys = 0;
            for t in self.tris[..ntris as usize * 3].chunks_exact(3) {
                if t[0] != t[1] && t[0] != t[2] && t[1] != t[2] {
                    self.cont_polys[npolys * nvp] = self.indices[t[0] as usize] as u16;
                    self.cont_polys[npolys * nvp + 1] = self.indices[t[1] as usize] as u16;
                    self.cont_polys[npolys * nvp + 2] = self.indices[t[2] as usize] as u16;
                    npolys += 1;
                }
            }
            if npolys == 0 {
                continue;
            }

            if nvp > 3 {
                merge_polygon_set(
                    &mut self.edge_map,
                    &mut self.cont_polys,
                    &mut npolys,
                    nvp,
                    &mesh.verts,
                    None,
                    None,
                );
            }

            // Store the polygons
            for j in 0..npolys {
                if mesh.npolys >= max_tris {
                    return Err(Error::TooManyPolygons(mesh.npolys + 1, max_tris));
                }
                let dst = mesh.npolys * nvp * 2;
                mesh.polys[dst..dst + nvp]
                    .copy_from_slice(&self.cont_polys[j * nvp..(j + 1) * nvp]);
                mesh.regions[mesh.npolys] = contour.region;
                mesh.areas[mesh.npolys] = contour.area;
                mesh.npolys += 1;
            }
        }

        // Remove border artefact vertices
        let mut i = 0;
        while i < mesh.nverts {
            if !self.vflags[i] {
                i += 1;
                continue;
            }
            if !can_remove_vertex(&mesh, i as u16) {
                i += 1;
                continue;
            }
            remove_vertex(&mut self.edge_map, &mut mesh, i as u16, max_tris)?;
            // The vertex array shifted down by one; keep the flags aligned
            // and retry the same index.
            self.vflags.remove(i);
        }

        build_mesh_adjacency(&mut mesh);
        mark_portal_edges(&mut mesh, cset.width, cset.height);

        if mesh.nverts > 0xffff {
            log::warn!(
                "the mesh has {} vertices, indices above 0xffff will corrupt downstream consumers",
                mesh.nverts
            );
        }
        if mesh.npolys > 0xffff {
            log::warn!(
                "the mesh has {} polygons, indices above 0xffff will corrupt downstream consumers",
                mesh.npolys
            );
        }

        mesh.verts.truncate(mesh.nverts * 3);
        mesh.polys.truncate(mesh.npolys * nvp * 2);
        mesh.regions.truncate(mesh.npolys);
        mesh.areas.truncate(mesh.npolys);

        Ok(mesh)
    }
}

#[inline]
fn vert<'a>(verts: &'a [i32], indices: &[i32], i: usize) -> &'a [i32] {
    let idx = (indices[i] & INDEX_MASK) as usize;
    &verts[idx * 4..idx * 4 + 4]
}

fn diagonalie(i: usize, j: usize, n: usize, verts: &[i32], indices: &[i32]) -> bool {
    let d0 = vert(verts, indices, i);
    let d1 = vert(verts, indices, j);

    for k in 0..n {
        let k1 = next(k, n);
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = vert(verts, indices, k);
        let p1 = vert(verts, indices, k1);
        if geometry::vequal(d0, p0)
            || geometry::vequal(d1, p0)
            || geometry::vequal(d0, p1)
            || geometry::vequal(d1, p1)
        {
            continue;
        }
        if geometry::intersect(d0, d1, p0, p1) {
            return false;
        }
    }
    true
}

fn in_cone(i: usize, j: usize, n: usize, verts: &[i32], indices: &[i32]) -> bool {
    let pi = vert(verts, indices, i);
    let pj = vert(verts, indices, j);
    let pi1 = vert(verts, indices, next(i, n));
    let pin1 = vert(verts, indices, prev(i, n));
    geometry::in_cone(pin1, pi, pi1, pj)
}

fn diagonal(i: usize, j: usize, n: usize, verts: &[i32], indices: &[i32]) -> bool {
    in_cone(i, j, n, verts, indices) && diagonalie(i, j, n, verts, indices)
}

fn diagonalie_loose(i: usize, j: usize, n: usize, verts: &[i32], indices: &[i32]) -> bool {
    let d0 = vert(verts, indices, i);
    let d1 = vert(verts, indices, j);

    for k in 0..n {
        let k1 = next(k, n);
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = vert(verts, indices, k);
        let p1 = vert(verts, indices, k1);
        if geometry::vequal(d0, p0)
            || geometry::vequal(d1, p0)
            || geometry::vequal(d0, p1)
            || geometry::vequal(d1, p1)
        {
            continue;
        }
        if geometry::intersect_prop(d0, d1, p0, p1) {
            return false;
        }
    }
    true
}

fn in_cone_loose(i: usize, j: usize, n: usize, verts: &[i32], indices: &[i32]) -> bool {
    let pi = vert(verts, indices, i);
    let pj = vert(verts, indices, j);
    let pi1 = vert(verts, indices, next(i, n));
    let pin1 = vert(verts, indices, prev(i, n));
    if geometry::left_on(pin1, pi, pi1) {
        geometry::left_on(pi, pj, pin1) && geometry::left_on(pj, pi, pi1)
    } else {
        !(geometry::left_on(pi, pj, pi1) && geometry::left_on(pj, pi, pin1))
    }
}

fn diagonal_loose(i: usize, j: usize, n: usize, verts: &[i32], indices: &[i32]) -> bool {
    in_cone_loose(i, j, n, verts, indices) && diagonalie_loose(i, j, n, verts, indices)
}

/// Ear-clips the ring into triangles pushed onto `tris`. Returns the
/// triangle count, negated when the contour was bad and only partially
/// triangulated.
fn triangulate(verts: &[i32], indices: &mut [i32], tris: &mut Vec<i32>) -> i32 {
    let mut n = indices.len();
    let mut ntris = 0;
    tris.clear();

    // The top bit of the index marks vertices whose outgoing diagonal
    // (i, i+2) lies inside the polygon.
    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        if diagonal(i, i2, n, verts, indices) {
            indices[i1] |= EAR_FLAG;
        }
    }

    while n > 3 {
        // Pick the ear with the shortest diagonal
        let mut min_len = -1i32;
        let mut mini = None;
        for i in 0..n {
            let i1 = next(i, n);
            if indices[i1] & EAR_FLAG != 0 {
                let p0 = vert(verts, indices, i);
                let p2 = vert(verts, indices, next(i1, n));
                let dx = p2[0] - p0[0];
                let dz = p2[2] - p0[2];
                let len = dx * dx + dz * dz;
                if min_len < 0 || len < min_len {
                    min_len = len;
                    mini = Some(i);
                }
            }
        }

        if mini.is_none() {
            // The contour touches itself; retry with a diagonal test that
            // tolerates collinear points on the boundary.
            min_len = -1;
            for i in 0..n {
                let i1 = next(i, n);
                let i2 = next(i1, n);
                if diagonal_loose(i, i2, n, verts, indices) {
                    let p0 = vert(verts, indices, i);
                    let p2 = vert(verts, indices, next(i2, n));
                    let dx = p2[0] - p0[0];
                    let dz = p2[2] - p0[2];
                    let len = dx * dx + dz * dz;
                    if min_len < 0 || len < min_len {
                        min_len = len;
                        mini = Some(i);
                    }
                }
            }
        }

        let Some(i) = mini else {
            // The contour is beyond recovery
            return -ntris;
        };
        let mut i1 = next(i, n);
        let i2 = next(i1, n);

        tris.push(indices[i] & INDEX_MASK);
        tris.push(indices[i1] & INDEX_MASK);
        tris.push(indices[i2] & INDEX_MASK);
        ntris += 1;

        // Remove the clipped vertex
        n -= 1;
        indices.copy_within(i1 + 1..n + 1, i1);

        if i1 >= n {
            i1 = 0;
        }
        let i = prev(i1, n);
        if diagonal(prev(i, n), i1, n, verts, indices) {
            indices[i] |= EAR_FLAG;
        } else {
            indices[i] &= INDEX_MASK;
        }
        if diagonal(i, next(i1, n), n, verts, indices) {
            indices[i1] |= EAR_FLAG;
        } else {
            indices[i1] &= INDEX_MASK;
        }
    }

    tris.push(indices[0] & INDEX_MASK);
    tris.push(indices[1] & INDEX_MASK);
    tris.push(indices[2] & INDEX_MASK);
    ntris + 1
}

/// Adds a vertex, deduplicating through the spatial hash. Two vertices
/// merge when x and z match exactly and the floor heights are within 2
/// units of each other.
fn add_vertex(
    x: u16,
    y: u16,
    z: u16,
    verts: &mut [u16],
    first_vert: &mut [i32],
    next_vert: &mut [i32],
    nverts: &mut usize,
) -> u16 {
    let bucket = vertex_hash(x, z);
    let mut i = first_vert[bucket];
    while i != -1 {
        let v = &verts[i as usize * 3..];
        if v[0] == x && v[2] == z && (v[1] as i32 - y as i32).abs() <= 2 {
            return i as u16;
        }
        i = next_vert[i as usize];
    }

    let i = *nverts;
    *nverts += 1;
    verts[i * 3] = x;
    verts[i * 3 + 1] = y;
    verts[i * 3 + 2] = z;
    next_vert[i] = first_vert[bucket];
    first_vert[bucket] = i as i32;
    i as u16
}

#[inline]
fn vertex_hash(x: u16, z: u16) -> usize {
    const H1: u32 = 0x8da6b343;
    const H3: u32 = 0xcb1ab31f;
    let n = H1
        .wrapping_mul(x as u32)
        .wrapping_add(H3.wrapping_mul(z as u32));
    (n & (VERTEX_BUCKET_COUNT as u32 - 1)) as usize
}

/// Number of used vertex slots in a polygon
#[inline]
fn count_poly_verts(p: &[u16], nvp: usize) -> usize {
    p.iter()
        .take(nvp)
        .position(|&v| v == MESH_NULL_IDX)
        .unwrap_or(nvp)
}

/// Left-turn test on dedup'd mesh vertices
#[inline]
fn uleft(a: &[u16], b: &[u16], c: &[u16]) -> bool {
    (b[0] as i32 - a[0] as i32) * (c[2] as i32 - a[2] as i32)
        - (c[0] as i32 - a[0] as i32) * (b[2] as i32 - a[2] as i32)
        < 0
}

/// Merge value of two polygons sharing edge (ea, eb): the squared length
/// of the shared edge, or -1 when the merge would exceed the vertex cap
/// or break convexity.
fn get_poly_merge_value(
    polys: &[u16],
    pa: usize,
    pb: usize,
    ea: usize,
    eb: usize,
    verts: &[u16],
    nvp: usize,
) -> i32 {
    let pa = &polys[pa * nvp..(pa + 1) * nvp];
    let pb = &polys[pb * nvp..(pb + 1) * nvp];
    let na = count_poly_verts(pa, nvp);
    let nb = count_poly_verts(pb, nvp);

    if na + nb - 2 > nvp {
        return -1;
    }

    // The merged corner at each end of the shared edge must stay convex
    let va = pa[(ea + na - 1) % na];
    let vb = pa[ea];
    let vc = pb[(eb + 2) % nb];
    if !uleft(
        &verts[va as usize * 3..],
        &verts[vb as usize * 3..],
        &verts[vc as usize * 3..],
    ) {
        return -1;
    }

    let va = pb[(eb + nb - 1) % nb];
    let vb = pb[eb];
    let vc = pa[(ea + 2) % na];
    if !uleft(
        &verts[va as usize * 3..],
        &verts[vb as usize * 3..],
        &verts[vc as usize * 3..],
    ) {
        return -1;
    }

    let va = pa[ea];
    let vb = pa[(ea + 1) % na];
    let dx = verts[va as usize * 3] as i32 - verts[vb as usize * 3] as i32;
    let dz = verts[va as usize * 3 + 2] as i32 - verts[vb as usize * 3 + 2] as i32;
    dx * dx + dz * dz
}

/// Repeatedly merges the polygon pair with the longest shared edge until
/// no merge is possible. Shared edges are found through the edge hash;
/// on equal edge lengths the earliest candidate wins. `regions` and
/// `areas`, when present, follow the polygon moves, and merging polygons
/// of different regions tags the result `MULTIPLE_REGIONS`.
fn merge_polygon_set(
    edge_map: &mut EdgeMap,
    polys: &mut [u16],
    npolys: &mut usize,
    nvp: usize,
    verts: &[u16],
    mut regions: Option<&mut [u16]>,
    mut areas: Option<&mut [u8]>,
) {
    loop {
        // Index every polygon edge; a second occurrence of a key is a
        // shared edge and becomes a merge candidate.
        edge_map.reset();
        let mut best_val = 0;
        let mut best = None;
        for j in 0..*npolys {
            let nv = count_poly_verts(&polys[j * nvp..], nvp);
            for e in 0..nv {
                let mut a = polys[j * nvp + e];
                let mut b = polys[j * nvp + next(e, nv)];
                if a > b {
                    std::mem::swap(&mut a, &mut b);
                }
                if let Some(slot) = edge_map.find(a, b) {
                    let k = edge_map.poly[slot] as usize;
                    let ek = edge_map.edge[slot] as usize;
                    let v = get_poly_merge_value(polys, k, j, ek, e, verts, nvp);
                    if v > best_val {
                        best_val = v;
                        best = Some((k, j, ek, e));
                    }
                } else {
                    edge_map.insert(a, b, j, e);
                }
            }
        }

        let Some((pa, pb, ea, eb)) = best else {
            break;
        };

        // Splice pb into pa around the shared edge
        let na = count_poly_verts(&polys[pa * nvp..], nvp);
        let nb = count_poly_verts(&polys[pb * nvp..], nvp);
        let mut tmp = [MESH_NULL_IDX; 12];
        let mut nv = 0;
        for i in 0..na - 1 {
            tmp[nv] = polys[pa * nvp + (ea + 1 + i) % na];
            nv += 1;
        }
        for i in 0..nb - 1 {
            tmp[nv] = polys[pb * nvp + (eb + 1 + i) % nb];
            nv += 1;
        }
        polys[pa * nvp..(pa + 1) * nvp].copy_from_slice(&tmp[..nvp]);

        if let Some(regions) = regions.as_deref_mut() {
            if regions[pa] != regions[pb] {
                regions[pa] = MULTIPLE_REGIONS;
            }
        }

        // Fill the gap with the last polygon
        let last = *npolys - 1;
        if pb != last {
            polys.copy_within(last * nvp..(last + 1) * nvp, pb * nvp);
        }
        if let Some(regions) = regions.as_deref_mut() {
            regions[pb] = regions[last];
        }
        if let Some(areas) = areas.as_deref_mut() {
            areas[pb] = areas[last];
        }
        *npolys -= 1;
    }
}

/// True if the vertex can be removed without disconnecting the mesh:
/// enough edges must remain to form a polygon, and at most two of the
/// edges fanning around the vertex may be open.
fn can_remove_vertex(mesh: &PolyMesh, rem: u16) -> bool {
    let nvp = mesh.nvp;

    let mut num_touched_verts = 0;
    let mut num_remaining_edges = 0i32;
    for i in 0..mesh.npolys {
        let p = &mesh.polys[i * nvp * 2..];
        let nv = count_poly_verts(p, nvp);
        let mut num_removed = 0i32;
        let mut num_verts = 0i32;
        for &v in p.iter().take(nv) {
            if v == rem {
                num_touched_verts += 1;
                num_removed += 1;
            }
            num_verts += 1;
        }
        if num_removed > 0 {
            num_remaining_edges += num_verts - (num_removed + 1);
        }
    }
    if num_remaining_edges <= 2 {
        return false;
    }

    // Edges fanning around the removed vertex, with share counts
    let mut edges: Vec<[i32; 3]> = Vec::with_capacity(num_touched_verts * 2);
    for i in 0..mesh.npolys {
        let p = &mesh.polys[i * nvp * 2..];
        let nv = count_poly_verts(p, nvp);
        let mut k = nv - 1;
        for j in 0..nv {
            if p[j] == rem || p[k] == rem {
                let (a, b) = if p[j] == rem {
                    (p[j] as i32, p[k] as i32)
                } else {
                    (p[k] as i32, p[j] as i32)
                };
                debug_assert_eq!(a, rem as i32);
                if let Some(e) = edges.iter_mut().find(|e| e[1] == b) {
                    e[2] += 1;
                } else {
                    edges.push([a, b, 1]);
                }
            }
            k = j;
        }
    }

    let num_open_edges = edges.iter().filter(|e| e[2] < 2).count();
    num_open_edges <= 2
}

/// Removes the vertex, deletes its incident polygons and re-fills the
/// resulting hole with merged triangles.
fn remove_vertex(
    edge_map: &mut EdgeMap,
    mesh: &mut PolyMesh,
    rem: u16,
    max_tris: usize,
) -> Result<()> {
    let nvp = mesh.nvp;

    // Collect the boundary edges of the incident polygons and delete the
    // polygons.
    let mut edges: Vec<[i32; 4]> = Vec::new();
    let mut i = 0;
    while i < mesh.npolys {
        let p = &mesh.polys[i * nvp * 2..];
        let nv = count_poly_verts(p, nvp);
        if !p.iter().take(nv).any(|&v| v == rem) {
            i += 1;
            continue;
        }

        let mut k = nv - 1;
        for j in 0..nv {
            if p[j] != rem && p[k] != rem {
                edges.push([
                    p[k] as i32,
                    p[j] as i32,
                    mesh.regions[i] as i32,
                    mesh.areas[i] as i32,
                ]);
            }
            k = j;
        }

        let last = mesh.npolys - 1;
        if i != last {
            mesh.polys.copy_within(last * nvp * 2..last * nvp * 2 + nvp, i * nvp * 2);
        }
        mesh.polys[i * nvp * 2 + nvp..(i + 1) * nvp * 2].fill(MESH_NULL_IDX);
        mesh.regions[i] = mesh.regions[last];
        mesh.areas[i] = mesh.areas[last];
        mesh.npolys -= 1;
    }

    // Remove the vertex and close the index gap
    for i in rem as usize..mesh.nverts - 1 {
        mesh.verts[i * 3] = mesh.verts[(i + 1) * 3];
        mesh.verts[i * 3 + 1] = mesh.verts[(i + 1) * 3 + 1];
        mesh.verts[i * 3 + 2] = mesh.verts[(i + 1) * 3 + 2];
    }
    mesh.nverts -= 1;

    for i in 0..mesh.npolys {
        let p = &mut mesh.polys[i * nvp * 2..];
        let nv = count_poly_verts(p, nvp);
        for v in p.iter_mut().take(nv) {
            if *v > rem {
                *v -= 1;
            }
        }
    }
    for e in edges.iter_mut() {
        if e[0] > rem as i32 {
            e[0] -= 1;
        }
        if e[1] > rem as i32 {
            e[1] -= 1;
        }
    }

    if edges.is_empty() {
        return Ok(());
    }

    // Re-assemble the collected edges into the closed hole boundary by
    // appending or prepending whichever edge continues the chain.
    let mut hole = vec![edges[0][0]];
    let mut hole_regions = vec![edges[0][2]];
    let mut hole_areas = vec![edges[0][3]];
    while !edges.is_empty() {
        let mut matched = false;
        let mut i = 0;
        while i < edges.len() {
            let [ea, eb, r, a] = edges[i];
            let mut add = false;
            if hole[0] == eb {
                hole.insert(0, ea);
                hole_regions.insert(0, r);
                hole_areas.insert(0, a);
                add = true;
            } else if hole[hole.len() - 1] == ea {
                hole.push(eb);
                hole_regions.push(r);
                hole_areas.push(a);
                add = true;
            }
            if add {
                edges.swap_remove(i);
                matched = true;
            } else {
                i += 1;
            }
        }
        if !matched {
            break;
        }
    }

    // Triangulate the hole
    let nhole = hole.len();
    if nhole < 3 {
        log::warn!("hole left by removed vertex {rem} did not close, dropping it");
        return Ok(());
    }
    let mut tverts = Vec::with_capacity(nhole * 4);
    for &h in &hole {
        let v = &mesh.verts[h as usize * 3..];
        tverts.extend_from_slice(&[v[0] as i32, v[1] as i32, v[2] as i32, 0]);
    }
    let mut thole: Vec<i32> = (0..nhole as i32).collect();
    let mut tris = Vec::new();
    let mut ntris = triangulate(&tverts, &mut thole, &mut tris);
    if ntris < 0 {
        ntris = -ntris;
        log::warn!("bad triangulation while re-filling a removed vertex hole");
    }

    // Merge the hole triangles back into polygons
    let mut polys = vec![MESH_NULL_IDX; ntris as usize * nvp];
    let mut pregs = vec![0u16; ntris as usize];
    let mut pareas = vec![0u8; ntris as usize];
    let mut npolys = 0;
    for t in tris[..ntris as usize * 3].chunks_exact(3) {
        if t[0] != t[1] && t[0] != t[2] && t[1] != t[2] {
            polys[npolys * nvp] = hole[t[0] as usize] as u16;
            polys[npolys * nvp + 1] = hole[t[1] as usize] as u16;
            polys[npolys * nvp + 2] = hole[t[2] as usize] as u16;

            // A fill triangle spanning several source regions is tagged
            if hole_regions[t[0] as usize] != hole_regions[t[1] as usize]
                || hole_regions[t[1] as usize] != hole_regions[t[2] as usize]
            {
                pregs[npolys] = MULTIPLE_REGIONS;
            } else {
                pregs[npolys] = hole_regions[t[0] as usize] as u16;
            }
            pareas[npolys] = hole_areas[t[0] as usize] as u8;
            npolys += 1;
        }
    }
    if npolys == 0 {
        return Ok(());
    }

    if nvp > 3 {
        merge_polygon_set(
            edge_map,
            &mut polys,
            &mut npolys,
            nvp,
            &mesh.verts,
            Some(&mut pregs),
            Some(&mut pareas),
        );
    }

    // Store the fill polygons
    for i in 0..npolys {
        if mesh.npolys >= max_tris {
            return Err(Error::TooManyPolygons(mesh.npolys + 1, max_tris));
        }
        let dst = mesh.npolys * nvp * 2;
        mesh.polys[dst..dst + nvp].copy_from_slice(&polys[i * nvp..(i + 1) * nvp]);
        mesh.regions[mesh.npolys] = pregs[i];
        mesh.areas[mesh.npolys] = pareas[i];
        mesh.npolys += 1;
    }

    Ok(())
}

/// Resolves polygon adjacency into the second half of every polygon's
/// slot row.
fn build_mesh_adjacency(mesh: &mut PolyMesh) {
    let nvp = mesh.nvp;
    let npolys = mesh.npolys;
    let nverts = mesh.nverts;

    #[derive(Clone, Copy, Default)]
    struct Edge {
        vert: [u16; 2],
        poly_edge: [u16; 2],
        poly: [u16; 2],
    }

    let max_edge_count = npolys * nvp;
    let mut first_edge = vec![MESH_NULL_IDX; nverts];
    let mut next_edge = vec![MESH_NULL_IDX; max_edge_count];
    let mut edges = vec![Edge::default(); max_edge_count];
    let mut edge_count = 0usize;

    // First pass: collect edges keyed on their lower vertex
    for i in 0..npolys {
        let t = &mesh.polys[i * nvp * 2..];
        for j in 0..nvp {
            if t[j] == MESH_NULL_IDX {
                break;
            }
            let v0 = t[j];
            let v1 = if j + 1 >= nvp || t[j + 1] == MESH_NULL_IDX {
                t[0]
            } else {
                t[j + 1]
            };
            if v0 < v1 {
                let edge = &mut edges[edge_count];
                edge.vert = [v0, v1];
                edge.poly = [i as u16, i as u16];
                edge.poly_edge = [j as u16, 0];
                next_edge[edge_count] = first_edge[v0 as usize];
                first_edge[v0 as usize] = edge_count as u16;
                edge_count += 1;
            }
        }
    }

    // Second pass: claim the matching edge entry
    for i in 0..npolys {
        let t = &mesh.polys[i * nvp * 2..];
        for j in 0..nvp {
            if t[j] == MESH_NULL_IDX {
                break;
            }
            let v0 = t[j];
            let v1 = if j + 1 >= nvp || t[j + 1] == MESH_NULL_IDX {
                t[0]
            } else {
                t[j + 1]
            };
            if v0 > v1 {
                let mut e = first_edge[v1 as usize];
                while e != MESH_NULL_IDX {
                    let edge = &mut edges[e as usize];
                    if edge.vert[1] == v0 && edge.poly[0] == edge.poly[1] {
                        edge.poly[1] = i as u16;
                        edge.poly_edge[1] = j as u16;
                        break;
                    }
                    e = next_edge[e as usize];
                }
            }
        }
    }

    for edge in edges.iter().take(edge_count) {
        if edge.poly[0] != edge.poly[1] {
            let p0 = edge.poly[0] as usize;
            let p1 = edge.poly[1] as usize;
            mesh.polys[p0 * nvp * 2 + nvp + edge.poly_edge[0] as usize] = edge.poly[1];
            mesh.polys[p1 * nvp * 2 + nvp + edge.poly_edge[1] as usize] = edge.poly[0];
        }
    }
}

/// Tags unconnected polygon edges lying on the unpadded grid boundary as
/// portal edges
fn mark_portal_edges(mesh: &mut PolyMesh, width: i32, height: i32) {
    if mesh.border_size <= 0 {
        return;
    }
    let nvp = mesh.nvp;
    let w = width as u16;
    let h = height as u16;

    for i in 0..mesh.npolys {
        let poly_base = i * nvp * 2;
        for j in 0..nvp {
            if mesh.polys[poly_base + j] == MESH_NULL_IDX {
                break;
            }
            if mesh.polys[poly_base + nvp + j] != MESH_NULL_IDX {
                continue;
            }
            let nj = if j + 1 >= nvp || mesh.polys[poly_base + j + 1] == MESH_NULL_IDX {
                0
            } else {
                j + 1
            };
            let va = &mesh.verts[mesh.polys[poly_base + j] as usize * 3..];
            let vb = &mesh.verts[mesh.polys[poly_base + nj] as usize * 3..];

            let slot = if va[0] == 0 && vb[0] == 0 {
                Some(0x8000)
            } else if va[2] == h && vb[2] == h {
                Some(0x8000 | 1)
            } else if va[0] == w && vb[0] == w {
                Some(0x8000 | 2)
            } else if va[2] == 0 && vb[2] == 0 {
                Some(0x8000 | 3)
            } else {
                None
            };
            if let Some(slot) = slot {
                mesh.polys[poly_base + nvp + j] = slot;
            }
        }
    }
}
