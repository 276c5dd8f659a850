//! End-to-end pipeline scenarios on hand-built heightfields

use glam::Vec3;
use navgen::{
    CompactHeightfield, GeneratorConfig, NavMeshGenerator, PolyMesh, BORDER_REG, MESH_NULL_IDX,
    NULL_AREA, WALKABLE_AREA,
};

/// Builds a flat single-layer heightfield from a per-cell walkability
/// predicate.
fn grid_field(
    width: i32,
    height: i32,
    border_size: i32,
    walkable: impl Fn(i32, i32) -> bool,
) -> CompactHeightfield {
    let mut columns = Vec::new();
    for z in 0..height {
        for x in 0..width {
            let area = if walkable(x, z) { WALKABLE_AREA } else { NULL_AREA };
            columns.push(vec![(0u16, area)]);
        }
    }
    let mut chf = CompactHeightfield::from_columns(
        width,
        height,
        border_size,
        Vec3::ZERO,
        Vec3::new(width as f32, 1.0, height as f32),
        0.3,
        0.2,
        &columns,
    )
    .unwrap();
    chf.build_links(1);
    chf
}

fn config(border_size: i32, min_region_area: i32) -> GeneratorConfig {
    GeneratorConfig {
        border_size,
        min_region_area,
        max_simplification_error: 1.0,
        max_edge_len: 0,
        max_verts_per_poly: 6,
        ..Default::default()
    }
}

fn poly_verts(mesh: &PolyMesh, i: usize) -> Vec<u16> {
    mesh.polys[i * mesh.nvp * 2..]
        .iter()
        .take(mesh.nvp)
        .copied()
        .take_while(|&v| v != MESH_NULL_IDX)
        .collect()
}

fn adjacency(mesh: &PolyMesh, i: usize) -> Vec<u16> {
    mesh.polys[i * mesh.nvp * 2 + mesh.nvp..]
        .iter()
        .take(mesh.nvp)
        .copied()
        .collect()
}

/// Every adjacency slot holding a polygon index must be mirrored by
/// exactly one slot of the referenced polygon.
fn assert_adjacency_symmetric(mesh: &PolyMesh) {
    for i in 0..mesh.npolys {
        for &adj in &adjacency(mesh, i) {
            if adj == MESH_NULL_IDX || adj & 0x8000 != 0 {
                continue;
            }
            let back = adjacency(mesh, adj as usize)
                .iter()
                .filter(|&&v| v == i as u16)
                .count();
            assert_eq!(back, 1, "asymmetric adjacency between {i} and {adj}");
        }
    }
}

fn signed_area2(mesh: &PolyMesh, i: usize) -> i32 {
    let vs = poly_verts(mesh, i);
    let mut area = 0;
    let mut j = vs.len() - 1;
    for k in 0..vs.len() {
        let vk = &mesh.verts[vs[k] as usize * 3..];
        let vj = &mesh.verts[vs[j] as usize * 3..];
        area += vk[0] as i32 * vj[2] as i32 - vj[0] as i32 * vk[2] as i32;
        j = k;
    }
    area
}

#[test]
fn single_square_region() {
    let mut chf = grid_field(10, 10, 0, |_, _| true);
    let mut generator = NavMeshGenerator::new(config(0, 1)).unwrap();
    let mesh = generator.build(&mut chf).unwrap();

    assert_eq!(chf.max_regions, 2);
    assert_eq!(mesh.nverts, 4);
    assert_eq!(mesh.npolys, 1);
    assert_eq!(poly_verts(&mesh, 0).len(), 4);
    assert_eq!(mesh.regions[0], 1);
    assert!(adjacency(&mesh, 0).iter().all(|&a| a == MESH_NULL_IDX));
}

#[test]
fn two_adjacent_regions_share_an_edge() {
    // A 10x20 grid split into two 10x10 squares by area label; the
    // region builder keeps them apart and the contours meet along z=10.
    let mut chf = grid_field(10, 20, 0, |_, _| true);
    for z in 10..20 {
        for x in 0..10 {
            for i in chf.cell_spans(x, z) {
                chf.areas[i] = 7;
            }
        }
    }
    let mut generator = NavMeshGenerator::new(config(0, 1)).unwrap();
    let mesh = generator.build(&mut chf).unwrap();

    assert_eq!(chf.max_regions, 3);
    assert_eq!(mesh.npolys, 2);
    assert_adjacency_symmetric(&mesh);

    // The two polygons connect to each other along the shared edge
    let a0 = adjacency(&mesh, 0);
    let a1 = adjacency(&mesh, 1);
    assert_eq!(a0.iter().filter(|&&v| v == 1).count(), 1);
    assert_eq!(a1.iter().filter(|&&v| v == 0).count(), 1);

    // Both contours kept the mandatory portal vertices at (0,10), (10,10)
    let shared: Vec<_> = mesh
        .verts
        .chunks_exact(3)
        .filter(|v| (v[0] == 0 || v[0] == 10) && v[2] == 10)
        .collect();
    assert_eq!(shared.len(), 2);

    // Area labels survive per polygon
    let mut areas = vec![mesh.areas[0], mesh.areas[1]];
    areas.sort_unstable();
    assert_eq!(areas, vec![7, WALKABLE_AREA]);
}

#[test]
fn square_region_with_hole() {
    let mut chf = grid_field(10, 10, 0, |x, z| !((4..6).contains(&x) && (4..6).contains(&z)));
    let mut generator = NavMeshGenerator::new(config(0, 1)).unwrap();
    let mesh = generator.build(&mut chf).unwrap();

    // One region: the ring around the hole is connected
    assert_eq!(chf.max_regions, 2);

    // The spliced ring has 4 + 4 + 2 vertices; after dedup of the two
    // duplicated join vertices the mesh covers the full ring area.
    assert!(mesh.npolys >= 2 && mesh.npolys <= 6, "npolys = {}", mesh.npolys);
    assert_adjacency_symmetric(&mesh);

    let total: i32 = (0..mesh.npolys).map(|i| signed_area2(&mesh, i)).sum();
    assert_eq!(total, (100 - 4) * 2);

    // No polygon covers the hole cells
    for v in mesh.verts.chunks_exact(3) {
        assert!(v[0] <= 10 && v[2] <= 10);
    }
}

#[test]
fn small_region_is_filtered() {
    let mut chf = grid_field(10, 10, 0, |x, z| z == 0 && x < 3);
    let mut generator = NavMeshGenerator::new(config(0, 5)).unwrap();
    let mesh = generator.build(&mut chf).unwrap();

    assert_eq!(chf.max_regions, 1);
    assert_eq!(mesh.npolys, 0);
    assert_eq!(mesh.nverts, 0);
    for span in &chf.spans {
        assert_eq!(span.region, 0);
    }
}

#[test]
fn border_touch_exempts_small_region() {
    // The same 3-span strip, but inside border padding it connects to:
    // the region survives the area filter and produces one polygon.
    let walkable = |x: i32, z: i32| {
        let on_border = x == 0 || z == 0 || x == 4 || z == 4;
        on_border || (z == 1 && (1..4).contains(&x))
    };
    let mut chf = grid_field(5, 5, 1, walkable);
    let mut generator = NavMeshGenerator::new(config(1, 5)).unwrap();
    let mesh = generator.build(&mut chf).unwrap();

    // The interior strip kept its region
    let strip_span = chf.cell_spans(1, 1).start;
    let region = chf.spans[strip_span].region;
    assert_ne!(region, 0);
    assert_eq!(region & BORDER_REG, 0);

    assert_eq!(mesh.npolys, 1);
    assert_eq!(mesh.regions[0], region);

    // Unconnected edges on the unpadded grid boundary became portals
    let portals: Vec<u16> = adjacency(&mesh, 0)
        .iter()
        .copied()
        .filter(|&a| a != MESH_NULL_IDX && a & 0x8000 != 0)
        .collect();
    assert!(!portals.is_empty());
}

#[test]
fn long_thin_region_tessellates_wall_edges() {
    let mut chf = grid_field(1, 100, 0, |_, _| true);
    let mut generator = NavMeshGenerator::new(GeneratorConfig {
        border_size: 0,
        min_region_area: 1,
        max_simplification_error: 1.0,
        max_edge_len: 16,
        max_verts_per_poly: 6,
        ..Default::default()
    })
    .unwrap();
    let mesh = generator.build(&mut chf).unwrap();

    // Both 100-cell wall edges were split to at most 16-cell pieces
    assert!(mesh.nverts >= 16, "nverts = {}", mesh.nverts);
    let long_side = |x: u16| {
        mesh.verts
            .chunks_exact(3)
            .filter(|v| v[0] == x)
            .count()
    };
    assert!(long_side(0) >= 8);
    assert!(long_side(1) >= 8);
    assert_adjacency_symmetric(&mesh);

    // Every polygon edge along a wall is at most 16 cells long
    for i in 0..mesh.npolys {
        let vs = poly_verts(&mesh, i);
        for j in 0..vs.len() {
            let a = &mesh.verts[vs[j] as usize * 3..];
            let b = &mesh.verts[vs[(j + 1) % vs.len()] as usize * 3..];
            let dx = b[0] as i32 - a[0] as i32;
            let dz = b[2] as i32 - a[2] as i32;
            assert!(dx * dx + dz * dz <= 16 * 16 + 1);
        }
    }
}

#[test]
fn region_coverage_invariant() {
    let mut chf = grid_field(12, 12, 2, |x, z| (x + z) % 7 != 0);
    let mut generator = NavMeshGenerator::new(config(2, 1)).unwrap();
    generator.build(&mut chf).unwrap();

    for (i, span) in chf.spans.iter().enumerate() {
        if chf.areas[i] == NULL_AREA {
            continue;
        }
        if span.region & BORDER_REG != 0 {
            continue;
        }
        assert!(
            span.region < chf.max_regions,
            "span {i} has region {} beyond max_regions {}",
            span.region,
            chf.max_regions
        );
    }
}

#[test]
fn pipeline_is_deterministic() {
    let build = || {
        let mut chf = grid_field(16, 16, 2, |x, z| !(6..9).contains(&x) || z < 4);
        let mut generator = NavMeshGenerator::new(config(2, 2)).unwrap();
        generator.build(&mut chf).unwrap()
    };
    let first = build();
    let second = build();
    assert_eq!(first.verts, second.verts);
    assert_eq!(first.polys, second.polys);
    assert_eq!(first.regions, second.regions);
    assert_eq!(first.areas, second.areas);

    // A reused generator produces the identical mesh as well
    let mut generator = NavMeshGenerator::new(config(2, 2)).unwrap();
    let mut third = None;
    for _ in 0..2 {
        let mut chf = grid_field(16, 16, 2, |x, z| !(6..9).contains(&x) || z < 4);
        third = Some(generator.build(&mut chf).unwrap());
    }
    let third = third.unwrap();
    assert_eq!(first.verts, third.verts);
    assert_eq!(first.polys, third.polys);
}

#[test]
fn mismatched_border_is_rejected() {
    let mut chf = grid_field(8, 8, 0, |_, _| true);
    let mut generator = NavMeshGenerator::new(config(2, 1)).unwrap();
    assert!(generator.build(&mut chf).is_err());
}
