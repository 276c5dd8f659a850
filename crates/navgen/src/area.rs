//! Volume area marking
//!
//! These operations run before the pipeline and relabel walkable spans
//! that fall inside a world-space volume. Spans that are already
//! `NULL_AREA` are never promoted back to walkable.

use glam::Vec3;

use crate::heightfield::{dir_offset_x, dir_offset_z, CompactHeightfield, NULL_AREA};

/// Erodes the walkable area by `radius` cells. Spans closer than the
/// radius to a non-walkable boundary (in chamfer distance, 2 per step and
/// 3 per diagonal) become `NULL_AREA`, so the region builder never emits
/// surface the agent's body would clip into.
pub fn erode_walkable_area(chf: &mut CompactHeightfield, radius: i32) {
    let w = chf.width;
    let h = chf.height;

    let mut dist = vec![0xffu8; chf.span_count()];

    // Seed: non-walkable spans and spans missing a 4-neighbour are the
    // boundary.
    for z in 0..h {
        for x in 0..w {
            for i in chf.cell_spans(x, z) {
                if chf.areas[i] == NULL_AREA {
                    dist[i] = 0;
                    continue;
                }
                let mut connected = 0;
                for dir in 0..4 {
                    if let Some(ai) = chf.con_index(x, z, i, dir) {
                        if chf.areas[ai] != NULL_AREA {
                            connected += 1;
                        }
                    }
                }
                if connected != 4 {
                    dist[i] = 0;
                }
            }
        }
    }

    // Pass 1: top-left to bottom-right
    for z in 0..h {
        for x in 0..w {
            for i in chf.cell_spans(x, z) {
                if let Some(ai) = chf.con_index(x, z, i, 0) {
                    // (-1, 0)
                    dist[i] = dist[i].min(dist[ai].saturating_add(2));
                    // (-1, -1)
                    if let Some(ai2) = chf.con_index(x + dir_offset_x(0), z, ai, 3) {
                        dist[i] = dist[i].min(dist[ai2].saturating_add(3));
                    }
                }
                if let Some(ai) = chf.con_index(x, z, i, 3) {
                    // (0, -1)
                    dist[i] = dist[i].min(dist[ai].saturating_add(2));
                    // (1, -1)
                    if let Some(ai2) = chf.con_index(x, z + dir_offset_z(3), ai, 2) {
                        dist[i] = dist[i].min(dist[ai2].saturating_add(3));
                    }
                }
            }
        }
    }

    // Pass 2: bottom-right to top-left
    for z in (0..h).rev() {
        for x in (0..w).rev() {
            for i in chf.cell_spans(x, z) {
                if let Some(ai) = chf.con_index(x, z, i, 2) {
                    // (1, 0)
                    dist[i] = dist[i].min(dist[ai].saturating_add(2));
                    // (1, 1)
                    if let Some(ai2) = chf.con_index(x + dir_offset_x(2), z, ai, 1) {
                        dist[i] = dist[i].min(dist[ai2].saturating_add(3));
                    }
                }
                if let Some(ai) = chf.con_index(x, z, i, 1) {
                    // (0, 1)
                    dist[i] = dist[i].min(dist[ai].saturating_add(2));
                    // (-1, 1)
                    if let Some(ai2) = chf.con_index(x, z + dir_offset_z(1), ai, 0) {
                        dist[i] = dist[i].min(dist[ai2].saturating_add(3));
                    }
                }
            }
        }
    }

    let min_boundary_dist = (radius * 2) as u8;
    for (i, &d) in dist.iter().enumerate() {
        if d < min_boundary_dist {
            chf.areas[i] = NULL_AREA;
        }
    }
}

fn insert_sort(data: &mut [u8]) {
    for i in 1..data.len() {
        let value = data[i];
        let mut j = i;
        while j > 0 && data[j - 1] > value {
            data[j] = data[j - 1];
            j -= 1;
        }
        data[j] = value;
    }
}

/// Replaces every walkable span's area label with the median of its
/// 8-neighbourhood, smoothing out single-cell speckles left by area
/// marking. Non-walkable spans are never resurrected.
pub fn median_filter_walkable_area(chf: &mut CompactHeightfield) {
    let w = chf.width;
    let h = chf.height;

    let mut areas = vec![0u8; chf.span_count()];

    for z in 0..h {
        for x in 0..w {
            for i in chf.cell_spans(x, z) {
                if chf.areas[i] == NULL_AREA {
                    areas[i] = chf.areas[i];
                    continue;
                }

                let mut nei = [chf.areas[i]; 9];
                for dir in 0..4 {
                    let Some(ai) = chf.con_index(x, z, i, dir) else {
                        continue;
                    };
                    if chf.areas[ai] != NULL_AREA {
                        nei[dir * 2] = chf.areas[ai];
                    }
                    // The diagonal between dir and the next direction
                    let dir2 = (dir + 1) & 0x3;
                    let ax = x + dir_offset_x(dir);
                    let az = z + dir_offset_z(dir);
                    if let Some(ai2) = chf.con_index(ax, az, ai, dir2) {
                        if chf.areas[ai2] != NULL_AREA {
                            nei[dir * 2 + 1] = chf.areas[ai2];
                        }
                    }
                }
                insert_sort(&mut nei);
                areas[i] = nei[4];
            }
        }
    }

    chf.areas.copy_from_slice(&areas);
}

/// Grid-space footprint of a world-space AABB, clamped to the field.
/// Returns `None` if the volume lies entirely outside the grid.
fn grid_footprint(
    chf: &CompactHeightfield,
    bmin: Vec3,
    bmax: Vec3,
) -> Option<(i32, i32, i32, i32, i32, i32)> {
    let min_x = ((bmin.x - chf.bmin.x) / chf.cell_size) as i32;
    let min_y = ((bmin.y - chf.bmin.y) / chf.cell_height) as i32;
    let min_z = ((bmin.z - chf.bmin.z) / chf.cell_size) as i32;
    let max_x = ((bmax.x - chf.bmin.x) / chf.cell_size) as i32;
    let max_y = ((bmax.y - chf.bmin.y) / chf.cell_height) as i32;
    let max_z = ((bmax.z - chf.bmin.z) / chf.cell_size) as i32;

    if max_x < 0 || min_x >= chf.width || max_z < 0 || min_z >= chf.height {
        return None;
    }

    Some((
        min_x.max(0),
        max_x.min(chf.width - 1),
        min_y,
        max_y,
        min_z.max(0),
        max_z.min(chf.height - 1),
    ))
}

/// Marks all walkable spans inside the world-space box with `area_id`
pub fn mark_box_area(chf: &mut CompactHeightfield, bmin: Vec3, bmax: Vec3, area_id: u8) {
    let Some((min_x, max_x, min_y, max_y, min_z, max_z)) = grid_footprint(chf, bmin, bmax) else {
        return;
    };

    for z in min_z..=max_z {
        for x in min_x..=max_x {
            for i in chf.cell_spans(x, z) {
                if chf.areas[i] == NULL_AREA {
                    continue;
                }
                let y = chf.spans[i].y as i32;
                if y >= min_y && y <= max_y {
                    chf.areas[i] = area_id;
                }
            }
        }
    }
}

/// Marks all walkable spans inside the vertical cylinder with `area_id`.
/// `position` is the center of the cylinder's base.
pub fn mark_cylinder_area(
    chf: &mut CompactHeightfield,
    position: Vec3,
    radius: f32,
    height: f32,
    area_id: u8,
) {
    let bmin = Vec3::new(position.x - radius, position.y, position.z - radius);
    let bmax = Vec3::new(position.x + radius, position.y + height, position.z + radius);
    let Some((min_x, max_x, min_y, max_y, min_z, max_z)) = grid_footprint(chf, bmin, bmax) else {
        return;
    };

    let radius_sq = radius * radius;
    for z in min_z..=max_z {
        for x in min_x..=max_x {
            let cell_x = chf.bmin.x + (x as f32 + 0.5) * chf.cell_size;
            let cell_z = chf.bmin.z + (z as f32 + 0.5) * chf.cell_size;
            let dx = cell_x - position.x;
            let dz = cell_z - position.z;
            if dx * dx + dz * dz >= radius_sq {
                continue;
            }
            for i in chf.cell_spans(x, z) {
                if chf.areas[i] == NULL_AREA {
                    continue;
                }
                let y = chf.spans[i].y as i32;
                if y >= min_y && y <= max_y {
                    chf.areas[i] = area_id;
                }
            }
        }
    }
}

/// Marks all walkable spans whose floor point lies inside the sphere
pub fn mark_sphere_area(chf: &mut CompactHeightfield, center: Vec3, radius: f32, area_id: u8) {
    let extent = Vec3::splat(radius);
    let Some((min_x, max_x, _min_y, _max_y, min_z, max_z)) =
        grid_footprint(chf, center - extent, center + extent)
    else {
        return;
    };

    let radius_sq = radius * radius;
    for z in min_z..=max_z {
        for x in min_x..=max_x {
            let cell_x = chf.bmin.x + (x as f32 + 0.5) * chf.cell_size;
            let cell_z = chf.bmin.z + (z as f32 + 0.5) * chf.cell_size;
            for i in chf.cell_spans(x, z) {
                if chf.areas[i] == NULL_AREA {
                    continue;
                }
                let span_y = chf.bmin.y + chf.spans[i].y as f32 * chf.cell_height;
                let dx = cell_x - center.x;
                let dy = span_y - center.y;
                let dz = cell_z - center.z;
                if dx * dx + dy * dy + dz * dz <= radius_sq {
                    chf.areas[i] = area_id;
                }
            }
        }
    }
}
