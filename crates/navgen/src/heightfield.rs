//! Compact heightfield input to the generation pipeline
//!
//! The compact heightfield is a grid of columns of walkable spans produced
//! by the upstream voxelizer. The pipeline reads everything except the
//! per-span region id, which the region builder writes.

use glam::Vec3;
use navgen_common::{Error, Result};

/// Area id of non-walkable spans
pub const NULL_AREA: u8 = 0;

/// Default area id assigned to walkable spans by the voxelizer
pub const WALKABLE_AREA: u8 = 63;

/// Value of a span connection field when no neighbour link exists
pub const NOT_CONNECTED: u32 = 0x3f;

/// High bit of a region id marking the border padding pseudo-regions
pub const BORDER_REG: u16 = 0x8000;

/// The largest neighbour layer index a connection field can encode
const MAX_LAYERS: u32 = NOT_CONNECTED - 1;

/// Grid x offset for each of the four cardinal directions
const DIR_OFFSET_X: [i32; 4] = [-1, 0, 1, 0];
/// Grid z offset for each of the four cardinal directions
const DIR_OFFSET_Z: [i32; 4] = [0, 1, 0, -1];

/// Gets the x offset for a direction (0 = -x, 1 = +z, 2 = +x, 3 = -z)
#[inline]
pub fn dir_offset_x(dir: usize) -> i32 {
    DIR_OFFSET_X[dir & 0x3]
}

/// Gets the z offset for a direction (0 = -x, 1 = +z, 2 = +x, 3 = -z)
#[inline]
pub fn dir_offset_z(dir: usize) -> i32 {
    DIR_OFFSET_Z[dir & 0x3]
}

/// A cell in the compact heightfield: the start and length of its span run
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactCell {
    /// Index of the first span in the cell
    pub index: u32,
    /// Number of spans in the cell
    pub count: u32,
}

/// One vertical walkable slab at a grid cell
#[derive(Debug, Clone, Copy)]
pub struct CompactSpan {
    /// Floor height of the span in cell-height units
    pub y: u16,
    /// Region id, written by the region builder
    pub region: u16,
    /// Packed neighbour links, one 6-bit field per direction
    con: u32,
}

impl CompactSpan {
    /// Creates a span with no neighbour links
    pub fn new(y: u16) -> Self {
        Self {
            y,
            region: 0,
            con: 0x00ff_ffff,
        }
    }

    /// Neighbour layer index in the given direction, or `NOT_CONNECTED`
    #[inline]
    pub fn con(&self, dir: usize) -> u32 {
        (self.con >> (dir * 6)) & 0x3f
    }

    /// True if the span has a neighbour link in the given direction
    #[inline]
    pub fn is_connected(&self, dir: usize) -> bool {
        self.con(dir) != NOT_CONNECTED
    }

    /// Sets the neighbour layer index for the given direction
    #[inline]
    pub fn set_con(&mut self, dir: usize, layer: u32) {
        let shift = dir * 6;
        self.con = (self.con & !(0x3f << shift)) | ((layer & 0x3f) << shift);
    }
}

/// The grid-of-columns-of-walkable-spans input to the pipeline
#[derive(Debug, Clone)]
pub struct CompactHeightfield {
    /// Width of the grid along the x-axis
    pub width: i32,
    /// Height (depth) of the grid along the z-axis
    pub height: i32,
    /// Width of the non-navigable border padding around the usable region
    pub border_size: i32,
    /// The minimum bounds of the heightfield's AABB
    pub bmin: Vec3,
    /// The maximum bounds of the heightfield's AABB
    pub bmax: Vec3,
    /// Cell size (horizontal resolution)
    pub cell_size: f32,
    /// Cell height (vertical resolution)
    pub cell_height: f32,
    /// Grid of cells, `width * height` entries in row-major order
    pub cells: Vec<CompactCell>,
    /// Spans referenced by the cells
    pub spans: Vec<CompactSpan>,
    /// Area label per span; `NULL_AREA` marks non-walkable spans
    pub areas: Vec<u8>,
    /// One past the largest region id written by the region builder
    pub max_regions: u16,
}

impl CompactHeightfield {
    /// Builds a heightfield from per-column span lists. `columns` holds
    /// `width * height` entries in row-major order; each entry lists the
    /// column's spans bottom-up as `(floor, area)` pairs.
    #[allow(clippy::too_many_arguments)]
    pub fn from_columns(
        width: i32,
        height: i32,
        border_size: i32,
        bmin: Vec3,
        bmax: Vec3,
        cell_size: f32,
        cell_height: f32,
        columns: &[Vec<(u16, u8)>],
    ) -> Result<Self> {
        if width <= 0 || height <= 0 {
            return Err(Error::MalformedHeightfield(format!(
                "invalid grid size {}x{}",
                width, height
            )));
        }
        if columns.len() != (width * height) as usize {
            return Err(Error::MalformedHeightfield(format!(
                "expected {} columns, got {}",
                width * height,
                columns.len()
            )));
        }

        let mut cells = Vec::with_capacity(columns.len());
        let mut spans = Vec::new();
        let mut areas = Vec::new();
        for column in columns {
            cells.push(CompactCell {
                index: spans.len() as u32,
                count: column.len() as u32,
            });
            for &(floor, area) in column {
                spans.push(CompactSpan::new(floor));
                areas.push(area);
            }
        }

        Ok(Self {
            width,
            height,
            border_size,
            bmin,
            bmax,
            cell_size,
            cell_height,
            cells,
            spans,
            areas,
            max_regions: 0,
        })
    }

    /// Total number of spans
    #[inline]
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// The cell at grid position (x, z)
    #[inline]
    pub fn cell(&self, x: i32, z: i32) -> &CompactCell {
        &self.cells[(x + z * self.width) as usize]
    }

    /// Span index range of the cell at grid position (x, z)
    #[inline]
    pub fn cell_spans(&self, x: i32, z: i32) -> std::ops::Range<usize> {
        let cell = self.cell(x, z);
        cell.index as usize..(cell.index + cell.count) as usize
    }

    /// Resolves the neighbour span of span `i` at grid position (x, z) in
    /// the given direction, or `None` if the spans are not linked.
    #[inline]
    pub fn con_index(&self, x: i32, z: i32, i: usize, dir: usize) -> Option<usize> {
        let layer = self.spans[i].con(dir);
        if layer == NOT_CONNECTED {
            return None;
        }
        let ax = x + dir_offset_x(dir);
        let az = z + dir_offset_z(dir);
        Some(self.cells[(ax + az * self.width) as usize].index as usize + layer as usize)
    }

    /// Establishes neighbour links between walkable spans whose floor
    /// delta is within `walkable_climb`. Normally the voxelizer does this
    /// while it builds the field; the method exists so a heightfield
    /// assembled via [`CompactHeightfield::from_columns`] is usable on its
    /// own.
    pub fn build_links(&mut self, walkable_climb: i32) {
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_spans(x, z) {
                    if self.areas[i] == NULL_AREA {
                        continue;
                    }
                    for dir in 0..4 {
                        self.spans[i].set_con(dir, NOT_CONNECTED);
                        let ax = x + dir_offset_x(dir);
                        let az = z + dir_offset_z(dir);
                        if ax < 0 || az < 0 || ax >= self.width || az >= self.height {
                            continue;
                        }
                        let ncell = *self.cell(ax, az);
                        for k in ncell.index as usize..(ncell.index + ncell.count) as usize {
                            if self.areas[k] == NULL_AREA {
                                continue;
                            }
                            let dy = self.spans[k].y as i32 - self.spans[i].y as i32;
                            if dy.abs() > walkable_climb {
                                continue;
                            }
                            let layer = k as u32 - ncell.index;
                            if layer > MAX_LAYERS {
                                break;
                            }
                            self.spans[i].set_con(dir, layer);
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_field(width: i32, height: i32) -> CompactHeightfield {
        let columns = vec![vec![(0u16, WALKABLE_AREA)]; (width * height) as usize];
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
        chf
    }

    #[test]
    fn test_span_con_packing() {
        let mut span = CompactSpan::new(7);
        for dir in 0..4 {
            assert_eq!(span.con(dir), NOT_CONNECTED);
            assert!(!span.is_connected(dir));
        }
        span.set_con(1, 3);
        span.set_con(3, 0);
        assert_eq!(span.con(0), NOT_CONNECTED);
        assert_eq!(span.con(1), 3);
        assert_eq!(span.con(2), NOT_CONNECTED);
        assert_eq!(span.con(3), 0);
        span.set_con(1, NOT_CONNECTED);
        assert!(!span.is_connected(1));
    }

    #[test]
    fn test_from_columns_validates_size() {
        let columns = vec![Vec::<(u16, u8)>::new(); 5];
        let err = CompactHeightfield::from_columns(
            3,
            3,
            0,
            Vec3::ZERO,
            Vec3::ONE,
            1.0,
            0.5,
            &columns,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_build_links_flat_grid() {
        let chf = flat_field(3, 3);
        // Center span connects in all four directions
        let center = chf.cell_spans(1, 1).start;
        for dir in 0..4 {
            assert!(chf.spans[center].is_connected(dir));
        }
        // Corner span connects only towards the interior
        let corner = chf.cell_spans(0, 0).start;
        assert!(!corner_has_link(&chf, corner, 0));
        assert!(!corner_has_link(&chf, corner, 3));
        assert!(corner_has_link(&chf, corner, 1));
        assert!(corner_has_link(&chf, corner, 2));
    }

    fn corner_has_link(chf: &CompactHeightfield, i: usize, dir: usize) -> bool {
        chf.spans[i].is_connected(dir)
    }

    #[test]
    fn test_build_links_respects_climb() {
        let mut columns = vec![vec![(0u16, WALKABLE_AREA)]; 4];
        columns[1] = vec![(10, WALKABLE_AREA)];
        let mut chf = CompactHeightfield::from_columns(
            2,
            2,
            0,
            Vec3::ZERO,
            Vec3::new(2.0, 4.0, 2.0),
            1.0,
            0.5,
            &columns,
        )
        .unwrap();
        chf.build_links(1);
        // (0,0) -> (1,0) steps up 10 units, beyond the climb limit
        let i = chf.cell_spans(0, 0).start;
        assert_eq!(chf.con_index(0, 0, i, 2), None);
        assert!(chf.con_index(0, 0, i, 1).is_some());
    }

    #[test]
    fn test_con_index_resolution() {
        let chf = flat_field(2, 1);
        let left = chf.cell_spans(0, 0).start;
        let right = chf.cell_spans(1, 0).start;
        assert_eq!(chf.con_index(0, 0, left, 2), Some(right));
        assert_eq!(chf.con_index(1, 0, right, 0), Some(left));
    }
}
