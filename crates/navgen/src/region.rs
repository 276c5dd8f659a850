//! Region building: monotone sweep labeling plus layer merging
//!
//! Every walkable span is assigned a region id. Rows are swept one at a
//! time, assigning tentative per-row ids and merging them with the previous
//! row where the connection is unambiguous. The resulting monotone strips
//! are then merged into layers: strips that connect, share an area label
//! and do not overlap in any column collapse into one region. Small
//! isolated layers are dropped unless they touch the border padding.

use navgen_common::{Error, Result};

use crate::heightfield::{CompactHeightfield, BORDER_REG, NULL_AREA};

/// Sweep id marking an ambiguous upstream connection
const NULL_NEI: u16 = 0xffff;

/// Per-row sweep strip
#[derive(Debug, Clone, Copy, Default)]
struct SweepSpan {
    /// Final region id assigned after the row completes
    id: u16,
    /// Number of samples connected to the previous row
    ns: u16,
    /// Region id of the previous row's strip, or 0 / `NULL_NEI`
    nei: u16,
}

/// Per-region accumulator used by the layer merge
#[derive(Debug, Clone, Default)]
struct LayerRegion {
    layer_id: u16,
    span_count: i32,
    area: u8,
    ymin: u16,
    ymax: u16,
    remap: bool,
    connects_to_border: bool,
    /// Regions reachable through a 4-neighbour edge
    neighbours: Vec<u16>,
    /// Regions seen in the same column at a different layer
    floors: Vec<u16>,
}

fn add_unique(list: &mut Vec<u16>, value: u16) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// Region builder context. Scratch buffers are retained between
/// invocations and grown monotonically.
#[derive(Debug, Default)]
pub struct RegionBuilder {
    src_reg: Vec<u16>,
    sweeps: Vec<SweepSpan>,
    prev_counts: Vec<i32>,
    regions: Vec<LayerRegion>,
    stack: Vec<usize>,
    column_regs: Vec<u16>,
}

impl RegionBuilder {
    /// Creates a region builder with empty scratch buffers
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns a region id to every walkable span and updates
    /// `chf.max_regions`. Fails only if the heightfield is malformed;
    /// inputs that yield zero surviving regions are not an error.
    pub fn build_layer_regions(
        &mut self,
        chf: &mut CompactHeightfield,
        border_size: i32,
        min_region_area: i32,
    ) -> Result<()> {
        let w = chf.width;
        let h = chf.height;
        if chf.cells.len() != (w * h) as usize {
            return Err(Error::MalformedHeightfield(format!(
                "cell count {} does not match grid {}x{}",
                chf.cells.len(),
                w,
                h
            )));
        }
        if chf.areas.len() != chf.spans.len() {
            return Err(Error::MalformedHeightfield(format!(
                "area count {} does not match span count {}",
                chf.areas.len(),
                chf.spans.len()
            )));
        }

        self.src_reg.clear();
        self.src_reg.resize(chf.span_count(), 0);

        let mut id: u16 = 1;

        if border_size > 0 {
            // Make sure the border does not overflow the grid
            let bw = w.min(border_size);
            let bh = h.min(border_size);

            self.paint_rect_region(chf, 0, bw, 0, h, id | BORDER_REG);
            id += 1;
            self.paint_rect_region(chf, w - bw, w, 0, h, id | BORDER_REG);
            id += 1;
            self.paint_rect_region(chf, 0, w, 0, bh, id | BORDER_REG);
            id += 1;
            self.paint_rect_region(chf, 0, w, h - bh, h, id | BORDER_REG);
            id += 1;
        }

        let nsweeps = w.max(h) as usize;
        if self.sweeps.len() < nsweeps {
            self.sweeps.resize(nsweeps, SweepSpan::default());
        }

        // Sweep one row at a time
        for z in border_size..h - border_size {
            self.prev_counts.clear();
            self.prev_counts.resize(id as usize + 1, 0);
            let mut rid: u16 = 1;

            for x in border_size..w - border_size {
                for i in chf.cell_spans(x, z) {
                    if chf.areas[i] == NULL_AREA {
                        continue;
                    }

                    // -x neighbour: inherit its row id when the area matches
                    let mut previd: u16 = 0;
                    if let Some(ai) = chf.con_index(x, z, i, 0) {
                        if (self.src_reg[ai] & BORDER_REG) == 0 && chf.areas[ai] == chf.areas[i] {
                            previd = self.src_reg[ai];
                        }
                    }

                    if previd == 0 {
                        previd = rid;
                        rid += 1;
                        if self.sweeps.len() < rid as usize {
                            self.sweeps.push(SweepSpan::default());
                        }
                        let sweep = &mut self.sweeps[previd as usize];
                        sweep.ns = 0;
                        sweep.nei = 0;
                    }

                    // -z neighbour: record the upstream region candidate
                    if let Some(ai) = chf.con_index(x, z, i, 3) {
                        let nr = self.src_reg[ai];
                        if nr != 0 && (nr & BORDER_REG) == 0 && chf.areas[ai] == chf.areas[i] {
                            let sweep = &mut self.sweeps[previd as usize];
                            if sweep.nei == 0 || sweep.nei == nr {
                                sweep.nei = nr;
                                sweep.ns += 1;
                                self.prev_counts[nr as usize] += 1;
                            } else {
                                sweep.nei = NULL_NEI;
                            }
                        }
                    }

                    self.src_reg[i] = previd;
                }
            }

            // Create unique ids for the row
            for s in 1..rid as usize {
                let sweep = self.sweeps[s];
                if sweep.nei != NULL_NEI
                    && sweep.nei != 0
                    && self.prev_counts[sweep.nei as usize] == sweep.ns as i32
                {
                    self.sweeps[s].id = sweep.nei;
                } else {
                    self.sweeps[s].id = id;
                    id += 1;
                }
            }

            // Remap row-local ids to final ids
            for x in border_size..w - border_size {
                for i in chf.cell_spans(x, z) {
                    if self.src_reg[i] > 0 && self.src_reg[i] < rid {
                        self.src_reg[i] = self.sweeps[self.src_reg[i] as usize].id;
                    }
                }
            }
        }

        self.merge_and_filter_layer_regions(chf, min_region_area, id);

        // Write the result back to the spans
        for (i, span) in chf.spans.iter_mut().enumerate() {
            span.region = self.src_reg[i];
        }

        Ok(())
    }

    /// Paints every walkable span inside the grid rectangle with the id
    fn paint_rect_region(
        &mut self,
        chf: &CompactHeightfield,
        min_x: i32,
        max_x: i32,
        min_z: i32,
        max_z: i32,
        region_id: u16,
    ) {
        for z in min_z..max_z {
            for x in min_x..max_x {
                for i in chf.cell_spans(x, z) {
                    if chf.areas[i] != NULL_AREA {
                        self.src_reg[i] = region_id;
                    }
                }
            }
        }
    }

    /// Merges monotone strips into layers, drops small isolated layers and
    /// remaps the survivors to a dense 1..N id space.
    fn merge_and_filter_layer_regions(
        &mut self,
        chf: &mut CompactHeightfield,
        min_region_area: i32,
        nregs: u16,
    ) {
        let w = chf.width;
        let h = chf.height;
        let nregs = nregs as usize;

        self.regions.clear();
        self.regions.resize(
            nregs,
            LayerRegion {
                ymin: u16::MAX,
                ..Default::default()
            },
        );

        // Accumulate per-region data: span counts, bounds, neighbour sets
        // and floor sets (other regions sharing a column).
        for z in 0..h {
            for x in 0..w {
                self.column_regs.clear();
                for i in chf.cell_spans(x, z) {
                    let ri = self.src_reg[i];
                    if ri == 0 || ri as usize >= nregs {
                        continue;
                    }

                    let reg = &mut self.regions[ri as usize];
                    reg.span_count += 1;
                    reg.area = chf.areas[i];
                    reg.ymin = reg.ymin.min(chf.spans[i].y);
                    reg.ymax = reg.ymax.max(chf.spans[i].y);
                    self.column_regs.push(ri);

                    for dir in 0..4 {
                        if let Some(ai) = chf.con_index(x, z, i, dir) {
                            let rai = self.src_reg[ai];
                            if rai > 0 && (rai as usize) < nregs && rai != ri {
                                add_unique(&mut self.regions[ri as usize].neighbours, rai);
                            }
                            if (rai & BORDER_REG) != 0 {
                                self.regions[ri as usize].connects_to_border = true;
                            }
                        }
                    }
                }

                // Regions stacked in the same column overlap
                for a in 0..self.column_regs.len() {
                    for b in a + 1..self.column_regs.len() {
                        let (ra, rb) = (self.column_regs[a], self.column_regs[b]);
                        if ra != rb {
                            add_unique(&mut self.regions[ra as usize].floors, rb);
                            add_unique(&mut self.regions[rb as usize].floors, ra);
                        }
                    }
                }
            }
        }

        // Flood-merge connected, non-overlapping strips of the same area
        // into layers. The root accumulates the floor set so later merges
        // see every column the layer already occupies.
        let mut layer_id: u16 = 1;
        for root in 1..nregs {
            if self.regions[root].layer_id != 0 {
                continue;
            }
            self.regions[root].layer_id = layer_id;

            self.stack.clear();
            self.stack.push(root);
            let mut head = 0;
            while head < self.stack.len() {
                let cur = self.stack[head];
                head += 1;

                for j in 0..self.regions[cur].neighbours.len() {
                    let nei = self.regions[cur].neighbours[j] as usize;
                    if self.regions[nei].layer_id != 0 {
                        continue;
                    }
                    if self.regions[nei].area != self.regions[root].area {
                        continue;
                    }
                    if self.regions[root].floors.contains(&(nei as u16)) {
                        continue;
                    }

                    self.stack.push(nei);
                    self.regions[nei].layer_id = layer_id;

                    let floors = std::mem::take(&mut self.regions[nei].floors);
                    for &f in &floors {
                        add_unique(&mut self.regions[root].floors, f);
                    }
                    self.regions[nei].floors = floors;

                    self.regions[root].ymin = self.regions[root].ymin.min(self.regions[nei].ymin);
                    self.regions[root].ymax = self.regions[root].ymax.max(self.regions[nei].ymax);
                    self.regions[root].span_count += self.regions[nei].span_count;
                    self.regions[nei].span_count = 0;
                    self.regions[root].connects_to_border |= self.regions[nei].connects_to_border;
                }
            }
            layer_id += 1;
        }

        // Drop small layers, unless the layer touches the border padding
        for i in 1..nregs {
            if self.regions[i].span_count > 0
                && self.regions[i].span_count < min_region_area
                && !self.regions[i].connects_to_border
            {
                let dropped = self.regions[i].layer_id;
                for region in &mut self.regions[1..] {
                    if region.layer_id == dropped {
                        region.span_count = 0;
                        region.layer_id = 0;
                    }
                }
            }
        }

        // Remap surviving layers to a dense 1..N id space
        for region in &mut self.regions {
            region.remap = region.layer_id != 0 && (region.layer_id & BORDER_REG) == 0;
        }
        let mut reg_id_gen: u16 = 0;
        for i in 0..nregs {
            if !self.regions[i].remap {
                continue;
            }
            let old_id = self.regions[i].layer_id;
            reg_id_gen += 1;
            for region in &mut self.regions[i..] {
                if region.layer_id == old_id {
                    region.remap = false;
                    region.layer_id = reg_id_gen;
                }
            }
        }
        chf.max_regions = reg_id_gen + 1;

        for r in self.src_reg.iter_mut() {
            if (*r & BORDER_REG) == 0 {
                *r = self.regions[*r as usize].layer_id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::WALKABLE_AREA;
    use glam::Vec3;

    fn field_from_columns(
        width: i32,
        height: i32,
        border_size: i32,
        columns: &[Vec<(u16, u8)>],
        climb: i32,
    ) -> CompactHeightfield {
        let mut chf = CompactHeightfield::from_columns(
            width,
            height,
            border_size,
            Vec3::ZERO,
            Vec3::new(width as f32, 8.0, height as f32),
            1.0,
            0.5,
            columns,
        )
        .unwrap();
        chf.build_links(climb);
        chf
    }

    fn flat_field(width: i32, height: i32, border_size: i32) -> CompactHeightfield {
        let columns = vec![vec![(0u16, WALKABLE_AREA)]; (width * height) as usize];
        field_from_columns(width, height, border_size, &columns, 1)
    }

    #[test]
    fn test_single_region_covers_grid() {
        let mut chf = flat_field(4, 4, 0);
        let mut builder = RegionBuilder::new();
        builder.build_layer_regions(&mut chf, 0, 1).unwrap();

        assert_eq!(chf.max_regions, 2);
        for span in &chf.spans {
            assert_eq!(span.region, 1);
        }
    }

    #[test]
    fn test_disjoint_areas_get_distinct_regions() {
        // Two 2-wide strips separated by an unwalkable column
        let mut columns = Vec::new();
        for _z in 0..4 {
            for x in 0..5 {
                if x == 2 {
                    columns.push(vec![(0u16, NULL_AREA)]);
                } else {
                    columns.push(vec![(0u16, WALKABLE_AREA)]);
                }
            }
        }
        let mut chf = field_from_columns(5, 4, 0, &columns, 1);
        let mut builder = RegionBuilder::new();
        builder.build_layer_regions(&mut chf, 0, 1).unwrap();

        assert_eq!(chf.max_regions, 3);
        let left = chf.spans[chf.cell_spans(0, 0).start].region;
        let right = chf.spans[chf.cell_spans(4, 0).start].region;
        assert_ne!(left, 0);
        assert_ne!(right, 0);
        assert_ne!(left, right);
        for z in 0..4 {
            let i = chf.cell_spans(2, z).start;
            assert_eq!(chf.spans[i].region, 0);
        }
    }

    #[test]
    fn test_small_region_filtered() {
        // 3 walkable spans in a corner of an otherwise empty grid
        let mut columns = vec![vec![(0u16, NULL_AREA)]; 16];
        for i in [0usize, 1, 4] {
            columns[i] = vec![(0, WALKABLE_AREA)];
        }
        let mut chf = field_from_columns(4, 4, 0, &columns, 1);
        let mut builder = RegionBuilder::new();
        builder.build_layer_regions(&mut chf, 0, 5).unwrap();

        assert_eq!(chf.max_regions, 1);
        for span in &chf.spans {
            assert_eq!(span.region, 0);
        }
    }

    #[test]
    fn test_border_touch_exempts_small_region() {
        // The whole 6x6 grid is walkable; with a 1-cell border the
        // interior 4x4 region is well below the area threshold but
        // connects to the border pseudo-regions.
        let mut chf = flat_field(6, 6, 1);
        let mut builder = RegionBuilder::new();
        builder.build_layer_regions(&mut chf, 1, 1000).unwrap();

        let interior = chf.spans[chf.cell_spans(2, 2).start].region;
        assert_ne!(interior, 0);
        assert_eq!(interior & BORDER_REG, 0);
        // Padding spans carry the border flag
        let padding = chf.spans[chf.cell_spans(0, 0).start].region;
        assert_ne!(padding & BORDER_REG, 0);
    }

    #[test]
    fn test_overlapping_layers_stay_separate() {
        // A ramp that climbs along row 0 and returns along row 1, ending
        // in a second span above the start column. The two ends are
        // connected through the ramp but overlap in column (0,0), so the
        // layer merge must keep them apart.
        let columns = vec![
            vec![(0u16, WALKABLE_AREA), (12, WALKABLE_AREA)], // (0,0)
            vec![(2, WALKABLE_AREA)],                         // (1,0)
            vec![(4, WALKABLE_AREA)],                         // (2,0)
            vec![(10, WALKABLE_AREA)],                        // (0,1)
            vec![(8, WALKABLE_AREA)],                         // (1,1)
            vec![(6, WALKABLE_AREA)],                         // (2,1)
        ];
        let mut chf = field_from_columns(3, 2, 0, &columns, 2);
        let mut builder = RegionBuilder::new();
        builder.build_layer_regions(&mut chf, 0, 1).unwrap();

        let base = chf.cell_spans(0, 0).start;
        let lower = chf.spans[base].region;
        let upper = chf.spans[base + 1].region;
        assert_ne!(lower, 0);
        assert_ne!(upper, 0);
        assert_ne!(lower, upper);

        // The ramp interior merged with the lower end
        let ramp = chf.spans[chf.cell_spans(2, 0).start].region;
        assert_eq!(ramp, lower);
    }

    #[test]
    fn test_scratch_reuse_is_stable() {
        let mut builder = RegionBuilder::new();
        let mut first = Vec::new();
        for pass in 0..2 {
            let mut chf = flat_field(5, 5, 0);
            builder.build_layer_regions(&mut chf, 0, 1).unwrap();
            let regions: Vec<u16> = chf.spans.iter().map(|s| s.region).collect();
            if pass == 0 {
                first = regions;
            } else {
                assert_eq!(first, regions);
            }
        }
    }

    #[test]
    fn test_malformed_input_rejected() {
        let mut chf = flat_field(3, 3, 0);
        chf.areas.pop();
        let mut builder = RegionBuilder::new();
        assert!(builder.build_layer_regions(&mut chf, 0, 1).is_err());
    }
}
