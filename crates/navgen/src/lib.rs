//! Navigation mesh generation pipeline
//!
//! Converts a compact heightfield of walkable spans into a polygon mesh
//! suitable for pathfinding. The pipeline runs three sequential stages:
//! region labeling (monotone sweep plus layer merging), contour building
//! (boundary tracing, simplification and hole merging) and polygon mesh
//! building (triangulation, convex merging, adjacency and portal edges).
//!
//! Each stage owns scratch buffers that are reused across invocations;
//! one [`NavMeshGenerator`] instance drives one build at a time.

pub mod area;
pub mod config;
pub mod context;
pub mod contour;
pub mod heightfield;
pub mod mesh;
pub mod region;

pub use area::{
    erode_walkable_area, mark_box_area, mark_cylinder_area, mark_sphere_area,
    median_filter_walkable_area,
};
pub use config::{ContourBuildFlags, GeneratorConfig};
pub use context::{BuildContext, TimerCategory};
pub use contour::{
    Contour, ContourBuilder, ContourSet, AREA_BORDER, BORDER_VERTEX, CONTOUR_REG_MASK,
};
pub use heightfield::{
    CompactCell, CompactHeightfield, CompactSpan, BORDER_REG, NOT_CONNECTED, NULL_AREA,
    WALKABLE_AREA,
};
pub use mesh::{PolyMesh, PolyMeshBuilder, MESH_NULL_IDX, MULTIPLE_REGIONS};
pub use region::RegionBuilder;

pub use navgen_common::{Error, Result};

/// Drives the three pipeline stages over one heightfield at a time.
///
/// The generator owns the per-stage builder contexts, so repeated builds
/// reuse their scratch allocations. Instances are independent; callers
/// building multiple tiles in parallel run one generator per thread.
#[derive(Debug, Default)]
pub struct NavMeshGenerator {
    config: GeneratorConfig,
    context: BuildContext,
    regions: RegionBuilder,
    contours: ContourBuilder,
    meshes: PolyMeshBuilder,
}

impl NavMeshGenerator {
    /// Creates a generator with a validated configuration
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Default::default()
        })
    }

    /// The generator's configuration
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Stage timings accumulated over all builds of this generator
    pub fn context(&self) -> &BuildContext {
        &self.context
    }

    /// Runs the full pipeline: regions, contours, polygon mesh. Writes
    /// region ids into `chf` and returns the mesh.
    pub fn build(&mut self, chf: &mut CompactHeightfield) -> Result<PolyMesh> {
        if chf.border_size != self.config.border_size {
            return Err(Error::MalformedHeightfield(format!(
                "heightfield border {} does not match configured border {}",
                chf.border_size, self.config.border_size
            )));
        }

        self.context.start_timer(TimerCategory::Total);

        self.context.start_timer(TimerCategory::Regions);
        self.regions.build_layer_regions(
            chf,
            self.config.border_size,
            self.config.min_region_area,
        )?;
        self.context.stop_timer(TimerCategory::Regions);

        self.context.start_timer(TimerCategory::Contours);
        self.contours.build_contours(
            chf,
            self.config.max_simplification_error,
            self.config.max_edge_len,
            self.config.contour_flags,
        )?;
        self.context.stop_timer(TimerCategory::Contours);

        self.context.start_timer(TimerCategory::PolyMesh);
        let mesh = self
            .meshes
            .build(self.contours.contour_set(), self.config.max_verts_per_poly);
        self.context.stop_timer(TimerCategory::PolyMesh);

        self.context.stop_timer(TimerCategory::Total);
        mesh
    }
}
