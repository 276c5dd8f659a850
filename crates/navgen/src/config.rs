//! Configuration for the navigation mesh generation pipeline

use navgen_common::{Error, Result};

/// Controls which contour edges are tessellated to `max_edge_len`
#[derive(Debug, Clone, Copy)]
pub struct ContourBuildFlags {
    /// Tessellate solid (wall) edges during contour simplification
    pub tess_wall_edges: bool,
    /// Tessellate edges between different areas during contour simplification
    pub tess_area_edges: bool,
}

impl Default for ContourBuildFlags {
    fn default() -> Self {
        Self {
            tess_wall_edges: true,
            tess_area_edges: false,
        }
    }
}

/// Configuration parameters for one generator instance
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Width of the non-navigable border padding around the heightfield
    pub border_size: i32,
    /// Minimum number of spans allowed to form an isolated region
    pub min_region_area: i32,
    /// Maximum distance a simplified contour may deviate from the raw contour
    pub max_simplification_error: f32,
    /// Maximum length for contour edges along the mesh border; 0 disables tessellation
    pub max_edge_len: i32,
    /// Maximum number of vertices per polygon produced by the mesh builder
    pub max_verts_per_poly: usize,
    /// Contour edge tessellation flags
    pub contour_flags: ContourBuildFlags,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            border_size: 0,
            min_region_area: 8,
            max_simplification_error: 1.3,
            max_edge_len: 12,
            max_verts_per_poly: 6,
            contour_flags: ContourBuildFlags::default(),
        }
    }
}

impl GeneratorConfig {
    /// Validates the configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.border_size < 0 {
            return Err(Error::InvalidConfig(format!(
                "border_size must be non-negative, got {}",
                self.border_size
            )));
        }
        if self.min_region_area < 0 {
            return Err(Error::InvalidConfig(format!(
                "min_region_area must be non-negative, got {}",
                self.min_region_area
            )));
        }
        if self.max_simplification_error < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "max_simplification_error must be non-negative, got {}",
                self.max_simplification_error
            )));
        }
        if self.max_edge_len < 0 {
            return Err(Error::InvalidConfig(format!(
                "max_edge_len must be non-negative, got {}",
                self.max_edge_len
            )));
        }
        if !(3..=12).contains(&self.max_verts_per_poly) {
            return Err(Error::InvalidConfig(format!(
                "max_verts_per_poly must be in 3..=12, got {}",
                self.max_verts_per_poly
            )));
        }
        Ok(())
    }
}
