//! Common utilities and data structures shared across the navgen crates

pub mod geometry;

/// Represents a 3D position in world space
pub type Vec3 = glam::Vec3;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid build configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed heightfield: {0}")]
    MalformedHeightfield(String),

    #[error("too many vertices: {0} (limit 0xfffe)")]
    TooManyVertices(usize),

    #[error("too many polygons: {0} (max {1})")]
    TooManyPolygons(usize, usize),

    #[error("region {0} has holes but no outline")]
    MissingOutline(u16),

    #[error("region {0} has multiple outlines")]
    MultipleOutlines(u16),
}

/// Result type for navgen operations
pub type Result<T> = std::result::Result<T, Error>;
