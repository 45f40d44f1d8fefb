//! Error types for the surface core.
//!
//! Every variant that reaches a client carries the numeric code of the
//! protocol object it is posted on; `code()` returns it.

use thiserror::Error;

use crate::surface::RoleKind;

/// wl_display.error.no_memory
pub const DISPLAY_NO_MEMORY: u32 = 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("buffer scale must be positive, got {0}")]
    InvalidScale(i32),

    #[error("invalid buffer transform {0}")]
    InvalidTransform(u32),

    #[error("attach offset must be zero since version 5, use wl_surface.offset")]
    InvalidOffset,

    #[error("surface already has the {current:?} role, cannot become {requested:?}")]
    RoleConflict { current: RoleKind, requested: RoleKind },

    #[error("surface is gone")]
    Gone,

    #[error("region is gone")]
    RegionGone,
}

impl SurfaceError {
    pub fn code(&self) -> u32 {
        match self {
            SurfaceError::InvalidScale(_) => 0,
            SurfaceError::InvalidTransform(_) => 1,
            SurfaceError::InvalidOffset => 3,
            SurfaceError::RoleConflict { .. } => 4,
            SurfaceError::Gone | SurfaceError::RegionGone => 4,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubsurfaceError {
    #[error("surface cannot become a subsurface: {0}")]
    BadSurface(&'static str),

    #[error("parent would create a cycle or is gone")]
    BadParent,

    #[error("reference surface is neither the parent nor a sibling")]
    NotSibling,
}

impl SubsurfaceError {
    pub fn code(&self) -> u32 {
        match self {
            SubsurfaceError::BadSurface(_) => 0,
            SubsurfaceError::BadParent => 1,
            SubsurfaceError::NotSibling => 0,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("surface already has a syncobj attached")]
    SurfaceExists,

    #[error("timeline failed importing")]
    InvalidTimeline,

    #[error("invalid surface")]
    InvalidSurface,

    #[error("surface is gone")]
    NoSurface,

    #[error("missing buffer")]
    NoBuffer,

    #[error("missing acquire timeline")]
    NoAcquirePoint,

    #[error("missing release timeline")]
    NoReleasePoint,

    #[error("acquire and release points are on the same timeline, and acquire >= release")]
    ConflictingPoints,
}

impl SyncError {
    pub fn code(&self) -> u32 {
        match self {
            SyncError::SurfaceExists => 0,
            SyncError::InvalidTimeline => 1,
            SyncError::InvalidSurface => 1,
            SyncError::NoSurface => 1,
            SyncError::NoBuffer => 3,
            SyncError::NoAcquirePoint => 4,
            SyncError::NoReleasePoint => 5,
            SyncError::ConflictingPoints => 6,
        }
    }

    /// Errors raised by the manager object rather than the per-surface one.
    pub fn is_manager_error(&self) -> bool {
        matches!(
            self,
            SyncError::SurfaceExists | SyncError::InvalidTimeline | SyncError::InvalidSurface
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewportError {
    #[error("surface already has a viewport")]
    ViewportExists,

    #[error("{0}")]
    BadValue(&'static str),

    #[error("surface is gone")]
    NoSurface,
}

impl ViewportError {
    pub fn code(&self) -> u32 {
        match self {
            ViewportError::ViewportExists => 0,
            ViewportError::BadValue(_) => 0,
            ViewportError::NoSurface => 3,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("out of memory: {kind} limit of {limit} reached")]
    NoMemory { kind: &'static str, limit: usize },

    #[error("{0} is gone")]
    Gone(&'static str),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error(transparent)]
    Surface(#[from] SurfaceError),

    #[error(transparent)]
    Subsurface(#[from] SubsurfaceError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Viewport(#[from] ViewportError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl CoreError {
    pub fn code(&self) -> u32 {
        match self {
            CoreError::Surface(e) => e.code(),
            CoreError::Subsurface(e) => e.code(),
            CoreError::Sync(e) => e.code(),
            CoreError::Viewport(e) => e.code(),
            CoreError::Registry(_) => DISPLAY_NO_MEMORY,
        }
    }

    pub fn is_no_memory(&self) -> bool {
        matches!(self, CoreError::Registry(RegistryError::NoMemory { .. }))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_codes_match_protocol() {
        assert_eq!(SyncError::SurfaceExists.code(), 0);
        assert_eq!(SyncError::NoBuffer.code(), 3);
        assert_eq!(SyncError::ConflictingPoints.code(), 6);
        assert!(SyncError::InvalidTimeline.is_manager_error());
        assert!(!SyncError::NoReleasePoint.is_manager_error());
    }

    #[test]
    fn test_core_error_wraps() {
        let err: CoreError = RegistryError::NoMemory { kind: "surface", limit: 1 }.into();
        assert!(err.is_no_memory());
        assert_eq!(err.code(), 2);
        assert_eq!(err.to_string(), "out of memory: surface limit of 1 reached");
    }
}
