//! Per-surface explicit synchronization: the acquire/release points a client
//! sets for its next commit, and their validation at commit time.

use crate::error::SyncError;
use crate::surface::{SurfaceId, SurfaceState, Updated};

use super::point::{PointRole, SyncPoint};

pub struct BufferSync {
    surface: SurfaceId,
    pending_acquire: Option<SyncPoint>,
    pending_release: Option<SyncPoint>,
}

impl BufferSync {
    pub fn new(surface: SurfaceId) -> Self {
        Self {
            surface,
            pending_acquire: None,
            pending_release: None,
        }
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn set_acquire_point(&mut self, point: SyncPoint) {
        debug_assert_eq!(point.role(), PointRole::Acquire);
        self.pending_acquire = Some(point);
    }

    pub fn set_release_point(&mut self, point: SyncPoint) {
        debug_assert_eq!(point.role(), PointRole::Release);
        self.pending_release = Some(point);
    }

    /// Moves the points onto the pending state and checks them. On failure
    /// the pending state is marked rejected.
    pub fn pre_commit(&mut self, pending: &mut SurfaceState) -> Result<(), SyncError> {
        if let Some(acquire) = self.pending_acquire.take() {
            pending.acquire = Some(acquire);
            pending.updated |= Updated::ACQUIRE;
        }
        if let Some(release) = self.pending_release.take() {
            pending.release = Some(release);
        }

        let result = validate(pending);
        if let Err(e) = &result {
            log::warn!("[sync] Rejecting commit on {:?}: {}", self.surface, e);
            pending.rejected = true;
        }
        result
    }
}

/// A commit that carries any point must attach a buffer, and carry both a
/// live acquire and a live release point. On a shared timeline the acquire
/// point has to come strictly before the release point.
pub fn validate(pending: &SurfaceState) -> Result<(), SyncError> {
    let has_points = pending.acquire.is_some() || pending.release.is_some();
    let has_buffer = pending.updated.contains(Updated::BUFFER) && pending.buffer.is_some();

    if !has_buffer {
        return if has_points { Err(SyncError::NoBuffer) } else { Ok(()) };
    }

    let acquire = match &pending.acquire {
        Some(point) if !point.expired() => point,
        _ => return Err(SyncError::NoAcquirePoint),
    };
    let release = match &pending.release {
        Some(point) if !point.expired() => point,
        _ => return Err(SyncError::NoReleasePoint),
    };

    if acquire.same_timeline(release) && acquire.point() >= release.point() {
        return Err(SyncError::ConflictingPoints);
    }
    Ok(())
}
