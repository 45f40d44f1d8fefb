pub mod commit;
pub mod queue;
pub mod state;
pub mod tree;

use crate::registry::Id;
use crate::sync::explicit::BufferSync;

pub use queue::{CommitQueue, ReadyToken};
pub use state::{SourceRect, SurfaceState, Transform, Updated, Viewport};

pub type SurfaceId = Id<Surface>;
pub type BufferSyncId = Id<BufferSync>;

/// A `wl_callback` from `wl_surface.frame`.
pub trait FrameCallback {
    fn done(self: Box<Self>, time_ms: u32);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleKind {
    Unassigned,
    Subsurface,
    Cursor,
    Other(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubsurfaceRole {
    pub parent: SurfaceId,
    pub position: (i32, i32),
    /// Set by `set_position`, applied when the parent promotes.
    pub pending_position: Option<(i32, i32)>,
    pub sync: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SurfaceRole {
    #[default]
    Unassigned,
    Subsurface(SubsurfaceRole),
    Cursor,
    Other(&'static str),
}

impl SurfaceRole {
    pub fn kind(&self) -> RoleKind {
        match self {
            SurfaceRole::Unassigned => RoleKind::Unassigned,
            SurfaceRole::Subsurface(_) => RoleKind::Subsurface,
            SurfaceRole::Cursor => RoleKind::Cursor,
            SurfaceRole::Other(name) => RoleKind::Other(*name),
        }
    }

    pub fn subsurface(&self) -> Option<&SubsurfaceRole> {
        match self {
            SurfaceRole::Subsurface(sub) => Some(sub),
            _ => None,
        }
    }

    pub fn subsurface_mut(&mut self) -> Option<&mut SubsurfaceRole> {
        match self {
            SurfaceRole::Subsurface(sub) => Some(sub),
            _ => None,
        }
    }
}

/// Subsurface links owned by a parent, in paint order within each side.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Children {
    pub below: Vec<SurfaceId>,
    pub above: Vec<SurfaceId>,
}

impl Children {
    pub fn is_empty(&self) -> bool {
        self.below.is_empty() && self.above.is_empty()
    }

    pub fn remove(&mut self, child: SurfaceId) {
        self.below.retain(|c| *c != child);
        self.above.retain(|c| *c != child);
    }

    pub fn contains(&self, child: SurfaceId) -> bool {
        self.below.contains(&child) || self.above.contains(&child)
    }

    /// Negative below the parent, counting down from -1 for the one nearest
    /// to it; zero and up above it.
    pub fn z_index(&self, child: SurfaceId) -> Option<i32> {
        if let Some(pos) = self.below.iter().position(|c| *c == child) {
            return Some(pos as i32 - self.below.len() as i32);
        }
        self.above.iter().position(|c| *c == child).map(|pos| pos as i32)
    }

    pub fn iter(&self) -> impl Iterator<Item = SurfaceId> + '_ {
        self.below.iter().chain(self.above.iter()).copied()
    }
}

pub struct Surface {
    pub pending: SurfaceState,
    pub current: SurfaceState,
    pub(crate) queue: CommitQueue,
    pub(crate) role: SurfaceRole,
    pub(crate) children: Children,
    pub(crate) frame_callbacks: Vec<Box<dyn FrameCallback>>,
    pub(crate) mapped: bool,
    pub(crate) buffer_sync: Option<BufferSyncId>,
    pub(crate) has_viewport: bool,
    pub(crate) cursor_pixels: Vec<u8>,
    pub(crate) version: u32,
    pub(crate) committed_since_frame: bool,
}

impl Surface {
    pub fn new(version: u32) -> Self {
        Self {
            pending: SurfaceState::new(),
            current: SurfaceState::new(),
            queue: CommitQueue::new(),
            role: SurfaceRole::Unassigned,
            children: Children::default(),
            frame_callbacks: Vec::new(),
            mapped: false,
            buffer_sync: None,
            has_viewport: false,
            cursor_pixels: Vec::new(),
            version,
            committed_since_frame: false,
        }
    }

    pub fn role(&self) -> &SurfaceRole {
        &self.role
    }

    pub fn children(&self) -> &Children {
        &self.children
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn buffer_sync(&self) -> Option<BufferSyncId> {
        self.buffer_sync
    }

    pub fn cursor_pixels(&self) -> &[u8] {
        &self.cursor_pixels
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn frame_callback_count(&self) -> usize {
        self.frame_callbacks.len()
    }

    pub(crate) fn fire_frame_callbacks(&mut self, time_ms: u32) {
        for callback in self.frame_callbacks.drain(..) {
            callback.done(time_ms);
        }
        self.committed_since_frame = false;
    }
}
