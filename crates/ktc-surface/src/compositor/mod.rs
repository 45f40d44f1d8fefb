//! The process-wide context: owns every live object of the core and
//! implements the requests clients make on them.
//!
//! Transport glue calls in with ids it keeps in resource user data; every
//! entry point re-resolves those ids, so requests racing a destroy get a
//! typed error or a logged no-op rather than touching a dead object.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::os::fd::OwnedFd;
use std::rc::Rc;

use crate::buffer::{AttachedBuffer, Buffer, Texture};
use crate::error::{Result, SubsurfaceError, SurfaceError, SyncError, ViewportError};
use crate::io::{ReadinessIo, Wakeup};
use crate::region::{Point, Rectangle, Region, Size};
use crate::registry::{Id, Registry};
use crate::surface::tree;
use crate::surface::{
    BufferSyncId, FrameCallback, ReadyToken, SourceRect, SubsurfaceRole, Surface, SurfaceId,
    SurfaceRole, SurfaceState, Transform, Updated,
};
use crate::sync::{
    point_from_halves, BufferSync, PointRole, SharedTimeline, SyncPoint, Timeline, TimelineId,
    TimelineImporter,
};

#[cfg(test)]
mod tests;

pub type RegionId = Id<Region>;
pub type SessionId = Id<Session>;

/// One bound `wl_compositor`.
#[derive(Debug)]
pub struct Session {
    pub version: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceEvent {
    Committed(SurfaceId),
    Mapped(SurfaceId),
    Unmapped(SurfaceId),
    Destroyed(SurfaceId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Promoted before `commit` returned.
    Applied,
    /// Waiting in the surface's queue.
    Queued,
    /// Refused by a pre-commit observer; nothing was promoted.
    Rejected,
}

/// Runs on every commit before the pending state is sealed, and may set
/// `pending.rejected`. Explicit sync does not go through here: its points
/// are per surface and its errors go back to the client, so `commit` runs a
/// surface's `BufferSync` itself, before any observer.
pub trait CommitObserver {
    fn pre_commit(&mut self, surface: SurfaceId, pending: &mut SurfaceState);
}

pub struct Compositor {
    pub(crate) surfaces: Registry<Surface>,
    pub(crate) regions: Registry<Region>,
    pub(crate) timelines: Registry<SharedTimeline>,
    pub(crate) buffer_syncs: Registry<BufferSync>,
    pub(crate) sessions: Registry<Session>,
    pub(crate) importer: Box<dyn TimelineImporter>,
    pub(crate) io: Box<dyn ReadinessIo>,
    pub(crate) wakeups: Rc<RefCell<VecDeque<ReadyToken>>>,
    pub(crate) observers: Vec<Box<dyn CommitObserver>>,
    pub(crate) events: Vec<SurfaceEvent>,
}

impl Compositor {
    pub fn new(importer: Box<dyn TimelineImporter>, io: Box<dyn ReadinessIo>, max_objects: usize) -> Self {
        log::info!(
            "[surface] Compositor core up, {} timelines, {} objects per kind",
            importer.name(),
            max_objects
        );
        Self {
            surfaces: Registry::new("surface", max_objects),
            regions: Registry::new("region", max_objects),
            timelines: Registry::new("timeline", max_objects),
            buffer_syncs: Registry::new("buffer sync", max_objects),
            sessions: Registry::new("compositor session", max_objects),
            importer,
            io,
            wakeups: Rc::new(RefCell::new(VecDeque::new())),
            observers: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn CommitObserver>) {
        self.observers.push(observer);
    }

    pub fn take_events(&mut self) -> Vec<SurfaceEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.get(id)
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    pub fn texture(&self, id: SurfaceId) -> Option<&Texture> {
        self.surfaces.get(id)?.current.texture.as_ref()
    }

    fn surface_mut(&mut self, id: SurfaceId) -> Result<&mut Surface> {
        self.surfaces.get_mut(id).ok_or_else(|| SurfaceError::Gone.into())
    }

    // sessions

    pub fn bind_session(&mut self, version: u32) -> Result<SessionId> {
        Ok(self.sessions.insert(Session { version })?)
    }

    pub fn destroy_session(&mut self, id: SessionId) {
        self.sessions.remove(id);
    }

    pub fn create_surface(&mut self, session: SessionId) -> Result<SurfaceId> {
        let version = self.sessions.lookup(session)?.version;
        let id = self.surfaces.insert(Surface::new(version))?;
        log::debug!("[surface] Created {:?} (v{})", id, version);
        Ok(id)
    }

    /// Tears a surface down: unmaps it, drops queued snapshots and their
    /// waiters unpromoted, and releases its buffers. Idempotent.
    pub fn destroy_surface(&mut self, id: SurfaceId) {
        let Some(mut surface) = self.surfaces.remove(id) else {
            return;
        };
        if surface.mapped {
            self.events.push(SurfaceEvent::Unmapped(id));
        }
        let cancelled = surface.queue.cancel_all();
        if cancelled > 0 {
            log::debug!("[queue] Dropped {} queued commits of destroyed {:?}", cancelled, id);
        }
        surface.pending.buffer = None;
        surface.current.buffer = None;
        self.events.push(SurfaceEvent::Destroyed(id));
        log::debug!("[surface] Destroyed {:?}", id);
    }

    // regions

    pub fn create_region(&mut self) -> Result<RegionId> {
        Ok(self.regions.insert(Region::new())?)
    }

    pub fn region_add(&mut self, id: RegionId, rect: Rectangle) {
        match self.regions.get_mut(id) {
            Some(region) => {
                region.add(rect);
            }
            None => log::error!("[surface] add on destroyed region {:?}", id),
        }
    }

    pub fn region_subtract(&mut self, id: RegionId, rect: Rectangle) {
        match self.regions.get_mut(id) {
            Some(region) => {
                region.subtract(rect);
            }
            None => log::error!("[surface] subtract on destroyed region {:?}", id),
        }
    }

    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id)
    }

    pub fn destroy_region(&mut self, id: RegionId) {
        self.regions.remove(id);
    }

    // wl_surface requests

    pub fn attach(&mut self, id: SurfaceId, buffer: Option<Rc<Buffer>>, x: i32, y: i32) -> Result<()> {
        let surface = self.surface_mut(id)?;
        if surface.version >= 5 && (x, y) != (0, 0) {
            return Err(SurfaceError::InvalidOffset.into());
        }

        let pending = &mut surface.pending;
        match buffer {
            Some(buffer) => {
                let size = buffer.size();
                if size != surface.current.buffer_size {
                    pending.damage_all();
                }
                pending.buffer_size = size;
                pending.buffer = Some(AttachedBuffer::new(buffer));
            }
            None => {
                pending.buffer = None;
                pending.buffer_size = Size::default();
            }
        }
        pending.updated |= Updated::BUFFER;

        if (x, y) != (0, 0) {
            pending.offset = (x, y);
            pending.updated |= Updated::OFFSET;
        }
        Ok(())
    }

    pub fn damage(&mut self, id: SurfaceId, rect: Rectangle) -> Result<()> {
        let pending = &mut self.surface_mut(id)?.pending;
        pending.damage.add(rect);
        pending.updated |= Updated::DAMAGE;
        Ok(())
    }

    pub fn damage_buffer(&mut self, id: SurfaceId, rect: Rectangle) -> Result<()> {
        let pending = &mut self.surface_mut(id)?.pending;
        pending.buffer_damage.add(rect);
        pending.updated |= Updated::DAMAGE;
        Ok(())
    }

    pub fn set_buffer_scale(&mut self, id: SurfaceId, scale: i32) -> Result<()> {
        if scale <= 0 {
            return Err(SurfaceError::InvalidScale(scale).into());
        }
        let pending = &mut self.surface_mut(id)?.pending;
        if pending.scale != scale {
            pending.damage_all();
        }
        pending.scale = scale;
        pending.updated |= Updated::SCALE;
        Ok(())
    }

    pub fn set_buffer_transform(&mut self, id: SurfaceId, transform: u32) -> Result<()> {
        let transform = Transform::from_wire(transform).ok_or(SurfaceError::InvalidTransform(transform))?;
        let pending = &mut self.surface_mut(id)?.pending;
        if pending.transform != transform {
            pending.damage_all();
        }
        pending.transform = transform;
        pending.updated |= Updated::TRANSFORM;
        Ok(())
    }

    /// `None` makes the whole surface accept input.
    pub fn set_input_region(&mut self, id: SurfaceId, region: Option<RegionId>) -> Result<()> {
        let region = match region {
            Some(r) => self.regions.get(r).cloned().ok_or(SurfaceError::RegionGone)?,
            None => Region::infinite(),
        };
        let pending = &mut self.surface_mut(id)?.pending;
        pending.input = region;
        pending.updated |= Updated::INPUT;
        Ok(())
    }

    /// `None` makes the surface fully translucent.
    pub fn set_opaque_region(&mut self, id: SurfaceId, region: Option<RegionId>) -> Result<()> {
        let region = match region {
            Some(r) => self.regions.get(r).cloned().ok_or(SurfaceError::RegionGone)?,
            None => Region::new(),
        };
        let pending = &mut self.surface_mut(id)?.pending;
        pending.opaque = region;
        pending.updated |= Updated::OPAQUE;
        Ok(())
    }

    pub fn frame(&mut self, id: SurfaceId, callback: Box<dyn FrameCallback>) -> Result<()> {
        self.surface_mut(id)?.frame_callbacks.push(callback);
        Ok(())
    }

    pub fn set_offset(&mut self, id: SurfaceId, x: i32, y: i32) -> Result<()> {
        let pending = &mut self.surface_mut(id)?.pending;
        pending.offset = (x, y);
        pending.updated |= Updated::OFFSET;
        Ok(())
    }

    // roles and mapping

    pub fn set_role(&mut self, id: SurfaceId, role: SurfaceRole) -> Result<()> {
        let surface = self.surface_mut(id)?;
        let current = surface.role.kind();
        let requested = role.kind();
        if current != crate::surface::RoleKind::Unassigned && current != requested {
            return Err(SurfaceError::RoleConflict { current, requested }.into());
        }
        surface.role = role;
        Ok(())
    }

    pub fn reset_role(&mut self, id: SurfaceId) {
        if let Some(surface) = self.surfaces.get_mut(id) {
            surface.role = SurfaceRole::Unassigned;
        }
    }

    pub fn map(&mut self, id: SurfaceId, time_ms: u32) {
        let Some(surface) = self.surfaces.get_mut(id) else {
            log::error!("[surface] map on destroyed {:?}", id);
            return;
        };
        if surface.mapped {
            return;
        }
        surface.mapped = true;
        surface.fire_frame_callbacks(time_ms);
        surface.pending.damage_all();
        surface.current.damage_all();
        self.events.push(SurfaceEvent::Mapped(id));
        log::debug!("[surface] Mapped {:?}", id);
    }

    pub fn unmap(&mut self, id: SurfaceId) {
        let Some(surface) = self.surfaces.get_mut(id) else {
            return;
        };
        if !surface.mapped {
            return;
        }
        surface.mapped = false;
        surface.current.buffer = None;
        surface.current.texture = None;
        self.events.push(SurfaceEvent::Unmapped(id));
        log::debug!("[surface] Unmapped {:?}", id);
    }

    pub fn frame_done(&mut self, id: SurfaceId, time_ms: u32) {
        if let Some(surface) = self.surfaces.get_mut(id) {
            surface.fire_frame_callbacks(time_ms);
        }
    }

    /// Fires frame callbacks of every surface that committed since its last
    /// frame. Returns how many surfaces were signaled.
    pub fn frame_done_committed(&mut self, time_ms: u32) -> usize {
        let mut count = 0;
        for id in self.surfaces.ids() {
            if let Some(surface) = self.surfaces.get_mut(id) {
                if surface.committed_since_frame {
                    surface.fire_frame_callbacks(time_ms);
                    count += 1;
                }
            }
        }
        count
    }

    // subsurfaces

    pub fn get_subsurface(&mut self, child: SurfaceId, parent: SurfaceId) -> Result<()> {
        let Some(surface) = self.surfaces.get(child) else {
            return Err(SubsurfaceError::BadSurface("surface is gone").into());
        };
        if child == parent {
            return Err(SubsurfaceError::BadSurface("surface cannot be its own parent").into());
        }
        if surface.role != SurfaceRole::Unassigned {
            return Err(SubsurfaceError::BadSurface("surface already has a role").into());
        }
        if !self.surfaces.contains(parent) || tree::is_ancestor(&self.surfaces, child, parent) {
            return Err(SubsurfaceError::BadParent.into());
        }

        if let Some(surface) = self.surfaces.get_mut(child) {
            surface.role = SurfaceRole::Subsurface(SubsurfaceRole {
                parent,
                position: (0, 0),
                pending_position: None,
                sync: true,
            });
        }
        if let Some(parent_surface) = self.surfaces.get_mut(parent) {
            parent_surface.children.above.push(child);
        }
        log::debug!("[subsurface] {:?} is now a subsurface of {:?}", child, parent);
        Ok(())
    }

    fn subsurface_role(&mut self, child: SurfaceId) -> Result<&mut SubsurfaceRole> {
        self.surfaces
            .get_mut(child)
            .and_then(|s| s.role.subsurface_mut())
            .ok_or_else(|| SubsurfaceError::BadSurface("not a subsurface").into())
    }

    pub fn set_subsurface_position(&mut self, child: SurfaceId, x: i32, y: i32) -> Result<()> {
        self.subsurface_role(child)?.pending_position = Some((x, y));
        Ok(())
    }

    pub fn set_subsurface_sync(&mut self, child: SurfaceId, sync: bool) -> Result<()> {
        self.subsurface_role(child)?.sync = sync;
        Ok(())
    }

    /// Moves `child` directly above `sibling`, which may be the parent.
    pub fn place_above(&mut self, child: SurfaceId, sibling: SurfaceId) -> Result<()> {
        self.restack(child, sibling, true)
    }

    /// Moves `child` directly below `sibling`, which may be the parent.
    pub fn place_below(&mut self, child: SurfaceId, sibling: SurfaceId) -> Result<()> {
        self.restack(child, sibling, false)
    }

    fn restack(&mut self, child: SurfaceId, sibling: SurfaceId, above: bool) -> Result<()> {
        let parent = self.subsurface_role(child)?.parent;
        let is_sibling = sibling != child
            && self
                .surfaces
                .get(sibling)
                .and_then(|s| s.role.subsurface())
                .is_some_and(|sub| sub.parent == parent);
        if sibling != parent && !is_sibling {
            return Err(SubsurfaceError::NotSibling.into());
        }

        let Some(parent_surface) = self.surfaces.get_mut(parent) else {
            return Err(SubsurfaceError::BadParent.into());
        };
        let children = &mut parent_surface.children;
        children.remove(child);

        if sibling == parent {
            if above {
                children.above.insert(0, child);
            } else {
                children.below.push(child);
            }
        } else if let Some(pos) = children.above.iter().position(|c| *c == sibling) {
            children.above.insert(if above { pos + 1 } else { pos }, child);
        } else if let Some(pos) = children.below.iter().position(|c| *c == sibling) {
            children.below.insert(if above { pos + 1 } else { pos }, child);
        } else {
            // sibling was never linked, put the child back on top
            children.above.push(child);
            return Err(SubsurfaceError::NotSibling.into());
        }
        Ok(())
    }

    pub fn destroy_subsurface(&mut self, child: SurfaceId) {
        let Some(surface) = self.surfaces.get_mut(child) else {
            return;
        };
        let Some(parent) = surface.role.subsurface().map(|sub| sub.parent) else {
            return;
        };
        surface.role = SurfaceRole::Unassigned;
        if let Some(parent_surface) = self.surfaces.get_mut(parent) {
            parent_surface.children.remove(child);
        }
        log::debug!("[subsurface] {:?} unlinked from {:?}", child, parent);
    }

    // tree queries

    pub fn breadth_first(&mut self, root: SurfaceId) -> Vec<(SurfaceId, (i32, i32))> {
        tree::breadth_first(&mut self.surfaces, root)
    }

    pub fn surface_at(&mut self, root: SurfaceId, point: Point, use_input: bool) -> Option<(SurfaceId, Point)> {
        tree::surface_at(&mut self.surfaces, root, point, use_input)
    }

    pub fn extents(&mut self, root: SurfaceId) -> Rectangle {
        tree::extents(&mut self.surfaces, root)
    }

    pub fn find_first_preorder(
        &self,
        root: SurfaceId,
        pred: &mut dyn FnMut(SurfaceId, &Surface) -> bool,
    ) -> Option<SurfaceId> {
        tree::find_first_preorder(&self.surfaces, root, pred)
    }

    // explicit sync

    pub fn import_timeline(&mut self, fd: OwnedFd) -> Result<TimelineId> {
        let timeline = Timeline::import(self.importer.as_ref(), fd).map_err(|e| {
            log::warn!("[sync] Failed to import timeline: {}", e);
            SyncError::InvalidTimeline
        })?;
        let id = self.timelines.insert(Rc::new(RefCell::new(timeline)))?;
        log::debug!("[sync] Imported timeline {:?}", id);
        Ok(id)
    }

    /// Drops the timeline and every waiter still registered on it.
    pub fn destroy_timeline(&mut self, id: TimelineId) {
        if let Some(timeline) = self.timelines.remove(id) {
            timeline.borrow_mut().remove_all_waiters();
            log::debug!("[sync] Destroyed timeline {:?}", id);
        }
    }

    pub fn signal_timeline(&mut self, id: TimelineId, point: u64) -> bool {
        match self.timelines.get(id) {
            Some(timeline) => timeline.borrow_mut().signal(point),
            None => {
                log::error!("[sync] signal on destroyed timeline {:?}", id);
                false
            }
        }
    }

    pub fn timeline_point(&self, id: TimelineId) -> Option<u64> {
        self.timelines.get(id)?.borrow().current_point()
    }

    pub fn get_buffer_sync(&mut self, surface: SurfaceId) -> Result<BufferSyncId> {
        let Some(s) = self.surfaces.get(surface) else {
            return Err(SyncError::InvalidSurface.into());
        };
        if s.buffer_sync.is_some_and(|existing| self.buffer_syncs.contains(existing)) {
            return Err(SyncError::SurfaceExists.into());
        }

        let id = self.buffer_syncs.insert(BufferSync::new(surface))?;
        match self.surfaces.get_mut(surface) {
            Some(s) => s.buffer_sync = Some(id),
            None => {
                self.buffer_syncs.remove(id);
                return Err(SyncError::InvalidSurface.into());
            }
        }
        log::debug!("[sync] {:?} now uses explicit sync", surface);
        Ok(id)
    }

    pub fn destroy_buffer_sync(&mut self, id: BufferSyncId) {
        let Some(sync) = self.buffer_syncs.remove(id) else {
            return;
        };
        if let Some(surface) = self.surfaces.get_mut(sync.surface()) {
            if surface.buffer_sync == Some(id) {
                surface.buffer_sync = None;
            }
        }
    }

    pub fn set_acquire_point(&mut self, sync: BufferSyncId, timeline: TimelineId, hi: u32, lo: u32) -> Result<()> {
        self.set_point(sync, timeline, point_from_halves(hi, lo), PointRole::Acquire)
    }

    pub fn set_release_point(&mut self, sync: BufferSyncId, timeline: TimelineId, hi: u32, lo: u32) -> Result<()> {
        self.set_point(sync, timeline, point_from_halves(hi, lo), PointRole::Release)
    }

    fn set_point(&mut self, sync: BufferSyncId, timeline: TimelineId, point: u64, role: PointRole) -> Result<()> {
        let Some(buffer_sync) = self.buffer_syncs.get_mut(sync) else {
            log::error!("[sync] {:?} point on destroyed buffer sync {:?}", role, sync);
            return Ok(());
        };
        if !self.surfaces.contains(buffer_sync.surface()) {
            return Err(SyncError::NoSurface.into());
        }
        if !self.timelines.contains(timeline) {
            log::warn!("[sync] {:?} point {} on destroyed timeline {:?}", role, point, timeline);
        }
        let point = SyncPoint::new(timeline, self.timelines.get(timeline), point, role);
        match role {
            PointRole::Acquire => buffer_sync.set_acquire_point(point),
            PointRole::Release => buffer_sync.set_release_point(point),
        }
        Ok(())
    }

    // viewporter

    pub fn get_viewport(&mut self, id: SurfaceId) -> std::result::Result<(), ViewportError> {
        let surface = self.surfaces.get_mut(id).ok_or(ViewportError::NoSurface)?;
        if surface.has_viewport {
            return Err(ViewportError::ViewportExists);
        }
        surface.has_viewport = true;
        Ok(())
    }

    /// All four values -1 unset the source rectangle.
    pub fn set_viewport_source(
        &mut self,
        id: SurfaceId,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    ) -> std::result::Result<(), ViewportError> {
        let unset = [x, y, width, height].iter().all(|v| *v == -1.0);
        if !unset && (x < 0.0 || y < 0.0 || width <= 0.0 || height <= 0.0) {
            return Err(ViewportError::BadValue("source rectangle must be positive"));
        }
        let surface = self.surfaces.get_mut(id).ok_or(ViewportError::NoSurface)?;
        surface.pending.viewport.source = (!unset).then_some(SourceRect { x, y, width, height });
        surface.pending.updated |= Updated::VIEWPORT;
        Ok(())
    }

    /// -1, -1 unsets the destination size.
    pub fn set_viewport_destination(
        &mut self,
        id: SurfaceId,
        width: i32,
        height: i32,
    ) -> std::result::Result<(), ViewportError> {
        let unset = width == -1 && height == -1;
        if !unset && (width <= 0 || height <= 0) {
            return Err(ViewportError::BadValue("destination size must be positive"));
        }
        let surface = self.surfaces.get_mut(id).ok_or(ViewportError::NoSurface)?;
        surface.pending.viewport.destination = (!unset).then_some(Size::new(width, height));
        surface.pending.updated |= Updated::VIEWPORT;
        Ok(())
    }

    pub fn destroy_viewport(&mut self, id: SurfaceId) {
        if let Some(surface) = self.surfaces.get_mut(id) {
            surface.has_viewport = false;
            surface.pending.viewport = Default::default();
            surface.pending.updated |= Updated::VIEWPORT;
        }
    }

    // readiness

    /// The event loop's dispatch step: runs timeline waiters whose point has
    /// been reached, then promotes whatever became ready.
    pub fn dispatch_pending(&mut self) {
        let mut callbacks = Vec::new();
        for (_, timeline) in self.timelines.iter() {
            callbacks.extend(timeline.borrow_mut().take_ready());
        }
        for callback in callbacks {
            callback();
        }
        self.drain_wakeups();
    }

    pub fn on_readable(&mut self, wakeup: Wakeup) {
        match wakeup {
            Wakeup::Timeline(id) => {
                let Some(timeline) = self.timelines.get(id).cloned() else {
                    log::debug!("[sync] Wakeup for destroyed timeline {:?}", id);
                    return;
                };
                let ready = timeline.borrow_mut().take_ready();
                for callback in ready {
                    callback();
                }
            }
            Wakeup::Commit(token) => self.wakeups.borrow_mut().push_back(token),
        }
        self.drain_wakeups();
    }

    fn drain_wakeups(&mut self) {
        loop {
            let next = self.wakeups.borrow_mut().pop_front();
            match next {
                Some(token) => self.flush(token),
                None => break,
            }
        }
    }
}
