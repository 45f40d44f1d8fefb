use std::cell::RefCell;
use std::io;
use std::os::fd::OwnedFd;
use std::rc::Rc;

use super::*;
use crate::buffer::testing::{dev_null, dmabuf, shm};
use crate::error::CoreError;
use crate::io::testing::RecordingIo;
use crate::surface::RoleKind;
use crate::sync::{SoftwareImporter, TimelineBackend};

struct Harness {
    comp: Compositor,
    io: RecordingIo,
    session: SessionId,
}

fn harness() -> Harness {
    harness_with(Box::new(SoftwareImporter), 64, 6)
}

fn harness_with(importer: Box<dyn TimelineImporter>, max_objects: usize, version: u32) -> Harness {
    let io = RecordingIo::default();
    let mut comp = Compositor::new(importer, Box::new(io.clone()), max_objects);
    let session = comp.bind_session(version).unwrap();
    Harness { comp, io, session }
}

impl Harness {
    fn surface(&mut self) -> SurfaceId {
        self.comp.create_surface(self.session).unwrap()
    }

    fn timeline(&mut self) -> TimelineId {
        self.comp.import_timeline(dev_null()).unwrap()
    }

    fn waiters(&self, timeline: TimelineId) -> usize {
        self.comp.timelines.get(timeline).unwrap().borrow().waiter_count()
    }

    fn commit_shm(&mut self, id: SurfaceId, width: i32, height: i32) {
        let (buffer, _) = shm(width, height);
        self.comp.attach(id, Some(buffer), 0, 0).unwrap();
        assert_eq!(self.comp.commit(id), Ok(CommitOutcome::Applied));
    }

    /// Attaches an unfenced dmabuf gated on `acquire`, released at `release`.
    fn commit_gated(
        &mut self,
        id: SurfaceId,
        sync: BufferSyncId,
        size: i32,
        acquire: (TimelineId, u64),
        release: (TimelineId, u64),
    ) -> Rc<crate::buffer::testing::Counters> {
        let (buffer, counters) = dmabuf(size, size, None);
        self.comp.attach(id, Some(buffer), 0, 0).unwrap();
        self.comp.set_acquire_point(sync, acquire.0, 0, acquire.1 as u32).unwrap();
        self.comp.set_release_point(sync, release.0, 0, release.1 as u32).unwrap();
        assert_eq!(self.comp.commit(id), Ok(CommitOutcome::Queued));
        counters
    }

    fn current(&self, id: SurfaceId) -> &SurfaceState {
        &self.comp.surface(id).unwrap().current
    }

    fn committed(&mut self) -> Vec<SurfaceId> {
        self.comp
            .take_events()
            .into_iter()
            .filter_map(|e| match e {
                SurfaceEvent::Committed(id) => Some(id),
                _ => None,
            })
            .collect()
    }
}

struct RecordingFrame {
    tag: u32,
    log: Rc<RefCell<Vec<(u32, u32)>>>,
}

impl FrameCallback for RecordingFrame {
    fn done(self: Box<Self>, time_ms: u32) {
        self.log.borrow_mut().push((self.tag, time_ms));
    }
}

struct FailingImporter;

impl TimelineImporter for FailingImporter {
    fn import(&self, _fd: OwnedFd) -> io::Result<Box<dyn TimelineBackend>> {
        Err(io::Error::new(io::ErrorKind::InvalidInput, "not a syncobj"))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

#[test]
fn test_initial_commit_promotes_empty_state() {
    let mut h = harness();
    let id = h.surface();

    assert_eq!(h.comp.commit(id), Ok(CommitOutcome::Applied));
    assert_eq!(h.current(id).size, Size::default());
    assert_eq!(h.comp.surface(id).unwrap().queued(), 0);
    assert!(h.io.watched.borrow().is_empty());
    assert_eq!(h.committed(), vec![id]);
}

#[test]
fn test_shm_commit_applies_synchronously() {
    let mut h = harness();
    let id = h.surface();
    let (buffer, counters) = shm(10, 8);

    h.comp.attach(id, Some(buffer), 0, 0).unwrap();
    h.comp.damage(id, Rectangle::new(0, 0, 4, 4)).unwrap();
    assert_eq!(h.comp.commit(id), Ok(CommitOutcome::Applied));

    let surface = h.comp.surface(id).unwrap();
    assert_eq!(surface.queued(), 0);
    assert_eq!(surface.current.size, Size::new(10, 8));
    assert!(surface.current.buffer.is_some());
    let texture = h.comp.texture(id).unwrap();
    assert_eq!(texture.pixels().map(|p| p.data.len()), Some(10 * 8 * 4));
    assert_eq!(counters.releases.get(), 0);
    assert!(h.io.watched.borrow().is_empty());
}

#[test]
fn test_acquire_point_gates_promotion() {
    let mut h = harness();
    let id = h.surface();
    let sync = h.comp.get_buffer_sync(id).unwrap();
    let tl = h.timeline();

    h.commit_gated(id, sync, 4, (tl, 5), (tl, 6));
    assert_eq!(h.comp.surface(id).unwrap().queued(), 1);
    assert_eq!(h.waiters(tl), 1);

    h.comp.signal_timeline(tl, 4);
    h.comp.dispatch_pending();
    assert!(h.current(id).buffer.is_none());
    assert_eq!(h.comp.surface(id).unwrap().queued(), 1);

    h.comp.signal_timeline(tl, 5);
    h.comp.dispatch_pending();
    assert!(h.current(id).buffer.is_some());
    assert_eq!(h.current(id).size, Size::new(4, 4));
    assert_eq!(h.comp.surface(id).unwrap().queued(), 0);
    assert_eq!(h.waiters(tl), 0);
    assert_eq!(h.committed(), vec![id]);
}

#[test]
fn test_acquire_reached_past_point_still_promotes() {
    let mut h = harness();
    let id = h.surface();
    let sync = h.comp.get_buffer_sync(id).unwrap();
    let acquire = h.timeline();
    let release = h.timeline();

    h.comp.signal_timeline(acquire, 10);
    h.commit_gated(id, sync, 2, (acquire, 3), (release, 1));
    // never inline with the commit
    assert!(h.current(id).buffer.is_none());
    h.comp.dispatch_pending();
    assert!(h.current(id).buffer.is_some());
}

#[test]
fn test_out_of_order_fences_flush_in_order() {
    let mut h = harness();
    let id = h.surface();
    let sync = h.comp.get_buffer_sync(id).unwrap();
    let (ta, tb, tc, tr) = (h.timeline(), h.timeline(), h.timeline(), h.timeline());

    let a = h.commit_gated(id, sync, 1, (ta, 1), (tr, 1));
    let b = h.commit_gated(id, sync, 2, (tb, 1), (tr, 2));
    let c = h.commit_gated(id, sync, 3, (tc, 1), (tr, 3));
    assert_eq!(h.comp.surface(id).unwrap().queued(), 3);

    h.comp.signal_timeline(tc, 1);
    h.comp.dispatch_pending();

    assert_eq!(h.comp.surface(id).unwrap().queued(), 0);
    assert_eq!(h.current(id).size, Size::new(3, 3));
    assert_eq!(h.committed(), vec![id, id, id]);
    // A was replaced by B, B by C
    assert_eq!(a.releases.get(), 1);
    assert_eq!(b.releases.get(), 1);
    assert_eq!(c.releases.get(), 0);
    assert_eq!(h.comp.timeline_point(tr), Some(2));
    // the force-promoted entries no longer wait
    assert_eq!(h.waiters(ta), 0);
    assert_eq!(h.waiters(tb), 0);

    h.comp.signal_timeline(ta, 1);
    h.comp.dispatch_pending();
    assert!(h.committed().is_empty());
}

#[test]
fn test_conflicting_points_rejected() {
    let mut h = harness();
    let id = h.surface();
    let sync = h.comp.get_buffer_sync(id).unwrap();
    let tl = h.timeline();
    let (buffer, _) = dmabuf(4, 4, None);

    h.comp.attach(id, Some(buffer), 0, 0).unwrap();
    h.comp.set_acquire_point(sync, tl, 0, 5).unwrap();
    h.comp.set_release_point(sync, tl, 0, 5).unwrap();
    assert_eq!(
        h.comp.commit(id),
        Err(CoreError::Sync(SyncError::ConflictingPoints))
    );

    let surface = h.comp.surface(id).unwrap();
    assert_eq!(surface.queued(), 0);
    assert!(surface.current.buffer.is_none());
    assert!(surface.pending.buffer.is_none());
    assert_eq!(h.waiters(tl), 0);
}

#[test]
fn test_missing_release_point_rejected() {
    let mut h = harness();
    let id = h.surface();
    let sync = h.comp.get_buffer_sync(id).unwrap();
    let tl = h.timeline();
    let (buffer, _) = dmabuf(4, 4, None);

    h.comp.attach(id, Some(buffer), 0, 0).unwrap();
    h.comp.set_acquire_point(sync, tl, 0, 1).unwrap();
    assert_eq!(h.comp.commit(id), Err(CoreError::Sync(SyncError::NoReleasePoint)));
}

#[test]
fn test_point_split_across_halves() {
    let mut h = harness();
    let id = h.surface();
    let sync = h.comp.get_buffer_sync(id).unwrap();
    let tl = h.timeline();
    let release = h.timeline();
    let (buffer, _) = dmabuf(4, 4, None);

    h.comp.attach(id, Some(buffer), 0, 0).unwrap();
    h.comp.set_acquire_point(sync, tl, 1, 0).unwrap();
    h.comp.set_release_point(sync, release, 0, 1).unwrap();
    h.comp.commit(id).unwrap();

    h.comp.signal_timeline(tl, u32::MAX as u64);
    h.comp.dispatch_pending();
    assert!(h.current(id).buffer.is_none());

    h.comp.signal_timeline(tl, 1 << 32);
    h.comp.dispatch_pending();
    assert!(h.current(id).buffer.is_some());
}

#[test]
fn test_second_buffer_sync_rejected() {
    let mut h = harness();
    let id = h.surface();
    let first = h.comp.get_buffer_sync(id).unwrap();

    assert_eq!(
        h.comp.get_buffer_sync(id),
        Err(CoreError::Sync(SyncError::SurfaceExists))
    );
    assert_eq!(h.comp.surface(id).unwrap().buffer_sync(), Some(first));
    assert!(h.comp.buffer_syncs.contains(first));

    h.comp.destroy_buffer_sync(first);
    assert_eq!(h.comp.surface(id).unwrap().buffer_sync(), None);
    assert!(h.comp.get_buffer_sync(id).is_ok());
}

#[test]
fn test_buffer_sync_on_dead_surface() {
    let mut h = harness();
    let id = h.surface();
    h.comp.destroy_surface(id);
    assert_eq!(
        h.comp.get_buffer_sync(id),
        Err(CoreError::Sync(SyncError::InvalidSurface))
    );
    assert!(h.comp.buffer_syncs.is_empty());
}

#[test]
fn test_set_point_after_surface_gone() {
    let mut h = harness();
    let id = h.surface();
    let sync = h.comp.get_buffer_sync(id).unwrap();
    let tl = h.timeline();
    h.comp.destroy_surface(id);

    assert_eq!(
        h.comp.set_acquire_point(sync, tl, 0, 1),
        Err(CoreError::Sync(SyncError::NoSurface))
    );
}

#[test]
fn test_destroy_surface_cancels_waiters() {
    let mut h = harness();
    let id = h.surface();
    let sync = h.comp.get_buffer_sync(id).unwrap();
    let tl = h.timeline();
    let release = h.timeline();

    let counters = h.commit_gated(id, sync, 4, (tl, 1), (release, 1));
    assert_eq!(h.waiters(tl), 1);
    h.comp.destroy_surface(id);
    assert_eq!(h.waiters(tl), 0);
    // the queued attachment is gone, so the client gets its buffer back
    assert_eq!(counters.releases.get(), 1);
    assert_eq!(h.comp.timeline_point(release), Some(1));

    h.comp.signal_timeline(tl, 1);
    h.comp.dispatch_pending();
    h.comp.on_readable(Wakeup::Commit(ReadyToken { surface: id, seq: 0 }));

    let events = h.comp.take_events();
    assert_eq!(events, vec![SurfaceEvent::Destroyed(id)]);
    assert!(h.comp.surface(id).is_none());

    // idempotent
    h.comp.destroy_surface(id);
    assert!(h.comp.take_events().is_empty());
}

#[test]
fn test_destroy_leaves_other_surfaces_waiting() {
    let mut h = harness();
    let a = h.surface();
    let b = h.surface();
    let sync_a = h.comp.get_buffer_sync(a).unwrap();
    let sync_b = h.comp.get_buffer_sync(b).unwrap();
    let tl = h.timeline();
    let release = h.timeline();

    h.commit_gated(a, sync_a, 2, (tl, 1), (release, 1));
    h.commit_gated(b, sync_b, 2, (tl, 1), (release, 2));
    h.comp.destroy_surface(a);
    assert_eq!(h.waiters(tl), 1);

    h.comp.signal_timeline(tl, 1);
    h.comp.dispatch_pending();
    assert!(h.current(b).buffer.is_some());
}

#[test]
fn test_implicit_fence_waits_for_io() {
    let mut h = harness();
    let id = h.surface();
    let (buffer, counters) = dmabuf(6, 6, Some(dev_null()));

    h.comp.attach(id, Some(buffer), 0, 0).unwrap();
    assert_eq!(h.comp.commit(id), Ok(CommitOutcome::Queued));
    assert_eq!(counters.fence_exports.get(), 1);

    let wakeup = h.io.watched.borrow()[0];
    assert_eq!(wakeup, Wakeup::Commit(ReadyToken { surface: id, seq: 0 }));
    assert!(h.current(id).buffer.is_none());

    h.comp.on_readable(wakeup);
    assert_eq!(h.current(id).size, Size::new(6, 6));
    assert!(h.comp.texture(id).is_some_and(|t| t.pixels().is_none()));
}

#[test]
fn test_unfenced_dmabuf_applies_now() {
    let mut h = harness();
    let id = h.surface();
    let (buffer, _) = dmabuf(6, 6, None);

    h.comp.attach(id, Some(buffer), 0, 0).unwrap();
    assert_eq!(h.comp.commit(id), Ok(CommitOutcome::Applied));
    assert!(h.current(id).buffer.is_some());
}

#[test]
fn test_ready_commit_waits_behind_queued_one() {
    let mut h = harness();
    let id = h.surface();
    let sync = h.comp.get_buffer_sync(id).unwrap();
    let tl = h.timeline();
    let release = h.timeline();

    h.commit_gated(id, sync, 4, (tl, 1), (release, 1));
    h.comp.set_buffer_scale(id, 2).unwrap();
    assert_eq!(h.comp.commit(id), Ok(CommitOutcome::Queued));
    assert_eq!(h.current(id).scale, 1);

    h.comp.signal_timeline(tl, 1);
    h.comp.dispatch_pending();
    assert_eq!(h.comp.surface(id).unwrap().queued(), 0);
    assert_eq!(h.current(id).scale, 2);
    assert_eq!(h.current(id).size, Size::new(2, 2));
}

#[test]
fn test_null_attach_cancels_queue() {
    let mut h = harness();
    let id = h.surface();
    let sync = h.comp.get_buffer_sync(id).unwrap();
    let tl = h.timeline();
    let release = h.timeline();

    h.commit_gated(id, sync, 4, (tl, 1), (release, 1));
    h.comp.attach(id, None, 0, 0).unwrap();
    assert_eq!(h.comp.commit(id), Ok(CommitOutcome::Applied));

    assert_eq!(h.comp.surface(id).unwrap().queued(), 0);
    assert_eq!(h.waiters(tl), 0);
    assert!(h.current(id).buffer.is_none());
    assert_eq!(h.current(id).size, Size::default());

    h.comp.signal_timeline(tl, 1);
    h.comp.dispatch_pending();
    assert!(h.current(id).buffer.is_none());
}

#[test]
fn test_recommit_clears_current_damage() {
    let mut h = harness();
    let id = h.surface();
    h.commit_shm(id, 8, 8);
    assert!(!h.current(id).buffer_damage.is_empty());

    assert_eq!(h.comp.commit(id), Ok(CommitOutcome::Applied));
    assert!(h.current(id).buffer.is_some());
    assert!(h.current(id).buffer_damage.is_empty());
    assert!(h.current(id).damage.is_empty());
}

#[test]
fn test_release_point_signaled_when_buffer_replaced() {
    let mut h = harness();
    let id = h.surface();
    let sync = h.comp.get_buffer_sync(id).unwrap();
    let tl = h.timeline();
    let release = h.timeline();

    h.commit_gated(id, sync, 4, (tl, 1), (release, 7));
    h.comp.signal_timeline(tl, 1);
    h.comp.dispatch_pending();
    assert_eq!(h.comp.timeline_point(release), Some(0));

    h.commit_gated(id, sync, 4, (tl, 2), (release, 8));
    h.comp.signal_timeline(tl, 2);
    h.comp.dispatch_pending();
    assert_eq!(h.comp.timeline_point(release), Some(7));
}

#[test]
fn test_import_failure_is_invalid_timeline() {
    let mut h = harness_with(Box::new(FailingImporter), 64, 6);
    assert_eq!(
        h.comp.import_timeline(dev_null()),
        Err(CoreError::Sync(SyncError::InvalidTimeline))
    );
    assert!(h.comp.timelines.is_empty());
}

#[test]
fn test_point_on_destroyed_timeline_is_missing() {
    let mut h = harness();
    let id = h.surface();
    let sync = h.comp.get_buffer_sync(id).unwrap();
    let tl = h.timeline();
    let release = h.timeline();
    h.comp.destroy_timeline(tl);

    let (buffer, _) = dmabuf(4, 4, None);
    h.comp.attach(id, Some(buffer), 0, 0).unwrap();
    h.comp.set_acquire_point(sync, tl, 0, 1).unwrap();
    h.comp.set_release_point(sync, release, 0, 2).unwrap();
    assert_eq!(h.comp.commit(id), Err(CoreError::Sync(SyncError::NoAcquirePoint)));
    assert!(!h.comp.signal_timeline(tl, 3));
}

#[test]
fn test_destroy_timeline_drops_its_waiters() {
    let mut h = harness();
    let id = h.surface();
    let sync = h.comp.get_buffer_sync(id).unwrap();
    let tl = h.timeline();
    let release = h.timeline();
    h.commit_gated(id, sync, 4, (tl, 1), (release, 1));

    let timeline = h.comp.timelines.get(tl).unwrap().clone();
    assert_eq!(timeline.borrow().waiter_count(), 1);
    h.comp.destroy_timeline(tl);
    assert_eq!(timeline.borrow().waiter_count(), 0);

    timeline.borrow_mut().signal(1);
    h.comp.dispatch_pending();
    assert!(h.current(id).buffer.is_none());
}

#[test]
fn test_object_limit_reports_no_memory() {
    let mut h = harness_with(Box::new(SoftwareImporter), 1, 6);
    h.comp.create_region().unwrap();
    let err = h.comp.create_region().unwrap_err();
    assert!(err.is_no_memory());

    h.surface();
    assert!(h.comp.create_surface(h.session).unwrap_err().is_no_memory());
    assert_eq!(h.comp.surface_count(), 1);
}

#[test]
fn test_attach_offset_by_version() {
    let mut h = harness();
    let id = h.surface();
    let (buffer, _) = shm(2, 2);
    assert_eq!(
        h.comp.attach(id, Some(buffer), 1, 1),
        Err(CoreError::Surface(SurfaceError::InvalidOffset))
    );

    let mut h = harness_with(Box::new(SoftwareImporter), 64, 4);
    let id = h.surface();
    let (buffer, _) = shm(2, 2);
    h.comp.attach(id, Some(buffer), 3, -2).unwrap();
    h.comp.commit(id).unwrap();
    assert_eq!(h.current(id).offset, (3, -2));

    h.comp.set_offset(id, 1, 1).unwrap();
    h.comp.commit(id).unwrap();
    assert_eq!(h.current(id).offset, (1, 1));
}

#[test]
fn test_scale_and_transform_validation() {
    let mut h = harness();
    let id = h.surface();
    assert_eq!(
        h.comp.set_buffer_scale(id, 0),
        Err(CoreError::Surface(SurfaceError::InvalidScale(0)))
    );
    assert_eq!(
        h.comp.set_buffer_transform(id, 8),
        Err(CoreError::Surface(SurfaceError::InvalidTransform(8)))
    );

    h.comp.set_buffer_scale(id, 2).unwrap();
    h.comp.set_buffer_transform(id, 1).unwrap();
    h.commit_shm(id, 20, 10);
    assert_eq!(h.current(id).size, Size::new(5, 10));
    assert_eq!(h.comp.texture(id).map(|t| t.transform), Some(Transform::Rotate90));

    // sticky across commits
    h.commit_shm(id, 20, 10);
    assert_eq!(h.current(id).scale, 2);
}

#[test]
fn test_resize_forces_full_buffer_damage() {
    let mut h = harness();
    let id = h.surface();
    h.commit_shm(id, 8, 8);

    let (buffer, _) = shm(8, 8);
    h.comp.attach(id, Some(buffer), 0, 0).unwrap();
    h.comp.damage_buffer(id, Rectangle::new(0, 0, 1, 1)).unwrap();
    h.comp.commit(id).unwrap();
    assert_eq!(h.current(id).buffer_damage.area(), 1);

    let (buffer, _) = shm(16, 16);
    h.comp.attach(id, Some(buffer), 0, 0).unwrap();
    h.comp.commit(id).unwrap();
    assert_eq!(h.current(id).buffer_damage.area(), 256);
}

#[test]
fn test_regions() {
    let mut h = harness();
    let id = h.surface();
    let region = h.comp.create_region().unwrap();
    h.comp.region_add(region, Rectangle::new(0, 0, 10, 10));
    h.comp.region_subtract(region, Rectangle::new(0, 0, 5, 10));

    h.comp.set_input_region(id, Some(region)).unwrap();
    h.comp.set_opaque_region(id, Some(region)).unwrap();
    h.comp.commit(id).unwrap();
    assert_eq!(h.current(id).input.area(), 50);
    assert_eq!(h.current(id).opaque.area(), 50);

    h.comp.set_input_region(id, None).unwrap();
    h.comp.set_opaque_region(id, None).unwrap();
    h.comp.commit(id).unwrap();
    assert!(h.current(id).input.contains_point(1e6, 1e6));
    assert!(h.current(id).opaque.is_empty());

    h.comp.destroy_region(region);
    assert_eq!(
        h.comp.set_input_region(id, Some(region)),
        Err(CoreError::Surface(SurfaceError::RegionGone))
    );
}

#[test]
fn test_frame_callbacks_fire_in_order() {
    let mut h = harness();
    let id = h.surface();
    let log = Rc::new(RefCell::new(Vec::new()));
    for tag in 1..=2 {
        let cb = RecordingFrame { tag, log: log.clone() };
        h.comp.frame(id, Box::new(cb)).unwrap();
    }
    h.comp.commit(id).unwrap();

    assert_eq!(h.comp.frame_done_committed(42), 1);
    assert_eq!(*log.borrow(), vec![(1, 42), (2, 42)]);
    assert_eq!(h.comp.frame_done_committed(43), 0);
    assert_eq!(h.comp.surface(id).unwrap().frame_callback_count(), 0);
}

#[test]
fn test_map_and_unmap() {
    let mut h = harness();
    let id = h.surface();
    let (buffer, counters) = shm(4, 4);
    h.comp.attach(id, Some(buffer), 0, 0).unwrap();
    h.comp.commit(id).unwrap();
    h.comp.take_events();

    let log = Rc::new(RefCell::new(Vec::new()));
    h.comp.frame(id, Box::new(RecordingFrame { tag: 1, log: log.clone() })).unwrap();
    h.comp.map(id, 7);
    assert_eq!(*log.borrow(), vec![(1, 7)]);
    assert!(h.comp.surface(id).unwrap().is_mapped());
    assert!(!h.current(id).buffer_damage.is_empty());

    h.comp.unmap(id);
    assert!(h.current(id).buffer.is_none());
    assert_eq!(counters.releases.get(), 1);
    assert_eq!(
        h.comp.take_events(),
        vec![SurfaceEvent::Mapped(id), SurfaceEvent::Unmapped(id)]
    );
}

#[test]
fn test_role_conflict() {
    let mut h = harness();
    let id = h.surface();
    h.comp.set_role(id, SurfaceRole::Cursor).unwrap();
    h.comp.set_role(id, SurfaceRole::Cursor).unwrap();
    assert_eq!(
        h.comp.set_role(id, SurfaceRole::Other("xdg_toplevel")),
        Err(CoreError::Surface(SurfaceError::RoleConflict {
            current: RoleKind::Cursor,
            requested: RoleKind::Other("xdg_toplevel"),
        }))
    );
    h.comp.reset_role(id);
    h.comp.set_role(id, SurfaceRole::Other("xdg_toplevel")).unwrap();
}

#[test]
fn test_shm_released_once_role_assigned() {
    let mut h = harness();
    let id = h.surface();
    h.comp.set_role(id, SurfaceRole::Other("xdg_toplevel")).unwrap();
    let (buffer, counters) = shm(4, 4);
    h.comp.attach(id, Some(buffer), 0, 0).unwrap();
    h.comp.commit(id).unwrap();

    assert_eq!(counters.releases.get(), 1);
    assert!(h.current(id).buffer.is_none());
    assert!(h.comp.texture(id).is_some());
    assert_eq!(h.current(id).size, Size::new(4, 4));
}

#[test]
fn test_cursor_pixels_refreshed() {
    let mut h = harness();
    let id = h.surface();
    h.comp.set_role(id, SurfaceRole::Cursor).unwrap();
    h.commit_shm(id, 2, 2);
    assert_eq!(h.comp.surface(id).unwrap().cursor_pixels(), &[0xab; 16][..]);
}

#[test]
fn test_viewport_overrides_size() {
    let mut h = harness();
    let id = h.surface();
    h.comp.get_viewport(id).unwrap();
    assert_eq!(h.comp.get_viewport(id), Err(ViewportError::ViewportExists));

    h.comp.set_viewport_destination(id, 40, 30).unwrap();
    h.commit_shm(id, 10, 10);
    assert_eq!(h.current(id).size, Size::new(40, 30));

    h.comp.set_viewport_destination(id, -1, -1).unwrap();
    h.comp.set_viewport_source(id, 0.0, 0.0, 5.0, 6.0).unwrap();
    h.commit_shm(id, 10, 10);
    assert_eq!(h.current(id).size, Size::new(5, 6));

    assert!(matches!(
        h.comp.set_viewport_destination(id, 0, 5),
        Err(ViewportError::BadValue(_))
    ));
    assert!(matches!(
        h.comp.set_viewport_source(id, -2.0, 0.0, 1.0, 1.0),
        Err(ViewportError::BadValue(_))
    ));

    h.comp.destroy_viewport(id);
    h.commit_shm(id, 10, 10);
    assert_eq!(h.current(id).size, Size::new(10, 10));
}

#[test]
fn test_synced_subsurface_waits_for_parent() {
    let mut h = harness();
    let parent = h.surface();
    let child = h.surface();
    h.comp.get_subsurface(child, parent).unwrap();

    h.commit_shm(child, 4, 4);
    assert!(h.committed().is_empty());

    h.comp.commit(parent).unwrap();
    assert_eq!(h.committed(), vec![parent, child]);

    h.comp.set_subsurface_sync(child, false).unwrap();
    h.commit_shm(child, 4, 4);
    assert_eq!(h.committed(), vec![child]);

    // desynced children are not repeated by the parent
    h.comp.commit(parent).unwrap();
    assert_eq!(h.committed(), vec![parent]);
}

#[test]
fn test_desynced_child_of_synced_subsurface_notifies_with_root() {
    let mut h = harness();
    let root = h.surface();
    let a = h.surface();
    let b = h.surface();
    h.comp.get_subsurface(a, root).unwrap();
    h.comp.get_subsurface(b, a).unwrap();
    h.comp.set_subsurface_sync(b, false).unwrap();

    h.commit_shm(b, 4, 4);
    assert!(h.committed().is_empty());
    h.comp.commit(a).unwrap();
    assert!(h.committed().is_empty());

    h.comp.commit(root).unwrap();
    assert_eq!(h.committed(), vec![root, a, b]);
}

#[test]
fn test_synced_child_of_desynced_subsurface_notifies_once() {
    let mut h = harness();
    let root = h.surface();
    let a = h.surface();
    let b = h.surface();
    h.comp.get_subsurface(a, root).unwrap();
    h.comp.get_subsurface(b, a).unwrap();
    h.comp.set_subsurface_sync(a, false).unwrap();

    h.commit_shm(b, 4, 4);
    assert!(h.committed().is_empty());

    // a governs b, the root does not
    h.comp.commit(a).unwrap();
    assert_eq!(h.committed(), vec![a, b]);
    h.comp.commit(root).unwrap();
    assert_eq!(h.committed(), vec![root]);
}

#[test]
fn test_subsurface_position_applies_on_parent_commit() {
    let mut h = harness();
    let parent = h.surface();
    let child = h.surface();
    h.comp.get_subsurface(child, parent).unwrap();
    h.comp.set_subsurface_position(child, 5, 6).unwrap();

    let position = |h: &Harness| h.comp.surface(child).unwrap().role().subsurface().unwrap().position;
    assert_eq!(position(&h), (0, 0));
    h.comp.commit(child).unwrap();
    assert_eq!(position(&h), (0, 0));
    h.comp.commit(parent).unwrap();
    assert_eq!(position(&h), (5, 6));
}

#[test]
fn test_get_subsurface_errors() {
    let mut h = harness();
    let a = h.surface();
    let b = h.surface();
    let c = h.surface();

    assert!(matches!(
        h.comp.get_subsurface(a, a),
        Err(CoreError::Subsurface(SubsurfaceError::BadSurface(_)))
    ));
    h.comp.get_subsurface(b, a).unwrap();
    assert!(matches!(
        h.comp.get_subsurface(b, c),
        Err(CoreError::Subsurface(SubsurfaceError::BadSurface(_)))
    ));
    h.comp.get_subsurface(c, b).unwrap();
    // a under c would close a loop
    assert_eq!(
        h.comp.get_subsurface(a, c),
        Err(CoreError::Subsurface(SubsurfaceError::BadParent))
    );

    h.comp.destroy_subsurface(b);
    assert_eq!(h.comp.surface(b).unwrap().role(), &SurfaceRole::Unassigned);
    assert!(h.comp.surface(a).unwrap().children().is_empty());
}

#[test]
fn test_restacking() {
    let mut h = harness();
    let parent = h.surface();
    let a = h.surface();
    let b = h.surface();
    let other = h.surface();
    h.comp.get_subsurface(a, parent).unwrap();
    h.comp.get_subsurface(b, parent).unwrap();

    let children = |h: &Harness| h.comp.surface(parent).unwrap().children().clone();
    assert_eq!(children(&h).above, vec![a, b]);

    h.comp.place_above(a, b).unwrap();
    assert_eq!(children(&h).above, vec![b, a]);

    h.comp.place_below(a, parent).unwrap();
    assert_eq!(children(&h).below, vec![a]);
    assert_eq!(children(&h).above, vec![b]);

    h.comp.place_below(b, a).unwrap();
    assert_eq!(children(&h).below, vec![b, a]);
    assert_eq!(children(&h).z_index(b), Some(-2));

    h.comp.place_above(a, parent).unwrap();
    assert_eq!(children(&h).above, vec![a]);

    assert_eq!(
        h.comp.place_above(a, other),
        Err(CoreError::Subsurface(SubsurfaceError::NotSibling))
    );
}

#[test]
fn test_hit_test_prefers_higher_subsurface() {
    let mut h = harness();
    let root = h.surface();
    let low = h.surface();
    let high = h.surface();
    h.comp.get_subsurface(low, root).unwrap();
    h.comp.get_subsurface(high, root).unwrap();
    h.comp.set_subsurface_position(low, 10, 10).unwrap();
    h.comp.set_subsurface_position(high, 20, 20).unwrap();
    h.commit_shm(low, 50, 50);
    h.commit_shm(high, 50, 50);
    h.commit_shm(root, 100, 100);

    let hit = h.comp.surface_at(root, Point::new(30.0, 30.0), true);
    assert_eq!(hit, Some((high, Point::new(10.0, 10.0))));

    h.comp.place_below(high, low).unwrap();
    let hit = h.comp.surface_at(root, Point::new(30.0, 30.0), true);
    assert_eq!(hit, Some((low, Point::new(20.0, 20.0))));

    assert_eq!(h.comp.extents(root), Rectangle::new(0, 0, 100, 100));
    let found = h.comp.find_first_preorder(root, &mut |_, s| s.current.size == Size::new(50, 50));
    assert_eq!(found, Some(high));
}

#[test]
fn test_destroyed_child_pruned_from_traversal() {
    let mut h = harness();
    let root = h.surface();
    let child = h.surface();
    h.comp.get_subsurface(child, root).unwrap();
    assert_eq!(h.comp.breadth_first(root).len(), 2);

    h.comp.destroy_surface(child);
    assert_eq!(h.comp.breadth_first(root), vec![(root, (0, 0))]);
    assert!(h.comp.surface(root).unwrap().children().is_empty());
}

struct RejectAll;

impl CommitObserver for RejectAll {
    fn pre_commit(&mut self, _surface: SurfaceId, pending: &mut SurfaceState) {
        pending.rejected = true;
    }
}

#[test]
fn test_observer_can_reject() {
    let mut h = harness();
    let id = h.surface();
    h.comp.add_observer(Box::new(RejectAll));
    let (buffer, counters) = shm(4, 4);
    h.comp.attach(id, Some(buffer), 0, 0).unwrap();

    assert_eq!(h.comp.commit(id), Ok(CommitOutcome::Rejected));
    assert!(h.current(id).buffer.is_none());
    assert_eq!(counters.releases.get(), 1);
    assert!(h.committed().is_empty());
}
