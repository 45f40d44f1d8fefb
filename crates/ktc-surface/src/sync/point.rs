//! Fence points: a numeric point on a timeline the point does not own.

use std::cell::{Cell, RefCell};
use std::os::fd::OwnedFd;
use std::rc::{Rc, Weak};

use super::timeline::{SharedTimeline, Timeline, TimelineId, WaiterCallback, WaiterId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointRole {
    Acquire,
    Release,
}

pub struct SyncPoint {
    timeline_id: TimelineId,
    timeline: Weak<RefCell<Timeline>>,
    point: u64,
    role: PointRole,
    release_taken: Cell<bool>,
}

impl SyncPoint {
    pub fn new(timeline_id: TimelineId, timeline: Option<&SharedTimeline>, point: u64, role: PointRole) -> Self {
        Self {
            timeline_id,
            timeline: timeline.map(Rc::downgrade).unwrap_or_default(),
            point,
            role,
            release_taken: Cell::new(false),
        }
    }

    pub fn point(&self) -> u64 {
        self.point
    }

    pub fn role(&self) -> PointRole {
        self.role
    }

    pub fn timeline_id(&self) -> TimelineId {
        self.timeline_id
    }

    pub fn expired(&self) -> bool {
        self.timeline.strong_count() == 0
    }

    pub(crate) fn weak_timeline(&self) -> Weak<RefCell<Timeline>> {
        self.timeline.clone()
    }

    fn live(&self, what: &str) -> Option<SharedTimeline> {
        let timeline = self.timeline.upgrade();
        if timeline.is_none() {
            log::error!(
                "[sync] {} on expired {:?} point {} (timeline {:?})",
                what,
                self.role,
                self.point,
                self.timeline_id
            );
        }
        timeline
    }

    pub fn same_timeline(&self, other: &SyncPoint) -> bool {
        !self.expired() && Weak::ptr_eq(&self.timeline, &other.timeline)
    }

    /// Runs `callback` once the timeline reaches this point. `None` when the
    /// timeline is gone, in which case the callback is dropped unrun.
    pub fn add_waiter(&self, callback: WaiterCallback) -> Option<WaiterId> {
        let timeline = self.live("add_waiter")?;
        let id = timeline.borrow_mut().add_waiter(self.point, callback);
        Some(id)
    }

    pub fn export_pollable(&self) -> Option<OwnedFd> {
        let timeline = self.live("export_pollable")?;
        let fd = timeline.borrow().export_pollable(self.point);
        fd
    }

    pub fn signal(&self) -> bool {
        match self.live("signal") {
            Some(timeline) => timeline.borrow_mut().signal(self.point),
            None => false,
        }
    }

    pub fn is_reached(&self) -> bool {
        self.timeline
            .upgrade()
            .is_some_and(|t| t.borrow().is_reached(self.point))
    }

    /// Hands out the one-shot token that signals this release point. A
    /// second call for the same point is a misuse and yields nothing.
    pub fn create_release_token(&self) -> Option<ReleaseToken> {
        if self.role != PointRole::Release {
            log::error!("[sync] release token requested for an acquire point");
            return None;
        }
        if self.release_taken.replace(true) {
            log::error!("[sync] release token for point {} already created", self.point);
            return None;
        }
        self.live("create_release_token")?;
        Some(ReleaseToken {
            timeline: self.timeline.clone(),
            point: self.point,
            signaled: false,
        })
    }
}

impl std::fmt::Debug for SyncPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncPoint")
            .field("timeline", &self.timeline_id)
            .field("point", &self.point)
            .field("role", &self.role)
            .field("expired", &self.expired())
            .finish()
    }
}

/// Signals a release point exactly once: explicitly, or when dropped.
pub struct ReleaseToken {
    timeline: Weak<RefCell<Timeline>>,
    point: u64,
    signaled: bool,
}

impl ReleaseToken {
    pub fn point(&self) -> u64 {
        self.point
    }

    pub fn signal(&mut self) {
        if self.signaled {
            return;
        }
        self.signaled = true;
        match self.timeline.upgrade() {
            Some(timeline) => {
                log::trace!("[sync] Releasing point {}", self.point);
                timeline.borrow_mut().signal(self.point);
            }
            None => log::debug!("[sync] Release timeline gone before point {}", self.point),
        }
    }
}

impl Drop for ReleaseToken {
    fn drop(&mut self) {
        self.signal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::sync::timeline::SoftwareTimeline;
    use std::cell::Cell;

    fn timeline() -> (TimelineId, SharedTimeline) {
        let mut reg: Registry<SharedTimeline> = Registry::new("timeline", 4);
        let tl = Rc::new(RefCell::new(Timeline::new(Box::new(SoftwareTimeline::default()))));
        let id = reg.insert(tl.clone()).unwrap();
        (id, tl)
    }

    #[test]
    fn test_expired_point_is_a_safe_noop() {
        let (id, tl) = timeline();
        let point = SyncPoint::new(id, Some(&tl), 3, PointRole::Acquire);
        drop(tl);

        assert!(point.expired());
        assert!(!point.signal());
        assert!(point.export_pollable().is_none());
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        assert!(point.add_waiter(Box::new(move || h.set(1))).is_none());
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_release_token_signals_once_on_drop() {
        let (id, tl) = timeline();
        let point = SyncPoint::new(id, Some(&tl), 9, PointRole::Release);

        let token = point.create_release_token().unwrap();
        assert!(!tl.borrow().is_reached(9));
        drop(token);
        assert_eq!(tl.borrow().current_point(), Some(9));
    }

    #[test]
    fn test_second_release_token_is_refused() {
        let (id, tl) = timeline();
        let point = SyncPoint::new(id, Some(&tl), 1, PointRole::Release);
        let _first = point.create_release_token().unwrap();
        assert!(point.create_release_token().is_none());

        let acquire = SyncPoint::new(id, Some(&tl), 1, PointRole::Acquire);
        assert!(acquire.create_release_token().is_none());
    }

    #[test]
    fn test_same_timeline() {
        let (id, tl) = timeline();
        let (other_id, other) = timeline();
        let a = SyncPoint::new(id, Some(&tl), 1, PointRole::Acquire);
        let b = SyncPoint::new(id, Some(&tl), 2, PointRole::Release);
        let c = SyncPoint::new(other_id, Some(&other), 2, PointRole::Release);
        assert!(a.same_timeline(&b));
        assert!(!a.same_timeline(&c));
    }
}
