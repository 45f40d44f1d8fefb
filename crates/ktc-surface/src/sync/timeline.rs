//! Timelines: monotonically signaled counters backed by an imported fence
//! object, plus the waiter list that turns "point reached" into callbacks.

use std::cell::RefCell;
use std::io;
use std::os::fd::OwnedFd;
use std::rc::Rc;

use crate::registry::Id;

pub type SharedTimeline = Rc<RefCell<Timeline>>;
pub type TimelineId = Id<SharedTimeline>;

/// The fence mechanism behind a timeline.
pub trait TimelineBackend {
    /// Advances the timeline to at least `point`.
    fn signal(&mut self, point: u64) -> io::Result<()>;

    /// Highest point known to be signaled.
    fn query(&self) -> io::Result<u64>;

    /// A handle that becomes readable once `point` is reached, if the backend
    /// can produce one. Backends without one are polled on every dispatch.
    fn pollable(&self, point: u64) -> io::Result<Option<OwnedFd>>;
}

/// Adopts client supplied fence descriptors.
pub trait TimelineImporter {
    fn import(&self, fd: OwnedFd) -> io::Result<Box<dyn TimelineBackend>>;

    fn name(&self) -> &'static str;
}

pub type WaiterCallback = Box<dyn FnOnce()>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WaiterId(u64);

struct Waiter {
    id: WaiterId,
    point: u64,
    callback: WaiterCallback,
}

pub struct Timeline {
    backend: Box<dyn TimelineBackend>,
    waiters: Vec<Waiter>,
    next_waiter: u64,
}

impl Timeline {
    pub fn new(backend: Box<dyn TimelineBackend>) -> Self {
        Self {
            backend,
            waiters: Vec::new(),
            next_waiter: 0,
        }
    }

    pub fn import(importer: &dyn TimelineImporter, fd: OwnedFd) -> io::Result<Self> {
        importer.import(fd).map(Self::new)
    }

    pub fn signal(&mut self, point: u64) -> bool {
        match self.backend.signal(point) {
            Ok(()) => true,
            Err(e) => {
                log::error!("[sync] Failed to signal timeline point {}: {}", point, e);
                false
            }
        }
    }

    pub fn current_point(&self) -> Option<u64> {
        match self.backend.query() {
            Ok(point) => Some(point),
            Err(e) => {
                log::error!("[sync] Failed to query timeline: {}", e);
                None
            }
        }
    }

    pub fn is_reached(&self, point: u64) -> bool {
        self.current_point().is_some_and(|current| current >= point)
    }

    /// Registers `callback` to run once the timeline reaches `point`. The
    /// callback never runs from inside this call; `take_ready` hands it out
    /// on a later dispatch.
    pub fn add_waiter(&mut self, point: u64, callback: WaiterCallback) -> WaiterId {
        let id = WaiterId(self.next_waiter);
        self.next_waiter += 1;
        self.waiters.push(Waiter { id, point, callback });
        id
    }

    pub fn export_pollable(&self, point: u64) -> Option<OwnedFd> {
        match self.backend.pollable(point) {
            Ok(fd) => fd,
            Err(e) => {
                log::error!("[sync] Failed to export pollable for point {}: {}", point, e);
                None
            }
        }
    }

    pub fn remove_waiter(&mut self, id: WaiterId) -> bool {
        let before = self.waiters.len();
        self.waiters.retain(|w| w.id != id);
        before != self.waiters.len()
    }

    /// Drops every outstanding callback without running it.
    pub fn remove_all_waiters(&mut self) {
        if !self.waiters.is_empty() {
            log::debug!("[sync] Cancelling {} timeline waiters", self.waiters.len());
        }
        self.waiters.clear();
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Detaches the callbacks whose point has been reached, in registration
    /// order. The caller runs them after releasing its borrow of the timeline.
    pub fn take_ready(&mut self) -> Vec<WaiterCallback> {
        if self.waiters.is_empty() {
            return Vec::new();
        }
        let Some(current) = self.current_point() else {
            return Vec::new();
        };

        let mut ready = Vec::new();
        let mut waiting = Vec::with_capacity(self.waiters.len());
        for waiter in self.waiters.drain(..) {
            if waiter.point <= current {
                ready.push(waiter.callback);
            } else {
                waiting.push(waiter);
            }
        }
        self.waiters = waiting;
        ready
    }
}

/// In-process timeline: a plain max counter. Used when no DRM device with
/// timeline syncobj support is available, and by tests.
#[derive(Debug, Default)]
pub struct SoftwareTimeline {
    value: u64,
    _fd: Option<OwnedFd>,
}

impl TimelineBackend for SoftwareTimeline {
    fn signal(&mut self, point: u64) -> io::Result<()> {
        self.value = self.value.max(point);
        Ok(())
    }

    fn query(&self) -> io::Result<u64> {
        Ok(self.value)
    }

    fn pollable(&self, _point: u64) -> io::Result<Option<OwnedFd>> {
        Ok(None)
    }
}

#[derive(Debug, Default)]
pub struct SoftwareImporter;

impl TimelineImporter for SoftwareImporter {
    fn import(&self, fd: OwnedFd) -> io::Result<Box<dyn TimelineBackend>> {
        Ok(Box::new(SoftwareTimeline {
            value: 0,
            _fd: Some(fd),
        }))
    }

    fn name(&self) -> &'static str {
        "software"
    }
}

/// Splits the wire encoding of a 64 bit point, high half first.
pub fn point_from_halves(hi: u32, lo: u32) -> u64 {
    ((hi as u64) << 32) | lo as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn software() -> Timeline {
        Timeline::new(Box::new(SoftwareTimeline::default()))
    }

    fn counter(hits: &Rc<Cell<u32>>) -> WaiterCallback {
        let hits = hits.clone();
        Box::new(move || hits.set(hits.get() + 1))
    }

    #[test]
    fn test_signal_is_a_max() {
        let mut tl = software();
        tl.signal(10);
        tl.signal(4);
        assert_eq!(tl.current_point(), Some(10));
        assert!(tl.is_reached(10));
        assert!(!tl.is_reached(11));
    }

    #[test]
    fn test_waiter_fires_once_and_not_early() {
        let mut tl = software();
        let hits = Rc::new(Cell::new(0));
        tl.add_waiter(5, counter(&hits));

        tl.signal(4);
        assert!(tl.take_ready().is_empty());

        tl.signal(5);
        for cb in tl.take_ready() {
            cb();
        }
        assert_eq!(hits.get(), 1);
        assert!(tl.take_ready().is_empty());
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_add_waiter_never_runs_inline() {
        let mut tl = software();
        tl.signal(100);
        let hits = Rc::new(Cell::new(0));
        tl.add_waiter(1, counter(&hits));
        assert_eq!(hits.get(), 0);
        assert_eq!(tl.take_ready().len(), 1);
    }

    #[test]
    fn test_remove_waiters() {
        let mut tl = software();
        let hits = Rc::new(Cell::new(0));
        let a = tl.add_waiter(1, counter(&hits));
        tl.add_waiter(2, counter(&hits));
        tl.add_waiter(3, counter(&hits));

        assert!(tl.remove_waiter(a));
        assert!(!tl.remove_waiter(a));
        assert_eq!(tl.waiter_count(), 2);

        tl.remove_all_waiters();
        tl.signal(10);
        assert!(tl.take_ready().is_empty());
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_point_from_halves() {
        assert_eq!(point_from_halves(0, 7), 7);
        assert_eq!(point_from_halves(1, 0), 1 << 32);
        assert_eq!(point_from_halves(0xdead, 0xbeef), 0x0000_dead_0000_beef);
    }

    #[test]
    fn test_software_import() {
        let fd: OwnedFd = std::fs::File::open("/dev/null").unwrap().into();
        let tl = Timeline::import(&SoftwareImporter, fd).unwrap();
        assert_eq!(tl.current_point(), Some(0));
        assert!(tl.export_pollable(1).is_none());
    }
}
