//! The event-loop side of readiness: "tell me when this fd is readable".

use std::os::fd::OwnedFd;

use calloop::generic::Generic;
use calloop::{Interest, LoopHandle, Mode, PostAction};

use crate::compositor::Compositor;
use crate::surface::ReadyToken;
use crate::sync::TimelineId;

/// What a readable fd means once it fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wakeup {
    /// A timeline may have advanced; run its ready waiters.
    Timeline(TimelineId),
    /// The implicit fence of a queued buffer signaled.
    Commit(ReadyToken),
}

pub trait ReadinessIo {
    /// Arranges for `Compositor::on_readable(wakeup)` to run once `fd`
    /// becomes readable. Owns `fd` until then.
    fn do_on_readable(&mut self, fd: OwnedFd, wakeup: Wakeup);
}

/// One-shot calloop sources on the loop that owns the compositor.
pub struct CalloopIo<D: 'static> {
    handle: LoopHandle<'static, D>,
}

impl<D: 'static> CalloopIo<D> {
    pub fn new(handle: LoopHandle<'static, D>) -> Self {
        Self { handle }
    }
}

impl<D: AsMut<Compositor> + 'static> ReadinessIo for CalloopIo<D> {
    fn do_on_readable(&mut self, fd: OwnedFd, wakeup: Wakeup) {
        let source = Generic::new(fd, Interest::READ, Mode::OneShot);
        let inserted = self.handle.insert_source(source, move |_, _, data: &mut D| {
            data.as_mut().on_readable(wakeup);
            Ok(PostAction::Remove)
        });
        if let Err(e) = inserted {
            log::error!("[sync] Failed to watch fence fd for {:?}: {}", wakeup, e.error);
        }
    }
}
