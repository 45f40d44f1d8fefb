//! wl_surface.commit: sealing pending state, deciding when it may become
//! current, and what happens when it does.

use std::os::fd::OwnedFd;
use std::rc::Rc;

use super::queue::ReadyToken;
use super::state::{SurfaceState, Updated};
use super::tree;
use super::{Surface, SurfaceId, SurfaceRole};
use crate::buffer::{BufferKind, Texture, TextureContent};
use crate::compositor::{CommitOutcome, Compositor, SurfaceEvent};
use crate::error::{Result, SurfaceError};
use crate::io::Wakeup;
use crate::region::{Rectangle, Region};

enum Readiness {
    /// Wait for the acquire point.
    Acquire,
    /// Wait for the buffer's implicit fence.
    Implicit(OwnedFd),
    Now,
}

impl Compositor {
    pub fn commit(&mut self, id: SurfaceId) -> Result<CommitOutcome> {
        let surface = self.surfaces.get_mut(id).ok_or(SurfaceError::Gone)?;
        surface.committed_since_frame = true;

        let pending = &mut surface.pending;
        pending.clamp_buffer_damage();
        pending.compute_size();
        pending.clamp_damage();

        let mut sync_result = Ok(());
        if let Some(sync_id) = surface.buffer_sync {
            if let Some(sync) = self.buffer_syncs.get_mut(sync_id) {
                sync_result = sync.pre_commit(&mut surface.pending);
            }
        }
        for observer in &mut self.observers {
            observer.pre_commit(id, &mut surface.pending);
        }

        if surface.pending.rejected {
            surface.pending.discard();
            log::debug!("[surface] Commit on {:?} rejected", id);
            sync_result?;
            return Ok(CommitOutcome::Rejected);
        }

        let attached = surface.pending.updated.contains(Updated::BUFFER);
        if attached && surface.pending.buffer.is_none() {
            let cancelled = surface.queue.cancel_all();
            if cancelled > 0 {
                log::debug!("[queue] Null attach on {:?} dropped {} queued commits", id, cancelled);
            }
            let snapshot = surface.pending.seal();
            self.promote(id, snapshot);
            return Ok(CommitOutcome::Applied);
        }

        if !attached {
            if surface.current.has_content() {
                // recommit: same pixels, nothing new to repaint
                surface.current.damage.clear();
                surface.current.buffer_damage.clear();
            }
            let snapshot = surface.pending.seal();
            return Ok(self.apply_or_append(id, snapshot));
        }

        let snapshot = surface.pending.seal();
        if let (Some(buffer), Some(release)) = (&snapshot.buffer, &snapshot.release) {
            if let Some(token) = release.create_release_token() {
                buffer.bind_release(token);
            }
        }
        Ok(self.enqueue(id, snapshot))
    }

    /// Promotes right away when nothing is queued ahead, otherwise queues the
    /// snapshot as already ready so it goes out in order.
    fn apply_or_append(&mut self, id: SurfaceId, snapshot: SurfaceState) -> CommitOutcome {
        let Some(surface) = self.surfaces.get_mut(id) else {
            return CommitOutcome::Rejected;
        };
        if surface.queue.is_empty() {
            self.promote(id, snapshot);
            CommitOutcome::Applied
        } else {
            surface.queue.push(snapshot, true);
            log::trace!("[queue] {:?} queued a ready commit behind {}", id, surface.queue.len() - 1);
            CommitOutcome::Queued
        }
    }

    fn enqueue(&mut self, id: SurfaceId, snapshot: SurfaceState) -> CommitOutcome {
        let readiness = match &snapshot.buffer {
            _ if snapshot.acquire.is_some() => Readiness::Acquire,
            Some(buffer) if buffer.buffer().is_synchronous() => Readiness::Now,
            Some(buffer) => match buffer.buffer().export_implicit_fence() {
                Some(fd) => Readiness::Implicit(fd),
                None => {
                    log::error!("[queue] Buffer on {:?} has no fence to wait on, using it as is", id);
                    Readiness::Now
                }
            },
            None => Readiness::Now,
        };

        let Some(surface) = self.surfaces.get_mut(id) else {
            return CommitOutcome::Rejected;
        };
        let token = ReadyToken {
            surface: id,
            seq: surface.queue.next_seq(),
        };

        match readiness {
            Readiness::Now => self.apply_or_append(id, snapshot),
            Readiness::Implicit(fd) => {
                surface.queue.push(snapshot, false);
                log::trace!("[dmabuf] {:?} waiting on implicit fence", id);
                self.io.do_on_readable(fd, Wakeup::Commit(token));
                CommitOutcome::Queued
            }
            Readiness::Acquire => {
                let Some(acquire) = snapshot.acquire.as_ref() else {
                    return self.apply_or_append(id, snapshot);
                };
                let wakeups = Rc::downgrade(&self.wakeups);
                let waiter = acquire.add_waiter(Box::new(move || {
                    if let Some(wakeups) = wakeups.upgrade() {
                        wakeups.borrow_mut().push_back(token);
                    }
                }));
                let timeline = acquire.weak_timeline();
                let timeline_id = acquire.timeline_id();
                let pollable = waiter.and_then(|_| acquire.export_pollable());

                surface.queue.push(snapshot, false);
                match waiter {
                    Some(waiter) => {
                        surface.queue.set_waiter(token.seq, timeline, waiter);
                        log::trace!("[sync] {:?} waiting on {:?}", id, timeline_id);
                        if let Some(fd) = pollable {
                            self.io.do_on_readable(fd, Wakeup::Timeline(timeline_id));
                        }
                        CommitOutcome::Queued
                    }
                    None => {
                        self.flush(token);
                        CommitOutcome::Applied
                    }
                }
            }
        }
    }

    /// Promotion trigger for one queued snapshot: everything ahead of it goes
    /// first, ready or not, then it, then the ready entries behind it.
    pub(crate) fn flush(&mut self, token: ReadyToken) {
        let Some(surface) = self.surfaces.get_mut(token.surface) else {
            log::debug!("[queue] Wakeup for destroyed {:?}", token.surface);
            return;
        };
        let states = surface.queue.take_through(token.seq);
        if states.is_empty() {
            log::trace!("[queue] Stale wakeup {:?}", token);
            return;
        }
        if states.len() > 1 {
            log::trace!("[queue] {:?} flushing {} commits", token.surface, states.len());
        }
        for state in states {
            self.promote(token.surface, state);
        }
    }

    pub(crate) fn promote(&mut self, id: SurfaceId, snapshot: SurfaceState) {
        let Some(surface) = self.surfaces.get_mut(id) else {
            return;
        };

        let buffer_changed = snapshot.updated.contains(Updated::BUFFER);
        surface.current.update_from(snapshot);
        if buffer_changed {
            update_texture(surface);
        }
        let transform = surface.current.transform;
        if let Some(texture) = surface.current.texture.as_mut() {
            texture.transform = transform;
        }
        if surface.role == SurfaceRole::Cursor {
            refresh_cursor(surface);
        }

        let release_now = surface.role != SurfaceRole::Unassigned
            && surface
                .current
                .buffer
                .as_ref()
                .is_some_and(|b| b.buffer().is_synchronous());
        let children: Vec<SurfaceId> = surface.children.iter().collect();

        for child in children {
            let Some(sub) = self.surfaces.get_mut(child).and_then(|s| s.role.subsurface_mut()) else {
                continue;
            };
            if sub.parent == id {
                if let Some(position) = sub.pending_position.take() {
                    sub.position = position;
                }
            }
        }

        if tree::is_effectively_synced(&self.surfaces, id) {
            log::trace!("[subsurface] {:?} commit waits for its parent", id);
        } else {
            self.notify_committed(id);
        }

        if release_now {
            if let Some(surface) = self.surfaces.get_mut(id) {
                // pixels are in the texture already
                surface.current.buffer = None;
            }
        }
    }

    /// Notifies `root` and every descendant whose commits `root` governs.
    /// Subtrees under a desynchronized subsurface notify on their own.
    fn notify_committed(&mut self, root: SurfaceId) {
        for (id, _) in tree::breadth_first(&mut self.surfaces, root) {
            if id == root || tree::governing_ancestor(&self.surfaces, id) == root {
                self.events.push(SurfaceEvent::Committed(id));
            }
        }
    }
}

fn update_texture(surface: &mut Surface) {
    let current = &mut surface.current;
    let Some(attached) = current.buffer.as_ref() else {
        current.texture = None;
        return;
    };
    let buffer = attached.buffer();
    let content = match buffer.kind() {
        BufferKind::Shm => match buffer.read_pixels() {
            Some(pixels) => TextureContent::Pixels {
                pixels: Rc::new(pixels),
                format: buffer.format(),
            },
            None => {
                log::error!("[shm] Failed to read buffer pixels");
                current.texture = None;
                return;
            }
        },
        BufferKind::Dmabuf => TextureContent::Imported(buffer.clone()),
    };
    current.texture = Some(Texture {
        size: buffer.size(),
        transform: current.transform,
        content,
    });
}

/// Copies the damaged part of the cursor image into the raw pixel cache.
fn refresh_cursor(surface: &mut Surface) {
    let Some(pixels) = surface.current.texture.as_ref().and_then(|t| t.pixels()) else {
        return;
    };
    let bounds = Rectangle::from_size(surface.current.buffer_size);
    let mut damage = surface.current.accumulated_buffer_damage();
    damage.intersect(bounds);

    let cache = &mut surface.cursor_pixels;
    if cache.len() != pixels.data.len() {
        cache.clear();
        cache.resize(pixels.data.len(), 0);
        damage = Region::from_rect(bounds);
    }
    if damage.is_empty() {
        return;
    }

    if damage.rects().len() == 1 {
        cache.copy_from_slice(&pixels.data);
        return;
    }
    for rect in damage.rects() {
        for y in rect.y as usize..rect.y2() as usize {
            let start = y * pixels.stride + rect.x as usize * 4;
            let end = start + rect.width as usize * 4;
            if end > cache.len() {
                break;
            }
            cache[start..end].copy_from_slice(&pixels.data[start..end]);
        }
    }
}
