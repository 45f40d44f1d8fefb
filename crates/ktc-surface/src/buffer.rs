//! Client buffers as seen by the surface core.
//!
//! A `Buffer` is shared by everything that refers to one `wl_buffer`; an
//! `AttachedBuffer` is one attach of it, held by surface states. The client
//! is told the buffer is free again when the last attachment goes away.

use std::cell::{Cell, RefCell};
use std::os::fd::OwnedFd;
use std::rc::Rc;

use crate::region::Size;
use crate::surface::Transform;
use crate::sync::ReleaseToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    /// CPU addressable, always readable.
    Shm,
    /// GPU importable, possibly still being written.
    Dmabuf,
}

/// A CPU copy of buffer contents, rows `stride` bytes apart.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pixels {
    pub data: Vec<u8>,
    pub stride: usize,
}

pub trait ClientBuffer {
    fn size(&self) -> Size;

    /// DRM fourcc.
    fn format(&self) -> u32;

    fn kind(&self) -> BufferKind;

    fn read_pixels(&self) -> Option<Pixels>;

    /// Pollable fence that becomes readable when pending GPU writes finish.
    fn export_implicit_fence(&self) -> Option<OwnedFd>;

    fn send_release(&self);
}

pub struct Buffer {
    inner: Box<dyn ClientBuffer>,
    attachments: Cell<usize>,
}

impl Buffer {
    pub fn new(inner: Box<dyn ClientBuffer>) -> Rc<Self> {
        Rc::new(Self {
            inner,
            attachments: Cell::new(0),
        })
    }

    pub fn size(&self) -> Size {
        self.inner.size()
    }

    pub fn format(&self) -> u32 {
        self.inner.format()
    }

    pub fn kind(&self) -> BufferKind {
        self.inner.kind()
    }

    pub fn is_synchronous(&self) -> bool {
        self.kind() == BufferKind::Shm
    }

    pub fn read_pixels(&self) -> Option<Pixels> {
        self.inner.read_pixels()
    }

    pub fn export_implicit_fence(&self) -> Option<OwnedFd> {
        self.inner.export_implicit_fence()
    }

    pub fn is_attached(&self) -> bool {
        self.attachments.get() > 0
    }
}

/// One attach of a buffer, shared by the surface states that carry it and
/// by whoever is sampling it.
pub struct AttachedBuffer {
    buffer: Rc<Buffer>,
    release: RefCell<Option<ReleaseToken>>,
}

pub type BufferRef = Rc<AttachedBuffer>;

impl AttachedBuffer {
    pub fn new(buffer: Rc<Buffer>) -> BufferRef {
        buffer.attachments.set(buffer.attachments.get() + 1);
        Rc::new(Self {
            buffer,
            release: RefCell::new(None),
        })
    }

    pub fn buffer(&self) -> &Rc<Buffer> {
        &self.buffer
    }

    pub fn bind_release(&self, token: ReleaseToken) {
        let mut slot = self.release.borrow_mut();
        if slot.is_some() {
            log::error!("[surface] buffer already carries a release token");
            return;
        }
        *slot = Some(token);
    }

    pub fn has_release(&self) -> bool {
        self.release.borrow().is_some()
    }
}

impl Drop for AttachedBuffer {
    fn drop(&mut self) {
        if let Some(mut token) = self.release.get_mut().take() {
            token.signal();
        }
        let left = self.buffer.attachments.get().saturating_sub(1);
        self.buffer.attachments.set(left);
        if left == 0 {
            self.buffer.inner.send_release();
        }
    }
}

#[derive(Clone)]
pub enum TextureContent {
    Pixels { pixels: Rc<Pixels>, format: u32 },
    Imported(Rc<Buffer>),
}

/// What the renderer samples for a surface.
#[derive(Clone)]
pub struct Texture {
    pub size: Size,
    pub transform: Transform,
    pub content: TextureContent,
}

impl Texture {
    pub fn pixels(&self) -> Option<&Pixels> {
        match &self.content {
            TextureContent::Pixels { pixels, .. } => Some(pixels),
            TextureContent::Imported(_) => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    #[derive(Default)]
    pub struct Counters {
        pub releases: Cell<u32>,
        pub fence_exports: Cell<u32>,
    }

    pub struct FakeBuffer {
        pub size: Size,
        pub kind: BufferKind,
        pub fill: u8,
        pub fence: RefCell<Option<OwnedFd>>,
        pub counters: Rc<Counters>,
    }

    impl ClientBuffer for FakeBuffer {
        fn size(&self) -> Size {
            self.size
        }

        fn format(&self) -> u32 {
            drm_fourcc::DrmFourcc::Argb8888 as u32
        }

        fn kind(&self) -> BufferKind {
            self.kind
        }

        fn read_pixels(&self) -> Option<Pixels> {
            if self.kind != BufferKind::Shm {
                return None;
            }
            let stride = self.size.width as usize * 4;
            Some(Pixels {
                data: vec![self.fill; stride * self.size.height as usize],
                stride,
            })
        }

        fn export_implicit_fence(&self) -> Option<OwnedFd> {
            self.counters.fence_exports.set(self.counters.fence_exports.get() + 1);
            self.fence.borrow_mut().take()
        }

        fn send_release(&self) {
            self.counters.releases.set(self.counters.releases.get() + 1);
        }
    }

    pub fn shm(width: i32, height: i32) -> (Rc<Buffer>, Rc<Counters>) {
        fake(width, height, BufferKind::Shm, None)
    }

    pub fn dmabuf(width: i32, height: i32, fence: Option<OwnedFd>) -> (Rc<Buffer>, Rc<Counters>) {
        fake(width, height, BufferKind::Dmabuf, fence)
    }

    fn fake(width: i32, height: i32, kind: BufferKind, fence: Option<OwnedFd>) -> (Rc<Buffer>, Rc<Counters>) {
        let counters = Rc::new(Counters::default());
        let buffer = Buffer::new(Box::new(FakeBuffer {
            size: Size::new(width, height),
            kind,
            fill: 0xab,
            fence: RefCell::new(fence),
            counters: counters.clone(),
        }));
        (buffer, counters)
    }

    pub fn dev_null() -> OwnedFd {
        std::fs::File::open("/dev/null")
            .expect("open /dev/null")
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_release_sent_when_last_attachment_drops() {
        let (buffer, counters) = shm(4, 4);
        let first = AttachedBuffer::new(buffer.clone());
        let second = AttachedBuffer::new(buffer.clone());
        let shared = first.clone();

        drop(first);
        assert_eq!(counters.releases.get(), 0);
        drop(second);
        assert_eq!(counters.releases.get(), 0);
        assert!(buffer.is_attached());
        drop(shared);
        assert_eq!(counters.releases.get(), 1);
        assert!(!buffer.is_attached());
    }

    #[test]
    fn test_kind() {
        let (buffer, _) = dmabuf(2, 2, None);
        assert!(!buffer.is_synchronous());
        assert!(buffer.read_pixels().is_none());
        let (buffer, _) = shm(2, 3);
        assert!(buffer.is_synchronous());
        assert_eq!(buffer.read_pixels().map(|p| p.data.len()), Some(2 * 3 * 4));
    }
}
