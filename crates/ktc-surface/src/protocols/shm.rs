use std::cell::{Cell, RefCell};
use std::os::fd::{AsRawFd, OwnedFd};
use std::ptr::NonNull;
use std::rc::Rc;

use drm_fourcc::DrmFourcc;
use wayland_server::protocol::{
    wl_buffer::{self, WlBuffer},
    wl_shm::{self, WlShm},
    wl_shm_pool::{self, WlShmPool},
};
use wayland_server::{Dispatch, GlobalDispatch, Resource, WEnum};

use crate::buffer::{Buffer, BufferKind, ClientBuffer, Pixels};
use crate::region::Size;
use crate::state::State;

struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

/// A client's shared memory pool, mapped read-only on first use.
pub struct ShmPool {
    fd: OwnedFd,
    size: Cell<usize>,
    map: RefCell<Option<Mapping>>,
}

impl ShmPool {
    pub fn new(fd: OwnedFd, size: usize) -> Rc<Self> {
        Rc::new(Self {
            fd,
            size: Cell::new(size),
            map: RefCell::new(None),
        })
    }

    pub fn size(&self) -> usize {
        self.size.get()
    }

    /// Pools only grow; the old mapping is dropped and redone lazily.
    pub fn resize(&self, size: usize) {
        if size > self.size.get() {
            self.map.borrow_mut().take();
            self.size.set(size);
        }
    }

    /// Copies `len` bytes starting at `offset` out of the pool.
    pub fn read(&self, offset: usize, len: usize) -> Option<Vec<u8>> {
        let end = offset.checked_add(len)?;
        if end > self.size.get() {
            return None;
        }

        let mut map = self.map.borrow_mut();
        if map.is_none() {
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    self.size.get(),
                    libc::PROT_READ,
                    libc::MAP_SHARED,
                    self.fd.as_raw_fd(),
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                log::error!("[shm] mmap of {} bytes failed: {}", self.size.get(), std::io::Error::last_os_error());
                return None;
            }
            *map = Some(Mapping {
                ptr: NonNull::new(ptr as *mut u8)?,
                len: self.size.get(),
            });
        }

        let mapping = map.as_ref()?;
        let bytes = unsafe { std::slice::from_raw_parts(mapping.ptr.as_ptr().add(offset), len) };
        Some(bytes.to_vec())
    }
}

/// A wl_buffer carved out of an shm pool.
pub struct ShmBuffer {
    resource: WlBuffer,
    pool: Rc<ShmPool>,
    offset: usize,
    width: i32,
    height: i32,
    stride: usize,
    format: wl_shm::Format,
}

impl ClientBuffer for ShmBuffer {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    fn format(&self) -> u32 {
        match self.format {
            wl_shm::Format::Xrgb8888 => DrmFourcc::Xrgb8888 as u32,
            _ => DrmFourcc::Argb8888 as u32,
        }
    }

    fn kind(&self) -> BufferKind {
        BufferKind::Shm
    }

    fn read_pixels(&self) -> Option<Pixels> {
        let data = self.pool.read(self.offset, self.stride * self.height as usize)?;
        Some(Pixels {
            data,
            stride: self.stride,
        })
    }

    fn export_implicit_fence(&self) -> Option<OwnedFd> {
        None
    }

    fn send_release(&self) {
        if self.resource.is_alive() {
            self.resource.release();
        }
    }
}

impl GlobalDispatch<WlShm, ()> for State {
    fn bind(
        _state: &mut Self,
        _handle: &wayland_server::DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<WlShm>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let shm = data_init.init(resource, ());
        shm.format(wl_shm::Format::Argb8888);
        shm.format(wl_shm::Format::Xrgb8888);
    }
}

impl Dispatch<WlShm, ()> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &WlShm,
        request: wl_shm::Request,
        _data: &(),
        _dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        if let wl_shm::Request::CreatePool { id, fd, size } = request {
            let pool = data_init.init(id, ());
            if size <= 0 {
                resource.post_error(wl_shm::Error::InvalidStride, format!("invalid pool size {}", size));
                return;
            }
            log::debug!("[shm] Pool {} of {} bytes", pool.id(), size);
            state.shm_pools.insert(pool.id(), ShmPool::new(fd, size as usize));
        }
    }
}

impl Dispatch<WlShmPool, ()> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &WlShmPool,
        request: wl_shm_pool::Request,
        _data: &(),
        _dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_shm_pool::Request::CreateBuffer {
                id,
                offset,
                width,
                height,
                stride,
                format,
            } => {
                let buffer = data_init.init(id, ());
                let Some(pool) = state.shm_pools.get(&resource.id()).cloned() else {
                    return;
                };

                let format = match format {
                    WEnum::Value(f @ (wl_shm::Format::Argb8888 | wl_shm::Format::Xrgb8888)) => f,
                    _ => {
                        resource.post_error(wl_shm::Error::InvalidFormat, "unsupported format");
                        return;
                    }
                };
                let fits = offset >= 0
                    && width > 0
                    && height > 0
                    && stride >= width.saturating_mul(4)
                    && (offset as i64 + stride as i64 * height as i64) <= pool.size() as i64;
                if !fits {
                    resource.post_error(
                        wl_shm::Error::InvalidStride,
                        format!("{}x{} stride {} at {} does not fit the pool", width, height, stride, offset),
                    );
                    return;
                }

                let shm_buffer = ShmBuffer {
                    resource: buffer.clone(),
                    pool,
                    offset: offset as usize,
                    width,
                    height,
                    stride: stride as usize,
                    format,
                };
                state.buffers.insert(buffer.id(), Buffer::new(Box::new(shm_buffer)));
            }
            wl_shm_pool::Request::Resize { size } => {
                let Some(pool) = state.shm_pools.get(&resource.id()) else {
                    return;
                };
                if size < 0 || (size as usize) < pool.size() {
                    resource.post_error(wl_shm::Error::InvalidStride, "pools cannot shrink");
                    return;
                }
                pool.resize(size as usize);
                log::debug!("[shm] Pool {} resized to {} bytes", resource.id(), size);
            }
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &WlShmPool,
        _data: &(),
    ) {
        // buffers keep the mapping alive
        state.shm_pools.remove(&resource.id());
    }
}

impl Dispatch<WlBuffer, ()> for State {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &WlBuffer,
        _request: wl_buffer::Request,
        _data: &(),
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &WlBuffer,
        _data: &(),
    ) {
        state.buffers.remove(&resource.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memfd(contents: &[u8]) -> OwnedFd {
        use std::io::Write;
        use std::os::fd::FromRawFd;

        let fd = unsafe { libc::memfd_create(c"shm-test".as_ptr(), libc::MFD_CLOEXEC) };
        assert!(fd >= 0);
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        let mut file = std::fs::File::from(fd.try_clone().unwrap());
        file.write_all(contents).unwrap();
        fd
    }

    #[test]
    fn test_pool_read_bounds() {
        let pool = ShmPool::new(memfd(&[1, 2, 3, 4, 5, 6, 7, 8]), 8);
        assert_eq!(pool.read(2, 4), Some(vec![3, 4, 5, 6]));
        assert_eq!(pool.read(6, 4), None);
        assert_eq!(pool.read(usize::MAX, 2), None);
    }

    #[test]
    fn test_pool_only_grows() {
        let pool = ShmPool::new(memfd(&[0; 16]), 8);
        pool.resize(4);
        assert_eq!(pool.size(), 8);
        pool.resize(16);
        assert_eq!(pool.size(), 16);
        assert_eq!(pool.read(8, 8), Some(vec![0; 8]));
    }
}
