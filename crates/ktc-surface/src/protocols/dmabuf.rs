use crate::buffer::{Buffer, BufferKind, ClientBuffer, Pixels};
use crate::region::Size;
use crate::state::State;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::Mutex;
use wayland_protocols::wp::linux_dmabuf::zv1::server::{
    zwp_linux_buffer_params_v1::{self, ZwpLinuxBufferParamsV1},
    zwp_linux_dmabuf_v1::{self, ZwpLinuxDmabufV1},
};
use wayland_server::protocol::wl_buffer::{self, WlBuffer};
use wayland_server::{Dispatch, GlobalDispatch, Resource};

const MAX_PLANES: u32 = 4;

const DMA_BUF_SYNC_READ: u32 = 1 << 0;

#[repr(C)]
struct DmaBufExportSyncFile {
    flags: u32,
    fd: i32,
}

nix::ioctl_readwrite!(dma_buf_export_sync_file, b'b', 2, DmaBufExportSyncFile);

/// Snapshot of the fences a reader of the dmabuf has to wait for, as a
/// sync_file that turns readable once they signal.
fn export_sync_file(dmabuf: &OwnedFd) -> nix::Result<OwnedFd> {
    let mut arg = DmaBufExportSyncFile {
        flags: DMA_BUF_SYNC_READ,
        fd: -1,
    };
    unsafe {
        dma_buf_export_sync_file(dmabuf.as_raw_fd(), &mut arg)?;
        Ok(OwnedFd::from_raw_fd(arg.fd))
    }
}

pub struct DmaBufGlobal;

#[derive(Default)]
pub struct DmaBufParamsData {
    inner: Mutex<DmaBufParamsInner>,
}

#[derive(Default)]
struct DmaBufParamsInner {
    used: bool,
    planes: Vec<DmaBufPlane>,
}

pub struct DmaBufPlane {
    pub fd: OwnedFd,
    pub plane_idx: u32,
    pub offset: u32,
    pub stride: u32,
    pub modifier: u64,
}

/// wl_buffer user data for dmabuf-backed buffers.
pub struct DmaBufBufferData {
    pub width: i32,
    pub height: i32,
    pub format: u32,
}

pub struct DmaBuffer {
    resource: WlBuffer,
    width: i32,
    height: i32,
    format: u32,
    planes: Vec<DmaBufPlane>,
}

impl ClientBuffer for DmaBuffer {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    fn format(&self) -> u32 {
        self.format
    }

    fn kind(&self) -> BufferKind {
        BufferKind::Dmabuf
    }

    fn read_pixels(&self) -> Option<Pixels> {
        None
    }

    fn export_implicit_fence(&self) -> Option<OwnedFd> {
        // all planes of a buffer share the producer's fences
        let plane = self.planes.first()?;
        match export_sync_file(&plane.fd) {
            Ok(fd) => Some(fd),
            Err(e) => {
                log::warn!("[dmabuf] Failed to export sync file: {}", e);
                None
            }
        }
    }

    fn send_release(&self) {
        if self.resource.is_alive() {
            self.resource.release();
        }
    }
}

impl GlobalDispatch<ZwpLinuxDmabufV1, DmaBufGlobal> for State {
    fn bind(
        _state: &mut Self,
        _handle: &wayland_server::DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<ZwpLinuxDmabufV1>,
        _global_data: &DmaBufGlobal,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let dmabuf = data_init.init(resource, ());
        let linear: u64 = drm_fourcc::DrmModifier::Linear.into();

        for format in [drm_fourcc::DrmFourcc::Argb8888, drm_fourcc::DrmFourcc::Xrgb8888] {
            if dmabuf.version() >= 3 {
                dmabuf.modifier(format as u32, (linear >> 32) as u32, (linear & 0xFFFFFFFF) as u32);
            } else {
                dmabuf.format(format as u32);
            }
        }
    }
}

impl Dispatch<ZwpLinuxDmabufV1, ()> for State {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &ZwpLinuxDmabufV1,
        request: zwp_linux_dmabuf_v1::Request,
        _data: &(),
        _dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        if let zwp_linux_dmabuf_v1::Request::CreateParams { params_id } = request {
            data_init.init(params_id, DmaBufParamsData::default());
        }
    }
}

/// Checks a params object is ready to become a buffer and takes its planes.
fn take_planes(
    resource: &ZwpLinuxBufferParamsV1,
    data: &DmaBufParamsData,
    width: i32,
    height: i32,
) -> Result<Vec<DmaBufPlane>, (zwp_linux_buffer_params_v1::Error, String)> {
    use zwp_linux_buffer_params_v1::Error;

    let mut inner = data.inner.lock().unwrap_or_else(|e| e.into_inner());
    if inner.used {
        return Err((Error::AlreadyUsed, "params already used".to_string()));
    }
    inner.used = true;

    let mut planes = std::mem::take(&mut inner.planes);
    if planes.is_empty() {
        return Err((Error::Incomplete, "no planes added".to_string()));
    }
    planes.sort_by_key(|p| p.plane_idx);
    if planes.iter().enumerate().any(|(i, p)| p.plane_idx != i as u32) {
        return Err((Error::Incomplete, "missing plane".to_string()));
    }
    if width <= 0 || height <= 0 {
        return Err((
            Error::InvalidDimensions,
            format!("invalid size {}x{}", width, height),
        ));
    }
    log::trace!("[dmabuf] params {} complete", resource.id());
    Ok(planes)
}

fn register(state: &mut State, buffer: &WlBuffer, width: i32, height: i32, format: u32, planes: Vec<DmaBufPlane>) {
    log::debug!(
        "[dmabuf] Created buffer {}: {}x{} format={:#x} modifier={:#x} planes={}",
        buffer.id(),
        width,
        height,
        format,
        planes[0].modifier,
        planes.len()
    );
    let dmabuf = DmaBuffer {
        resource: buffer.clone(),
        width,
        height,
        format,
        planes,
    };
    state.buffers.insert(buffer.id(), Buffer::new(Box::new(dmabuf)));
}

impl Dispatch<ZwpLinuxBufferParamsV1, DmaBufParamsData> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &ZwpLinuxBufferParamsV1,
        request: zwp_linux_buffer_params_v1::Request,
        data: &DmaBufParamsData,
        dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            zwp_linux_buffer_params_v1::Request::Add {
                fd,
                plane_idx,
                offset,
                stride,
                modifier_hi,
                modifier_lo,
            } => {
                let mut inner = data.inner.lock().unwrap_or_else(|e| e.into_inner());
                if inner.used {
                    resource.post_error(zwp_linux_buffer_params_v1::Error::AlreadyUsed, "params already used");
                    return;
                }
                if plane_idx >= MAX_PLANES {
                    resource.post_error(
                        zwp_linux_buffer_params_v1::Error::PlaneIdx,
                        format!("plane index {} out of bounds", plane_idx),
                    );
                    return;
                }
                if inner.planes.iter().any(|p| p.plane_idx == plane_idx) {
                    resource.post_error(
                        zwp_linux_buffer_params_v1::Error::PlaneSet,
                        format!("plane {} already set", plane_idx),
                    );
                    return;
                }
                inner.planes.push(DmaBufPlane {
                    fd,
                    plane_idx,
                    offset,
                    stride,
                    modifier: ((modifier_hi as u64) << 32) | (modifier_lo as u64),
                });
            }
            zwp_linux_buffer_params_v1::Request::Create {
                width,
                height,
                format,
                ..
            } => {
                let planes = match take_planes(resource, data, width, height) {
                    Ok(planes) => planes,
                    Err((zwp_linux_buffer_params_v1::Error::AlreadyUsed, msg)) => {
                        resource.post_error(zwp_linux_buffer_params_v1::Error::AlreadyUsed, msg);
                        return;
                    }
                    Err((_, msg)) => {
                        log::warn!("[dmabuf] Create failed: {}", msg);
                        resource.failed();
                        return;
                    }
                };

                let Some(client) = resource.client() else {
                    return;
                };
                let buffer_data = DmaBufBufferData { width, height, format };
                match client.create_resource::<WlBuffer, DmaBufBufferData, Self>(dhandle, 1, buffer_data) {
                    Ok(buffer) => {
                        register(state, &buffer, width, height, format, planes);
                        resource.created(&buffer);
                    }
                    Err(e) => {
                        log::error!("[dmabuf] Failed to create wl_buffer: {}", e);
                        resource.failed();
                    }
                }
            }
            zwp_linux_buffer_params_v1::Request::CreateImmed {
                buffer_id,
                width,
                height,
                format,
                ..
            } => {
                let buffer = data_init.init(buffer_id, DmaBufBufferData { width, height, format });
                match take_planes(resource, data, width, height) {
                    Ok(planes) => register(state, &buffer, width, height, format, planes),
                    Err((code, msg)) => resource.post_error(code, msg),
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<WlBuffer, DmaBufBufferData> for State {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &WlBuffer,
        _request: wl_buffer::Request,
        _data: &DmaBufBufferData,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &WlBuffer,
        data: &DmaBufBufferData,
    ) {
        log::trace!("[dmabuf] {} ({}x{}) destroyed", resource.id(), data.width, data.height);
        state.buffers.remove(&resource.id());
    }
}
