use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

use wayland_protocols::wp::linux_drm_syncobj::v1::server::wp_linux_drm_syncobj_surface_v1::WpLinuxDrmSyncobjSurfaceV1;
use wayland_server::backend::protocol::ProtocolError;
use wayland_server::backend::ObjectId;
use wayland_server::{DisplayHandle, Resource};

use crate::buffer::Buffer;
use crate::compositor::{Compositor, SessionId};
use crate::error::{CoreError, SyncError, DISPLAY_NO_MEMORY};
use crate::protocols::shm::ShmPool;
use crate::surface::SurfaceId;

/// Everything the protocol handlers need: the core, plus the maps from
/// wayland objects to the things that cannot live in resource user data.
pub struct State {
    pub compositor: Compositor,

    /// wl_compositor bindings and the session each one created.
    pub sessions: HashMap<ObjectId, SessionId>,

    pub shm_pools: HashMap<ObjectId, Rc<ShmPool>>,
    /// Client buffers by wl_buffer, shm and dmabuf alike.
    pub buffers: HashMap<ObjectId, Rc<Buffer>>,

    /// Explicit sync objects by surface, for errors raised at commit time.
    pub sync_surfaces: HashMap<SurfaceId, WpLinuxDrmSyncobjSurfaceV1>,

    started: Instant,
}

impl State {
    pub fn new(compositor: Compositor) -> Self {
        Self {
            compositor,
            sessions: HashMap::new(),
            shm_pools: HashMap::new(),
            buffers: HashMap::new(),
            sync_surfaces: HashMap::new(),
            started: Instant::now(),
        }
    }

    /// Milliseconds since startup, for frame callbacks.
    pub fn time_ms(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    /// Posts `err` on `resource`, or kills the client with
    /// wl_display.no_memory when an object limit was hit.
    pub fn report<R: Resource>(&self, dh: &DisplayHandle, resource: &R, err: CoreError) {
        if err.is_no_memory() {
            post_no_memory(dh, resource, &err.to_string());
            return;
        }
        log::warn!("[protocol] {}: {}", resource.id(), err);
        resource.post_error(err.code(), err.to_string());
    }

    /// Commit errors from explicit sync belong to the syncobj surface.
    pub fn report_commit<R: Resource>(&self, dh: &DisplayHandle, surface: SurfaceId, resource: &R, err: CoreError) {
        if let CoreError::Sync(e) = &err {
            if let Some(sync) = self.sync_surfaces.get(&surface) {
                log::warn!("[sync] {}: {}", sync.id(), e);
                sync.post_error(e.code(), e.to_string());
                return;
            }
            if *e == SyncError::NoSurface {
                return;
            }
        }
        self.report(dh, resource, err);
    }
}

pub fn post_no_memory<R: Resource>(dh: &DisplayHandle, resource: &R, message: &str) {
    log::error!("[registry] {} ran out of objects: {}", resource.id(), message);
    let Some(client) = resource.client() else {
        return;
    };
    client.kill(
        dh,
        ProtocolError {
            code: DISPLAY_NO_MEMORY,
            object_id: 1,
            object_interface: "wl_display".to_string(),
            message: message.to_string(),
        },
    );
}
