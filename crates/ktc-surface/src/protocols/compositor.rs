use wayland_server::protocol::{
    wl_callback::{self, WlCallback},
    wl_compositor::{self, WlCompositor},
    wl_region::{self, WlRegion},
    wl_surface::{self, WlSurface},
};
use wayland_server::{Dispatch, GlobalDispatch, Resource, WEnum};

use crate::compositor::RegionId;
use crate::region::Rectangle;
use crate::state::{post_no_memory, State};
use crate::surface::{FrameCallback, SurfaceId};

/// Surface id carried by a wl_surface, or one that never resolves.
pub fn surface_id(surface: &WlSurface) -> SurfaceId {
    surface.data::<SurfaceId>().copied().unwrap_or_else(SurfaceId::dangling)
}

fn region_id(region: &WlRegion) -> RegionId {
    region.data::<RegionId>().copied().unwrap_or_else(RegionId::dangling)
}

/// wl_surface.frame, answered with wl_callback.done.
pub struct FrameDone(pub WlCallback);

impl FrameCallback for FrameDone {
    fn done(self: Box<Self>, time_ms: u32) {
        if self.0.is_alive() {
            self.0.done(time_ms);
        }
    }
}

impl GlobalDispatch<WlCompositor, ()> for State {
    fn bind(
        state: &mut Self,
        handle: &wayland_server::DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<WlCompositor>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let compositor = data_init.init(resource, ());
        match state.compositor.bind_session(compositor.version()) {
            Ok(session) => {
                state.sessions.insert(compositor.id(), session);
            }
            Err(e) => post_no_memory(handle, &compositor, &e.to_string()),
        }
    }
}

impl Dispatch<WlCompositor, ()> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &WlCompositor,
        request: wl_compositor::Request,
        _data: &(),
        dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_compositor::Request::CreateSurface { id } => {
                let created = match state.sessions.get(&resource.id()) {
                    Some(&session) => state.compositor.create_surface(session),
                    None => Ok(SurfaceId::dangling()),
                };
                match created {
                    Ok(surface) => {
                        data_init.init(id, surface);
                    }
                    Err(e) => {
                        data_init.init(id, SurfaceId::dangling());
                        state.report(dhandle, resource, e);
                    }
                }
            }
            wl_compositor::Request::CreateRegion { id } => match state.compositor.create_region() {
                Ok(region) => {
                    data_init.init(id, region);
                }
                Err(e) => {
                    data_init.init(id, RegionId::dangling());
                    state.report(dhandle, resource, e);
                }
            },
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &WlCompositor,
        _data: &(),
    ) {
        if let Some(session) = state.sessions.remove(&resource.id()) {
            state.compositor.destroy_session(session);
        }
    }
}

impl Dispatch<WlSurface, SurfaceId> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &WlSurface,
        request: wl_surface::Request,
        data: &SurfaceId,
        dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let id = *data;
        let result = match request {
            wl_surface::Request::Attach { buffer, x, y } => {
                let buffer = match buffer {
                    Some(b) => match state.buffers.get(&b.id()) {
                        Some(buffer) => Some(buffer.clone()),
                        None => {
                            log::warn!("[surface] {:?} attached unknown buffer {}", id, b.id());
                            return;
                        }
                    },
                    None => None,
                };
                state.compositor.attach(id, buffer, x, y)
            }
            wl_surface::Request::Damage { x, y, width, height } => {
                state.compositor.damage(id, Rectangle::new(x, y, width, height))
            }
            wl_surface::Request::DamageBuffer { x, y, width, height } => {
                state.compositor.damage_buffer(id, Rectangle::new(x, y, width, height))
            }
            wl_surface::Request::Frame { callback } => {
                let callback = data_init.init(callback, ());
                state.compositor.frame(id, Box::new(FrameDone(callback)))
            }
            wl_surface::Request::SetOpaqueRegion { region } => {
                state.compositor.set_opaque_region(id, region.as_ref().map(region_id))
            }
            wl_surface::Request::SetInputRegion { region } => {
                state.compositor.set_input_region(id, region.as_ref().map(region_id))
            }
            wl_surface::Request::SetBufferTransform { transform } => {
                let raw = match transform {
                    WEnum::Value(t) => u32::from(t),
                    WEnum::Unknown(raw) => raw,
                };
                state.compositor.set_buffer_transform(id, raw)
            }
            wl_surface::Request::SetBufferScale { scale } => state.compositor.set_buffer_scale(id, scale),
            wl_surface::Request::Offset { x, y } => state.compositor.set_offset(id, x, y),
            wl_surface::Request::Commit => match state.compositor.commit(id) {
                Ok(outcome) => {
                    log::trace!("[surface] {:?} commit {:?}", id, outcome);
                    Ok(())
                }
                Err(e) => {
                    state.report_commit(dhandle, id, resource, e);
                    return;
                }
            },
            wl_surface::Request::Destroy => Ok(()),
            _ => Ok(()),
        };

        if let Err(e) = result {
            state.report(dhandle, resource, e);
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &WlSurface,
        data: &SurfaceId,
    ) {
        state.sync_surfaces.remove(data);
        state.compositor.destroy_surface(*data);
    }
}

impl Dispatch<WlRegion, RegionId> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &WlRegion,
        request: wl_region::Request,
        data: &RegionId,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_region::Request::Add { x, y, width, height } => {
                state.compositor.region_add(*data, Rectangle::new(x, y, width, height));
            }
            wl_region::Request::Subtract { x, y, width, height } => {
                state.compositor.region_subtract(*data, Rectangle::new(x, y, width, height));
            }
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &WlRegion,
        data: &RegionId,
    ) {
        state.compositor.destroy_region(*data);
    }
}

impl Dispatch<WlCallback, ()> for State {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &WlCallback,
        _request: wl_callback::Request,
        _data: &(),
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
    }
}
