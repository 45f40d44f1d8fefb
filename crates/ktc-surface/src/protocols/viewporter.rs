use wayland_protocols::wp::viewporter::server::{
    wp_viewport::{self, WpViewport},
    wp_viewporter::{self, WpViewporter},
};
use wayland_server::{Dispatch, GlobalDispatch, Resource};

use crate::protocols::compositor::surface_id;
use crate::state::State;
use crate::surface::SurfaceId;

impl GlobalDispatch<WpViewporter, ()> for State {
    fn bind(
        _state: &mut Self,
        _handle: &wayland_server::DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<WpViewporter>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl Dispatch<WpViewporter, ()> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &WpViewporter,
        request: wp_viewporter::Request,
        _data: &(),
        _dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        if let wp_viewporter::Request::GetViewport { id, surface } = request {
            let surface = surface_id(&surface);
            data_init.init(id, surface);
            if let Err(e) = state.compositor.get_viewport(surface) {
                log::warn!("[viewport] {}: {}", resource.id(), e);
                resource.post_error(e.code(), e.to_string());
            }
        }
    }
}

impl Dispatch<WpViewport, SurfaceId> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &WpViewport,
        request: wp_viewport::Request,
        data: &SurfaceId,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let result = match request {
            wp_viewport::Request::SetSource { x, y, width, height } => {
                state.compositor.set_viewport_source(*data, x, y, width, height)
            }
            wp_viewport::Request::SetDestination { width, height } => {
                state.compositor.set_viewport_destination(*data, width, height)
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            log::warn!("[viewport] {}: {}", resource.id(), e);
            resource.post_error(e.code(), e.to_string());
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &WpViewport,
        data: &SurfaceId,
    ) {
        state.compositor.destroy_viewport(*data);
    }
}
