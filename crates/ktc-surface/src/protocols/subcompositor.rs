use crate::protocols::compositor::surface_id;
use crate::state::State;
use crate::surface::SurfaceId;
use wayland_server::protocol::{
    wl_subcompositor::{self, WlSubcompositor},
    wl_subsurface::{self, WlSubsurface},
};
use wayland_server::{Dispatch, GlobalDispatch};

impl GlobalDispatch<WlSubcompositor, ()> for State {
    fn bind(
        _state: &mut Self,
        _handle: &wayland_server::DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<WlSubcompositor>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl Dispatch<WlSubcompositor, ()> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &WlSubcompositor,
        request: wl_subcompositor::Request,
        _data: &(),
        dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        if let wl_subcompositor::Request::GetSubsurface {
            id,
            surface,
            parent,
        } = request
        {
            let child = surface_id(&surface);
            let parent = surface_id(&parent);
            log::debug!(
                "[subcompositor] Creating subsurface: {:?} with parent {:?}",
                child,
                parent
            );
            data_init.init(id, child);
            if let Err(e) = state.compositor.get_subsurface(child, parent) {
                state.report(dhandle, resource, e);
            }
        }
    }
}

impl Dispatch<WlSubsurface, SurfaceId> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &WlSubsurface,
        request: wl_subsurface::Request,
        data: &SurfaceId,
        dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let child = *data;
        let result = match request {
            wl_subsurface::Request::SetPosition { x, y } => {
                state.compositor.set_subsurface_position(child, x, y)
            }
            wl_subsurface::Request::PlaceAbove { sibling } => {
                state.compositor.place_above(child, surface_id(&sibling))
            }
            wl_subsurface::Request::PlaceBelow { sibling } => {
                state.compositor.place_below(child, surface_id(&sibling))
            }
            wl_subsurface::Request::SetSync => state.compositor.set_subsurface_sync(child, true),
            wl_subsurface::Request::SetDesync => state.compositor.set_subsurface_sync(child, false),
            _ => Ok(()),
        };
        if let Err(e) = result {
            state.report(dhandle, resource, e);
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &WlSubsurface,
        data: &SurfaceId,
    ) {
        state.compositor.destroy_subsurface(*data);
    }
}
