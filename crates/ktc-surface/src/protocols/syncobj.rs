//! wp_linux_drm_syncobj_v1: explicit sync timelines and per-surface
//! acquire/release points.

use wayland_protocols::wp::linux_drm_syncobj::v1::server::{
    wp_linux_drm_syncobj_manager_v1::{self, WpLinuxDrmSyncobjManagerV1},
    wp_linux_drm_syncobj_surface_v1::{self, WpLinuxDrmSyncobjSurfaceV1},
    wp_linux_drm_syncobj_timeline_v1::{self, WpLinuxDrmSyncobjTimelineV1},
};
use wayland_server::{Dispatch, GlobalDispatch, Resource};

use crate::protocols::compositor::surface_id;
use crate::state::State;
use crate::surface::BufferSyncId;
use crate::sync::TimelineId;

fn timeline_id(timeline: &WpLinuxDrmSyncobjTimelineV1) -> TimelineId {
    timeline.data::<TimelineId>().copied().unwrap_or_else(TimelineId::dangling)
}

impl GlobalDispatch<WpLinuxDrmSyncobjManagerV1, ()> for State {
    fn bind(
        _state: &mut Self,
        _handle: &wayland_server::DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<WpLinuxDrmSyncobjManagerV1>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl Dispatch<WpLinuxDrmSyncobjManagerV1, ()> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &WpLinuxDrmSyncobjManagerV1,
        request: wp_linux_drm_syncobj_manager_v1::Request,
        _data: &(),
        dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wp_linux_drm_syncobj_manager_v1::Request::GetSurface { id, surface } => {
                let surface = surface_id(&surface);
                match state.compositor.get_buffer_sync(surface) {
                    Ok(sync) => {
                        let sync_surface = data_init.init(id, sync);
                        state.sync_surfaces.insert(surface, sync_surface);
                    }
                    Err(e) => {
                        data_init.init(id, BufferSyncId::dangling());
                        state.report(dhandle, resource, e);
                    }
                }
            }
            wp_linux_drm_syncobj_manager_v1::Request::ImportTimeline { id, fd } => {
                match state.compositor.import_timeline(fd) {
                    Ok(timeline) => {
                        data_init.init(id, timeline);
                    }
                    Err(e) => {
                        data_init.init(id, TimelineId::dangling());
                        state.report(dhandle, resource, e);
                    }
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<WpLinuxDrmSyncobjTimelineV1, TimelineId> for State {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &WpLinuxDrmSyncobjTimelineV1,
        _request: wp_linux_drm_syncobj_timeline_v1::Request,
        _data: &TimelineId,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &WpLinuxDrmSyncobjTimelineV1,
        data: &TimelineId,
    ) {
        state.compositor.destroy_timeline(*data);
    }
}

impl Dispatch<WpLinuxDrmSyncobjSurfaceV1, BufferSyncId> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &WpLinuxDrmSyncobjSurfaceV1,
        request: wp_linux_drm_syncobj_surface_v1::Request,
        data: &BufferSyncId,
        dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let result = match request {
            wp_linux_drm_syncobj_surface_v1::Request::SetAcquirePoint {
                timeline,
                point_hi,
                point_lo,
            } => state
                .compositor
                .set_acquire_point(*data, timeline_id(&timeline), point_hi, point_lo),
            wp_linux_drm_syncobj_surface_v1::Request::SetReleasePoint {
                timeline,
                point_hi,
                point_lo,
            } => state
                .compositor
                .set_release_point(*data, timeline_id(&timeline), point_hi, point_lo),
            _ => Ok(()),
        };
        if let Err(e) = result {
            state.report(dhandle, resource, e);
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &WpLinuxDrmSyncobjSurfaceV1,
        data: &BufferSyncId,
    ) {
        state.sync_surfaces.retain(|_, sync| sync.id() != resource.id());
        state.compositor.destroy_buffer_sync(*data);
    }
}
