use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use ktc_common::{parse_level, FileLogger};
use ktc_surface::compositor::Compositor;
use ktc_surface::config::Config;
use ktc_surface::io::CalloopIo;
use ktc_surface::protocols::dmabuf::DmaBufGlobal;
use ktc_surface::state::State;
use ktc_surface::sync::drm::DrmSyncobjImporter;
use ktc_surface::sync::{SoftwareImporter, TimelineImporter};
use wayland_protocols::wp::linux_dmabuf::zv1::server::zwp_linux_dmabuf_v1::ZwpLinuxDmabufV1;
use wayland_protocols::wp::linux_drm_syncobj::v1::server::wp_linux_drm_syncobj_manager_v1::WpLinuxDrmSyncobjManagerV1;
use wayland_protocols::wp::viewporter::server::wp_viewporter::WpViewporter;
use wayland_server::protocol::{
    wl_compositor::WlCompositor, wl_shm::WlShm, wl_subcompositor::WlSubcompositor,
};
use wayland_server::{Display, ListeningSocket};

#[derive(Parser, Debug)]
#[command(name = "ktc-surface", about = "Headless KTC surface server")]
struct Args {
    /// Config file to use instead of the default locations
    #[arg(long)]
    config: Option<PathBuf>,

    /// Wayland socket name
    #[arg(long)]
    socket: Option<String>,

    /// Use in-process timelines instead of DRM syncobjs
    #[arg(long)]
    software_sync: bool,
}

struct LoopData {
    display: Display<State>,
    state: State,
}

impl AsMut<Compositor> for LoopData {
    fn as_mut(&mut self) -> &mut Compositor {
        &mut self.state.compositor
    }
}

fn main() {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_from_path(path).unwrap_or_else(|e| {
            eprintln!("Failed to load {}: {}, using defaults", path.display(), e);
            Config::default()
        }),
        None => Config::load(),
    };

    FileLogger::init("ktc-surface", parse_level(&config.debug.log_level))
        .expect("Failed to initialize logging");
    log::info!("Config: {:?}", config);

    let importer = timeline_importer(&config, args.software_sync);

    let mut event_loop =
        calloop::EventLoop::<LoopData>::try_new().expect("Failed to create calloop event loop");
    let io = CalloopIo::new(event_loop.handle());
    let compositor = Compositor::new(importer, Box::new(io), config.limits.max_objects_per_kind);

    let mut display = Display::<State>::new().expect("Failed to create display");
    let dh = display.handle();
    dh.create_global::<State, WlCompositor, _>(6, ());
    dh.create_global::<State, WlSubcompositor, _>(1, ());
    dh.create_global::<State, WlShm, _>(1, ());
    dh.create_global::<State, ZwpLinuxDmabufV1, _>(3, DmaBufGlobal);
    dh.create_global::<State, WpViewporter, _>(1, ());
    if config.sync.explicit_sync {
        dh.create_global::<State, WpLinuxDrmSyncobjManagerV1, _>(1, ());
    } else {
        log::info!("[sync] Explicit sync disabled");
    }

    let socket_name = args.socket.as_deref().or(config.socket.socket_name());
    let socket = match socket_name {
        Some(name) => ListeningSocket::bind(name),
        None => ListeningSocket::bind_auto("wayland", 1..33),
    }
    .expect("Failed to create socket");
    if let Some(name) = socket.socket_name() {
        log::info!("Listening on: {}", name.to_string_lossy());
    }

    let handle = event_loop.handle();
    handle
        .insert_source(
            calloop::generic::Generic::new(socket, calloop::Interest::READ, calloop::Mode::Level),
            |_, socket, data| {
                if let Some(stream) = socket.accept().ok().flatten() {
                    match data.display.handle().insert_client(stream, Arc::new(())) {
                        Ok(client_id) => log::info!("Client connected: {:?}", client_id),
                        Err(e) => log::error!("Failed to insert client: {}", e),
                    }
                }
                Ok(calloop::PostAction::Continue)
            },
        )
        .expect("Failed to insert socket source");

    let poll_fd = display
        .backend()
        .poll_fd()
        .try_clone_to_owned()
        .expect("Failed to clone poll fd");
    handle
        .insert_source(
            calloop::generic::Generic::new(poll_fd, calloop::Interest::READ, calloop::Mode::Level),
            |_, _, data| {
                if let Err(e) = data.display.dispatch_clients(&mut data.state) {
                    log::error!("Failed to dispatch clients: {}", e);
                }
                Ok(calloop::PostAction::Continue)
            },
        )
        .expect("Failed to insert display source");

    handle
        .insert_source(calloop::timer::Timer::immediate(), |_deadline, _: &mut (), data| {
            let time = data.state.time_ms();
            let signaled = data.state.compositor.frame_done_committed(time);
            for event in data.state.compositor.take_events() {
                log::trace!("[surface] {:?}", event);
            }
            if signaled > 0 {
                log::trace!("[surface] Frame done for {} surfaces", signaled);
            }
            calloop::timer::TimeoutAction::ToDuration(Duration::from_millis(16))
        })
        .expect("Failed to insert timer");

    let mut data = LoopData {
        display,
        state: State::new(compositor),
    };

    log::info!("ktc-surface running");
    event_loop
        .run(None, &mut data, |data| {
            data.state.compositor.dispatch_pending();
            if let Err(e) = data.display.flush_clients() {
                log::error!("Failed to flush clients: {}", e);
            }
        })
        .expect("Event loop error");
}

fn timeline_importer(config: &Config, force_software: bool) -> Box<dyn TimelineImporter> {
    if force_software {
        log::warn!("[sync] Using software timelines, client GPU work will not signal them");
        return Box::new(SoftwareImporter);
    }
    match DrmSyncobjImporter::open(config.sync.drm_device_path()) {
        Ok(importer) => {
            log::info!("[sync] Importing timelines through {}", importer.path());
            Box::new(importer)
        }
        Err(e) => {
            log::warn!("[sync] No DRM device for syncobj timelines ({}), using software timelines", e);
            Box::new(SoftwareImporter)
        }
    }
}
