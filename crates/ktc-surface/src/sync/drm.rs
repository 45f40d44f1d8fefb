//! Timeline backend on DRM timeline syncobjs.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, BorrowedFd, FromRawFd, OwnedFd};
use std::rc::Rc;

use drm::control::{syncobj, Device as ControlDevice};
use drm::{Device as _, DriverCapability};

use super::timeline::{TimelineBackend, TimelineImporter};

struct DrmCard(File);

impl AsFd for DrmCard {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl drm::Device for DrmCard {}
impl ControlDevice for DrmCard {}

pub struct DrmSyncobjImporter {
    card: Rc<DrmCard>,
    path: String,
}

impl DrmSyncobjImporter {
    /// Opens `path`, or the first render node with timeline syncobj support
    /// when `path` is `None`.
    pub fn open(path: Option<&str>) -> io::Result<Self> {
        match path {
            Some(path) => Self::open_path(path),
            None => {
                let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no render node");
                for minor in 128..136 {
                    let path = format!("/dev/dri/renderD{}", minor);
                    match Self::open_path(&path) {
                        Ok(importer) => return Ok(importer),
                        Err(e) => {
                            log::debug!("[sync] {} unusable: {}", path, e);
                            last_err = e;
                        }
                    }
                }
                Err(last_err)
            }
        }
    }

    fn open_path(path: &str) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let card = DrmCard(file);
        let supported = card.get_driver_capability(DriverCapability::TimelineSyncObj)?;
        if supported == 0 {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "driver lacks timeline syncobj support",
            ));
        }
        log::info!("[sync] Using {} for timeline syncobjs", path);
        Ok(Self {
            card: Rc::new(card),
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl TimelineImporter for DrmSyncobjImporter {
    fn import(&self, fd: OwnedFd) -> io::Result<Box<dyn TimelineBackend>> {
        let handle = self.card.fd_to_syncobj(fd.as_fd(), false)?;
        Ok(Box::new(DrmTimeline {
            card: self.card.clone(),
            handle,
        }))
    }

    fn name(&self) -> &'static str {
        "drm"
    }
}

struct DrmTimeline {
    card: Rc<DrmCard>,
    handle: syncobj::Handle,
}

impl TimelineBackend for DrmTimeline {
    fn signal(&mut self, point: u64) -> io::Result<()> {
        // a timeline syncobj refuses to move backwards, so an already passed
        // point is not worth an ioctl
        if self.query()? >= point {
            return Ok(());
        }
        self.card.syncobj_timeline_signal(&[self.handle], &[point])
    }

    fn query(&self) -> io::Result<u64> {
        let mut points = [0u64];
        self.card
            .syncobj_timeline_query(&[self.handle], &mut points, false)?;
        Ok(points[0])
    }

    fn pollable(&self, point: u64) -> io::Result<Option<OwnedFd>> {
        let raw = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        let eventfd = unsafe { OwnedFd::from_raw_fd(raw) };
        self.card
            .syncobj_eventfd(self.handle, point, eventfd.as_fd(), false)?;
        Ok(Some(eventfd))
    }
}

impl Drop for DrmTimeline {
    fn drop(&mut self) {
        if let Err(e) = self.card.destroy_syncobj(self.handle) {
            log::warn!("[sync] Failed to destroy syncobj: {}", e);
        }
    }
}
