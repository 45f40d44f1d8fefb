pub mod drm;
pub mod explicit;
pub mod point;
pub mod timeline;

pub use explicit::BufferSync;
pub use point::{PointRole, ReleaseToken, SyncPoint};
pub use timeline::{
    point_from_halves, SharedTimeline, SoftwareImporter, SoftwareTimeline, Timeline, TimelineBackend,
    TimelineId, TimelineImporter, WaiterCallback, WaiterId,
};
