//! Surface commit and explicit-sync core of the KTC compositor.
//!
//! `compositor::Compositor` owns every surface, region, timeline and sync
//! object and implements the client requests on them independently of the
//! wire. `protocols` and `state` adapt it to `wayland-server`.

pub mod buffer;
pub mod compositor;
pub mod config;
pub mod error;
pub mod io;
pub mod protocols;
pub mod region;
pub mod registry;
pub mod state;
pub mod surface;
pub mod sync;

pub use compositor::{CommitOutcome, Compositor, SurfaceEvent};
pub use error::{CoreError, Result};
pub use io::{CalloopIo, ReadinessIo, Wakeup};
pub use state::State;
