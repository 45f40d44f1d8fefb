pub mod compositor;
pub mod dmabuf;
pub mod shm;
pub mod subcompositor;
pub mod syncobj;
pub mod viewporter;
