pub mod resize;
pub mod shm;

pub use resize::{resize_frame, RESIZE_FILTER};
pub use shm::{normalize_name, Role, SharedFrameStore};
