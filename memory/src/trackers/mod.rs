//! One tracker per resource family.

pub mod blob;
pub mod canvas;
pub mod frame;
pub mod image;
pub mod leak;
pub mod session;
pub mod socket;
pub mod store;
pub mod video;

pub use blob::{BlobAllocation, BlobTracker, TrackedBlob};
pub use canvas::{CanvasSnapshot, CanvasTracker};
pub use frame::{FrameSnapshot, FrameTracker};
pub use image::{ImageSnapshot, ImageTracker};
pub use leak::LeakSweepTracker;
pub use session::SessionEntryTracker;
pub use socket::{SocketHandle, SocketTracker};
pub use store::{HistoryCollection, StoreArrayTracker};
pub use video::{VideoSnapshot, VideoTracker};
