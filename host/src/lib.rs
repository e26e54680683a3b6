use std::fmt;

use util::{Rect, Viewport};

pub mod sim;

/// 1x1 transparent GIF swapped in for evicted images.
pub const PLACEHOLDER_IMAGE: &str =
    "data:image/gif;base64,R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7";

/// Stable identifier for a node in the host page tree.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ElementId(u64);

impl ElementId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Heavy element families the governor knows how to release.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ElementKind {
    Image,
    Frame,
    Canvas,
    Video,
}

/// Leftover view-framework fragments eligible for the leak sweep.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum FragmentKind {
    /// Empty or closed portal / popper wrapper.
    Portal,
    Tooltip,
    Toast,
    /// Modal backdrop or overlay that is no longer active.
    Backdrop,
    /// Script tag left behind by a dynamically loaded widget.
    WidgetScript,
}

/// Image source attributes that must survive an evict/restore round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSource {
    pub src: String,
    pub srcset: Option<String>,
}

impl ImageSource {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            srcset: None,
        }
    }

    pub fn with_srcset(mut self, srcset: impl Into<String>) -> Self {
        self.srcset = Some(srcset.into());
        self
    }

    pub fn placeholder() -> Self {
        Self::new(PLACEHOLDER_IMAGE)
    }

    /// Inline sources hold no decoded network bitmap worth releasing.
    pub fn is_inline(&self) -> bool {
        self.src.starts_with("data:")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub source: ImageSource,
    /// Rendered size in CSS pixels.
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoInfo {
    pub src: Option<String>,
    pub paused: bool,
}

/// Coarse heap introspection, where the host offers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapSample {
    pub used_bytes: u64,
    pub limit_bytes: u64,
}

impl HeapSample {
    pub fn used_mb(&self) -> u64 {
        self.used_bytes / (1024 * 1024)
    }

    /// Used share of the limit, rounded to a whole percent.
    pub fn percent(&self) -> u8 {
        if self.limit_bytes == 0 {
            return 0;
        }
        let pct = (self.used_bytes as f64 / self.limit_bytes as f64 * 100.0).round();
        pct.clamp(0.0, 100.0) as u8
    }
}

/// Failures reported by the host environment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("host does not support {0}")]
    Unsupported(&'static str),
    #[error("element {0} is no longer attached")]
    Detached(ElementId),
    #[error("host rejected the operation: {0}")]
    Rejected(String),
}

/// Page tree and signal access exposed by the host.
///
/// Every side-effecting call may fail; callers treat failures as
/// best-effort misses rather than fatal errors.
pub trait Page {
    fn viewport(&self) -> Viewport;

    /// Heap usage, or `None` when the host has no heap introspection.
    fn heap(&self) -> Option<HeapSample>;

    fn tree_node_count(&self) -> Result<usize, HostError>;

    /// Asks the host for a best-effort collection. Returns false when the
    /// host exposes no such hint.
    fn request_collection(&mut self) -> bool;

    /// Elements of the given kind, in document order.
    fn elements(&self, kind: ElementKind) -> Result<Vec<ElementId>, HostError>;

    fn bounds(&self, id: ElementId) -> Result<Rect, HostError>;

    /// True when the element, or an ancestor, carries the non-evictable
    /// marker.
    fn is_protected(&self, id: ElementId) -> bool;

    fn image(&self, id: ElementId) -> Result<ImageInfo, HostError>;
    fn set_image_source(&mut self, id: ElementId, source: ImageSource) -> Result<(), HostError>;

    /// Current frame source; `None` means blank.
    fn frame_source(&self, id: ElementId) -> Result<Option<String>, HostError>;
    fn set_frame_source(&mut self, id: ElementId, src: Option<String>) -> Result<(), HostError>;

    /// Backing-store size as (width, height).
    fn canvas_size(&self, id: ElementId) -> Result<(u32, u32), HostError>;
    fn clear_canvas(&mut self, id: ElementId) -> Result<(), HostError>;
    fn set_canvas_size(&mut self, id: ElementId, width: u32, height: u32) -> Result<(), HostError>;

    fn video(&self, id: ElementId) -> Result<VideoInfo, HostError>;
    fn pause_video(&mut self, id: ElementId) -> Result<(), HostError>;
    fn play_video(&mut self, id: ElementId) -> Result<(), HostError>;
    /// Replaces the media source; `None` detaches it and forces the media
    /// buffer to be released.
    fn set_video_source(&mut self, id: ElementId, src: Option<String>) -> Result<(), HostError>;

    /// Detached or orphaned fragments left behind by closed overlays.
    fn orphaned_fragments(&self) -> Result<Vec<(ElementId, FragmentKind)>, HostError>;
    fn remove_element(&mut self, id: ElementId) -> Result<(), HostError>;
}

/// Connection state of a duplex socket.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// A host duplex socket.
pub trait DuplexSocket {
    fn ready_state(&self) -> ReadyState;
    fn close(&mut self) -> Result<(), HostError>;
}

/// Host socket constructor.
pub trait SocketConnector {
    fn connect(&mut self, url: &str, protocols: &[String]) -> Result<Box<dyn DuplexSocket>, HostError>;
}

/// Opaque binary payload handed to the object-URL allocator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Blob {
    pub content_type: String,
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            data,
        }
    }
}

/// Host object-URL allocator.
pub trait ObjectUrlAllocator {
    fn create(&mut self, blob: &Blob) -> Result<String, HostError>;
    fn revoke(&mut self, url: &str) -> Result<(), HostError>;
}

/// Connector for hosts without duplex sockets.
#[derive(Debug, Default)]
pub struct NoSockets;

impl SocketConnector for NoSockets {
    fn connect(&mut self, _url: &str, _protocols: &[String]) -> Result<Box<dyn DuplexSocket>, HostError> {
        Err(HostError::Unsupported("duplex sockets"))
    }
}

/// Allocator for hosts without object URLs.
#[derive(Debug, Default)]
pub struct NoObjectUrls;

impl ObjectUrlAllocator for NoObjectUrls {
    fn create(&mut self, _blob: &Blob) -> Result<String, HostError> {
        Err(HostError::Unsupported("object URLs"))
    }

    fn revoke(&mut self, _url: &str) -> Result<(), HostError> {
        Err(HostError::Unsupported("object URLs"))
    }
}
