//! In-memory host used by tests and the `ebb-sim` binary.
//!
//! Every type here is a cheap handle over shared state: hand one clone to
//! the governor and keep another to drive scrolling and inspect the page.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use util::{IdGenerator, Rect, Viewport};

use crate::{
    Blob, DuplexSocket, ElementId, ElementKind, FragmentKind, HeapSample, HostError, ImageInfo,
    ImageSource, ObjectUrlAllocator, Page, ReadyState, SocketConnector, VideoInfo,
};

/// Page mutations that can be made to fail individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mutation {
    ImageSource,
    FrameSource,
    ClearCanvas,
    CanvasSize,
    PauseVideo,
    PlayVideo,
    VideoSource,
    Remove,
}

#[derive(Debug, Clone)]
enum Body {
    Image(ImageInfo),
    Frame(Option<String>),
    Canvas { width: u32, height: u32, clears: u32 },
    Video(VideoInfo),
    Fragment(FragmentKind),
}

#[derive(Debug, Clone)]
struct Node {
    /// Position in document coordinates.
    rect: Rect,
    protected: bool,
    body: Body,
}

#[derive(Debug)]
struct PageState {
    ids: IdGenerator,
    viewport: Viewport,
    scroll_y: f64,
    heap: Option<HeapSample>,
    tree_nodes: Option<usize>,
    tree_count_fails: bool,
    collections: u32,
    nodes: BTreeMap<ElementId, Node>,
    failing: HashSet<ElementId>,
    failing_ops: HashSet<(ElementId, Mutation)>,
    failing_kinds: HashSet<ElementKind>,
}

/// Simulated page tree.
#[derive(Debug, Clone)]
pub struct SimPage {
    state: Rc<RefCell<PageState>>,
}

impl SimPage {
    pub fn new(viewport: Viewport) -> Self {
        Self {
            state: Rc::new(RefCell::new(PageState {
                ids: IdGenerator::new(1),
                viewport,
                scroll_y: 0.0,
                heap: None,
                tree_nodes: None,
                tree_count_fails: false,
                collections: 0,
                nodes: BTreeMap::new(),
                failing: HashSet::new(),
                failing_ops: HashSet::new(),
                failing_kinds: HashSet::new(),
            })),
        }
    }

    fn insert(&self, rect: Rect, body: Body) -> ElementId {
        let mut state = self.state.borrow_mut();
        let id = ElementId::new(state.ids.next());
        state.nodes.insert(
            id,
            Node {
                rect,
                protected: false,
                body,
            },
        );
        id
    }

    /// Adds an image rendered at the size of `rect`.
    pub fn add_image(&self, rect: Rect, source: ImageSource) -> ElementId {
        let info = ImageInfo {
            source,
            width: rect.width.max(0.0) as u32,
            height: rect.height.max(0.0) as u32,
        };
        self.insert(rect, Body::Image(info))
    }

    pub fn add_frame(&self, rect: Rect, src: impl Into<String>) -> ElementId {
        self.insert(rect, Body::Frame(Some(src.into())))
    }

    pub fn add_canvas(&self, rect: Rect, width: u32, height: u32) -> ElementId {
        self.insert(
            rect,
            Body::Canvas {
                width,
                height,
                clears: 0,
            },
        )
    }

    pub fn add_video(&self, rect: Rect, src: impl Into<String>, playing: bool) -> ElementId {
        let info = VideoInfo {
            src: Some(src.into()),
            paused: !playing,
        };
        self.insert(rect, Body::Video(info))
    }

    /// Adds an orphaned fragment; fragments have no layout box.
    pub fn add_fragment(&self, kind: FragmentKind) -> ElementId {
        self.insert(Rect::default(), Body::Fragment(kind))
    }

    /// Marks the element as non-evictable.
    pub fn protect(&self, id: ElementId) {
        if let Some(node) = self.state.borrow_mut().nodes.get_mut(&id) {
            node.protected = true;
        }
    }

    /// Makes every mutation of `id` fail with [`HostError::Rejected`].
    pub fn fail_mutations(&self, id: ElementId) {
        self.state.borrow_mut().failing.insert(id);
    }

    /// Makes only `mutation` of `id` fail; other mutations still apply.
    pub fn fail_mutation(&self, id: ElementId, mutation: Mutation) {
        self.state.borrow_mut().failing_ops.insert((id, mutation));
    }

    /// Makes listing elements of `kind` fail.
    pub fn fail_listing(&self, kind: ElementKind) {
        self.state.borrow_mut().failing_kinds.insert(kind);
    }

    /// Detaches the element from the tree behind the governor's back.
    pub fn detach(&self, id: ElementId) {
        self.state.borrow_mut().nodes.remove(&id);
    }

    pub fn scroll_to(&self, y: f64) {
        self.state.borrow_mut().scroll_y = y.max(0.0);
    }

    pub fn scroll_by(&self, dy: f64) {
        let mut state = self.state.borrow_mut();
        state.scroll_y = (state.scroll_y + dy).max(0.0);
    }

    pub fn set_heap(&self, heap: Option<HeapSample>) {
        self.state.borrow_mut().heap = heap;
    }

    /// Overrides the reported tree size; by default it is the element count.
    pub fn set_tree_nodes(&self, count: usize) {
        self.state.borrow_mut().tree_nodes = Some(count);
    }

    pub fn fail_tree_count(&self, fail: bool) {
        self.state.borrow_mut().tree_count_fails = fail;
    }

    /// Number of collection hints received.
    pub fn collections(&self) -> u32 {
        self.state.borrow().collections
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.state.borrow().nodes.contains_key(&id)
    }

    pub fn image_source(&self, id: ElementId) -> Option<ImageSource> {
        match &self.state.borrow().nodes.get(&id)?.body {
            Body::Image(info) => Some(info.source.clone()),
            _ => None,
        }
    }

    pub fn frame_src(&self, id: ElementId) -> Option<String> {
        match &self.state.borrow().nodes.get(&id)?.body {
            Body::Frame(src) => src.clone(),
            _ => None,
        }
    }

    pub fn canvas_dims(&self, id: ElementId) -> Option<(u32, u32)> {
        match self.state.borrow().nodes.get(&id)?.body {
            Body::Canvas { width, height, .. } => Some((width, height)),
            _ => None,
        }
    }

    pub fn canvas_clears(&self, id: ElementId) -> u32 {
        match self.state.borrow().nodes.get(&id).map(|node| &node.body) {
            Some(Body::Canvas { clears, .. }) => *clears,
            _ => 0,
        }
    }

    pub fn video_info(&self, id: ElementId) -> Option<VideoInfo> {
        match &self.state.borrow().nodes.get(&id)?.body {
            Body::Video(info) => Some(info.clone()),
            _ => None,
        }
    }

    fn with_node<R>(&self, id: ElementId, f: impl FnOnce(&Node) -> Option<R>) -> Result<R, HostError> {
        let state = self.state.borrow();
        let node = state.nodes.get(&id).ok_or(HostError::Detached(id))?;
        f(node).ok_or_else(|| HostError::Rejected(format!("{id} has a different kind")))
    }

    fn with_node_mut<R>(
        &self,
        id: ElementId,
        mutation: Mutation,
        f: impl FnOnce(&mut Body) -> Option<R>,
    ) -> Result<R, HostError> {
        let mut state = self.state.borrow_mut();
        if state.failing.contains(&id) || state.failing_ops.contains(&(id, mutation)) {
            return Err(HostError::Rejected(format!("{id} refused the mutation")));
        }
        let node = state.nodes.get_mut(&id).ok_or(HostError::Detached(id))?;
        f(&mut node.body).ok_or_else(|| HostError::Rejected(format!("{id} has a different kind")))
    }
}

impl Default for SimPage {
    fn default() -> Self {
        Self::new(Viewport::default())
    }
}

impl Page for SimPage {
    fn viewport(&self) -> Viewport {
        self.state.borrow().viewport
    }

    fn heap(&self) -> Option<HeapSample> {
        self.state.borrow().heap
    }

    fn tree_node_count(&self) -> Result<usize, HostError> {
        let state = self.state.borrow();
        if state.tree_count_fails {
            return Err(HostError::Unsupported("tree introspection"));
        }
        Ok(state.tree_nodes.unwrap_or(state.nodes.len()))
    }

    fn request_collection(&mut self) -> bool {
        self.state.borrow_mut().collections += 1;
        true
    }

    fn elements(&self, kind: ElementKind) -> Result<Vec<ElementId>, HostError> {
        let state = self.state.borrow();
        if state.failing_kinds.contains(&kind) {
            return Err(HostError::Rejected(format!("{kind:?} query failed")));
        }
        let ids = state
            .nodes
            .iter()
            .filter(|(_, node)| {
                matches!(
                    (&node.body, kind),
                    (Body::Image(_), ElementKind::Image)
                        | (Body::Frame(_), ElementKind::Frame)
                        | (Body::Canvas { .. }, ElementKind::Canvas)
                        | (Body::Video(_), ElementKind::Video)
                )
            })
            .map(|(id, _)| *id)
            .collect();
        Ok(ids)
    }

    fn bounds(&self, id: ElementId) -> Result<Rect, HostError> {
        let state = self.state.borrow();
        let node = state.nodes.get(&id).ok_or(HostError::Detached(id))?;
        Ok(node.rect.translated(-state.scroll_y))
    }

    fn is_protected(&self, id: ElementId) -> bool {
        self.state
            .borrow()
            .nodes
            .get(&id)
            .map(|node| node.protected)
            .unwrap_or(false)
    }

    fn image(&self, id: ElementId) -> Result<ImageInfo, HostError> {
        self.with_node(id, |node| match &node.body {
            Body::Image(info) => Some(info.clone()),
            _ => None,
        })
    }

    fn set_image_source(&mut self, id: ElementId, source: ImageSource) -> Result<(), HostError> {
        self.with_node_mut(id, Mutation::ImageSource, |body| match body {
            Body::Image(info) => {
                info.source = source;
                Some(())
            }
            _ => None,
        })
    }

    fn frame_source(&self, id: ElementId) -> Result<Option<String>, HostError> {
        self.with_node(id, |node| match &node.body {
            Body::Frame(src) => Some(src.clone()),
            _ => None,
        })
    }

    fn set_frame_source(&mut self, id: ElementId, src: Option<String>) -> Result<(), HostError> {
        self.with_node_mut(id, Mutation::FrameSource, |body| match body {
            Body::Frame(current) => {
                *current = src;
                Some(())
            }
            _ => None,
        })
    }

    fn canvas_size(&self, id: ElementId) -> Result<(u32, u32), HostError> {
        self.with_node(id, |node| match node.body {
            Body::Canvas { width, height, .. } => Some((width, height)),
            _ => None,
        })
    }

    fn clear_canvas(&mut self, id: ElementId) -> Result<(), HostError> {
        self.with_node_mut(id, Mutation::ClearCanvas, |body| match body {
            Body::Canvas { clears, .. } => {
                *clears += 1;
                Some(())
            }
            _ => None,
        })
    }

    fn set_canvas_size(&mut self, id: ElementId, width: u32, height: u32) -> Result<(), HostError> {
        self.with_node_mut(id, Mutation::CanvasSize, |body| match body {
            Body::Canvas {
                width: w,
                height: h,
                ..
            } => {
                *w = width;
                *h = height;
                Some(())
            }
            _ => None,
        })
    }

    fn video(&self, id: ElementId) -> Result<VideoInfo, HostError> {
        self.with_node(id, |node| match &node.body {
            Body::Video(info) => Some(info.clone()),
            _ => None,
        })
    }

    fn pause_video(&mut self, id: ElementId) -> Result<(), HostError> {
        self.with_node_mut(id, Mutation::PauseVideo, |body| match body {
            Body::Video(info) => {
                info.paused = true;
                Some(())
            }
            _ => None,
        })
    }

    fn play_video(&mut self, id: ElementId) -> Result<(), HostError> {
        self.with_node_mut(id, Mutation::PlayVideo, |body| match body {
            Body::Video(info) => {
                info.paused = false;
                Some(())
            }
            _ => None,
        })
    }

    fn set_video_source(&mut self, id: ElementId, src: Option<String>) -> Result<(), HostError> {
        self.with_node_mut(id, Mutation::VideoSource, |body| match body {
            Body::Video(info) => {
                info.src = src;
                Some(())
            }
            _ => None,
        })
    }

    fn orphaned_fragments(&self) -> Result<Vec<(ElementId, FragmentKind)>, HostError> {
        let state = self.state.borrow();
        let fragments = state
            .nodes
            .iter()
            .filter_map(|(id, node)| match node.body {
                Body::Fragment(kind) => Some((*id, kind)),
                _ => None,
            })
            .collect();
        Ok(fragments)
    }

    fn remove_element(&mut self, id: ElementId) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        if state.failing.contains(&id) || state.failing_ops.contains(&(id, Mutation::Remove)) {
            return Err(HostError::Rejected(format!("{id} refused removal")));
        }
        state
            .nodes
            .remove(&id)
            .map(|_| ())
            .ok_or(HostError::Detached(id))
    }
}

/// Socket produced by [`SimSockets`].
#[derive(Debug)]
pub struct SimSocket {
    state: Rc<Cell<ReadyState>>,
}

impl DuplexSocket for SimSocket {
    fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    fn close(&mut self) -> Result<(), HostError> {
        self.state.set(ReadyState::Closed);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SocketsState {
    opened: Vec<(String, Rc<Cell<ReadyState>>)>,
    refuse: bool,
}

/// Simulated socket constructor. Sockets open immediately.
#[derive(Debug, Clone, Default)]
pub struct SimSockets {
    state: Rc<RefCell<SocketsState>>,
}

impl SimSockets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent connects fail.
    pub fn refuse(&self, refuse: bool) {
        self.state.borrow_mut().refuse = refuse;
    }

    pub fn opened(&self) -> usize {
        self.state.borrow().opened.len()
    }

    /// Ready state of the `index`-th socket ever opened.
    pub fn state(&self, index: usize) -> Option<ReadyState> {
        self.state.borrow().opened.get(index).map(|(_, s)| s.get())
    }

    pub fn url(&self, index: usize) -> Option<String> {
        self.state.borrow().opened.get(index).map(|(url, _)| url.clone())
    }

    /// Simulates the remote end dropping the connection.
    pub fn drop_remote(&self, index: usize) {
        if let Some((_, state)) = self.state.borrow().opened.get(index) {
            state.set(ReadyState::Closed);
        }
    }

    pub fn open_count(&self) -> usize {
        self.state
            .borrow()
            .opened
            .iter()
            .filter(|(_, s)| matches!(s.get(), ReadyState::Connecting | ReadyState::Open))
            .count()
    }
}

impl SocketConnector for SimSockets {
    fn connect(&mut self, url: &str, _protocols: &[String]) -> Result<Box<dyn DuplexSocket>, HostError> {
        let mut state = self.state.borrow_mut();
        if state.refuse {
            return Err(HostError::Rejected(format!("connection to {url} refused")));
        }
        let ready = Rc::new(Cell::new(ReadyState::Open));
        state.opened.push((url.to_string(), ready.clone()));
        Ok(Box::new(SimSocket { state: ready }))
    }
}

#[derive(Debug, Default)]
struct UrlsState {
    next: u64,
    live: Vec<String>,
    revoked: Vec<String>,
}

/// Simulated object-URL allocator handing out `blob:sim/N` URLs.
#[derive(Debug, Clone, Default)]
pub struct SimObjectUrls {
    state: Rc<RefCell<UrlsState>>,
}

impl SimObjectUrls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self) -> Vec<String> {
        self.state.borrow().live.clone()
    }

    pub fn revoked(&self) -> Vec<String> {
        self.state.borrow().revoked.clone()
    }

    pub fn is_live(&self, url: &str) -> bool {
        self.state.borrow().live.iter().any(|live| live == url)
    }
}

impl ObjectUrlAllocator for SimObjectUrls {
    fn create(&mut self, _blob: &Blob) -> Result<String, HostError> {
        let mut state = self.state.borrow_mut();
        state.next += 1;
        let url = format!("blob:sim/{}", state.next);
        state.live.push(url.clone());
        Ok(url)
    }

    fn revoke(&mut self, url: &str) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        if let Some(index) = state.live.iter().position(|live| live == url) {
            state.live.remove(index);
            state.revoked.push(url.to_string());
        }
        Ok(())
    }
}
