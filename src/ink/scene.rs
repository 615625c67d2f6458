//! Scene provider interface
//!
//! The scene provider parses the tablet's stroke format into a tree of layers
//! and strokes and rasterizes regions of it. Its rasterizer is stateful and
//! not reentrant, so every call into a built scene goes through
//! [`SharedScene`], which owns the handle behind one mutex per page.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use super::error::SceneError;
use super::types::BoundingBox;

pub type LayerId = u32;

/// A document the scene provider knows how to open
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Document {
    pub id: String,
    pub root: PathBuf,
}

impl Document {
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
        }
    }
}

/// Builds per-page scenes
pub trait SceneProvider: Send + Sync {
    fn build(&self, document: &Document, page_id: &str) -> Result<Box<dyn SceneHandle>, SceneError>;
}

/// One built page: its layer tree and its rasterizer
pub trait SceneHandle: Send {
    fn layer_ids(&self) -> Vec<LayerId>;

    fn bounding_box_for_layer(&self, layer: LayerId) -> BoundingBox;

    /// Rasterize the document-unit region `(x, y, w, h)` into an
    /// `out_w × out_h` RGBA8 buffer.
    fn render_region(&mut self, x: f64, y: f64, w: f64, h: f64, out_w: u32, out_h: u32) -> Vec<u8>;

    /// Page size in document units
    fn native_page_size(&self) -> (f64, f64);
}

/// Page-owned handle serializing every call into a non-reentrant scene
#[derive(Clone)]
pub struct SharedScene {
    inner: Arc<Mutex<Box<dyn SceneHandle>>>,
}

impl SharedScene {
    pub fn new(scene: Box<dyn SceneHandle>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(scene)),
        }
    }

    /// Run `f` with exclusive access to the scene, blocking until the lock is free.
    ///
    /// A panic inside a previous call does not wedge the page: the poisoned
    /// lock is recovered.
    pub fn with_scene<R>(&self, f: impl FnOnce(&mut dyn SceneHandle) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut **guard)
    }

    pub fn native_page_size(&self) -> (f64, f64) {
        self.with_scene(|scene| scene.native_page_size())
    }

    /// Boxes of the layers that hold ink; empty layers would pin the box to the origin
    pub fn layer_bounding_boxes(&self) -> Vec<BoundingBox> {
        self.with_scene(|scene| {
            scene
                .layer_ids()
                .into_iter()
                .map(|layer| scene.bounding_box_for_layer(layer))
                .filter(|bbox| !bbox.is_empty())
                .collect()
        })
    }
}

impl fmt::Debug for SharedScene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedScene").finish_non_exhaustive()
    }
}
