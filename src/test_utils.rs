pub use test_helpers::*;

pub mod test_helpers {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::{Duration, Instant};

    use flume::{Receiver, Sender};

    use crate::ink::{
        BoundingBox, Document, LayerId, PenError, SceneError, SceneHandle, SceneProvider,
        SharedScene,
    };

    /// Fill color of every pixel a `FakeScene` renders
    pub const FAKE_INK: [u8; 4] = [20, 20, 20, 255];

    struct FakeState {
        page_size: (f64, f64),
        layers: Mutex<Vec<BoundingBox>>,
        render_calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        truncate: AtomicBool,
        gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
        regions: Mutex<Vec<(f64, f64, f64, f64, u32, u32)>>,
    }

    /// Scripted scene with call counters and a gate to hold a render in flight.
    ///
    /// Clones share their counters, so a test keeps one clone while the page
    /// owns another.
    #[derive(Clone)]
    pub struct FakeScene {
        state: Arc<FakeState>,
    }

    /// Holds the next `render_region` call until released
    pub struct RenderGate {
        entered: Receiver<()>,
        release: Sender<()>,
    }

    impl RenderGate {
        /// Wait until the held call has started
        pub fn wait_entered(&self, timeout: Duration) -> bool {
            self.entered.recv_timeout(timeout).is_ok()
        }

        pub fn release(self) {
            let _ = self.release.send(());
        }
    }

    impl FakeScene {
        pub fn new(page_size: (f64, f64)) -> Self {
            Self {
                state: Arc::new(FakeState {
                    page_size,
                    layers: Mutex::new(vec![BoundingBox::new(0.0, 0.0, page_size.1, page_size.0)]),
                    render_calls: AtomicUsize::new(0),
                    active: AtomicUsize::new(0),
                    max_active: AtomicUsize::new(0),
                    truncate: AtomicBool::new(false),
                    gate: Mutex::new(None),
                    regions: Mutex::new(Vec::new()),
                }),
            }
        }

        pub fn with_layers(self, layers: Vec<BoundingBox>) -> Self {
            *self.state.layers.lock().unwrap() = layers;
            self
        }

        /// A page-owned handle around a clone of this scene
        pub fn shared(&self) -> SharedScene {
            SharedScene::new(Box::new(self.clone()))
        }

        pub fn render_calls(&self) -> usize {
            self.state.render_calls.load(Ordering::SeqCst)
        }

        /// Most `render_region` calls ever observed running at once
        pub fn max_concurrent_renders(&self) -> usize {
            self.state.max_active.load(Ordering::SeqCst)
        }

        /// Every rendered region as `(x, y, w, h, out_w, out_h)`
        pub fn regions(&self) -> Vec<(f64, f64, f64, f64, u32, u32)> {
            self.state.regions.lock().unwrap().clone()
        }

        /// Make renders return one byte short of a full buffer
        pub fn truncate_output(&self, truncate: bool) {
            self.state.truncate.store(truncate, Ordering::SeqCst);
        }

        pub fn hold_next_render(&self) -> RenderGate {
            let (entered_tx, entered_rx) = flume::bounded(1);
            let (release_tx, release_rx) = flume::bounded(1);
            *self.state.gate.lock().unwrap() = Some((entered_tx, release_rx));
            RenderGate {
                entered: entered_rx,
                release: release_tx,
            }
        }
    }

    impl SceneHandle for FakeScene {
        fn layer_ids(&self) -> Vec<LayerId> {
            let count = self.state.layers.lock().unwrap().len();
            (0..count as LayerId).collect()
        }

        fn bounding_box_for_layer(&self, layer: LayerId) -> BoundingBox {
            self.state
                .layers
                .lock()
                .unwrap()
                .get(layer as usize)
                .copied()
                .unwrap_or_default()
        }

        fn render_region(&mut self, x: f64, y: f64, w: f64, h: f64, out_w: u32, out_h: u32) -> Vec<u8> {
            let state = &self.state;
            let active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
            state.max_active.fetch_max(active, Ordering::SeqCst);
            state.render_calls.fetch_add(1, Ordering::SeqCst);
            state.regions.lock().unwrap().push((x, y, w, h, out_w, out_h));

            let gate = state.gate.lock().unwrap().take();
            if let Some((entered, release)) = gate {
                let _ = entered.send(());
                let _ = release.recv();
            }

            let mut len = out_w as usize * out_h as usize * 4;
            if state.truncate.load(Ordering::SeqCst) {
                len = len.saturating_sub(1);
            }
            let pixels = FAKE_INK.iter().copied().cycle().take(len).collect();
            state.active.fetch_sub(1, Ordering::SeqCst);
            pixels
        }

        fn native_page_size(&self) -> (f64, f64) {
            self.state.page_size
        }
    }

    /// What `FakeProvider` does for a page id
    #[derive(Clone)]
    pub enum FakePage {
        Scene(FakeScene),
        Fail(String),
        BadPen(u32),
    }

    /// Provider backed by a fixed page table; unknown pages are `NotFound`
    #[derive(Default)]
    pub struct FakeProvider {
        pages: Mutex<HashMap<String, FakePage>>,
        build_calls: AtomicUsize,
        hold: Mutex<Option<Receiver<()>>>,
    }

    impl FakeProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_page(self, page_id: &str, page: FakePage) -> Self {
            self.pages.lock().unwrap().insert(page_id.to_string(), page);
            self
        }

        pub fn build_calls(&self) -> usize {
            self.build_calls.load(Ordering::SeqCst)
        }

        /// Block the next `build` until the returned sender fires or drops
        pub fn hold_next_build(&self) -> Sender<()> {
            let (tx, rx) = flume::bounded(1);
            *self.hold.lock().unwrap() = Some(rx);
            tx
        }
    }

    impl SceneProvider for FakeProvider {
        fn build(&self, _document: &Document, page_id: &str) -> Result<Box<dyn SceneHandle>, SceneError> {
            self.build_calls.fetch_add(1, Ordering::SeqCst);
            let hold = self.hold.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(hold) = hold {
                let _ = hold.recv();
            }

            let page = self
                .pages
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(page_id)
                .cloned();
            match page {
                Some(FakePage::Scene(scene)) => Ok(Box::new(scene)),
                Some(FakePage::Fail(reason)) => Err(SceneError::failed(reason)),
                Some(FakePage::BadPen(pen_number)) => Err(PenError::UnknownPen { pen_number }.into()),
                None => Err(SceneError::NotFound {
                    page_id: page_id.to_string(),
                }),
            }
        }
    }

    /// Poll `condition` every millisecond until it holds or `timeout` passes
    pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if condition() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}
