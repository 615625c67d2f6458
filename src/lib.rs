// Export modules for use in tests
pub mod ink;
pub mod panic_handler;
pub mod settings;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export the page-level API
pub use ink::{Document, PageRenderContext, PageRenderer, RenderConfig, Viewport, ZoomState};
