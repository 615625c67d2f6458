//! Page load state management

use std::collections::HashMap;

/// Load state of one opened page
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PageState {
    #[default]
    Unloaded,
    Loading,
    Ready,
    /// Terminal for the context that hit it
    Error(String),
}

impl PageState {
    /// Apply an event and return resulting effects
    #[must_use]
    pub fn apply(&mut self, event: PageEvent) -> Vec<PageEffect> {
        let (next, effects) = match (std::mem::take(self), event) {
            (Self::Unloaded, PageEvent::BeginLoad) => (Self::Loading, vec![PageEffect::SpawnBuild]),

            (Self::Unloaded, PageEvent::KnownUnloadable(reason)) => (Self::Error(reason), vec![]),

            (Self::Loading, PageEvent::Built) => (Self::Ready, vec![PageEffect::StartTiling]),

            (Self::Loading, PageEvent::BuildFailed(reason)) => (
                Self::Error(reason.clone()),
                vec![PageEffect::MarkUnloadable(reason)],
            ),

            (Self::Loading, PageEvent::DocumentFailed(reason)) => (
                Self::Error(reason.clone()),
                vec![PageEffect::MarkDocumentUnloadable(reason)],
            ),

            // A build that finishes after the page was closed is thrown away.
            (Self::Unloaded, PageEvent::Built) => (Self::Unloaded, vec![PageEffect::DiscardScene]),

            (Self::Loading | Self::Ready, PageEvent::Close) => {
                (Self::Unloaded, vec![PageEffect::ReleaseResources])
            }

            (state @ Self::Error(_), PageEvent::Close) => (state, vec![PageEffect::ReleaseResources]),

            (state, _) => (state, vec![]),
        };
        *self = next;
        effects
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Error(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Events that drive a page's load state
#[derive(Clone, Debug)]
pub enum PageEvent {
    /// Start building the scene
    BeginLoad,
    /// The page or its document is already known not to load
    KnownUnloadable(String),
    /// The scene built successfully
    Built,
    /// The scene failed to build
    BuildFailed(String),
    /// A pen in the document could not be constructed
    DocumentFailed(String),
    /// The host is done with the page
    Close,
}

/// Effects produced by state changes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageEffect {
    /// Build the scene in the background
    SpawnBuild,
    /// Set up frames and begin tiling
    StartTiling,
    /// Remember the page as unloadable
    MarkUnloadable(String),
    /// Remember the whole document as unloadable
    MarkDocumentUnloadable(String),
    /// Drop a scene nobody is waiting for
    DiscardScene,
    /// Close caches, previews and workers
    ReleaseResources,
}

/// Pages and documents that failed to load, with the reason
#[derive(Debug, Default)]
pub struct UnloadableRegistry {
    pages: HashMap<(String, String), String>,
    documents: HashMap<String, String>,
}

impl UnloadableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_page(&mut self, document_id: &str, page_id: &str, reason: impl Into<String>) {
        self.pages
            .insert((document_id.to_string(), page_id.to_string()), reason.into());
    }

    pub fn mark_document(&mut self, document_id: &str, reason: impl Into<String>) {
        self.documents.insert(document_id.to_string(), reason.into());
    }

    /// Why `page_id` cannot load, if it is known not to
    #[must_use]
    pub fn reason(&self, document_id: &str, page_id: &str) -> Option<&str> {
        self.documents
            .get(document_id)
            .or_else(|| {
                self.pages
                    .get(&(document_id.to_string(), page_id.to_string()))
            })
            .map(String::as_str)
    }

    #[must_use]
    pub fn is_document_unloadable(&self, document_id: &str) -> bool {
        self.documents.contains_key(document_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len() + self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
