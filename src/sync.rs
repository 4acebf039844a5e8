//! Keeps every open document's annotations consistent with the session's current report.

use std::collections::BTreeMap;

use crate::{DecorationRenderer, DocumentId, StatsModel, SubscriptionId, Surface};

/// Open-document registry. Holds membership only, never profiling data.
#[derive(Debug, Default)]
pub struct DocumentSync {
    registry: BTreeMap<DocumentId, Option<String>>,
    renderer: DecorationRenderer,
    subscription: Option<SubscriptionId>,
}

impl DocumentSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to document open/close and register what is already open.
    pub fn attach<S: Surface + ?Sized>(&mut self, surface: &mut S) {
        if self.subscription.is_none() {
            self.subscription = Some(surface.observe_documents());
        }
        for doc in surface.open_documents() {
            let path = surface.document_path(doc);
            self.registry.insert(doc, path);
        }
    }

    /// Clear every annotation and drop the subscription.
    pub fn detach<S: Surface + ?Sized>(&mut self, surface: &mut S) {
        self.apply_to_all(surface, None);
        if let Some(id) = self.subscription.take() {
            surface.unobserve(id);
        }
        self.registry.clear();
    }

    pub fn on_document_opened<S: Surface + ?Sized>(
        &mut self,
        surface: &mut S,
        doc: DocumentId,
        model: Option<&StatsModel>,
    ) {
        let path = surface.document_path(doc);
        tracing::debug!("document opened {doc:?} path={path:?}");
        if let Some(model) = model {
            let profile = path.as_deref().and_then(|p| model.profile_for(p));
            self.renderer.render(surface, doc, profile);
        }
        self.registry.insert(doc, path);
    }

    /// The host drops a closed document's markers itself.
    pub fn on_document_closed(&mut self, doc: DocumentId) {
        tracing::debug!("document closed {doc:?}");
        self.registry.remove(&doc);
        self.renderer.forget(doc);
    }

    /// Render `model` (or nothing) onto every registered document.
    pub fn apply_to_all<S: Surface + ?Sized>(&mut self, surface: &mut S, model: Option<&StatsModel>) {
        for (doc, path) in &self.registry {
            let profile = model.and_then(|m| path.as_deref().and_then(|p| m.profile_for(p)));
            self.renderer.render(surface, *doc, profile);
        }
    }

    pub fn is_registered(&self, doc: DocumentId) -> bool {
        self.registry.contains_key(&doc)
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FileProfile, GUTTER_NAME, LineStat, MemorySurface};

    fn model(path: &str) -> StatsModel {
        StatsModel::new(vec![FileProfile {
            file_path: path.to_string(),
            longest_label: "[1] 1ms".to_string(),
            lines: vec![LineStat {
                line_index: 0,
                label: "[1] 1ms".to_string(),
                color: None,
            }],
        }])
    }

    #[test]
    fn non_matching_and_unsaved_documents_get_nothing() {
        let mut surface = MemorySurface::new();
        let a = surface.open(Some("/w/a.py"));
        let other = surface.open(Some("/w/other.py"));
        let scratch = surface.open(None);

        let mut sync = DocumentSync::new();
        sync.attach(&mut surface);
        sync.apply_to_all(&mut surface, Some(&model("/w/a.py")));

        assert_eq!(surface.markers_in(a, GUTTER_NAME).len(), 1);
        assert!(surface.markers_in(other, GUTTER_NAME).is_empty());
        assert!(surface.markers_in(scratch, GUTTER_NAME).is_empty());
    }

    #[test]
    fn path_match_is_exact() {
        let mut surface = MemorySurface::new();
        let upper = surface.open(Some("/w/A.py"));
        let mut sync = DocumentSync::new();
        sync.attach(&mut surface);
        sync.apply_to_all(&mut surface, Some(&model("/w/a.py")));
        assert!(surface.markers_in(upper, GUTTER_NAME).is_empty());
    }

    #[test]
    fn close_unregisters_and_detach_unsubscribes() {
        let mut surface = MemorySurface::new();
        let a = surface.open(Some("/w/a.py"));
        let mut sync = DocumentSync::new();
        sync.attach(&mut surface);
        assert_eq!(surface.observer_count(), 1);
        assert!(sync.is_registered(a));

        surface.close(a);
        sync.on_document_closed(a);
        assert!(sync.is_empty());

        sync.detach(&mut surface);
        assert_eq!(surface.observer_count(), 0);
    }

    #[test]
    fn attach_twice_keeps_one_subscription() {
        let mut surface = MemorySurface::new();
        let mut sync = DocumentSync::new();
        sync.attach(&mut surface);
        sync.attach(&mut surface);
        assert_eq!(surface.observer_count(), 1);
    }
}
