//! Host editing surface: the document, gutter, marker and notification capabilities heatline
//! consumes, plus an in-memory host used by the headless CLI and tests.

use serde::Serialize;

use std::collections::{BTreeMap, BTreeSet};

use crate::Annotation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DocumentId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MarkerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SubscriptionId(pub u64);

/// Marker anchor on one line. `end_column: None` means end of line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineRange {
    pub line: u32,
    pub start_column: u32,
    pub end_column: Option<u32>,
}

impl LineRange {
    pub fn whole_line(line: u32) -> Self {
        Self {
            line,
            start_column: 0,
            end_column: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentEvent {
    Opened(DocumentId),
    Closed(DocumentId),
}

pub trait Surface {
    fn open_documents(&self) -> Vec<DocumentId>;
    fn active_document(&self) -> Option<DocumentId>;
    /// Backing file path; `None` for unsaved buffers or unknown documents.
    fn document_path(&self, doc: DocumentId) -> Option<String>;

    fn add_gutter(&mut self, doc: DocumentId, name: &str, width_hint: &str);
    /// Removes every gutter called `name`.
    fn remove_gutter(&mut self, doc: DocumentId, name: &str);

    fn add_marker(
        &mut self,
        doc: DocumentId,
        gutter: &str,
        range: LineRange,
        annotation: Annotation,
    ) -> MarkerId;
    fn destroy_marker(&mut self, doc: DocumentId, marker: MarkerId);

    /// User-visible warning notification.
    fn warn(&mut self, message: &str);

    /// Start receiving document open/close notifications.
    fn observe_documents(&mut self) -> SubscriptionId;
    fn unobserve(&mut self, id: SubscriptionId);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Gutter {
    pub name: String,
    pub width_hint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub id: MarkerId,
    pub gutter: String,
    pub range: LineRange,
    pub annotation: Annotation,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryDocument {
    pub path: Option<String>,
    pub gutters: Vec<Gutter>,
    pub markers: Vec<Marker>,
}

#[derive(Debug, Default)]
pub struct MemorySurface {
    next_id: u64,
    documents: BTreeMap<DocumentId, MemoryDocument>,
    active: Option<DocumentId>,
    warnings: Vec<String>,
    observers: BTreeSet<SubscriptionId>,
    pending: Vec<DocumentEvent>,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id = self.next_id.saturating_add(1);
        self.next_id
    }

    /// Opens a document and makes it active. Observers are notified through [`Self::drain_events`].
    pub fn open(&mut self, path: Option<&str>) -> DocumentId {
        let doc = DocumentId(self.next_id());
        self.documents.insert(
            doc,
            MemoryDocument {
                path: path.map(str::to_string),
                ..MemoryDocument::default()
            },
        );
        self.active = Some(doc);
        self.notify(DocumentEvent::Opened(doc));
        doc
    }

    /// Closes a document, discarding its rendering state.
    pub fn close(&mut self, doc: DocumentId) {
        if self.documents.remove(&doc).is_none() {
            return;
        }
        if self.active == Some(doc) {
            self.active = self.documents.keys().next_back().copied();
        }
        self.notify(DocumentEvent::Closed(doc));
    }

    pub fn set_active(&mut self, doc: Option<DocumentId>) {
        self.active = doc.filter(|d| self.documents.contains_key(d));
    }

    pub fn drain_events(&mut self) -> Vec<DocumentEvent> {
        std::mem::take(&mut self.pending)
    }

    pub fn document(&self, doc: DocumentId) -> Option<&MemoryDocument> {
        self.documents.get(&doc)
    }

    /// Markers in `gutter` for `doc`, sorted by line.
    pub fn markers_in(&self, doc: DocumentId, gutter: &str) -> Vec<&Marker> {
        let mut out: Vec<&Marker> = self
            .documents
            .get(&doc)
            .map(|d| d.markers.iter().filter(|m| m.gutter == gutter).collect())
            .unwrap_or_default();
        out.sort_by_key(|m| m.range.line);
        out
    }

    pub fn gutter_count(&self, doc: DocumentId, name: &str) -> usize {
        self.documents
            .get(&doc)
            .map(|d| d.gutters.iter().filter(|g| g.name == name).count())
            .unwrap_or_default()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    fn notify(&mut self, event: DocumentEvent) {
        if !self.observers.is_empty() {
            self.pending.push(event);
        }
    }
}

impl Surface for MemorySurface {
    fn open_documents(&self) -> Vec<DocumentId> {
        self.documents.keys().copied().collect()
    }

    fn active_document(&self) -> Option<DocumentId> {
        self.active
    }

    fn document_path(&self, doc: DocumentId) -> Option<String> {
        self.documents.get(&doc).and_then(|d| d.path.clone())
    }

    fn add_gutter(&mut self, doc: DocumentId, name: &str, width_hint: &str) {
        if let Some(d) = self.documents.get_mut(&doc) {
            d.gutters.push(Gutter {
                name: name.to_string(),
                width_hint: width_hint.to_string(),
            });
        }
    }

    fn remove_gutter(&mut self, doc: DocumentId, name: &str) {
        if let Some(d) = self.documents.get_mut(&doc) {
            d.gutters.retain(|g| g.name != name);
        }
    }

    fn add_marker(
        &mut self,
        doc: DocumentId,
        gutter: &str,
        range: LineRange,
        annotation: Annotation,
    ) -> MarkerId {
        let id = MarkerId(self.next_id());
        if let Some(d) = self.documents.get_mut(&doc) {
            d.markers.push(Marker {
                id,
                gutter: gutter.to_string(),
                range,
                annotation,
            });
        }
        id
    }

    fn destroy_marker(&mut self, doc: DocumentId, marker: MarkerId) {
        if let Some(d) = self.documents.get_mut(&doc) {
            d.markers.retain(|m| m.id != marker);
        }
    }

    fn warn(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    fn observe_documents(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next_id());
        self.observers.insert(id);
        id
    }

    fn unobserve(&mut self, id: SubscriptionId) {
        self.observers.remove(&id);
        if self.observers.is_empty() {
            self.pending.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_only_queue_while_observed() {
        let mut surface = MemorySurface::new();
        surface.open(Some("/a.py"));
        assert!(surface.drain_events().is_empty());

        let sub = surface.observe_documents();
        let b = surface.open(Some("/b.py"));
        surface.close(b);
        assert_eq!(
            surface.drain_events(),
            vec![DocumentEvent::Opened(b), DocumentEvent::Closed(b)]
        );

        surface.unobserve(sub);
        surface.open(None);
        assert!(surface.drain_events().is_empty());
    }

    #[test]
    fn closing_active_document_moves_focus() {
        let mut surface = MemorySurface::new();
        let a = surface.open(Some("/a.py"));
        let b = surface.open(Some("/b.py"));
        assert_eq!(surface.active_document(), Some(b));
        surface.close(b);
        assert_eq!(surface.active_document(), Some(a));
        assert_eq!(surface.document_path(b), None);
    }
}
