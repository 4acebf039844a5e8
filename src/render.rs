//! Per-document annotation rendering.
//!
//! The renderer remembers every marker it places so a re-render removes exactly its own markers
//! and leaves other decoration sources alone.

use serde::Serialize;

use std::collections::BTreeMap;

use crate::{DocumentId, FileProfile, LineRange, LineStat, MarkerId, Rgb, Surface};

pub const GUTTER_NAME: &str = "heatline";

/// Horizontal fade from `color` at `start_alpha` to fully transparent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Gradient {
    pub color: Rgb,
    pub start_alpha: f32,
    pub end_alpha: f32,
}

impl Gradient {
    pub fn fade(color: Rgb) -> Self {
        Self {
            color,
            start_alpha: 0.1,
            end_alpha: 0.0,
        }
    }

    pub fn css(&self) -> String {
        let Rgb(r, g, b) = self.color;
        format!(
            "linear-gradient(90deg, rgba({r}, {g}, {b}, {}), rgba({r}, {g}, {b}, {}))",
            self.start_alpha, self.end_alpha
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub text: String,
    pub background: Option<Gradient>,
}

impl Annotation {
    pub fn for_line(line: &LineStat) -> Self {
        Self {
            text: line.label.clone(),
            background: line.color.map(Gradient::fade),
        }
    }
}

#[derive(Debug, Default)]
pub struct DecorationRenderer {
    placed: BTreeMap<DocumentId, Vec<MarkerId>>,
}

impl DecorationRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace this renderer's annotations on `doc` with those for `profile`.
    pub fn render<S: Surface + ?Sized>(
        &mut self,
        surface: &mut S,
        doc: DocumentId,
        profile: Option<&FileProfile>,
    ) {
        self.clear(surface, doc);

        let Some(profile) = profile.filter(|p| !p.lines.is_empty()) else {
            return;
        };

        surface.add_gutter(doc, GUTTER_NAME, &profile.longest_label);
        let markers = profile
            .lines
            .iter()
            .map(|line| {
                surface.add_marker(
                    doc,
                    GUTTER_NAME,
                    LineRange::whole_line(line.line_index),
                    Annotation::for_line(line),
                )
            })
            .collect::<Vec<_>>();
        tracing::debug!(
            "annotated {} lines of {} ({doc:?})",
            markers.len(),
            profile.file_path
        );
        self.placed.insert(doc, markers);
    }

    pub fn clear<S: Surface + ?Sized>(&mut self, surface: &mut S, doc: DocumentId) {
        if let Some(markers) = self.placed.remove(&doc) {
            for marker in markers {
                surface.destroy_marker(doc, marker);
            }
        }
        surface.remove_gutter(doc, GUTTER_NAME);
    }

    /// Drop bookkeeping for a document the host already discarded.
    pub fn forget(&mut self, doc: DocumentId) {
        self.placed.remove(&doc);
    }

    pub fn marker_count(&self, doc: DocumentId) -> usize {
        self.placed.get(&doc).map_or(0, Vec::len)
    }
}
