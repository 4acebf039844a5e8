//! Parsed profiling report: per-file, per-line stats.
//!
//! The profiler frames its JSON report between `DATA_START` and `DATA_END` on stdout. Anything
//! outside the markers is incidental output and ignored. The payload runs from the first
//! `DATA_START` to the last `DATA_END`, so labels may contain the marker text.

use serde::{Deserialize, Serialize};

use std::collections::BTreeSet;

use crate::{HeatlineResult, ProfileError, ProfileErrorKind};

pub const DATA_START: &str = "DATA_START";
pub const DATA_END: &str = "DATA_END";

/// Background emphasis color. Channels arrive as floats on the wire and are rounded into range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 3]")]
pub struct Rgb(pub u8, pub u8, pub u8);

impl TryFrom<[f64; 3]> for Rgb {
    type Error = String;

    fn try_from(value: [f64; 3]) -> Result<Self, Self::Error> {
        let mut out = [0u8; 3];
        for (slot, channel) in out.iter_mut().zip(value) {
            if !channel.is_finite() {
                return Err(format!("color channel {channel} is not a finite number"));
            }
            *slot = channel.round().clamp(0.0, 255.0) as u8;
        }
        Ok(Self(out[0], out[1], out[2]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireLineStat", into = "WireLineStat")]
pub struct LineStat {
    /// Zero-based line in the profiled file.
    pub line_index: u32,
    pub label: String,
    pub color: Option<Rgb>,
}

/// `[line, label]` or `[line, label, color]`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireLineStat {
    Full(i64, String, Option<Rgb>),
    Short(i64, String),
}

impl TryFrom<WireLineStat> for LineStat {
    type Error = String;

    fn try_from(value: WireLineStat) -> Result<Self, Self::Error> {
        let (index, label, color) = match value {
            WireLineStat::Full(index, label, color) => (index, label, color),
            WireLineStat::Short(index, label) => (index, label, None),
        };
        let line_index = u32::try_from(index)
            .map_err(|_| format!("line index {index} is out of range"))?;
        Ok(Self {
            line_index,
            label,
            color,
        })
    }
}

impl From<LineStat> for WireLineStat {
    fn from(value: LineStat) -> Self {
        Self::Full(i64::from(value.line_index), value.label, value.color)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProfile {
    /// Join key against an open document's backing path; compared by exact string equality.
    pub file_path: String,
    /// Width hint for the annotation column.
    #[serde(rename = "longest", default)]
    pub longest_label: String,
    #[serde(rename = "stats")]
    pub lines: Vec<LineStat>,
}

impl FileProfile {
    fn dedup_lines(&mut self) {
        let mut seen = BTreeSet::new();
        let before = self.lines.len();
        self.lines.retain(|line| seen.insert(line.line_index));
        if self.lines.len() != before {
            tracing::debug!(
                "dropped {} duplicate line stats for {}",
                before - self.lines.len(),
                self.file_path
            );
        }
    }
}

/// One completed run's report. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StatsModel {
    files: Vec<FileProfile>,
}

impl StatsModel {
    pub fn new(mut files: Vec<FileProfile>) -> Self {
        for file in &mut files {
            file.dedup_lines();
        }
        Self { files }
    }

    pub fn files(&self) -> &[FileProfile] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// First profile whose path matches `path` exactly.
    pub fn profile_for(&self, path: &str) -> Option<&FileProfile> {
        self.files.iter().find(|f| f.file_path == path)
    }

    pub fn line_count(&self) -> usize {
        self.files.iter().map(|f| f.lines.len()).sum()
    }
}

/// Parse accumulated profiler stdout into a model.
pub fn parse_report(raw: &str) -> Result<StatsModel, ProfileError> {
    if raw.trim().is_empty() {
        return Err(ProfileError::new(
            ProfileErrorKind::EmptyOutput,
            "profiler produced no output",
        ));
    }

    let Some(start) = raw.find(DATA_START) else {
        return Err(ProfileError::malformed(format!(
            "missing {DATA_START}/{DATA_END} markers in profiler output"
        )));
    };
    let body = &raw[start + DATA_START.len()..];
    let Some(end) = body.rfind(DATA_END) else {
        return Err(ProfileError::malformed(format!(
            "missing {DATA_END} marker after {DATA_START}"
        )));
    };

    let payload = body[..end].trim();
    if payload.is_empty() {
        return Err(ProfileError::malformed(format!(
            "empty report between {DATA_START} and {DATA_END}"
        )));
    }

    let files: Vec<FileProfile> = serde_json::from_str(payload)
        .map_err(|e| ProfileError::malformed(format!("invalid report: {e}")))?;
    Ok(StatsModel::new(files))
}

/// Framed wire form of `model`, accepted back by [`parse_report`].
pub fn encode_report(model: &StatsModel) -> HeatlineResult<String> {
    let json = serde_json::to_string(model)?;
    Ok(format!("{DATA_START}{json}{DATA_END}"))
}
