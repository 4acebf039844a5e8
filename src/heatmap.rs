//! Reference profiler backend: turns a vprof `stats.prof` dump into a framed heatline report.
//!
//! This is what `heatline emit` runs, so the binary can stand in as the external profiler.

use serde::Deserialize;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::{
    ColorMode, FileProfile, HeatlineError, HeatlineResult, LineStat, Rgb, StatsModel,
    encode_report,
};

pub const STATS_FILE: &str = "stats.prof";

/// Steepness of the heat curve.
const HEAT_K: f64 = 6.0;

#[derive(Debug, Deserialize)]
struct ProfileDump {
    h: HeatmapSection,
}

#[derive(Debug, Deserialize)]
struct HeatmapSection {
    heatmaps: Vec<FileHeatmap>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileHeatmap {
    pub name: String,
    /// 1-based line number -> seconds spent on the line.
    pub heatmap: BTreeMap<String, f64>,
    #[serde(rename = "executionCount", default)]
    pub execution_count: BTreeMap<String, u64>,
}

/// Find the dump for `path`: a directory's own `stats.prof`, a `.prof` file itself, or for a
/// source file the nearest `stats.prof` in its ancestors.
pub fn locate_stats(path: &Path) -> Option<PathBuf> {
    if path.is_dir() {
        return Some(path.join(STATS_FILE));
    }
    if path.extension().is_some_and(|ext| ext == "prof") {
        return Some(path.to_path_buf());
    }
    path.ancestors()
        .skip(1)
        .map(|dir| dir.join(STATS_FILE))
        .find(|candidate| candidate.is_file())
}

pub fn load_heatmaps(path: &Path) -> HeatlineResult<Vec<FileHeatmap>> {
    let not_found = || {
        HeatlineError::InvalidArgument(format!(
            "No '{STATS_FILE}' file found for {}",
            path.display()
        ))
    };
    let stats_path = locate_stats(path).ok_or_else(not_found)?;
    let bytes = match std::fs::read(&stats_path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => return Err(e.into()),
    };
    let dump: ProfileDump = serde_json::from_slice(&bytes)?;
    Ok(dump.h.heatmaps)
}

pub fn build_report(
    heatmaps: &[FileHeatmap],
    mode: ColorMode,
    template: &str,
) -> HeatlineResult<StatsModel> {
    let mut files = Vec::with_capacity(heatmaps.len());
    for file in heatmaps {
        files.push(build_file(file, mode, template)?);
    }
    Ok(StatsModel::new(files))
}

/// Load, convert and frame in one step.
pub fn emit_report(path: &Path, mode: ColorMode, template: &str) -> HeatlineResult<String> {
    let heatmaps = load_heatmaps(path)?;
    encode_report(&build_report(&heatmaps, mode, template)?)
}

struct Row {
    line: u32,
    calls: u64,
    exec_time: f64,
}

impl Row {
    fn total_time(&self) -> f64 {
        self.exec_time * self.calls as f64
    }

    fn value(&self, mode: ColorMode) -> f64 {
        match mode {
            ColorMode::Calls => self.calls as f64,
            ColorMode::ExecTime => self.exec_time,
            ColorMode::TotalTime => self.total_time(),
        }
    }
}

fn build_file(file: &FileHeatmap, mode: ColorMode, template: &str) -> HeatlineResult<FileProfile> {
    let mut rows = Vec::with_capacity(file.heatmap.len());
    for (key, exec_time) in &file.heatmap {
        let line: u32 = key.trim().parse().map_err(|_| {
            HeatlineError::InvalidArgument(format!("bad line number {key:?} in {}", file.name))
        })?;
        let calls = file.execution_count.get(key).copied().unwrap_or_else(|| {
            tracing::debug!("{}:{line} has no execution count", file.name);
            0
        });
        rows.push(Row {
            line,
            calls,
            exec_time: *exec_time,
        });
    }
    rows.sort_by_key(|r| r.line);

    let max = rows.iter().map(|r| r.value(mode)).fold(0.0_f64, f64::max);
    let mut longest_label = String::new();
    let lines = rows
        .iter()
        .map(|row| {
            let label = format_label(template, row.calls, row.exec_time, row.total_time());
            if label.chars().count() > longest_label.chars().count() {
                longest_label = label.clone();
            }
            LineStat {
                line_index: row.line.saturating_sub(1),
                label,
                color: Some(heat_color(row.value(mode), max)),
            }
        })
        .collect();

    Ok(FileProfile {
        file_path: file.name.clone(),
        longest_label,
        lines,
    })
}

/// Red for the hottest lines, green for the coolest.
pub fn heat_color(value: f64, max: f64) -> Rgb {
    let amount = if max > 0.0 {
        255.0 * (1.0 - (-HEAT_K * value / max).exp())
    } else {
        0.0
    };
    let red = amount.round().clamp(0.0, 255.0) as u8;
    Rgb(red, 255 - red, 0)
}

/// Expand `%calls`, `%exec_time` and `%total_time`; everything else is literal.
pub fn format_label(template: &str, calls: u64, exec_time: f64, total_time: f64) -> String {
    template
        .replace("%calls", &calls.to_string())
        .replace("%exec_time", &format_seconds(exec_time))
        .replace("%total_time", &format_seconds(total_time))
}

/// Two significant digits; milliseconds below ten seconds.
pub fn format_seconds(seconds: f64) -> String {
    if seconds >= 10.0 {
        format!("{}s", two_significant(seconds))
    } else {
        format!("{}ms", two_significant(seconds * 1000.0))
    }
}

fn two_significant(x: f64) -> f64 {
    if x == 0.0 || !x.is_finite() {
        return x;
    }
    let digits = 1 - x.abs().log10().floor() as i32;
    if digits >= 0 {
        let scale = 10f64.powi(digits);
        (x * scale).round() / scale
    } else {
        let step = 10f64.powi(-digits);
        (x / step).round() * step
    }
}
