use anyhow::Result;
use heatline::{ProfileError, Rgb, SessionStatus};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct ShowReport {
    pub status: SessionStatus,
    pub error: Option<ProfileError>,
    pub documents: Vec<DocumentReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub path: String,
    #[serde(rename = "widthHint")]
    pub width_hint: Option<String>,
    pub annotations: Vec<AnnotationRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnotationRow {
    #[serde(rename = "lineIndex")]
    pub line_index: u32,
    pub text: String,
    pub color: Option<Rgb>,
    pub background: Option<String>,
}

pub struct CliLogger {
    json: bool,
    no_color: bool,
}

impl CliLogger {
    pub fn new(json: bool, no_color: bool) -> Self {
        Self { json, no_color }
    }

    pub fn print_serialized<T: Serialize>(&self, value: &T) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(value)?);
            return Ok(());
        }

        let rendered = render_value(&serde_json::to_value(value)?, 0);
        println!("{rendered}");
        Ok(())
    }

    pub fn print_show(&self, report: &ShowReport) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(report)?);
            return Ok(());
        }

        let status = match report.status {
            SessionStatus::Ready => self.style("READY", "32;1"),
            SessionStatus::Failed => self.style("FAILED", "31;1"),
            SessionStatus::Running => self.style("RUNNING", "33;1"),
            SessionStatus::Idle => self.style("IDLE", "37;1"),
        };

        let mut out = String::new();
        out.push_str(&format!("{} {}\n", self.style("heatline", "36;1"), status));
        if let Some(err) = &report.error {
            out.push_str(&format!(
                "{} [{}] {}\n",
                self.style("error", "90"),
                err.kind.as_str(),
                err.message
            ));
        }

        for doc in &report.documents {
            out.push_str(&format!("{}\n", self.style(&doc.path, "37;1")));
            if doc.annotations.is_empty() {
                out.push_str(&format!("  {}\n", self.style("(no annotations)", "90")));
                continue;
            }
            let width = doc
                .width_hint
                .as_deref()
                .map(|w| w.chars().count())
                .unwrap_or_default();
            for row in &doc.annotations {
                out.push_str(&format!(
                    "  {} {}{:<width$}\n",
                    self.style(&format!("{:>5}", row.line_index + 1), "90"),
                    self.swatch(row.color),
                    row.text,
                ));
            }
        }

        println!("{}", out.trim_end());
        Ok(())
    }

    pub fn print_error(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "error",
                "message": msg,
            });
            eprintln!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("error", "31;1"));
    }

    pub fn print_warning(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "warning",
                "message": msg,
            });
            eprintln!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("warn", "33;1"));
    }

    fn swatch(&self, color: Option<Rgb>) -> String {
        match color {
            Some(Rgb(r, g, b)) if !self.no_color => format!("\x1b[48;2;{r};{g};{b}m \x1b[0m "),
            _ => "  ".to_string(),
        }
    }

    fn style(&self, text: &str, ansi: &str) -> String {
        if self.no_color {
            return text.to_string();
        }
        format!("\x1b[{ansi}m{text}\x1b[0m")
    }
}

fn render_value(value: &Value, indent: usize) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Number(v) => v.to_string(),
        Value::String(v) => v.clone(),
        Value::Array(items) if items.is_empty() => "[]".to_string(),
        Value::Object(map) if map.is_empty() => "{}".to_string(),
        Value::Array(items) => {
            let pad = " ".repeat(indent);
            let lines: Vec<String> = items
                .iter()
                .map(|item| match item {
                    Value::Object(_) | Value::Array(_) => {
                        format!("{pad}-\n{}", render_value(item, indent + 2))
                    }
                    _ => format!("{pad}- {}", render_value(item, indent + 2)),
                })
                .collect();
            lines.join("\n")
        }
        Value::Object(map) => {
            let pad = " ".repeat(indent);
            let lines: Vec<String> = map
                .iter()
                .map(|(key, item)| match item {
                    Value::Object(o) if !o.is_empty() => {
                        format!("{pad}{key}:\n{}", render_value(item, indent + 2))
                    }
                    Value::Array(a) if !a.is_empty() => {
                        format!("{pad}{key}:\n{}", render_value(item, indent + 2))
                    }
                    _ => format!("{pad}{key}: {}", render_value(item, indent + 2)),
                })
                .collect();
            lines.join("\n")
        }
    }
}
