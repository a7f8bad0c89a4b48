use std::fmt;
use std::sync::Arc;

use csv::{QuoteStyle, Terminator, WriterBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::record::{Expiry, Metadata, Namespace};
use crate::store::RecordStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    Csv,
    Markdown,
}

impl ReportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
            ReportFormat::Markdown => "markdown",
        }
    }

    pub fn from_slug(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "json" => Some(ReportFormat::Json),
            "csv" => Some(ReportFormat::Csv),
            "markdown" | "md" => Some(ReportFormat::Markdown),
            _ => None,
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("{format} export requires {expected}")]
    UnsupportedShape {
        format: &'static str,
        expected: &'static str,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Renders result values into export formats and files them under the
/// `report` namespace.
pub struct ReportRenderer {
    store: Arc<RecordStore>,
}

impl ReportRenderer {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    /// JSON passes through untouched; CSV and Markdown come back as a string value.
    pub fn render(content: &Value, format: ReportFormat) -> Result<Value, RenderError> {
        match format {
            ReportFormat::Json => Ok(content.clone()),
            ReportFormat::Csv => render_csv(content).map(Value::String),
            ReportFormat::Markdown => Ok(Value::String(render_markdown(content))),
        }
    }

    pub async fn save(
        &self,
        key: &str,
        content: &Value,
        format: ReportFormat,
        expiry: impl Into<Expiry>,
    ) -> Result<String, RenderError> {
        let rendered = Self::render(content, format)?;
        let mut metadata = Metadata::new();
        metadata.insert("format".into(), Value::String(format.as_str().into()));
        metadata.insert("title".into(), Value::String(key.to_string()));
        let id = self
            .store
            .put(Namespace::Report, key, rendered, metadata, expiry)
            .await?;
        tracing::debug!(target: "tally::store", key, %format, id = %id, "report saved");
        Ok(id)
    }
}

/// Returns the rows when `content` is a sequence of objects.
fn flat_records(content: &Value) -> Option<Vec<&serde_json::Map<String, Value>>> {
    content.as_array()?.iter().map(Value::as_object).collect()
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Text (and nested JSON) is quoted with `"` doubled; numbers and booleans
/// are bare; missing and null cells are empty.
fn csv_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::String(s)) => quote_csv(s),
        Some(other) => quote_csv(&other.to_string()),
    }
}

fn quote_csv(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

fn render_csv(content: &Value) -> Result<String, RenderError> {
    let rows = flat_records(content).ok_or(RenderError::UnsupportedShape {
        format: "csv",
        expected: "a sequence of flat records",
    })?;
    let Some(first) = rows.first() else {
        return Ok(String::new());
    };
    let headers: Vec<&str> = first.keys().map(String::as_str).collect();

    let mut header = WriterBuilder::new()
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    header.write_record(&headers)?;

    // Cells arrive pre-quoted by JSON type; the writer must not requote them.
    let mut body = WriterBuilder::new()
        .quote_style(QuoteStyle::Never)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    for row in &rows {
        body.write_record(headers.iter().map(|h| csv_cell(row.get(*h))))?;
    }

    let mut out = header.into_inner().map_err(|err| err.into_error())?;
    out.extend(body.into_inner().map_err(|err| err.into_error())?);
    Ok(String::from_utf8_lossy(&out).into_owned())
}

fn markdown_cell(value: Option<&Value>) -> String {
    cell_text(value).replace('|', "\\|").replace('\n', " ")
}

fn render_markdown(content: &Value) -> String {
    let mut out = String::new();
    match content {
        Value::Array(items) if items.is_empty() => {}
        Value::Array(items) => match flat_records(content) {
            Some(rows) => {
                let headers: Vec<&String> = rows[0].keys().collect();
                let header_cells: Vec<String> = headers
                    .iter()
                    .map(|h| h.replace('|', "\\|"))
                    .collect();
                out.push_str(&format!("| {} |\n", header_cells.join(" | ")));
                out.push_str(&format!(
                    "| {} |\n",
                    vec!["---"; headers.len()].join(" | ")
                ));
                for row in rows {
                    let cells: Vec<String> = headers
                        .iter()
                        .map(|h| markdown_cell(row.get(h.as_str())))
                        .collect();
                    out.push_str(&format!("| {} |\n", cells.join(" | ")));
                }
            }
            None => {
                for item in items {
                    out.push_str(&format!("- {}\n", cell_text(Some(item))));
                }
            }
        },
        Value::Object(map) => {
            for (key, value) in map {
                out.push_str(&format!("**{}**: {}\n", key, cell_text(Some(value))));
            }
        }
        other => {
            out.push_str(&cell_text(Some(other)));
            out.push('\n');
        }
    }
    out
}
