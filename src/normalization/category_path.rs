use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Separator used by the normalized string form of a category path.
pub const PATH_SEPARATOR: char = '/';

/// Reason a raw category path could not be normalized.
///
/// Callers treat every variant as a row-level problem: the row is skipped and the run
/// continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidPath {
    #[error("category path is missing")]
    Missing,
    #[error("category path is not a string (got {0})")]
    NotAString(&'static str),
    #[error("category path has no non-empty segments")]
    Empty,
}

/// One step of the root-to-leaf trail embedded in product documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breadcrumb {
    /// 1-based depth of the segment.
    pub level: usize,
    pub name: String,
}

/// Canonical form of a hierarchical category path.
///
/// Holds at least one segment; every segment is trimmed and non-empty. Two raw paths
/// that differ only in separator style (`\` vs `/`) or surrounding whitespace produce
/// equal values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedPath {
    joined: String,
    segments: Vec<String>,
}

impl NormalizedPath {
    /// Normalized string form (`a/b/c`).
    pub fn as_str(&self) -> &str {
        &self.joined
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments; always at least 1.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Last segment, used as the category name.
    pub fn leaf(&self) -> &str {
        self.segments
            .last()
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// All segments except the leaf joined by `/`; `None` for a root category.
    pub fn parent_path(&self) -> Option<String> {
        if self.depth() > 1 {
            Some(self.segments[..self.depth() - 1].join("/"))
        } else {
            None
        }
    }

    /// Root-to-leaf trail with 1-based levels.
    pub fn breadcrumbs(&self) -> Vec<Breadcrumb> {
        self.segments
            .iter()
            .enumerate()
            .map(|(idx, name)| Breadcrumb {
                level: idx + 1,
                name: name.clone(),
            })
            .collect()
    }
}

impl std::fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.joined)
    }
}

/// Normalize a raw string path.
///
/// Steps:
/// - replace every `\` with `/`
/// - split on `/`
/// - trim whitespace around each segment
/// - drop empty segments
pub fn normalize_str(raw: &str) -> Result<NormalizedPath, InvalidPath> {
    let segments: Vec<String> = raw
        .replace('\\', "/")
        .split(PATH_SEPARATOR)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();

    if segments.is_empty() {
        return Err(InvalidPath::Empty);
    }

    Ok(NormalizedPath {
        joined: segments.join("/"),
        segments,
    })
}

/// Normalize a cell value read from a row source.
///
/// Only JSON strings are accepted; null, numbers, booleans and nested values are
/// rejected so a stray numeric cell never turns into a one-segment category.
pub fn normalize(raw: Option<&Value>) -> Result<NormalizedPath, InvalidPath> {
    match raw {
        None | Some(Value::Null) => Err(InvalidPath::Missing),
        Some(Value::String(s)) => normalize_str(s),
        Some(Value::Bool(_)) => Err(InvalidPath::NotAString("bool")),
        Some(Value::Number(_)) => Err(InvalidPath::NotAString("number")),
        Some(Value::Array(_)) => Err(InvalidPath::NotAString("array")),
        Some(Value::Object(_)) => Err(InvalidPath::NotAString("object")),
    }
}
