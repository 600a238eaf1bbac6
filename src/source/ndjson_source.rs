use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::{file_name, Projection, RowSource, RowStream, SourceError};

/// One JSON object per line; blank lines are ignored.
#[derive(Debug, Clone)]
pub struct NdjsonSource {
    path: PathBuf,
}

impl NdjsonSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl RowSource for NdjsonSource {
    fn name(&self) -> String {
        file_name(&self.path)
    }

    fn open(&self, projection: &Projection) -> Result<RowStream, SourceError> {
        if !self.path.exists() {
            return Err(SourceError::NotFound(self.path.clone()));
        }
        let file = File::open(&self.path).map_err(|e| SourceError::Open {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        let projection = projection.clone();
        let rows = BufReader::new(file)
            .lines()
            .enumerate()
            .filter(|(_, line)| !matches!(line, Ok(l) if l.trim().is_empty()))
            .map(move |(idx, line)| {
                let row_no = idx as u64 + 1;
                let line = line.map_err(|e| SourceError::Row {
                    row: row_no,
                    reason: e.to_string(),
                })?;
                match serde_json::from_str::<Value>(&line) {
                    Ok(Value::Object(map)) => Ok(projection.apply(map.into_iter().collect())),
                    Ok(other) => Err(SourceError::Row {
                        row: row_no,
                        reason: format!("expected a JSON object, got {other}"),
                    }),
                    Err(e) => Err(SourceError::Row {
                        row: row_no,
                        reason: e.to_string(),
                    }),
                }
            });
        Ok(Box::new(rows))
    }
}
