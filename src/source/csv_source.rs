use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};
use serde_json::Value;

use super::{file_name, Projection, Row, RowSource, RowStream, SourceError};

/// Header-first CSV (or TSV) file. Every cell is read as a string; empty cells become
/// `Null` so they behave like missing values downstream.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
    delimiter: u8,
}

impl CsvSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let delimiter = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
            _ => b',',
        };
        Self { path, delimiter }
    }
}

impl RowSource for CsvSource {
    fn name(&self) -> String {
        file_name(&self.path)
    }

    fn open(&self, projection: &Projection) -> Result<RowStream, SourceError> {
        if !self.path.exists() {
            return Err(SourceError::NotFound(self.path.clone()));
        }
        let display = self.path.display().to_string();
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_path(&self.path)
            .map_err(|e| SourceError::Open {
                path: display.clone(),
                reason: e.to_string(),
            })?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| SourceError::Open {
                path: display.clone(),
                reason: e.to_string(),
            })?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        // (column name, header position) for every projected column.
        let selected: Vec<(String, usize)> = match projection {
            Projection::All => headers.iter().cloned().zip(0..).collect(),
            Projection::Columns(cols) => cols
                .iter()
                .map(|col| {
                    headers
                        .iter()
                        .position(|h| h == col)
                        .map(|idx| (col.clone(), idx))
                        .ok_or_else(|| SourceError::MissingColumn {
                            path: display.clone(),
                            column: col.clone(),
                        })
                })
                .collect::<Result<_, _>>()?,
        };

        let rows = reader
            .into_records()
            .enumerate()
            .map(move |(idx, record)| {
                record
                    .map(|record| record_to_row(&record, &selected))
                    .map_err(|e| SourceError::Row {
                        row: idx as u64 + 1,
                        reason: e.to_string(),
                    })
            });
        Ok(Box::new(rows))
    }
}

fn record_to_row(record: &StringRecord, selected: &[(String, usize)]) -> Row {
    selected
        .iter()
        .map(|(name, idx)| {
            let value = match record.get(*idx) {
                Some(cell) if !cell.is_empty() => Value::String(cell.to_string()),
                _ => Value::Null,
            };
            (name.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_all_columns_with_empty_cells_as_null() {
        let file = write_csv(
            "Partner_Name,Category_ID,Category_FullPathName,Offer_ID\nOzonP,55,Электроника\\Смартфоны,9\nOzonP,56,,10\n",
        );
        let rows: Vec<Row> = CsvSource::new(file.path())
            .open(&Projection::All)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Category_FullPathName"], json!("Электроника\\Смартфоны"));
        assert_eq!(rows[1]["Category_FullPathName"], Value::Null);
    }

    #[test]
    fn projection_selects_named_columns() {
        let file = write_csv("a,b,c\n1,2,3\n");
        let source = CsvSource::new(file.path());
        let rows: Vec<Row> = source
            .open(&Projection::columns(["c", "a"]))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows[0].keys().collect::<Vec<_>>(), vec!["c", "a"]);

        // re-opening starts from the first row again
        assert_eq!(source.open(&Projection::All).unwrap().count(), 1);
    }

    #[test]
    fn missing_projected_column_fails_at_open() {
        let file = write_csv("a,b\n1,2\n");
        let err = CsvSource::new(file.path())
            .open(&Projection::columns(["z"]))
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::MissingColumn { .. }));
    }
}
