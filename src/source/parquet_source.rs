use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::reader::RowIter;
use parquet::record::Field;
use parquet::schema::types::Type;
use serde_json::{Number, Value};

use super::{file_name, Projection, Row, RowSource, RowStream, SourceError};

/// Parquet snapshot read through the row API. Projected reads only decode the
/// requested top-level columns.
#[derive(Debug, Clone)]
pub struct ParquetSource {
    path: PathBuf,
}

impl ParquetSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn open_error(&self, err: impl std::fmt::Display) -> SourceError {
        SourceError::Open {
            path: self.path.display().to_string(),
            reason: err.to_string(),
        }
    }

    /// Number of rows recorded in the file footer.
    pub fn row_count(&self) -> Result<u64, SourceError> {
        let file = File::open(&self.path).map_err(|e| self.open_error(e))?;
        let reader = SerializedFileReader::new(file).map_err(|e| self.open_error(e))?;
        let rows = reader.metadata().file_metadata().num_rows();
        u64::try_from(rows).map_err(|e| self.open_error(e))
    }
}

impl RowSource for ParquetSource {
    fn name(&self) -> String {
        file_name(&self.path)
    }

    fn row_count_hint(&self) -> Option<u64> {
        self.row_count().ok()
    }

    fn open(&self, projection: &Projection) -> Result<RowStream, SourceError> {
        if !self.path.exists() {
            return Err(SourceError::NotFound(self.path.clone()));
        }
        let file = File::open(&self.path).map_err(|e| self.open_error(e))?;
        let reader = SerializedFileReader::new(file).map_err(|e| self.open_error(e))?;

        let schema_projection = match projection {
            Projection::All => None,
            Projection::Columns(cols) => {
                let schema = reader.metadata().file_metadata().schema();
                let fields = cols
                    .iter()
                    .map(|col| {
                        schema
                            .get_fields()
                            .iter()
                            .find(|f| f.name() == col)
                            .map(Arc::clone)
                            .ok_or_else(|| SourceError::MissingColumn {
                                path: self.path.display().to_string(),
                                column: col.clone(),
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let projected = Type::group_type_builder(schema.name())
                    .with_fields(fields)
                    .build()
                    .map_err(|e| self.open_error(e))?;
                Some(projected)
            }
        };

        let iter = RowIter::from_file_into(Box::new(reader))
            .project(schema_projection)
            .map_err(|e| self.open_error(e))?;

        let projection = projection.clone();
        let rows = iter.enumerate().map(move |(idx, row)| {
            let row = row.map_err(|e| SourceError::Row {
                row: idx as u64 + 1,
                reason: e.to_string(),
            })?;
            let decoded: Row = row
                .get_column_iter()
                .map(|(name, field)| (name.clone(), field_to_value(field)))
                .collect();
            Ok(projection.apply(decoded))
        });
        Ok(Box::new(rows))
    }
}

/// Scalars map to their JSON counterparts; anything else (dates, decimals, nested groups)
/// is carried as its display string.
fn field_to_value(field: &Field) -> Value {
    match field {
        Field::Null => Value::Null,
        Field::Bool(b) => Value::Bool(*b),
        Field::Byte(v) => Value::from(*v),
        Field::Short(v) => Value::from(*v),
        Field::Int(v) => Value::from(*v),
        Field::Long(v) => Value::from(*v),
        Field::UByte(v) => Value::from(*v),
        Field::UShort(v) => Value::from(*v),
        Field::UInt(v) => Value::from(*v),
        Field::ULong(v) => Value::from(*v),
        Field::Float(v) => Number::from_f64(f64::from(*v))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Field::Double(v) => Number::from_f64(*v).map(Value::Number).unwrap_or(Value::Null),
        Field::Str(s) => Value::String(s.clone()),
        other => Value::String(other.to_string()),
    }
}
