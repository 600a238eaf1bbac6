use super::{Projection, Row, RowSource, RowStream, SourceError};

/// Rows held in memory. Used by tests and by callers that already decoded a snapshot.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    name: String,
    rows: Vec<Row>,
}

impl VecSource {
    pub fn new(name: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }
}

impl RowSource for VecSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn open(&self, projection: &Projection) -> Result<RowStream, SourceError> {
        let projection = projection.clone();
        let rows = self.rows.clone();
        Ok(Box::new(
            rows.into_iter().map(move |row| Ok(projection.apply(row))),
        ))
    }

    fn row_count_hint(&self) -> Option<u64> {
        Some(self.rows.len() as u64)
    }
}
