//! Text-valued tabular data passed between sources and the warehouse

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Row has {actual} values but the frame has {expected} columns")]
    RowWidth { expected: usize, actual: usize },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Duplicate column name: {0}")]
    DuplicateColumn(String),
}

/// Column names plus rows of optional text values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataFrame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl DataFrame {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Option<String>>) -> Result<(), FrameError> {
        if row.len() != self.columns.len() {
            return Err(FrameError::RowWidth {
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Case-insensitive column lookup
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Append a column holding the same value on every row.
    ///
    /// An existing column of that name is overwritten instead.
    pub fn with_constant_column(mut self, name: &str, value: &str) -> Self {
        match self.column_index(name) {
            Some(idx) => {
                for row in &mut self.rows {
                    row[idx] = Some(value.to_string());
                }
            },
            None => {
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.push(Some(value.to_string()));
                }
            },
        }
        self
    }

    /// Values of one column, if it exists
    pub fn column_values(&self, name: &str) -> Option<impl Iterator<Item = Option<&str>> + '_> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| row[idx].as_deref()))
    }

    /// Parse a CSV file with a header row.
    ///
    /// Input is decoded as ISO-8859-1 so any byte sequence is accepted. Empty
    /// fields stay empty strings.
    pub fn from_csv(bytes: &[u8]) -> Result<Self, FrameError> {
        let text: String = bytes.iter().map(|&b| b as char).collect();

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(text.as_bytes());

        let columns: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.eq_ignore_ascii_case(column)) {
                return Err(FrameError::DuplicateColumn(column.clone()));
            }
        }

        let mut frame = DataFrame::new(columns);
        for record in reader.records() {
            let record = record?;
            frame.push_row(record.iter().map(|v| Some(v.to_string())).collect())?;
        }
        Ok(frame)
    }

    /// CSV with a header row. NULL cells are written as empty fields.
    ///
    /// A frame without columns (an empty query result) yields no bytes.
    pub fn to_csv(&self) -> Result<Vec<u8>, FrameError> {
        if self.columns.is_empty() {
            return Ok(Vec::new());
        }
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|v| v.as_deref().unwrap_or("")))?;
        }
        writer
            .into_inner()
            .map_err(|e| FrameError::Csv(csv::Error::from(e.into_error())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_csv_keeps_empty_fields() {
        let frame = DataFrame::from_csv(b"id,name,city\n1,Ann,\n2,,Oslo\n").unwrap();
        assert_eq!(frame.columns, vec!["id", "name", "city"]);
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.rows[0][2], Some(String::new()));
        assert_eq!(frame.rows[1][1], Some(String::new()));
    }

    #[test]
    fn test_from_csv_decodes_latin1() {
        let frame = DataFrame::from_csv(b"name\nJos\xe9\n").unwrap();
        assert_eq!(frame.rows[0][0].as_deref(), Some("José"));
    }

    #[test]
    fn test_ragged_csv_is_rejected() {
        assert!(DataFrame::from_csv(b"a,b\n1,2,3\n").is_err());
    }

    #[test]
    fn test_duplicate_header_is_rejected() {
        let err = DataFrame::from_csv(b"id,ID\n1,2\n").unwrap_err();
        assert!(matches!(err, FrameError::DuplicateColumn(_)));
    }

    #[test]
    fn test_constant_column() {
        let frame = DataFrame::from_csv(b"id\n1\n2\n")
            .unwrap()
            .with_constant_column("job_id", "j-1");
        assert_eq!(frame.column_index("JOB_ID"), Some(1));
        let values: Vec<_> = frame.column_values("job_id").unwrap().collect();
        assert_eq!(values, vec![Some("j-1"), Some("j-1")]);

        let frame = frame.with_constant_column("job_id", "j-2");
        assert_eq!(frame.columns.len(), 2);
        assert_eq!(frame.rows[0][1].as_deref(), Some("j-2"));
    }

    #[test]
    fn test_to_csv_writes_null_as_empty() {
        let mut frame = DataFrame::new(vec!["id".into(), "note".into()]);
        frame.push_row(vec![Some("1".into()), None]).unwrap();
        frame.push_row(vec![Some("2".into()), Some("a, b".into())]).unwrap();
        assert_eq!(frame.to_csv().unwrap(), b"id,note\n1,\n2,\"a, b\"\n".to_vec());
    }

    #[test]
    fn test_push_row_checks_width() {
        let mut frame = DataFrame::new(vec!["a".into()]);
        assert!(frame.push_row(vec![None, None]).is_err());
        frame.push_row(vec![None]).unwrap();
        assert_eq!(frame.len(), 1);
    }
}
