use crate::config::schema::RecordsConfig;
use calamine::{Data, Reader};
use crmsync_common::record::{Identifier, Record};
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Workbook error: {0}")]
    Workbook(#[from] calamine::Error),
    #[error("Workbook {0} has no worksheet")]
    NoWorksheet(PathBuf),
    #[error("Identifier column '{0}' not found in header")]
    MissingIdentifierColumn(String),
    #[error("None of the mapped columns are present in the header")]
    NoMappedColumns,
    #[error("Invalid column mapping '{0}', expected field=Column")]
    InvalidMapping(String),
}

/// Which column holds the identifier and which columns feed which field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub identifier_column: String,
    /// (field name, column header)
    pub fields: Vec<(String, String)>,
}

impl ColumnMapping {
    pub fn new(identifier_column: impl Into<String>) -> Self {
        Self {
            identifier_column: identifier_column.into(),
            fields: Vec::new(),
        }
    }

    pub fn from_config(config: &RecordsConfig) -> Self {
        Self {
            identifier_column: config.identifier_column.clone(),
            fields: config
                .columns
                .iter()
                .map(|(field, column)| (field.clone(), column.clone()))
                .collect(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>, column: impl Into<String>) -> Self {
        self.set_field(field.into(), column.into());
        self
    }

    fn set_field(&mut self, field: String, column: String) {
        match self.fields.iter_mut().find(|(f, _)| *f == field) {
            Some(existing) => existing.1 = column,
            None => self.fields.push((field, column)),
        }
    }

    /// Apply a `field=Column` override.
    pub fn apply_override(&mut self, spec: &str) -> Result<(), SourceError> {
        let Some((field, column)) = spec.split_once('=') else {
            return Err(SourceError::InvalidMapping(spec.to_string()));
        };
        let (field, column) = (field.trim(), column.trim());
        if field.is_empty() || column.is_empty() {
            return Err(SourceError::InvalidMapping(spec.to_string()));
        }
        self.set_field(field.to_string(), column.to_string());
        Ok(())
    }
}

/// A finite, restartable sequence of records.
pub trait RecordSource {
    type Iter: Iterator<Item = Result<Record, SourceError>>;

    /// Start a fresh pass over the records.
    fn records(&self) -> Result<Self::Iter, SourceError>;
}

/// Records from a CSV file with a header row. The file is reopened on every
/// pass.
#[derive(Debug, Clone)]
pub struct CsvRecordSource {
    path: PathBuf,
    mapping: ColumnMapping,
}

impl CsvRecordSource {
    pub fn new(path: impl Into<PathBuf>, mapping: ColumnMapping) -> Self {
        Self {
            path: path.into(),
            mapping,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Header positions of the identifier and of every mapped field present.
struct Columns {
    identifier: usize,
    /// (field name, column index), in column order
    fields: Vec<(String, usize)>,
}

impl Columns {
    fn resolve(mapping: &ColumnMapping, headers: &[String], path: &Path) -> Result<Self, SourceError> {
        let column = |name: &str| headers.iter().position(|h| h.trim() == name.trim());

        let identifier = column(&mapping.identifier_column).ok_or_else(|| {
            SourceError::MissingIdentifierColumn(mapping.identifier_column.clone())
        })?;

        let mut fields = Vec::new();
        for (field, header) in &mapping.fields {
            match column(header) {
                Some(index) => fields.push((field.clone(), index)),
                None => {
                    warn!(
                        "Column '{}' for field {} not found in {}",
                        header,
                        field,
                        path.display()
                    );
                }
            }
        }
        if fields.is_empty() {
            return Err(SourceError::NoMappedColumns);
        }
        fields.sort_by_key(|(_, index)| *index);

        debug!(
            "Reading records from {} ({} mapped columns)",
            path.display(),
            fields.len()
        );
        Ok(Self { identifier, fields })
    }

    /// Build the record for one data row, or `None` when it has no identifier.
    fn record<'a>(&self, cell: impl Fn(usize) -> Option<&'a str>, row: u64) -> Option<Record> {
        let identifier = Identifier::new(cell(self.identifier).unwrap_or_default());
        if identifier.is_empty() {
            warn!("Skipping row {} without identifier", row);
            return None;
        }
        let fields = self.fields.iter().map(|(field, index)| {
            (field.clone(), cell(*index).unwrap_or_default().trim().to_string())
        });
        Some(Record::new(identifier, fields))
    }
}

impl RecordSource for CsvRecordSource {
    type Iter = CsvRecords;

    fn records(&self) -> Result<CsvRecords, SourceError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let columns = Columns::resolve(&self.mapping, &headers, &self.path)?;

        Ok(CsvRecords {
            rows: reader.into_records(),
            columns,
            row: 1,
        })
    }
}

pub struct CsvRecords {
    rows: csv::StringRecordsIntoIter<File>,
    columns: Columns,
    row: u64,
}

impl Iterator for CsvRecords {
    type Item = Result<Record, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let row = match self.rows.next()? {
                Ok(row) => row,
                Err(e) => return Some(Err(e.into())),
            };
            self.row += 1;

            if let Some(record) = self.columns.record(|i| row.get(i), self.row) {
                return Some(Ok(record));
            }
        }
    }
}

/// Records from the first worksheet of an Excel or OpenDocument workbook.
/// The first row of the sheet is the header.
#[derive(Debug, Clone)]
pub struct XlsxRecordSource {
    path: PathBuf,
    mapping: ColumnMapping,
}

impl XlsxRecordSource {
    pub fn new(path: impl Into<PathBuf>, mapping: ColumnMapping) -> Self {
        Self {
            path: path.into(),
            mapping,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSource for XlsxRecordSource {
    type Iter = XlsxRecords;

    fn records(&self) -> Result<XlsxRecords, SourceError> {
        let mut workbook = calamine::open_workbook_auto(&self.path)?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| SourceError::NoWorksheet(self.path.clone()))??;

        let mut rows = range
            .rows()
            .map(|row| row.iter().map(cell_text).collect::<Vec<_>>());
        let headers = rows.next().unwrap_or_default();
        let columns = Columns::resolve(&self.mapping, &headers, &self.path)?;

        Ok(XlsxRecords {
            rows: rows.collect::<Vec<_>>().into_iter(),
            columns,
            row: 1,
        })
    }
}

pub struct XlsxRecords {
    rows: std::vec::IntoIter<Vec<String>>,
    columns: Columns,
    row: u64,
}

impl Iterator for XlsxRecords {
    type Item = Result<Record, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let row = self.rows.next()?;
            self.row += 1;

            let cell = |i: usize| row.get(i).map(String::as_str);
            if let Some(record) = self.columns.record(cell, self.row) {
                return Some(Ok(record));
            }
        }
    }
}

/// Cell value as the text a user would have typed. Integral floats lose
/// their fraction so `1234.0` reads as `1234`.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        other => other.to_string().trim().to_string(),
    }
}

/// A record file whose format follows from its extension: `.xlsx`, `.xlsm`,
/// `.xlsb`, `.xls` and `.ods` are workbooks, anything else is CSV.
#[derive(Debug, Clone)]
pub enum FileRecordSource {
    Csv(CsvRecordSource),
    Xlsx(XlsxRecordSource),
}

impl FileRecordSource {
    pub fn from_path(path: impl Into<PathBuf>, mapping: ColumnMapping) -> Self {
        let path = path.into();
        let is_workbook = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                matches!(
                    ext.to_ascii_lowercase().as_str(),
                    "xlsx" | "xlsm" | "xlsb" | "xls" | "ods"
                )
            })
            .unwrap_or(false);
        if is_workbook {
            Self::Xlsx(XlsxRecordSource::new(path, mapping))
        } else {
            Self::Csv(CsvRecordSource::new(path, mapping))
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Csv(source) => source.path(),
            Self::Xlsx(source) => source.path(),
        }
    }
}

impl RecordSource for FileRecordSource {
    type Iter = Box<dyn Iterator<Item = Result<Record, SourceError>>>;

    fn records(&self) -> Result<Self::Iter, SourceError> {
        Ok(match self {
            Self::Csv(source) => Box::new(source.records()?),
            Self::Xlsx(source) => Box::new(source.records()?),
        })
    }
}

/// Records held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordSource {
    records: Vec<Record>,
}

impl MemoryRecordSource {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordSource for MemoryRecordSource {
    type Iter = std::vec::IntoIter<Result<Record, SourceError>>;

    fn records(&self) -> Result<Self::Iter, SourceError> {
        Ok(self
            .records
            .iter()
            .cloned()
            .map(Ok)
            .collect::<Vec<_>>()
            .into_iter())
    }
}
