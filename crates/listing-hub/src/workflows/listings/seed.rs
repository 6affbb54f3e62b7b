use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use super::domain::{CallerIdentity, ItemField, ItemId, ItemPayload, ItemStatus};
use super::lifecycle::{ItemLifecycleService, ItemServiceError};
use super::repository::{Authorizer, ItemRepository};

/// Image references inside a single CSV cell are separated by `|`.
const IMAGE_SEPARATOR: char = '|';

#[derive(Debug)]
pub enum SeedImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    Item { row: usize, source: ItemServiceError },
}

impl std::fmt::Display for SeedImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeedImportError::Io(err) => write!(f, "failed to read seed file: {}", err),
            SeedImportError::Csv(err) => write!(f, "invalid seed CSV data: {}", err),
            SeedImportError::Item { row, source } => {
                write!(f, "seed row {} was rejected: {}", row, source)
            }
        }
    }
}

impl std::error::Error for SeedImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SeedImportError::Io(err) => Some(err),
            SeedImportError::Csv(err) => Some(err),
            SeedImportError::Item { source, .. } => Some(source),
        }
    }
}

impl From<std::io::Error> for SeedImportError {
    fn from(err: std::io::Error) -> Self {
        SeedImportError::Io(err)
    }
}

impl From<csv::Error> for SeedImportError {
    fn from(err: csv::Error) -> Self {
        SeedImportError::Csv(err)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub imported: Vec<ItemId>,
    pub skipped_columns: Vec<String>,
}

/// Loads trusted catalog rows straight into `published` through the lifecycle, so every row
/// still passes strict validation. The first rejected row aborts the import; earlier rows stay.
pub struct SeedImporter<R, A> {
    lifecycle: Arc<ItemLifecycleService<R, A>>,
    operator: CallerIdentity,
}

impl<R, A> SeedImporter<R, A>
where
    R: ItemRepository + 'static,
    A: Authorizer + 'static,
{
    pub fn new(lifecycle: Arc<ItemLifecycleService<R, A>>, operator: CallerIdentity) -> Self {
        Self {
            lifecycle,
            operator,
        }
    }

    pub fn import_path(&self, path: impl AsRef<Path>) -> Result<SeedSummary, SeedImportError> {
        let file = File::open(path)?;
        self.import_reader(file)
    }

    pub fn import_reader<Rd: Read>(&self, reader: Rd) -> Result<SeedSummary, SeedImportError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let columns: Vec<Option<ItemField>> =
            headers.iter().map(ItemField::from_key).collect();
        let skipped_columns = headers
            .iter()
            .zip(&columns)
            .filter(|(_, field)| field.is_none())
            .map(|(header, _)| header.to_string())
            .collect();

        let mut summary = SeedSummary {
            imported: Vec::new(),
            skipped_columns,
        };

        for (index, row) in csv_reader.records().enumerate() {
            let row = row?;
            let payload = row_payload(&columns, &row);
            let record = self
                .lifecycle
                .create(&self.operator, payload, Some(ItemStatus::Published))
                .map_err(|source| SeedImportError::Item {
                    row: index + 1,
                    source,
                })?;
            summary.imported.push(record.id);
        }

        info!(
            imported = summary.imported.len(),
            skipped_columns = ?summary.skipped_columns,
            "seed import finished"
        );
        Ok(summary)
    }
}

fn row_payload(columns: &[Option<ItemField>], row: &csv::StringRecord) -> ItemPayload {
    let mut payload = ItemPayload::new();
    for (field, cell) in columns.iter().zip(row.iter()) {
        let Some(field) = field else {
            continue;
        };
        if cell.is_empty() {
            continue;
        }

        let value = match field {
            ItemField::Images => Value::Array(
                cell.split(IMAGE_SEPARATOR)
                    .map(str::trim)
                    .filter(|reference| !reference.is_empty())
                    .map(|reference| Value::String(reference.to_string()))
                    .collect(),
            ),
            _ => Value::String(cell.to_string()),
        };
        payload = payload.with(*field, value);
    }
    payload
}
