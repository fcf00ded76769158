//! Bulk query batches from tabular data.
//!
//! Each row of a CSV file (or an in-memory [`DataFrame`]) becomes one query keyed by
//! its row index, either a parcel-id lookup or a point lookup. Rows with a blank id
//! or an unparseable coordinate are skipped and reported, never fatal. Extra columns
//! travel with the query and end up on the parcel record.

use std::path::Path;

use ahash::AHashMap;
use itertools::izip;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uldk_registry::{Query, QueryBatch, QueryKey, UldkPoint};

pub use error::ImportError;
use error::Result;

use crate::worker::ParcelParser;

/// Which columns describe the query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryColumns {
    Ids { column: String },
    Points { x: String, y: String, srid: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRow {
    pub row: usize,
    pub reason: String,
}

/// Queries read from a table.
#[derive(Debug, Clone, Default)]
pub struct ImportedBatch {
    pub batch: QueryBatch,
    /// Values of the extra columns, per query
    pub extra: AHashMap<QueryKey, Vec<String>>,
    pub skipped: Vec<SkippedRow>,
}

impl ImportedBatch {
    /// Parser that attaches each row's extra values to its parcel.
    pub fn parser(&self) -> ParcelParser {
        ParcelParser::with_extra(self.extra.clone())
    }
}

#[derive(Debug, Clone)]
pub struct CsvImport {
    columns: QueryColumns,
    separator: u8,
    extra_columns: Vec<String>,
}

impl CsvImport {
    pub fn ids(column: impl Into<String>) -> Self {
        Self::new(QueryColumns::Ids {
            column: column.into(),
        })
    }

    pub fn points(x: impl Into<String>, y: impl Into<String>, srid: u32) -> Self {
        Self::new(QueryColumns::Points {
            x: x.into(),
            y: y.into(),
            srid,
        })
    }

    pub fn new(columns: QueryColumns) -> Self {
        Self {
            columns,
            separator: b',',
            extra_columns: Vec::new(),
        }
    }

    pub fn with_separator(mut self, separator: u8) -> Self {
        self.separator = separator;
        self
    }

    pub fn with_extra_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Read a CSV file with a header row. Every column is read as text.
    #[instrument(name = "Read CSV", skip_all, fields(path = %path.as_ref().display()))]
    pub fn read(&self, path: impl AsRef<Path>) -> Result<ImportedBatch> {
        let df = LazyCsvReader::new(path.as_ref())
            .with_separator(self.separator)
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .finish()?
            .collect()?;
        debug!(rows = df.height(), columns = df.width(), "CSV loaded");
        self.from_frame(&df)
    }

    pub fn from_frame(&self, df: &DataFrame) -> Result<ImportedBatch> {
        let extras = self
            .extra_columns
            .iter()
            .map(|name| string_column(df, name))
            .collect::<Result<Vec<_>>>()?;

        let mut imported = ImportedBatch::default();
        let mut add = |row: usize, query: Query| {
            let key = row as QueryKey;
            imported.batch.insert(key, query);
            if !extras.is_empty() {
                let values = extras
                    .iter()
                    .map(|column| column.get(row).unwrap_or_default().to_string())
                    .collect();
                imported.extra.insert(key, values);
            }
        };
        let mut skipped = Vec::new();

        match &self.columns {
            QueryColumns::Ids { column } => {
                let ids = string_column(df, column)?;
                for (row, id) in ids.iter().enumerate() {
                    match id.map(str::trim).filter(|id| !id.is_empty()) {
                        Some(id) => add(row, Query::Id(id.to_string())),
                        None => skipped.push(SkippedRow {
                            row,
                            reason: format!("empty '{column}'"),
                        }),
                    }
                }
            }
            QueryColumns::Points { x, y, srid } => {
                let xs = string_column(df, x)?;
                let ys = string_column(df, y)?;
                for (row, (x_value, y_value)) in izip!(xs.iter(), ys.iter()).enumerate() {
                    match (parse_coordinate(x_value), parse_coordinate(y_value)) {
                        (Some(x), Some(y)) => add(row, Query::Point(UldkPoint::new(x, y, *srid))),
                        _ => skipped.push(SkippedRow {
                            row,
                            reason: format!(
                                "invalid coordinates ({}, {})",
                                x_value.unwrap_or_default(),
                                y_value.unwrap_or_default()
                            ),
                        }),
                    }
                }
            }
        }

        imported.skipped = skipped;
        info!(
            queries = imported.batch.len(),
            skipped = imported.skipped.len(),
            "Queries imported"
        );
        Ok(imported)
    }
}

fn string_column(df: &DataFrame, name: &str) -> Result<StringChunked> {
    if df.get_column_index(name).is_none() {
        return Err(ImportError::MissingColumn(name.to_string()));
    }
    Ok(df.column(name)?.cast(&DataType::String)?.str()?.clone())
}

/// Accepts decimal commas.
fn parse_coordinate(value: Option<&str>) -> Option<f64> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.replace(',', ".").parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum ImportError {
        #[error("Polars error: {0}")]
        Polars(#[from] polars::prelude::PolarsError),
        #[error("Missing column '{0}'")]
        MissingColumn(String),
    }

    pub type Result<T> = std::result::Result<T, ImportError>;
}
