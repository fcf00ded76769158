//! Background batch search.
//!
//! A [`SearchWorker`] walks a [`QueryBatch`] in insertion order, sends each query to
//! the registry and turns the rows into a result with a [`ResponseHandler`]. Every
//! query produces exactly one [`WorkerEvent::Found`] or [`WorkerEvent::NotFound`];
//! one bad query never stops the batch. The run ends with exactly one terminal
//! event: `Finished`, `Interrupted` or `Failed`.

use std::sync::mpsc;

use ahash::AHashMap;
use tracing::{debug, info, instrument, warn};
use uldk_registry::{Query, QueryBatch, QueryKey, RegistrySearch};

mod handle;

pub use error::ItemError;
pub use handle::{CancelToken, WorkerHandle};

use crate::record::{
    AdminUnit, PARCEL_FIELD_COUNT, ParcelRecord, RecordError, parse_admin_rows, parse_parcel_row,
};

/// Turns the rows of one successful response into a result.
pub trait ResponseHandler: Send + 'static {
    type Output: Send + 'static;

    fn handle(&self, key: QueryKey, rows: Vec<String>) -> Result<Self::Output, ItemError>;
}

/// Passes rows through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawRows;

impl ResponseHandler for RawRows {
    type Output = Vec<String>;

    fn handle(&self, _key: QueryKey, rows: Vec<String>) -> Result<Self::Output, ItemError> {
        Ok(rows)
    }
}

/// Parses the first row of each response as a parcel.
///
/// Extra attributes registered for a key (e.g. columns of an imported table) are
/// attached to that key's record.
#[derive(Debug, Clone, Default)]
pub struct ParcelParser {
    extra: AHashMap<QueryKey, Vec<String>>,
}

impl ParcelParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extra(extra: AHashMap<QueryKey, Vec<String>>) -> Self {
        Self { extra }
    }
}

impl ResponseHandler for ParcelParser {
    type Output = ParcelRecord;

    fn handle(&self, key: QueryKey, rows: Vec<String>) -> Result<Self::Output, ItemError> {
        let row = rows.first().ok_or(RecordError::ResponseData {
            expected: PARCEL_FIELD_COUNT,
            found: 0,
        })?;
        let extra = self.extra.get(&key).map_or(&[][..], Vec::as_slice);
        Ok(parse_parcel_row(row, extra)?)
    }
}

/// Parses every row as a `name|teryt` administrative unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdminUnitParser;

impl ResponseHandler for AdminUnitParser {
    type Output = Vec<AdminUnit>;

    fn handle(&self, _key: QueryKey, rows: Vec<String>) -> Result<Self::Output, ItemError> {
        Ok(parse_admin_rows(&rows)?)
    }
}

/// Event emitted by a [`SearchWorker`].
#[derive(Debug)]
pub enum WorkerEvent<T> {
    Found {
        key: QueryKey,
        result: T,
    },
    NotFound {
        key: QueryKey,
        query: Query,
        error: ItemError,
    },
    /// Every query was processed.
    Finished,
    /// Cancellation was observed before the batch was exhausted.
    Interrupted,
    /// The worker thread died unexpectedly.
    Failed(String),
}

impl<T> WorkerEvent<T> {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Interrupted | Self::Failed(_))
    }
}

/// How a worker run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Finished,
    Interrupted,
    /// The event receiver went away mid-run.
    Disconnected,
}

/// Resolves a batch of queries against the registry, one at a time.
#[derive(Debug)]
pub struct SearchWorker<S, H> {
    search: S,
    handler: H,
    batch: QueryBatch,
}

impl<S, H> SearchWorker<S, H>
where
    S: RegistrySearch + 'static,
    H: ResponseHandler,
{
    pub fn new(search: S, handler: H, batch: QueryBatch) -> Self {
        Self {
            search,
            handler,
            batch,
        }
    }

    pub fn batch(&self) -> &QueryBatch {
        &self.batch
    }

    /// Process the batch on the current thread.
    ///
    /// Cancellation is checked before each query. Exactly one terminal event is
    /// sent unless the receiver is gone.
    #[instrument(name = "Search batch", skip_all, fields(queries = self.batch.len()))]
    pub fn run(
        &self,
        events: &mpsc::Sender<WorkerEvent<H::Output>>,
        cancel: &CancelToken,
    ) -> RunOutcome {
        let mut found = 0usize;
        let mut failed = 0usize;

        for (key, query) in self.batch.iter() {
            if cancel.is_cancelled() {
                info!(found, failed, "Search interrupted");
                let _ = events.send(WorkerEvent::Interrupted);
                return RunOutcome::Interrupted;
            }

            let event = match self.resolve(key, query) {
                Ok(result) => {
                    found += 1;
                    debug!(key, %query, "Query resolved");
                    WorkerEvent::Found { key, result }
                }
                Err(error) => {
                    failed += 1;
                    warn!(key, %query, %error, "Query failed");
                    WorkerEvent::NotFound {
                        key,
                        query: query.clone(),
                        error,
                    }
                }
            };
            if events.send(event).is_err() {
                warn!("Event receiver dropped, stopping search");
                return RunOutcome::Disconnected;
            }
        }

        info!(found, failed, "Search finished");
        let _ = events.send(WorkerEvent::Finished);
        RunOutcome::Finished
    }

    fn resolve(&self, key: QueryKey, query: &Query) -> Result<H::Output, ItemError> {
        let rows = self.search.search(query)?;
        self.handler.handle(key, rows)
    }

    /// Run the batch on a background thread.
    pub fn spawn(self) -> std::io::Result<WorkerHandle<WorkerEvent<H::Output>>> {
        WorkerHandle::spawn("uldk-search", WorkerEvent::Failed, move |tx, cancel| {
            self.run(&tx, &cancel);
        })
    }
}

mod error {
    use thiserror::Error;
    use uldk_registry::RegistryError;

    use crate::record::RecordError;

    /// Why a single query produced no result.
    #[derive(Error, Debug)]
    pub enum ItemError {
        #[error(transparent)]
        Registry(#[from] RegistryError),
        #[error(transparent)]
        Record(#[from] RecordError),
    }
}

impl ItemError {
    /// Registry status string, if the registry itself rejected the query.
    pub fn status(&self) -> Option<&str> {
        match self {
            Self::Registry(e) => e.status(),
            Self::Record(_) => None,
        }
    }

    /// Cadastral id of a parcel whose geometry could not be used.
    pub fn cadastral_id(&self) -> Option<&str> {
        match self {
            Self::Record(RecordError::BadGeometry { attributes, .. }) => {
                Some(&attributes.cadastral_id)
            }
            _ => None,
        }
    }
}
