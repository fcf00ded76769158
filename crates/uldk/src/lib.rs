//! ULDK - Parcel Lookup and Coverage Library
//!
//! Finds land parcels in the Polish cadastral registry (ULDK) and collects them into a
//! vector layer. Parcels can be looked up by cadastral id, by point, or for a whole
//! area or line through a grid/fishnet search that keeps probing until the area is
//! explained.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use uldk::{
//!     CollectorConfig, MemoryLayer, ParcelParser, QueryBatch, ResultCollector, UldkPoint,
//!     ImportSession, registry::{RegistryConfig, UldkSearch},
//! };
//!
//! let config = RegistryConfig::default().with_env_overrides();
//! let search = UldkSearch::parcels(&config, Arc::new(config.rate_limiter()))?;
//!
//! let batch = QueryBatch::from_points([UldkPoint::new(637_000.0, 486_000.0, 2180)]);
//! let collector = ResultCollector::with_default_fields(
//!     MemoryLayer::with_default_fields("parcels"),
//!     &CollectorConfig::default(),
//! )?;
//!
//! let (summary, collector) =
//!     ImportSession::start(search, batch, ParcelParser::new(), collector)?.finish()?;
//! println!("{} parcels added, {} failed", summary.added, summary.failures.len());
//! # Ok::<(), uldk::error::UldkError>(())
//! ```
//!
//! # Features
//!
//! - **Registry access**: Rate-limited client with pluggable fakes for testing
//! - **Background batches**: Cancellable worker threads with ordered progress events
//! - **Deduplication**: Each parcel is written once per run
//! - **Coverage search**: Area and line coverage with probe and time budgets
//! - **Bulk import**: Query batches straight from CSV files via Polars
use once_cell::sync::OnceCell;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

pub mod collector;
mod config;
pub mod coverage;
pub mod error;
pub mod import;
pub mod progress;
pub mod record;
mod session;
pub mod worker;

pub use collector::{
    AddSummary, CollectorError, DedupKey, DedupSet, Feature, LayerError, MemoryLayer,
    ResultCollector, VectorLayer,
};
pub use config::{CollectorConfig, CoverageConfig, CoverageConfigBuilder, UldkConfig};
pub use coverage::{
    CoverageEvent, CoverageOutcome, CoverageReport, CoverageTarget, GridSearch, ProbeOutcome,
};
pub use error::{Result, UldkError};
pub use import::{CsvImport, ImportedBatch, QueryColumns};
#[cfg(feature = "progress-bar")]
pub use progress::BarSink;
pub use progress::{LogSink, ProgressCoordinator, ProgressCounters, ProgressSink, RunState};
pub use record::{AdminUnit, FieldValue, ParcelField, ParcelRecord, parse_parcel_row};
pub use session::{CoverageSession, CoverageSummary, ImportFailure, ImportSession, ImportSummary};
pub use uldk_registry as registry;
pub use uldk_registry::{Query, QueryBatch, QueryKey, RegistrySearch, UldkPoint};
pub use worker::{
    AdminUnitParser, CancelToken, ItemError, ParcelParser, RawRows, ResponseHandler,
    SearchWorker, WorkerEvent, WorkerHandle,
};

static LOGGER_INIT: OnceCell<()> = OnceCell::new();

/// Initialize logging for the library.
///
/// `RUST_LOG` takes precedence over `level`. Safe to call more than once; only the
/// first call installs a subscriber.
///
/// ```rust
/// uldk::init_logging(tracing::Level::INFO)?;
/// # Ok::<(), uldk::error::UldkError>(())
/// ```
pub fn init_logging(level: impl Into<LevelFilter>) -> Result<&'static ()> {
    LOGGER_INIT.get_or_try_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level.into().to_string()))?
            .add_directive("reqwest=warn".parse()?)
            .add_directive("hyper_util=warn".parse()?);

        tracing_subscriber::fmt::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .init();
        Ok(())
    })
}
