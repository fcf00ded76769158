//! Imports wired end to end: background search, progress, and collection into a
//! layer on the caller's thread. [`ImportSession`] runs a query batch,
//! [`CoverageSession`] a grid coverage search.

use std::time::Duration;

use serde::Serialize;
use tracing::{info, instrument, warn};
use uldk_registry::{QueryBatch, QueryKey, RegistrySearch};

use crate::collector::{AddSummary, ResultCollector, VectorLayer};
use crate::coverage::{CoverageEvent, CoverageReport, CoverageTarget, GridSearch};
use crate::error::Result;
use crate::progress::{
    ProgressCoordinator, ProgressCounters, ProgressEvent, ProgressSink, RunState,
};
use crate::record::ParcelRecord;
use crate::worker::{ParcelParser, SearchWorker, WorkerEvent};

/// A query that produced no parcel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportFailure {
    pub key: QueryKey,
    pub query: String,
    pub message: String,
    /// Registry status, when the registry rejected the query
    pub status: Option<String>,
    /// Set when the parcel was found but its geometry was unusable
    pub cadastral_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub state: RunState,
    pub added: usize,
    pub duplicates: usize,
    pub failures: Vec<ImportFailure>,
    pub counters: ProgressCounters,
}

/// Imports the parcels for a query batch into a layer.
///
/// Registry requests run on a worker thread; features are written on whichever
/// thread calls [`ImportSession::pump`] or [`ImportSession::finish`], since layers
/// are not assumed to be thread-safe.
pub struct ImportSession<L: VectorLayer> {
    progress: ProgressCoordinator<WorkerEvent<ParcelRecord>>,
    collector: ResultCollector<L>,
    failures: Vec<ImportFailure>,
    added: usize,
    duplicates: usize,
}

impl<L: VectorLayer> ImportSession<L> {
    pub fn start<S>(
        search: S,
        batch: QueryBatch,
        parser: ParcelParser,
        collector: ResultCollector<L>,
    ) -> Result<Self>
    where
        S: RegistrySearch + 'static,
    {
        let total = batch.len();
        info!(queries = total, layer = collector.layer().name(), "Starting import");
        let handle = SearchWorker::new(search, parser, batch).spawn()?;
        Ok(Self {
            progress: ProgressCoordinator::new(handle, Some(total)),
            collector,
            failures: Vec::new(),
            added: 0,
            duplicates: 0,
        })
    }

    pub fn with_sink(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.progress = self.progress.with_sink(sink);
        self
    }

    /// Process up to `max` pending events; returns how many were handled.
    ///
    /// A collector error aborts the whole run: the worker is cancelled and the
    /// error returned.
    pub fn pump(&mut self, max: usize) -> Result<usize> {
        let events = self.progress.poll(max);
        let count = events.len();
        for event in events {
            self.apply(event)?;
        }
        Ok(count)
    }

    fn apply(&mut self, event: WorkerEvent<ParcelRecord>) -> Result<()> {
        match event {
            WorkerEvent::Found { result, .. } => {
                let summary = collect(&mut self.collector, &mut self.progress, &result)?;
                self.added += summary.added;
                self.duplicates += summary.duplicates;
            }
            WorkerEvent::NotFound { key, query, error } => {
                self.failures.push(ImportFailure {
                    key,
                    query: query.to_string(),
                    message: error.to_string(),
                    status: error.status().map(str::to_string),
                    cadastral_id: error.cadastral_id().map(str::to_string),
                });
            }
            WorkerEvent::Finished | WorkerEvent::Interrupted | WorkerEvent::Failed(_) => {}
        }
        Ok(())
    }

    pub fn cancel(&self) {
        self.progress.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.progress.is_done()
    }

    pub fn state(&self) -> &RunState {
        self.progress.state()
    }

    pub fn counters(&self) -> &ProgressCounters {
        self.progress.counters()
    }

    pub fn failures(&self) -> &[ImportFailure] {
        &self.failures
    }

    pub fn collector(&self) -> &ResultCollector<L> {
        &self.collector
    }

    /// Pump until the worker ends.
    #[instrument(name = "Import", skip_all)]
    pub fn finish(mut self) -> Result<(ImportSummary, ResultCollector<L>)> {
        while !self.progress.is_done() {
            if self.pump(256)? == 0 {
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        // Events that arrived together with the terminal one
        while self.pump(256)? > 0 {}

        let summary = ImportSummary {
            state: self.progress.state().clone(),
            added: self.added,
            duplicates: self.duplicates,
            failures: self.failures,
            counters: self.progress.counters().clone(),
        };
        info!(
            state = ?summary.state,
            added = summary.added,
            duplicates = summary.duplicates,
            failed = summary.failures.len(),
            "Import ended"
        );
        Ok((summary, self.collector))
    }
}

/// Add one record; on failure stop the worker and return the error.
fn collect<L: VectorLayer, E: ProgressEvent>(
    collector: &mut ResultCollector<L>,
    progress: &mut ProgressCoordinator<E>,
    record: &ParcelRecord,
) -> Result<AddSummary> {
    collector.add(std::slice::from_ref(record)).map_err(|e| {
        warn!(error = %e, "Collector rejected records, cancelling run");
        progress.stop();
        e.into()
    })
}

#[derive(Debug, Clone)]
pub struct CoverageSummary {
    pub state: RunState,
    pub added: usize,
    pub duplicates: usize,
    /// Absent only if the worker failed before reporting
    pub report: Option<CoverageReport>,
    pub counters: ProgressCounters,
}

/// Collects the parcels found by a grid coverage search into a layer.
///
/// The search runs on a worker thread; each newly found parcel is written on the
/// thread that calls [`CoverageSession::pump`] or [`CoverageSession::finish`].
pub struct CoverageSession<L: VectorLayer> {
    progress: ProgressCoordinator<CoverageEvent>,
    collector: ResultCollector<L>,
    report: Option<CoverageReport>,
    added: usize,
    duplicates: usize,
}

impl<L: VectorLayer> CoverageSession<L> {
    pub fn start<S>(
        grid: GridSearch<S>,
        target: CoverageTarget,
        collector: ResultCollector<L>,
    ) -> Result<Self>
    where
        S: RegistrySearch + 'static,
    {
        info!(
            measure = target.measure(),
            layer = collector.layer().name(),
            "Starting coverage import"
        );
        let handle = grid.spawn(target)?;
        Ok(Self {
            progress: ProgressCoordinator::new(handle, None),
            collector,
            report: None,
            added: 0,
            duplicates: 0,
        })
    }

    pub fn with_sink(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.progress = self.progress.with_sink(sink);
        self
    }

    /// Process up to `max` pending events; returns how many were handled.
    pub fn pump(&mut self, max: usize) -> Result<usize> {
        let events = self.progress.poll(max);
        let count = events.len();
        for event in events {
            match event {
                CoverageEvent::Found(record) => {
                    let summary = collect(&mut self.collector, &mut self.progress, &record)?;
                    self.added += summary.added;
                    self.duplicates += summary.duplicates;
                }
                CoverageEvent::Finished(report) | CoverageEvent::Interrupted(report) => {
                    self.report = Some(*report);
                }
                CoverageEvent::Probe { .. } | CoverageEvent::Failed(_) => {}
            }
        }
        Ok(count)
    }

    pub fn cancel(&self) {
        self.progress.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.progress.is_done()
    }

    pub fn state(&self) -> &RunState {
        self.progress.state()
    }

    pub fn collector(&self) -> &ResultCollector<L> {
        &self.collector
    }

    #[instrument(name = "Coverage import", skip_all)]
    pub fn finish(mut self) -> Result<(CoverageSummary, ResultCollector<L>)> {
        while !self.progress.is_done() {
            if self.pump(256)? == 0 {
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        while self.pump(256)? > 0 {}

        let summary = CoverageSummary {
            state: self.progress.state().clone(),
            added: self.added,
            duplicates: self.duplicates,
            report: self.report,
            counters: self.progress.counters().clone(),
        };
        info!(
            state = ?summary.state,
            added = summary.added,
            duplicates = summary.duplicates,
            "Coverage import ended"
        );
        Ok((summary, self.collector))
    }
}
